//! stress-runner: headless bulk-ingestion driver for fraudlite.
//!
//! Usage:
//!   stress-runner --seed 12345 --rows 1000 --db run.db
//!   stress-runner --seed 12345 --rows 1000 --out stress_transactions.csv
//!
//! Generates a deterministic synthetic transaction CSV (amount outliers,
//! bursts, unknown modes, nocturnal rows), replays it through the bulk
//! ingestor, and prints the resulting counters and profile.

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use fraudlite_core::{
    cache::CacheStore,
    clock::{Clock, SystemClock},
    ingest::BulkIngestor,
    store::ProfileStore,
    CancelToken, EngineConfig,
};
use rand::{Rng, SeedableRng};
use rand_pcg::Pcg64Mcg;
use std::env;
use std::sync::Arc;

const MODES: [&str; 3] = ["UPI", "CARD", "NETBANKING"];
const BASE_AMOUNT: f64 = 500.0;

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let seed = parse_arg(&args, "--seed", 42u64);
    let rows = parse_arg(&args, "--rows", 1000usize);
    let db = args
        .windows(2)
        .find(|w| w[0] == "--db")
        .map(|w| w[1].as_str())
        .unwrap_or(":memory:");
    let out = args
        .windows(2)
        .find(|w| w[0] == "--out")
        .map(|w| w[1].to_string());

    println!("fraudlite stress-runner");
    println!("  seed: {seed}");
    println!("  rows: {rows}");
    println!("  db:   {db}");
    println!();

    let csv_bytes = generate_csv(seed, rows)?;
    if let Some(path) = &out {
        std::fs::write(path, &csv_bytes)?;
        println!("wrote {path}");
    }

    let store = Arc::new(if db == ":memory:" {
        ProfileStore::in_memory()?
    } else {
        ProfileStore::open(db)?
    });
    store.migrate()?;

    let clock = Arc::new(SystemClock);
    let ctx = CancelToken::new();
    let user_id = store.create_user(
        &ctx,
        "Stress Tester",
        &format!("stress-{seed}@example.com"),
        "not-a-real-hash",
        clock.now(),
    )?;

    let cache = Arc::new(CacheStore::new(clock.clone()));
    let ingestor = BulkIngestor::new(
        Arc::clone(&store),
        cache,
        clock,
        EngineConfig::default(),
    );
    let summary = ingestor.process_sync(&ctx, user_id, &csv_bytes, "stress_transactions.csv")?;

    println!("=== RUN SUMMARY ===");
    println!("  status:    {}", summary.status);
    println!("  processed: {}", summary.processed);
    println!("  success:   {}", summary.success);
    println!("  failed:    {}", summary.failed);

    if let Some(profile) = store.get_profile(&ctx, user_id)? {
        println!();
        println!("=== PROFILE ===");
        println!("  total txns:   {}", profile.total_transactions);
        println!("  allowed txns: {}", profile.allowed_transactions);
        if let Some(avg) = profile.avg_amount {
            println!("  avg amount:   {avg:.2}");
        }
        if let Some(stddev) = profile.stddev_amount {
            println!("  stddev:       {stddev:.2}");
        }
        if let Some(max) = profile.max_amount_seen {
            println!("  max seen:     {max:.2}");
        }
        if let Some(per_day) = profile.avg_txns_per_day {
            println!("  txns/day:     {per_day:.1}");
        }
        let modes: Vec<&str> = profile.registered_modes.iter().map(|m| m.as_str()).collect();
        println!("  modes:        {}", modes.join(", "));
        if let (Some(start), Some(end)) = (profile.usual_start_hour, profile.usual_end_hour) {
            println!("  usual hours:  {start:02}:00 – {end:02}:00");
        }
    }

    Ok(())
}

/// Synthetic transaction mix: ~15% amount outliers, ~10% bursts, ~5%
/// unknown mode, ~5% nocturnal, remainder normal daytime spend.
fn generate_csv(seed: u64, rows: usize) -> Result<Vec<u8>> {
    let mut rng = Pcg64Mcg::seed_from_u64(seed);
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(["amount", "mode", "created_at"])?;

    let mut last_txn_time = Utc::now() - Duration::days(120);

    for _ in 0..rows {
        let p: f64 = rng.gen();

        let (amount, mode, txn_time) = if p < 0.15 {
            // Amount deviation: 2.5x–5x the base.
            (
                BASE_AMOUNT * rng.gen_range(2.5..5.0),
                random_mode(&mut rng),
                random_daytime(&mut rng, last_txn_time),
            )
        } else if p < 0.25 {
            // Frequency burst: minutes after the previous row.
            (
                BASE_AMOUNT * rng.gen_range(0.8..1.2),
                random_mode(&mut rng),
                last_txn_time + Duration::minutes(rng.gen_range(1..4)),
            )
        } else if p < 0.30 {
            // Unknown payment mode.
            (
                BASE_AMOUNT * rng.gen_range(0.9..1.2),
                "CRYPTO".to_string(),
                random_daytime(&mut rng, last_txn_time),
            )
        } else if p < 0.35 {
            // Nocturnal.
            (
                BASE_AMOUNT * rng.gen_range(0.9..1.2),
                random_mode(&mut rng),
                random_late_night(&mut rng, last_txn_time),
            )
        } else {
            (
                BASE_AMOUNT * rng.gen_range(0.8..1.2),
                random_mode(&mut rng),
                random_daytime(&mut rng, last_txn_time),
            )
        };

        last_txn_time = txn_time;
        writer.write_record([
            format!("{amount:.2}"),
            mode,
            txn_time.to_rfc3339(),
        ])?;
    }

    writer
        .into_inner()
        .map_err(|e| anyhow::anyhow!("failed to flush CSV buffer: {e}"))
}

fn random_mode(rng: &mut Pcg64Mcg) -> String {
    MODES[rng.gen_range(0..MODES.len())].to_string()
}

fn random_daytime(rng: &mut Pcg64Mcg, prev: DateTime<Utc>) -> DateTime<Utc> {
    let day = prev.date_naive() + chrono::Days::new(rng.gen_range(0..2));
    let time = chrono::NaiveTime::from_hms_opt(rng.gen_range(9..19), rng.gen_range(0..60), 0)
        .expect("valid daytime");
    day.and_time(time).and_utc()
}

fn random_late_night(rng: &mut Pcg64Mcg, prev: DateTime<Utc>) -> DateTime<Utc> {
    let day = prev.date_naive() + chrono::Days::new(rng.gen_range(0..2));
    let time = chrono::NaiveTime::from_hms_opt(rng.gen_range(0..4), rng.gen_range(0..60), 0)
        .expect("valid night time");
    day.and_time(time).and_utc()
}

fn parse_arg<T: std::str::FromStr + Copy>(args: &[String], flag: &str, default: T) -> T {
    args.windows(2)
        .find(|w| w[0] == flag)
        .and_then(|w| w[1].parse().ok())
        .unwrap_or(default)
}
