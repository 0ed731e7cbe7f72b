//! Nightly profile rebuilder.
//!
//! A worker thread sleeps until the next local midnight, then rebuilds
//! every profile from the transaction log. A tick that fires while a
//! rebuild is still in flight is skipped, never queued. Shutdown waits
//! up to the drain timeout for an in-flight rebuild before abandoning
//! the thread.

use crate::{cancel::CancelToken, clock::Clock, config::EngineConfig, store::ProfileStore};
use chrono::{DateTime, Utc};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::Duration as StdDuration;

// ── Overlap guard ────────────────────────────────────────────────────────────

/// Mutual exclusion for rebuild runs: `begin` hands out a permit only
/// when no rebuild is in flight, and `wait_idle` lets shutdown drain.
pub struct RebuildGuard {
    busy: Mutex<bool>,
    idle: Condvar,
}

impl RebuildGuard {
    pub fn new() -> Self {
        Self {
            busy: Mutex::new(false),
            idle: Condvar::new(),
        }
    }

    /// Claim the rebuild slot. None when a rebuild is already running.
    pub fn begin(&self) -> Option<RebuildPermit<'_>> {
        let mut busy = self.busy.lock().unwrap();
        if *busy {
            return None;
        }
        *busy = true;
        Some(RebuildPermit { guard: self })
    }

    /// Wait until no rebuild is in flight. False on timeout.
    pub fn wait_idle(&self, timeout: StdDuration) -> bool {
        let busy = self.busy.lock().unwrap();
        let (busy, result) = self
            .idle
            .wait_timeout_while(busy, timeout, |busy| *busy)
            .unwrap();
        drop(busy);
        !result.timed_out()
    }
}

impl Default for RebuildGuard {
    fn default() -> Self {
        Self::new()
    }
}

pub struct RebuildPermit<'a> {
    guard: &'a RebuildGuard,
}

impl Drop for RebuildPermit<'_> {
    fn drop(&mut self) {
        *self.guard.busy.lock().unwrap() = false;
        self.guard.idle.notify_all();
    }
}

// ── Scheduler ────────────────────────────────────────────────────────────────

struct Shared {
    store:                Arc<ProfileStore>,
    clock:                Arc<dyn Clock>,
    guard:                RebuildGuard,
    shutdown:             Mutex<bool>,
    shutdown_signal:      Condvar,
    timezone_offset_mins: i64,
}

impl Shared {
    /// Sleep until shutdown or the deadline, whichever comes first.
    /// Returns true when shutting down.
    fn wait_shutdown(&self, timeout: StdDuration) -> bool {
        let flag = self.shutdown.lock().unwrap();
        let (flag, _) = self
            .shutdown_signal
            .wait_timeout_while(flag, timeout, |stop| !*stop)
            .unwrap();
        *flag
    }

    fn run_once(&self) -> bool {
        let Some(_permit) = self.guard.begin() else {
            log::warn!("profile rebuild already in progress, skipping this run");
            return false;
        };
        log::info!("starting profile rebuild");
        let ctx = CancelToken::new();
        match self.store.rebuild_all_profiles(&ctx) {
            Ok(count) => log::info!("profile rebuild completed for {count} users"),
            Err(e) => log::error!("profile rebuild failed: {e}"),
        }
        true
    }
}

pub struct NightlyRebuilder {
    shared:        Arc<Shared>,
    handle:        Option<JoinHandle<()>>,
    drain_timeout: StdDuration,
}

impl NightlyRebuilder {
    pub fn start(store: Arc<ProfileStore>, clock: Arc<dyn Clock>, config: &EngineConfig) -> Self {
        let shared = Arc::new(Shared {
            store,
            clock,
            guard: RebuildGuard::new(),
            shutdown: Mutex::new(false),
            shutdown_signal: Condvar::new(),
            timezone_offset_mins: config.timezone_offset_mins,
        });

        let worker = Arc::clone(&shared);
        let handle = std::thread::spawn(move || loop {
            let wait = until_next_midnight(worker.clock.now(), worker.timezone_offset_mins);
            if worker.wait_shutdown(wait) {
                break;
            }
            worker.run_once();
        });

        Self {
            shared,
            handle: Some(handle),
            drain_timeout: StdDuration::from_secs(config.drain_timeout_secs),
        }
    }

    /// Trigger a rebuild on the calling thread, outside the schedule.
    /// Returns false when one is already in flight (the run is skipped).
    pub fn rebuild_now(&self) -> bool {
        self.shared.run_once()
    }

    pub fn guard(&self) -> &RebuildGuard {
        &self.shared.guard
    }

    /// Stop the scheduler. Waits up to the drain timeout for an in-flight
    /// rebuild; an overrunning rebuild is abandoned to its thread.
    pub fn shutdown(mut self) {
        {
            let mut stop = self.shared.shutdown.lock().unwrap();
            *stop = true;
            self.shared.shutdown_signal.notify_all();
        }

        if !self.shared.guard.wait_idle(self.drain_timeout) {
            log::warn!(
                "rebuild still running after {}s drain timeout, abandoning",
                self.drain_timeout.as_secs()
            );
            return;
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// Time until 00:00 of the next day, local to the configured offset.
fn until_next_midnight(now: DateTime<Utc>, offset_mins: i64) -> StdDuration {
    let local = (now + chrono::Duration::minutes(offset_mins)).naive_utc();
    let next_midnight = (local.date() + chrono::Days::new(1))
        .and_hms_opt(0, 0, 0)
        .expect("midnight is a valid time");
    (next_midnight - local)
        .to_std()
        .unwrap_or(StdDuration::ZERO)
}
