//! In-process key/value cache with TTLs and hash counters.
//!
//! Backs the bulk-job progress records and exposes the generic
//! set/exists/expire surface the auth layer's token blacklist uses.
//! Expiry is lazy: entries past their deadline are dropped on access.
//! The clock is injected so TTL behavior is testable.

use crate::{
    cancel::CancelToken,
    clock::Clock,
    error::{EngineError, EngineResult},
};
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

enum Value {
    Scalar(String),
    Hash(HashMap<String, String>),
}

struct Entry {
    value:      Value,
    expires_at: Option<DateTime<Utc>>,
}

impl Entry {
    fn expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map_or(false, |deadline| now >= deadline)
    }
}

pub struct CacheStore {
    clock: Arc<dyn Clock>,
    inner: Mutex<HashMap<String, Entry>>,
}

impl CacheStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            inner: Mutex::new(HashMap::new()),
        }
    }

    pub fn set(
        &self,
        ctx: &CancelToken,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> EngineResult<()> {
        ctx.check()?;
        let now = self.clock.now();
        let mut map = self.inner.lock().unwrap();
        map.insert(
            key.to_string(),
            Entry {
                value: Value::Scalar(value.to_string()),
                expires_at: ttl.map(|d| now + d),
            },
        );
        Ok(())
    }

    pub fn exists(&self, ctx: &CancelToken, key: &str) -> EngineResult<bool> {
        ctx.check()?;
        let now = self.clock.now();
        let mut map = self.inner.lock().unwrap();
        Ok(Self::live(&mut map, key, now).is_some())
    }

    /// Set or replace a key's TTL. Returns false when the key is absent.
    pub fn expire(&self, ctx: &CancelToken, key: &str, ttl: Duration) -> EngineResult<bool> {
        ctx.check()?;
        let now = self.clock.now();
        let mut map = self.inner.lock().unwrap();
        match Self::live(&mut map, key, now) {
            Some(entry) => {
                entry.expires_at = Some(now + ttl);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Write hash fields, creating the hash if absent. TTL is untouched.
    pub fn hset(&self, ctx: &CancelToken, key: &str, fields: &[(&str, String)]) -> EngineResult<()> {
        ctx.check()?;
        let now = self.clock.now();
        let mut map = self.inner.lock().unwrap();
        let entry = Self::live_hash(&mut map, key, now)?;
        for (field, value) in fields {
            entry.insert(field.to_string(), value.clone());
        }
        Ok(())
    }

    /// Atomically add `delta` to an integer hash field, creating the field
    /// (and the hash) at zero. Returns the new value.
    pub fn hincr_by(
        &self,
        ctx: &CancelToken,
        key: &str,
        field: &str,
        delta: i64,
    ) -> EngineResult<i64> {
        ctx.check()?;
        let now = self.clock.now();
        let mut map = self.inner.lock().unwrap();
        let entry = Self::live_hash(&mut map, key, now)?;
        let current = entry
            .get(field)
            .map(|raw| {
                raw.parse::<i64>().map_err(|_| {
                    EngineError::Other(anyhow::anyhow!("hash field {field} is not an integer"))
                })
            })
            .transpose()?
            .unwrap_or(0);
        let updated = current + delta;
        entry.insert(field.to_string(), updated.to_string());
        Ok(updated)
    }

    pub fn hget_all(
        &self,
        ctx: &CancelToken,
        key: &str,
    ) -> EngineResult<Option<HashMap<String, String>>> {
        ctx.check()?;
        let now = self.clock.now();
        let mut map = self.inner.lock().unwrap();
        match Self::live(&mut map, key, now) {
            Some(Entry {
                value: Value::Hash(fields),
                ..
            }) => Ok(Some(fields.clone())),
            Some(_) => Err(EngineError::Other(anyhow::anyhow!(
                "key {key} holds a scalar, not a hash"
            ))),
            None => Ok(None),
        }
    }

    fn live<'a>(
        map: &'a mut HashMap<String, Entry>,
        key: &str,
        now: DateTime<Utc>,
    ) -> Option<&'a mut Entry> {
        if map.get(key).is_some_and(|entry| entry.expired(now)) {
            map.remove(key);
        }
        map.get_mut(key)
    }

    fn live_hash<'a>(
        map: &'a mut HashMap<String, Entry>,
        key: &str,
        now: DateTime<Utc>,
    ) -> EngineResult<&'a mut HashMap<String, String>> {
        if Self::live(map, key, now).is_none() {
            map.insert(
                key.to_string(),
                Entry {
                    value: Value::Hash(HashMap::new()),
                    expires_at: None,
                },
            );
        }
        match &mut map.get_mut(key).unwrap().value {
            Value::Hash(fields) => Ok(fields),
            Value::Scalar(_) => Err(EngineError::Other(anyhow::anyhow!(
                "key {key} holds a scalar, not a hash"
            ))),
        }
    }
}
