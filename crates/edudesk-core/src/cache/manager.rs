use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde_json::Value;

use crate::api::{ApiError, Query};

/// A cached response body and its freshness window.
#[derive(Debug, Clone)]
pub struct CachedData {
    pub data: Arc<Value>,
    pub cached_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl CachedData {
    pub fn new(data: Arc<Value>, now: DateTime<Utc>, ttl: Duration) -> Self {
        // A TTL too large for chrono never expires
        let expires_at = TimeDelta::from_std(ttl)
            .ok()
            .and_then(|ttl| now.checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        Self {
            data,
            cached_at: now,
            expires_at,
        }
    }

    /// Entries are only served while `now < expires_at`
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn age(&self, now: DateTime<Utc>) -> TimeDelta {
        now - self.cached_at
    }
}

/// Build the key for a URL and its parameters.
///
/// Parameters are url-encoded in key order, so the key never depends on the
/// order the parameters were added in. Without parameters the key is `url`.
pub fn cache_key(url: &str, params: Option<&Query>) -> Result<String, ApiError> {
    match params {
        Some(query) if !query.is_empty() => {
            let separator = if url.contains('?') { '&' } else { '?' };
            Ok(format!("{}{}{}", url, separator, query.encode()?))
        }
        _ => Ok(url.to_string()),
    }
}

/// TTL-bounded map of response bodies keyed by [`cache_key`].
#[derive(Debug, Default)]
pub struct ResponseCache {
    entries: HashMap<String, CachedData>,
}

impl ResponseCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fresh value for `key`; an expired entry is dropped and reported absent.
    pub fn get(&mut self, key: &str, now: DateTime<Utc>) -> Option<Arc<Value>> {
        match self.entries.get(key) {
            Some(entry) if !entry.is_expired(now) => Some(Arc::clone(&entry.data)),
            Some(_) => {
                self.entries.remove(key);
                None
            }
            None => None,
        }
    }

    pub fn insert(&mut self, key: String, data: Arc<Value>, now: DateTime<Utc>, ttl: Duration) {
        if ttl.is_zero() {
            return;
        }
        self.entries.insert(key, CachedData::new(data, now, ttl));
    }

    /// Evict every entry whose key starts with `prefix`, returning how many went.
    pub fn invalidate_prefix(&mut self, prefix: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|key, _| !key.starts_with(prefix));
        before - self.entries.len()
    }

    pub fn purge_expired(&mut self, now: DateTime<Utc>) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        before - self.entries.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ============================================================================
// Tests
// ============================================================================
