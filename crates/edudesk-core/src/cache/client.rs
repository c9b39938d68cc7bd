//! Caching, de-duplicating front for GET requests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use crate::api::request::decode_body;
use crate::api::{ApiClient, ApiError, ApiRequest, ApiResponse, Query};
use crate::clock::{Clock, SystemClock};

use super::manager::{cache_key, ResponseCache};

type SharedFetch = Shared<BoxFuture<'static, Result<Arc<Value>, ApiError>>>;

struct InFlight {
    id: u64,
    fetch: SharedFetch,
}

/// Cache entries and in-flight fetches live under one lock so that
/// check-cache, check-registry and register happen as one step.
#[derive(Default)]
struct CacheState {
    cache: ResponseCache,
    in_flight: HashMap<String, InFlight>,
    next_id: u64,
}

enum Lookup {
    Hit(Arc<Value>),
    Pending(SharedFetch),
}

/// Wraps an [`ApiClient`] with a TTL response cache and in-flight
/// de-duplication for reads.
///
/// At most one network call per cache key is outstanding at a time; every
/// concurrent caller for that key receives the same result.
#[derive(Clone)]
pub struct CachedClient {
    api: ApiClient,
    clock: Arc<dyn Clock>,
    state: Arc<Mutex<CacheState>>,
}

impl CachedClient {
    pub fn new(api: ApiClient) -> Self {
        Self::with_clock(api, Arc::new(SystemClock))
    }

    pub fn with_clock(api: ApiClient, clock: Arc<dyn Clock>) -> Self {
        Self {
            api,
            clock,
            state: Arc::new(Mutex::new(CacheState::default())),
        }
    }

    /// The underlying client, for mutations and uncached reads
    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    fn lock_state(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// GET `url` through the cache.
    ///
    /// A fresh cached value is returned without touching the network. Otherwise
    /// the caller joins an outstanding fetch for the same key, or starts one.
    /// Successful responses are cached for `ttl` unless the server sent
    /// `Cache-Control: no-cache` or `no-store`.
    pub async fn cached_get<T: DeserializeOwned>(
        &self,
        url: &str,
        ttl: Duration,
        params: Option<&Query>,
    ) -> Result<T, ApiError> {
        let value = match self.lookup_or_fetch(url, ttl, params)? {
            Lookup::Hit(value) => value,
            Lookup::Pending(fetch) => fetch.await?,
        };
        decode_body(&value)
    }

    /// Runs without yielding: the fetch is registered before anyone awaits it.
    fn lookup_or_fetch(&self, url: &str, ttl: Duration, params: Option<&Query>) -> Result<Lookup, ApiError> {
        let key = cache_key(url, params)?;
        let now = self.clock.now();
        let mut state = self.lock_state();

        if let Some(value) = state.cache.get(&key, now) {
            debug!(key = %key, "Cache hit");
            return Ok(Lookup::Hit(value));
        }

        if let Some(in_flight) = state.in_flight.get(&key) {
            debug!(key = %key, "Joining in-flight request");
            return Ok(Lookup::Pending(in_flight.fetch.clone()));
        }

        let id = state.next_id;
        state.next_id += 1;

        let mut request = ApiRequest::get(url);
        if let Some(query) = params {
            request = request.with_query(query.clone());
        }

        let fetch = self.clone().fetch(key.clone(), id, request, ttl).boxed().shared();
        state.in_flight.insert(
            key,
            InFlight {
                id,
                fetch: fetch.clone(),
            },
        );
        Ok(Lookup::Pending(fetch))
    }

    async fn fetch(self, key: String, id: u64, request: ApiRequest, ttl: Duration) -> Result<Arc<Value>, ApiError> {
        debug!(key = %key, "Cache miss, fetching");
        let result = self.api.request(&request).await;

        let now = self.clock.now();
        let mut state = self.lock_state();

        // Invalidation may have detached this fetch; never remove a newer one
        let registered = state.in_flight.get(&key).is_some_and(|f| f.id == id);
        if registered {
            state.in_flight.remove(&key);
        }

        let response = result?;
        let cacheable = response.is_cacheable();
        let value = Arc::new(response.body);

        if !registered {
            debug!(key = %key, "Fetch was invalidated while in flight, not caching");
        } else if !cacheable {
            debug!(key = %key, "Server disallowed caching");
        } else {
            state.cache.insert(key, Arc::clone(&value), now, ttl);
        }

        Ok(value)
    }

    /// Evict every cached entry whose key starts with `url_prefix`.
    ///
    /// In-flight reads under the prefix are detached: callers already waiting
    /// still get their result, but it is not cached and later callers start
    /// a fresh request. Returns the number of evicted cache entries.
    pub fn invalidate_cache(&self, url_prefix: &str) -> usize {
        let mut state = self.lock_state();
        let evicted = state.cache.invalidate_prefix(url_prefix);

        let before = state.in_flight.len();
        state.in_flight.retain(|key, _| !key.starts_with(url_prefix));
        let detached = before - state.in_flight.len();

        debug!(prefix = url_prefix, evicted, detached, "Cache invalidated");
        evicted
    }

    /// Perform a mutation and, if it succeeds, invalidate `url_prefix`.
    pub async fn send_and_invalidate(&self, request: &ApiRequest, url_prefix: &str) -> Result<ApiResponse, ApiError> {
        let response = self.api.request(request).await?;
        self.invalidate_cache(url_prefix);
        Ok(response)
    }

    pub fn clear_cache(&self) {
        let mut state = self.lock_state();
        state.cache.clear();
        state.in_flight.clear();
        debug!("Cache cleared");
    }

    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        self.lock_state().cache.purge_expired(now)
    }

    pub fn cache_len(&self) -> usize {
        self.lock_state().cache.len()
    }

    pub fn in_flight_len(&self) -> usize {
        self.lock_state().in_flight.len()
    }

    /// Log out and drop everything cached for the previous user
    pub fn logout(&self) {
        self.api.logout();
        self.clear_cache();
    }
}
