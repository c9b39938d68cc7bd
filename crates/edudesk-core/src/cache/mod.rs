//! Response caching module for read-heavy views.
//!
//! This module provides the `CachedClient`, which sits in front of GET
//! requests made through the `ApiClient`:
//! - Fresh responses are served from a TTL-bounded in-memory cache
//! - Concurrent reads of the same URL + params share one network call
//! - Mutations evict stale reads with prefix-based invalidation

pub mod client;
pub mod manager;

pub use client::CachedClient;
pub use manager::{cache_key, CachedData, ResponseCache};
