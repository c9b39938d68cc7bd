//! Core library for edudesk.
//!
//! The shared HTTP layer of the school-management console: an authenticated
//! `ApiClient` that renews expired tokens, and a `CachedClient` that caches
//! and de-duplicates reads in front of it.

pub mod api;
pub mod auth;
pub mod cache;
pub mod clock;
pub mod config;

pub use api::{ApiClient, ApiError, ApiRequest, ApiResponse, Method, Query};
pub use auth::{AuthState, Session, TokenPair, TokenStore};
pub use cache::CachedClient;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ClientConfig, Config};
