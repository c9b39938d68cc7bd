//! REST API client module for the school-management backend.
//!
//! This module provides the `ApiClient` for authenticated requests against
//! the platform's REST API (leave, timetable, exams, library, transport,
//! settings, files).
//!
//! The API uses JWT bearer token authentication. Expired access tokens are
//! renewed through `/auth/refresh` and the failed request is replayed once.

pub mod client;
pub mod error;
pub mod request;

pub use client::ApiClient;
pub use error::ApiError;
pub use request::{ApiRequest, ApiResponse, Query};
pub use reqwest::Method;
