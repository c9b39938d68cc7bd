//! Request and response descriptors shared by the transport and cache layers.

use std::collections::BTreeMap;
use std::fmt::Display;

use reqwest::{Method, StatusCode};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;

use super::ApiError;

/// How many times a single logical request may go through the refresh path.
const MAX_REFRESHES_PER_REQUEST: u32 = 1;

/// Query parameters with a canonical ordering.
///
/// Backed by a `BTreeMap`, so two parameter sets with the same pairs encode
/// identically no matter the order they were built in.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Query(BTreeMap<String, String>);

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    pub fn with(mut self, key: impl Into<String>, value: impl Display) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Display) {
        self.0.insert(key.into(), value.to_string());
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Build a query from any struct or map that serializes to a JSON object.
    ///
    /// `null` fields are dropped, strings/numbers/bools are rendered bare and
    /// nested arrays or objects are rendered as compact JSON.
    pub fn from_serialize<T: Serialize>(params: &T) -> Result<Self, ApiError> {
        let value = serde_json::to_value(params)
            .map_err(|e| ApiError::InvalidRequest(format!("Unserializable query parameters: {}", e)))?;

        let map = match value {
            Value::Object(map) => map,
            Value::Null => return Ok(Self::new()),
            other => {
                return Err(ApiError::InvalidRequest(format!(
                    "Query parameters must serialize to an object, got {}",
                    other
                )))
            }
        };

        let mut query = Self::new();
        for (key, value) in map {
            match value {
                Value::Null => {}
                Value::String(s) => query.insert(key, s),
                Value::Bool(b) => query.insert(key, b),
                Value::Number(n) => query.insert(key, n),
                nested => query.insert(key, nested),
            }
        }
        Ok(query)
    }

    /// Parse `key=value` pairs, as typed on a command line.
    pub fn parse_pairs<I, S>(pairs: I) -> Result<Self, ApiError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut query = Self::new();
        for pair in pairs {
            let pair = pair.as_ref();
            let (key, value) = pair.split_once('=').ok_or_else(|| {
                ApiError::InvalidRequest(format!("Expected key=value, got '{}'", pair))
            })?;
            if key.is_empty() {
                return Err(ApiError::InvalidRequest(format!("Empty parameter name in '{}'", pair)));
            }
            query.insert(key, value);
        }
        Ok(query)
    }

    /// Url-encode the parameters in key order.
    pub fn encode(&self) -> Result<String, ApiError> {
        serde_urlencoded::to_string(&self.0)
            .map_err(|e| ApiError::InvalidRequest(format!("Failed to encode query: {}", e)))
    }

    pub(crate) fn as_map(&self) -> &BTreeMap<String, String> {
        &self.0
    }
}

/// An immutable description of one API call.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    method: Method,
    path: String,
    query: Query,
    body: Option<Value>,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Query::new(),
            body: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn patch(path: impl Into<String>) -> Self {
        Self::new(Method::PATCH, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    pub fn with_query(mut self, query: Query) -> Self {
        self.query = query;
        self
    }

    pub fn with_json<B: Serialize + ?Sized>(mut self, body: &B) -> Result<Self, ApiError> {
        let value = serde_json::to_value(body)
            .map_err(|e| ApiError::InvalidRequest(format!("Unserializable request body: {}", e)))?;
        self.body = Some(value);
        Ok(self)
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn query(&self) -> &Query {
        &self.query
    }

    pub fn body(&self) -> Option<&Value> {
        self.body.as_ref()
    }
}

/// Tracks how a request has been retried without touching the request itself.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Attempt<'a> {
    request: &'a ApiRequest,
    refreshes: u32,
}

impl<'a> Attempt<'a> {
    pub(crate) fn new(request: &'a ApiRequest) -> Self {
        Self {
            request,
            refreshes: 0,
        }
    }

    pub(crate) fn request(&self) -> &'a ApiRequest {
        self.request
    }

    pub(crate) fn can_refresh(&self) -> bool {
        self.refreshes < MAX_REFRESHES_PER_REQUEST
    }

    pub(crate) fn after_refresh(self) -> Self {
        Self {
            request: self.request,
            refreshes: self.refreshes + 1,
        }
    }
}

/// A successful response: status, caching directive and JSON body.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: StatusCode,
    pub cache_control: Option<String>,
    pub body: Value,
}

impl ApiResponse {
    /// False when the server asked for the response not to be stored.
    pub fn is_cacheable(&self) -> bool {
        !self
            .cache_control
            .as_deref()
            .map(forbids_storage)
            .unwrap_or(false)
    }

    pub fn json<T: DeserializeOwned>(self) -> Result<T, ApiError> {
        decode_body(&self.body)
    }
}

/// Deserialize a JSON body into the caller's type.
pub(crate) fn decode_body<T: DeserializeOwned>(body: &Value) -> Result<T, ApiError> {
    T::deserialize(body).map_err(|e| ApiError::InvalidResponse(format!("Failed to parse JSON response: {}", e)))
}

fn forbids_storage(cache_control: &str) -> bool {
    cache_control.split(',').any(|directive| {
        let name = directive.split('=').next().unwrap_or("").trim();
        name.eq_ignore_ascii_case("no-cache") || name.eq_ignore_ascii_case("no-store")
    })
}
