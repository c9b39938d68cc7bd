// Shared helpers for the HTTP-level tests
#![allow(dead_code)]

use std::sync::Arc;

use edudesk_core::auth::MemoryTokenStore;
use edudesk_core::{ApiClient, CachedClient, ClientConfig, ManualClock, Session, TokenPair};
use wiremock::MockServer;

pub fn api_client(server: &MockServer, tokens: Option<TokenPair>) -> ApiClient {
    let store = match tokens {
        Some(tokens) => MemoryTokenStore::with_tokens(tokens),
        None => MemoryTokenStore::new(),
    };
    let session = Session::load(store).expect("memory store never fails");
    ApiClient::new(&ClientConfig::new(server.uri()), session).expect("valid client config")
}

pub fn cached_client(server: &MockServer) -> (CachedClient, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::default());
    let api = api_client(server, Some(TokenPair::new("access", "refresh")));
    (CachedClient::with_clock(api, clock.clone()), clock)
}
