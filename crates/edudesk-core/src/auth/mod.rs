//! Authentication module for managing the credential pair.
//!
//! This module provides:
//! - `Session`: the in-memory token pair, mirrored to a `TokenStore`
//! - `TokenStore` implementations: OS keychain, session file, memory
//! - `AuthState`: the process-wide logged-in / logged-out signal

pub mod credentials;
pub mod session;

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

pub use credentials::KeyringTokenStore;
pub use session::{FileTokenStore, MemoryTokenStore, Session, TokenPair, TokenStore};

/// Whether the client currently holds usable credentials.
///
/// A transition to `LoggedOut` after a failed refresh means the user has to
/// log in again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    LoggedIn,
    LoggedOut,
}

/// Where the token pair is persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenStorageKind {
    Keyring,
    #[default]
    File,
    Memory,
}

impl std::str::FromStr for TokenStorageKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "keyring" => Ok(Self::Keyring),
            "file" => Ok(Self::File),
            "memory" => Ok(Self::Memory),
            other => Err(format!("Unknown token storage '{}' (expected keyring, file or memory)", other)),
        }
    }
}

/// Open the token store for `kind`; `cache_dir` is used by the file store.
pub fn open_store(kind: TokenStorageKind, cache_dir: PathBuf) -> Box<dyn TokenStore> {
    match kind {
        TokenStorageKind::Keyring => Box::new(KeyringTokenStore::new()),
        TokenStorageKind::File => Box::new(FileTokenStore::new(cache_dir)),
        TokenStorageKind::Memory => Box::new(MemoryTokenStore::new()),
    }
}
