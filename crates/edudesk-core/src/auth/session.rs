use std::fmt;
use std::path::PathBuf;
use std::sync::{Mutex, PoisonError, RwLock};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Session file name in cache directory
const SESSION_FILE: &str = "session.json";

/// The bearer credential and the token used to renew it.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPair {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
}

impl TokenPair {
    pub fn new(access_token: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: Some(refresh_token.into()),
        }
    }
}

impl fmt::Debug for TokenPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenPair")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Durable storage for the current token pair.
pub trait TokenStore: Send + Sync {
    fn load(&self) -> Result<Option<TokenPair>>;
    fn save(&self, tokens: &TokenPair) -> Result<()>;
    fn clear(&self) -> Result<()>;
}

/// Stores the token pair as JSON in the cache directory.
pub struct FileTokenStore {
    cache_dir: PathBuf,
}

impl FileTokenStore {
    pub fn new(cache_dir: PathBuf) -> Self {
        Self { cache_dir }
    }

    fn session_path(&self) -> PathBuf {
        self.cache_dir.join(SESSION_FILE)
    }
}

impl TokenStore for FileTokenStore {
    fn load(&self) -> Result<Option<TokenPair>> {
        let path = self.session_path();
        if !path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(&path)
            .context("Failed to read session file")?;
        let tokens: TokenPair = serde_json::from_str(&contents)
            .context("Failed to parse session file")?;
        Ok(Some(tokens))
    }

    fn save(&self, tokens: &TokenPair) -> Result<()> {
        let path = self.session_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(tokens)?;
        std::fs::write(path, contents).context("Failed to write session file")?;
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        let path = self.session_path();
        if path.exists() {
            std::fs::remove_file(path).context("Failed to remove session file")?;
        }
        Ok(())
    }
}

/// Keeps tokens for the lifetime of the process only.
#[derive(Default)]
pub struct MemoryTokenStore {
    tokens: Mutex<Option<TokenPair>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tokens(tokens: TokenPair) -> Self {
        Self {
            tokens: Mutex::new(Some(tokens)),
        }
    }
}

impl TokenStore for MemoryTokenStore {
    fn load(&self) -> Result<Option<TokenPair>> {
        Ok(self.tokens.lock().unwrap_or_else(PoisonError::into_inner).clone())
    }

    fn save(&self, tokens: &TokenPair) -> Result<()> {
        *self.tokens.lock().unwrap_or_else(PoisonError::into_inner) = Some(tokens.clone());
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        *self.tokens.lock().unwrap_or_else(PoisonError::into_inner) = None;
        Ok(())
    }
}

/// The live credential pair, mirrored to a [`TokenStore`].
///
/// Reads are served from memory; every write goes through to the store.
pub struct Session {
    store: Box<dyn TokenStore>,
    data: RwLock<Option<TokenPair>>,
}

impl Session {
    /// Start with no credentials, persisting future logins to `store`.
    pub fn new(store: impl TokenStore + 'static) -> Self {
        Self {
            store: Box::new(store),
            data: RwLock::new(None),
        }
    }

    /// Start with no credentials on an already boxed store.
    pub fn from_boxed(store: Box<dyn TokenStore>) -> Self {
        Self {
            store,
            data: RwLock::new(None),
        }
    }

    /// Restore a previously persisted pair from `store`.
    pub fn load(store: impl TokenStore + 'static) -> Result<Self> {
        let data = store.load()?;
        Ok(Self {
            store: Box::new(store),
            data: RwLock::new(data),
        })
    }

    /// Restore from a boxed store, as returned by [`open_store`](super::open_store).
    pub fn load_boxed(store: Box<dyn TokenStore>) -> Result<Self> {
        let data = store.load()?;
        Ok(Self {
            store,
            data: RwLock::new(data),
        })
    }

    pub fn tokens(&self) -> Option<TokenPair> {
        self.data.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Get the bearer token if one is stored
    pub fn access_token(&self) -> Option<String> {
        self.data
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|d| d.access_token.clone())
    }

    pub fn refresh_token(&self) -> Option<String> {
        self.data
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .and_then(|d| d.refresh_token.clone())
    }

    pub fn is_authenticated(&self) -> bool {
        self.data.read().unwrap_or_else(PoisonError::into_inner).is_some()
    }

    /// Replace the pair in memory, then persist it.
    ///
    /// The in-memory pair is updated even if persisting fails.
    pub fn update(&self, tokens: TokenPair) -> Result<()> {
        *self.data.write().unwrap_or_else(PoisonError::into_inner) = Some(tokens.clone());
        self.store.save(&tokens)
    }

    /// Drop the pair from memory and from the store.
    pub fn clear(&self) -> Result<()> {
        *self.data.write().unwrap_or_else(PoisonError::into_inner) = None;
        self.store.clear()
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("authenticated", &self.is_authenticated())
            .finish()
    }
}
