use anyhow::{Context, Result};
use keyring::Entry;

use super::session::{TokenPair, TokenStore};

const SERVICE_NAME: &str = "edudesk";

const ACCESS_TOKEN_ENTRY: &str = "access_token";
const REFRESH_TOKEN_ENTRY: &str = "refresh_token";

/// Stores the token pair in the OS keychain under fixed entry names.
pub struct KeyringTokenStore {
    service: String,
}

impl KeyringTokenStore {
    pub fn new() -> Self {
        Self {
            service: SERVICE_NAME.to_string(),
        }
    }

    /// Use a different keychain service, e.g. one per tenant.
    pub fn with_service(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    fn entry(&self, name: &str) -> Result<Entry> {
        Entry::new(&self.service, name).context("Failed to create keyring entry")
    }

    fn read(&self, name: &str) -> Result<Option<String>> {
        match self.entry(name)?.get_password() {
            Ok(value) => Ok(Some(value)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(e).context("Failed to retrieve token from keychain"),
        }
    }

    fn delete(&self, name: &str) -> Result<()> {
        match self.entry(name)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(e).context("Failed to delete token from keychain"),
        }
    }
}

impl Default for KeyringTokenStore {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenStore for KeyringTokenStore {
    fn load(&self) -> Result<Option<TokenPair>> {
        let Some(access_token) = self.read(ACCESS_TOKEN_ENTRY)? else {
            return Ok(None);
        };
        let refresh_token = self.read(REFRESH_TOKEN_ENTRY)?;
        Ok(Some(TokenPair {
            access_token,
            refresh_token,
        }))
    }

    fn save(&self, tokens: &TokenPair) -> Result<()> {
        self.entry(ACCESS_TOKEN_ENTRY)?
            .set_password(&tokens.access_token)
            .context("Failed to store access token in keychain")?;
        match tokens.refresh_token {
            Some(ref refresh) => self
                .entry(REFRESH_TOKEN_ENTRY)?
                .set_password(refresh)
                .context("Failed to store refresh token in keychain")?,
            None => self.delete(REFRESH_TOKEN_ENTRY)?,
        }
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        self.delete(ACCESS_TOKEN_ENTRY)?;
        self.delete(REFRESH_TOKEN_ENTRY)
    }
}
