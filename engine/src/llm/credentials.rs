//! Provider credentials
//!
//! Keys are looked up by provider at call time. A missing key is not an
//! error: the router skips that provider and records it as skipped.

use super::ProviderKey;
use std::collections::HashMap;
use std::fmt;
use zeroize::Zeroize;

/// A wrapper for sensitive string data that prevents accidental logging.
///
/// It implements `Debug` and `Display` to always print `[REDACTED]`.
/// To access the actual secret value, use the `unsecure()` method. The
/// backing memory is zeroed on drop.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretString(String);

impl SecretString {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Access the raw underlying string
    pub fn unsecure(&self) -> &str {
        &self.0
    }
}

impl Drop for SecretString {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl fmt::Debug for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretString([REDACTED])")
    }
}

impl fmt::Display for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl From<String> for SecretString {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for SecretString {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Where provider API keys come from
pub trait CredentialSource: Send + Sync {
    fn credential(&self, provider: ProviderKey) -> Option<SecretString>;

    fn has_credential(&self, provider: ProviderKey) -> bool {
        self.credential(provider).is_some()
    }
}

/// Reads `<PROVIDER>_API_KEY` environment variables
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvCredentials;

impl CredentialSource for EnvCredentials {
    fn credential(&self, provider: ProviderKey) -> Option<SecretString> {
        std::env::var(provider.credential_env())
            .ok()
            .filter(|v| !v.trim().is_empty())
            .map(SecretString::from)
    }
}

/// Fixed set of keys, for tests and embedding
#[derive(Debug, Clone, Default)]
pub struct StaticCredentials {
    keys: HashMap<ProviderKey, SecretString>,
}

impl StaticCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, provider: ProviderKey, key: impl Into<String>) -> Self {
        self.keys.insert(provider, SecretString::new(key));
        self
    }
}

impl CredentialSource for StaticCredentials {
    fn credential(&self, provider: ProviderKey) -> Option<SecretString> {
        self.keys.get(&provider).cloned()
    }
}
