use markbench_common::protocol::error::{MarkbenchError, Result};
use std::time::Duration;

/// Registry document published by the babelmark project.
pub const DEFAULT_REGISTRY_URL: &str =
    "https://raw.githubusercontent.com/babelmark/babelmark-registry/master/registry.json";

/// Environment variable holding the registry passphrase.
pub const DEFAULT_PASSPHRASE_ENV: &str = "MARKBENCH_PASSPHRASE";

/// Where the registry passphrase comes from.
///
/// The passphrase is resolved on every refresh attempt and never cached, so
/// an operator can fix a missing variable without a restart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PassphraseSource {
    /// Read from the named environment variable
    Env(String),
    /// A fixed value
    Fixed(String),
}

impl PassphraseSource {
    /// Resolves the passphrase.
    ///
    /// # Returns
    ///
    /// - `Ok(passphrase)` - the passphrase with surrounding whitespace removed
    /// - `Err(MarkbenchError::Configuration)` - the passphrase is unset or blank
    pub fn resolve(&self) -> Result<String> {
        let (value, origin) = match self {
            PassphraseSource::Env(var) => {
                (std::env::var(var).ok(), format!("environment variable {}", var))
            }
            PassphraseSource::Fixed(value) => (Some(value.clone()), "fixed passphrase".to_string()),
        };

        match value {
            Some(value) if !value.trim().is_empty() => Ok(value.trim().to_string()),
            _ => Err(MarkbenchError::Configuration(format!(
                "Registry passphrase is missing ({} is not set or empty)",
                origin
            ))),
        }
    }
}

impl Default for PassphraseSource {
    fn default() -> Self {
        PassphraseSource::Env(DEFAULT_PASSPHRASE_ENV.to_string())
    }
}

/// Registry cache configuration.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Age after which a snapshot is refreshed (default: 1 hour)
    pub refresh_interval: Duration,
    /// Passphrase used to decrypt obfuscated URLs
    pub passphrase: PassphraseSource,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            refresh_interval: Duration::from_secs(3600),
            passphrase: PassphraseSource::default(),
        }
    }
}

/// Aggregation configuration.
#[derive(Debug, Clone)]
pub struct AggregatorConfig {
    /// Input text is truncated to this many characters (default: 1000)
    pub max_text_length: usize,
    /// Time allowed to each backend, sanitization included (default: 30s)
    pub backend_timeout: Duration,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            max_text_length: 1000,
            backend_timeout: Duration::from_secs(30),
        }
    }
}
