//! Materializer configuration
//!
//! Everything the materializer needs from the outside world is carried in
//! [`Config`]. Nothing in the library reads the process environment except
//! [`Config::from_env`], which the CLI calls once at startup.

use age::secrecy::SecretString;
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::error::{Error, Result};

/// Environment variable holding the state passphrase
pub const PASSPHRASE_ENV: &str = "KEPTLER_STATE_PASSPHRASE";

/// Passphrase older keptler releases fell back to. Only used when explicitly
/// allowed, so existing state files can still be opened.
pub const LEGACY_DEFAULT_PASSPHRASE: &str = "localdev";

/// File name of the state file, placed next to the destination
pub const STATE_FILE_NAME: &str = ".keptler.state.age";

/// Defaults applied when a template annotation omits a parameter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleDefaults {
    /// `random`: output length in characters
    pub random_length: usize,
    /// `random`: alphabet or encoding
    pub random_charset: String,
    /// `rsa-private-key`: modulus size
    pub rsa_bits: usize,
    /// `rsa-private-key`: PEM encoding, `pkcs1` or `pkcs8`
    pub rsa_format: String,
}

impl Default for RuleDefaults {
    fn default() -> Self {
        Self {
            random_length: 32,
            random_charset: "alnum".to_string(),
            rsa_bits: 2048,
            rsa_format: "pkcs1".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Passphrase protecting the state file
    pub passphrase: SecretString,
    pub rules: RuleDefaults,
}

impl Config {
    pub fn new(passphrase: impl Into<String>) -> Self {
        Self {
            passphrase: SecretString::new(passphrase.into()),
            rules: RuleDefaults::default(),
        }
    }

    pub fn with_rules(mut self, rules: RuleDefaults) -> Self {
        self.rules = rules;
        self
    }

    /// Build a config from an optional passphrase override.
    ///
    /// A non-empty `override_value` wins. Without one, the legacy default is
    /// used only if `allow_insecure_default` is set.
    pub fn resolve(override_value: Option<String>, allow_insecure_default: bool) -> Result<Self> {
        match override_value {
            Some(p) if !p.is_empty() => Ok(Self::new(p)),
            _ if allow_insecure_default => {
                warn!(
                    "{} not set, using the insecure legacy default passphrase",
                    PASSPHRASE_ENV
                );
                Ok(Self::new(LEGACY_DEFAULT_PASSPHRASE))
            }
            _ => Err(Error::MissingPassphrase),
        }
    }

    /// Resolve the passphrase from [`PASSPHRASE_ENV`]
    pub fn from_env(allow_insecure_default: bool) -> Result<Self> {
        Self::resolve(std::env::var(PASSPHRASE_ENV).ok(), allow_insecure_default)
    }
}

/// Conventional state file location for a destination file
pub fn state_path_for(destination: &Path) -> PathBuf {
    let dir = destination
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    dir.join(STATE_FILE_NAME)
}
