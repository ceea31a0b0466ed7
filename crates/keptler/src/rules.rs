//! Rule registry - value generators selected by rule name
//!
//! Built-in rules:
//! - `random`: `length` characters from `charset` (`alnum`, `hex`, `base64`, `urlsafe`)
//! - `rsa-private-key`: PEM private key, `bits` modulus, `format` `pkcs1` or `pkcs8`
//! - `derive`: `${source}` reference to another secret (not resolved)

use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine as _;
use rand::distributions::Alphanumeric;
use rand::rngs::{OsRng, StdRng};
use rand::{Rng, RngCore, SeedableRng};
use rsa::pkcs1::EncodeRsaPrivateKey;
use rsa::pkcs8::{EncodePrivateKey, LineEnding};
use rsa::RsaPrivateKey;
use std::collections::BTreeMap;

use crate::config::RuleDefaults;
use crate::error::GenerateError;
use crate::template::Params;

/// A value generator for one rule
pub trait Generator: Send + Sync {
    fn generate(&self, params: &Params, defaults: &RuleDefaults) -> Result<String, GenerateError>;
}

/// Maps rule names to generators
pub struct RuleRegistry {
    rules: BTreeMap<String, Box<dyn Generator>>,
}

impl Default for RuleRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register("random", RandomRule);
        registry.register("rsa-private-key", RsaPrivateKeyRule);
        registry.register("derive", DeriveRule);
        registry
    }
}

impl RuleRegistry {
    /// A registry with no rules at all
    pub fn empty() -> Self {
        Self {
            rules: BTreeMap::new(),
        }
    }

    /// Add or replace a rule
    pub fn register(&mut self, name: &str, generator: impl Generator + 'static) {
        self.rules.insert(name.to_string(), Box::new(generator));
    }

    /// Registered rule names, sorted
    pub fn rule_names(&self) -> impl Iterator<Item = &str> {
        self.rules.keys().map(String::as_str)
    }

    /// Generate a value with the named rule
    pub fn generate(
        &self,
        rule: &str,
        params: &Params,
        defaults: &RuleDefaults,
    ) -> Result<String, GenerateError> {
        let generator = self
            .rules
            .get(rule)
            .ok_or_else(|| GenerateError::UnsupportedRule(rule.to_string()))?;
        generator.generate(params, defaults)
    }
}

/// `random` rule
pub struct RandomRule;

impl Generator for RandomRule {
    fn generate(&self, params: &Params, defaults: &RuleDefaults) -> Result<String, GenerateError> {
        let length = numeric_param(params, "length").unwrap_or(defaults.random_length);
        let charset = text_param(params, "charset").unwrap_or(&defaults.random_charset);
        random_string(length, charset)
    }
}

/// `rsa-private-key` rule
pub struct RsaPrivateKeyRule;

impl Generator for RsaPrivateKeyRule {
    fn generate(&self, params: &Params, defaults: &RuleDefaults) -> Result<String, GenerateError> {
        let bits = numeric_param(params, "bits").unwrap_or(defaults.rsa_bits);
        let format = text_param(params, "format").unwrap_or(&defaults.rsa_format);
        rsa_private_key_pem(bits, format)
    }
}

/// `derive` rule
pub struct DeriveRule;

impl Generator for DeriveRule {
    fn generate(&self, params: &Params, _defaults: &RuleDefaults) -> Result<String, GenerateError> {
        let source = text_param(params, "source").ok_or_else(|| GenerateError::MissingParam {
            rule: "derive".to_string(),
            param: "source".to_string(),
        })?;
        Ok(format!("${{{}}}", source))
    }
}

/// Produce exactly `length` characters from the named charset
pub fn random_string(length: usize, charset: &str) -> Result<String, GenerateError> {
    match charset {
        "alnum" => {
            let rng = secure_rng()?;
            Ok(rng
                .sample_iter(&Alphanumeric)
                .take(length)
                .map(char::from)
                .collect())
        }
        "hex" => Ok(truncate(hex::encode(random_bytes(length)?), length)),
        "base64" => Ok(truncate(STANDARD.encode(random_bytes(length)?), length)),
        "urlsafe" => Ok(truncate(URL_SAFE_NO_PAD.encode(random_bytes(length)?), length)),
        other => Err(GenerateError::UnknownCharset(other.to_string())),
    }
}

/// Generate an RSA private key and PEM-encode it
pub fn rsa_private_key_pem(bits: usize, format: &str) -> Result<String, GenerateError> {
    if format != "pkcs1" && format != "pkcs8" {
        return Err(GenerateError::UnknownKeyFormat(format.to_string()));
    }

    let mut rng = secure_rng()?;
    let key = RsaPrivateKey::new(&mut rng, bits)
        .map_err(|e| GenerateError::Failure(format!("rsa key generation: {}", e)))?;

    let pem = if format == "pkcs8" {
        key.to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| GenerateError::Failure(e.to_string()))?
    } else {
        key.to_pkcs1_pem(LineEnding::LF)
            .map_err(|e| GenerateError::Failure(e.to_string()))?
    };

    Ok(pem.as_str().to_string())
}

/// CSPRNG seeded from the operating system
fn secure_rng() -> Result<StdRng, GenerateError> {
    StdRng::from_rng(OsRng).map_err(|e| GenerateError::Failure(e.to_string()))
}

fn random_bytes(len: usize) -> Result<Vec<u8>, GenerateError> {
    let mut buf = vec![0u8; len];
    OsRng
        .try_fill_bytes(&mut buf)
        .map_err(|e| GenerateError::Failure(e.to_string()))?;
    Ok(buf)
}

// Encoded output is always ASCII and at least as long as the input bytes
fn truncate(mut encoded: String, length: usize) -> String {
    encoded.truncate(length);
    encoded
}

fn text_param<'a>(params: &'a Params, key: &str) -> Option<&'a String> {
    params.get(key).filter(|v| !v.is_empty())
}

/// Unparseable numbers fall back to the default, like an absent param
fn numeric_param(params: &Params, key: &str) -> Option<usize> {
    params.get(key).and_then(|v| v.parse().ok())
}
