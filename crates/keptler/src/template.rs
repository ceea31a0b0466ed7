//! Template parsing - extract keptler annotations from an env template
//!
//! An annotation is either on its own line just before an assignment, or
//! inline after it:
//!
//! ```text
//! # keptler: rsa-private-key bits=4096
//! SIGNING_KEY=
//! API_TOKEN= # keptler: random length=48 charset=urlsafe
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::error::{Error, Result};

const MARKER: &str = "# keptler:";

/// Rule parameters, always including `rule` itself
pub type Params = BTreeMap<String, String>;

/// One declared secret
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretSpec {
    pub name: String,
    pub rule: String,
    pub params: Params,
}

impl SecretSpec {
    pub fn new(name: &str, params: Params) -> Self {
        let rule = params.get("rule").cloned().unwrap_or_default();
        Self {
            name: name.to_string(),
            rule,
            params,
        }
    }
}

/// Declared secrets in file order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Template {
    pub secrets: Vec<SecretSpec>,
}

impl Template {
    pub fn is_empty(&self) -> bool {
        self.secrets.is_empty()
    }

    /// Read and parse a template file
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|source| Error::TemplateIo {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content)
    }

    /// Parse template text
    pub fn parse(content: &str) -> Result<Self> {
        let mut secrets = Vec::new();
        let mut pending: Option<Params> = None;

        for (idx, line) in content.lines().enumerate() {
            let line_no = idx + 1;
            let trimmed = line.trim();

            if let Some(annotation) = trimmed.strip_prefix(MARKER) {
                pending = Some(parse_annotation(annotation, line_no)?);
                continue;
            }
            if trimmed.starts_with('#') {
                continue;
            }

            let Some((key, rest)) = line.split_once('=') else {
                continue;
            };
            let name = key.trim();

            let mut annotation = pending.take();
            if let Some(pos) = rest.find(MARKER) {
                annotation = Some(parse_annotation(&rest[pos + MARKER.len()..], line_no)?);
            }

            if let Some(params) = annotation {
                if !name.is_empty() {
                    secrets.push(SecretSpec::new(name, params));
                }
            }
        }

        Ok(Self { secrets })
    }
}

/// Parse `<rule> [key=value ...]`
fn parse_annotation(text: &str, line: usize) -> Result<Params> {
    let mut parts = text.split_whitespace();
    let rule = parts.next().ok_or(Error::EmptyAnnotation { line })?;

    let mut params = Params::new();
    params.insert("rule".to_string(), rule.to_string());

    for part in parts {
        let (key, value) = part
            .split_once('=')
            .ok_or_else(|| Error::InvalidAnnotationParam {
                line,
                param: part.to_string(),
            })?;
        params.insert(key.to_string(), value.to_string());
    }

    Ok(params)
}
