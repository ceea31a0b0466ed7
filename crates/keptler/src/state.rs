//! Encrypted state store
//!
//! Previously materialized values live in a single age file encrypted to a
//! passphrase (scrypt) and ASCII-armored. The plaintext is pretty-printed
//! JSON: `{"values": {"NAME": "value", ...}}`.
//!
//! Reading never fails. A missing, unreadable, undecryptable or malformed
//! state file, or one that group/other can access, reads as empty state and
//! the run carries on. Writing always fails loudly.

use age::armor::{ArmoredReader, ArmoredWriter, Format};
use age::secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions, Permissions};
use std::io::{self, BufReader, Read, Write};
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Persisted form of the materialized values
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateRecord {
    #[serde(default)]
    pub values: BTreeMap<String, String>,
}

/// Why a state file was ignored
#[derive(Error, Debug)]
enum LoadError {
    #[error("state file does not exist")]
    Missing,

    #[error("state file is accessible to group/other (mode {0:o})")]
    Permissions(u32),

    #[error("failed to read state file: {0}")]
    Io(#[from] io::Error),

    #[error("failed to decrypt state file: {0}")]
    Decrypt(String),

    #[error("failed to parse state file: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Passphrase-encrypted state file
pub struct StateStore {
    path: PathBuf,
    passphrase: SecretString,
}

impl StateStore {
    pub fn new(path: &Path, passphrase: SecretString) -> Self {
        Self {
            path: path.to_path_buf(),
            passphrase,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load state, falling back to empty state on any problem
    pub fn load(&self) -> StateRecord {
        match self.try_load() {
            Ok(record) => {
                debug!(
                    "Loaded {} value(s) from {}",
                    record.values.len(),
                    self.path.display()
                );
                record
            }
            Err(LoadError::Missing) => {
                debug!("No state at {}", self.path.display());
                StateRecord::default()
            }
            Err(e) => {
                warn!("Ignoring state {}: {}", self.path.display(), e);
                StateRecord::default()
            }
        }
    }

    fn try_load(&self) -> std::result::Result<StateRecord, LoadError> {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(LoadError::Missing),
            Err(e) => return Err(e.into()),
        };

        let mode = file.metadata()?.permissions().mode();
        if mode & 0o077 != 0 {
            return Err(LoadError::Permissions(mode & 0o777));
        }

        let decryptor = match age::Decryptor::new(ArmoredReader::new(BufReader::new(file)))
            .map_err(|e| LoadError::Decrypt(e.to_string()))?
        {
            age::Decryptor::Passphrase(d) => d,
            _ => {
                return Err(LoadError::Decrypt(
                    "expected passphrase encryption".to_string(),
                ))
            }
        };

        let mut reader = decryptor
            .decrypt(&self.passphrase, None)
            .map_err(|e| LoadError::Decrypt(e.to_string()))?;

        let mut plaintext = vec![];
        reader.read_to_end(&mut plaintext)?;

        Ok(serde_json::from_slice(&plaintext)?)
    }

    /// Encrypt and write the whole record, replacing the file
    pub fn save(&self, record: &StateRecord) -> Result<()> {
        let json = serde_json::to_vec_pretty(record)?;
        self.write_encrypted(&json)
            .map_err(|source| Error::StateWrite {
                path: self.path.clone(),
                source,
            })?;

        debug!(
            "Saved {} value(s) to {}",
            record.values.len(),
            self.path.display()
        );
        Ok(())
    }

    fn write_encrypted(&self, plaintext: &[u8]) -> io::Result<()> {
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(&self.path)?;
        file.set_permissions(Permissions::from_mode(0o600))?;

        let encryptor = age::Encryptor::with_user_passphrase(self.passphrase.clone());
        let armored = ArmoredWriter::wrap_output(file, Format::AsciiArmor)?;
        let mut writer = encryptor
            .wrap_output(armored)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;

        writer.write_all(plaintext)?;
        let armored = writer.finish()?;
        let mut file = armored.finish()?;
        file.flush()
    }
}
