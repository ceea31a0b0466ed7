//! keptler - Secrets materialized from an annotated template
//!
//! A template such as `env.example` declares which keys are secrets and how
//! to generate them:
//!
//! ```text
//! # keptler: random length=40 charset=urlsafe
//! SESSION_KEY=
//! DB_PASSWORD= # keptler: random charset=alnum
//! ```
//!
//! The materializer resolves every declared key to a value and writes the
//! result to a plain `KEY=VALUE` file. Values already present in that file
//! win; values missing there are restored from an age-encrypted state file;
//! only keys found in neither place are generated. Re-running against the
//! same files changes nothing.

pub mod config;
pub mod envfile;
pub mod error;
pub mod materialize;
pub mod rules;
pub mod state;
pub mod template;

pub use config::{Config, RuleDefaults};
pub use error::{Error, GenerateError, Result};
pub use materialize::{MaterializedValues, Materializer};
pub use rules::RuleRegistry;
pub use state::{StateRecord, StateStore};
pub use template::{SecretSpec, Template};
