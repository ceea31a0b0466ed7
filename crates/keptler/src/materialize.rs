//! Materializer - resolve every declared secret and persist the result
//!
//! For each secret, in template order:
//! 1. a value already in the destination file wins, and is copied into state
//! 2. otherwise a value in the encrypted state is restored to the destination
//! 3. otherwise the secret's rule generates a fresh value for both
//!
//! Nothing is written until every secret has resolved, so a generation error
//! leaves both files untouched. Each file is rewritten only when its resolved
//! view differs from what was on disk, so a destination that already holds
//! every value is never rewritten and repeat runs are write-free.
//!
//! When a name is declared more than once, the last declaration is the one
//! used.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::Path;
use tracing::{debug, info};

use crate::config::Config;
use crate::envfile;
use crate::error::{Error, Result};
use crate::rules::RuleRegistry;
use crate::state::StateStore;
use crate::template::{SecretSpec, Template};

/// Resolved name -> value mapping
pub type MaterializedValues = BTreeMap<String, String>;

/// Where a secret's value came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Destination,
    State,
    Generated,
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Source::Destination => write!(f, "destination"),
            Source::State => write!(f, "state"),
            Source::Generated => write!(f, "generated"),
        }
    }
}

/// Resolves templates against a destination file and encrypted state
pub struct Materializer {
    config: Config,
    rules: RuleRegistry,
}

impl Materializer {
    /// Materializer with the built-in rules
    pub fn new(config: Config) -> Self {
        Self::with_rules(config, RuleRegistry::default())
    }

    pub fn with_rules(config: Config, rules: RuleRegistry) -> Self {
        Self { config, rules }
    }

    /// Resolve every secret in `template`. The destination file and the
    /// state file at `state_path` are each rewritten only if their contents
    /// changed.
    pub fn materialize(
        &self,
        template: &Template,
        destination: &Path,
        state_path: &Path,
    ) -> Result<MaterializedValues> {
        let store = StateStore::new(state_path, self.config.passphrase.clone());

        let on_disk = envfile::read(destination)?;
        let stored = store.load();

        let mut out_values = on_disk.clone();
        let mut state = stored.clone();

        for spec in last_declarations(template) {
            let source = self.resolve(spec, &mut out_values, &mut state.values)?;
            debug!("{} <- {}", spec.name, source);
        }

        if out_values == on_disk && state == stored {
            debug!("Nothing changed, skipping writes");
            return Ok(out_values);
        }

        // Destination first, then state. A failed state write leaves the
        // destination already updated.
        if out_values != on_disk {
            envfile::write(destination, &out_values)?;
            info!(
                "Wrote {} value(s) to {}",
                out_values.len(),
                destination.display()
            );
        }
        if state != stored {
            store.save(&state)?;
            info!(
                "Wrote {} value(s) to {}",
                state.values.len(),
                state_path.display()
            );
        }

        Ok(out_values)
    }

    fn resolve(
        &self,
        spec: &SecretSpec,
        out_values: &mut MaterializedValues,
        state_values: &mut BTreeMap<String, String>,
    ) -> Result<Source> {
        if let Some(value) = out_values.get(&spec.name) {
            state_values.insert(spec.name.clone(), value.clone());
            return Ok(Source::Destination);
        }

        if let Some(value) = state_values.get(&spec.name) {
            out_values.insert(spec.name.clone(), value.clone());
            return Ok(Source::State);
        }

        let value = self
            .rules
            .generate(&spec.rule, &spec.params, &self.config.rules)
            .map_err(|source| Error::Generate {
                name: spec.name.clone(),
                source,
            })?;
        state_values.insert(spec.name.clone(), value.clone());
        out_values.insert(spec.name.clone(), value);
        Ok(Source::Generated)
    }
}

/// One spec per name, the last one declared, in template order
fn last_declarations(template: &Template) -> Vec<&SecretSpec> {
    let last: HashMap<&str, usize> = template
        .secrets
        .iter()
        .enumerate()
        .map(|(idx, spec)| (spec.name.as_str(), idx))
        .collect();

    template
        .secrets
        .iter()
        .enumerate()
        .filter(|(idx, spec)| last.get(spec.name.as_str()) == Some(idx))
        .map(|(_, spec)| spec)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GenerateError;
    use crate::state::StateRecord;
    use std::fs::{self, Permissions};
    use std::os::unix::fs::PermissionsExt;
    use std::path::PathBuf;
    use tempfile::TempDir;

    const PASSPHRASE: &str = "test-passphrase";

    struct Fixture {
        _tmp: TempDir,
        out: PathBuf,
        state: PathBuf,
    }

    fn fixture() -> Fixture {
        let tmp = TempDir::new().unwrap();
        let out = tmp.path().join("secret.env");
        let state = tmp.path().join(".keptler.state.age");
        Fixture {
            _tmp: tmp,
            out,
            state,
        }
    }

    fn materializer() -> Materializer {
        Materializer::new(Config::new(PASSPHRASE))
    }

    fn store(path: &Path) -> StateStore {
        StateStore::new(path, Config::new(PASSPHRASE).passphrase)
    }

    fn template(text: &str) -> Template {
        Template::parse(text).unwrap()
    }

    #[test]
    fn test_generates_random() {
        let fx = fixture();
        let tmpl = template("A= # keptler: random length=8 charset=alnum\n");

        let values = materializer().materialize(&tmpl, &fx.out, &fx.state).unwrap();

        let a = &values["A"];
        assert_eq!(a.len(), 8);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_eq!(envfile::read(&fx.out).unwrap(), values);
        assert_eq!(store(&fx.state).load().values, values);
    }

    #[test]
    fn test_distinct_names_get_distinct_values() {
        let fx = fixture();
        let tmpl = template("A= # keptler: random length=8\nB= # keptler: random length=8\n");

        let values = materializer().materialize(&tmpl, &fx.out, &fx.state).unwrap();
        assert_ne!(values["A"], values["B"]);
    }

    #[test]
    fn test_idempotent() {
        let fx = fixture();
        let tmpl = template("A= # keptler: random\nB= # keptler: random charset=hex\n");
        let m = materializer();

        let first = m.materialize(&tmpl, &fx.out, &fx.state).unwrap();
        let out_bytes = fs::read(&fx.out).unwrap();
        let state_bytes = fs::read(&fx.state).unwrap();

        let second = m.materialize(&tmpl, &fx.out, &fx.state).unwrap();
        assert_eq!(first, second);

        // age output is randomized, so identical bytes mean no rewrite
        assert_eq!(fs::read(&fx.out).unwrap(), out_bytes);
        assert_eq!(fs::read(&fx.state).unwrap(), state_bytes);
    }

    #[test]
    fn test_destination_wins_over_state() {
        let fx = fixture();
        fs::write(&fx.out, "KEY=X\n").unwrap();
        let mut stored = StateRecord::default();
        stored.values.insert("KEY".to_string(), "Y".to_string());
        store(&fx.state).save(&stored).unwrap();

        let tmpl = template("KEY= # keptler: random\n");
        let values = materializer().materialize(&tmpl, &fx.out, &fx.state).unwrap();

        assert_eq!(values["KEY"], "X");
        assert_eq!(store(&fx.state).load().values["KEY"], "X");
        assert_eq!(fs::read_to_string(&fx.out).unwrap(), "KEY=X\n");
    }

    #[test]
    fn test_complete_destination_is_not_rewritten() {
        let fx = fixture();
        let original = "# my notes\nKEY=X\nOTHER= spaced \n";
        fs::write(&fx.out, original).unwrap();

        let tmpl = template("KEY= # keptler: random\n");
        let values = materializer().materialize(&tmpl, &fx.out, &fx.state).unwrap();

        assert_eq!(values["KEY"], "X");
        assert_eq!(fs::read_to_string(&fx.out).unwrap(), original);
        assert_eq!(store(&fx.state).load().values["KEY"], "X");
    }

    #[test]
    fn test_state_write_failure_after_destination_write() {
        let fx = fixture();
        let state_path = fx.out.with_file_name("missing").join("state.age");
        let tmpl = template("KEY= # keptler: random length=10\n");

        let err = materializer()
            .materialize(&tmpl, &fx.out, &state_path)
            .unwrap_err();

        assert!(matches!(err, Error::StateWrite { .. }));
        let written = envfile::read(&fx.out).unwrap();
        assert_eq!(written["KEY"].len(), 10);
        assert!(!state_path.exists());
    }

    #[test]
    fn test_restores_from_state() {
        let fx = fixture();
        let tmpl = template("KEY= # keptler: random\n");
        let m = materializer();

        let first = m.materialize(&tmpl, &fx.out, &fx.state).unwrap();
        fs::remove_file(&fx.out).unwrap();

        let second = m.materialize(&tmpl, &fx.out, &fx.state).unwrap();
        assert_eq!(second["KEY"], first["KEY"]);
        assert_eq!(envfile::read(&fx.out).unwrap()["KEY"], first["KEY"]);
    }

    #[test]
    fn test_unsupported_rule_writes_nothing() {
        let fx = fixture();
        let tmpl = template("GOOD= # keptler: random\nBAD= # keptler: bogus\n");

        let err = materializer()
            .materialize(&tmpl, &fx.out, &fx.state)
            .unwrap_err();

        assert_eq!(err.secret_name(), Some("BAD"));
        assert!(matches!(
            err,
            Error::Generate {
                source: GenerateError::UnsupportedRule(_),
                ..
            }
        ));
        assert!(err.to_string().contains("BAD"));
        assert!(!fx.out.exists());
        assert!(!fx.state.exists());
    }

    #[test]
    fn test_open_state_permissions_regenerate() {
        let fx = fixture();
        let mut stored = StateRecord::default();
        stored.values.insert("KEY".to_string(), "old".to_string());
        store(&fx.state).save(&stored).unwrap();
        fs::set_permissions(&fx.state, Permissions::from_mode(0o644)).unwrap();

        let tmpl = template("KEY= # keptler: random length=12\n");
        let values = materializer().materialize(&tmpl, &fx.out, &fx.state).unwrap();

        assert_ne!(values["KEY"], "old");
        assert_eq!(values["KEY"].len(), 12);
        let mode = fs::metadata(&fx.state).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_last_declaration_wins() {
        let fx = fixture();
        let tmpl = template(
            "KEY= # keptler: random length=8\nKEY= # keptler: random length=16 charset=hex\n",
        );

        let values = materializer().materialize(&tmpl, &fx.out, &fx.state).unwrap();

        assert_eq!(values["KEY"].len(), 16);
        assert!(values["KEY"].chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_empty_template_touches_nothing() {
        let fx = fixture();

        let values = materializer()
            .materialize(&Template::default(), &fx.out, &fx.state)
            .unwrap();

        assert!(values.is_empty());
        assert!(!fx.out.exists());
        assert!(!fx.state.exists());
    }

    #[test]
    fn test_unrelated_destination_keys_kept() {
        let fx = fixture();
        fs::write(&fx.out, "PLAIN=value\n").unwrap();

        let tmpl = template("TOKEN= # keptler: derive source=PLAIN\n");
        let values = materializer().materialize(&tmpl, &fx.out, &fx.state).unwrap();

        assert_eq!(values["PLAIN"], "value");
        assert_eq!(values["TOKEN"], "${PLAIN}");
        assert_eq!(
            fs::read_to_string(&fx.out).unwrap(),
            "PLAIN=value\nTOKEN=${PLAIN}\n"
        );
    }

    #[test]
    fn test_wrong_passphrase_regenerates() {
        let fx = fixture();
        let tmpl = template("KEY= # keptler: random\n");

        let first = materializer().materialize(&tmpl, &fx.out, &fx.state).unwrap();
        fs::remove_file(&fx.out).unwrap();

        let other = Materializer::new(Config::new("different"));
        let second = other.materialize(&tmpl, &fx.out, &fx.state).unwrap();
        assert_ne!(second["KEY"], first["KEY"]);
    }

    #[test]
    fn test_last_declarations_order() {
        let tmpl = template(
            "A= # keptler: random\nB= # keptler: random\nA= # keptler: derive source=B\n",
        );

        let specs = last_declarations(&tmpl);
        let names: Vec<_> = specs.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["B", "A"]);
        assert_eq!(specs[1].rule, "derive");
    }
}
