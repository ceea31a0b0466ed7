//! Destination file - plain `KEY=VALUE` lines
//!
//! No quoting and no escaping. A value containing a newline or `=` is written
//! as-is and will not read back intact.

use std::collections::BTreeMap;
use std::fs::{self, OpenOptions, Permissions};
use std::io::{self, BufWriter, Write};
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::path::Path;

use crate::error::{Error, Result};

/// Read a destination file. A missing file reads as empty.
pub fn read(path: &Path) -> Result<BTreeMap<String, String>> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
        Err(source) => {
            return Err(Error::DestinationIo {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    Ok(parse(&content))
}

/// Parse `KEY=VALUE` lines, ignoring lines without `=`
pub fn parse(content: &str) -> BTreeMap<String, String> {
    content
        .lines()
        .filter_map(|line| line.split_once('='))
        .map(|(key, value)| (key.trim().to_string(), value.trim().to_string()))
        .collect()
}

/// Write values sorted by key, owner read/write only
pub fn write(path: &Path, values: &BTreeMap<String, String>) -> Result<()> {
    write_inner(path, values).map_err(|source| Error::DestinationIo {
        path: path.to_path_buf(),
        source,
    })
}

fn write_inner(path: &Path, values: &BTreeMap<String, String>) -> io::Result<()> {
    let file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)?;
    // mode() only applies on create
    file.set_permissions(Permissions::from_mode(0o600))?;

    let mut writer = BufWriter::new(file);
    for (key, value) in values {
        writeln!(writer, "{}={}", key, value)?;
    }
    writer.flush()
}
