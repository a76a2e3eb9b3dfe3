//! Stable file identifiers and content checksums.

use std::fs::{self, File};
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};

use uuid::Uuid;

use crate::config::ImportOptions;
use crate::domain::DataSource;
use crate::error::ImportError;

const FILE_ID_NAMESPACE: Uuid = Uuid::from_u128(0x6b1f_4c3e_9d2a_4f7b_8e51_2c0a_7d93_e4f6);
const SEPARATOR: char = '\u{1f}';

/// Name-based UUID of the (path, data set, model) triple. The same triple
/// always yields the same id, in any process.
pub fn compute_file_id(path: &str, data_set: &str, model: &str) -> String {
    let name = format!("{path}{SEPARATOR}{data_set}{SEPARATOR}{model}");
    Uuid::new_v5(&FILE_ID_NAMESPACE, name.as_bytes()).to_string()
}

/// Lowercase hex MD5 digest of the whole file, read in chunks.
pub fn compute_checksum(path: &Path) -> Result<String, ImportError> {
    let file = File::open(path).map_err(|err| ImportError::invalid_source(path, err))?;
    let mut reader = BufReader::new(file);
    let mut context = md5::Context::new();
    io::copy(&mut reader, &mut context).map_err(|err| ImportError::invalid_source(path, err))?;
    Ok(format!("{:x}", context.finalize()))
}

pub fn checksum_bytes(bytes: &[u8]) -> String {
    format!("{:x}", md5::compute(bytes))
}

/// Absolute, symlink-free form of `path` used as identity input. Falls back
/// to joining with the working directory when the file cannot be resolved.
pub fn canonical_path(path: &Path) -> Result<PathBuf, ImportError> {
    if let Ok(canonical) = fs::canonicalize(path) {
        return Ok(canonical);
    }
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    let cwd = std::env::current_dir().map_err(|err| ImportError::Filesystem(err.to_string()))?;
    Ok(cwd.join(path))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    AlreadyImported,
    Unchanged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportDecision {
    Create,
    Skip(SkipReason),
    Replace,
}

/// What to do with a file given the data source already stored under its id.
pub fn decide(
    existing: Option<&DataSource>,
    checksum: &str,
    options: &ImportOptions,
) -> ImportDecision {
    let Some(existing) = existing else {
        return ImportDecision::Create;
    };
    if options.force_overwrite {
        return ImportDecision::Replace;
    }
    if !options.overwrite {
        return ImportDecision::Skip(SkipReason::AlreadyImported);
    }
    if existing.checksum == checksum {
        return ImportDecision::Skip(SkipReason::Unchanged);
    }
    ImportDecision::Replace
}
