use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

use crate::app::ImportSummary;
use crate::model::FieldKind;

/// Coarse classification used to decide between skipping and aborting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    InvalidDataSource,
    Record,
    Persistence,
}

#[derive(Debug, Error, Diagnostic)]
pub enum ImportError {
    #[error("unsupported data type: {0}")]
    #[diagnostic(help("run `kira-import types` to list the supported data types"))]
    UnsupportedDataType(String),

    #[error("a processor is already registered for data type: {0}")]
    DuplicateProcessor(String),

    #[error("invalid value for import parameter {name}: {value}")]
    InvalidParameter { name: String, value: String },

    #[error("invalid data source {path}: {reason}")]
    InvalidDataSource { path: PathBuf, reason: String },

    #[error("required column {field} not found in header of {path}")]
    MissingColumn { path: PathBuf, field: String },

    #[error("line {line}: cannot convert {value:?} to {kind} for field {field}")]
    DataConversion {
        line: u64,
        field: String,
        value: String,
        kind: FieldKind,
    },

    #[error("line {line}: missing value for required field {field}")]
    MissingValue { line: u64, field: String },

    #[error("unknown sample: {0}")]
    UnresolvedSample(String),

    #[error("unknown gene: {0}")]
    UnresolvedGene(String),

    #[error("duplicate record: {0}")]
    #[diagnostic(help("the key was already imported into this data set"))]
    DuplicateRecord(String),

    #[error("no imported record to annotate: {0}")]
    UnknownRecord(String),

    #[error("repository error: {0}")]
    Persistence(String),

    #[error("failed to read manifest at {0}")]
    ManifestRead(PathBuf),

    #[error("failed to parse manifest: {0}")]
    ManifestParse(String),

    #[error("invalid manifest: {0}")]
    InvalidManifest(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("manifest import aborted at {path}")]
    ManifestAborted {
        path: PathBuf,
        summary: Box<ImportSummary>,
        #[source]
        source: Box<ImportError>,
    },
}

impl ImportError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ImportError::UnsupportedDataType(_)
            | ImportError::DuplicateProcessor(_)
            | ImportError::InvalidParameter { .. }
            | ImportError::ManifestRead(_)
            | ImportError::ManifestParse(_)
            | ImportError::InvalidManifest(_) => ErrorKind::Configuration,
            ImportError::InvalidDataSource { .. }
            | ImportError::MissingColumn { .. }
            | ImportError::Filesystem(_) => ErrorKind::InvalidDataSource,
            ImportError::DataConversion { .. }
            | ImportError::MissingValue { .. }
            | ImportError::UnresolvedSample(_)
            | ImportError::UnresolvedGene(_)
            | ImportError::DuplicateRecord(_)
            | ImportError::UnknownRecord(_) => ErrorKind::Record,
            ImportError::Persistence(_) => ErrorKind::Persistence,
            ImportError::ManifestAborted { source, .. } => source.kind(),
        }
    }

    pub fn invalid_source(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        ImportError::InvalidDataSource {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}
