use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::convert::parse_bool;
use crate::domain::Attributes;
use crate::error::ImportError;
use crate::model::normalize_header;

pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Skip and overwrite policy for one processor invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImportOptions {
    pub skip_invalid_records: bool,
    pub skip_invalid_samples: bool,
    pub skip_invalid_genes: bool,
    pub skip_invalid_files: bool,
    pub overwrite_data_set: bool,
    pub overwrite: bool,
    pub force_overwrite: bool,
    pub batch_size: usize,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            skip_invalid_records: false,
            skip_invalid_samples: false,
            skip_invalid_genes: false,
            skip_invalid_files: false,
            overwrite_data_set: false,
            overwrite: false,
            force_overwrite: false,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

impl ImportOptions {
    /// Returns a copy with `parameters` applied on top. Keys are compared
    /// like file headers, so `skipInvalidFiles` and `skip-invalid-files`
    /// name the same option. Unknown keys are left to other consumers.
    pub fn with_parameters(&self, parameters: &Attributes) -> Result<Self, ImportError> {
        let mut options = self.clone();
        for (name, value) in parameters {
            let slot = match normalize_header(name).as_str() {
                "skipinvalidrecords" => &mut options.skip_invalid_records,
                "skipinvalidsamples" => &mut options.skip_invalid_samples,
                "skipinvalidgenes" => &mut options.skip_invalid_genes,
                "skipinvalidfiles" => &mut options.skip_invalid_files,
                "overwritedataset" | "overwriteexistingdatasets" => {
                    &mut options.overwrite_data_set
                }
                "overwrite" | "overwriteexistingfiles" => &mut options.overwrite,
                "forceoverwrite" => &mut options.force_overwrite,
                "batchsize" => {
                    options.batch_size = parameter_usize(name, value)?;
                    continue;
                }
                _ => continue,
            };
            *slot = parameter_bool(name, value)?;
        }
        Ok(options)
    }
}

fn parameter_bool(name: &str, value: &JsonValue) -> Result<bool, ImportError> {
    match value {
        JsonValue::Bool(flag) => Ok(*flag),
        JsonValue::String(text) => parse_bool(text.trim()).map_err(|_| invalid(name, value)),
        JsonValue::Number(number) => match number.as_u64() {
            Some(0) => Ok(false),
            Some(1) => Ok(true),
            _ => Err(invalid(name, value)),
        },
        _ => Err(invalid(name, value)),
    }
}

fn parameter_usize(name: &str, value: &JsonValue) -> Result<usize, ImportError> {
    let parsed = match value {
        JsonValue::Number(number) => number.as_u64(),
        JsonValue::String(text) => text.trim().parse::<u64>().ok(),
        _ => None,
    };
    match parsed {
        Some(size) if size > 0 => Ok(size as usize),
        _ => Err(invalid(name, value)),
    }
}

fn invalid(name: &str, value: &JsonValue) -> ImportError {
    ImportError::InvalidParameter {
        name: name.to_string(),
        value: value.to_string(),
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Manifest {
    pub key: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub attributes: Attributes,
    #[serde(default)]
    pub parameters: Attributes,
    #[serde(default)]
    pub files: Vec<ManifestFile>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ManifestFile {
    pub path: String,
    #[serde(rename = "type")]
    pub data_type: String,
    #[serde(default)]
    pub attributes: Attributes,
    #[serde(default)]
    pub parameters: Attributes,
}

/// A manifest together with the directory relative file paths resolve
/// against.
#[derive(Debug, Clone)]
pub struct ResolvedManifest {
    pub manifest: Manifest,
    pub base_dir: PathBuf,
}

impl ResolvedManifest {
    pub fn file_path(&self, file: &ManifestFile) -> PathBuf {
        let path = Path::new(&file.path);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }
}

pub struct ManifestLoader;

impl ManifestLoader {
    pub fn load(path: &Path) -> Result<ResolvedManifest, ImportError> {
        let content =
            fs::read_to_string(path).map_err(|_| ImportError::ManifestRead(path.to_path_buf()))?;
        let manifest = Self::parse(&content)?;
        let base_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        Ok(ResolvedManifest { manifest, base_dir })
    }

    pub fn parse(content: &str) -> Result<Manifest, ImportError> {
        let manifest: Manifest = serde_json::from_str(content)
            .map_err(|err| ImportError::ManifestParse(err.to_string()))?;
        Self::validate(&manifest)?;
        Ok(manifest)
    }

    fn validate(manifest: &Manifest) -> Result<(), ImportError> {
        if manifest.key.trim().is_empty() {
            return Err(ImportError::InvalidManifest(
                "data set key must not be empty".to_string(),
            ));
        }
        for (index, file) in manifest.files.iter().enumerate() {
            if file.path.trim().is_empty() {
                return Err(ImportError::InvalidManifest(format!(
                    "file entry {index} has an empty path"
                )));
            }
            if file.data_type.trim().is_empty() {
                return Err(ImportError::InvalidManifest(format!(
                    "file entry {index} ({}) has no type",
                    file.path
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use serde_json::json;

    use super::*;

    #[test]
    fn parameters_accept_any_key_style() {
        let mut parameters = Attributes::new();
        parameters.insert("skipInvalidSamples".to_string(), json!(true));
        parameters.insert("skip-invalid-files".to_string(), json!("yes"));
        parameters.insert("batch_size".to_string(), json!(5));
        parameters.insert("unrelated".to_string(), json!({"a": 1}));

        let options = ImportOptions::default().with_parameters(&parameters).unwrap();
        assert!(options.skip_invalid_samples);
        assert!(options.skip_invalid_files);
        assert!(!options.skip_invalid_genes);
        assert_eq!(options.batch_size, 5);
    }

    #[test]
    fn malformed_parameter_is_rejected() {
        let mut parameters = Attributes::new();
        parameters.insert("overwrite".to_string(), json!("sometimes"));
        let err = ImportOptions::default()
            .with_parameters(&parameters)
            .unwrap_err();
        assert_matches!(err, ImportError::InvalidParameter { .. });
    }

    #[test]
    fn manifest_requires_key() {
        let err = ManifestLoader::parse(r#"{"key": " ", "files": []}"#).unwrap_err();
        assert_matches!(err, ImportError::InvalidManifest(_));
    }
}
