use std::path::Path;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{info, warn};

use crate::config::{ImportOptions, Manifest, ManifestLoader, ResolvedManifest};
use crate::domain::{DataSet, DataSource, iso_timestamp};
use crate::error::{ErrorKind, ImportError};
use crate::identity::{canonical_path, compute_file_id};
use crate::processor::{FileOutcome, FileReport, ImportRequest, ProcessorContext};
use crate::registry::ProcessorRegistry;
use crate::repository::Repositories;

#[derive(Debug, Clone, Default, Serialize)]
pub struct ImportSummary {
    pub data_set: String,
    pub files_imported: usize,
    pub files_skipped: usize,
    pub files_failed: usize,
    pub files: Vec<FileReport>,
}

impl ImportSummary {
    fn record(&mut self, report: FileReport) {
        if report.outcome.is_skipped() {
            self.files_skipped += 1;
        } else {
            self.files_imported += 1;
        }
        self.files.push(report);
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TypesResult {
    pub data_types: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ListResult {
    pub data_sets: Vec<DataSet>,
    pub data_sources: Vec<DataSource>,
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

/// Runs manifests and single files through the processor registry.
pub struct Importer {
    registry: ProcessorRegistry,
    repositories: Repositories,
    options: ImportOptions,
}

impl Importer {
    pub fn new(
        registry: ProcessorRegistry,
        repositories: Repositories,
        options: ImportOptions,
    ) -> Self {
        Self {
            registry,
            repositories,
            options,
        }
    }

    /// Importer with the built-in processors over `repositories`.
    pub fn with_defaults(
        repositories: Repositories,
        options: ImportOptions,
    ) -> Result<Self, ImportError> {
        let context = ProcessorContext::new(repositories.clone());
        let registry = ProcessorRegistry::with_defaults(context)?;
        Ok(Self::new(registry, repositories, options))
    }

    pub fn registry(&self) -> &ProcessorRegistry {
        &self.registry
    }

    pub fn options(&self) -> &ImportOptions {
        &self.options
    }

    pub fn types(&self) -> TypesResult {
        TypesResult {
            data_types: self.registry.supported_types(),
        }
    }

    pub fn list(&self) -> Result<ListResult, ImportError> {
        Ok(ListResult {
            data_sets: self.repositories.data_sets.find_all()?,
            data_sources: self.repositories.data_sources.find_all()?,
        })
    }

    pub fn import_manifest(
        &self,
        path: &Path,
        sink: &dyn ProgressSink,
    ) -> Result<ImportSummary, ImportError> {
        sink.event(ProgressEvent {
            message: format!("phase=Resolve; reading manifest {}", path.display()),
            elapsed: None,
        });
        let resolved = ManifestLoader::load(path)?;
        self.import_resolved(&resolved, sink)
    }

    /// Imports every file of `resolved` in order.
    ///
    /// Data types and per-file parameters are validated before the first
    /// file is touched. A failing file is counted as skipped when its
    /// options allow skipping invalid files; otherwise the manifest stops
    /// with [`ImportError::ManifestAborted`] carrying the summary so far.
    pub fn import_resolved(
        &self,
        resolved: &ResolvedManifest,
        sink: &dyn ProgressSink,
    ) -> Result<ImportSummary, ImportError> {
        let manifest = &resolved.manifest;
        let options = self.options.with_parameters(&manifest.parameters)?;

        let mut plan = Vec::with_capacity(manifest.files.len());
        for file in &manifest.files {
            if !self.registry.is_supported(&file.data_type) {
                return Err(ImportError::UnsupportedDataType(file.data_type.clone()));
            }
            let file_options = options.with_parameters(&file.parameters)?;
            plan.push((file, resolved.file_path(file), file_options));
        }

        let mut data_set = self.ensure_data_set(manifest, &options)?;
        let mut summary = ImportSummary {
            data_set: data_set.key.clone(),
            ..ImportSummary::default()
        };
        let total = plan.len();

        for (index, (file, path, file_options)) in plan.into_iter().enumerate() {
            let request = ImportRequest {
                data_type: file.data_type.clone(),
                path: path.clone(),
                data_set: data_set.key.clone(),
                attributes: file.attributes.clone(),
            };
            sink.event(ProgressEvent {
                message: format!(
                    "phase=Import; [{}/{total}] {} {}",
                    index + 1,
                    request.data_type,
                    path.display()
                ),
                elapsed: None,
            });

            let start = Instant::now();
            match self.run_file(&request, &file_options, &mut data_set) {
                Ok(report) => {
                    sink.event(ProgressEvent {
                        message: format!(
                            "phase=Done; {} records, {} skipped",
                            report.records_written, report.records_skipped
                        ),
                        elapsed: Some(start.elapsed()),
                    });
                    summary.record(report);
                }
                Err(err)
                    if err.kind() != ErrorKind::Configuration && file_options.skip_invalid_files =>
                {
                    warn!(
                        path = %path.display(),
                        data_type = %request.data_type,
                        error = %err,
                        "skipping invalid file"
                    );
                    sink.event(ProgressEvent {
                        message: format!("phase=Skip; {err}"),
                        elapsed: Some(start.elapsed()),
                    });
                    summary.record(failed_report(&request, FileOutcome::SkippedInvalid, &err));
                }
                Err(err) => {
                    summary.files_failed += 1;
                    summary
                        .files
                        .push(failed_report(&request, FileOutcome::Failed, &err));
                    return Err(ImportError::ManifestAborted {
                        path,
                        summary: Box::new(summary),
                        source: Box::new(err),
                    });
                }
            }
        }

        info!(
            data_set = %summary.data_set,
            imported = summary.files_imported,
            skipped = summary.files_skipped,
            failed = summary.files_failed,
            "manifest import finished"
        );
        Ok(summary)
    }

    /// Imports one file into `data_set`, creating the data set when it does
    /// not exist yet.
    pub fn import_file(
        &self,
        data_type: &str,
        path: &Path,
        data_set: &str,
        sink: &dyn ProgressSink,
    ) -> Result<FileReport, ImportError> {
        let manifest = Manifest {
            key: data_set.to_string(),
            name: None,
            source: None,
            version: None,
            description: None,
            attributes: Default::default(),
            parameters: Default::default(),
            files: Vec::new(),
        };
        let options = self.options.clone();
        let mut data_set = self.ensure_data_set(&manifest, &options)?;
        let request = ImportRequest::new(data_type, path, &data_set.key);

        sink.event(ProgressEvent {
            message: format!("phase=Import; {data_type} {}", path.display()),
            elapsed: None,
        });
        let start = Instant::now();
        let report = self.run_file(&request, &options, &mut data_set)?;
        sink.event(ProgressEvent {
            message: format!(
                "phase=Done; {} records, {} skipped",
                report.records_written, report.records_skipped
            ),
            elapsed: Some(start.elapsed()),
        });
        Ok(report)
    }

    fn run_file(
        &self,
        request: &ImportRequest,
        options: &ImportOptions,
        data_set: &mut DataSet,
    ) -> Result<FileReport, ImportError> {
        let mut processor = self.registry.get(&request.data_type)?;
        match processor.run(request, options) {
            Ok(report) => {
                if let Some(id) = &report.data_source_id {
                    self.add_member(data_set, id);
                }
                Ok(report)
            }
            Err(err) => {
                let id = canonical_path(&request.path).map(|path| {
                    compute_file_id(
                        &path.to_string_lossy(),
                        &request.data_set,
                        processor.model_name(),
                    )
                });
                if let Ok(id) = id {
                    self.prune_member(data_set, &id);
                }
                Err(err)
            }
        }
    }

    /// Loads the data set named by the manifest, creating it when missing.
    /// Existing metadata is replaced only with `overwrite_data_set`.
    fn ensure_data_set(
        &self,
        manifest: &Manifest,
        options: &ImportOptions,
    ) -> Result<DataSet, ImportError> {
        let data_sets = &self.repositories.data_sets;
        match data_sets.find_by_stable_key(&manifest.key)? {
            None => {
                let now = iso_timestamp();
                info!(data_set = %manifest.key, "creating data set");
                data_sets.insert(DataSet {
                    key: manifest.key.clone(),
                    name: manifest.name.clone(),
                    source: manifest.source.clone(),
                    version: manifest.version.clone(),
                    description: manifest.description.clone(),
                    attributes: manifest.attributes.clone(),
                    data_sources: Default::default(),
                    created_at: now.clone(),
                    updated_at: now,
                })
            }
            Some(mut existing) if options.overwrite_data_set => {
                info!(data_set = %manifest.key, "updating data set metadata");
                existing.name = manifest.name.clone();
                existing.source = manifest.source.clone();
                existing.version = manifest.version.clone();
                existing.description = manifest.description.clone();
                existing.attributes = manifest.attributes.clone();
                existing.updated_at = iso_timestamp();
                data_sets.update(existing)
            }
            Some(existing) => Ok(existing),
        }
    }

    /// The file's import is already committed, so a failed membership update
    /// is logged and the next successful file retries it.
    fn add_member(&self, data_set: &mut DataSet, data_source_id: &str) {
        if !data_set.data_sources.insert(data_source_id.to_string()) {
            return;
        }
        data_set.updated_at = iso_timestamp();
        if let Err(err) = self.repositories.data_sets.update(data_set.clone()) {
            warn!(
                data_set = %data_set.key,
                data_source = %data_source_id,
                error = %err,
                "failed to record data set member"
            );
        }
    }

    /// Drops a member whose data source row was removed by a failed run.
    fn prune_member(&self, data_set: &mut DataSet, data_source_id: &str) {
        if !data_set.data_sources.contains(data_source_id) {
            return;
        }
        match self.repositories.data_sources.find_by_stable_key(data_source_id) {
            Ok(Some(_)) => {}
            Ok(None) => {
                data_set.data_sources.remove(data_source_id);
                data_set.updated_at = iso_timestamp();
                if let Err(err) = self.repositories.data_sets.update(data_set.clone()) {
                    warn!(
                        data_set = %data_set.key,
                        error = %err,
                        "failed to update data set members"
                    );
                }
            }
            Err(err) => {
                warn!(data_set = %data_set.key, error = %err, "failed to check data set members");
            }
        }
    }
}

fn failed_report(request: &ImportRequest, outcome: FileOutcome, err: &ImportError) -> FileReport {
    FileReport {
        data_type: request.data_type.clone(),
        path: request.path.display().to_string(),
        data_source_id: None,
        outcome,
        records_written: 0,
        records_skipped: 0,
        error: Some(err.to_string()),
    }
}
