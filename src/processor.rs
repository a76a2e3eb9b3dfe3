use std::collections::{HashMap, HashSet};
use std::mem;
use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::ImportOptions;
use crate::convert::{ConversionService, DefaultConversionService};
use crate::domain::{Attributes, DataSource, iso_timestamp};
use crate::error::{ErrorKind, ImportError};
use crate::identity::{
    ImportDecision, SkipReason, canonical_path, compute_checksum, compute_file_id, decide,
};
use crate::model::{Model, RecordOrigin, normalize_header};
use crate::reader::{ReaderContext, ReaderLayout, RecordReader, SkipRule, open_reader};
use crate::repository::{ForeignKeyResolver, Repositories, Repository};

/// One file to import.
#[derive(Debug, Clone)]
pub struct ImportRequest {
    pub data_type: String,
    pub path: PathBuf,
    pub data_set: String,
    pub attributes: Attributes,
}

impl ImportRequest {
    pub fn new(data_type: &str, path: impl Into<PathBuf>, data_set: &str) -> Self {
        Self {
            data_type: data_type.to_string(),
            path: path.into(),
            data_set: data_set.to_string(),
            attributes: Attributes::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FileOutcome {
    Imported,
    Replaced,
    SkippedExisting,
    SkippedUnchanged,
    SkippedInvalid,
    Failed,
}

impl FileOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            FileOutcome::Imported => "imported",
            FileOutcome::Replaced => "replaced",
            FileOutcome::SkippedExisting => "skipped_existing",
            FileOutcome::SkippedUnchanged => "skipped_unchanged",
            FileOutcome::SkippedInvalid => "skipped_invalid",
            FileOutcome::Failed => "failed",
        }
    }

    pub fn is_skipped(&self) -> bool {
        matches!(
            self,
            FileOutcome::SkippedExisting
                | FileOutcome::SkippedUnchanged
                | FileOutcome::SkippedInvalid
        )
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FileReport {
    pub data_type: String,
    pub path: String,
    pub data_source_id: Option<String>,
    pub outcome: FileOutcome,
    pub records_written: u64,
    pub records_skipped: u64,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessorPhase {
    New,
    Before,
    Running,
    Succeeded,
    Failed,
    After,
    OnFailure,
    Done,
}

pub trait RecordProcessor {
    fn data_type(&self) -> &str;

    fn model_name(&self) -> &'static str;

    /// Runs the full lifecycle for one file. On failure the cleanup has
    /// already happened when the error is returned.
    fn run(
        &mut self,
        request: &ImportRequest,
        options: &ImportOptions,
    ) -> Result<FileReport, ImportError>;

    fn phase(&self) -> ProcessorPhase;

    fn is_in_failed_state(&self) -> bool;
}

/// Shared collaborators handed to every processor.
#[derive(Clone)]
pub struct ProcessorContext {
    pub repositories: Repositories,
    pub resolver: Arc<dyn ForeignKeyResolver>,
    pub conversion: Arc<dyn ConversionService>,
}

impl ProcessorContext {
    pub fn new(repositories: Repositories) -> Self {
        let resolver = Arc::new(repositories.resolver());
        Self {
            repositories,
            resolver,
            conversion: Arc::new(DefaultConversionService),
        }
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn ForeignKeyResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn with_conversion(mut self, conversion: Arc<dyn ConversionService>) -> Self {
        self.conversion = conversion;
        self
    }
}

/// Per-run memo of sample and gene lookups, misses included.
pub struct ReferenceCache {
    resolver: Arc<dyn ForeignKeyResolver>,
    data_set: String,
    samples: HashMap<String, Option<String>>,
    genes: HashMap<String, Option<String>>,
    gene_symbols: Option<HashMap<String, String>>,
}

impl ReferenceCache {
    pub fn new(resolver: Arc<dyn ForeignKeyResolver>) -> Self {
        Self {
            resolver,
            data_set: String::new(),
            samples: HashMap::new(),
            genes: HashMap::new(),
            gene_symbols: None,
        }
    }

    /// Drops every memoized lookup and resolves against `data_set` from now on.
    pub fn scope(&mut self, data_set: &str) {
        self.clear();
        self.data_set = data_set.to_string();
    }

    pub fn clear(&mut self) {
        self.samples.clear();
        self.genes.clear();
        self.gene_symbols = None;
    }

    pub fn sample_id(&mut self, natural_key: &str) -> Result<String, ImportError> {
        let found = match self.samples.get(natural_key) {
            Some(hit) => hit.clone(),
            None => {
                let found = self.resolver.find_sample_id(&self.data_set, natural_key)?;
                self.samples.insert(natural_key.to_string(), found.clone());
                found
            }
        };
        found.ok_or_else(|| ImportError::UnresolvedSample(natural_key.to_string()))
    }

    /// Resolves a gene id, falling back to a case-insensitive symbol match.
    pub fn gene_id(&mut self, natural_key: &str) -> Result<String, ImportError> {
        let found = match self.genes.get(natural_key) {
            Some(hit) => hit.clone(),
            None => {
                let mut found = self.resolver.find_gene_id(&self.data_set, natural_key)?;
                if found.is_none() {
                    found = self.find_by_symbol(natural_key)?;
                }
                self.genes.insert(natural_key.to_string(), found.clone());
                found
            }
        };
        found.ok_or_else(|| ImportError::UnresolvedGene(natural_key.to_string()))
    }

    /// The symbol index is loaded once per run.
    fn find_by_symbol(&mut self, symbol: &str) -> Result<Option<String>, ImportError> {
        let index = match self.gene_symbols.take() {
            Some(index) => index,
            None => self.resolver.gene_symbols(&self.data_set)?,
        };
        let found = index.get(&symbol.trim().to_lowercase()).cloned();
        self.gene_symbols = Some(index);
        Ok(found)
    }
}

/// How admitted records reach the repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// New records owned by the run's data source.
    Insert,
    /// Values merged into records another file already imported.
    Annotate,
}

enum Prepared {
    Skip(SkipReason),
    Import(FileOutcome),
}

/// Processor for any [`Model`], parameterized by the reader layout.
pub struct ModelProcessor<M: Model> {
    data_type: String,
    layout: ReaderLayout,
    skip_rule: Option<SkipRule>,
    write_mode: WriteMode,
    records: Arc<dyn Repository<M>>,
    context: ProcessorContext,
    references: ReferenceCache,
    reader: Option<Box<dyn RecordReader<M>>>,
    data_source: Option<DataSource>,
    owns_data_source: bool,
    batch: Vec<M>,
    seen: HashSet<String>,
    originals: Vec<M>,
    written: u64,
    skipped: u64,
    phase: ProcessorPhase,
    failed: bool,
}

impl<M: Model> ModelProcessor<M> {
    pub fn new(
        data_type: &str,
        layout: ReaderLayout,
        records: Arc<dyn Repository<M>>,
        context: ProcessorContext,
    ) -> Self {
        let references = ReferenceCache::new(context.resolver.clone());
        Self {
            data_type: data_type.to_string(),
            layout,
            skip_rule: None,
            write_mode: WriteMode::Insert,
            records,
            context,
            references,
            reader: None,
            data_source: None,
            owns_data_source: false,
            batch: Vec::new(),
            seen: HashSet::new(),
            originals: Vec::new(),
            written: 0,
            skipped: 0,
            phase: ProcessorPhase::New,
            failed: false,
        }
    }

    pub fn with_skip_rule(mut self, rule: SkipRule) -> Self {
        self.skip_rule = Some(rule);
        self
    }

    pub fn with_write_mode(mut self, mode: WriteMode) -> Self {
        self.write_mode = mode;
        self
    }

    fn enter(&mut self, phase: ProcessorPhase) {
        debug!(data_type = %self.data_type, from = ?self.phase, to = ?phase, "processor phase");
        self.phase = phase;
    }

    fn reset(&mut self) {
        self.close_reader();
        self.references.clear();
        self.data_source = None;
        self.owns_data_source = false;
        self.batch.clear();
        self.seen.clear();
        self.originals.clear();
        self.written = 0;
        self.skipped = 0;
        self.failed = false;
        self.phase = ProcessorPhase::New;
    }

    fn close_reader(&mut self) {
        if let Some(mut reader) = self.reader.take() {
            reader.close();
        }
    }

    fn do_before(
        &mut self,
        request: &ImportRequest,
        options: &ImportOptions,
    ) -> Result<Prepared, ImportError> {
        if normalize_header(&request.data_type) != normalize_header(&self.data_type) {
            return Err(ImportError::UnsupportedDataType(request.data_type.clone()));
        }

        self.references.scope(&request.data_set);

        let path = canonical_path(&request.path)?;
        let checksum = compute_checksum(&path)?;
        let path_text = path.to_string_lossy().to_string();
        let id = compute_file_id(&path_text, &request.data_set, M::NAME);

        let data_sources = self.context.repositories.data_sources.clone();
        let existing = data_sources.find_by_stable_key(&id)?;
        let decision = decide(existing.as_ref(), &checksum, options);

        let outcome = match decision {
            ImportDecision::Skip(reason) => {
                match reason {
                    SkipReason::AlreadyImported => warn!(
                        path = %path_text,
                        data_source = %id,
                        "file already imported and overwrite is disabled, skipping"
                    ),
                    SkipReason::Unchanged => info!(
                        path = %path_text,
                        data_source = %id,
                        "file unchanged since last import, skipping"
                    ),
                }
                self.data_source = existing;
                return Ok(Prepared::Skip(reason));
            }
            ImportDecision::Create => FileOutcome::Imported,
            ImportDecision::Replace => FileOutcome::Replaced,
        };

        let origin = RecordOrigin {
            data_set: request.data_set.clone(),
            data_source: id.clone(),
        };
        let mut reader_context =
            ReaderContext::new(M::descriptor(), self.context.conversion.clone(), origin);
        if let Some(rule) = self.skip_rule {
            reader_context = reader_context.with_skip_rule(rule);
        }
        self.reader = Some(open_reader::<M>(self.layout, &path, reader_context)?);

        let now = iso_timestamp();
        let data_source = match existing {
            Some(mut previous) => {
                let removed = self.records.delete_by_data_source_id(&id)?;
                info!(
                    path = %path_text,
                    data_source = %id,
                    removed,
                    "file content changed, replacing previous import"
                );
                previous.path = path_text;
                previous.data_type = self.data_type.clone();
                previous.checksum = checksum;
                previous.updated_at = now;
                previous.record_count = 0;
                previous.skipped_count = 0;
                previous.attributes.extend(request.attributes.clone());
                self.owns_data_source = true;
                data_sources.update(previous)?
            }
            None => {
                let created = DataSource {
                    id,
                    path: path_text,
                    data_type: self.data_type.clone(),
                    model: M::NAME.to_string(),
                    checksum,
                    data_set: request.data_set.clone(),
                    created_at: now.clone(),
                    updated_at: now,
                    record_count: 0,
                    skipped_count: 0,
                    attributes: request.attributes.clone(),
                };
                let created = data_sources.insert(created)?;
                self.owns_data_source = true;
                created
            }
        };
        self.data_source = Some(data_source);
        Ok(Prepared::Import(outcome))
    }

    fn do_run(&mut self, options: &ImportOptions) -> Result<(), ImportError> {
        loop {
            let next = match self.reader.as_mut() {
                Some(reader) => reader.read_record(),
                None => break,
            };
            let admitted = match next {
                Ok(Some(mut record)) => match record.resolve_references(&mut self.references) {
                    Ok(()) => self.admit(record),
                    Err(err) => Err(err),
                },
                Ok(None) => break,
                Err(err) => Err(err),
            };
            match admitted {
                Ok(record) => {
                    self.batch.push(record);
                    if self.batch.len() >= options.batch_size.max(1) {
                        self.flush()?;
                    }
                }
                Err(err) => self.tolerate(err, options)?,
            }
        }
        self.flush()
    }

    /// Checks a record against the rows this run and earlier imports wrote.
    /// Records keyed by their position in the file cannot collide.
    fn admit(&mut self, record: M) -> Result<M, ImportError> {
        if !M::NATURAL_KEY && self.write_mode == WriteMode::Insert {
            return Ok(record);
        }
        let key = record.stable_key();
        if self.seen.contains(&key) {
            return Err(ImportError::DuplicateRecord(key));
        }
        let stored = self.records.find_by_stable_key(&key)?;
        let admitted = match (self.write_mode, stored) {
            (WriteMode::Insert, None) => record,
            (WriteMode::Insert, Some(_)) => return Err(ImportError::DuplicateRecord(key)),
            (WriteMode::Annotate, None) => return Err(record.unknown_target()),
            (WriteMode::Annotate, Some(stored)) => {
                let mut merged = stored.clone();
                record.annotate(&mut merged);
                self.originals.push(stored);
                merged
            }
        };
        self.seen.insert(key);
        Ok(admitted)
    }

    /// Counts a record-level error as skipped when the options allow it.
    fn tolerate(&mut self, err: ImportError, options: &ImportOptions) -> Result<(), ImportError> {
        let allowed = match &err {
            ImportError::UnresolvedSample(_) => options.skip_invalid_samples,
            ImportError::UnresolvedGene(_) => options.skip_invalid_genes,
            other => other.kind() == ErrorKind::Record && options.skip_invalid_records,
        };
        if !allowed {
            return Err(err);
        }
        self.skipped += 1;
        warn!(data_type = %self.data_type, error = %err, "skipping invalid record");
        Ok(())
    }

    fn flush(&mut self) -> Result<(), ImportError> {
        if self.batch.is_empty() {
            return Ok(());
        }
        let batch = mem::take(&mut self.batch);
        let written = match self.write_mode {
            WriteMode::Insert => self.records.insert_all(batch)?,
            WriteMode::Annotate => {
                let count = batch.len();
                for record in batch {
                    self.records.update(record)?;
                }
                count
            }
        };
        self.written += written as u64;
        Ok(())
    }

    fn do_after(&mut self) -> Result<(), ImportError> {
        self.close_reader();
        let Some(data_source) = self.data_source.as_mut() else {
            return Ok(());
        };
        data_source.record_count = self.written;
        data_source.skipped_count = self.skipped;
        data_source.updated_at = iso_timestamp();
        let updated = self
            .context
            .repositories
            .data_sources
            .update(data_source.clone())?;
        info!(
            data_type = %self.data_type,
            path = %updated.path,
            data_source = %updated.id,
            records = self.written,
            skipped = self.skipped,
            "imported file"
        );
        Ok(())
    }

    /// Best-effort cleanup; problems are logged, never raised.
    fn do_on_failure(&mut self, request: &ImportRequest, err: &ImportError) {
        self.close_reader();
        self.batch.clear();
        warn!(
            data_type = %self.data_type,
            path = %request.path.display(),
            error = %err,
            "file import failed"
        );
        for original in mem::take(&mut self.originals) {
            if let Err(cleanup) = self.records.update(original) {
                warn!(data_type = %self.data_type, error = %cleanup, "failed to restore record");
            }
        }
        if !self.owns_data_source {
            return;
        }
        let Some(data_source) = self.data_source.take() else {
            return;
        };
        if let Err(cleanup) = self.records.delete_by_data_source_id(&data_source.id) {
            warn!(
                data_source = %data_source.id,
                error = %cleanup,
                "failed to remove partial records"
            );
        }
        if let Err(cleanup) = self.context.repositories.data_sources.delete(&data_source) {
            warn!(data_source = %data_source.id, error = %cleanup, "failed to remove data source");
        }
        self.written = 0;
    }

    fn fail(&mut self, request: &ImportRequest, err: ImportError) -> ImportError {
        self.failed = true;
        self.enter(ProcessorPhase::Failed);
        self.enter(ProcessorPhase::OnFailure);
        self.do_on_failure(request, &err);
        self.enter(ProcessorPhase::Done);
        err
    }

    fn report(&self, request: &ImportRequest, outcome: FileOutcome) -> FileReport {
        FileReport {
            data_type: self.data_type.clone(),
            path: request.path.display().to_string(),
            data_source_id: self.data_source.as_ref().map(|source| source.id.clone()),
            outcome,
            records_written: self.written,
            records_skipped: self.skipped,
            error: None,
        }
    }
}

impl<M: Model> RecordProcessor for ModelProcessor<M> {
    fn data_type(&self) -> &str {
        &self.data_type
    }

    fn model_name(&self) -> &'static str {
        M::NAME
    }

    fn run(
        &mut self,
        request: &ImportRequest,
        options: &ImportOptions,
    ) -> Result<FileReport, ImportError> {
        self.reset();
        self.enter(ProcessorPhase::Before);
        let outcome = match self.do_before(request, options) {
            Ok(Prepared::Import(outcome)) => outcome,
            Ok(Prepared::Skip(reason)) => {
                self.close_reader();
                self.enter(ProcessorPhase::Done);
                let outcome = match reason {
                    SkipReason::AlreadyImported => FileOutcome::SkippedExisting,
                    SkipReason::Unchanged => FileOutcome::SkippedUnchanged,
                };
                return Ok(self.report(request, outcome));
            }
            Err(err) => return Err(self.fail(request, err)),
        };

        self.enter(ProcessorPhase::Running);
        if let Err(err) = self.do_run(options) {
            return Err(self.fail(request, err));
        }
        self.enter(ProcessorPhase::Succeeded);

        self.enter(ProcessorPhase::After);
        if let Err(err) = self.do_after() {
            return Err(self.fail(request, err));
        }
        self.enter(ProcessorPhase::Done);
        Ok(self.report(request, outcome))
    }

    fn phase(&self) -> ProcessorPhase {
        self.phase
    }

    fn is_in_failed_state(&self) -> bool {
        self.failed
    }
}

impl<M: Model> Drop for ModelProcessor<M> {
    fn drop(&mut self) {
        self.close_reader();
    }
}
