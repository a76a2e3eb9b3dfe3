use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::debug;

use crate::domain::{CopyNumberSegment, DataType, ExpressionValue, Gene, Mutation, Sample};
use crate::error::ImportError;
use crate::model::{Model, normalize_header};
use crate::processor::{ModelProcessor, ProcessorContext, RecordProcessor, WriteMode};
use crate::reader::{MatrixLayout, ReaderLayout, SkipRule, gct_dimension_line};
use crate::repository::Repository;

/// Builds a fresh processor for every file.
pub type ProcessorFactory = Box<dyn Fn() -> Box<dyn RecordProcessor> + Send + Sync>;

struct Registration {
    label: String,
    factory: ProcessorFactory,
}

/// Data-type label to processor factory. Labels match the way headers do,
/// so `Gene Expression` and `gene-expression` name the same type.
#[derive(Default)]
pub struct ProcessorRegistry {
    factories: BTreeMap<String, Registration>,
}

impl ProcessorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with a processor for every built-in [`DataType`].
    pub fn with_defaults(context: ProcessorContext) -> Result<Self, ImportError> {
        let mut registry = Self::new();
        let repositories = context.repositories.clone();
        for data_type in DataType::ALL {
            let label = data_type.label();
            match data_type {
                DataType::Gene => registry.register_model::<Gene>(
                    label,
                    ReaderLayout::Tabular,
                    None,
                    WriteMode::Insert,
                    repositories.genes.clone(),
                    &context,
                )?,
                DataType::Sample => registry.register_model::<Sample>(
                    label,
                    ReaderLayout::Tabular,
                    None,
                    WriteMode::Insert,
                    repositories.samples.clone(),
                    &context,
                )?,
                DataType::SampleAttributes => registry.register_model::<Sample>(
                    label,
                    ReaderLayout::Columnar,
                    None,
                    WriteMode::Annotate,
                    repositories.samples.clone(),
                    &context,
                )?,
                DataType::Mutation => registry.register_model::<Mutation>(
                    label,
                    ReaderLayout::Tabular,
                    None,
                    WriteMode::Insert,
                    repositories.mutations.clone(),
                    &context,
                )?,
                DataType::GeneExpression => registry.register_model::<ExpressionValue>(
                    label,
                    ReaderLayout::Matrix(MatrixLayout {
                        column_field: "sample",
                        value_field: "value",
                    }),
                    Some(gct_dimension_line),
                    WriteMode::Insert,
                    repositories.expression.clone(),
                    &context,
                )?,
                DataType::CopyNumberSegment => registry.register_model::<CopyNumberSegment>(
                    label,
                    ReaderLayout::Tabular,
                    None,
                    WriteMode::Insert,
                    repositories.copy_number.clone(),
                    &context,
                )?,
            }
        }
        Ok(registry)
    }

    /// Registers `factory` under `label`. Registering a label twice is a
    /// configuration error.
    pub fn register(&mut self, label: &str, factory: ProcessorFactory) -> Result<(), ImportError> {
        let key = normalize_header(label);
        if key.is_empty() {
            return Err(ImportError::UnsupportedDataType(label.to_string()));
        }
        if let Some(existing) = self.factories.get(&key) {
            return Err(ImportError::DuplicateProcessor(existing.label.clone()));
        }
        debug!(data_type = %label, "registered processor");
        self.factories.insert(
            key,
            Registration {
                label: label.to_string(),
                factory,
            },
        );
        Ok(())
    }

    fn register_model<M: Model>(
        &mut self,
        label: &'static str,
        layout: ReaderLayout,
        skip_rule: Option<SkipRule>,
        write_mode: WriteMode,
        records: Arc<dyn Repository<M>>,
        context: &ProcessorContext,
    ) -> Result<(), ImportError> {
        let context = context.clone();
        self.register(
            label,
            Box::new(move || -> Box<dyn RecordProcessor> {
                let processor =
                    ModelProcessor::<M>::new(label, layout, records.clone(), context.clone())
                        .with_write_mode(write_mode);
                match skip_rule {
                    Some(rule) => Box::new(processor.with_skip_rule(rule)),
                    None => Box::new(processor),
                }
            }),
        )
    }

    pub fn is_supported(&self, label: &str) -> bool {
        self.factories.contains_key(&normalize_header(label))
    }

    /// A new processor for `label`.
    pub fn get(&self, label: &str) -> Result<Box<dyn RecordProcessor>, ImportError> {
        self.factories
            .get(&normalize_header(label))
            .map(|registration| (registration.factory)())
            .ok_or_else(|| ImportError::UnsupportedDataType(label.to_string()))
    }

    /// Registered labels in sorted order.
    pub fn supported_types(&self) -> Vec<String> {
        let mut labels: Vec<String> = self
            .factories
            .values()
            .map(|registration| registration.label.clone())
            .collect();
        labels.sort();
        labels
    }
}
