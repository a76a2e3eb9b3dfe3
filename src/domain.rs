use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::ImportError;
use crate::model::{FieldKind, FieldValues, Model, ModelDescriptor, RecordOrigin, scoped_key};
use crate::processor::ReferenceCache;
use crate::repository::Entity;

pub type Attributes = BTreeMap<String, JsonValue>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataSet {
    pub key: String,
    pub name: Option<String>,
    pub source: Option<String>,
    pub version: Option<String>,
    pub description: Option<String>,
    #[serde(default)]
    pub attributes: Attributes,
    #[serde(default)]
    pub data_sources: BTreeSet<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl Entity for DataSet {
    const COLLECTION: &'static str = "data_sets";

    fn stable_key(&self) -> String {
        self.key.clone()
    }
}

/// The record of one imported file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataSource {
    pub id: String,
    pub path: String,
    pub data_type: String,
    pub model: String,
    pub checksum: String,
    pub data_set: String,
    pub created_at: String,
    pub updated_at: String,
    #[serde(default)]
    pub record_count: u64,
    #[serde(default)]
    pub skipped_count: u64,
    #[serde(default)]
    pub attributes: Attributes,
}

impl Entity for DataSource {
    const COLLECTION: &'static str = "data_sources";

    fn stable_key(&self) -> String {
        self.id.clone()
    }
}

/// How a file's lines are turned into records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    Gene,
    Sample,
    SampleAttributes,
    Mutation,
    GeneExpression,
    CopyNumberSegment,
}

impl DataType {
    pub const ALL: [DataType; 6] = [
        DataType::Gene,
        DataType::Sample,
        DataType::SampleAttributes,
        DataType::Mutation,
        DataType::GeneExpression,
        DataType::CopyNumberSegment,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            DataType::Gene => "gene",
            DataType::Sample => "sample",
            DataType::SampleAttributes => "sample_attributes",
            DataType::Mutation => "mutation",
            DataType::GeneExpression => "gene_expression",
            DataType::CopyNumberSegment => "copy_number_segment",
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Gene {
    pub gene_id: String,
    pub symbol: String,
    pub name: Option<String>,
    pub chromosome: Option<String>,
    pub biotype: Option<String>,
    pub data_set: String,
    pub data_source: String,
}

impl Entity for Gene {
    const COLLECTION: &'static str = "genes";

    fn stable_key(&self) -> String {
        scoped_key(&self.data_set, &self.gene_id)
    }

    fn data_source_id(&self) -> Option<&str> {
        Some(&self.data_source)
    }
}

impl Model for Gene {
    const NAME: &'static str = "Gene";
    const NATURAL_KEY: bool = true;

    fn descriptor() -> ModelDescriptor {
        ModelDescriptor::builder(Self::NAME)
            .required(
                "gene_id",
                FieldKind::Text,
                &["entrez_id", "entrez_gene_id", "ensembl_id", "id"],
            )
            .required(
                "symbol",
                FieldKind::Text,
                &["gene_symbol", "hugo_symbol", "primary_gene_symbol"],
            )
            .optional("name", FieldKind::Text, &["description", "gene_name"])
            .optional("chromosome", FieldKind::Text, &["chr", "chrom"])
            .optional("biotype", FieldKind::Text, &["gene_type", "type_of_gene"])
            .build()
    }

    fn from_fields(
        fields: &FieldValues,
        origin: &RecordOrigin,
        _ordinal: u64,
    ) -> Result<Self, ImportError> {
        Ok(Self {
            gene_id: fields.require_text("gene_id")?,
            symbol: fields.require_text("symbol")?,
            name: fields.text("name"),
            chromosome: fields.text("chromosome"),
            biotype: fields.text("biotype"),
            data_set: origin.data_set.clone(),
            data_source: origin.data_source.clone(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub sample_id: String,
    pub subject_id: Option<String>,
    pub tissue: Option<String>,
    pub sample_type: Option<String>,
    pub age: Option<i64>,
    pub data_set: String,
    pub data_source: String,
}

impl Entity for Sample {
    const COLLECTION: &'static str = "samples";

    fn stable_key(&self) -> String {
        scoped_key(&self.data_set, &self.sample_id)
    }

    fn data_source_id(&self) -> Option<&str> {
        Some(&self.data_source)
    }
}

impl Model for Sample {
    const NAME: &'static str = "Sample";
    const NATURAL_KEY: bool = true;

    fn descriptor() -> ModelDescriptor {
        ModelDescriptor::builder(Self::NAME)
            .required("sample_id", FieldKind::Text, &["sample", "sample_name", "barcode"])
            .optional("subject_id", FieldKind::Text, &["subject", "patient_id", "donor_id"])
            .optional("tissue", FieldKind::Text, &["tissue_type", "primary_site"])
            .optional("sample_type", FieldKind::Text, &["type"])
            .optional("age", FieldKind::Integer, &["age_at_diagnosis"])
            .build()
    }

    fn from_fields(
        fields: &FieldValues,
        origin: &RecordOrigin,
        _ordinal: u64,
    ) -> Result<Self, ImportError> {
        Ok(Self {
            sample_id: fields.require_text("sample_id")?,
            subject_id: fields.text("subject_id"),
            tissue: fields.text("tissue"),
            sample_type: fields.text("sample_type"),
            age: fields.integer("age"),
            data_set: origin.data_set.clone(),
            data_source: origin.data_source.clone(),
        })
    }
    fn annotate(&self, target: &mut Self) {
        if let Some(subject_id) = &self.subject_id {
            target.subject_id = Some(subject_id.clone());
        }
        if let Some(tissue) = &self.tissue {
            target.tissue = Some(tissue.clone());
        }
        if let Some(sample_type) = &self.sample_type {
            target.sample_type = Some(sample_type.clone());
        }
        if self.age.is_some() {
            target.age = self.age;
        }
    }

    fn unknown_target(&self) -> ImportError {
        ImportError::UnresolvedSample(self.sample_id.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mutation {
    pub key: String,
    pub gene_symbol: String,
    pub gene_id: Option<String>,
    pub sample_name: String,
    pub sample_id: Option<String>,
    pub chromosome: Option<String>,
    pub start: Option<i64>,
    pub end: Option<i64>,
    pub reference_allele: Option<String>,
    pub alternate_allele: Option<String>,
    pub variant_classification: Option<String>,
    pub protein_change: Option<String>,
    pub data_set: String,
    pub data_source: String,
}

impl Entity for Mutation {
    const COLLECTION: &'static str = "mutations";

    fn stable_key(&self) -> String {
        self.key.clone()
    }

    fn data_source_id(&self) -> Option<&str> {
        Some(&self.data_source)
    }
}

impl Model for Mutation {
    const NAME: &'static str = "Mutation";

    fn descriptor() -> ModelDescriptor {
        ModelDescriptor::builder(Self::NAME)
            .required("gene_symbol", FieldKind::Text, &["hugo_symbol", "gene"])
            .required("sample", FieldKind::Text, &["tumor_sample_barcode", "sample_id"])
            .optional("chromosome", FieldKind::Text, &["chr", "chrom"])
            .optional("start", FieldKind::Integer, &["start_position", "pos"])
            .optional("end", FieldKind::Integer, &["end_position"])
            .optional("reference_allele", FieldKind::Text, &["ref"])
            .optional("alternate_allele", FieldKind::Text, &["tumor_seq_allele2", "alt"])
            .optional("variant_classification", FieldKind::Text, &["variant_type"])
            .optional("protein_change", FieldKind::Text, &["hgvsp_short", "amino_acid_change"])
            .build()
    }

    fn from_fields(
        fields: &FieldValues,
        origin: &RecordOrigin,
        ordinal: u64,
    ) -> Result<Self, ImportError> {
        Ok(Self {
            key: origin.record_key(ordinal),
            gene_symbol: fields.require_text("gene_symbol")?,
            gene_id: None,
            sample_name: fields.require_text("sample")?,
            sample_id: None,
            chromosome: fields.text("chromosome"),
            start: fields.integer("start"),
            end: fields.integer("end"),
            reference_allele: fields.text("reference_allele"),
            alternate_allele: fields.text("alternate_allele"),
            variant_classification: fields.text("variant_classification"),
            protein_change: fields.text("protein_change"),
            data_set: origin.data_set.clone(),
            data_source: origin.data_source.clone(),
        })
    }

    fn resolve_references(&mut self, refs: &mut ReferenceCache) -> Result<(), ImportError> {
        self.sample_id = Some(refs.sample_id(&self.sample_name)?);
        self.gene_id = Some(refs.gene_id(&self.gene_symbol)?);
        Ok(())
    }
}

/// One cell of a gene-by-sample expression matrix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpressionValue {
    pub key: String,
    pub gene: String,
    pub gene_id: Option<String>,
    pub sample_name: String,
    pub sample_id: Option<String>,
    pub value: f64,
    pub data_set: String,
    pub data_source: String,
}

impl Entity for ExpressionValue {
    const COLLECTION: &'static str = "expression";

    fn stable_key(&self) -> String {
        self.key.clone()
    }

    fn data_source_id(&self) -> Option<&str> {
        Some(&self.data_source)
    }
}

impl Model for ExpressionValue {
    const NAME: &'static str = "ExpressionValue";

    fn descriptor() -> ModelDescriptor {
        ModelDescriptor::builder(Self::NAME)
            .required("gene", FieldKind::Text, &["gene_id", "gene_symbol", "hugo_symbol", "name"])
            .optional("gene_description", FieldKind::Text, &["description"])
            .required("sample", FieldKind::Text, &[])
            .required("value", FieldKind::Float, &[])
            .build()
    }

    fn from_fields(
        fields: &FieldValues,
        origin: &RecordOrigin,
        ordinal: u64,
    ) -> Result<Self, ImportError> {
        Ok(Self {
            key: origin.record_key(ordinal),
            gene: fields.require_text("gene")?,
            gene_id: None,
            sample_name: fields.require_text("sample")?,
            sample_id: None,
            value: fields.require_float("value")?,
            data_set: origin.data_set.clone(),
            data_source: origin.data_source.clone(),
        })
    }

    fn resolve_references(&mut self, refs: &mut ReferenceCache) -> Result<(), ImportError> {
        self.sample_id = Some(refs.sample_id(&self.sample_name)?);
        self.gene_id = Some(refs.gene_id(&self.gene)?);
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CopyNumberSegment {
    pub key: String,
    pub sample_name: String,
    pub sample_id: Option<String>,
    pub chromosome: String,
    pub start: i64,
    pub end: i64,
    pub num_markers: Option<i64>,
    pub segment_mean: f64,
    pub data_set: String,
    pub data_source: String,
}

impl Entity for CopyNumberSegment {
    const COLLECTION: &'static str = "copy_number_segments";

    fn stable_key(&self) -> String {
        self.key.clone()
    }

    fn data_source_id(&self) -> Option<&str> {
        Some(&self.data_source)
    }
}

impl Model for CopyNumberSegment {
    const NAME: &'static str = "CopyNumberSegment";

    fn descriptor() -> ModelDescriptor {
        ModelDescriptor::builder(Self::NAME)
            .required("sample", FieldKind::Text, &["id", "sample_id"])
            .required("chromosome", FieldKind::Text, &["chrom", "chr"])
            .required("start", FieldKind::Integer, &["loc.start", "start_position"])
            .required("end", FieldKind::Integer, &["loc.end", "end_position"])
            .optional("num_markers", FieldKind::Integer, &["num.mark", "num_probes"])
            .required("segment_mean", FieldKind::Float, &["seg.mean", "value"])
            .build()
    }

    fn from_fields(
        fields: &FieldValues,
        origin: &RecordOrigin,
        ordinal: u64,
    ) -> Result<Self, ImportError> {
        Ok(Self {
            key: origin.record_key(ordinal),
            sample_name: fields.require_text("sample")?,
            sample_id: None,
            chromosome: fields.require_text("chromosome")?,
            start: fields.require_integer("start")?,
            end: fields.require_integer("end")?,
            num_markers: fields.integer("num_markers"),
            segment_mean: fields.require_float("segment_mean")?,
            data_set: origin.data_set.clone(),
            data_source: origin.data_source.clone(),
        })
    }

    fn resolve_references(&mut self, refs: &mut ReferenceCache) -> Result<(), ImportError> {
        self.sample_id = Some(refs.sample_id(&self.sample_name)?);
        Ok(())
    }
}

pub(crate) fn iso_timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}
