use std::collections::HashMap;
use std::fmt;

use crate::error::ImportError;
use crate::processor::ReferenceCache;
use crate::repository::Entity;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    Integer,
    Float,
    Boolean,
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldKind::Text => write!(f, "text"),
            FieldKind::Integer => write!(f, "integer"),
            FieldKind::Float => write!(f, "float"),
            FieldKind::Boolean => write!(f, "boolean"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Text(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
}

#[derive(Debug, Clone)]
pub struct FieldDescriptor {
    pub name: &'static str,
    pub aliases: Vec<&'static str>,
    pub kind: FieldKind,
    pub required: bool,
}

impl FieldDescriptor {
    pub fn matches(&self, normalized: &str) -> bool {
        normalize_header(self.name) == normalized
            || self
                .aliases
                .iter()
                .any(|alias| normalize_header(alias) == normalized)
    }
}

#[derive(Debug, Clone)]
pub struct ModelDescriptor {
    pub name: &'static str,
    pub fields: Vec<FieldDescriptor>,
}

impl ModelDescriptor {
    pub fn builder(name: &'static str) -> ModelDescriptorBuilder {
        ModelDescriptorBuilder {
            name,
            fields: Vec::new(),
        }
    }

    /// Finds the field a raw header token refers to.
    pub fn field_for_header(&self, header: &str) -> Option<&FieldDescriptor> {
        let normalized = normalize_header(header);
        if normalized.is_empty() {
            return None;
        }
        self.fields.iter().find(|field| field.matches(&normalized))
    }

    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|field| field.name == name)
    }

    pub fn required_fields(&self) -> impl Iterator<Item = &FieldDescriptor> {
        self.fields.iter().filter(|field| field.required)
    }
}

pub struct ModelDescriptorBuilder {
    name: &'static str,
    fields: Vec<FieldDescriptor>,
}

impl ModelDescriptorBuilder {
    pub fn required(self, name: &'static str, kind: FieldKind, aliases: &[&'static str]) -> Self {
        self.push(name, kind, aliases, true)
    }

    pub fn optional(self, name: &'static str, kind: FieldKind, aliases: &[&'static str]) -> Self {
        self.push(name, kind, aliases, false)
    }

    fn push(
        mut self,
        name: &'static str,
        kind: FieldKind,
        aliases: &[&'static str],
        required: bool,
    ) -> Self {
        self.fields.push(FieldDescriptor {
            name,
            aliases: aliases.to_vec(),
            kind,
            required,
        });
        self
    }

    pub fn build(self) -> ModelDescriptor {
        ModelDescriptor {
            name: self.name,
            fields: self.fields,
        }
    }
}

/// Lowercases and strips everything that is not a letter or digit, so
/// `Gene Symbol`, `gene_symbol` and `geneSymbol` compare equal.
pub fn normalize_header(value: &str) -> String {
    value
        .chars()
        .filter(|ch| ch.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

/// Converted cell values of one record, keyed by declared field name.
#[derive(Debug, Clone, Default)]
pub struct FieldValues {
    line: u64,
    values: HashMap<&'static str, Value>,
}

impl FieldValues {
    pub fn new(line: u64) -> Self {
        Self {
            line,
            values: HashMap::new(),
        }
    }

    pub fn line(&self) -> u64 {
        self.line
    }

    pub fn insert(&mut self, field: &'static str, value: Value) {
        self.values.insert(field, value);
    }

    pub fn contains(&self, field: &str) -> bool {
        self.values.contains_key(field)
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.values.get(field)
    }

    pub fn text(&self, field: &str) -> Option<String> {
        match self.values.get(field)? {
            Value::Text(value) => Some(value.clone()),
            Value::Integer(value) => Some(value.to_string()),
            Value::Float(value) => Some(value.to_string()),
            Value::Boolean(value) => Some(value.to_string()),
        }
    }

    pub fn integer(&self, field: &str) -> Option<i64> {
        match self.values.get(field)? {
            Value::Integer(value) => Some(*value),
            _ => None,
        }
    }

    pub fn float(&self, field: &str) -> Option<f64> {
        match self.values.get(field)? {
            Value::Float(value) => Some(*value),
            Value::Integer(value) => Some(*value as f64),
            _ => None,
        }
    }

    pub fn boolean(&self, field: &str) -> Option<bool> {
        match self.values.get(field)? {
            Value::Boolean(value) => Some(*value),
            _ => None,
        }
    }

    pub fn require_text(&self, field: &str) -> Result<String, ImportError> {
        self.text(field).ok_or_else(|| self.missing(field))
    }

    pub fn require_integer(&self, field: &str) -> Result<i64, ImportError> {
        self.integer(field).ok_or_else(|| self.missing(field))
    }

    pub fn require_float(&self, field: &str) -> Result<f64, ImportError> {
        self.float(field).ok_or_else(|| self.missing(field))
    }

    fn missing(&self, field: &str) -> ImportError {
        ImportError::MissingValue {
            line: self.line,
            field: field.to_string(),
        }
    }
}

/// Where a record came from; stamped onto every record a reader produces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordOrigin {
    pub data_set: String,
    pub data_source: String,
}

impl RecordOrigin {
    pub fn record_key(&self, ordinal: u64) -> String {
        format!("{}:{ordinal}", self.data_source)
    }
}

/// Key of a catalog entry (gene, sample) within its data set.
pub fn scoped_key(data_set: &str, id: &str) -> String {
    format!("{data_set}:{}", id.trim())
}

/// A domain type that can be produced by a record reader.
pub trait Model: Entity + Clone + Send + Sync + 'static {
    const NAME: &'static str;

    /// The stable key comes from the file content, so a file may repeat it.
    const NATURAL_KEY: bool = false;

    fn descriptor() -> ModelDescriptor;

    fn from_fields(
        fields: &FieldValues,
        origin: &RecordOrigin,
        ordinal: u64,
    ) -> Result<Self, ImportError>;

    /// Replaces natural-language references (sample names, gene symbols)
    /// with internal ids.
    fn resolve_references(&mut self, _refs: &mut ReferenceCache) -> Result<(), ImportError> {
        Ok(())
    }

    /// Copies the values this record carries onto a stored record with the
    /// same key.
    fn annotate(&self, _target: &mut Self) {}

    fn unknown_target(&self) -> ImportError {
        ImportError::UnknownRecord(self.stable_key())
    }
}
