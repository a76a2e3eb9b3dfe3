mod columnar;
mod header;
mod matrix;
mod tabular;

use std::path::Path;
use std::sync::Arc;

pub use columnar::ColumnarReader;
pub use header::HeaderMap;
pub use matrix::{MatrixLayout, MatrixReader};
pub use tabular::TabularReader;

use crate::convert::ConversionService;
use crate::error::ImportError;
use crate::model::{FieldDescriptor, Model, ModelDescriptor, RecordOrigin, Value};
use crate::source::Line;

/// Pull interface shared by every reader layout. Single pass, forward only.
pub trait RecordReader<M> {
    /// Next record, `None` once the input is exhausted. A record-level error
    /// consumes only the offending record; reading may continue afterwards.
    fn read_record(&mut self) -> Result<Option<M>, ImportError>;

    /// Releases the underlying file. Safe to call more than once.
    fn close(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinePosition {
    BeforeHeader,
    AfterHeader,
}

/// Reader-specific exclusion rule, evaluated after the blank/comment checks.
pub type SkipRule = fn(&Line, LinePosition) -> bool;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineClass {
    Skippable,
    Header,
    Data,
}

pub fn classify(line: &Line, header_seen: bool, skip_rule: Option<SkipRule>) -> LineClass {
    if line.is_blank() || line.first_cell().trim_start().starts_with('#') {
        return LineClass::Skippable;
    }
    let position = if header_seen {
        LinePosition::AfterHeader
    } else {
        LinePosition::BeforeHeader
    };
    if skip_rule.is_some_and(|rule| rule(line, position)) {
        return LineClass::Skippable;
    }
    if header_seen {
        LineClass::Data
    } else {
        LineClass::Header
    }
}

/// Everything a reader needs besides the file itself.
#[derive(Clone)]
pub struct ReaderContext {
    pub descriptor: ModelDescriptor,
    pub conversion: Arc<dyn ConversionService>,
    pub origin: RecordOrigin,
    pub skip_rule: Option<SkipRule>,
}

impl ReaderContext {
    pub fn new(
        descriptor: ModelDescriptor,
        conversion: Arc<dyn ConversionService>,
        origin: RecordOrigin,
    ) -> Self {
        Self {
            descriptor,
            conversion,
            origin,
            skip_rule: None,
        }
    }

    pub fn with_skip_rule(mut self, rule: SkipRule) -> Self {
        self.skip_rule = Some(rule);
        self
    }

    /// Converts one cell; null-like cells yield `None`.
    pub(crate) fn convert_cell(
        &self,
        field: &FieldDescriptor,
        raw: &str,
        line: u64,
    ) -> Result<Option<Value>, ImportError> {
        let trimmed = raw.trim();
        if is_null(trimmed) {
            return Ok(None);
        }
        self.conversion
            .convert(trimmed, field.kind)
            .map(Some)
            .map_err(|failure| failure.at(line, field.name, trimmed, field.kind))
    }
}

pub(crate) fn is_null(value: &str) -> bool {
    value.is_empty()
        || value.eq_ignore_ascii_case("na")
        || value.eq_ignore_ascii_case("n/a")
        || value.eq_ignore_ascii_case("null")
}

/// How a data type lays its records out in a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderLayout {
    Tabular,
    Columnar,
    Matrix(MatrixLayout),
}

pub fn open_reader<M: Model>(
    layout: ReaderLayout,
    path: &Path,
    context: ReaderContext,
) -> Result<Box<dyn RecordReader<M>>, ImportError> {
    Ok(match layout {
        ReaderLayout::Tabular => Box::new(TabularReader::<M>::open(path, context)?),
        ReaderLayout::Columnar => Box::new(ColumnarReader::<M>::open(path, context)?),
        ReaderLayout::Matrix(matrix) => Box::new(MatrixReader::<M>::open(path, context, matrix)?),
    })
}

/// GCT expression files carry a `rows<TAB>columns` line before the header.
pub fn gct_dimension_line(line: &Line, position: LinePosition) -> bool {
    position == LinePosition::BeforeHeader
        && line
            .cells
            .iter()
            .filter(|cell| !cell.trim().is_empty())
            .all(|cell| cell.trim().parse::<u64>().is_ok())
}
