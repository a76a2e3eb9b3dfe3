use std::path::Path;

use tracing::debug;

use crate::error::ImportError;
use crate::model::{FieldDescriptor, FieldValues, ModelDescriptor};
use crate::source::Line;

use super::ReaderContext;

/// Column index to field mapping built from a header line.
#[derive(Debug, Clone, Default)]
pub struct HeaderMap {
    columns: Vec<(usize, FieldDescriptor)>,
    unmatched: Vec<usize>,
}

impl HeaderMap {
    /// Matches header cells against `descriptor`, skipping the fields named
    /// in `excluded`. A field binds to the first column that names it; later
    /// duplicates count as unmatched.
    pub fn build(descriptor: &ModelDescriptor, cells: &[String], excluded: &[&str]) -> Self {
        let mut map = HeaderMap::default();
        for (index, cell) in cells.iter().enumerate() {
            let field = descriptor
                .field_for_header(cell)
                .filter(|field| !excluded.contains(&field.name))
                .filter(|field| map.column_of(field.name).is_none());
            match field {
                Some(field) => map.columns.push((index, field.clone())),
                None => map.unmatched.push(index),
            }
        }
        debug!(
            model = descriptor.name,
            mapped = map.columns.len(),
            unmatched = map.unmatched.len(),
            "parsed header"
        );
        map
    }

    /// Fails when a required field (other than `excluded`) has no column.
    pub fn ensure_required(
        &self,
        descriptor: &ModelDescriptor,
        excluded: &[&str],
        path: &Path,
    ) -> Result<(), ImportError> {
        for field in descriptor.required_fields() {
            if excluded.contains(&field.name) {
                continue;
            }
            if self.column_of(field.name).is_none() {
                return Err(ImportError::MissingColumn {
                    path: path.to_path_buf(),
                    field: field.name.to_string(),
                });
            }
        }
        Ok(())
    }

    pub fn column_of(&self, field: &str) -> Option<usize> {
        self.columns
            .iter()
            .find(|(_, descriptor)| descriptor.name == field)
            .map(|(index, _)| *index)
    }

    pub fn unmatched(&self) -> &[usize] {
        &self.unmatched
    }

    /// Converts the mapped cells of `line`. Cells beyond the end of a short
    /// line count as empty.
    pub fn convert_line(
        &self,
        line: &Line,
        context: &ReaderContext,
    ) -> Result<FieldValues, ImportError> {
        let mut values = FieldValues::new(line.number);
        for (index, field) in &self.columns {
            let raw = line.cells.get(*index).map(String::as_str).unwrap_or("");
            if let Some(value) = context.convert_cell(field, raw, line.number)? {
                values.insert(field.name, value);
            }
        }
        Ok(values)
    }
}

/// Fails with `MissingValue` for the first absent required field.
pub(crate) fn check_required(
    descriptor: &ModelDescriptor,
    values: &FieldValues,
) -> Result<(), ImportError> {
    match descriptor
        .required_fields()
        .find(|field| !values.contains(field.name))
    {
        Some(field) => Err(ImportError::MissingValue {
            line: values.line(),
            field: field.name.to_string(),
        }),
        None => Ok(()),
    }
}
