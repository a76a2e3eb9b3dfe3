use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use crate::error::ImportError;
use crate::model::{FieldDescriptor, FieldValues, Model};
use crate::source::{Line, LineSource};

use super::header::check_required;
use super::{LineClass, ReaderContext, RecordReader, classify, is_null};

/// One record per column: the first cell of every line names a field and
/// each following column holds one record, as in transposed sample sheets.
///
/// The whole file has to be seen before the first record is complete, so
/// the rows are buffered on the first read and the file is closed
/// immediately afterwards.
pub struct ColumnarReader<M> {
    source: LineSource,
    path: PathBuf,
    context: ReaderContext,
    rows: Option<Vec<FieldRow>>,
    next_column: usize,
    width: usize,
    _model: PhantomData<fn() -> M>,
}

struct FieldRow {
    field: FieldDescriptor,
    line: Line,
}

impl<M: Model> ColumnarReader<M> {
    pub fn open(path: &Path, context: ReaderContext) -> Result<Self, ImportError> {
        Ok(Self {
            source: LineSource::open(path)?,
            path: path.to_path_buf(),
            context,
            rows: None,
            next_column: 1,
            width: 0,
            _model: PhantomData,
        })
    }

    fn load(&mut self) -> Result<(), ImportError> {
        let mut rows: Vec<FieldRow> = Vec::new();
        while let Some(line) = self.source.next_line()? {
            // Every non-skippable line is a header for its own row.
            if classify(&line, false, self.context.skip_rule) == LineClass::Skippable {
                continue;
            }
            let Some(field) = self.context.descriptor.field_for_header(line.first_cell()) else {
                continue;
            };
            if rows.iter().any(|row| row.field.name == field.name) {
                continue;
            }
            rows.push(FieldRow {
                field: field.clone(),
                line,
            });
        }
        self.source.close();

        for field in self.context.descriptor.required_fields() {
            if !rows.iter().any(|row| row.field.name == field.name) {
                return Err(ImportError::MissingColumn {
                    path: self.path.clone(),
                    field: field.name.to_string(),
                });
            }
        }

        self.width = rows.iter().map(|row| row.line.cells.len()).max().unwrap_or(0);
        self.rows = Some(rows);
        Ok(())
    }

    fn column_is_empty(rows: &[FieldRow], column: usize) -> bool {
        rows.iter().all(|row| {
            row.line
                .cells
                .get(column)
                .map(|cell| is_null(cell.trim()))
                .unwrap_or(true)
        })
    }
}

impl<M: Model> RecordReader<M> for ColumnarReader<M> {
    fn read_record(&mut self) -> Result<Option<M>, ImportError> {
        if self.rows.is_none() {
            self.load()?;
        }
        let Some(rows) = self.rows.as_ref() else {
            return Ok(None);
        };

        while self.next_column < self.width {
            let column = self.next_column;
            self.next_column += 1;
            if Self::column_is_empty(rows, column) {
                continue;
            }

            let ordinal = (column - 1) as u64;
            let first_line = rows.first().map(|row| row.line.number).unwrap_or_default();
            let mut values = FieldValues::new(first_line);
            for row in rows {
                let raw = row.line.cells.get(column).map(String::as_str).unwrap_or("");
                if let Some(value) = self.context.convert_cell(&row.field, raw, row.line.number)? {
                    values.insert(row.field.name, value);
                }
            }
            check_required(&self.context.descriptor, &values)?;
            return M::from_fields(&values, &self.context.origin, ordinal).map(Some);
        }
        Ok(None)
    }

    fn close(&mut self) {
        self.source.close();
    }
}
