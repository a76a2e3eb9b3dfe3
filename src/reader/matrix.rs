use std::collections::VecDeque;
use std::marker::PhantomData;
use std::path::Path;

use crate::error::ImportError;
use crate::model::{Model, Value};
use crate::source::{Line, LineSource};

use super::header::check_required;
use super::{HeaderMap, LineClass, ReaderContext, RecordReader, classify, is_null};

/// Which fields receive the column header and the cell of a value column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatrixLayout {
    pub column_field: &'static str,
    pub value_field: &'static str,
}

/// Several records per line. Header columns matching the model become
/// line-level fields shared by every record of the line; every other header
/// column is a value column producing one record per non-empty cell.
pub struct MatrixReader<M> {
    source: LineSource,
    context: ReaderContext,
    layout: MatrixLayout,
    header: Option<HeaderMap>,
    value_columns: Vec<(usize, String)>,
    pending: VecDeque<Result<M, ImportError>>,
    ordinal: u64,
    _model: PhantomData<fn() -> M>,
}

impl<M: Model> MatrixReader<M> {
    pub fn open(
        path: &Path,
        context: ReaderContext,
        layout: MatrixLayout,
    ) -> Result<Self, ImportError> {
        Ok(Self {
            source: LineSource::open(path)?,
            context,
            layout,
            header: None,
            value_columns: Vec::new(),
            pending: VecDeque::new(),
            ordinal: 0,
            _model: PhantomData,
        })
    }

    fn excluded(&self) -> [&'static str; 2] {
        [self.layout.column_field, self.layout.value_field]
    }

    fn parse_header(&mut self, line: &Line) -> Result<(), ImportError> {
        let excluded = self.excluded();
        let header = HeaderMap::build(&self.context.descriptor, &line.cells, &excluded);
        header.ensure_required(&self.context.descriptor, &excluded, self.source.path())?;

        self.value_columns = header
            .unmatched()
            .iter()
            .filter_map(|index| {
                let name = line.cells.get(*index)?.trim();
                (!name.is_empty()).then(|| (*index, name.to_string()))
            })
            .collect();
        if self.value_columns.is_empty() {
            return Err(ImportError::MissingColumn {
                path: self.source.path().to_path_buf(),
                field: self.layout.column_field.to_string(),
            });
        }
        self.header = Some(header);
        Ok(())
    }

    fn expand_line(&mut self, line: &Line) {
        let Some(header) = self.header.as_ref() else {
            return;
        };
        let shared = match header.convert_line(line, &self.context) {
            Ok(values) => values,
            Err(err) => {
                self.pending.push_back(Err(err));
                return;
            }
        };

        let descriptor = &self.context.descriptor;
        let (Some(column_field), Some(value_field)) = (
            descriptor.field(self.layout.column_field),
            descriptor.field(self.layout.value_field),
        ) else {
            return;
        };

        for (index, column_name) in &self.value_columns {
            let raw = line.cells.get(*index).map(String::as_str).unwrap_or("");
            if is_null(raw.trim()) {
                continue;
            }
            let ordinal = self.ordinal;
            self.ordinal += 1;

            let record = self
                .context
                .convert_cell(value_field, raw, line.number)
                .and_then(|value| {
                    let mut values = shared.clone();
                    values.insert(column_field.name, Value::Text(column_name.clone()));
                    if let Some(value) = value {
                        values.insert(value_field.name, value);
                    }
                    check_required(descriptor, &values)?;
                    M::from_fields(&values, &self.context.origin, ordinal)
                });
            self.pending.push_back(record);
        }
    }
}

impl<M: Model> RecordReader<M> for MatrixReader<M> {
    fn read_record(&mut self) -> Result<Option<M>, ImportError> {
        loop {
            if let Some(next) = self.pending.pop_front() {
                return next.map(Some);
            }
            let Some(line) = self.source.next_line()? else {
                return Ok(None);
            };
            match classify(&line, self.header.is_some(), self.context.skip_rule) {
                LineClass::Skippable => continue,
                LineClass::Header => self.parse_header(&line)?,
                LineClass::Data => self.expand_line(&line),
            }
        }
    }

    fn close(&mut self) {
        self.pending.clear();
        self.source.close();
    }
}
