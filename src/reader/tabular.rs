use std::marker::PhantomData;
use std::path::Path;

use crate::error::ImportError;
use crate::model::Model;
use crate::source::LineSource;

use super::header::check_required;
use super::{HeaderMap, LineClass, ReaderContext, RecordReader, classify};

/// One record per data line.
pub struct TabularReader<M> {
    source: LineSource,
    context: ReaderContext,
    header: Option<HeaderMap>,
    ordinal: u64,
    _model: PhantomData<fn() -> M>,
}

impl<M: Model> TabularReader<M> {
    pub fn open(path: &Path, context: ReaderContext) -> Result<Self, ImportError> {
        Ok(Self {
            source: LineSource::open(path)?,
            context,
            header: None,
            ordinal: 0,
            _model: PhantomData,
        })
    }
}

impl<M: Model> RecordReader<M> for TabularReader<M> {
    fn read_record(&mut self) -> Result<Option<M>, ImportError> {
        while let Some(line) = self.source.next_line()? {
            match classify(&line, self.header.is_some(), self.context.skip_rule) {
                LineClass::Skippable => continue,
                LineClass::Header => {
                    let header = HeaderMap::build(&self.context.descriptor, &line.cells, &[]);
                    header.ensure_required(&self.context.descriptor, &[], self.source.path())?;
                    self.header = Some(header);
                }
                LineClass::Data => {
                    let Some(header) = self.header.as_ref() else {
                        continue;
                    };
                    let ordinal = self.ordinal;
                    self.ordinal += 1;
                    let values = header.convert_line(&line, &self.context)?;
                    check_required(&self.context.descriptor, &values)?;
                    return M::from_fields(&values, &self.context.origin, ordinal).map(Some);
                }
            }
        }
        Ok(None)
    }

    fn close(&mut self) {
        self.source.close();
    }
}
