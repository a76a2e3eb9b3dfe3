use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use csv::{ReaderBuilder, StringRecord};
use flate2::read::MultiGzDecoder;

use crate::error::ImportError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineFormat {
    /// Tab separated, no quoting.
    Tsv,
    /// Comma separated with RFC 4180 quoting.
    Csv,
}

impl LineFormat {
    /// `.csv` and `.csv.gz` are comma separated, everything else tab
    /// separated.
    pub fn detect(path: &Path) -> Self {
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        let name = name.strip_suffix(".gz").unwrap_or(&name);
        if name.ends_with(".csv") {
            LineFormat::Csv
        } else {
            LineFormat::Tsv
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Line {
    /// One-based physical line number of the first byte of the record.
    pub number: u64,
    pub cells: Vec<String>,
}

impl Line {
    pub fn is_blank(&self) -> bool {
        self.cells.iter().all(|cell| cell.trim().is_empty())
    }

    pub fn first_cell(&self) -> &str {
        self.cells.first().map(String::as_str).unwrap_or("")
    }
}

pub struct LineSource {
    path: PathBuf,
    reader: Option<csv::Reader<Box<dyn Read>>>,
    record: StringRecord,
}

impl LineSource {
    pub fn open(path: &Path) -> Result<Self, ImportError> {
        Self::open_with(path, LineFormat::detect(path))
    }

    fn open_with(path: &Path, format: LineFormat) -> Result<Self, ImportError> {
        if path.is_dir() {
            return Err(ImportError::invalid_source(path, "is a directory"));
        }
        let file = File::open(path).map_err(|err| ImportError::invalid_source(path, err))?;
        let input: Box<dyn Read> = if is_gzip(path) {
            Box::new(MultiGzDecoder::new(BufReader::new(file)))
        } else {
            Box::new(BufReader::new(file))
        };

        let mut builder = ReaderBuilder::new();
        builder.has_headers(false).flexible(true);
        match format {
            LineFormat::Tsv => builder.delimiter(b'\t').quoting(false),
            LineFormat::Csv => builder.delimiter(b',').quoting(true),
        };

        Ok(Self {
            path: path.to_path_buf(),
            reader: Some(builder.from_reader(input)),
            record: StringRecord::new(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_open(&self) -> bool {
        self.reader.is_some()
    }

    /// Next line split into cells, or `None` at end of input or after close.
    pub fn next_line(&mut self) -> Result<Option<Line>, ImportError> {
        let Some(reader) = self.reader.as_mut() else {
            return Ok(None);
        };
        let more = reader
            .read_record(&mut self.record)
            .map_err(|err| ImportError::invalid_source(&self.path, err))?;
        if !more {
            return Ok(None);
        }
        let number = self
            .record
            .position()
            .map(|position| position.line())
            .unwrap_or_default();
        let cells = self
            .record
            .iter()
            .map(|cell| cell.trim_end_matches('\r').to_string())
            .collect();
        Ok(Some(Line { number, cells }))
    }

    /// Releases the file handle. Safe to call more than once.
    pub fn close(&mut self) {
        self.reader = None;
    }
}

fn is_gzip(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.eq_ignore_ascii_case("gz"))
        .unwrap_or(false)
}
