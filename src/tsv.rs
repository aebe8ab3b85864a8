//! Tab-separated flat-file reading.
//!
//! Every importer reads its input through [`TsvReader`], which yields
//! records with their 1-based line numbers so that malformed rows can be
//! reported precisely. Files ending in `.gz` are decompressed on the fly.

use std::fs::File;
use std::io::{BufRead, BufReader};

use camino::{Utf8Path, Utf8PathBuf};
use flate2::read::MultiGzDecoder;

use crate::error::BootstrapError;

#[derive(Debug, Clone, PartialEq)]
pub struct TsvRecord {
    pub line: usize,
    pub fields: Vec<String>,
}

impl TsvRecord {
    /// Number of fields, including empty trailing ones.
    pub fn width(&self) -> usize {
        self.fields.len()
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.fields.get(index).map(String::as_str)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ReadOptions {
    pub skip_comments: bool,
    pub skip_blank: bool,
}

impl ReadOptions {
    /// Comment lines (`#`) and blank lines are dropped.
    pub fn annotated() -> Self {
        Self {
            skip_comments: true,
            skip_blank: true,
        }
    }

    /// Every line is a record; used by matrix formats whose first line is a header.
    pub fn raw() -> Self {
        Self::default()
    }
}

pub struct TsvReader {
    path: Utf8PathBuf,
    reader: Box<dyn BufRead>,
    options: ReadOptions,
    line: usize,
}

impl TsvReader {
    pub fn open(path: &Utf8Path, options: ReadOptions) -> Result<Self, BootstrapError> {
        let file = File::open(path.as_std_path())
            .map_err(|err| BootstrapError::Filesystem(format!("open {path}: {err}")))?;
        let reader: Box<dyn BufRead> = if path.extension() == Some("gz") {
            Box::new(BufReader::new(MultiGzDecoder::new(file)))
        } else {
            Box::new(BufReader::new(file))
        };
        Ok(Self {
            path: path.to_owned(),
            reader,
            options,
            line: 0,
        })
    }

    pub fn from_reader(name: &str, reader: impl BufRead + 'static, options: ReadOptions) -> Self {
        Self {
            path: Utf8PathBuf::from(name),
            reader: Box::new(reader),
            options,
            line: 0,
        }
    }

    pub fn malformed(&self, line: usize, message: impl Into<String>) -> BootstrapError {
        BootstrapError::MalformedRow {
            path: self.path.to_string(),
            line,
            message: message.into(),
        }
    }

    pub fn malformed_file(&self, message: impl Into<String>) -> BootstrapError {
        BootstrapError::MalformedFile {
            path: self.path.to_string(),
            message: message.into(),
        }
    }

    /// Reads the next record, or the first line as a header.
    pub fn next_record(&mut self) -> Result<Option<TsvRecord>, BootstrapError> {
        let mut buffer = String::new();
        loop {
            buffer.clear();
            let read = self
                .reader
                .read_line(&mut buffer)
                .map_err(|err| BootstrapError::Filesystem(format!("read {}: {err}", self.path)))?;
            if read == 0 {
                return Ok(None);
            }
            self.line += 1;

            let content = buffer.trim_end_matches(['\r', '\n']);
            if self.options.skip_comments && content.starts_with('#') {
                continue;
            }
            if self.options.skip_blank && content.trim().is_empty() {
                continue;
            }
            return Ok(Some(TsvRecord {
                line: self.line,
                fields: content.split('\t').map(str::to_string).collect(),
            }));
        }
    }
}

impl Iterator for TsvReader {
    type Item = Result<TsvRecord, BootstrapError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_record().transpose()
    }
}

/// Parses a float field, reporting the line and column on failure.
pub fn parse_float(
    reader: &TsvReader,
    line: usize,
    column: usize,
    value: &str,
) -> Result<f64, BootstrapError> {
    value.trim().parse::<f64>().map_err(|_| {
        reader.malformed(
            line,
            format!("column #{column}: value ({value}) is not numeric"),
        )
    })
}
