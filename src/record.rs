use crate::error::{Error, Result};
use csv::{ReaderBuilder, StringRecord};
use serde::ser::{Serialize, SerializeMap, Serializer};
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// One data row as an ordered mapping from header name to value.
///
/// The header is shared between all records produced by the same source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    headers: Arc<StringRecord>,
    values: StringRecord,
}

impl Record {
    pub(crate) fn new(headers: Arc<StringRecord>, values: StringRecord) -> Self {
        Self { headers, values }
    }

    /// Builds a record from `(name, value)` pairs, keeping their order.
    #[must_use]
    pub fn from_pairs<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut headers = StringRecord::new();
        let mut values = StringRecord::new();
        for (key, value) in pairs {
            headers.push_field(key.as_ref());
            values.push_field(value.as_ref());
        }
        Self::new(Arc::new(headers), values)
    }

    /// Returns the value of `name`.
    ///
    /// When the header repeats a name, the rightmost column wins.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .enumerate()
            .filter(|(_, h)| *h == name)
            .last()
            .and_then(|(idx, _)| self.values.get(idx))
    }

    /// Iterates over `(name, value)` pairs in column order, skipping
    /// columns shadowed by a later duplicate header.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.headers
            .iter()
            .zip(self.values.iter())
            .enumerate()
            .filter(|(idx, (name, _))| !self.is_shadowed(*idx, name))
            .map(|(_, pair)| pair)
    }

    /// Number of distinct fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.iter().count()
    }

    /// Returns true if the record has no fields.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns a record with the same header and every value mapped by `f`.
    #[must_use]
    pub fn map_values(&self, f: impl Fn(&str) -> String) -> Self {
        let values: StringRecord = self.values.iter().map(f).collect();
        Self::new(Arc::clone(&self.headers), values)
    }

    fn is_shadowed(&self, idx: usize, name: &str) -> bool {
        self.headers.iter().skip(idx + 1).any(|h| h == name)
    }
}

impl Serialize for Record {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.len()))?;
        for (name, value) in self.iter() {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

/// Lazy, single-pass reader of CSV records.
///
/// The first line is the header; every subsequent line must have exactly as
/// many fields as the header.
pub struct RecordSource {
    reader: csv::Reader<Box<dyn Read>>,
    headers: Arc<StringRecord>,
    next_row: usize,
}

impl RecordSource {
    /// Opens a CSV file, or standard input when `path` is `None`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or the header is
    /// malformed.
    pub fn open(path: Option<&Path>, delimiter: u8) -> Result<Self> {
        match path {
            Some(path) => {
                debug!("Reading records from {}", path.display());
                let file = File::open(path).map_err(|e| Error::io(path, e))?;
                Self::from_reader(BufReader::new(file), delimiter)
            }
            None => {
                debug!("Reading records from stdin");
                Self::from_reader(io::stdin().lock(), delimiter)
            }
        }
    }

    /// Wraps any reader producing delimited text.
    ///
    /// # Errors
    ///
    /// Returns an error if the header row cannot be decoded.
    pub fn from_reader(reader: impl Read + 'static, delimiter: u8) -> Result<Self> {
        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .flexible(false)
            .delimiter(delimiter)
            .from_reader(Box::new(reader) as Box<dyn Read>);

        let headers = reader
            .headers()
            .map_err(|e| Error::data_format(None, &e))?
            .clone();

        Ok(Self {
            reader,
            headers: Arc::new(headers),
            next_row: 1,
        })
    }

    /// The header row naming every field.
    #[must_use]
    pub fn headers(&self) -> &StringRecord {
        &self.headers
    }
}

impl Iterator for RecordSource {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut values = StringRecord::new();
        let row = self.next_row;
        match self.reader.read_record(&mut values) {
            Ok(true) => {
                self.next_row += 1;
                Some(Ok(Record::new(Arc::clone(&self.headers), values)))
            }
            Ok(false) => None,
            Err(e) => Some(Err(Error::data_format(Some(row), &e))),
        }
    }
}
