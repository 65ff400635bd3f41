use csv::{ByteRecord, ReaderBuilder};
use std::io::Cursor;
use tracing::debug;

use crate::error::PipelineError;

/// A CSV document as parsed, before any validation.
#[derive(Debug, Clone, PartialEq)]
pub struct RawTable {
    /// Column names from the header row exactly as written, minus CSV quoting.
    pub headers: Vec<String>,
    /// Each data row, one String per field. Rows may be shorter or longer than
    /// `headers`.
    pub rows: Vec<Vec<String>>,
}

impl RawTable {
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }
}

fn decode(record: &ByteRecord) -> Vec<String> {
    record
        .iter()
        .map(|field| String::from_utf8_lossy(field).into_owned())
        .collect()
}

/// Parse an uploaded CSV document.
///
/// Blank lines are skipped and ragged rows are kept. Fields are decoded lossily,
/// so a stray non-UTF-8 byte becomes U+FFFD instead of failing the file; whether
/// the header row is acceptable is for the cleaner to decide. An empty document
/// yields no headers.
pub fn parse_csv(data: &[u8]) -> Result<RawTable, PipelineError> {
    let mut rdr = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(Cursor::new(data));

    let headers = decode(
        rdr.byte_headers()
            .map_err(|e| PipelineError::InvalidFileFormat(format!("unreadable CSV header: {}", e)))?,
    );

    let mut rows = Vec::new();
    for (idx, result) in rdr.byte_records().enumerate() {
        let record = result.map_err(|e| {
            PipelineError::InvalidFileFormat(format!("CSV parse error at record {}: {}", idx, e))
        })?;
        rows.push(decode(&record));
    }

    debug!(columns = headers.len(), rows = rows.len(), "parsed CSV");
    Ok(RawTable { headers, rows })
}
