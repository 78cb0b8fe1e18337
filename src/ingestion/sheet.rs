//! Sheet reader - accepts one spreadsheet sheet exported as CSV.

use std::io::Read;
use std::path::Path;

use csv::ReaderBuilder;

use crate::error::Result;

/// One sheet of the uploaded workbook: a header row plus string cells.
///
/// Cells are kept verbatim; trimming and coercion belong to the normalizer.
#[derive(Debug, Clone, PartialEq)]
pub struct RawSheet {
    pub name: String,
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl RawSheet {
    pub fn new(name: impl Into<String>, headers: Vec<String>, rows: Vec<Vec<String>>) -> Self {
        Self {
            name: name.into(),
            headers,
            rows,
        }
    }

    /// Read a sheet from CSV text. Short records are padded with empty cells.
    pub fn from_reader<R: Read>(name: impl Into<String>, reader: R) -> Result<Self> {
        let mut rdr = ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(reader);

        let headers = rdr
            .headers()?
            .iter()
            .map(|h| h.trim_start_matches('\u{feff}').to_string())
            .collect::<Vec<_>>();

        let mut rows = Vec::new();
        for record in rdr.records() {
            let record = record?;
            let mut row: Vec<String> = record.iter().map(str::to_string).collect();
            row.resize(headers.len(), String::new());
            rows.push(row);
        }

        Ok(Self::new(name, headers, rows))
    }

    pub fn from_bytes(name: impl Into<String>, bytes: &[u8]) -> Result<Self> {
        Self::from_reader(name, bytes)
    }

    pub fn from_path(name: impl Into<String>, path: impl AsRef<Path>) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        Self::from_reader(name, file)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reads_headers_and_pads_short_rows() {
        let csv = "\u{feff}campaign , category,country\nBrand,Search,KR\nGeneric,Display\n";
        let sheet = RawSheet::from_bytes("index", csv.as_bytes()).unwrap();
        assert_eq!(sheet.headers, vec!["campaign ", " category", "country"]);
        assert_eq!(sheet.len(), 2);
        assert_eq!(sheet.rows[1], vec!["Generic", "Display", ""]);
    }

    #[test]
    fn test_quoted_thousands_survive() {
        let csv = "cost\n\"1,200\"\n";
        let sheet = RawSheet::from_bytes("raw", csv.as_bytes()).unwrap();
        assert_eq!(sheet.rows[0][0], "1,200");
    }
}
