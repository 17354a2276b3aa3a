//! Delimited text (`.csv`, `.tsv`) with delimiter sniffing and header-row
//! detection. Exports from property-management systems often carry a few
//! title lines above the real header.

use csv::ReaderBuilder;

use super::{CellValue, ContentReader, FileFormat, RawContent, SourceFile, Table};
use crate::error::ExtractError;

const CANDIDATE_DELIMITERS: [u8; 4] = [b',', b';', b'\t', b'|'];
const SNIFF_LINES: usize = 10;
const HEADER_SEARCH_ROWS: usize = 10;

pub struct DelimitedReader;

impl DelimitedReader {
    pub fn new() -> Self {
        Self
    }
}

impl Default for DelimitedReader {
    fn default() -> Self {
        Self::new()
    }
}

impl ContentReader for DelimitedReader {
    fn read(&self, source: SourceFile<'_>) -> Result<RawContent, ExtractError> {
        let bytes = strip_bom(source.bytes);
        let delimiter = sniff_delimiter(bytes);

        let mut reader = ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .delimiter(delimiter)
            .from_reader(bytes);

        let mut rows: Vec<Vec<String>> = Vec::new();
        for record in reader.byte_records() {
            let record = record.map_err(|e| ExtractError::Delimited(e.to_string()))?;
            rows.push(
                record
                    .iter()
                    .map(|field| String::from_utf8_lossy(field).into_owned())
                    .collect(),
            );
        }

        let table = build_table(rows);
        let mut metadata = source.metadata;
        metadata.delimiter = Some(delimiter as char);

        Ok(RawContent {
            format: FileFormat::Delimited,
            table,
            text: None,
            metadata,
        })
    }

    fn supports(&self, format: FileFormat) -> bool {
        matches!(format, FileFormat::Delimited)
    }
}

fn strip_bom(bytes: &[u8]) -> &[u8] {
    bytes.strip_prefix(&[0xEF, 0xBB, 0xBF]).unwrap_or(bytes)
}

/// Picks the candidate whose per-line count is non-zero and most
/// consistent across the first lines; comma when nothing qualifies.
pub fn sniff_delimiter(bytes: &[u8]) -> u8 {
    let text = String::from_utf8_lossy(&bytes[..bytes.len().min(16 * 1024)]);
    let lines: Vec<&str> = text
        .lines()
        .filter(|l| !l.trim().is_empty())
        .take(SNIFF_LINES)
        .collect();
    if lines.is_empty() {
        return b',';
    }

    let mut best = (b',', 0usize, 0usize);
    for delimiter in CANDIDATE_DELIMITERS {
        let counts: Vec<usize> = lines
            .iter()
            .map(|l| l.bytes().filter(|b| *b == delimiter).count())
            .collect();
        let max = counts.iter().copied().max().unwrap_or(0);
        if max == 0 {
            continue;
        }
        let consistent = counts.iter().filter(|c| **c == max).count();
        if (consistent, max) > (best.1, best.2) {
            best = (delimiter, consistent, max);
        }
    }
    best.0
}

fn build_table(rows: Vec<Vec<String>>) -> Table {
    let rows: Vec<Vec<String>> = rows
        .into_iter()
        .filter(|r| r.iter().any(|c| !c.trim().is_empty()))
        .collect();
    if rows.is_empty() {
        return Table::default();
    }

    let header_idx = find_header_row(&rows);
    let mut rows = rows.into_iter().skip(header_idx);
    let headers: Vec<String> = rows
        .next()
        .unwrap_or_default()
        .into_iter()
        .map(|h| h.trim().to_string())
        .collect();

    let data = rows
        .map(|row| row.iter().map(|c| CellValue::parse(c)).collect())
        .collect();

    Table::new(headers, data)
}

/// First row, among the leading rows, that is as wide as the widest row
/// and made mostly of non-numeric labels.
fn find_header_row(rows: &[Vec<String>]) -> usize {
    let filled = |row: &Vec<String>| row.iter().filter(|c| !c.trim().is_empty()).count();
    let widest = rows.iter().map(filled).max().unwrap_or(0);
    let threshold = widest.max(2).div_ceil(2).max(widest.saturating_sub(1));

    rows.iter()
        .take(HEADER_SEARCH_ROWS)
        .position(|row| {
            let non_empty: Vec<&String> = row.iter().filter(|c| !c.trim().is_empty()).collect();
            let labels = non_empty
                .iter()
                .filter(|c| super::parse_number(c).is_none())
                .count();
            non_empty.len() >= threshold && labels * 2 >= non_empty.len()
        })
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractor::FileMetadata;
    use std::path::Path;

    fn read(content: &str) -> RawContent {
        DelimitedReader::new()
            .read(SourceFile {
                path: Path::new("report.csv"),
                bytes: content.as_bytes(),
                metadata: FileMetadata::default(),
            })
            .unwrap()
    }

    #[test]
    fn test_sniff_delimiter() {
        assert_eq!(sniff_delimiter(b"a,b,c\n1,2,3\n"), b',');
        assert_eq!(sniff_delimiter(b"a;b;c\n1;2;3\n"), b';');
        assert_eq!(sniff_delimiter(b"a\tb\tc\n1\t2\t3\n"), b'\t');
        assert_eq!(sniff_delimiter(b"single column\n"), b',');
    }

    #[test]
    fn test_reads_headers_and_numbers() {
        let raw = read("GL Account,Description,2024-01\n4000,Rent Income,50000\n");
        assert_eq!(raw.table.headers, vec!["GL Account", "Description", "2024-01"]);
        assert_eq!(
            raw.table.rows[0],
            vec![
                CellValue::Number(4000.0),
                CellValue::Text("Rent Income".into()),
                CellValue::Number(50000.0),
            ]
        );
        assert_eq!(raw.metadata.delimiter, Some(','));
    }

    #[test]
    fn test_skips_title_lines_above_header() {
        let raw = read(
            "Sunset Towers\nRent Roll as of 01/31/2024\n\nUnit,Tenant,Status,Rent\n101,Smith,Occupied,1200\n102,,Vacant,0\n",
        );
        assert_eq!(raw.table.headers, vec!["Unit", "Tenant", "Status", "Rent"]);
        assert_eq!(raw.table.rows.len(), 2);
    }

    #[test]
    fn test_strips_bom_and_quotes() {
        let raw = read("\u{feff}Name,Amount\n\"Doe, Jane\",\"$1,200.00\"\n");
        assert_eq!(raw.table.headers[0], "Name");
        assert_eq!(raw.table.rows[0][0], CellValue::Text("Doe, Jane".into()));
        assert_eq!(raw.table.rows[0][1], CellValue::Number(1200.0));
    }

    #[test]
    fn test_ragged_rows_are_padded() {
        let raw = read("a,b,c\n1,2\n1,2,3,4\n");
        assert_eq!(raw.table.width(), 4);
        assert_eq!(raw.table.rows[0][2], CellValue::Empty);
    }

    #[test]
    fn test_empty_file() {
        let raw = read("");
        assert!(raw.table.is_empty());
    }
}
