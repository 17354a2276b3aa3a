//! File extraction: raw bytes → normalized table and/or text.
//!
//! Each container format has a [`ContentReader`]; the registry routes a path
//! to the first reader that supports its format. Formats without a real
//! reader (PDF, legacy `.xls`, unknown binaries) produce a metadata-only
//! result instead of an error.

pub mod cell;
pub mod delimited;
pub mod placeholder;
pub mod quality;
pub mod text;
pub mod xlsx;

use std::path::Path;

use log::{debug, warn};
use serde::Serialize;

use crate::analysis::structure::{structure, StructuredData};
use crate::error::ExtractError;
use crate::model::Classification;

pub use cell::{parse_number, CellValue};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FileFormat {
    Delimited,
    Spreadsheet,
    LegacySpreadsheet,
    Text,
    Pdf,
    Unknown,
}

impl FileFormat {
    pub fn from_extension(ext: &str) -> Self {
        match ext.to_ascii_lowercase().as_str() {
            "csv" | "tsv" => FileFormat::Delimited,
            "xlsx" | "xlsm" => FileFormat::Spreadsheet,
            "xls" => FileFormat::LegacySpreadsheet,
            "txt" | "text" | "log" | "md" => FileFormat::Text,
            "pdf" => FileFormat::Pdf,
            _ => FileFormat::Unknown,
        }
    }

    pub fn from_path(path: &Path) -> Self {
        path.extension()
            .and_then(|e| e.to_str())
            .map(Self::from_extension)
            .unwrap_or(FileFormat::Unknown)
    }
}

/// Rows with a header line. Every row is padded to the header width.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Table {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<CellValue>>,
}

impl Table {
    /// Builds a table, naming blank headers `column_N`, padding short rows
    /// and dropping rows with no content.
    pub fn new(headers: Vec<String>, rows: Vec<Vec<CellValue>>) -> Self {
        let width = rows
            .iter()
            .map(|r| r.len())
            .max()
            .unwrap_or(0)
            .max(headers.len());

        let headers = (0..width)
            .map(|i| {
                headers
                    .get(i)
                    .map(|h| h.trim().to_string())
                    .filter(|h| !h.is_empty())
                    .unwrap_or_else(|| format!("column_{}", i + 1))
            })
            .collect();

        let rows = rows
            .into_iter()
            .filter(|row| row.iter().any(|c| !c.is_empty()))
            .map(|mut row| {
                row.resize(width, CellValue::Empty);
                row
            })
            .collect();

        Self { headers, rows }
    }

    pub fn width(&self) -> usize {
        self.headers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, predicate: impl Fn(&str) -> bool) -> Option<usize> {
        self.headers
            .iter()
            .position(|h| predicate(&h.to_ascii_lowercase()))
    }

    /// Header→value maps, one per row.
    pub fn records(&self) -> Vec<serde_json::Map<String, serde_json::Value>> {
        self.rows
            .iter()
            .map(|row| {
                self.headers
                    .iter()
                    .zip(row.iter())
                    .map(|(h, v)| {
                        let value = serde_json::to_value(v).unwrap_or(serde_json::Value::Null);
                        (h.clone(), value)
                    })
                    .collect()
            })
            .collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileMetadata {
    pub filename: String,
    pub size_bytes: u64,
    pub mime_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sheet_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sheet_count: Option<usize>,
    /// Sheets beyond the first; always recorded for workbooks.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sheets_ignored: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delimiter: Option<char>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl FileMetadata {
    pub fn for_file(path: &Path, size_bytes: u64) -> Self {
        Self {
            filename: crate::sanitize::redact_path(path),
            size_bytes,
            mime_type: mime_guess::from_path(path)
                .first_or_octet_stream()
                .essence_str()
                .to_string(),
            ..Default::default()
        }
    }
}

/// Format-level reading result, before classification.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RawContent {
    pub format: FileFormat,
    pub table: Table,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    pub metadata: FileMetadata,
}

impl RawContent {
    pub fn metadata_only(format: FileFormat, metadata: FileMetadata) -> Self {
        Self {
            format,
            table: Table::default(),
            text: None,
            metadata,
        }
    }

    pub fn is_metadata_only(&self) -> bool {
        self.table.is_empty() && self.text.as_deref().map_or(true, |t| t.trim().is_empty())
    }

    /// Bounded textual sample used for classification.
    pub fn sample(&self, max_chars: usize) -> String {
        let mut out = String::new();
        if !self.table.headers.is_empty() && !self.table.is_empty() {
            out.push_str(&self.table.headers.join(" | "));
            out.push('\n');
            for row in &self.table.rows {
                if out.len() >= max_chars {
                    break;
                }
                let line: Vec<String> = row.iter().map(|c| c.as_text()).collect();
                out.push_str(&line.join(" | "));
                out.push('\n');
            }
        } else if let Some(text) = &self.text {
            out.push_str(text);
        } else {
            out.push_str(&format!(
                "[no extractable content: {} ({} bytes)]",
                self.metadata.mime_type, self.metadata.size_bytes
            ));
        }
        truncate_chars(&out, max_chars)
    }
}

pub(crate) fn truncate_chars(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}

/// A file already read into memory.
pub struct SourceFile<'a> {
    pub path: &'a Path,
    pub bytes: &'a [u8],
    pub metadata: FileMetadata,
}

pub trait ContentReader: Send + Sync {
    fn read(&self, source: SourceFile<'_>) -> Result<RawContent, ExtractError>;
    fn supports(&self, format: FileFormat) -> bool;
}

pub struct ExtractorRegistry {
    readers: Vec<Box<dyn ContentReader>>,
}

impl Default for ExtractorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ExtractorRegistry {
    pub fn new() -> Self {
        Self {
            readers: vec![
                Box::new(delimited::DelimitedReader::new()),
                Box::new(xlsx::XlsxReader::new()),
                Box::new(text::TextReader::new()),
                Box::new(placeholder::PdfPlaceholder::new()),
                Box::new(placeholder::MetadataOnly::new()),
            ],
        }
    }

    /// Reads a file into a [`RawContent`]. Parse failures degrade to a
    /// metadata-only result; I/O failures are returned.
    pub fn read(&self, path: &Path) -> Result<RawContent, ExtractError> {
        if !path.exists() {
            return Err(ExtractError::NotFound(path.to_path_buf()));
        }
        let bytes = std::fs::read(path).map_err(|e| ExtractError::ReadDocument {
            path: path.to_path_buf(),
            source: e,
        })?;

        let mut format = FileFormat::from_path(path);
        if format == FileFormat::Unknown && text::looks_like_text(&bytes) {
            debug!(
                "Treating {} as plain text",
                crate::sanitize::redact_path(path)
            );
            format = FileFormat::Text;
        }

        let metadata = FileMetadata::for_file(path, bytes.len() as u64);
        let reader = self
            .readers
            .iter()
            .find(|r| r.supports(format))
            .ok_or_else(|| ExtractError::NoReader(format!("{:?}", format)))?;

        let source = SourceFile {
            path,
            bytes: &bytes,
            metadata: metadata.clone(),
        };

        match reader.read(source) {
            Ok(content) => Ok(content),
            Err(e @ (ExtractError::Delimited(_) | ExtractError::Workbook(_))) => {
                warn!(
                    "Could not parse {}, continuing with metadata only: {}",
                    metadata.filename,
                    e
                );
                let note = format!("content could not be parsed: {}", e);
                Ok(RawContent::metadata_only(
                    format,
                    FileMetadata {
                        note: Some(note),
                        ..metadata
                    },
                ))
            }
            Err(e) => Err(e),
        }
    }

    /// Reads and structures a file for a known classification.
    pub fn extract(
        &self,
        path: &Path,
        classification: &Classification,
    ) -> Result<ExtractedData, ExtractError> {
        let raw = self.read(path)?;
        Ok(ExtractedData::from_raw(raw, classification))
    }
}

/// Normalized rows plus type-specific buckets and a quality score.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractedData {
    pub format: FileFormat,
    pub metadata: FileMetadata,
    pub table: Table,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    pub structured: StructuredData,
    /// In `[0, 1]`.
    pub data_quality: f64,
}

impl ExtractedData {
    pub fn from_raw(raw: RawContent, classification: &Classification) -> Self {
        let structured = structure(&raw.table, raw.text.as_deref(), classification.document_type);
        let data_quality = quality::data_quality(&raw.table);
        Self {
            format: raw.format,
            metadata: raw.metadata,
            table: raw.table,
            text: raw.text,
            structured,
            data_quality,
        }
    }

    /// Summary persisted with the report: metadata, buckets and quality.
    pub fn summary_json(&self) -> serde_json::Value {
        serde_json::json!({
            "format": self.format,
            "metadata": self.metadata,
            "rowCount": self.table.rows.len(),
            "columns": self.table.headers,
            "structured": self.structured,
            "dataQuality": self.data_quality,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::DocumentType;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_format_from_extension() {
        assert_eq!(FileFormat::from_extension("CSV"), FileFormat::Delimited);
        assert_eq!(FileFormat::from_extension("xlsx"), FileFormat::Spreadsheet);
        assert_eq!(FileFormat::from_extension("xls"), FileFormat::LegacySpreadsheet);
        assert_eq!(FileFormat::from_extension("pdf"), FileFormat::Pdf);
        assert_eq!(FileFormat::from_extension("docx"), FileFormat::Unknown);
    }

    #[test]
    fn test_table_pads_rows_and_names_blank_headers() {
        let table = Table::new(
            vec!["Unit".into(), " ".into()],
            vec![
                vec![CellValue::Text("1A".into())],
                vec![CellValue::Empty, CellValue::Empty],
                vec![
                    CellValue::Text("1B".into()),
                    CellValue::Number(1.0),
                    CellValue::Number(2.0),
                ],
            ],
        );
        assert_eq!(table.headers, vec!["Unit", "column_2", "column_3"]);
        assert_eq!(table.rows.len(), 2);
        assert!(table.rows.iter().all(|r| r.len() == 3));
    }

    #[test]
    fn test_registry_routes_csv() {
        let registry = ExtractorRegistry::new();
        let mut file = NamedTempFile::with_suffix(".csv").unwrap();
        writeln!(file, "GL Account,Description,2024-01").unwrap();
        writeln!(file, "4000,Rent Income,50000").unwrap();

        let raw = registry.read(file.path()).unwrap();
        assert_eq!(raw.format, FileFormat::Delimited);
        assert_eq!(raw.table.rows.len(), 1);
        assert_eq!(raw.metadata.mime_type, "text/csv");
    }

    #[test]
    fn test_unknown_binary_degrades_to_metadata_only() {
        let registry = ExtractorRegistry::new();
        let mut file = NamedTempFile::with_suffix(".bin").unwrap();
        file.write_all(&[0u8, 159, 146, 150, 0, 1, 2, 3]).unwrap();

        let raw = registry.read(file.path()).unwrap();
        assert!(raw.is_metadata_only());
        assert_eq!(raw.metadata.size_bytes, 8);
        assert!(raw.metadata.note.is_some());
    }

    #[test]
    fn test_unknown_extension_with_text_is_read_as_text() {
        let registry = ExtractorRegistry::new();
        let mut file = NamedTempFile::with_suffix(".dat").unwrap();
        writeln!(file, "Lease commencement: 2024-01-01").unwrap();

        let raw = registry.read(file.path()).unwrap();
        assert_eq!(raw.format, FileFormat::Text);
        assert!(!raw.is_metadata_only());
    }

    #[test]
    fn test_corrupt_workbook_degrades() {
        let registry = ExtractorRegistry::new();
        let mut file = NamedTempFile::with_suffix(".xlsx").unwrap();
        file.write_all(b"definitely not a zip archive").unwrap();

        let raw = registry.read(file.path()).unwrap();
        assert!(raw.is_metadata_only());
        assert!(raw
            .metadata
            .note
            .as_deref()
            .unwrap()
            .contains("could not be parsed"));
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let registry = ExtractorRegistry::new();
        let result = registry.read(Path::new("/nonexistent/prism/file.csv"));
        assert!(matches!(result, Err(ExtractError::NotFound(_))));
    }

    #[test]
    fn test_extract_scores_quality() {
        let registry = ExtractorRegistry::new();
        let mut file = NamedTempFile::with_suffix(".csv").unwrap();
        writeln!(file, "Unit,Tenant,Rent").unwrap();
        writeln!(file, "101,Smith,1200").unwrap();
        writeln!(file, "102,,1100").unwrap();

        let data = registry
            .extract(file.path(), &Classification::new(DocumentType::RentRoll, 0.9))
            .unwrap();
        assert!(data.data_quality > 0.0 && data.data_quality < 1.0);
    }

    #[test]
    fn test_sample_is_bounded() {
        let raw = RawContent {
            format: FileFormat::Text,
            table: Table::default(),
            text: Some("é".repeat(500)),
            metadata: FileMetadata::default(),
        };
        assert_eq!(raw.sample(100).chars().count(), 100);
    }
}
