//! Formats without content extraction. They still produce a valid
//! [`RawContent`] so the report moves through the pipeline.

use log::debug;

use super::{ContentReader, FileFormat, RawContent, SourceFile};
use crate::error::ExtractError;

/// PDF: text extraction is not supported yet; records the page count when
/// the document structure can be parsed.
pub struct PdfPlaceholder;

impl PdfPlaceholder {
    pub fn new() -> Self {
        Self
    }
}

impl Default for PdfPlaceholder {
    fn default() -> Self {
        Self::new()
    }
}

impl ContentReader for PdfPlaceholder {
    fn read(&self, source: SourceFile<'_>) -> Result<RawContent, ExtractError> {
        let mut metadata = source.metadata;
        match lopdf::Document::load_mem(source.bytes) {
            Ok(doc) => metadata.page_count = Some(doc.get_pages().len()),
            Err(e) => debug!("Could not parse PDF structure of {}: {}", metadata.filename, e),
        }
        metadata.note = Some("PDF text extraction is not supported yet; metadata only".to_string());
        Ok(RawContent::metadata_only(FileFormat::Pdf, metadata))
    }

    fn supports(&self, format: FileFormat) -> bool {
        matches!(format, FileFormat::Pdf)
    }
}

/// Legacy `.xls` workbooks and unrecognised binaries.
pub struct MetadataOnly;

impl MetadataOnly {
    pub fn new() -> Self {
        Self
    }
}

impl Default for MetadataOnly {
    fn default() -> Self {
        Self::new()
    }
}

impl ContentReader for MetadataOnly {
    fn read(&self, source: SourceFile<'_>) -> Result<RawContent, ExtractError> {
        let format = super::FileFormat::from_path(source.path);
        let mut metadata = source.metadata;
        metadata.note = Some(match format {
            FileFormat::LegacySpreadsheet => {
                "legacy .xls workbooks are not parsed; save as .xlsx or .csv for full analysis"
                    .to_string()
            }
            _ => "unsupported binary format; metadata only".to_string(),
        });
        Ok(RawContent::metadata_only(format, metadata))
    }

    fn supports(&self, format: FileFormat) -> bool {
        matches!(format, FileFormat::LegacySpreadsheet | FileFormat::Unknown)
    }
}
