use super::{CellValue, ContentReader, FileFormat, RawContent, SourceFile, Table};
use crate::error::ExtractError;

/// Plain text. Each non-blank line becomes a row of a single `line` column
/// so downstream stages see the same shape as tabular formats.
pub struct TextReader;

impl TextReader {
    pub fn new() -> Self {
        Self
    }
}

impl Default for TextReader {
    fn default() -> Self {
        Self::new()
    }
}

impl ContentReader for TextReader {
    fn read(&self, source: SourceFile<'_>) -> Result<RawContent, ExtractError> {
        let text = String::from_utf8_lossy(source.bytes).into_owned();

        let rows = text
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(|l| vec![CellValue::Text(l.to_string())])
            .collect();
        let table = Table::new(vec!["line".to_string()], rows);

        Ok(RawContent {
            format: FileFormat::Text,
            table,
            text: Some(text),
            metadata: source.metadata,
        })
    }

    fn supports(&self, format: FileFormat) -> bool {
        matches!(format, FileFormat::Text)
    }
}

/// Heuristic for files with an unknown extension: valid UTF-8 with almost
/// no control characters.
pub fn looks_like_text(bytes: &[u8]) -> bool {
    let sample = &bytes[..bytes.len().min(8192)];
    if sample.is_empty() {
        return false;
    }
    // A cut through a multi-byte character at the sample edge still counts.
    let text = match std::str::from_utf8(sample) {
        Ok(text) => text,
        Err(e) if e.error_len().is_none() && bytes.len() > sample.len() => {
            match std::str::from_utf8(&sample[..e.valid_up_to()]) {
                Ok(text) => text,
                Err(_) => return false,
            }
        }
        Err(_) => return false,
    };
    let control = text
        .chars()
        .filter(|c| c.is_control() && !matches!(c, '\n' | '\r' | '\t'))
        .count();
    control * 100 <= text.chars().count()
}
