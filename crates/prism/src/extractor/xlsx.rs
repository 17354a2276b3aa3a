//! `.xlsx` workbooks read straight from the OOXML package (zip + XML).
//! Only the first sheet is extracted; the rest are counted.

use std::io::{Cursor, Read, Seek};

use log::info;
use quick_xml::escape::resolve_predefined_entity;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use super::{CellValue, ContentReader, FileFormat, RawContent, SourceFile, Table};
use crate::error::ExtractError;

pub struct XlsxReader;

impl XlsxReader {
    pub fn new() -> Self {
        Self
    }
}

impl Default for XlsxReader {
    fn default() -> Self {
        Self::new()
    }
}

impl ContentReader for XlsxReader {
    fn read(&self, source: SourceFile<'_>) -> Result<RawContent, ExtractError> {
        let mut archive = zip::ZipArchive::new(Cursor::new(source.bytes))
            .map_err(|e| ExtractError::Workbook(format!("Failed to open workbook: {}", e)))?;

        let sheets = parse_workbook(&read_entry(&mut archive, "xl/workbook.xml")?)?;
        let first = sheets
            .first()
            .ok_or_else(|| ExtractError::Workbook("Workbook has no sheets".to_string()))?;

        let rels = parse_relationships(&read_entry(&mut archive, "xl/_rels/workbook.xml.rels")?)?;
        let target = rels
            .iter()
            .find(|(id, _)| *id == first.rel_id)
            .map(|(_, target)| sheet_entry_path(target))
            .unwrap_or_else(|| "xl/worksheets/sheet1.xml".to_string());

        let shared = match read_entry(&mut archive, "xl/sharedStrings.xml") {
            Ok(xml) => parse_shared_strings(&xml)?,
            Err(_) => Vec::new(),
        };

        let grid = parse_sheet(&read_entry(&mut archive, &target)?, &shared)?;
        let mut rows = grid.into_iter();
        let headers = rows
            .next()
            .unwrap_or_default()
            .iter()
            .map(|c| c.as_text())
            .collect();
        let table = Table::new(headers, rows.collect());

        let mut metadata = source.metadata;
        metadata.sheet_name = Some(first.name.clone());
        metadata.sheet_count = Some(sheets.len());
        metadata.sheets_ignored = Some(sheets.len() - 1);
        if sheets.len() > 1 {
            info!(
                "Workbook {} has {} sheets; only '{}' was extracted",
                metadata.filename,
                sheets.len(),
                first.name
            );
        }

        Ok(RawContent {
            format: FileFormat::Spreadsheet,
            table,
            text: None,
            metadata,
        })
    }

    fn supports(&self, format: FileFormat) -> bool {
        matches!(format, FileFormat::Spreadsheet)
    }
}

fn read_entry<R: Read + Seek>(
    archive: &mut zip::ZipArchive<R>,
    name: &str,
) -> Result<String, ExtractError> {
    let mut entry = archive
        .by_name(name)
        .map_err(|e| ExtractError::Workbook(format!("Failed to find {}: {}", name, e)))?;
    let mut xml = String::new();
    entry
        .read_to_string(&mut xml)
        .map_err(|e| ExtractError::Workbook(format!("Failed to read {}: {}", name, e)))?;
    Ok(xml)
}

struct SheetRef {
    name: String,
    rel_id: String,
}

fn attr(e: &BytesStart<'_>, local: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.local_name().as_ref() == local)
        .and_then(|a| a.unescape_value().ok())
        .map(|v| v.into_owned())
}

fn xml_error(e: impl std::fmt::Display) -> ExtractError {
    ExtractError::Workbook(format!("XML parsing error: {}", e))
}

fn parse_workbook(xml: &str) -> Result<Vec<SheetRef>, ExtractError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut sheets = Vec::new();
    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) | Ok(Event::Empty(ref e))
                if e.local_name().as_ref() == b"sheet" =>
            {
                // The relationship id lives in the `r:` namespace.
                let rel_id = e
                    .attributes()
                    .flatten()
                    .find(|a| a.key.as_ref().ends_with(b":id") || a.key.as_ref() == b"id")
                    .map(|a| String::from_utf8_lossy(&a.value).into_owned())
                    .unwrap_or_default();
                sheets.push(SheetRef {
                    name: attr(e, b"name").unwrap_or_else(|| format!("Sheet{}", sheets.len() + 1)),
                    rel_id,
                });
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(xml_error(e)),
            _ => {}
        }
    }
    Ok(sheets)
}

fn parse_relationships(xml: &str) -> Result<Vec<(String, String)>, ExtractError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut rels = Vec::new();
    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) | Ok(Event::Empty(ref e))
                if e.local_name().as_ref() == b"Relationship" =>
            {
                if let (Some(id), Some(target)) = (attr(e, b"Id"), attr(e, b"Target")) {
                    rels.push((id, target));
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(xml_error(e)),
            _ => {}
        }
    }
    Ok(rels)
}

fn sheet_entry_path(target: &str) -> String {
    match target.strip_prefix('/') {
        Some(absolute) => absolute.to_string(),
        None => format!("xl/{}", target),
    }
}

/// Collects character data between events. Entity and character
/// references arrive as separate `GeneralRef` events.
fn push_text(buf: &mut String, event: &Event<'_>) {
    match event {
        Event::Text(t) => {
            if let Ok(text) = t.decode() {
                buf.push_str(&text);
            }
        }
        Event::CData(c) => {
            if let Ok(text) = c.decode() {
                buf.push_str(&text);
            }
        }
        Event::GeneralRef(r) => match r.resolve_char_ref() {
            Ok(Some(c)) => buf.push(c),
            _ => {
                let name = r.decode().unwrap_or_default();
                match resolve_predefined_entity(&name) {
                    Some(value) => buf.push_str(value),
                    None => {
                        buf.push('&');
                        buf.push_str(&name);
                        buf.push(';');
                    }
                }
            }
        },
        _ => {}
    }
}

fn parse_shared_strings(xml: &str) -> Result<Vec<String>, ExtractError> {
    let mut reader = Reader::from_str(xml);

    let mut strings = Vec::new();
    let mut current = String::new();
    let mut in_item = false;
    let mut in_text = false;
    let mut in_phonetic = false;

    loop {
        let event = reader.read_event().map_err(xml_error)?;
        match &event {
            Event::Start(e) => match e.local_name().as_ref() {
                b"si" => {
                    in_item = true;
                    current.clear();
                }
                b"t" => in_text = true,
                b"rPh" => in_phonetic = true,
                _ => {}
            },
            Event::Empty(e) if e.local_name().as_ref() == b"si" => strings.push(String::new()),
            Event::End(e) => match e.local_name().as_ref() {
                b"si" => {
                    in_item = false;
                    strings.push(std::mem::take(&mut current));
                }
                b"t" => in_text = false,
                b"rPh" => in_phonetic = false,
                _ => {}
            },
            Event::Eof => break,
            other => {
                if in_item && in_text && !in_phonetic {
                    push_text(&mut current, other);
                }
            }
        }
    }
    Ok(strings)
}

/// Widest sheet the format allows (`XFD`).
const MAX_COLUMNS: usize = 16_384;

/// Zero-based column index from a cell reference such as `AB12`. `None`
/// for references past `XFD`.
fn column_index(cell_ref: &str) -> Option<usize> {
    let letters = cell_ref
        .bytes()
        .take_while(|b| b.is_ascii_alphabetic())
        .map(|b| b.to_ascii_uppercase());
    let mut index = 0usize;
    let mut count = 0;
    for b in letters {
        count += 1;
        if count > 3 {
            return None;
        }
        index = index
            .checked_mul(26)?
            .checked_add((b - b'A' + 1) as usize)?;
    }
    if count == 0 || index > MAX_COLUMNS {
        return None;
    }
    Some(index - 1)
}

#[derive(Default)]
struct PendingCell {
    column: Option<usize>,
    cell_type: String,
    value: String,
}

impl PendingCell {
    fn resolve(&self, shared: &[String]) -> CellValue {
        match self.cell_type.as_str() {
            "s" => self
                .value
                .trim()
                .parse::<usize>()
                .ok()
                .and_then(|i| shared.get(i))
                .map(|s| CellValue::parse(s))
                .unwrap_or(CellValue::Empty),
            "b" => CellValue::Bool(self.value.trim() == "1"),
            "str" | "inlineStr" => CellValue::parse(&self.value),
            "e" => CellValue::Empty,
            _ => match self.value.trim().parse::<f64>() {
                Ok(n) => CellValue::Number(n),
                Err(_) => CellValue::parse(&self.value),
            },
        }
    }
}

fn parse_sheet(xml: &str, shared: &[String]) -> Result<Vec<Vec<CellValue>>, ExtractError> {
    let mut reader = Reader::from_str(xml);

    let mut rows: Vec<Vec<CellValue>> = Vec::new();
    let mut row: Vec<CellValue> = Vec::new();
    let mut cell: Option<PendingCell> = None;
    let mut capture = false;

    let place = |row: &mut Vec<CellValue>, pending: &PendingCell| {
        let idx = pending.column.unwrap_or(row.len());
        if idx >= MAX_COLUMNS {
            return;
        }
        if idx >= row.len() {
            row.resize(idx + 1, CellValue::Empty);
        }
        row[idx] = pending.resolve(shared);
    };

    loop {
        let event = reader.read_event().map_err(xml_error)?;
        match &event {
            Event::Start(e) => match e.local_name().as_ref() {
                b"row" => row = Vec::new(),
                b"c" => {
                    cell = Some(PendingCell {
                        column: attr(e, b"r").and_then(|r| column_index(&r)),
                        cell_type: attr(e, b"t").unwrap_or_default(),
                        value: String::new(),
                    })
                }
                b"v" | b"t" => capture = cell.is_some(),
                _ => {}
            },
            Event::Empty(e) => match e.local_name().as_ref() {
                b"row" => rows.push(Vec::new()),
                b"c" => {
                    let pending = PendingCell {
                        column: attr(e, b"r").and_then(|r| column_index(&r)),
                        ..Default::default()
                    };
                    place(&mut row, &pending);
                }
                _ => {}
            },
            Event::End(e) => match e.local_name().as_ref() {
                b"row" => rows.push(std::mem::take(&mut row)),
                b"c" => {
                    if let Some(pending) = cell.take() {
                        place(&mut row, &pending);
                    }
                }
                b"v" | b"t" => capture = false,
                _ => {}
            },
            Event::Eof => break,
            other => {
                if capture {
                    if let Some(pending) = cell.as_mut() {
                        push_text(&mut pending.value, other);
                    }
                }
            }
        }
    }
    Ok(rows)
}
