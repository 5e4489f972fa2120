//! XLSX workbooks read straight from the Office Open XML package.

use std::collections::{BTreeMap, HashMap};
use std::io::{Cursor, Read, Seek};

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use crate::error::ProcessingError;
use crate::security::signature::detect;

use super::csv::coerce_cell;
use super::html::{decode_entities, resolve_entity};
use super::{CellValue, TableData};

/// Upper bound on any single decompressed part.
const MAX_PART_BYTES: u64 = 64 * 1024 * 1024;

/// Excel's own grid limits: columns A..=XFD, rows 1..=1048576.
const MAX_COLUMNS: usize = 16_384;
const MAX_ROWS: usize = 1_048_576;

/// Ceiling on the dense table built from one sheet (populated rows times
/// the widest row).
const MAX_CELLS_PER_SHEET: usize = 1_000_000;

#[derive(Debug, Clone, PartialEq)]
pub struct Workbook {
    pub tables: Vec<TableData>,
    /// Every sheet rendered as tab-separated lines, headed by its name.
    pub text: String,
}

#[derive(Debug)]
struct SheetRef {
    name: String,
    rel_id: Option<String>,
}

pub fn parse_xlsx(bytes: &[u8]) -> Result<Workbook, ProcessingError> {
    if detect(bytes).map(|s| s.name) == Some("ole2") {
        return Err(ProcessingError::UnsupportedFormat(
            "legacy binary XLS workbooks are not supported; save as .xlsx".to_string(),
        ));
    }

    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))
        .map_err(|e| ProcessingError::Spreadsheet(format!("Failed to open workbook: {}", e)))?;

    let workbook_xml = read_part(&mut archive, "xl/workbook.xml")?
        .ok_or_else(|| ProcessingError::Spreadsheet("xl/workbook.xml is missing".to_string()))?;
    let sheets = parse_sheet_list(&workbook_xml)?;

    let targets = match read_part(&mut archive, "xl/_rels/workbook.xml.rels")? {
        Some(xml) => parse_relationships(&xml)?,
        None => HashMap::new(),
    };

    let shared = match read_part(&mut archive, "xl/sharedStrings.xml")? {
        Some(xml) => parse_shared_strings(&xml)?,
        None => Vec::new(),
    };

    let mut tables = Vec::new();
    let mut text = String::new();
    for (index, sheet) in sheets.iter().enumerate() {
        let path = sheet
            .rel_id
            .as_ref()
            .and_then(|id| targets.get(id))
            .map(|target| resolve_target(target))
            .unwrap_or_else(|| format!("xl/worksheets/sheet{}.xml", index + 1));

        let Some(xml) = read_part(&mut archive, &path)? else {
            tracing::warn!(sheet = %sheet.name, part = %path, "Worksheet part missing, skipping");
            continue;
        };

        let grid = parse_sheet(&xml, &shared)?;
        if let Some(table) = grid_to_table(&sheet.name, grid)? {
            render_table(&mut text, &table);
            tables.push(table);
        }
    }

    Ok(Workbook { tables, text })
}

fn read_part<R: Read + Seek>(
    archive: &mut zip::ZipArchive<R>,
    name: &str,
) -> Result<Option<String>, ProcessingError> {
    let file = match archive.by_name(name) {
        Ok(file) => file,
        Err(zip::result::ZipError::FileNotFound) => return Ok(None),
        Err(e) => {
            return Err(ProcessingError::Spreadsheet(format!(
                "Failed to open {}: {}",
                name, e
            )))
        }
    };

    let mut content = String::new();
    file.take(MAX_PART_BYTES)
        .read_to_string(&mut content)
        .map_err(|e| ProcessingError::Spreadsheet(format!("Failed to read {}: {}", name, e)))?;
    Ok(Some(content))
}

fn resolve_target(target: &str) -> String {
    match target.strip_prefix('/') {
        Some(absolute) => absolute.to_string(),
        None => format!("xl/{}", target.trim_start_matches("./")),
    }
}

fn xml_error(part: &str, e: impl std::fmt::Display) -> ProcessingError {
    ProcessingError::Spreadsheet(format!("Malformed {}: {}", part, e))
}

fn attr(element: &BytesStart, local: &[u8]) -> Option<String> {
    element
        .attributes()
        .flatten()
        .find(|a| a.key.local_name().as_ref() == local)
        .and_then(|a| std::str::from_utf8(&a.value).ok().map(decode_entities))
}

fn push_text(out: &mut String, raw: &[u8]) {
    if let Ok(s) = std::str::from_utf8(raw) {
        out.push_str(&decode_entities(s));
    }
}

fn push_reference(out: &mut String, raw: &[u8]) {
    if let Some(resolved) = std::str::from_utf8(raw).ok().and_then(resolve_entity) {
        out.push_str(&resolved);
    }
}

fn parse_sheet_list(xml: &str) -> Result<Vec<SheetRef>, ProcessingError> {
    let mut reader = Reader::from_str(xml);
    let mut sheets = Vec::new();
    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) | Ok(Event::Empty(ref e))
                if e.local_name().as_ref() == b"sheet" =>
            {
                sheets.push(SheetRef {
                    name: attr(e, b"name").unwrap_or_else(|| format!("Sheet{}", sheets.len() + 1)),
                    rel_id: attr(e, b"id"),
                });
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(xml_error("workbook.xml", e)),
            _ => {}
        }
    }
    Ok(sheets)
}

fn parse_relationships(xml: &str) -> Result<HashMap<String, String>, ProcessingError> {
    let mut reader = Reader::from_str(xml);
    let mut targets = HashMap::new();
    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) | Ok(Event::Empty(ref e))
                if e.local_name().as_ref() == b"Relationship" =>
            {
                if let (Some(id), Some(target)) = (attr(e, b"Id"), attr(e, b"Target")) {
                    targets.insert(id, target);
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(xml_error("workbook.xml.rels", e)),
            _ => {}
        }
    }
    Ok(targets)
}

/// Shared strings, flattening rich-text runs and dropping phonetic hints.
fn parse_shared_strings(xml: &str) -> Result<Vec<String>, ProcessingError> {
    let mut reader = Reader::from_str(xml);
    let mut strings = Vec::new();
    let mut current = String::new();
    let mut in_item = false;
    let mut in_text = false;
    let mut phonetic_depth = 0usize;

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) => match e.local_name().as_ref() {
                b"si" => {
                    in_item = true;
                    current.clear();
                }
                b"rPh" => phonetic_depth += 1,
                b"t" if in_item && phonetic_depth == 0 => in_text = true,
                _ => {}
            },
            Ok(Event::Empty(ref e)) if e.local_name().as_ref() == b"si" => {
                strings.push(String::new());
            }
            Ok(Event::End(ref e)) => match e.local_name().as_ref() {
                b"si" => {
                    in_item = false;
                    strings.push(std::mem::take(&mut current));
                }
                b"rPh" => phonetic_depth = phonetic_depth.saturating_sub(1),
                b"t" => in_text = false,
                _ => {}
            },
            Ok(Event::Text(ref e)) if in_text => push_text(&mut current, e),
            Ok(Event::CData(ref e)) if in_text => push_text(&mut current, e),
            Ok(Event::GeneralRef(ref r)) if in_text => push_reference(&mut current, r),
            Ok(Event::Eof) => break,
            Err(e) => return Err(xml_error("sharedStrings.xml", e)),
            _ => {}
        }
    }
    Ok(strings)
}

/// Zero-based column index from a reference such as `AB12`.
pub fn column_index(reference: &str) -> Option<usize> {
    let letters: Vec<u8> = reference
        .bytes()
        .take_while(|b| b.is_ascii_alphabetic())
        .map(|b| b.to_ascii_uppercase())
        .collect();
    if letters.is_empty() {
        return None;
    }
    let mut index = 0usize;
    for b in letters {
        index = index.checked_mul(26)?.checked_add((b - b'A' + 1) as usize)?;
    }
    Some(index - 1)
}

/// Column of a cell reference, rejecting anything past `XFD`. References
/// without a column part yield `None`.
fn checked_column(reference: &str) -> Result<Option<usize>, ProcessingError> {
    if !reference.starts_with(|c: char| c.is_ascii_alphabetic()) {
        return Ok(None);
    }
    match column_index(reference) {
        Some(column) if column < MAX_COLUMNS => Ok(Some(column)),
        _ => Err(ProcessingError::Spreadsheet(format!(
            "Cell reference {} lies beyond column XFD",
            reference
        ))),
    }
}

fn checked_row(row: usize) -> Result<usize, ProcessingError> {
    if row >= MAX_ROWS {
        return Err(ProcessingError::Spreadsheet(format!(
            "Row {} lies beyond the worksheet limit of {} rows",
            row + 1,
            MAX_ROWS
        )));
    }
    Ok(row)
}

#[derive(Default)]
struct PendingCell {
    column: Option<usize>,
    kind: Option<String>,
    value: String,
}

fn finish_cell(cell: &PendingCell, shared: &[String]) -> Option<CellValue> {
    let raw = cell.value.as_str();
    let value = match cell.kind.as_deref() {
        Some("s") => {
            let index: usize = raw.trim().parse().ok()?;
            coerce_cell(shared.get(index)?)
        }
        Some("inlineStr") | Some("str") => coerce_cell(raw),
        Some("b") => CellValue::Text(if raw.trim() == "1" { "TRUE" } else { "FALSE" }.to_string()),
        Some("e") => CellValue::Text(raw.trim().to_string()),
        _ => match raw.trim().parse::<f64>() {
            Ok(n) if n.is_finite() => CellValue::Number(n),
            _ => coerce_cell(raw),
        },
    };
    Some(value)
}

type Grid = BTreeMap<usize, BTreeMap<usize, CellValue>>;

fn parse_sheet(xml: &str, shared: &[String]) -> Result<Grid, ProcessingError> {
    let mut reader = Reader::from_str(xml);
    let mut grid: Grid = BTreeMap::new();
    let mut row_index = 0usize;
    let mut next_column = 0usize;
    let mut cell: Option<PendingCell> = None;
    let mut capture = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) => match e.local_name().as_ref() {
                b"row" => {
                    row_index = attr(e, b"r")
                        .and_then(|r| r.parse::<usize>().ok())
                        .map(|r| r.saturating_sub(1))
                        .unwrap_or(row_index);
                    checked_row(row_index)?;
                    next_column = 0;
                }
                b"c" => {
                    let column = match attr(e, b"r") {
                        Some(r) => checked_column(&r)?,
                        None => None,
                    };
                    cell = Some(PendingCell {
                        column,
                        kind: attr(e, b"t"),
                        value: String::new(),
                    });
                }
                b"v" | b"t" if cell.is_some() => capture = true,
                _ => {}
            },
            Ok(Event::Empty(ref e)) => match e.local_name().as_ref() {
                b"c" => {
                    let column = match attr(e, b"r") {
                        Some(r) => checked_column(&r)?,
                        None => None,
                    };
                    next_column = column.map_or(next_column + 1, |c| c + 1);
                }
                b"row" => {
                    row_index += 1;
                }
                _ => {}
            },
            Ok(Event::End(ref e)) => match e.local_name().as_ref() {
                b"v" | b"t" => capture = false,
                b"c" => {
                    if let Some(done) = cell.take() {
                        let column = done.column.unwrap_or(next_column);
                        if column >= MAX_COLUMNS {
                            return Err(ProcessingError::Spreadsheet(format!(
                                "Row {} has more than {} columns",
                                row_index + 1,
                                MAX_COLUMNS
                            )));
                        }
                        checked_row(row_index)?;
                        next_column = column + 1;
                        if !done.value.is_empty() {
                            if let Some(value) = finish_cell(&done, shared) {
                                grid.entry(row_index).or_default().insert(column, value);
                            }
                        }
                    }
                }
                b"row" => row_index += 1,
                _ => {}
            },
            Ok(Event::Text(ref e)) if capture => {
                if let Some(c) = cell.as_mut() {
                    push_text(&mut c.value, e);
                }
            }
            Ok(Event::GeneralRef(ref r)) if capture => {
                if let Some(c) = cell.as_mut() {
                    push_reference(&mut c.value, r);
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(xml_error("worksheet", e)),
            _ => {}
        }
    }
    Ok(grid)
}

/// The first populated row becomes the header; columns span the widest row.
fn grid_to_table(name: &str, grid: Grid) -> Result<Option<TableData>, ProcessingError> {
    let Some(width) = grid
        .values()
        .filter_map(|row| row.keys().next_back())
        .max()
        .map(|last| last + 1)
    else {
        return Ok(None);
    };
    let cells = width.saturating_mul(grid.len());
    if cells > MAX_CELLS_PER_SHEET {
        return Err(ProcessingError::Spreadsheet(format!(
            "Sheet {} spans {} cells ({} rows by {} columns), limit is {}",
            name,
            cells,
            grid.len(),
            width,
            MAX_CELLS_PER_SHEET
        )));
    }

    let mut rows = grid.into_values().map(|row| {
        let mut dense = vec![CellValue::Text(String::new()); width];
        for (column, value) in row {
            dense[column] = value;
        }
        dense
    });

    let Some(header_row) = rows.next() else {
        return Ok(None);
    };
    let headers = header_row.iter().map(|c| c.to_string()).collect();
    Ok(Some(TableData {
        title: Some(name.to_string()),
        headers,
        rows: rows.collect(),
        footnotes: Vec::new(),
        source: None,
    }))
}

fn render_table(out: &mut String, table: &TableData) {
    if let Some(title) = &table.title {
        out.push_str(title);
        out.push('\n');
    }
    out.push_str(&table.headers.join("\t"));
    out.push('\n');
    for row in &table.rows {
        let line: Vec<String> = row.iter().map(|c| c.to_string()).collect();
        out.push_str(&line.join("\t"));
        out.push('\n');
    }
    out.push('\n');
}
