//! Quote-aware CSV parsing with per-cell numeric coercion.

use crate::error::ProcessingError;

use super::{CellValue, TableData};

const UTF8_BOM: &str = "\u{FEFF}";

/// Parses a CSV upload into a single table. The first record is the header.
pub fn parse_csv(bytes: &[u8]) -> Result<(String, TableData), ProcessingError> {
    let text = std::str::from_utf8(bytes)
        .map_err(|e| ProcessingError::Csv(format!("input is not valid UTF-8: {}", e)))?;
    let text = text.strip_prefix(UTF8_BOM).unwrap_or(text);

    let mut records = parse_records(text)?.into_iter();
    let headers: Vec<String> = records
        .next()
        .map(|h| h.into_iter().map(|c| c.trim().to_string()).collect())
        .ok_or_else(|| ProcessingError::Csv("no header row".to_string()))?;

    let rows = records
        .map(|record| record.iter().map(|cell| coerce_cell(cell)).collect())
        .collect();

    Ok((
        text.to_string(),
        TableData {
            title: None,
            headers,
            rows,
            footnotes: Vec::new(),
            source: None,
        },
    ))
}

/// Splits CSV text into records.
///
/// Handles quoted fields, `""` escapes and embedded separators or line
/// breaks inside quotes. Blank lines are skipped.
pub fn parse_records(text: &str) -> Result<Vec<Vec<String>>, ProcessingError> {
    let mut records = Vec::new();
    let mut record: Vec<String> = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut field_started = false;
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        if in_quotes {
            match c {
                '"' if chars.peek() == Some(&'"') => {
                    field.push('"');
                    chars.next();
                }
                '"' => in_quotes = false,
                _ => field.push(c),
            }
            continue;
        }

        match c {
            '"' if !field_started || field.trim().is_empty() => {
                field.clear();
                in_quotes = true;
                field_started = true;
            }
            ',' => {
                record.push(std::mem::take(&mut field));
                field_started = false;
            }
            '\r' | '\n' => {
                if c == '\r' && chars.peek() == Some(&'\n') {
                    chars.next();
                }
                if field_started || !record.is_empty() {
                    record.push(std::mem::take(&mut field));
                    records.push(std::mem::take(&mut record));
                }
                field_started = false;
            }
            _ => {
                field.push(c);
                field_started = true;
            }
        }
    }

    if in_quotes {
        return Err(ProcessingError::Csv(
            "unterminated quoted field".to_string(),
        ));
    }
    if field_started || !record.is_empty() {
        record.push(field);
        records.push(record);
    }

    Ok(records)
}

/// Converts a cell to a number when the whole cell, with thousands
/// separators removed, is a finite number. Anything else stays text.
pub fn coerce_cell(raw: &str) -> CellValue {
    let trimmed = raw.trim();
    let cleaned: String = trimmed
        .chars()
        .filter(|c| !matches!(c, ',' | '\u{FF0C}'))
        .collect();

    let numeric_chars = cleaned
        .chars()
        .all(|c| c.is_ascii_digit() || matches!(c, '.' | '-' | '+' | 'e' | 'E'));
    if !cleaned.is_empty() && numeric_chars {
        if let Ok(n) = cleaned.parse::<f64>() {
            if n.is_finite() {
                return CellValue::Number(n);
            }
        }
    }

    CellValue::Text(trimmed.to_string())
}
