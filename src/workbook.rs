//! Workbook reading for bulk uploads (.xlsx/.xlsm/.xlsb).
//!
//! Row 1 of every sheet is the header row; data rows become [`RawRow`]s keyed
//! by header name with all cell values normalized to plain strings or null.
//! Fully blank rows are skipped silently. Reading is a pure operation;
//! missing sheets and columns are the structure validator's concern.

use std::collections::BTreeMap;
use std::io::Cursor;

use anyhow::{Context, Result};
use calamine::{open_workbook_from_rs, Data, Reader, Xlsx, Xlsb};
use chrono::{Duration, NaiveDate};
use serde::Serialize;

/// One data row: normalized values keyed by column header, plus the 1-based
/// source row number used for error messages (never for business logic).
#[derive(Debug, Clone, Serialize)]
pub struct RawRow {
    pub row: u32,
    pub fields: BTreeMap<String, Option<String>>,
}

impl RawRow {
    /// Non-null value of a column, if present.
    pub fn get(&self, field: &str) -> Option<&str> {
        self.fields.get(field).and_then(|v| v.as_deref())
    }
}

/// A parsed sheet: header strings from row 1 and the surviving data rows.
#[derive(Debug, Clone)]
pub struct RawSheet {
    pub name: String,
    pub headers: Vec<String>,
    pub rows: Vec<RawRow>,
}

/// All sheets of one uploaded workbook, in workbook order.
#[derive(Debug, Clone, Default)]
pub struct ParsedWorkbook {
    pub sheets: Vec<RawSheet>,
}

impl ParsedWorkbook {
    /// Exact-match sheet lookup (names are case- and whitespace-sensitive).
    pub fn sheet(&self, name: &str) -> Option<&RawSheet> {
        self.sheets.iter().find(|s| s.name == name)
    }

    pub fn sheet_names(&self) -> Vec<&str> {
        self.sheets.iter().map(|s| s.name.as_str()).collect()
    }
}

/// Dispatch workbook parsing by file extension.
pub fn parse_workbook(filename: &str, data: &[u8]) -> Result<ParsedWorkbook> {
    let ext = filename.rsplit('.').next().unwrap_or("").to_lowercase();

    match ext.as_str() {
        "xlsx" | "xlsm" => parse_xlsx(data),
        "xlsb" => parse_xlsb(data),
        _ => anyhow::bail!(
            "Unsupported file type: .{}. Supported: .xlsx, .xlsm, .xlsb",
            ext
        ),
    }
}

fn parse_xlsx(data: &[u8]) -> Result<ParsedWorkbook> {
    let cursor = Cursor::new(data);
    let mut workbook: Xlsx<_> =
        open_workbook_from_rs(cursor).context("Failed to open Excel workbook")?;

    let sheet_names: Vec<String> = workbook.sheet_names().to_vec();
    let mut sheets = Vec::new();

    for name in &sheet_names {
        let range = match workbook.worksheet_range(name) {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!("Skipping unreadable sheet '{}': {}", name, e);
                continue;
            }
        };
        sheets.push(range_to_sheet(name, &range));
    }

    Ok(ParsedWorkbook { sheets })
}

fn parse_xlsb(data: &[u8]) -> Result<ParsedWorkbook> {
    let cursor = Cursor::new(data);
    let mut workbook: Xlsb<_> =
        open_workbook_from_rs(cursor).context("Failed to open Excel workbook")?;

    let sheet_names: Vec<String> = workbook.sheet_names().to_vec();
    let mut sheets = Vec::new();

    for name in &sheet_names {
        let range = match workbook.worksheet_range(name) {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!("Skipping unreadable sheet '{}': {}", name, e);
                continue;
            }
        };
        sheets.push(range_to_sheet(name, &range));
    }

    Ok(ParsedWorkbook { sheets })
}

/// Convert a calamine Range into a RawSheet. The first row of the used range
/// is the header row; data rows keep their 1-based position in the sheet.
/// A sheet with headers but no data rows is kept: an empty child sheet is a
/// legitimate upload, not a reader error.
pub fn range_to_sheet(name: &str, range: &calamine::Range<Data>) -> RawSheet {
    let first_row = range.start().map(|(r, _)| r).unwrap_or(0);
    let mut row_iter = range.rows();

    let headers: Vec<String> = match row_iter.next() {
        Some(header_row) => header_row
            .iter()
            .map(|c| normalize_cell(c).unwrap_or_default())
            .collect(),
        None => Vec::new(),
    };

    let mut rows = Vec::new();
    for (i, row) in row_iter.enumerate() {
        let mut fields: BTreeMap<String, Option<String>> = BTreeMap::new();
        let mut any_value = false;

        for (col, header) in headers.iter().enumerate() {
            if header.is_empty() {
                continue;
            }
            let value = row.get(col).and_then(normalize_cell);
            any_value |= value.is_some();
            fields.insert(header.clone(), value);
        }

        // Fully blank rows are skipped, not reported.
        if !any_value {
            continue;
        }

        // +2: one for the header row, one for 1-based numbering.
        rows.push(RawRow {
            row: first_row + i as u32 + 2,
            fields,
        });
    }

    RawSheet {
        name: name.to_string(),
        headers,
        rows,
    }
}

/// Normalize a cell to a plain value. Null/blank cells become `None`,
/// date-typed cells become `YYYY-MM-DD` (time of day dropped), everything
/// else is stringified and trimmed. calamine already substitutes cached
/// results for formula cells and display text for rich text and hyperlinks.
fn normalize_cell(cell: &Data) -> Option<String> {
    match cell {
        Data::Empty => None,
        Data::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }
        }
        Data::Int(i) => Some(i.to_string()),
        Data::Float(f) => {
            // Avoid trailing ".0" for whole numbers
            if *f == (*f as i64) as f64 && f.abs() < i64::MAX as f64 {
                Some(format!("{}", *f as i64))
            } else {
                Some(format!("{}", f))
            }
        }
        Data::Bool(b) => Some(b.to_string()),
        Data::DateTime(dt) => {
            let serial = dt.as_f64();
            Some(excel_serial_to_date(serial).unwrap_or_else(|| format!("{}", serial)))
        }
        Data::DateTimeIso(s) => {
            let date = s.split('T').next().unwrap_or(s).trim();
            if date.is_empty() {
                None
            } else {
                Some(date.to_string())
            }
        }
        Data::DurationIso(s) => Some(s.clone()),
        Data::Error(e) => Some(format!("#ERR:{:?}", e)),
    }
}

/// Convert an Excel serial date number to an ISO date string.
/// Excel serial 60 is the nonexistent 1900-02-29 (the 1900 leap-year bug),
/// so serials past it sit one day ahead of the real calendar.
fn excel_serial_to_date(serial: f64) -> Option<String> {
    let days = serial.floor() as i64;
    let adjusted = if days > 59 { days - 1 } else { days };

    let base = NaiveDate::from_ymd_opt(1899, 12, 31)?;
    let date = base.checked_add_signed(Duration::days(adjusted))?;
    Some(date.format("%Y-%m-%d").to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sheet_from(cells: Vec<((u32, u32), Data)>, end: (u32, u32)) -> RawSheet {
        let mut range = calamine::Range::new((0, 0), end);
        for (pos, value) in cells {
            range.set_value(pos, value);
        }
        range_to_sheet("Test_Sheet", &range)
    }

    #[test]
    fn test_headers_from_first_row() {
        let sheet = sheet_from(
            vec![
                ((0, 0), Data::String("Driver_Ref_ID".into())),
                ((0, 1), Data::String("Full_Name".into())),
                ((1, 0), Data::String("D1".into())),
                ((1, 1), Data::String("Asha Verma".into())),
            ],
            (1, 1),
        );
        assert_eq!(sheet.headers, vec!["Driver_Ref_ID", "Full_Name"]);
        assert_eq!(sheet.rows.len(), 1);
        assert_eq!(sheet.rows[0].row, 2);
        assert_eq!(sheet.rows[0].get("Full_Name"), Some("Asha Verma"));
    }

    #[test]
    fn test_blank_rows_skipped_silently() {
        let sheet = sheet_from(
            vec![
                ((0, 0), Data::String("Driver_Ref_ID".into())),
                ((1, 0), Data::String("  ".into())),
                ((2, 0), Data::String("D2".into())),
            ],
            (2, 0),
        );
        assert_eq!(sheet.rows.len(), 1);
        assert_eq!(sheet.rows[0].get("Driver_Ref_ID"), Some("D2"));
        // Provenance row number survives the skip
        assert_eq!(sheet.rows[0].row, 3);
    }

    #[test]
    fn test_whitespace_trims_to_null() {
        let sheet = sheet_from(
            vec![
                ((0, 0), Data::String("A".into())),
                ((0, 1), Data::String("B".into())),
                ((1, 0), Data::String(" x ".into())),
                ((1, 1), Data::String("   ".into())),
            ],
            (1, 1),
        );
        assert_eq!(sheet.rows[0].get("A"), Some("x"));
        assert_eq!(sheet.rows[0].get("B"), None);
    }

    #[test]
    fn test_whole_number_floats_lose_decimal() {
        let sheet = sheet_from(
            vec![
                ((0, 0), Data::String("Pincode".into())),
                ((1, 0), Data::Float(560001.0)),
            ],
            (1, 0),
        );
        assert_eq!(sheet.rows[0].get("Pincode"), Some("560001"));
    }

    #[test]
    fn test_empty_child_sheet_keeps_headers() {
        let sheet = sheet_from(
            vec![
                ((0, 0), Data::String("Driver_Ref_ID".into())),
                ((0, 1), Data::String("Document_Type".into())),
            ],
            (0, 1),
        );
        assert_eq!(sheet.headers.len(), 2);
        assert!(sheet.rows.is_empty());
    }

    #[test]
    fn test_excel_serial_to_date() {
        assert_eq!(excel_serial_to_date(45000.0).as_deref(), Some("2023-03-15"));
        // Time of day is dropped
        assert_eq!(excel_serial_to_date(45000.75).as_deref(), Some("2023-03-15"));
        // Around the 1900 leap-year bug
        assert_eq!(excel_serial_to_date(59.0).as_deref(), Some("1900-02-28"));
        assert_eq!(excel_serial_to_date(61.0).as_deref(), Some("1900-03-01"));
        assert_eq!(excel_serial_to_date(25569.0).as_deref(), Some("1970-01-01"));
    }

    #[test]
    fn test_unsupported_extension() {
        let result = parse_workbook("upload.txt", b"data");
        assert!(result.is_err());
    }

    #[test]
    fn test_iso_datetime_drops_time() {
        let sheet = sheet_from(
            vec![
                ((0, 0), Data::String("Date_Of_Birth".into())),
                ((1, 0), Data::DateTimeIso("1990-04-12T00:00:00".into())),
            ],
            (1, 0),
        );
        assert_eq!(sheet.rows[0].get("Date_Of_Birth"), Some("1990-04-12"));
    }
}
