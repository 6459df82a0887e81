//! Spreadsheet decoding into a [`RawTable`].

use crate::error::{EtlError, Result};
use crate::transform::{Cell, RawTable};
use calamine::{open_workbook_auto, Data, Reader};
use chrono::NaiveDate;
use std::path::Path;
use tracing::{debug, info};

/// Reads one report file into a header + rows table
pub trait TableReader {
    fn read(&self, path: &Path, skip_rows: usize) -> Result<RawTable>;
}

/// calamine-backed reader (ods, xlsx, xls, xlsb). Only the first sheet is read.
#[derive(Debug, Clone, Copy, Default)]
pub struct SpreadsheetReader;

impl TableReader for SpreadsheetReader {
    fn read(&self, path: &Path, skip_rows: usize) -> Result<RawTable> {
        if !path.is_file() {
            return Err(EtlError::extraction(path, "file not found"));
        }

        let mut workbook = open_workbook_auto(path).map_err(|e| EtlError::extraction(path, e))?;

        let sheet_names = workbook.sheet_names().to_vec();
        let sheet_name = sheet_names
            .first()
            .ok_or_else(|| EtlError::extraction(path, "workbook has no sheets"))?;

        let range = workbook
            .worksheet_range(sheet_name)
            .map_err(|e| EtlError::extraction(path, e))?;

        let (row_count, col_count) = range.get_size();
        debug!(sheet = %sheet_name, row_count, col_count, "read sheet");

        let skip = rows_to_skip(skip_rows, range.start());

        let table = table_from_rows(range.rows(), skip).ok_or_else(|| {
            EtlError::extraction(path, format!("no header row after skipping {} rows", skip_rows))
        })?;

        info!(
            file = %path.display(),
            columns = table.headers.len(),
            rows = table.rows.len(),
            "extracted raw table"
        );
        Ok(table)
    }
}

/// The range starts at its first non-empty cell while `skip_rows` counts from
/// sheet row 0, so rows above the range are already skipped.
fn rows_to_skip(skip_rows: usize, range_start: Option<(u32, u32)>) -> usize {
    let first_row = range_start.map(|(row, _)| row as usize).unwrap_or(0);
    skip_rows.saturating_sub(first_row)
}

/// Skip `skip` rows, take the next as header and keep the rows after it that
/// have at least one non-empty cell. `None` when there is no header row.
pub fn table_from_rows<'a>(
    mut rows: impl Iterator<Item = &'a [Data]>,
    skip: usize,
) -> Option<RawTable> {
    let header = rows.nth(skip)?;
    let headers = header.iter().map(header_text).collect();

    let rows = rows
        .map(|row| row.iter().map(cell).collect::<Vec<_>>())
        .filter(|row| row.iter().any(|c| *c != Cell::Empty))
        .collect();

    Some(RawTable { headers, rows })
}

/// Header cells as text; date-typed headers become "YYYY-MM" month labels
fn header_text(data: &Data) -> String {
    match data {
        Data::Empty => String::new(),
        Data::String(s) => s.trim().to_string(),
        Data::DateTimeIso(s) => s
            .get(..10)
            .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok())
            .map(|d| d.format("%Y-%m").to_string())
            .unwrap_or_else(|| s.trim().to_string()),
        Data::DateTime(dt) => dt
            .as_datetime()
            .map(|d| d.format("%Y-%m").to_string())
            .unwrap_or_else(|| dt.as_f64().to_string()),
        Data::Float(f) if f.fract() == 0.0 => format!("{}", *f as i64),
        other => other.to_string().trim().to_string(),
    }
}

fn cell(data: &Data) -> Cell {
    match data {
        Data::Empty | Data::Error(_) => Cell::Empty,
        Data::Float(f) => Cell::Number(*f),
        Data::Int(i) => Cell::Number(*i as f64),
        Data::String(s) if s.trim().is_empty() => Cell::Empty,
        Data::String(s) => Cell::Text(s.clone()),
        other => Cell::Text(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s(v: &str) -> Data {
        Data::String(v.to_string())
    }

    #[test]
    fn test_rows_to_skip_counts_from_sheet_row_zero() {
        // title at row 2, header at row 8
        assert_eq!(rows_to_skip(8, Some((2, 0))), 6);
        assert_eq!(rows_to_skip(8, Some((0, 3))), 8);
        assert_eq!(rows_to_skip(8, None), 8);
        assert_eq!(rows_to_skip(8, Some((8, 0))), 0);
        assert_eq!(rows_to_skip(8, Some((10, 0))), 0);
    }

    #[test]
    fn test_header_found_when_range_starts_after_row_zero() {
        let title = vec![s("Índice de Desempenho no Atendimento"), Data::Empty];
        let blank = vec![Data::Empty, Data::Empty];
        let header = vec![s("GRUPO ECONÔMICO"), s("2023-01")];
        let data = vec![s("CLARO"), Data::Float(1.5)];
        // sheet rows 2..=9 as calamine returns them from range.start()
        let rows = vec![title, blank.clone(), blank.clone(), blank.clone(), blank.clone(), blank, header, data];

        let skip = rows_to_skip(8, Some((2, 0)));
        let table = table_from_rows(rows.iter().map(Vec::as_slice), skip).unwrap();

        assert_eq!(table.headers, vec!["GRUPO ECONÔMICO", "2023-01"]);
        assert_eq!(table.rows, vec![vec![Cell::Text("CLARO".to_string()), Cell::Number(1.5)]]);
    }

    #[test]
    fn test_header_text_variants() {
        assert_eq!(header_text(&s("  GRUPO ECONÔMICO ")), "GRUPO ECONÔMICO");
        assert_eq!(header_text(&Data::DateTimeIso("2023-07-01".to_string())), "2023-07");
        assert_eq!(header_text(&Data::DateTimeIso("2023-07-01T00:00:00".to_string())), "2023-07");
        assert_eq!(header_text(&Data::Float(2023.0)), "2023");
        assert_eq!(header_text(&Data::Int(7)), "7");
        assert_eq!(header_text(&Data::Empty), "");
    }

    #[test]
    fn test_cell_conversion() {
        assert_eq!(cell(&Data::Float(1.5)), Cell::Number(1.5));
        assert_eq!(cell(&Data::Int(3)), Cell::Number(3.0));
        assert_eq!(cell(&s("  ")), Cell::Empty);
        assert_eq!(cell(&s("CLARO")), Cell::Text("CLARO".to_string()));
        assert_eq!(cell(&Data::Empty), Cell::Empty);
    }

    #[test]
    fn test_table_from_rows_skips_preamble_and_blank_rows() {
        let sheet: Vec<Vec<Data>> = vec![
            vec![s("Índice de Desempenho no Atendimento"), Data::Empty],
            vec![Data::Empty, Data::Empty],
            vec![s("GRUPO ECONÔMICO"), s("VARIÁVEL"), s("2023-01")],
            vec![s("CLARO"), s("IDA"), Data::Float(91.2)],
            vec![Data::Empty, Data::Empty, Data::Empty],
            vec![s("VIVO"), s("IDA"), Data::Empty],
        ];

        let table = table_from_rows(sheet.iter().map(Vec::as_slice), 2).unwrap();

        assert_eq!(table.headers, vec!["GRUPO ECONÔMICO", "VARIÁVEL", "2023-01"]);
        assert_eq!(table.rows.len(), 2);
        assert_eq!(table.rows[0][2], Cell::Number(91.2));
        assert_eq!(table.rows[1][0], Cell::Text("VIVO".to_string()));
    }

    #[test]
    fn test_table_from_rows_without_header() {
        let sheet: Vec<Vec<Data>> = vec![vec![s("only row")]];
        assert!(table_from_rows(sheet.iter().map(Vec::as_slice), 3).is_none());
    }

    #[test]
    fn test_missing_file_is_extraction_error() {
        let err = SpreadsheetReader
            .read(Path::new("/nonexistent/SMP2023.ods"), 8)
            .unwrap_err();
        assert!(matches!(err, EtlError::Extraction { .. }));
        assert!(err.to_string().contains("SMP2023.ods"));
    }
}
