//! Wide-to-long reshape of a raw report table.
//!
//! A report has one row per (economic group, indicator) and one column per
//! month. The reshape emits one [`Observation`] per row and month column that
//! carries a numeric value. Missing cells are dropped, never filled in.

use crate::config::DescriptorColumns;
use regex::Regex;
use std::sync::LazyLock;
use tracing::{info, warn};

/// pt-BR number text: "." only groups thousands in threes, "," is the decimal mark
static PT_BR_NUMBER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[+-]?(?:[0-9]{1,3}(?:\.[0-9]{3})+|[0-9]+)(?:,[0-9]+)?$")
        .expect("number pattern is valid")
});

/// A decoded spreadsheet cell
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Empty,
    Number(f64),
    Text(String),
}

/// Header row plus data rows, as handed over by a table reader
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<Cell>>,
}

impl RawTable {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column(&self, label: &str) -> Option<usize> {
        self.headers.iter().position(|h| h.trim() == label)
    }
}

/// One long-format row, ready for loading
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub economic_group: Option<String>,
    pub indicator: Option<String>,
    /// Month label taken from the column header ("YYYY-MM")
    pub ano_mes: String,
    pub value: f64,
}

/// Result of reshaping one table
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Melted {
    pub observations: Vec<Observation>,
    /// Expected month columns that were present, in expected order
    pub month_columns: Vec<String>,
    /// Cells holding text that is not a number
    pub non_numeric_cells: usize,
}

impl Melted {
    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }
}

enum CellValue {
    Missing,
    Value(f64),
    NotNumeric,
}

fn coerce(cell: &Cell) -> CellValue {
    match cell {
        Cell::Empty => CellValue::Missing,
        Cell::Number(n) if n.is_finite() => CellValue::Value(*n),
        Cell::Number(_) => CellValue::Missing,
        Cell::Text(s) => {
            let s = s.trim();
            if s.is_empty() {
                return CellValue::Missing;
            }
            match parse_number(s) {
                Some(n) => CellValue::Value(n),
                None => CellValue::NotNumeric,
            }
        }
    }
}

/// Parses pt-BR number text ("12,5", "1.234", "1.234,5"). Anything else,
/// including "12.5" and "1,234.5", is not a number.
fn parse_number(s: &str) -> Option<f64> {
    if !PT_BR_NUMBER.is_match(s) {
        return None;
    }
    let normalized = s.replace('.', "").replace(',', ".");
    normalized.parse::<f64>().ok().filter(|n| n.is_finite())
}

fn label(cell: Option<&Cell>) -> Option<String> {
    match cell? {
        Cell::Text(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Cell::Number(n) if n.is_finite() => Some(n.to_string()),
        _ => None,
    }
}

/// Reshape `raw` into observations over `expected_months`.
///
/// Only expected month columns actually present in the table are melted. When
/// none are present the result is empty and a warning is logged.
pub fn transform(raw: &RawTable, columns: &DescriptorColumns, expected_months: &[String]) -> Melted {
    let month_columns: Vec<(usize, &String)> = expected_months
        .iter()
        .filter_map(|month| raw.column(month).map(|idx| (idx, month)))
        .collect();

    if month_columns.is_empty() {
        warn!(
            expected = ?expected_months,
            available = ?raw.headers,
            "no expected month column found"
        );
        return Melted::default();
    }

    let group_col = raw.column(&columns.economic_group);
    let indicator_col = raw.column(&columns.indicator);
    if group_col.is_none() {
        warn!("column '{}' not found, rows will lack an economic group", columns.economic_group);
    }
    if indicator_col.is_none() {
        warn!("column '{}' not found, rows will lack an indicator", columns.indicator);
    }

    let mut melted = Melted {
        month_columns: month_columns.iter().map(|(_, m)| m.to_string()).collect(),
        ..Melted::default()
    };

    info!(months = ?melted.month_columns, "melting month columns");

    for (row_idx, row) in raw.rows.iter().enumerate() {
        let economic_group = label(group_col.and_then(|c| row.get(c)));
        let indicator = label(indicator_col.and_then(|c| row.get(c)));

        for (col, month) in &month_columns {
            match coerce(row.get(*col).unwrap_or(&Cell::Empty)) {
                CellValue::Missing => {}
                CellValue::NotNumeric => {
                    warn!(row = row_idx, month = %month, "non-numeric value dropped");
                    melted.non_numeric_cells += 1;
                }
                CellValue::Value(value) => melted.observations.push(Observation {
                    economic_group: economic_group.clone(),
                    indicator: indicator.clone(),
                    ano_mes: month.to_string(),
                    value,
                }),
            }
        }
    }

    info!(rows = melted.observations.len(), "transformed to long format");
    melted
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EtlConfig;

    fn text(s: &str) -> Cell {
        Cell::Text(s.to_string())
    }

    fn headers(extra: &[&str]) -> Vec<String> {
        let mut h = vec!["GRUPO ECONÔMICO".to_string(), "VARIÁVEL".to_string()];
        h.extend(extra.iter().map(|s| s.to_string()));
        h
    }

    fn full_year_table(rows: usize) -> RawTable {
        let months = EtlConfig::month_columns(2023);
        let mut table = RawTable {
            headers: headers(&months.iter().map(String::as_str).collect::<Vec<_>>()),
            rows: Vec::new(),
        };
        for r in 0..rows {
            let mut row = vec![text(&format!("Group{}", r)), text("IDA")];
            row.extend((1..=12).map(|m| Cell::Number(m as f64)));
            table.rows.push(row);
        }
        table
    }

    #[test]
    fn test_full_table_produces_twelve_per_row() {
        let table = full_year_table(3);
        let melted = transform(&table, &DescriptorColumns::default(), &EtlConfig::month_columns(2023));

        assert_eq!(melted.observations.len(), 36);
        assert_eq!(melted.month_columns.len(), 12);
    }

    #[test]
    fn test_order_is_row_then_month() {
        let table = full_year_table(2);
        let melted = transform(&table, &DescriptorColumns::default(), &EtlConfig::month_columns(2023));

        assert_eq!(melted.observations[0].economic_group.as_deref(), Some("Group0"));
        assert_eq!(melted.observations[0].ano_mes, "2023-01");
        assert_eq!(melted.observations[11].ano_mes, "2023-12");
        assert_eq!(melted.observations[12].economic_group.as_deref(), Some("Group1"));
        assert_eq!(melted.observations[12].ano_mes, "2023-01");
    }

    #[test]
    fn test_null_values_are_dropped() {
        let table = RawTable {
            headers: headers(&["2023-01", "2023-02"]),
            rows: vec![vec![text("GroupX"), text("IndA"), Cell::Number(10.0), Cell::Empty]],
        };
        let melted = transform(&table, &DescriptorColumns::default(), &EtlConfig::month_columns(2023));

        assert_eq!(
            melted.observations,
            vec![Observation {
                economic_group: Some("GroupX".to_string()),
                indicator: Some("IndA".to_string()),
                ano_mes: "2023-01".to_string(),
                value: 10.0,
            }]
        );
    }

    #[test]
    fn test_short_rows_treat_missing_cells_as_empty() {
        let table = RawTable {
            headers: headers(&["2023-01", "2023-02"]),
            rows: vec![vec![text("GroupX"), text("IndA"), Cell::Number(1.0)]],
        };
        let melted = transform(&table, &DescriptorColumns::default(), &EtlConfig::month_columns(2023));
        assert_eq!(melted.observations.len(), 1);
    }

    #[test]
    fn test_only_expected_months_are_melted() {
        let table = RawTable {
            headers: headers(&["2022-12", "2023-01", "TOTAL"]),
            rows: vec![vec![
                text("GroupX"),
                text("IndA"),
                Cell::Number(1.0),
                Cell::Number(2.0),
                Cell::Number(3.0),
            ]],
        };
        let melted = transform(&table, &DescriptorColumns::default(), &EtlConfig::month_columns(2023));

        assert_eq!(melted.month_columns, vec!["2023-01".to_string()]);
        assert_eq!(melted.observations.len(), 1);
        assert_eq!(melted.observations[0].value, 2.0);
    }

    #[test]
    fn test_no_month_columns_yields_empty() {
        let table = RawTable {
            headers: headers(&["2022-01", "2022-02"]),
            rows: vec![vec![text("GroupX"), text("IndA"), Cell::Number(1.0), Cell::Number(2.0)]],
        };
        let melted = transform(&table, &DescriptorColumns::default(), &EtlConfig::month_columns(2023));

        assert!(melted.is_empty());
        assert!(melted.month_columns.is_empty());
    }

    #[test]
    fn test_text_values_are_coerced_or_counted() {
        let table = RawTable {
            headers: headers(&["2023-01", "2023-02", "2023-03", "2023-04"]),
            rows: vec![vec![
                text("GroupX"),
                text("IndA"),
                text(" 97,5 "),
                text("1.234,5"),
                text("-"),
                text("  "),
            ]],
        };
        let melted = transform(&table, &DescriptorColumns::default(), &EtlConfig::month_columns(2023));

        let values: Vec<f64> = melted.observations.iter().map(|o| o.value).collect();
        assert_eq!(values, vec![97.5, 1234.5]);
        assert_eq!(melted.non_numeric_cells, 1);
    }

    #[test]
    fn test_missing_labels_are_kept_for_the_loader() {
        let table = RawTable {
            headers: headers(&["2023-01"]),
            rows: vec![vec![Cell::Empty, text("IndA"), Cell::Number(5.0)]],
        };
        let melted = transform(&table, &DescriptorColumns::default(), &EtlConfig::month_columns(2023));

        assert_eq!(melted.observations.len(), 1);
        assert_eq!(melted.observations[0].economic_group, None);
        assert_eq!(melted.observations[0].indicator.as_deref(), Some("IndA"));
    }

    #[test]
    fn test_missing_descriptor_column() {
        let table = RawTable {
            headers: vec!["VARIÁVEL".to_string(), "2023-01".to_string()],
            rows: vec![vec![text("IndA"), Cell::Number(5.0)]],
        };
        let melted = transform(&table, &DescriptorColumns::default(), &EtlConfig::month_columns(2023));

        assert_eq!(melted.observations.len(), 1);
        assert!(melted.observations[0].economic_group.is_none());
    }

    #[test]
    fn test_labels_are_trimmed() {
        let table = RawTable {
            headers: vec![" GRUPO ECONÔMICO ".to_string(), "VARIÁVEL".to_string(), "2023-01 ".to_string()],
            rows: vec![vec![text("  CLARO "), text("Taxa de Reclamações"), Cell::Number(0.5)]],
        };
        let melted = transform(&table, &DescriptorColumns::default(), &EtlConfig::month_columns(2023));

        assert_eq!(melted.observations[0].economic_group.as_deref(), Some("CLARO"));
        assert_eq!(melted.observations[0].ano_mes, "2023-01");
    }

    #[test]
    fn test_parse_number_rejects_non_finite() {
        assert_eq!(parse_number("NaN"), None);
        assert_eq!(parse_number("inf"), None);
        assert_eq!(parse_number("42"), Some(42.0));
    }

    #[test]
    fn test_parse_number_uses_pt_br_separators() {
        assert_eq!(parse_number("1.234"), Some(1234.0));
        assert_eq!(parse_number("1.234.567"), Some(1_234_567.0));
        assert_eq!(parse_number("1.234,5"), Some(1234.5));
        assert_eq!(parse_number("-0,25"), Some(-0.25));
        assert_eq!(parse_number("97"), Some(97.0));
    }

    #[test]
    fn test_parse_number_rejects_mixed_or_ambiguous_forms() {
        for s in ["1,234.5", "12.5", "1.23", "1.2345", "1,2,3", ",5", "1.", "1e3", "12,"] {
            assert_eq!(parse_number(s), None, "{}", s);
        }
    }

    #[test]
    fn test_misread_separators_are_counted_not_loaded() {
        let table = RawTable {
            headers: headers(&["2023-01", "2023-02", "2023-03"]),
            rows: vec![vec![
                text("GroupX"),
                text("IndA"),
                text("1,234.5"),
                text("1.234"),
                text("1.234.567"),
            ]],
        };
        let melted = transform(&table, &DescriptorColumns::default(), &EtlConfig::month_columns(2023));

        let values: Vec<f64> = melted.observations.iter().map(|o| o.value).collect();
        assert_eq!(values, vec![1234.0, 1_234_567.0]);
        assert_eq!(melted.non_numeric_cells, 1);
    }
}
