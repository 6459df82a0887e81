//! Time dimension rows derived from "YYYY-MM" month labels.

use crate::error::{EtlError, Result};
use chrono::NaiveDate;

/// A `dim_tempo` row. Every field is a pure function of `ano_mes`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeDimension {
    /// Canonical "YYYY-MM" label, the natural key
    pub ano_mes: String,
    pub ano: i32,
    pub mes: u32,
    /// First day of the month
    pub data_completa: NaiveDate,
}

impl TimeDimension {
    /// Parse a month label such as "2023-07".
    ///
    /// Components are trimmed and the stored label is rendered canonically,
    /// so "2023-7" and "2023-07" derive the same row.
    pub fn derive(label: &str) -> Result<Self> {
        let malformed = || EtlError::MalformedTimeLabel {
            label: label.to_string(),
        };

        let mut parts = label.split('-');
        let (Some(year), Some(month), None) = (parts.next(), parts.next(), parts.next()) else {
            return Err(malformed());
        };

        let ano: i32 = year.trim().parse().map_err(|_| malformed())?;
        let mes: u32 = month.trim().parse().map_err(|_| malformed())?;
        let data_completa = NaiveDate::from_ymd_opt(ano, mes, 1).ok_or_else(malformed)?;

        Ok(Self {
            ano_mes: format!("{:04}-{:02}", ano, mes),
            ano,
            mes,
            data_completa,
        })
    }
}
