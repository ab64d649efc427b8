use std::path::PathBuf;

use thiserror::Error;

use crate::model::MeasurementKind;

/// Failures that abort a report run.
///
/// Lookup and aggregation errors carry the full key they were raised for so a failed export can
/// be diagnosed from the log line alone.
#[derive(Debug, Error)]
pub enum ReportError {
    #[error(
        "{field} not found in {table} for instance: {instance}, pNorm: {p_norm}, fc: {coefficient}"
    )]
    DataNotFound {
        table: String,
        instance: String,
        p_norm: String,
        coefficient: String,
        field: MeasurementKind,
    },

    #[error("cannot compute {statistic}: {reason}")]
    Aggregation {
        statistic: &'static str,
        reason: String,
    },

    #[error("unsupported report kind: {0} (expected paretoFront, COV or computationTime)")]
    InvalidReportKind(String),

    #[error("invalid instance name: {0} (expected instance_<sources>_<targets>_<replicate>)")]
    InvalidInstanceName(String),

    #[error("malformed {field} value for instance {instance}: {reason}")]
    MalformedValue {
        instance: String,
        field: MeasurementKind,
        reason: String,
    },

    #[error("report table cell left empty at row {row}, column {column}")]
    IncompleteTable { row: String, column: String },

    #[error("cell ({row}, {column}) is outside the {rows}x{columns} report grid")]
    CellOutOfBounds {
        row: usize,
        column: usize,
        rows: usize,
        columns: usize,
    },

    #[error("result store query failed")]
    Store(#[from] rusqlite::Error),

    #[error("failed to write report table {}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
}

impl ReportError {
    pub fn aggregation(statistic: &'static str, reason: impl Into<String>) -> Self {
        Self::Aggregation {
            statistic,
            reason: reason.into(),
        }
    }
}
