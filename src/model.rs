use std::fmt;
use std::str::FromStr;

use clap::ValueEnum;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::ReportError;
use crate::util::format_decimal;

const INSTANCE_NAME_PATTERN: &str = r"^instance_(\d+)_(\d+)_(\d+)(?:\.txt)?$";

/// Scale of the pareto-front cells.
#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum CostScale {
    /// Excess over the cheapest cell, relative to it.
    Normalized,
    /// Total cost rounded to 2 decimals.
    Raw,
}

/// Distance-norm exponent used by the solver. Treated as a categorical label.
///
/// Stored rows with any other norm (ingest warns about them) cannot be looked up.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub enum PNorm {
    Two,
    Three,
    Five,
    Ten,
    Infinity,
}

impl PNorm {
    /// Row order of every report grid.
    pub const ALL: [PNorm; 5] = [
        PNorm::Two,
        PNorm::Three,
        PNorm::Five,
        PNorm::Ten,
        PNorm::Infinity,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Two => "2",
            Self::Three => "3",
            Self::Five => "5",
            Self::Ten => "10",
            Self::Infinity => "inf",
        }
    }
}

impl fmt::Display for PNorm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fairness coefficient in (0, 1], held as hundredths so sweep values compare exactly.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct FairnessCoefficient(u32);

impl FairnessCoefficient {
    pub const fn from_hundredths(hundredths: u32) -> Self {
        Self(hundredths)
    }

    pub fn value(self) -> f64 {
        f64::from(self.0) / 100.0
    }

    pub fn label(self) -> String {
        format_decimal(self.value())
    }
}

impl fmt::Display for FairnessCoefficient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

const fn fc(hundredths: u32) -> FairnessCoefficient {
    FairnessCoefficient::from_hundredths(hundredths)
}

/// Columns of the single-instance grids: 0.1 through 0.9, then 0.99.
pub const PARETO_SWEEP: [FairnessCoefficient; 10] = [
    fc(10),
    fc(20),
    fc(30),
    fc(40),
    fc(50),
    fc(60),
    fc(70),
    fc(80),
    fc(90),
    fc(99),
];

/// Coarser sweep used by the computation-time grid.
pub const COMPUTATION_TIME_SWEEP: [FairnessCoefficient; 6] =
    [fc(10), fc(30), fc(50), fc(70), fc(90), fc(99)];

pub const DEFAULT_REPLICATES: u32 = 50;

/// A (source-count, target-count) instance family. Each family lives in its own store table.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct InstanceFamily {
    pub sources: u32,
    pub targets: u32,
}

impl InstanceFamily {
    pub fn new(sources: u32, targets: u32) -> Self {
        Self { sources, targets }
    }

    pub fn table_name(self) -> String {
        format!("instance_{}_{}", self.sources, self.targets)
    }

    pub fn instance(self, replicate: u32) -> InstanceId {
        InstanceId {
            family: self,
            replicate,
        }
    }
}

/// `instance_{sources}_{targets}_{replicate}`.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct InstanceId {
    pub family: InstanceFamily,
    pub replicate: u32,
}

impl InstanceId {
    pub fn parse(raw: &str) -> Result<Self, ReportError> {
        let invalid = || ReportError::InvalidInstanceName(raw.to_string());
        let pattern = Regex::new(INSTANCE_NAME_PATTERN).map_err(|_| invalid())?;
        let captures = pattern.captures(raw.trim()).ok_or_else(invalid)?;

        let component = |index: usize| -> Result<u32, ReportError> {
            captures
                .get(index)
                .and_then(|m| m.as_str().parse::<u32>().ok())
                .ok_or_else(invalid)
        };

        Ok(Self {
            family: InstanceFamily::new(component(1)?, component(2)?),
            replicate: component(3)?,
        })
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "instance_{}_{}_{}",
            self.family.sources, self.family.targets, self.replicate
        )
    }
}

/// Measurement fields a lookup can target.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum MeasurementKind {
    TotalCost,
    AssignmentCostList,
    ComputationTime,
}

impl MeasurementKind {
    pub fn column(self) -> &'static str {
        match self {
            Self::TotalCost => "TotalCost",
            Self::AssignmentCostList => "AssignmentCost",
            Self::ComputationTime => "computationTimeInSec",
        }
    }
}

impl fmt::Display for MeasurementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.column())
    }
}

/// Fixed report shapes the exporter can produce.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ReportKind {
    ParetoFront,
    Cov,
    ComputationTime,
}

impl ReportKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ParetoFront => "paretoFront",
            Self::Cov => "COV",
            Self::ComputationTime => "computationTime",
        }
    }
}

impl FromStr for ReportKind {
    type Err = ReportError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "paretoFront" => Ok(Self::ParetoFront),
            "COV" => Ok(Self::Cov),
            "computationTime" => Ok(Self::ComputationTime),
            other => Err(ReportError::InvalidReportKind(other.to_string())),
        }
    }
}

impl fmt::Display for ReportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One solver run as written by the upstream optimizer, one JSON file per run.
///
/// Assignment lists and vertex coordinates are also present in those files but are not
/// needed for reporting and are skipped during deserialization.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SolverResult {
    pub instance_name: String,
    pub num_source: u32,
    pub num_target: u32,
    pub p_norm: String,
    pub fairness_coefficient: f64,
    #[serde(default)]
    pub assignment_costs: Option<Vec<f64>>,
    #[serde(default)]
    pub objective_value: Option<f64>,
    pub computation_time_in_sec: f64,
    #[serde(default)]
    pub optimality_gap_percent: Option<f64>,
}

impl SolverResult {
    pub fn family(&self) -> InstanceFamily {
        InstanceFamily::new(self.num_source, self.num_target)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestRunSummary {
    pub input_directory: String,
    pub db_path: String,
    pub started_at: String,
    pub finished_at: String,
    pub files_seen: usize,
    pub rows_upserted: usize,
    pub infeasible_runs: usize,
    pub tables: Vec<String>,
}
