use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use rusqlite::types::Value;
use rusqlite::{Connection, OpenFlags, OptionalExtension, Transaction, params};
use tracing::{debug, warn};

use crate::error::ReportError;
use crate::model::{FairnessCoefficient, InstanceFamily, InstanceId, MeasurementKind, PNorm};
use crate::util::round_to;

/// Key of a single measurement lookup.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct LookupKey {
    pub instance: InstanceId,
    pub p_norm: PNorm,
    pub coefficient: FairnessCoefficient,
}

impl LookupKey {
    pub fn new(instance: InstanceId, p_norm: PNorm, coefficient: FairnessCoefficient) -> Self {
        Self {
            instance,
            p_norm,
            coefficient,
        }
    }

    pub fn not_found(&self, field: MeasurementKind) -> ReportError {
        ReportError::DataNotFound {
            table: self.instance.family.table_name(),
            instance: self.instance.to_string(),
            p_norm: self.p_norm.to_string(),
            coefficient: self.coefficient.label(),
            field,
        }
    }

    fn malformed(&self, field: MeasurementKind, reason: impl Into<String>) -> ReportError {
        ReportError::MalformedValue {
            instance: self.instance.to_string(),
            field,
            reason: reason.into(),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Measurement {
    Scalar(f64),
    List(Vec<f64>),
}

/// Point-lookup capability over stored solver results.
///
/// Implementors only provide [`MeasurementStore::fetch`]; the typed accessors apply the
/// value conventions every report relies on.
pub trait MeasurementStore {
    fn fetch(&self, kind: MeasurementKind, key: &LookupKey) -> Result<Measurement, ReportError>;

    fn total_cost(&self, key: &LookupKey) -> Result<f64, ReportError> {
        self.scalar(MeasurementKind::TotalCost, key)
    }

    fn computation_time(&self, key: &LookupKey) -> Result<f64, ReportError> {
        self.scalar(MeasurementKind::ComputationTime, key)
    }

    /// Per-assignment costs, made non-negative and rounded to 2 decimals.
    fn assignment_costs(&self, key: &LookupKey) -> Result<Vec<f64>, ReportError> {
        let kind = MeasurementKind::AssignmentCostList;
        let Measurement::List(values) = self.fetch(kind, key)? else {
            return Err(key.malformed(kind, "expected a list, found a scalar"));
        };

        let negative = values.iter().filter(|value| **value < 0.0).count();
        if negative > 0 {
            warn!(
                instance = %key.instance,
                p_norm = %key.p_norm,
                coefficient = %key.coefficient,
                negative,
                "normalized negative assignment costs by absolute value"
            );
        }

        Ok(values
            .into_iter()
            .map(|value| round_to(value.abs(), 2))
            .collect())
    }

    fn scalar(&self, kind: MeasurementKind, key: &LookupKey) -> Result<f64, ReportError> {
        match self.fetch(kind, key)? {
            Measurement::Scalar(value) => Ok(value),
            Measurement::List(_) => Err(key.malformed(kind, "expected a scalar, found a list")),
        }
    }
}

/// Result store backed by a SQLite database with one table per instance family.
///
/// The connection is owned for the lifetime of a run and closed on drop.
pub struct SqliteStore {
    connection: Connection,
    path: PathBuf,
}

impl SqliteStore {
    pub fn open_read_only(path: &Path) -> Result<Self> {
        let connection = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .with_context(|| format!("failed to open result store read-only: {}", path.display()))?;

        Ok(Self {
            connection,
            path: path.to_path_buf(),
        })
    }

    #[cfg(test)]
    pub fn from_connection(connection: Connection) -> Self {
        Self {
            connection,
            path: PathBuf::from(":memory:"),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Closes the connection, surfacing any error the implicit drop would swallow.
    pub fn close(self) -> Result<(), ReportError> {
        self.connection.close().map_err(|(_, err)| err.into())
    }

    fn table_exists(&self, table: &str) -> Result<bool, ReportError> {
        let mut statement = self
            .connection
            .prepare_cached("SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1")?;
        Ok(statement.exists(params![table])?)
    }
}

impl MeasurementStore for SqliteStore {
    fn fetch(&self, kind: MeasurementKind, key: &LookupKey) -> Result<Measurement, ReportError> {
        let table = key.instance.family.table_name();
        if !self.table_exists(&table)? {
            return Err(key.not_found(kind));
        }

        let sql = format!(
            "SELECT \"{column}\" FROM \"{table}\"
             WHERE instanceName IN (?1, ?2) AND pNorm = ?3 AND fairnessCoefficient = ?4
             ORDER BY instanceName
             LIMIT 1",
            column = kind.column(),
        );
        let instance = key.instance.to_string();
        let instance_file = format!("{instance}.txt");

        let mut statement = self.connection.prepare_cached(&sql)?;
        let raw: Option<Value> = statement
            .query_row(
                params![
                    instance,
                    instance_file,
                    key.p_norm.as_str(),
                    key.coefficient.label()
                ],
                |row| row.get(0),
            )
            .optional()?;

        debug!(
            table = %table,
            instance = %instance,
            p_norm = %key.p_norm,
            coefficient = %key.coefficient,
            field = %kind,
            found = raw.is_some(),
            "result lookup"
        );

        match (kind, raw) {
            (_, None | Some(Value::Null)) => Err(key.not_found(kind)),
            (MeasurementKind::AssignmentCostList, Some(value)) => {
                decode_cost_list(&value).map_err(|reason| key.malformed(kind, reason))
            }
            (_, Some(value)) => decode_scalar(&value)
                .map(Measurement::Scalar)
                .map_err(|reason| key.malformed(kind, reason)),
        }
    }
}

fn decode_scalar(value: &Value) -> Result<f64, String> {
    match value {
        Value::Real(number) => Ok(*number),
        Value::Integer(number) => Ok(*number as f64),
        Value::Text(text) => text
            .trim()
            .parse::<f64>()
            .map_err(|err| format!("not a number: {text:?} ({err})")),
        other => Err(format!("unsupported column type: {:?}", other.data_type())),
    }
}

fn decode_cost_list(value: &Value) -> Result<Measurement, String> {
    let Value::Text(text) = value else {
        return Err(format!(
            "expected serialized list, found {:?}",
            value.data_type()
        ));
    };

    serde_json::from_str::<Vec<f64>>(text)
        .map(Measurement::List)
        .map_err(|err| format!("invalid cost list {text:?}: {err}"))
}

/// Creates the per-family result table if it does not exist yet.
pub fn ensure_family_table(connection: &Connection, family: InstanceFamily) -> Result<()> {
    let table = family.table_name();
    connection
        .execute_batch(&format!(
            "
            CREATE TABLE IF NOT EXISTS \"{table}\" (
              instanceName TEXT NOT NULL,
              pNorm TEXT NOT NULL,
              fairnessCoefficient REAL NOT NULL,
              TotalCost REAL,
              AssignmentCost TEXT,
              computationTimeInSec REAL NOT NULL,
              optimalityGapPercent REAL,
              sourceHash TEXT,
              ingestedAt TEXT,
              PRIMARY KEY (instanceName, pNorm, fairnessCoefficient)
            );
            "
        ))
        .with_context(|| format!("failed to create result table {table}"))
}

/// Row written by ingest for one solver run.
#[derive(Debug, Clone)]
pub struct ResultRow<'a> {
    pub instance_name: &'a str,
    pub p_norm: &'a str,
    pub fairness_coefficient: f64,
    pub total_cost: Option<f64>,
    pub assignment_costs: Option<&'a [f64]>,
    pub computation_time_in_sec: f64,
    pub optimality_gap_percent: Option<f64>,
    pub source_hash: Option<&'a str>,
    pub ingested_at: &'a str,
}

pub fn upsert_result(
    tx: &Transaction<'_>,
    family: InstanceFamily,
    row: &ResultRow<'_>,
) -> Result<()> {
    let table = family.table_name();
    let assignment_costs = row
        .assignment_costs
        .map(serde_json::to_string)
        .transpose()
        .context("failed to serialize assignment costs")?;

    let mut statement = tx.prepare_cached(&format!(
        "
        INSERT INTO \"{table}\"(
          instanceName, pNorm, fairnessCoefficient, TotalCost, AssignmentCost,
          computationTimeInSec, optimalityGapPercent, sourceHash, ingestedAt
        )
        VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
        ON CONFLICT(instanceName, pNorm, fairnessCoefficient) DO UPDATE SET
          TotalCost=excluded.TotalCost,
          AssignmentCost=excluded.AssignmentCost,
          computationTimeInSec=excluded.computationTimeInSec,
          optimalityGapPercent=excluded.optimalityGapPercent,
          sourceHash=excluded.sourceHash,
          ingestedAt=excluded.ingestedAt
        "
    ))?;

    statement
        .execute(params![
            row.instance_name,
            row.p_norm,
            round_to(row.fairness_coefficient, 2),
            row.total_cost,
            assignment_costs,
            row.computation_time_in_sec,
            row.optimality_gap_percent,
            row.source_hash,
            row.ingested_at,
        ])
        .with_context(|| {
            format!(
                "failed to upsert {} pNorm={} fc={} into {table}",
                row.instance_name, row.p_norm, row.fairness_coefficient
            )
        })?;

    Ok(())
}

/// Per-table row counts used by `status`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSummary {
    pub table: String,
    pub rows: i64,
    pub instances: i64,
}

pub fn summarize_tables(connection: &Connection) -> Result<Vec<TableSummary>> {
    let mut statement = connection.prepare(
        "SELECT name FROM sqlite_master WHERE type = 'table' AND name LIKE 'instance\\_%' ESCAPE '\\' ORDER BY name",
    )?;
    let tables = statement
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<rusqlite::Result<Vec<_>>>()
        .context("failed to list result tables")?;

    let mut summaries = Vec::with_capacity(tables.len());
    for table in tables {
        let (rows, instances) = connection
            .query_row(
                &format!("SELECT COUNT(*), COUNT(DISTINCT instanceName) FROM \"{table}\""),
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .with_context(|| format!("failed to count rows in {table}"))?;
        summaries.push(TableSummary {
            table,
            rows,
            instances,
        });
    }

    Ok(summaries)
}


#[cfg(test)]
mod tests {
    use super::fixture::MemoryStore;
    use super::*;
    use crate::model::PARETO_SWEEP;

    fn seeded_store() -> SqliteStore {
        let mut connection = Connection::open_in_memory().expect("in-memory db");
        let family = InstanceFamily::new(5, 100);
        ensure_family_table(&connection, family).expect("schema");

        let tx = connection.transaction().expect("tx");
        upsert_result(
            &tx,
            family,
            &ResultRow {
                instance_name: "instance_5_100_1.txt",
                p_norm: "inf",
                fairness_coefficient: 0.3,
                total_cost: Some(42.5),
                assignment_costs: Some(&[-1.234, 2.0, -3.456][..]),
                computation_time_in_sec: 12.345,
                optimality_gap_percent: Some(0.1),
                source_hash: None,
                ingested_at: "2026-01-01T00:00:00Z",
            },
        )
        .expect("upsert");
        upsert_result(
            &tx,
            family,
            &ResultRow {
                instance_name: "instance_5_100_2",
                p_norm: "2",
                fairness_coefficient: 0.99,
                total_cost: None,
                assignment_costs: None,
                computation_time_in_sec: 3600.0,
                optimality_gap_percent: None,
                source_hash: None,
                ingested_at: "2026-01-01T00:00:00Z",
            },
        )
        .expect("upsert infeasible");
        tx.commit().expect("commit");

        SqliteStore::from_connection(connection)
    }

    fn key(replicate: u32, p_norm: PNorm, hundredths: u32) -> LookupKey {
        LookupKey::new(
            InstanceFamily::new(5, 100).instance(replicate),
            p_norm,
            FairnessCoefficient::from_hundredths(hundredths),
        )
    }

    #[test]
    fn sqlite_lookup_returns_stored_scalars() {
        let store = seeded_store();
        let key = key(1, PNorm::Infinity, 30);

        assert_eq!(store.total_cost(&key).expect("total cost"), 42.5);
        assert_eq!(store.computation_time(&key).expect("time"), 12.345);
    }

    #[test]
    fn sqlite_cost_list_is_made_non_negative_and_rounded() {
        let store = seeded_store();
        let costs = store
            .assignment_costs(&key(1, PNorm::Infinity, 30))
            .expect("cost list");
        assert_eq!(costs, vec![1.23, 2.0, 3.46]);
    }

    #[test]
    fn sqlite_missing_key_echoes_lookup() {
        let store = seeded_store();
        let err = store
            .total_cost(&key(1, PNorm::Two, 30))
            .expect_err("absent pNorm");

        match err {
            ReportError::DataNotFound {
                table,
                instance,
                p_norm,
                coefficient,
                field,
            } => {
                assert_eq!(table, "instance_5_100");
                assert_eq!(instance, "instance_5_100_1");
                assert_eq!(p_norm, "2");
                assert_eq!(coefficient, "0.3");
                assert_eq!(field, MeasurementKind::TotalCost);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn sqlite_null_measurement_counts_as_not_found() {
        let store = seeded_store();
        let key = key(2, PNorm::Two, 99);

        assert!(matches!(
            store.total_cost(&key),
            Err(ReportError::DataNotFound { .. })
        ));
        assert_eq!(store.computation_time(&key).expect("time"), 3600.0);
    }

    #[test]
    fn sqlite_unknown_family_is_not_found() {
        let store = seeded_store();
        let key = LookupKey::new(
            InstanceFamily::new(10, 500).instance(1),
            PNorm::Two,
            PARETO_SWEEP[0],
        );

        let err = store.total_cost(&key).expect_err("no such family");
        assert!(err.to_string().contains("instance_10_500"));
    }

    #[test]
    fn sqlite_text_coefficients_match_sweep_labels() {
        let connection = Connection::open_in_memory().expect("in-memory db");
        connection
            .execute_batch(
                "
                CREATE TABLE instance_3_30 (
                  instanceName TEXT, pNorm TEXT, fairnessCoefficient TEXT,
                  TotalCost TEXT, AssignmentCost TEXT, computationTimeInSec REAL
                );
                INSERT INTO instance_3_30 VALUES
                  ('instance_3_30_7.txt', '10', '0.5', '17.25', '[1.0, -2.0]', 0.5);
                ",
            )
            .expect("legacy table");
        let store = SqliteStore::from_connection(connection);
        let key = LookupKey::new(
            InstanceFamily::new(3, 30).instance(7),
            PNorm::Ten,
            FairnessCoefficient::from_hundredths(50),
        );

        assert_eq!(store.total_cost(&key).expect("text total cost"), 17.25);
        assert_eq!(
            store.assignment_costs(&key).expect("list"),
            vec![1.0, 2.0]
        );
    }

    fn insert_total_cost(store: &mut SqliteStore, instance_name: &str, p_norm: &str, cost: f64) {
        let tx = store.connection.transaction().expect("tx");
        upsert_result(
            &tx,
            InstanceFamily::new(5, 100),
            &ResultRow {
                instance_name,
                p_norm,
                fairness_coefficient: 0.5,
                total_cost: Some(cost),
                assignment_costs: None,
                computation_time_in_sec: 1.0,
                optimality_gap_percent: None,
                source_hash: None,
                ingested_at: "2026-01-01T00:00:00Z",
            },
        )
        .expect("upsert");
        tx.commit().expect("commit");
    }

    #[test]
    fn sqlite_prefers_bare_instance_name_over_file_name() {
        let mut store = seeded_store();
        insert_total_cost(&mut store, "instance_5_100_3.txt", "5", 11.0);
        insert_total_cost(&mut store, "instance_5_100_3", "5", 22.0);

        for _ in 0..3 {
            assert_eq!(store.total_cost(&key(3, PNorm::Five, 50)).expect("total"), 22.0);
        }
    }

    #[test]
    fn sqlite_rows_outside_norm_set_are_never_returned() {
        let mut store = seeded_store();
        insert_total_cost(&mut store, "instance_5_100_4", "7", 9.0);

        for p_norm in PNorm::ALL {
            assert!(matches!(
                store.total_cost(&key(4, p_norm, 50)),
                Err(ReportError::DataNotFound { .. })
            ));
        }
    }

    #[test]
    fn summarize_tables_counts_rows_and_instances() {
        let store = seeded_store();
        let summaries = summarize_tables(&store.connection).expect("summary");
        assert_eq!(
            summaries,
            vec![TableSummary {
                table: "instance_5_100".to_string(),
                rows: 2,
                instances: 2,
            }]
        );
        store.close().expect("close");
    }

    #[test]
    fn memory_store_distinguishes_fields() {
        let mut store = MemoryStore::new();
        let key = key(1, PNorm::Five, 10);
        store.set_total_cost(key, 7.0);

        assert_eq!(store.total_cost(&key).expect("total"), 7.0);
        assert!(matches!(
            store.computation_time(&key),
            Err(ReportError::DataNotFound {
                field: MeasurementKind::ComputationTime,
                ..
            })
        ));
    }
}
