use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use chrono::Utc;
use rusqlite::Connection;
use tracing::{info, warn};

use crate::cli::{IngestArgs, resolve_db_path};
use crate::model::{IngestRunSummary, InstanceFamily, InstanceId, PNorm, SolverResult};
use crate::store::{ResultRow, ensure_family_table, upsert_result};
use crate::util::{
    ensure_directory, now_utc_string, sha256_file, utc_compact_string, write_json_pretty,
};

struct LoadedResult {
    path: PathBuf,
    sha256: String,
    result: SolverResult,
}

pub fn run(args: IngestArgs) -> Result<()> {
    let started_ts = Utc::now();
    let started_at = now_utc_string();
    let db_path = resolve_db_path(&args.data_root, args.db_path.as_deref());
    if let Some(parent) = db_path.parent() {
        ensure_directory(parent)?;
    }

    info!(
        input_dir = %args.input_dir.display(),
        db_path = %db_path.display(),
        run_id = %format!("ingest-{}", utc_compact_string(started_ts)),
        "starting ingest"
    );

    let files = discover_result_files(&args.input_dir)?;
    if files.is_empty() {
        bail!("no result files found in {}", args.input_dir.display());
    }

    let loaded = files
        .iter()
        .map(|path| load_result(path))
        .collect::<Result<Vec<_>>>()?;

    let mut connection = Connection::open(&db_path)
        .with_context(|| format!("failed to open {}", db_path.display()))?;
    let (rows_upserted, tables) = ingest_results(&mut connection, &loaded, &started_at)?;
    connection
        .close()
        .map_err(|(_, err)| err)
        .with_context(|| format!("failed to close {}", db_path.display()))?;

    let summary = IngestRunSummary {
        input_directory: args.input_dir.display().to_string(),
        db_path: db_path.display().to_string(),
        started_at,
        finished_at: now_utc_string(),
        files_seen: files.len(),
        rows_upserted,
        infeasible_runs: loaded
            .iter()
            .filter(|loaded| loaded.result.objective_value.is_none())
            .count(),
        tables,
    };

    if let Some(summary_path) = &args.summary_path {
        write_json_pretty(summary_path, &summary)?;
        info!(path = %summary_path.display(), "wrote ingest summary");
    }

    info!(
        files = summary.files_seen,
        rows = summary.rows_upserted,
        infeasible = summary.infeasible_runs,
        tables = summary.tables.len(),
        "ingest completed"
    );

    Ok(())
}

fn discover_result_files(input_dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = fs::read_dir(input_dir)
        .with_context(|| format!("failed to read {}", input_dir.display()))?;

    let mut files = Vec::new();
    for entry in entries {
        let entry =
            entry.with_context(|| format!("failed to read entry in {}", input_dir.display()))?;
        let path = entry.path();

        if !entry
            .file_type()
            .with_context(|| format!("failed to inspect file type: {}", path.display()))?
            .is_file()
        {
            continue;
        }

        let is_json = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

        if is_json {
            files.push(path);
        }
    }

    files.sort();
    Ok(files)
}

fn load_result(path: &Path) -> Result<LoadedResult> {
    let raw = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    let result: SolverResult = serde_json::from_slice(&raw)
        .with_context(|| format!("failed to parse solver result {}", path.display()))?;

    let instance = InstanceId::parse(&result.instance_name)
        .with_context(|| format!("unexpected instance name in {}", path.display()))?;
    if instance.family != result.family() {
        bail!(
            "{} names {} but reports {} sources and {} targets",
            path.display(),
            result.instance_name,
            result.num_source,
            result.num_target
        );
    }

    if !PNorm::ALL
        .iter()
        .any(|p_norm| p_norm.as_str() == result.p_norm)
    {
        warn!(
            path = %path.display(),
            p_norm = %result.p_norm,
            "pNorm outside the reported set; row will be stored but never exported"
        );
    }

    Ok(LoadedResult {
        path: path.to_path_buf(),
        sha256: sha256_file(path)?,
        result,
    })
}

/// Upserts every loaded run in one transaction. Returns the row count and touched tables.
fn ingest_results(
    connection: &mut Connection,
    loaded: &[LoadedResult],
    ingested_at: &str,
) -> Result<(usize, Vec<String>)> {
    let mut families: BTreeMap<String, InstanceFamily> = BTreeMap::new();
    for item in loaded {
        let family = item.result.family();
        families.insert(family.table_name(), family);
    }
    for family in families.values() {
        ensure_family_table(connection, *family)?;
    }

    let tx = connection.transaction()?;
    for item in loaded {
        let result = &item.result;
        upsert_result(
            &tx,
            result.family(),
            &ResultRow {
                instance_name: &result.instance_name,
                p_norm: &result.p_norm,
                fairness_coefficient: result.fairness_coefficient,
                total_cost: result.objective_value,
                assignment_costs: result.assignment_costs.as_deref(),
                computation_time_in_sec: result.computation_time_in_sec,
                optimality_gap_percent: result.optimality_gap_percent,
                source_hash: Some(item.sha256.as_str()),
                ingested_at,
            },
        )
        .with_context(|| format!("failed to ingest {}", item.path.display()))?;
    }
    tx.commit().context("failed to commit ingest transaction")?;

    Ok((loaded.len(), families.into_keys().collect()))
}
