use std::path::Path;

use anyhow::{Context, Result};
use tracing::{debug, info};

use crate::cli::{ExportArgs, resolve_db_path};
use crate::model::InstanceFamily;
use crate::report::{ReportRequest, build_report};
use crate::store::{MeasurementStore, SqliteStore};
use crate::util::ensure_directory;

pub fn run(args: ExportArgs) -> Result<()> {
    let family = InstanceFamily::new(args.sources, args.targets);
    let request = ReportRequest {
        kind: args.report,
        instance: family.instance(args.instance),
        cost_scale: args.cost_scale,
        replicates: args.replicates,
    };

    let db_path = resolve_db_path(&args.data_root, args.db_path.as_deref());
    let results_dir = args
        .results_dir
        .clone()
        .unwrap_or_else(|| args.data_root.join("results"));
    ensure_directory(&results_dir)?;
    let output_path = request.output_path(&results_dir);

    info!(
        report = %request.kind,
        db_path = %db_path.display(),
        output = %output_path.display(),
        "starting export"
    );

    let store = SqliteStore::open_read_only(&db_path)?;
    debug!(path = %store.path().display(), "result store opened");
    let exported = export_report(&store, &request, &output_path);
    let closed = store
        .close()
        .with_context(|| format!("failed to close result store {}", db_path.display()));
    let rows = exported?;
    closed?;

    info!(path = %output_path.display(), rows, "wrote report table");
    Ok(())
}

/// Builds the report for `request` and writes it to `output_path`. Returns the data row count.
pub fn export_report<S>(store: &S, request: &ReportRequest, output_path: &Path) -> Result<usize>
where
    S: MeasurementStore + ?Sized,
{
    let table = build_report(store, request).with_context(|| {
        format!(
            "failed to build {} report for {}",
            request.kind, request.instance
        )
    })?;
    table.write_csv(output_path)?;
    Ok(table.rows().len())
}
