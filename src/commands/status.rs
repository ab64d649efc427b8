use anyhow::{Context, Result};
use rusqlite::{Connection, OpenFlags};
use tracing::{info, warn};

use crate::cli::{StatusArgs, resolve_db_path};
use crate::store::{TableSummary, summarize_tables};

pub fn run(args: StatusArgs) -> Result<()> {
    let db_path = resolve_db_path(&args.data_root, args.db_path.as_deref());
    info!(data_root = %args.data_root.display(), "status requested");

    if !db_path.exists() {
        warn!(path = %db_path.display(), "result store missing");
        return Ok(());
    }

    let connection = Connection::open_with_flags(&db_path, OpenFlags::SQLITE_OPEN_READ_ONLY)
        .with_context(|| format!("failed to open {}", db_path.display()))?;
    let summaries = summarize_tables(&connection)?;
    report(&summaries);

    info!(
        path = %db_path.display(),
        tables = summaries.len(),
        rows = summaries.iter().map(|summary| summary.rows).sum::<i64>(),
        "result store status"
    );

    Ok(())
}

fn report(summaries: &[TableSummary]) {
    if summaries.is_empty() {
        warn!("result store has no instance tables");
    }

    for summary in summaries {
        info!(
            table = %summary.table,
            rows = summary.rows,
            instances = summary.instances,
            "instance family"
        );
    }
}
