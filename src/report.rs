use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::aggregate::{coefficient_of_variation, normalized_costs, passthrough};
use crate::error::ReportError;
use crate::model::{CostScale, InstanceFamily, InstanceId, PARETO_SWEEP, PNorm, ReportKind};
use crate::store::{LookupKey, MeasurementStore};
use crate::table::{Grid, ReportTable, cross_instance_rows};

/// Everything needed to produce one report file.
#[derive(Debug, Clone, Copy)]
pub struct ReportRequest {
    pub kind: ReportKind,
    pub instance: InstanceId,
    pub cost_scale: CostScale,
    pub replicates: u32,
}

impl ReportRequest {
    /// `{kind}_{instance}.csv`, or `computationTime_instance_{s}_{t}.csv` for the
    /// cross-instance report.
    pub fn output_path(&self, results_dir: &Path) -> PathBuf {
        let subject = match self.kind {
            ReportKind::ComputationTime => self.instance.family.table_name(),
            ReportKind::ParetoFront | ReportKind::Cov => self.instance.to_string(),
        };
        results_dir.join(format!("{}_{subject}.csv", self.kind))
    }
}

/// Runs the lookups and aggregation for `request`. The first failing lookup or statistic
/// aborts the whole report.
pub fn build_report<S>(store: &S, request: &ReportRequest) -> Result<ReportTable, ReportError>
where
    S: MeasurementStore + ?Sized,
{
    info!(
        report = %request.kind,
        instance = %request.instance,
        table = %request.instance.family.table_name(),
        "building report"
    );

    match request.kind {
        ReportKind::ParetoFront => pareto_front(store, request.instance, request.cost_scale),
        ReportKind::Cov => cov(store, request.instance),
        ReportKind::ComputationTime => {
            computation_time(store, request.instance.family, request.replicates)
        }
    }
}

fn pareto_front<S>(
    store: &S,
    instance: InstanceId,
    cost_scale: CostScale,
) -> Result<ReportTable, ReportError>
where
    S: MeasurementStore + ?Sized,
{
    let mut grid = Grid::single_instance();
    for (row, p_norm) in PNorm::ALL.into_iter().enumerate() {
        for (column, coefficient) in PARETO_SWEEP.into_iter().enumerate() {
            let key = LookupKey::new(instance, p_norm, coefficient);
            grid.set(row, column, store.total_cost(&key)?)?;
        }
    }

    let costs: Vec<f64> = grid.values().flatten().collect();
    match cost_scale {
        CostScale::Normalized => {
            let normalized = normalized_costs(&costs)?;
            debug!(instance = %instance, cells = normalized.len(), "normalized total costs");
            grid.map_values(normalized);
        }
        CostScale::Raw => {
            let raw = costs
                .into_iter()
                .map(passthrough)
                .collect::<Result<Vec<_>, _>>()?;
            grid.map_values(raw);
        }
    }

    ReportTable::single_instance(instance, grid)
}

fn cov<S>(store: &S, instance: InstanceId) -> Result<ReportTable, ReportError>
where
    S: MeasurementStore + ?Sized,
{
    let mut grid = Grid::single_instance();
    for (row, p_norm) in PNorm::ALL.into_iter().enumerate() {
        for (column, coefficient) in PARETO_SWEEP.into_iter().enumerate() {
            let key = LookupKey::new(instance, p_norm, coefficient);
            let costs = store.assignment_costs(&key)?;
            let value = coefficient_of_variation(&costs).map_err(|err| match err {
                ReportError::Aggregation { statistic, reason } => ReportError::Aggregation {
                    statistic,
                    reason: format!(
                        "{reason} (instance: {instance}, pNorm: {p_norm}, fc: {coefficient})"
                    ),
                },
                other => other,
            })?;
            grid.set(row, column, value)?;
        }
    }

    ReportTable::single_instance(instance, grid)
}

fn computation_time<S>(
    store: &S,
    family: InstanceFamily,
    replicates: u32,
) -> Result<ReportTable, ReportError>
where
    S: MeasurementStore + ?Sized,
{
    let mut grid = Grid::cross_instance(replicates);
    for (row, (p_norm, coefficient)) in cross_instance_rows().enumerate() {
        for (column, replicate) in (1..=replicates).enumerate() {
            let key = LookupKey::new(family.instance(replicate), p_norm, coefficient);
            grid.set(row, column, passthrough(store.computation_time(&key)?)?)?;
        }
        debug!(
            p_norm = %p_norm,
            coefficient = %coefficient,
            replicates,
            "collected computation times"
        );
    }

    ReportTable::cross_instance(family, grid)
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;
    use crate::model::{
        COMPUTATION_TIME_SWEEP, DEFAULT_REPLICATES, FairnessCoefficient, MeasurementKind,
    };
    use crate::store::Measurement;
    use crate::store::fixture::MemoryStore;

    fn instance() -> InstanceId {
        InstanceFamily::new(5, 100).instance(1)
    }

    fn request(kind: ReportKind) -> ReportRequest {
        ReportRequest {
            kind,
            instance: instance(),
            cost_scale: CostScale::Normalized,
            replicates: DEFAULT_REPLICATES,
        }
    }

    fn pareto_store() -> MemoryStore {
        let mut store = MemoryStore::new();
        for (row, p_norm) in PNorm::ALL.into_iter().enumerate() {
            for (column, coefficient) in PARETO_SWEEP.into_iter().enumerate() {
                let cost = if p_norm == PNorm::Two && coefficient.label() == "0.5" {
                    10.0
                } else if p_norm == PNorm::Three && coefficient.label() == "0.1" {
                    15.0
                } else {
                    20.0 + (row * PARETO_SWEEP.len() + column) as f64
                };
                store.set_total_cost(LookupKey::new(instance(), p_norm, coefficient), cost);
            }
        }
        store
    }

    fn render(table: &ReportTable) -> String {
        let mut buf = Vec::new();
        table.write_to(&mut buf).expect("write");
        String::from_utf8(buf).expect("utf8")
    }

    struct CountingStore<'a> {
        inner: &'a MemoryStore,
        lookups: Cell<usize>,
    }

    impl MeasurementStore for CountingStore<'_> {
        fn fetch(
            &self,
            kind: MeasurementKind,
            key: &LookupKey,
        ) -> Result<Measurement, ReportError> {
            self.lookups.set(self.lookups.get() + 1);
            self.inner.fetch(kind, key)
        }
    }

    #[test]
    fn pareto_front_normalizes_against_cheapest_cell() {
        let table = build_report(&pareto_store(), &request(ReportKind::ParetoFront))
            .expect("pareto table");
        let rows = table.rows();

        assert_eq!(rows.len(), 5);
        assert_eq!(rows[0].labels, vec!["pNorm: 2".to_string()]);
        assert_eq!(rows[0].values[4], 0.0);
        assert_eq!(rows[1].values[0], 0.5);
        assert!(rows.iter().flat_map(|row| &row.values).all(|value| *value >= 0.0));

        let rendered = render(&table);
        let lines: Vec<&str> = rendered.lines().collect();
        assert_eq!(lines[0], "instance_name,instance_5_100_1");
        assert!(lines[2].starts_with("pNorm: 2,"));
        assert_eq!(lines[2].split(',').nth(5), Some("0.0"));
        assert_eq!(lines[3].split(',').nth(1), Some("0.5"));
    }

    #[test]
    fn pareto_front_raw_scale_keeps_costs() {
        let mut request = request(ReportKind::ParetoFront);
        request.cost_scale = CostScale::Raw;

        let table = build_report(&pareto_store(), &request).expect("raw table");
        assert_eq!(table.rows()[0].values[4], 10.0);
        assert_eq!(table.rows()[1].values[0], 15.0);
    }

    #[test]
    fn pareto_front_zero_cost_is_an_aggregation_error() {
        let mut store = pareto_store();
        store.set_total_cost(
            LookupKey::new(instance(), PNorm::Ten, PARETO_SWEEP[9]),
            0.0,
        );

        let err = build_report(&store, &request(ReportKind::ParetoFront))
            .expect_err("zero optimum");
        assert!(matches!(err, ReportError::Aggregation { .. }));
    }

    #[test]
    fn pareto_front_rejects_non_finite_cost_in_either_scale() {
        let mut store = pareto_store();
        store.set_total_cost(
            LookupKey::new(instance(), PNorm::Five, PARETO_SWEEP[3]),
            f64::NAN,
        );

        for cost_scale in [CostScale::Normalized, CostScale::Raw] {
            let mut request = request(ReportKind::ParetoFront);
            request.cost_scale = cost_scale;
            let err = build_report(&store, &request).expect_err("nan cell");
            assert!(matches!(err, ReportError::Aggregation { .. }), "{err}");
        }
    }

    #[test]
    fn missing_cell_aborts_with_lookup_key() {
        let mut store = MemoryStore::new();
        store.set_total_cost(
            LookupKey::new(instance(), PNorm::Two, PARETO_SWEEP[0]),
            10.0,
        );

        let err = build_report(&store, &request(ReportKind::ParetoFront))
            .expect_err("sparse store");
        assert_eq!(
            err.to_string(),
            "TotalCost not found in instance_5_100 for instance: instance_5_100_1, pNorm: 2, fc: 0.2"
        );
    }

    #[test]
    fn cov_report_uses_normalized_cost_lists() {
        let mut store = MemoryStore::new();
        for p_norm in PNorm::ALL {
            for coefficient in PARETO_SWEEP {
                store.set_assignment_costs(
                    LookupKey::new(instance(), p_norm, coefficient),
                    vec![-2.0, -4.0, -4.0, -4.0, -5.0, -5.0, -7.0, -9.0],
                );
            }
        }

        let table = build_report(&store, &request(ReportKind::Cov)).expect("cov table");
        assert!(
            table
                .rows()
                .iter()
                .all(|row| row.values.iter().all(|value| *value == 0.4))
        );
    }

    #[test]
    fn cov_report_names_cell_of_degenerate_list() {
        let mut store = MemoryStore::new();
        for p_norm in PNorm::ALL {
            for coefficient in PARETO_SWEEP {
                store.set_assignment_costs(
                    LookupKey::new(instance(), p_norm, coefficient),
                    vec![1.0, 3.0],
                );
            }
        }
        store.set_assignment_costs(
            LookupKey::new(instance(), PNorm::Five, FairnessCoefficient::from_hundredths(70)),
            Vec::new(),
        );

        let err = build_report(&store, &request(ReportKind::Cov)).expect_err("empty list");
        let message = err.to_string();
        assert!(message.contains("pNorm: 5"), "{message}");
        assert!(message.contains("fc: 0.7"), "{message}");
    }

    #[test]
    fn computation_time_visits_every_replicate_once() {
        let mut store = MemoryStore::new();
        let family = InstanceFamily::new(5, 100);
        for p_norm in PNorm::ALL {
            for coefficient in COMPUTATION_TIME_SWEEP {
                for replicate in 1..=DEFAULT_REPLICATES {
                    store.set_computation_time(
                        LookupKey::new(family.instance(replicate), p_norm, coefficient),
                        f64::from(replicate) + 0.004,
                    );
                }
            }
        }
        let counting = CountingStore {
            inner: &store,
            lookups: Cell::new(0),
        };

        let table = build_report(&counting, &request(ReportKind::ComputationTime))
            .expect("time table");

        assert_eq!(counting.lookups.get(), 1500);
        assert_eq!(table.rows().len(), 30);
        assert_eq!(table.header().len(), 52);
        assert_eq!(table.rows()[0].labels, vec!["2".to_string(), "0.1".to_string()]);
        assert_eq!(table.rows()[0].values[0], 1.0);
        assert_eq!(table.rows()[29].values[49], 50.0);
    }

    #[test]
    fn identical_stores_render_identical_tables() {
        let store = pareto_store();
        let first = build_report(&store, &request(ReportKind::ParetoFront)).expect("first");
        let second = build_report(&store.clone(), &request(ReportKind::ParetoFront))
            .expect("second");

        assert_eq!(render(&first), render(&second));
    }

    #[test]
    fn output_paths_follow_report_kind() {
        let dir = Path::new("data/results");
        assert_eq!(
            request(ReportKind::ParetoFront).output_path(dir),
            dir.join("paretoFront_instance_5_100_1.csv")
        );
        assert_eq!(
            request(ReportKind::Cov).output_path(dir),
            dir.join("COV_instance_5_100_1.csv")
        );
        assert_eq!(
            request(ReportKind::ComputationTime).output_path(dir),
            dir.join("computationTime_instance_5_100.csv")
        );
    }
}
