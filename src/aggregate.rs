use crate::error::ReportError;
use crate::util::round_to;

const NORMALIZED_COST_DECIMALS: i32 = 5;
const COV_DECIMALS: i32 = 2;
const PASSTHROUGH_DECIMALS: i32 = 2;

/// Excess cost of every cell over the cheapest cell, relative to the cheapest cell.
///
/// The minimum of the returned values is exactly `0.0` and every value is non-negative. An
/// optimal cost of zero or below makes the ratio meaningless and is rejected, as is any
/// non-finite cost.
pub fn normalized_costs(costs: &[f64]) -> Result<Vec<f64>, ReportError> {
    ensure_finite("normalized cost", "total cost", costs)?;
    let optimal = costs
        .iter()
        .copied()
        .min_by(|left, right| left.total_cmp(right))
        .ok_or_else(|| ReportError::aggregation("normalized cost", "no total costs to normalize"))?;

    if optimal == 0.0 {
        return Err(ReportError::aggregation(
            "normalized cost",
            "optimal total cost is zero",
        ));
    }
    if optimal < 0.0 {
        return Err(ReportError::aggregation(
            "normalized cost",
            format!("optimal total cost is negative: {optimal}"),
        ));
    }

    Ok(costs
        .iter()
        .map(|cost| round_to((cost - optimal) / optimal, NORMALIZED_COST_DECIMALS))
        .collect())
}

/// Population standard deviation over mean.
pub fn coefficient_of_variation(values: &[f64]) -> Result<f64, ReportError> {
    if values.is_empty() {
        return Err(ReportError::aggregation(
            "coefficient of variation",
            "assignment cost list is empty",
        ));
    }
    ensure_finite("coefficient of variation", "assignment cost", values)?;

    let count = values.len() as f64;
    let mean = values.iter().sum::<f64>() / count;
    if mean == 0.0 {
        return Err(ReportError::aggregation(
            "coefficient of variation",
            "mean assignment cost is zero",
        ));
    }

    let variance = values
        .iter()
        .map(|value| (value - mean).powi(2))
        .sum::<f64>()
        / count;

    Ok(round_to(variance.sqrt() / mean, COV_DECIMALS))
}

/// Rounds a stored measurement to 2 decimals for direct output.
pub fn passthrough(value: f64) -> Result<f64, ReportError> {
    ensure_finite("passthrough", "measurement", &[value])?;
    Ok(round_to(value, PASSTHROUGH_DECIMALS))
}

fn ensure_finite(statistic: &'static str, what: &str, values: &[f64]) -> Result<(), ReportError> {
    match values.iter().find(|value| !value.is_finite()) {
        Some(value) => Err(ReportError::aggregation(
            statistic,
            format!("{what} is not finite: {value}"),
        )),
        None => Ok(()),
    }
}
