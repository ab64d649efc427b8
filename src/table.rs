use std::io;
use std::path::Path;

use csv::WriterBuilder;

use crate::error::ReportError;
use crate::model::{
    COMPUTATION_TIME_SWEEP, FairnessCoefficient, InstanceFamily, InstanceId, PARETO_SWEEP, PNorm,
};
use crate::util::format_decimal;

/// Dense value grid with fixed row and column keys.
///
/// Every cell starts empty and must be set before the grid can become a [`ReportTable`].
#[derive(Debug, Clone)]
pub struct Grid {
    header_prefix: Vec<String>,
    row_labels: Vec<Vec<String>>,
    columns: Vec<String>,
    cells: Vec<Option<f64>>,
}

impl Grid {
    pub fn new(
        header_prefix: Vec<String>,
        row_labels: Vec<Vec<String>>,
        columns: Vec<String>,
    ) -> Self {
        let cells = vec![None; row_labels.len() * columns.len()];
        Self {
            header_prefix,
            row_labels,
            columns,
            cells,
        }
    }

    /// One row per pNorm, one column per coefficient of the full sweep.
    pub fn single_instance() -> Self {
        Self::new(
            vec!["fairnessCoefficient".to_string()],
            PNorm::ALL
                .iter()
                .map(|p_norm| vec![format!("pNorm: {p_norm}")])
                .collect(),
            PARETO_SWEEP.iter().map(|coefficient| coefficient.label()).collect(),
        )
    }

    /// One row per (pNorm, coefficient) of the coarse sweep, one column per replicate.
    pub fn cross_instance(replicates: u32) -> Self {
        Self::new(
            vec!["pNorm".to_string(), "fairnessCoefficient".to_string()],
            cross_instance_rows()
                .map(|(p_norm, coefficient)| vec![p_norm.to_string(), coefficient.label()])
                .collect(),
            (1..=replicates)
                .map(|replicate| format!("comp_time_instance_{replicate}"))
                .collect(),
        )
    }

    #[cfg(test)]
    pub fn row_count(&self) -> usize {
        self.row_labels.len()
    }

    #[cfg(test)]
    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn set(&mut self, row: usize, column: usize, value: f64) -> Result<(), ReportError> {
        let (rows, columns) = (self.row_labels.len(), self.columns.len());
        if row >= rows || column >= columns {
            return Err(ReportError::CellOutOfBounds {
                row,
                column,
                rows,
                columns,
            });
        }
        self.cells[row * columns + column] = Some(value);
        Ok(())
    }

    pub fn values(&self) -> impl Iterator<Item = Option<f64>> + '_ {
        self.cells.iter().copied()
    }

    /// Replaces every populated cell, preserving order.
    pub fn map_values<F>(&mut self, values: F)
    where
        F: IntoIterator<Item = f64>,
    {
        for (cell, value) in self
            .cells
            .iter_mut()
            .filter(|cell| cell.is_some())
            .zip(values)
        {
            *cell = Some(value);
        }
    }

    fn into_rows(self) -> Result<(Vec<String>, Vec<TableRow>), ReportError> {
        let width = self.columns.len();
        let mut header = self.header_prefix;
        let mut rows = Vec::with_capacity(self.row_labels.len());

        for (index, labels) in self.row_labels.into_iter().enumerate() {
            let mut values = Vec::with_capacity(width);
            for (column, cell) in self.cells[index * width..(index + 1) * width]
                .iter()
                .enumerate()
            {
                let value = cell.ok_or_else(|| ReportError::IncompleteTable {
                    row: labels.join(" "),
                    column: self.columns[column].clone(),
                })?;
                values.push(value);
            }
            rows.push(TableRow { labels, values });
        }

        header.extend(self.columns);
        Ok((header, rows))
    }
}

/// Row keys of the computation-time grid, in output order.
pub fn cross_instance_rows() -> impl Iterator<Item = (PNorm, FairnessCoefficient)> {
    PNorm::ALL.into_iter().flat_map(|p_norm| {
        COMPUTATION_TIME_SWEEP
            .into_iter()
            .map(move |coefficient| (p_norm, coefficient))
    })
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableRow {
    pub labels: Vec<String>,
    pub values: Vec<f64>,
}

/// Fully populated report: metadata rows, a header row, then data rows.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportTable {
    metadata: Vec<Vec<String>>,
    header: Vec<String>,
    rows: Vec<TableRow>,
}

impl ReportTable {
    pub fn single_instance(instance: InstanceId, grid: Grid) -> Result<Self, ReportError> {
        Self::from_grid(
            vec![vec!["instance_name".to_string(), instance.to_string()]],
            grid,
        )
    }

    pub fn cross_instance(family: InstanceFamily, grid: Grid) -> Result<Self, ReportError> {
        Self::from_grid(
            vec![
                vec!["numSources".to_string(), family.sources.to_string()],
                vec!["numTargets".to_string(), family.targets.to_string()],
            ],
            grid,
        )
    }

    fn from_grid(metadata: Vec<Vec<String>>, grid: Grid) -> Result<Self, ReportError> {
        let (header, rows) = grid.into_rows()?;
        Ok(Self {
            metadata,
            header,
            rows,
        })
    }

    #[cfg(test)]
    pub fn header(&self) -> &[String] {
        &self.header
    }

    pub fn rows(&self) -> &[TableRow] {
        &self.rows
    }

    pub fn write_to<W: io::Write>(&self, writer: W) -> Result<(), csv::Error> {
        let mut writer = WriterBuilder::new().flexible(true).from_writer(writer);

        for record in &self.metadata {
            writer.write_record(record)?;
        }
        writer.write_record(&self.header)?;
        for row in &self.rows {
            let record = row
                .labels
                .iter()
                .cloned()
                .chain(row.values.iter().map(|value| format_decimal(*value)));
            writer.write_record(record)?;
        }

        writer.flush()?;
        Ok(())
    }

    /// Writes the table to `path`, replacing any existing file.
    pub fn write_csv(&self, path: &Path) -> Result<(), ReportError> {
        let file = std::fs::File::create(path).map_err(|err| ReportError::Write {
            path: path.to_path_buf(),
            source: err.into(),
        })?;
        self.write_to(io::BufWriter::new(file))
            .map_err(|source| ReportError::Write {
                path: path.to_path_buf(),
                source,
            })
    }
}
