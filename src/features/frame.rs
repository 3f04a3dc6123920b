//! Columnar feature frame

use crate::error::{PipelineError, Result};
use ndarray::Array2;
use serde::{Deserialize, Serialize};

/// Logical type of a feature column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnKind {
    Float,
    Integer,
    Boolean,
    /// Label-encoded categorical (`-1` = unseen)
    Encoded,
}

/// A named, typed column; `None` cells are nulls
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub kind: ColumnKind,
    pub values: Vec<Option<f64>>,
}

impl Column {
    pub fn new(name: impl Into<String>, kind: ColumnKind, values: Vec<Option<f64>>) -> Self {
        Self {
            name: name.into(),
            kind,
            values,
        }
    }

    /// NaN cells become nulls
    pub fn float(name: impl Into<String>, values: impl IntoIterator<Item = f64>) -> Self {
        Self::new(
            name,
            ColumnKind::Float,
            values.into_iter().map(|v| (!v.is_nan()).then_some(v)).collect(),
        )
    }

    pub fn integer(name: impl Into<String>, values: impl IntoIterator<Item = i64>) -> Self {
        Self::new(
            name,
            ColumnKind::Integer,
            values.into_iter().map(|v| Some(v as f64)).collect(),
        )
    }

    pub fn boolean(name: impl Into<String>, values: impl IntoIterator<Item = Option<bool>>) -> Self {
        Self::new(
            name,
            ColumnKind::Boolean,
            values
                .into_iter()
                .map(|v| v.map(|flag| if flag { 1.0 } else { 0.0 }))
                .collect(),
        )
    }

    /// Same value on every row
    pub fn constant(name: impl Into<String>, kind: ColumnKind, value: f64, n_rows: usize) -> Self {
        Self::new(name, kind, vec![Some(value); n_rows])
    }

    pub fn null_count(&self) -> usize {
        self.values.iter().filter(|v| v.is_none()).count()
    }
}

/// Row-aligned feature columns keyed by record id, carrying the target label
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeatureFrame {
    record_ids: Vec<String>,
    targets: Vec<String>,
    columns: Vec<Column>,
}

impl FeatureFrame {
    pub fn new(record_ids: Vec<String>, targets: Vec<String>) -> Self {
        Self {
            record_ids,
            targets,
            columns: Vec::new(),
        }
    }

    pub fn n_rows(&self) -> usize {
        self.record_ids.len()
    }

    pub fn n_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn record_ids(&self) -> &[String] {
        &self.record_ids
    }

    pub fn targets(&self) -> &[String] {
        &self.targets
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Append a column; its length must match the row count
    pub fn push(&mut self, column: Column) {
        debug_assert_eq!(column.values.len(), self.n_rows(), "column {}", column.name);
        self.columns.push(column);
    }

    pub fn extend(&mut self, columns: impl IntoIterator<Item = Column>) {
        for column in columns {
            self.push(column);
        }
    }

    /// Project onto `names`, in that order
    pub fn select(self, names: &[String]) -> Result<Self> {
        let missing: Vec<String> = names
            .iter()
            .filter(|name| self.column(name).is_none())
            .cloned()
            .collect();
        if !missing.is_empty() {
            return Err(PipelineError::SchemaMismatch { missing });
        }

        let mut pool: Vec<Option<Column>> = self.columns.into_iter().map(Some).collect();
        let mut columns = Vec::with_capacity(names.len());
        for name in names {
            if let Some(slot) = pool
                .iter_mut()
                .find(|slot| slot.as_ref().map_or(false, |c| &c.name == name))
            {
                if let Some(column) = slot.take() {
                    columns.push(column);
                }
            }
        }

        Ok(Self {
            record_ids: self.record_ids,
            targets: self.targets,
            columns,
        })
    }

    /// Dense row-major `f32` matrix; nulls become `0`
    pub fn to_matrix(&self) -> Result<Array2<f32>> {
        let (n_rows, n_cols) = (self.n_rows(), self.n_columns());
        let cells = n_rows.checked_mul(n_cols).ok_or_else(|| PipelineError::OutOfMemory {
            stage: "preparing data",
            detail: format!("{n_rows} x {n_cols} matrix overflows"),
        })?;

        let mut data: Vec<f32> = Vec::new();
        data.try_reserve_exact(cells)
            .map_err(|e| PipelineError::OutOfMemory {
                stage: "preparing data",
                detail: format!("{n_rows} x {n_cols} matrix: {e}"),
            })?;

        for row in 0..n_rows {
            for column in &self.columns {
                let value = column.values[row].filter(|v| !v.is_nan()).unwrap_or(0.0);
                data.push(value as f32);
            }
        }

        Array2::from_shape_vec((n_rows, n_cols), data)
            .map_err(|e| PipelineError::Training(format!("feature matrix shape: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame() -> FeatureFrame {
        let mut frame = FeatureFrame::new(
            vec!["r1".to_string(), "r2".to_string()],
            vec!["none".to_string(), "battery".to_string()],
        );
        frame.push(Column::float("a", [1.5, 2.5]));
        frame.push(Column::new("b", ColumnKind::Float, vec![None, Some(4.0)]));
        frame.push(Column::boolean("c", [Some(true), Some(false)]));
        frame
    }

    #[test]
    fn test_select_reorders_columns() {
        let selected = frame().select(&["c".to_string(), "a".to_string()]).unwrap();
        assert_eq!(selected.column_names(), vec!["c", "a"]);
        assert_eq!(selected.n_rows(), 2);
    }

    #[test]
    fn test_select_reports_missing_columns() {
        let err = frame().select(&["a".to_string(), "zz".to_string()]).unwrap_err();
        match err {
            PipelineError::SchemaMismatch { missing } => assert_eq!(missing, vec!["zz"]),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_matrix_fills_nulls_with_zero() {
        let matrix = frame().to_matrix().unwrap();
        assert_eq!(matrix.shape(), &[2, 3]);
        assert_eq!(matrix[[0, 1]], 0.0);
        assert_eq!(matrix[[1, 1]], 4.0);
        assert_eq!(matrix[[0, 2]], 1.0);
    }

    #[test]
    fn test_nan_cells_are_nulls() {
        let column = Column::float("x", [f64::NAN, 2.0]);
        assert_eq!(column.values, vec![None, Some(2.0)]);
        assert_eq!(column.null_count(), 1);

        let mut frame = FeatureFrame::new(
            vec!["r1".to_string()],
            vec!["none".to_string()],
        );
        frame.push(Column::new("y", ColumnKind::Float, vec![Some(f64::NAN)]));
        assert_eq!(frame.to_matrix().unwrap()[[0, 0]], 0.0);
    }
}
