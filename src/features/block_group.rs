//! Census block-group tables backed by polars

use super::{FeatureFrame, FeatureId, FeatureSource, RowId, FRACTION_PREFIX};
use crate::error::{AttributionError, Result};
use ndarray::{Array1, Array2};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Total owner-occupied housing units (ACS B25003).
pub const VARIABLE_TOTAL_OWNER_OCCUPIED: &str = "B25003_002E";

/// Median value of owner-occupied housing units (ACS B25077).
pub const VARIABLE_MEDIAN_VALUE: &str = "B25077_001E";

/// Fraction columns that can be collapsed into a single feature.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureGroup {
    /// Variable code of the combined feature (the column becomes `frac_<name>`)
    pub name: String,
    /// Variable codes of the member fractions
    pub members: Vec<String>,
}

impl FeatureGroup {
    /// Hispanic or Latino, all races (ACS B03002_012E and its breakdown).
    pub fn hispanic_latino() -> Self {
        Self {
            name: "B03002_012E".to_string(),
            members: (13..=21).map(|i| format!("B03002_{i:03}E")).collect(),
        }
    }

    fn column(&self) -> String {
        format!("{FRACTION_PREFIX}{}", self.name)
    }

    fn contains(&self, column: &str) -> bool {
        column
            .strip_prefix(FRACTION_PREFIX)
            .is_some_and(|code| code == self.name || self.members.iter().any(|m| m == code))
    }
}

/// Column layout of a block-group table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractorConfig {
    /// Sample weight column
    pub weight_column: String,
    /// Target column; `{year}` is replaced by the requested vintage
    pub target_column: String,
    /// Non-fraction columns that are also model features
    pub auxiliary_columns: Vec<String>,
    /// Fractions merged when the grouping flag is on
    pub group: FeatureGroup,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            weight_column: VARIABLE_TOTAL_OWNER_OCCUPIED.to_string(),
            target_column: VARIABLE_MEDIAN_VALUE.to_string(),
            auxiliary_columns: vec![VARIABLE_TOTAL_OWNER_OCCUPIED.to_string()],
            group: FeatureGroup::hispanic_latino(),
        }
    }
}

impl ExtractorConfig {
    pub fn with_weight_column(mut self, column: impl Into<String>) -> Self {
        self.weight_column = column.into();
        self
    }

    pub fn with_target_column(mut self, column: impl Into<String>) -> Self {
        self.target_column = column.into();
        self
    }

    pub fn with_auxiliary_columns(mut self, columns: Vec<String>) -> Self {
        self.auxiliary_columns = columns;
        self
    }

    pub fn with_group(mut self, group: FeatureGroup) -> Self {
        self.group = group;
        self
    }

    fn target_for(&self, year: i32) -> String {
        self.target_column.replace("{year}", &year.to_string())
    }
}

/// One feature column definition: the source columns it sums.
#[derive(Debug, Clone)]
struct ColumnPlan {
    feature: FeatureId,
    sources: Vec<String>,
}

/// A block-group table held in memory as a polars `DataFrame`.
#[derive(Debug, Clone)]
pub struct BlockGroupTable {
    df: DataFrame,
    config: ExtractorConfig,
}

impl BlockGroupTable {
    /// Wrap an existing frame, checking the configured columns exist.
    pub fn new(df: DataFrame, config: ExtractorConfig) -> Result<Self> {
        if df.height() == 0 {
            return Err(AttributionError::EmptyInput("block-group table has no rows".to_string()));
        }
        let names = column_names(&df);
        for column in std::iter::once(&config.weight_column).chain(&config.auxiliary_columns) {
            if !names.contains(column) {
                return Err(AttributionError::FeatureNotFound(column.clone()));
            }
        }
        Ok(Self { df, config })
    }

    /// Load a CSV table.
    pub fn from_csv(path: impl AsRef<Path>, config: ExtractorConfig) -> Result<Self> {
        let df = CsvReadOptions::default()
            .with_infer_schema_length(Some(1000))
            .with_has_header(true)
            .try_into_reader_with_file_path(Some(path.as_ref().to_path_buf()))?
            .finish()?;
        Self::new(df, config)
    }

    pub fn frame(&self) -> &DataFrame {
        &self.df
    }

    pub fn config(&self) -> &ExtractorConfig {
        &self.config
    }

    /// Feature columns in table order, with the group collapsed when asked.
    fn plan(&self, group: bool) -> Vec<ColumnPlan> {
        let mut plans = Vec::new();
        let mut group_slot: Option<usize> = None;
        let mut members = Vec::new();

        for name in column_names(&self.df) {
            if !name.starts_with(FRACTION_PREFIX) {
                continue;
            }
            if group && self.config.group.contains(&name) {
                if group_slot.is_none() {
                    group_slot = Some(plans.len());
                    plans.push(ColumnPlan {
                        feature: FeatureId::new(self.config.group.column()),
                        sources: Vec::new(),
                    });
                }
                // The group total is recomputed from its members.
                if name != self.config.group.column() {
                    members.push(name);
                }
                continue;
            }
            plans.push(ColumnPlan { feature: FeatureId::new(name.clone()), sources: vec![name] });
        }

        // Without member columns the existing total stands in for the group.
        if let Some(slot) = group_slot {
            plans[slot].sources = if members.is_empty() {
                vec![self.config.group.column()]
            } else {
                members
            };
        }

        plans.extend(self.config.auxiliary_columns.iter().map(|name| ColumnPlan {
            feature: FeatureId::new(name.clone()),
            sources: vec![name.clone()],
        }));
        plans
    }
}

impl FeatureSource for BlockGroupTable {
    fn n_rows(&self) -> usize {
        self.df.height()
    }

    fn extract(&self, rows: &[RowId], year: i32, group: bool) -> Result<FeatureFrame> {
        let n_total = self.df.height();
        if let Some(bad) = rows.iter().find(|r| r.0 >= n_total) {
            return Err(AttributionError::InvalidInput(format!(
                "row {bad} is outside a table of {n_total} rows"
            )));
        }

        let plans = self.plan(group);
        let columns = plans
            .iter()
            .map(|plan| {
                let mut summed = vec![0.0; n_total];
                for source in &plan.sources {
                    for (acc, v) in summed.iter_mut().zip(column_values(&self.df, source)?) {
                        *acc += v;
                    }
                }
                Ok(summed)
            })
            .collect::<Result<Vec<Vec<f64>>>>()?;

        let x = Array2::from_shape_fn((rows.len(), plans.len()), |(r, c)| columns[c][rows[r].0]);

        let weight_values = column_values(&self.df, &self.config.weight_column)?;
        let weights: Array1<f64> = rows.iter().map(|r| weight_values[r.0]).collect();

        let target_column = self.config.target_for(year);
        let target_values = column_values(&self.df, &target_column)?;
        let target: Array1<f64> = rows.iter().map(|r| target_values[r.0]).collect();
        if let Some((i, y)) = target.iter().enumerate().find(|(_, y)| **y <= 0.0) {
            return Err(AttributionError::InvalidInput(format!(
                "{target_column} must be strictly positive, row {} has {y}",
                rows[i]
            )));
        }

        FeatureFrame::new(
            rows.to_vec(),
            plans.into_iter().map(|p| p.feature).collect(),
            x,
            weights,
            target,
        )
    }
}

fn column_names(df: &DataFrame) -> Vec<String> {
    df.get_column_names().into_iter().map(|s| s.to_string()).collect()
}

/// Read a column as `f64`, rejecting nulls.
fn column_values(df: &DataFrame, name: &str) -> Result<Vec<f64>> {
    let column = df
        .column(name)
        .map_err(|_| AttributionError::FeatureNotFound(name.to_string()))?;
    let series = column.as_materialized_series().cast(&DataType::Float64)?;
    series
        .f64()?
        .into_iter()
        .enumerate()
        .map(|(i, v)| {
            v.ok_or_else(|| AttributionError::DataError(format!("{name} is null at row {i}")))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> DataFrame {
        df!(
            "frac_B03002_003E" => &[0.5, 0.2, 0.7],
            "frac_B03002_013E" => &[0.1, 0.3, 0.0],
            "frac_B03002_014E" => &[0.05, 0.1, 0.2],
            "B25003_002E" => &[100.0, 250.0, 80.0],
            "B25077_001E" => &[250_000.0, 180_000.0, 410_000.0]
        )
        .unwrap()
    }

    #[test]
    fn test_extract_ungrouped() {
        let source = BlockGroupTable::new(table(), ExtractorConfig::default()).unwrap();
        let frame = source.extract(&[RowId(2), RowId(0)], 2020, false).unwrap();

        let names: Vec<&str> = frame.features.iter().map(|f| f.as_str()).collect();
        assert_eq!(
            names,
            vec!["frac_B03002_003E", "frac_B03002_013E", "frac_B03002_014E", "B25003_002E"]
        );
        assert_eq!(frame.row_ids, vec![RowId(2), RowId(0)]);
        assert_eq!(frame.x[[0, 0]], 0.7);
        assert_eq!(frame.x[[1, 0]], 0.5);
        assert_eq!(frame.weights.to_vec(), vec![80.0, 100.0]);
        assert_eq!(frame.target.to_vec(), vec![410_000.0, 250_000.0]);
    }

    #[test]
    fn test_extract_grouped_sums_members() {
        let source = BlockGroupTable::new(table(), ExtractorConfig::default()).unwrap();
        let frame = source.extract(&[RowId(0), RowId(1)], 2020, true).unwrap();

        let names: Vec<&str> = frame.features.iter().map(|f| f.as_str()).collect();
        assert_eq!(names, vec!["frac_B03002_003E", "frac_B03002_012E", "B25003_002E"]);
        assert!((frame.x[[0, 1]] - 0.15).abs() < 1e-12);
        assert!((frame.x[[1, 1]] - 0.4).abs() < 1e-12);
    }

    #[test]
    fn test_grouped_total_without_members_is_kept() {
        let df = df!(
            "frac_B03002_003E" => &[0.5, 0.2],
            "frac_B03002_012E" => &[0.3, 0.6],
            "B25003_002E" => &[100.0, 250.0],
            "B25077_001E" => &[250_000.0, 180_000.0]
        )
        .unwrap();
        let source = BlockGroupTable::new(df, ExtractorConfig::default()).unwrap();
        let frame = source.extract(&[RowId(0), RowId(1)], 2020, true).unwrap();

        let names: Vec<&str> = frame.features.iter().map(|f| f.as_str()).collect();
        assert_eq!(names, vec!["frac_B03002_003E", "frac_B03002_012E", "B25003_002E"]);
        assert_eq!(frame.x.column(1).to_vec(), vec![0.3, 0.6]);
    }

    #[test]
    fn test_extract_is_pure() {
        let source = BlockGroupTable::new(table(), ExtractorConfig::default()).unwrap();
        let a = source.extract(&[RowId(1)], 2020, true).unwrap();
        let b = source.extract(&[RowId(2), RowId(1)], 2020, true).unwrap();
        assert_eq!(a.x.row(0), b.x.row(1));
    }

    #[test]
    fn test_year_placeholder() {
        let df = df!(
            "frac_a" => &[0.5, 0.2],
            "B25003_002E" => &[10.0, 20.0],
            "value_2019" => &[1.0, 2.0],
            "value_2021" => &[3.0, 4.0]
        )
        .unwrap();
        let config = ExtractorConfig::default().with_target_column("value_{year}");
        let source = BlockGroupTable::new(df, config).unwrap();
        let frame = source.extract(&[RowId(0), RowId(1)], 2021, false).unwrap();
        assert_eq!(frame.target.to_vec(), vec![3.0, 4.0]);
    }

    #[test]
    fn test_row_out_of_range() {
        let source = BlockGroupTable::new(table(), ExtractorConfig::default()).unwrap();
        let err = source.extract(&[RowId(3)], 2020, false);
        assert!(matches!(err, Err(AttributionError::InvalidInput(_))));
    }

    #[test]
    fn test_missing_weight_column() {
        let config = ExtractorConfig::default().with_weight_column("nope");
        let err = BlockGroupTable::new(table(), config);
        assert!(matches!(err, Err(AttributionError::FeatureNotFound(_))));
    }

    #[test]
    fn test_non_positive_target_rejected() {
        let df = df!(
            "frac_a" => &[0.5, 0.2],
            "B25003_002E" => &[10.0, 20.0],
            "B25077_001E" => &[100.0, 0.0]
        )
        .unwrap();
        let source = BlockGroupTable::new(df, ExtractorConfig::default()).unwrap();
        let err = source.extract(&[RowId(0), RowId(1)], 2020, false);
        assert!(matches!(err, Err(AttributionError::InvalidInput(_))));
    }
}
