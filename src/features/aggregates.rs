//! Grouped historical aggregations broadcast back to rows.
//!
//! Each aggregation assigns group ids in row order and folds values into
//! per-group accumulators, so results are deterministic for a given input.

use super::frame::{Column, ColumnKind};
use crate::types::TelemetryRecord;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;

/// Aggregations that fall back to sentinel values under memory pressure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryGroup {
    User,
    Device,
}

impl HistoryGroup {
    pub fn column_names(&self) -> Vec<String> {
        self.schema().iter().map(|(name, _, _)| name.to_string()).collect()
    }

    fn schema(&self) -> &'static [(&'static str, ColumnKind, f64)] {
        match self {
            HistoryGroup::User => USER_COLUMNS,
            HistoryGroup::Device => DEVICE_COLUMNS,
        }
    }

    /// Sentinel block used when the aggregation cannot be computed
    pub fn fallback_columns(&self, n_rows: usize) -> Vec<Column> {
        self.schema()
            .iter()
            .map(|(name, kind, value)| Column::constant(*name, *kind, *value, n_rows))
            .collect()
    }
}

impl fmt::Display for HistoryGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HistoryGroup::User => f.write_str("user"),
            HistoryGroup::Device => f.write_str("device"),
        }
    }
}

/// User history columns with their sentinel values
const USER_COLUMNS: &[(&str, ColumnKind, f64)] = &[
    ("user_avg_battery_level", ColumnKind::Float, 0.0),
    ("user_avg_battery_temp", ColumnKind::Float, 0.0),
    ("user_avg_cpu_usage", ColumnKind::Float, 0.0),
    ("user_avg_cpu_temp", ColumnKind::Float, 0.0),
    ("user_avg_memory_usage", ColumnKind::Float, 0.0),
    ("user_total_failures", ColumnKind::Integer, 0.0),
    ("user_failure_rate", ColumnKind::Float, 0.0),
    ("user_telemetry_count", ColumnKind::Integer, 1.0),
];

/// Device history columns with their sentinel values
const DEVICE_COLUMNS: &[(&str, ColumnKind, f64)] = &[
    ("device_battery_volatility", ColumnKind::Float, 0.0),
    ("device_total_shutdowns", ColumnKind::Integer, 0.0),
    ("device_avg_hotspot_temp", ColumnKind::Float, 35.0),
    ("device_max_hotspot_temp", ColumnKind::Float, 45.0),
    ("device_total_storage_errors", ColumnKind::Integer, 0.0),
    ("device_total_kernel_panics", ColumnKind::Integer, 0.0),
    ("device_record_count", ColumnKind::Integer, 1.0),
];

/// Why a guarded aggregation could not be computed
#[derive(Debug, Clone, PartialEq)]
pub enum AggregationFailure {
    TooManyGroups { limit: usize },
    Allocation(String),
}

impl fmt::Display for AggregationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AggregationFailure::TooManyGroups { limit } => {
                write!(f, "more than {limit} distinct groups")
            }
            AggregationFailure::Allocation(detail) => write!(f, "allocation failed: {detail}"),
        }
    }
}

/// Map each row to a dense group id, failing past `limit` groups
fn group_ids<'a>(
    keys: impl Iterator<Item = &'a str>,
    limit: usize,
) -> Result<(Vec<usize>, usize), AggregationFailure> {
    let mut index: HashMap<&'a str, usize> = HashMap::new();
    let mut ids = Vec::new();

    for key in keys {
        let next = index.len();
        let id = match index.get(key) {
            Some(&id) => id,
            None => {
                if next >= limit {
                    return Err(AggregationFailure::TooManyGroups { limit });
                }
                index
                    .try_reserve(1)
                    .map_err(|e| AggregationFailure::Allocation(e.to_string()))?;
                index.insert(key, next);
                next
            }
        };
        ids.push(id);
    }

    Ok((ids, index.len()))
}

#[derive(Debug, Clone, Copy, Default)]
struct Mean {
    sum: f64,
    count: u64,
}

impl Mean {
    fn add(&mut self, value: f64) {
        if value.is_nan() {
            return;
        }
        self.sum += value;
        self.count += 1;
    }

    fn value(&self) -> Option<f64> {
        (self.count > 0).then(|| self.sum / self.count as f64)
    }
}

/// Welford accumulator for the sample standard deviation
#[derive(Debug, Clone, Copy, Default)]
struct Spread {
    count: u64,
    mean: f64,
    m2: f64,
}

impl Spread {
    fn add(&mut self, value: f64) {
        if value.is_nan() {
            return;
        }
        self.count += 1;
        let delta = value - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (value - self.mean);
    }

    fn sample_std(&self) -> Option<f64> {
        (self.count >= 2).then(|| (self.m2 / (self.count - 1) as f64).sqrt())
    }
}

fn broadcast(
    name: &str,
    kind: ColumnKind,
    ids: &[usize],
    per_group: &[Option<f64>],
) -> Column {
    Column::new(name, kind, ids.iter().map(|&g| per_group[g]).collect())
}

#[derive(Debug, Clone, Default)]
struct UserAcc {
    battery_level: Mean,
    battery_temp: Mean,
    cpu_usage: Mean,
    cpu_temp: Mean,
    memory_used: Mean,
    failures: i64,
    count: i64,
}

/// Per-user means, failure totals and record counts
pub fn user_history(
    records: &[TelemetryRecord],
    max_groups: usize,
) -> Result<Vec<Column>, AggregationFailure> {
    let (ids, n_groups) = group_ids(records.iter().map(|r| r.user_id.as_str()), max_groups)?;

    let mut accs = vec![UserAcc::default(); n_groups];
    for (record, &g) in records.iter().zip(&ids) {
        let acc = &mut accs[g];
        acc.battery_level.add(record.battery_level_percent);
        acc.battery_temp.add(record.battery_temperature_c);
        acc.cpu_usage.add(record.cpu_usage_percent);
        acc.cpu_temp.add(record.cpu_temperature_c_avg);
        acc.memory_used.add(record.memory_used_mb as f64);
        acc.failures += i64::from(record.failure_occurred);
        acc.count += 1;
    }

    let per_group: Vec<Vec<Option<f64>>> = vec![
        accs.iter().map(|a| a.battery_level.value()).collect(),
        accs.iter().map(|a| a.battery_temp.value()).collect(),
        accs.iter().map(|a| a.cpu_usage.value()).collect(),
        accs.iter().map(|a| a.cpu_temp.value()).collect(),
        accs.iter().map(|a| a.memory_used.value()).collect(),
        accs.iter().map(|a| Some(a.failures as f64)).collect(),
        accs.iter().map(|a| Some(a.failures as f64 / a.count as f64)).collect(),
        accs.iter().map(|a| Some(a.count as f64)).collect(),
    ];

    Ok(USER_COLUMNS
        .iter()
        .zip(per_group.iter())
        .map(|((name, kind, _), values)| broadcast(name, *kind, &ids, values))
        .collect())
}

#[derive(Debug, Clone, Default)]
struct DeviceAcc {
    battery_level: Spread,
    shutdowns: i64,
    hotspot: Mean,
    hotspot_max: Option<f64>,
    storage_errors: i64,
    kernel_panics: i64,
    count: i64,
}

/// Per-device volatility, error totals and thermal extremes
pub fn device_history(
    records: &[TelemetryRecord],
    max_groups: usize,
) -> Result<Vec<Column>, AggregationFailure> {
    let (ids, n_groups) = group_ids(records.iter().map(|r| r.device_id.as_str()), max_groups)?;

    let mut accs = vec![DeviceAcc::default(); n_groups];
    for (record, &g) in records.iter().zip(&ids) {
        let acc = &mut accs[g];
        acc.battery_level.add(record.battery_level_percent);
        acc.shutdowns += record.battery_sudden_shutdowns;
        acc.hotspot.add(record.thermal_hotspot_temp_c);
        if !record.thermal_hotspot_temp_c.is_nan() {
            acc.hotspot_max = Some(
                acc.hotspot_max
                    .map_or(record.thermal_hotspot_temp_c, |m| m.max(record.thermal_hotspot_temp_c)),
            );
        }
        acc.storage_errors += record.storage_read_errors;
        acc.kernel_panics += record.kernel_panics;
        acc.count += 1;
    }

    let per_group: Vec<Vec<Option<f64>>> = vec![
        accs.iter().map(|a| a.battery_level.sample_std()).collect(),
        accs.iter().map(|a| Some(a.shutdowns as f64)).collect(),
        accs.iter().map(|a| a.hotspot.value()).collect(),
        accs.iter().map(|a| a.hotspot_max).collect(),
        accs.iter().map(|a| Some(a.storage_errors as f64)).collect(),
        accs.iter().map(|a| Some(a.kernel_panics as f64)).collect(),
        accs.iter().map(|a| Some(a.count as f64)).collect(),
    ];

    Ok(DEVICE_COLUMNS
        .iter()
        .zip(per_group.iter())
        .map(|((name, kind, _), values)| broadcast(name, *kind, &ids, values))
        .collect())
}

/// Device-model columns
pub const MODEL_COLUMNS: [(&str, ColumnKind); 9] = [
    ("model_failure_rate", ColumnKind::Float),
    ("model_avg_charge_cycles", ColumnKind::Float),
    ("model_avg_device_age", ColumnKind::Float),
    ("model_avg_cpu_temp", ColumnKind::Float),
    ("model_avg_hotspot_temp", ColumnKind::Float),
    ("model_cpu_95_percentile", ColumnKind::Float),
    ("model_memory_95_percentile", ColumnKind::Float),
    ("model_batch_diversity", ColumnKind::Integer),
    ("model_sample_count", ColumnKind::Integer),
];

#[derive(Debug, Clone, Default)]
struct ModelAcc<'a> {
    failures: Mean,
    charge_cycles: Mean,
    device_age: Mean,
    cpu_temp: Mean,
    hotspot: Mean,
    cpu_usage: Vec<f64>,
    memory_used: Vec<f64>,
    batches: HashSet<&'a str>,
    count: i64,
}

/// Per-model reliability, thermal and performance baselines.
///
/// Device models are few, so this aggregation is not group-limited.
pub fn model_profile(records: &[TelemetryRecord]) -> Vec<Column> {
    let (ids, n_groups) = match group_ids(records.iter().map(|r| r.device_model.as_str()), usize::MAX)
    {
        Ok(groups) => groups,
        Err(_) => (vec![0; records.len()], usize::from(!records.is_empty())),
    };

    let mut accs = vec![ModelAcc::default(); n_groups];
    for (record, &g) in records.iter().zip(&ids) {
        let acc = &mut accs[g];
        acc.failures.add(f64::from(u8::from(record.failure_occurred)));
        acc.charge_cycles.add(record.battery_charge_cycles as f64);
        acc.device_age.add(record.device_age_days as f64);
        acc.cpu_temp.add(record.cpu_temperature_c_avg);
        acc.hotspot.add(record.thermal_hotspot_temp_c);
        acc.cpu_usage.push(record.cpu_usage_percent);
        acc.memory_used.push(record.memory_used_mb as f64);
        acc.batches.insert(record.device_batch_number.as_str());
        acc.count += 1;
    }

    let per_group: Vec<Vec<Option<f64>>> = vec![
        accs.iter().map(|a| a.failures.value()).collect(),
        accs.iter().map(|a| a.charge_cycles.value()).collect(),
        accs.iter().map(|a| a.device_age.value()).collect(),
        accs.iter().map(|a| a.cpu_temp.value()).collect(),
        accs.iter().map(|a| a.hotspot.value()).collect(),
        accs.iter_mut().map(|a| quantile(&mut a.cpu_usage, 0.95)).collect(),
        accs.iter_mut().map(|a| quantile(&mut a.memory_used, 0.95)).collect(),
        accs.iter().map(|a| Some(a.batches.len() as f64)).collect(),
        accs.iter().map(|a| Some(a.count as f64)).collect(),
    ];

    MODEL_COLUMNS
        .iter()
        .zip(per_group.iter())
        .map(|((name, kind), values)| broadcast(name, *kind, &ids, values))
        .collect()
}

/// Quantile with linear interpolation between closest ranks; NaNs excluded
pub fn quantile(values: &mut Vec<f64>, q: f64) -> Option<f64> {
    values.retain(|v| !v.is_nan());
    if values.is_empty() {
        return None;
    }
    values.sort_by(|a, b| a.total_cmp(b));

    let position = q.clamp(0.0, 1.0) * (values.len() - 1) as f64;
    let lower = position.floor() as usize;
    let upper = position.ceil() as usize;
    let fraction = position - lower as f64;
    Some(values[lower] + (values[upper] - values[lower]) * fraction)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(index: usize, user: &str, device: &str) -> TelemetryRecord {
        let mut record = TelemetryRecord::new(
            &format!("rec_{index}"),
            device,
            user,
            "2025-08-19T10:30:00",
        );
        record.battery_level_percent = 10.0 * (index + 1) as f64;
        record
    }

    #[test]
    fn test_user_history_broadcasts_group_means() {
        let mut records = vec![
            record(0, "user_a", "dev_1"),
            record(1, "user_a", "dev_1"),
            record(2, "user_b", "dev_2"),
        ];
        records[1].failure_occurred = true;

        let columns = user_history(&records, 100).unwrap();
        assert_eq!(columns.len(), 8);
        assert_eq!(columns[0].name, "user_avg_battery_level");
        assert_eq!(columns[0].values, vec![Some(15.0), Some(15.0), Some(30.0)]);
        assert_eq!(columns[5].values, vec![Some(1.0), Some(1.0), Some(0.0)]);
        assert_eq!(columns[6].values[0], Some(0.5));
        assert_eq!(columns[7].values, vec![Some(2.0), Some(2.0), Some(1.0)]);
    }

    #[test]
    fn test_device_volatility_is_sample_std() {
        let records = vec![
            record(0, "u", "dev_1"),
            record(1, "u", "dev_1"),
            record(2, "u", "dev_2"),
        ];
        let columns = device_history(&records, 100).unwrap();
        let volatility = &columns[0].values;
        // values 10 and 20
        assert!((volatility[0].unwrap() - 50.0_f64.sqrt()).abs() < 1e-12);
        // singleton device has no spread
        assert_eq!(volatility[2], None);
    }

    #[test]
    fn test_missing_metrics_skipped_in_means() {
        let mut records = vec![record(0, "u", "dev_1"), record(1, "u", "dev_1")];
        records[1].battery_level_percent = f64::NAN;
        records[1].thermal_hotspot_temp_c = f64::NAN;

        let user = user_history(&records, 100).unwrap();
        assert_eq!(user[0].values[0], Some(10.0));

        let device = device_history(&records, 100).unwrap();
        // one observed level leaves no spread
        assert_eq!(device[0].values[0], None);
        assert_eq!(device[3].values[0], Some(records[0].thermal_hotspot_temp_c));
    }

    #[test]
    fn test_group_limit_triggers_failure() {
        let records = vec![
            record(0, "u1", "d"),
            record(1, "u2", "d"),
            record(2, "u3", "d"),
        ];
        let result = user_history(&records, 2);
        assert_eq!(result, Err(AggregationFailure::TooManyGroups { limit: 2 }));
    }

    #[test]
    fn test_fallback_block_values() {
        let user = HistoryGroup::User.fallback_columns(2);
        let values: Vec<f64> = user.iter().map(|c| c.values[0].unwrap()).collect();
        assert_eq!(values, vec![0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 1.0]);

        let device = HistoryGroup::Device.fallback_columns(1);
        let values: Vec<f64> = device.iter().map(|c| c.values[0].unwrap()).collect();
        assert_eq!(values, vec![0.0, 0.0, 35.0, 45.0, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn test_quantile_interpolates_linearly() {
        let mut values = vec![4.0, 1.0, 3.0, 2.0, f64::NAN];
        assert_eq!(quantile(&mut values, 0.5), Some(2.5));
        let mut values: Vec<f64> = (1..=100).map(f64::from).collect();
        assert!((quantile(&mut values, 0.95).unwrap() - 95.05).abs() < 1e-9);
        assert_eq!(quantile(&mut Vec::new(), 0.95), None);
    }

    #[test]
    fn test_model_profile_singleton_group() {
        let records = vec![record(0, "u", "d")];
        let columns = model_profile(&records);
        assert_eq!(columns.len(), 9);
        assert_eq!(columns[5].values[0], Some(records[0].cpu_usage_percent));
        assert_eq!(columns[8].values[0], Some(1.0));
    }
}
