//! Feature engineering for device telemetry.
//!
//! Turns typed telemetry records into an ordered feature frame: raw
//! numeric fields, temporal features, user/device/model history,
//! anomaly flags, encoded categoricals and interactions. Fit once on
//! training data, then transform any batch (down to a single record)
//! into exactly the fitted columns.

pub mod aggregates;
pub mod encoder;
pub mod frame;

pub use aggregates::HistoryGroup;
pub use encoder::LabelEncoder;
pub use frame::{Column, ColumnKind, FeatureFrame};

use crate::config::FeaturesConfig;
use crate::error::{PipelineError, Result};
use crate::types::telemetry::{NumericKind, NUMERIC_FIELDS};
use crate::types::TelemetryRecord;
use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// Categorical fields encoded as `<name>_encoded`
pub const CATEGORICAL_COLUMNS: [&str; 10] = [
    "device_manufacturer",
    "device_model",
    "os_name",
    "os_version",
    "battery_health_status",
    "battery_charging_status",
    "warranty_status",
    "user_region",
    "user_behavior_profile",
    "kernel_last_boot_reason",
];

/// Columns never used as model inputs
const EXCLUDED_COLUMNS: [&str; 3] = ["failure_occurred", "failure_type", "failure_timestamp"];

/// Placeholder for empty categorical values
const UNKNOWN_CATEGORY: &str = "unknown";

fn categorical_value<'a>(record: &'a TelemetryRecord, column: &str) -> &'a str {
    let value: &str = match column {
        "device_manufacturer" => &record.device_manufacturer,
        "device_model" => &record.device_model,
        "os_name" => &record.os_name,
        "os_version" => &record.os_version,
        "battery_health_status" => &record.battery_health_status,
        "battery_charging_status" => &record.battery_charging_status,
        "warranty_status" => &record.warranty_status,
        "user_region" => &record.user_region,
        "user_behavior_profile" => &record.user_behavior_profile,
        "kernel_last_boot_reason" => &record.kernel_last_boot_reason,
        _ => "",
    };
    if value.is_empty() {
        UNKNOWN_CATEGORY
    } else {
        value
    }
}

/// Parse a telemetry timestamp (RFC 3339 or ISO-like, `T` or space separated)
pub fn parse_timestamp(value: &str) -> Option<NaiveDateTime> {
    let value = value.trim();
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.naive_local())
        .ok()
        .or_else(|| NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f").ok())
        .or_else(|| NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S%.f").ok())
}

fn parse_date(value: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d").ok()
}

/// Fitted feature-engineering state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureEngineer {
    /// Encoder per categorical column
    encoders: BTreeMap<String, LabelEncoder>,
    /// Frozen output column order
    feature_columns: Vec<String>,
    /// Aggregations that fell back to sentinels during fit
    degraded_groups: Vec<HistoryGroup>,
    /// Group high-water mark for user/device aggregation
    max_aggregation_groups: usize,
    fitted: bool,
}

impl FeatureEngineer {
    pub fn new(config: &FeaturesConfig) -> Self {
        Self::with_group_limit(config.max_aggregation_groups)
    }

    pub fn with_group_limit(max_aggregation_groups: usize) -> Self {
        Self {
            encoders: BTreeMap::new(),
            feature_columns: Vec::new(),
            degraded_groups: Vec::new(),
            max_aggregation_groups,
            fitted: false,
        }
    }

    pub fn is_fitted(&self) -> bool {
        self.fitted
    }

    pub fn feature_columns(&self) -> &[String] {
        &self.feature_columns
    }

    pub fn encoders(&self) -> &BTreeMap<String, LabelEncoder> {
        &self.encoders
    }

    pub fn degraded_groups(&self) -> &[HistoryGroup] {
        &self.degraded_groups
    }

    /// Columns filled with sentinel values during fit
    pub fn degraded_features(&self) -> Vec<String> {
        self.degraded_groups
            .iter()
            .flat_map(|group| group.column_names())
            .collect()
    }

    /// Fit encoders and the column list on `records`, then transform them
    pub fn fit_transform(&mut self, records: &[TelemetryRecord]) -> Result<FeatureFrame> {
        info!(rows = records.len(), "Starting feature engineering");

        self.encoders = CATEGORICAL_COLUMNS
            .iter()
            .map(|&column| {
                let encoder =
                    LabelEncoder::fit(records.iter().map(|r| categorical_value(r, column)));
                (column.to_string(), encoder)
            })
            .collect();

        let (frame, degraded) = self.engineer(records, &[]);

        self.feature_columns = frame
            .columns()
            .iter()
            .filter(|c| !EXCLUDED_COLUMNS.contains(&c.name.as_str()))
            .map(|c| c.name.clone())
            .collect();
        self.degraded_groups = degraded;
        self.fitted = true;

        info!(
            features = self.feature_columns.len(),
            degraded = ?self.degraded_groups,
            "Total features created: {}",
            self.feature_columns.len()
        );

        frame.select(&self.feature_columns)
    }

    /// Transform with the fitted state; never mutates it
    pub fn transform(&self, records: &[TelemetryRecord]) -> Result<FeatureFrame> {
        if !self.fitted {
            return Err(PipelineError::Unfitted);
        }
        debug!(rows = records.len(), "Transforming records");

        let (frame, _) = self.engineer(records, &self.degraded_groups);
        frame.select(&self.feature_columns)
    }

    /// Build every feature group in column order. Groups listed in
    /// `forced_fallback` use sentinel values without being computed.
    fn engineer(
        &self,
        records: &[TelemetryRecord],
        forced_fallback: &[HistoryGroup],
    ) -> (FeatureFrame, Vec<HistoryGroup>) {
        let n_rows = records.len();
        let mut frame = FeatureFrame::new(
            records.iter().map(|r| r.record_id.clone()).collect(),
            records.iter().map(|r| r.failure_label().to_string()).collect(),
        );

        // raw numeric
        let mut raw: Vec<Vec<Option<f64>>> = NUMERIC_FIELDS
            .iter()
            .map(|_| Vec::with_capacity(n_rows))
            .collect();
        for record in records {
            for (column, value) in raw.iter_mut().zip(record.numeric_values()) {
                column.push((!value.is_nan()).then_some(value));
            }
        }
        for ((name, kind), values) in NUMERIC_FIELDS.iter().zip(raw) {
            let kind = match kind {
                NumericKind::Float => ColumnKind::Float,
                NumericKind::Count => ColumnKind::Integer,
            };
            frame.push(Column::new(*name, kind, values));
        }

        frame.extend(temporal_columns(records));

        let mut degraded = Vec::new();
        for group in [HistoryGroup::User, HistoryGroup::Device] {
            if forced_fallback.contains(&group) {
                frame.extend(group.fallback_columns(n_rows));
                degraded.push(group);
                continue;
            }

            let computed = match group {
                HistoryGroup::User => aggregates::user_history(records, self.max_aggregation_groups),
                HistoryGroup::Device => {
                    aggregates::device_history(records, self.max_aggregation_groups)
                }
            };
            match computed {
                Ok(columns) => frame.extend(columns),
                Err(failure) => {
                    warn!(
                        group = %group,
                        reason = %failure,
                        "Error in {} features, using simplified version",
                        group
                    );
                    frame.extend(group.fallback_columns(n_rows));
                    degraded.push(group);
                }
            }
        }

        frame.extend(aggregates::model_profile(records));

        let anomalies = anomaly_columns(records, &frame);
        frame.extend(anomalies);

        for column in CATEGORICAL_COLUMNS {
            let values = match self.encoders.get(column) {
                Some(encoder) => records
                    .iter()
                    .map(|r| Some(encoder.encode(categorical_value(r, column)) as f64))
                    .collect(),
                None => vec![Some(-1.0); n_rows],
            };
            frame.push(Column::new(
                format!("{column}_encoded"),
                ColumnKind::Encoded,
                values,
            ));
        }

        frame.extend(interaction_columns(records));

        (frame, degraded)
    }
}

fn temporal_columns(records: &[TelemetryRecord]) -> Vec<Column> {
    let parsed: Vec<(Option<NaiveDateTime>, Option<NaiveDate>)> = records
        .iter()
        .map(|r| {
            (
                parse_timestamp(&r.timestamp),
                parse_date(&r.device_production_date),
            )
        })
        .collect();

    let from_timestamp = |f: fn(&NaiveDateTime) -> f64| -> Vec<Option<f64>> {
        parsed.iter().map(|(ts, _)| ts.as_ref().map(f)).collect()
    };

    vec![
        Column::new(
            "hour_of_day",
            ColumnKind::Integer,
            from_timestamp(|ts| ts.hour() as f64),
        ),
        Column::new(
            "day_of_week",
            ColumnKind::Integer,
            from_timestamp(|ts| ts.weekday().number_from_monday() as f64),
        ),
        Column::new(
            "month",
            ColumnKind::Integer,
            from_timestamp(|ts| ts.month() as f64),
        ),
        Column::new(
            "device_age_actual",
            ColumnKind::Integer,
            parsed
                .iter()
                .map(|(ts, prod)| match (ts, prod) {
                    (Some(ts), Some(prod)) => Some((ts.date() - *prod).num_days() as f64),
                    _ => None,
                })
                .collect(),
        ),
    ]
}

fn anomaly_columns(records: &[TelemetryRecord], frame: &FeatureFrame) -> Vec<Column> {
    let model_stat = |name: &str, factor: f64| -> Vec<Option<f64>> {
        match frame.column(name) {
            Some(column) => column.values.iter().map(|v| v.map(|x| x * factor)).collect(),
            None => vec![None; records.len()],
        }
    };

    let exceeds = |name: &str, limits: Vec<Option<f64>>, value_of: fn(&TelemetryRecord) -> f64| {
        Column::boolean(
            name,
            records
                .iter()
                .zip(limits)
                .map(|(record, limit)| limit.map(|limit| value_of(record) > limit)),
        )
    };

    vec![
        exceeds(
            "cpu_temp_anomaly",
            model_stat("model_avg_cpu_temp", 1.2),
            |r| r.cpu_temperature_c_avg,
        ),
        exceeds(
            "hotspot_temp_anomaly",
            model_stat("model_avg_hotspot_temp", 1.2),
            |r| r.thermal_hotspot_temp_c,
        ),
        exceeds(
            "cpu_usage_anomaly",
            model_stat("model_cpu_95_percentile", 1.0),
            |r| r.cpu_usage_percent,
        ),
        exceeds(
            "memory_usage_anomaly",
            model_stat("model_memory_95_percentile", 1.0),
            |r| r.memory_used_mb as f64,
        ),
        Column::boolean(
            "battery_overheat",
            records.iter().map(|r| Some(r.battery_temperature_c > 45.0)),
        ),
        Column::boolean(
            "battery_critical_low",
            records.iter().map(|r| Some(r.battery_level_percent < 5.0)),
        ),
        Column::boolean(
            "storage_error_spike",
            records
                .iter()
                .map(|r| Some(r.storage_read_errors + r.storage_write_errors > 10)),
        ),
        Column::boolean(
            "kernel_panic_occurred",
            records.iter().map(|r| Some(r.kernel_panics > 0)),
        ),
    ]
}

fn interaction_columns(records: &[TelemetryRecord]) -> Vec<Column> {
    vec![
        Column::float(
            "cpu_temp_usage_interaction",
            records
                .iter()
                .map(|r| r.cpu_temperature_c_avg * r.cpu_usage_percent),
        ),
        Column::float(
            "battery_temp_level_interaction",
            records
                .iter()
                .map(|r| r.battery_temperature_c * r.battery_level_percent),
        ),
        Column::float(
            "age_cpu_interaction",
            records
                .iter()
                .map(|r| r.device_age_days as f64 * r.cpu_usage_percent),
        ),
        Column::float(
            "age_battery_interaction",
            records
                .iter()
                .map(|r| r.device_age_days as f64 * r.battery_level_percent),
        ),
        Column::integer(
            "total_hardware_errors",
            records.iter().map(|r| {
                r.storage_read_errors + r.storage_write_errors + r.memory_ecc_corrected_errors
            }),
        ),
        Column::integer(
            "total_software_errors",
            records.iter().map(|r| {
                r.software_system_crashes + r.software_app_crashes + r.kernel_panics
            }),
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn records() -> Vec<TelemetryRecord> {
        let mut battery = TelemetryRecord::new("rec_1", "dev_1", "user_1", "2025-08-19T10:30:00");
        battery.battery_temperature_c = 52.3;
        battery.battery_charge_cycles = 1850;
        battery.battery_sudden_shutdowns = 8;
        battery.failure_occurred = true;
        battery.failure_type = Some("battery".to_string());

        let mut iphone = TelemetryRecord::new("rec_2", "dev_2", "user_1", "2025-08-17 08:00:00");
        iphone.device_model = "iPhone-14".to_string();
        iphone.device_manufacturer = "Apple".to_string();
        iphone.os_name = "iOS".to_string();

        let clean = TelemetryRecord::new("rec_3", "dev_1", "user_2", "not a timestamp");
        vec![battery, iphone, clean]
    }

    #[test]
    fn test_transform_matches_fitted_columns() {
        let mut engineer = FeatureEngineer::with_group_limit(1000);
        let fitted = engineer.fit_transform(&records()).unwrap();
        let transformed = engineer.transform(&records()).unwrap();

        assert_eq!(transformed.column_names(), engineer.feature_columns());
        assert_eq!(fitted.column_names(), engineer.feature_columns());
        assert_eq!(fitted, transformed);
    }

    #[test]
    fn test_column_groups_in_order() {
        let mut engineer = FeatureEngineer::with_group_limit(1000);
        engineer.fit_transform(&records()).unwrap();
        let columns = engineer.feature_columns();

        let position = |name: &str| columns.iter().position(|c| c == name).unwrap();
        assert_eq!(position("device_age_days"), 0);
        assert!(position("user_failure_history_count") < position("hour_of_day"));
        assert!(position("device_age_actual") < position("user_avg_battery_level"));
        assert!(position("user_telemetry_count") < position("device_battery_volatility"));
        assert!(position("device_record_count") < position("model_failure_rate"));
        assert!(position("model_sample_count") < position("cpu_temp_anomaly"));
        assert!(position("kernel_panic_occurred") < position("device_manufacturer_encoded"));
        assert!(position("kernel_last_boot_reason_encoded") < position("cpu_temp_usage_interaction"));
        assert_eq!(columns.last().unwrap(), "total_software_errors");
    }

    #[test]
    fn test_transform_before_fit_fails() {
        let engineer = FeatureEngineer::with_group_limit(1000);
        assert!(matches!(
            engineer.transform(&records()),
            Err(PipelineError::Unfitted)
        ));
    }

    #[test]
    fn test_unseen_category_encodes_to_minus_one() {
        let mut engineer = FeatureEngineer::with_group_limit(1000);
        engineer.fit_transform(&records()).unwrap();

        let mut unseen = TelemetryRecord::new("rec_9", "dev_9", "user_9", "2025-08-19T10:30:00");
        unseen.device_manufacturer = "UnknownBrand".to_string();
        let frame = engineer.transform(&[unseen]).unwrap();

        let manufacturer = frame.column("device_manufacturer_encoded").unwrap();
        assert_eq!(manufacturer.values[0], Some(-1.0));
        let model = frame.column("device_model_encoded").unwrap();
        let expected = engineer.encoders()["device_model"].encode("Samsung-Galaxy-S22");
        assert_eq!(model.values[0], Some(expected as f64));
    }

    #[test]
    fn test_missing_metric_becomes_null_feature() {
        let mut engineer = FeatureEngineer::with_group_limit(1000);
        engineer.fit_transform(&records()).unwrap();

        let mut record = TelemetryRecord::new("rec_9", "dev_9", "user_9", "2025-08-19T10:30:00");
        record.cpu_usage_percent = f64::NAN;
        record.device_manufacturer = String::new();
        let frame = engineer.transform(std::slice::from_ref(&record)).unwrap();

        assert_eq!(frame.column("cpu_usage_percent").unwrap().values[0], None);
        assert_eq!(
            frame.column("cpu_temp_usage_interaction").unwrap().values[0],
            None
        );
        assert_eq!(
            frame.column("device_manufacturer_encoded").unwrap().values[0],
            Some(-1.0)
        );
        let matrix = frame.to_matrix().unwrap();
        assert!(matrix.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_single_record_is_its_own_group() {
        let mut engineer = FeatureEngineer::with_group_limit(1000);
        engineer.fit_transform(&records()).unwrap();

        let record = TelemetryRecord::new("rec_9", "dev_9", "user_9", "2025-08-19T10:30:00");
        let frame = engineer.transform(std::slice::from_ref(&record)).unwrap();

        assert_eq!(frame.n_rows(), 1);
        assert_eq!(
            frame.column("user_telemetry_count").unwrap().values[0],
            Some(1.0)
        );
        assert_eq!(
            frame.column("model_cpu_95_percentile").unwrap().values[0],
            Some(record.cpu_usage_percent)
        );
        assert_eq!(
            frame.column("device_battery_volatility").unwrap().values[0],
            None
        );
    }

    #[test]
    fn test_temporal_features() {
        let mut engineer = FeatureEngineer::with_group_limit(1000);
        let frame = engineer.fit_transform(&records()).unwrap();

        // 2025-08-19 is a Tuesday, 2025-08-17 a Sunday
        let day = &frame.column("day_of_week").unwrap().values;
        assert_eq!(day[0], Some(2.0));
        assert_eq!(day[1], Some(7.0));
        assert_eq!(day[2], None);

        let hour = &frame.column("hour_of_day").unwrap().values;
        assert_eq!(hour[0], Some(10.0));
        assert_eq!(hour[1], Some(8.0));

        // production date 2023-01-15
        let age = &frame.column("device_age_actual").unwrap().values;
        assert_eq!(age[0], Some(947.0));
    }

    #[test]
    fn test_anomaly_and_interaction_values() {
        let mut engineer = FeatureEngineer::with_group_limit(1000);
        let frame = engineer.fit_transform(&records()).unwrap();

        let overheat = &frame.column("battery_overheat").unwrap().values;
        assert_eq!(overheat[0], Some(1.0));
        assert_eq!(overheat[1], Some(0.0));

        let record = &records()[0];
        let interaction = &frame.column("cpu_temp_usage_interaction").unwrap().values;
        assert_eq!(
            interaction[0],
            Some(record.cpu_temperature_c_avg * record.cpu_usage_percent)
        );
    }

    #[test]
    fn test_degraded_aggregation_uses_sentinels() {
        let mut engineer = FeatureEngineer::with_group_limit(1);
        let frame = engineer.fit_transform(&records()).unwrap();

        assert_eq!(
            engineer.degraded_groups(),
            &[HistoryGroup::User, HistoryGroup::Device]
        );
        assert!(engineer
            .degraded_features()
            .contains(&"device_avg_hotspot_temp".to_string()));
        assert_eq!(
            frame.column("device_avg_hotspot_temp").unwrap().values[0],
            Some(35.0)
        );
        assert_eq!(
            frame.column("user_telemetry_count").unwrap().values[2],
            Some(1.0)
        );

        // sentinels are reproduced at transform time
        let again = engineer.transform(&records()).unwrap();
        assert_eq!(again, frame);
    }

    #[test]
    fn test_persisted_state_encodes_identically() {
        let mut engineer = FeatureEngineer::with_group_limit(1000);
        engineer.fit_transform(&records()).unwrap();

        let json = serde_json::to_string(&engineer).unwrap();
        let restored: FeatureEngineer = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, engineer);
        assert_eq!(
            restored.transform(&records()).unwrap(),
            engineer.transform(&records()).unwrap()
        );
    }
}
