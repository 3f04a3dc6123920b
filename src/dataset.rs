//! Telemetry CSV loading

use crate::error::{PipelineError, Result};
use crate::types::telemetry::required_columns;
use crate::types::TelemetryRecord;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::path::Path;
use tracing::info;

/// How rows are read from a telemetry file
#[derive(Debug, Clone, Default)]
pub struct ReadOptions {
    /// Require the `failure_type` label column
    pub require_labels: bool,
    /// Keep a uniform sample of at most this many rows
    pub sample_size: Option<usize>,
    /// Seed for sampling
    pub seed: u64,
}

/// Check a CSV header against the telemetry schema. Extra columns are
/// allowed; every missing required column is reported.
pub fn validate_headers(headers: &csv::StringRecord, require_labels: bool) -> Result<()> {
    let present: Vec<&str> = headers.iter().map(str::trim).collect();
    let mut missing: Vec<String> = required_columns()
        .filter(|column| !present.contains(column))
        .map(str::to_string)
        .collect();
    if require_labels && !present.contains(&"failure_type") {
        missing.push("failure_type".to_string());
    }

    if missing.is_empty() {
        Ok(())
    } else {
        Err(PipelineError::SchemaMismatch { missing })
    }
}

/// Load telemetry records from a CSV file, optionally reservoir-sampling
/// them. Sampled rows keep their file order.
pub fn read_telemetry<P: AsRef<Path>>(path: P, options: &ReadOptions) -> Result<Vec<TelemetryRecord>> {
    let path = path.as_ref();
    let path_display = path.display().to_string();
    if !path.is_file() {
        return Err(PipelineError::InvalidInput {
            path: path_display,
            reason: "file not found".to_string(),
        });
    }

    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::Headers)
        .from_path(path)?;
    validate_headers(reader.headers()?, options.require_labels)?;

    let capacity = options.sample_size.unwrap_or(0);
    let mut rng = StdRng::seed_from_u64(options.seed);
    let mut kept: Vec<(usize, TelemetryRecord)> = Vec::with_capacity(capacity.min(1 << 20));
    let mut total = 0usize;

    for (index, row) in reader.deserialize::<TelemetryRecord>().enumerate() {
        let record = row.map_err(|e| PipelineError::InvalidInput {
            path: path_display.clone(),
            reason: format!("row {}: {}", index + 1, e),
        })?;
        total += 1;

        match options.sample_size {
            Some(k) if kept.len() >= k => {
                let slot = rng.gen_range(0..=index);
                if slot < k {
                    kept[slot] = (index, record);
                }
            }
            _ => kept.push((index, record)),
        }
    }

    if options.sample_size.is_some() {
        kept.sort_by_key(|(index, _)| *index);
    }

    info!(
        path = %path_display,
        rows_read = total,
        rows_kept = kept.len(),
        "Loaded telemetry"
    );

    Ok(kept.into_iter().map(|(_, record)| record).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::generate_to_csv;
    use chrono::{TimeZone, Utc};
    use std::sync::atomic::AtomicBool;

    fn sample_file(dir: &Path, count: u64) -> std::path::PathBuf {
        let path = dir.join("data.csv");
        let anchor = Utc.with_ymd_and_hms(2025, 8, 19, 12, 0, 0).unwrap();
        generate_to_csv(&path, count, 25, 7, anchor, &AtomicBool::new(false)).unwrap();
        path
    }

    #[test]
    fn test_read_all_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = sample_file(dir.path(), 40);
        let records = read_telemetry(&path, &ReadOptions::default()).unwrap();
        assert_eq!(records.len(), 40);
        assert_eq!(records[39].record_id, "rec_00000039");
    }

    #[test]
    fn test_reservoir_sample_keeps_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = sample_file(dir.path(), 100);
        let options = ReadOptions {
            sample_size: Some(10),
            seed: 42,
            ..ReadOptions::default()
        };

        let first = read_telemetry(&path, &options).unwrap();
        let second = read_telemetry(&path, &options).unwrap();
        assert_eq!(first.len(), 10);
        assert_eq!(first, second);

        let ids: Vec<&String> = first.iter().map(|r| &r.record_id).collect();
        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(ids, sorted);
    }

    #[test]
    fn test_empty_cells_are_filled() {
        let dir = tempfile::tempdir().unwrap();
        let source = sample_file(dir.path(), 5);
        let path = dir.path().join("sparse.csv");

        let mut reader = csv::Reader::from_path(&source).unwrap();
        let headers = reader.headers().unwrap().clone();
        let blank: Vec<usize> = ["battery_level_percent", "memory_used_mb", "device_manufacturer"]
            .iter()
            .map(|name| headers.iter().position(|h| h == *name).unwrap())
            .collect();
        let mut writer = csv::Writer::from_path(&path).unwrap();
        writer.write_record(&headers).unwrap();
        for (row, record) in reader.records().enumerate() {
            let record = record.unwrap();
            let fields: Vec<&str> = record
                .iter()
                .enumerate()
                .map(|(i, field)| if row == 2 && blank.contains(&i) { "" } else { field })
                .collect();
            writer.write_record(&fields).unwrap();
        }
        writer.flush().unwrap();

        let records = read_telemetry(&path, &ReadOptions::default()).unwrap();
        assert_eq!(records.len(), 5);
        assert!(records[2].battery_level_percent.is_nan());
        assert_eq!(records[2].memory_used_mb, 0);
        assert_eq!(records[2].device_manufacturer, "");
        assert!(!records[1].battery_level_percent.is_nan());
    }

    #[test]
    fn test_missing_file_is_invalid_input() {
        let dir = tempfile::tempdir().unwrap();
        let err = read_telemetry(dir.path().join("nope.csv"), &ReadOptions::default()).unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn test_missing_columns_are_listed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.csv");
        std::fs::write(&path, "record_id,device_id,extra\nr1,d1,x\n").unwrap();

        let options = ReadOptions {
            require_labels: true,
            ..ReadOptions::default()
        };
        match read_telemetry(&path, &options).unwrap_err() {
            PipelineError::SchemaMismatch { missing } => {
                assert!(missing.contains(&"timestamp".to_string()));
                assert!(missing.contains(&"failure_type".to_string()));
                assert!(!missing.contains(&"record_id".to_string()));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_labels_optional_without_requirement() {
        let mut headers: Vec<&str> = required_columns().collect();
        headers.push("some_extra_column");
        let record = csv::StringRecord::from(headers);
        assert!(validate_headers(&record, false).is_ok());
        assert!(validate_headers(&record, true).is_err());
    }
}
