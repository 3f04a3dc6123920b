//! Synthetic labeled telemetry generation.
//!
//! Records are produced lazily from a seeded RNG and streamed to CSV one
//! bounded batch at a time, so the full dataset never sits in memory.

use crate::error::{PipelineError, Result};
use crate::types::telemetry::{FailureType, TelemetryRecord};
use chrono::{DateTime, Duration, Utc};
use rand::distributions::Distribution;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use statrs::distribution::{Exp, Normal, Poisson};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info};

/// Device models paired with their manufacturer
const DEVICE_MODELS: [(&str, &str); 5] = [
    ("Samsung-Galaxy-S22", "Samsung"),
    ("iPhone-14", "Apple"),
    ("Pixel-7", "Google"),
    ("OnePlus-10", "OnePlus"),
    ("Xiaomi-12", "Xiaomi"),
];

/// Records sharing one device id
const RECORDS_PER_DEVICE: u64 = 10;
/// Records sharing one user id
const RECORDS_PER_USER: u64 = 50;

/// Lazy, seeded sequence of labeled telemetry records
pub struct RecordGenerator {
    rng: StdRng,
    next_index: u64,
    end: u64,
    anchor: DateTime<Utc>,
}

impl RecordGenerator {
    /// Create a generator for `total` records. Timestamps are drawn
    /// relative to `anchor`.
    pub fn new(total: u64, seed: u64, anchor: DateTime<Utc>) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            next_index: 0,
            end: total,
            anchor,
        }
    }

    /// Records not yet produced
    pub fn remaining(&self) -> u64 {
        self.end - self.next_index
    }

    /// Produce at most `batch_size` records; empty once exhausted.
    pub fn next_batch(&mut self, batch_size: usize) -> Vec<TelemetryRecord> {
        let take = (batch_size as u64).min(self.remaining()) as usize;
        let mut batch = Vec::with_capacity(take);
        batch.extend(self.by_ref().take(take));
        batch
    }

    fn build_record(&mut self, index: u64) -> TelemetryRecord {
        let anchor = self.anchor;
        let rng = &mut self.rng;

        let (device_model, manufacturer) = *DEVICE_MODELS
            .choose(rng)
            .unwrap_or(&DEVICE_MODELS[0]);

        let battery_temp = normal(rng, 35.0, 5.0);
        let cpu_temp = normal(rng, 45.0, 8.0);

        let timestamp = anchor - Duration::days(rng.gen_range(0..365));
        let production_date = anchor - Duration::days(rng.gen_range(30..730));
        let security_patch = anchor - Duration::days(rng.gen_range(0..90));

        let memory_total_mb = *[4096_i64, 6144, 8192, 12288].choose(rng).unwrap_or(&8192);
        let storage_total_gb = *[64_i64, 128, 256, 512, 1024].choose(rng).unwrap_or(&128);

        let core_frequencies = (0..8)
            .map(|_| rng.gen_range(1000..3000).to_string())
            .collect::<Vec<_>>()
            .join(",");

        let mut record = TelemetryRecord {
            record_id: format!("rec_{index:08}"),
            device_id: format!("dev_{:06}", index / RECORDS_PER_DEVICE),
            user_id: format!("user_{:05}", index / RECORDS_PER_USER),
            timestamp: timestamp.format("%Y-%m-%dT%H:%M:%S%.6f").to_string(),

            device_model: device_model.to_string(),
            device_manufacturer: manufacturer.to_string(),
            device_batch_number: format!("batch_{:03}", rng.gen_range(1..100)),
            device_production_date: production_date.format("%Y-%m-%d").to_string(),
            device_age_days: rng.gen_range(30..730),
            warranty_status: weighted(rng, &[("in_warranty", 0.7), ("expired", 0.3)]).to_string(),

            os_name: if manufacturer == "Apple" { "iOS" } else { "Android" }.to_string(),
            os_version: rng.gen_range(11..15).to_string(),
            os_build_number: format!("build_{}", rng.gen_range(1000..9999)),
            software_firmware_version: format!(
                "fw_{}.{}",
                rng.gen_range(1..10),
                rng.gen_range(0..99)
            ),
            software_security_patch: security_patch.format("%Y-%m-%d").to_string(),
            software_uptime_hours: exponential(rng, 24.0),
            software_system_crashes: poisson(rng, 1.0),
            software_app_crashes: poisson(rng, 2.0),

            battery_level_percent: rng.gen_range(5.0..100.0),
            battery_health_status: weighted(rng, &[("good", 0.7), ("fair", 0.2), ("poor", 0.1)])
                .to_string(),
            battery_temperature_c: battery_temp,
            battery_voltage_mv: rng.gen_range(3500..4200),
            battery_charge_cycles: rng.gen_range(50..2000),
            battery_charging_status: weighted(rng, &[("charging", 0.3), ("discharging", 0.7)])
                .to_string(),
            battery_current_ma: rng.gen_range(-2000..2000),
            battery_resistance_mohm: rng.gen_range(100..500),
            battery_sudden_shutdowns: poisson(rng, 0.1),

            cpu_usage_percent: rng.gen_range(10.0..90.0),
            cpu_temperature_c_avg: cpu_temp,
            cpu_throttle_events: poisson(rng, 2.0),
            cpu_core_frequencies_mhz: core_frequencies,
            cpu_voltage_scaling_errors: poisson(rng, 0.5),
            cpu_watchdog_resets: poisson(rng, 0.1),

            gpu_usage_percent: rng.gen_range(0.0..80.0),
            gpu_temperature_c: normal(rng, 40.0, 8.0),
            gpu_driver_resets: poisson(rng, 0.2),
            gpu_frequency_mhz: rng.gen_range(400..1000),

            memory_total_mb,
            memory_used_mb: 0,
            memory_swap_used_mb: rng.gen_range(0..1024),
            memory_page_faults: poisson(rng, 100.0),
            memory_oom_kills: poisson(rng, 0.1),
            memory_ecc_corrected_errors: poisson(rng, 0.05),
            memory_dma_faults: poisson(rng, 0.02),

            storage_total_gb,
            storage_used_gb: 0,
            storage_read_errors: poisson(rng, 0.5),
            storage_write_errors: poisson(rng, 0.3),
            storage_bad_block_count: poisson(rng, 2.0),
            storage_io_latency_ms: exponential(rng, 10.0),
            storage_wear_level_percent: rng.gen_range(0.0..50.0),

            thermal_hotspot_temp_c: normal(rng, 50.0, 10.0),
            thermal_sensor_battery_c: battery_temp + normal(rng, 0.0, 2.0),
            thermal_sensor_cpu_cluster0_c: cpu_temp + normal(rng, 0.0, 3.0),
            thermal_sensor_cpu_cluster1_c: cpu_temp + normal(rng, 2.0, 3.0),
            thermal_sensor_gpu_c: normal(rng, 42.0, 8.0),
            thermal_sensor_pmic_c: normal(rng, 38.0, 5.0),
            thermal_shutdowns: poisson(rng, 0.1),

            wifi_signal_dbm: rng.gen_range(-80..-30),
            wifi_disconnects: poisson(rng, 1.0),
            wifi_firmware_crashes: poisson(rng, 0.1),
            wifi_packet_loss_percent: exponential(rng, 2.0),
            cellular_rsrp_dbm: rng.gen_range(-120..-60),
            cellular_drop_calls: poisson(rng, 0.5),
            cellular_modem_resets: poisson(rng, 0.2),
            cellular_handshake_failures: poisson(rng, 1.0),

            peripheral_touchscreen_errors: poisson(rng, 0.3),
            peripheral_camera_init_failures: poisson(rng, 0.2),
            peripheral_mic_speaker_faults: poisson(rng, 0.1),
            peripheral_sensor_hub_desyncs: poisson(rng, 0.5),

            kernel_panics: poisson(rng, 0.1),
            kernel_anrs: poisson(rng, 2.0),
            kernel_irq_storms: poisson(rng, 0.05),
            kernel_driver_probe_failures: poisson(rng, 0.3),
            kernel_system_crash_count: poisson(rng, 0.5),
            kernel_last_boot_reason: ["normal", "crash", "watchdog", "thermal"]
                .choose(rng)
                .copied()
                .unwrap_or("normal")
                .to_string(),

            user_region: ["US", "EU", "ASIA", "OTHER"]
                .choose(rng)
                .copied()
                .unwrap_or("US")
                .to_string(),
            user_account_age_days: rng.gen_range(30..2000),
            user_device_count: rng.gen_range(1..5),
            user_failure_history_count: poisson(rng, 1.0),
            user_behavior_profile: ["light_user", "normal_user", "heavy_gamer", "business_user"]
                .choose(rng)
                .copied()
                .unwrap_or("normal_user")
                .to_string(),

            failure_occurred: false,
            failure_type: None,
            failure_timestamp: None,
        };

        // Dependent fields come last
        record.memory_used_mb = (memory_total_mb as f64 * rng.gen_range(0.3..0.9)) as i64;
        record.storage_used_gb = (storage_total_gb as f64 * rng.gen_range(0.1..0.8)) as i64;

        let failure_type = determine_failure_type(&record);
        record.failure_occurred = failure_type != FailureType::None;
        record.failure_type = Some(failure_type.as_str().to_string());
        if record.failure_occurred {
            let failed_at = anchor - Duration::hours(rng.gen_range(0..24));
            record.failure_timestamp = Some(failed_at.format("%Y-%m-%dT%H:%M:%S%.6f").to_string());
        }

        record
    }
}

impl Iterator for RecordGenerator {
    type Item = TelemetryRecord;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next_index >= self.end {
            return None;
        }
        let index = self.next_index;
        self.next_index += 1;
        Some(self.build_record(index))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.remaining() as usize;
        (remaining, Some(remaining))
    }
}

/// Count the failure indicators raised by a record, per family, in
/// tie-break order.
pub fn failure_indicators(record: &TelemetryRecord) -> [(FailureType, usize); 6] {
    let count = |flags: &[bool]| flags.iter().filter(|&&flag| flag).count();

    [
        (
            FailureType::Battery,
            count(&[
                record.battery_temperature_c > 50.0,
                record.battery_level_percent < 10.0,
                record.battery_charge_cycles > 1000,
                record.battery_sudden_shutdowns > 0,
            ]),
        ),
        (
            FailureType::Thermal,
            count(&[
                record.cpu_temperature_c_avg > 70.0,
                record.thermal_hotspot_temp_c > 65.0,
                record.thermal_shutdowns > 0,
            ]),
        ),
        (
            FailureType::Cpu,
            count(&[
                record.cpu_throttle_events > 10,
                record.cpu_watchdog_resets > 0,
                record.cpu_voltage_scaling_errors > 2,
            ]),
        ),
        (
            FailureType::Storage,
            count(&[
                record.storage_read_errors > 5,
                record.storage_write_errors > 3,
                record.storage_bad_block_count > 10,
                record.storage_wear_level_percent > 80.0,
            ]),
        ),
        (
            FailureType::Connectivity,
            count(&[
                record.wifi_disconnects > 5,
                record.cellular_drop_calls > 3,
                record.wifi_firmware_crashes > 0,
            ]),
        ),
        (
            FailureType::Memory,
            count(&[
                record.memory_oom_kills > 0,
                record.memory_ecc_corrected_errors > 0,
                record.memory_dma_faults > 0,
            ]),
        ),
    ]
}

/// Label a record: the family with the most indicators wins when it has at
/// least two; earlier families win ties.
pub fn determine_failure_type(record: &TelemetryRecord) -> FailureType {
    let mut best = (FailureType::None, 0);
    for (family, score) in failure_indicators(record) {
        if score > best.1 {
            best = (family, score);
        }
    }

    if best.1 >= 2 {
        best.0
    } else {
        FailureType::None
    }
}

/// Outcome of a generation run
#[derive(Debug, Clone)]
pub struct GenerationSummary {
    pub records_written: u64,
    pub label_counts: BTreeMap<String, u64>,
}

/// Stream `total` generated records into a CSV file, one batch at a time.
///
/// The cancellation flag is checked between batches.
pub fn generate_to_csv<P: AsRef<Path>>(
    path: P,
    total: u64,
    batch_size: usize,
    seed: u64,
    anchor: DateTime<Utc>,
    cancel: &AtomicBool,
) -> Result<GenerationSummary> {
    let path = path.as_ref();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }

    info!(
        records = total,
        batch_size = batch_size,
        seed = seed,
        path = %path.display(),
        "Generating sample telemetry"
    );

    let mut writer = csv::Writer::from_path(path)?;
    let mut generator = RecordGenerator::new(total, seed, anchor);
    let mut summary = GenerationSummary {
        records_written: 0,
        label_counts: BTreeMap::new(),
    };

    while generator.remaining() > 0 {
        if cancel.load(Ordering::Relaxed) {
            writer.flush()?;
            info!(written = summary.records_written, "Generation cancelled");
            return Err(PipelineError::Cancelled);
        }

        let batch = generator.next_batch(batch_size.max(1));
        for record in &batch {
            *summary
                .label_counts
                .entry(record.failure_label().to_string())
                .or_insert(0) += 1;
            writer.serialize(record)?;
        }
        writer.flush()?;
        summary.records_written += batch.len() as u64;

        debug!(
            written = summary.records_written,
            total = total,
            "Batch written"
        );
    }

    info!(
        written = summary.records_written,
        labels = ?summary.label_counts,
        "Sample data saved to {}",
        path.display()
    );

    Ok(summary)
}

fn normal(rng: &mut StdRng, mean: f64, std_dev: f64) -> f64 {
    Normal::new(mean, std_dev)
        .map(|dist| dist.sample(rng))
        .unwrap_or(mean)
}

fn exponential(rng: &mut StdRng, mean: f64) -> f64 {
    Exp::new(1.0 / mean)
        .map(|dist| dist.sample(rng))
        .unwrap_or(mean)
}

fn poisson(rng: &mut StdRng, lambda: f64) -> i64 {
    Poisson::new(lambda)
        .map(|dist| dist.sample(rng) as i64)
        .unwrap_or(0)
}

fn weighted<'a>(rng: &mut StdRng, choices: &[(&'a str, f64)]) -> &'a str {
    let mut draw: f64 = rng.gen();
    for (choice, weight) in choices {
        if draw < *weight {
            return choice;
        }
        draw -= weight;
    }
    choices.last().map(|(choice, _)| *choice).unwrap_or("")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn anchor() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 8, 19, 12, 0, 0).unwrap()
    }

    fn clean_record() -> TelemetryRecord {
        TelemetryRecord::new("rec_1", "dev_1", "user_1", "2025-08-19T10:30:00")
    }

    #[test]
    fn test_battery_failure_label() {
        let mut record = clean_record();
        record.battery_temperature_c = 52.3;
        record.battery_charge_cycles = 1850;
        record.battery_sudden_shutdowns = 8;
        record.battery_level_percent = 15.2;

        assert_eq!(determine_failure_type(&record), FailureType::Battery);
    }

    #[test]
    fn test_thermal_failure_label() {
        let mut record = clean_record();
        record.cpu_temperature_c_avg = 89.5;
        record.thermal_hotspot_temp_c = 91.2;
        record.thermal_shutdowns = 8;

        assert_eq!(determine_failure_type(&record), FailureType::Thermal);
    }

    #[test]
    fn test_clean_record_label() {
        assert_eq!(determine_failure_type(&clean_record()), FailureType::None);
    }

    #[test]
    fn test_single_indicator_is_not_a_failure() {
        let mut record = clean_record();
        record.memory_oom_kills = 3;
        assert_eq!(determine_failure_type(&record), FailureType::None);
    }

    #[test]
    fn test_ties_follow_declaration_order() {
        let mut record = clean_record();
        // two memory indicators and two connectivity indicators
        record.memory_oom_kills = 1;
        record.memory_dma_faults = 1;
        record.wifi_disconnects = 9;
        record.wifi_firmware_crashes = 1;
        assert_eq!(determine_failure_type(&record), FailureType::Connectivity);
    }

    #[test]
    fn test_generated_records_respect_invariants() {
        let generator = RecordGenerator::new(500, 42, anchor());
        for (i, record) in generator.enumerate() {
            assert!(record.memory_used_mb <= record.memory_total_mb);
            assert!(record.storage_used_gb <= record.storage_total_gb);
            assert_eq!(record.failure_occurred, record.failure_label() != "none");
            assert_eq!(record.failure_timestamp.is_some(), record.failure_occurred);
            assert_eq!(record.device_id, format!("dev_{:06}", i / 10));
            assert_eq!(record.user_id, format!("user_{:05}", i / 50));
        }
    }

    #[test]
    fn test_same_seed_same_labels() {
        let labels = |seed| {
            RecordGenerator::new(300, seed, anchor())
                .map(|r| r.failure_label().to_string())
                .collect::<Vec<_>>()
        };
        assert_eq!(labels(42), labels(42));
    }

    #[test]
    fn test_batches_are_bounded() {
        let mut generator = RecordGenerator::new(25, 1, anchor());
        assert_eq!(generator.next_batch(10).len(), 10);
        assert_eq!(generator.next_batch(10).len(), 10);
        assert_eq!(generator.next_batch(10).len(), 5);
        assert!(generator.next_batch(10).is_empty());
    }

    #[test]
    fn test_generate_to_csv_writes_all_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.csv");
        let cancel = AtomicBool::new(false);

        let summary = generate_to_csv(&path, 120, 50, 42, anchor(), &cancel).unwrap();
        assert_eq!(summary.records_written, 120);
        assert_eq!(summary.label_counts.values().sum::<u64>(), 120);

        let mut reader = csv::Reader::from_path(&path).unwrap();
        let rows: Vec<TelemetryRecord> = reader.deserialize().map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 120);
        assert_eq!(rows[0].record_id, "rec_00000000");
    }

    #[test]
    fn test_generation_cancelled_between_batches() {
        let dir = tempfile::tempdir().unwrap();
        let cancel = AtomicBool::new(true);
        let result = generate_to_csv(dir.path().join("data.csv"), 100, 10, 42, anchor(), &cancel);
        assert!(matches!(result, Err(PipelineError::Cancelled)));
    }

    #[test]
    fn test_unwritable_output_fails() {
        let dir = tempfile::tempdir().unwrap();
        let cancel = AtomicBool::new(false);
        // a directory cannot be opened as the output file
        let result = generate_to_csv(dir.path(), 10, 10, 42, anchor(), &cancel);
        assert!(result.is_err());
    }
}
