//! Device telemetry record and failure label definitions

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// Failure family assigned to a telemetry record.
///
/// Declaration order is the tie-break order used by the labelling rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureType {
    None,
    Battery,
    Thermal,
    Cpu,
    Storage,
    Connectivity,
    Memory,
}

impl FailureType {
    /// Failure families in tie-break order (excludes `None`).
    pub const FAMILIES: [FailureType; 6] = [
        FailureType::Battery,
        FailureType::Thermal,
        FailureType::Cpu,
        FailureType::Storage,
        FailureType::Connectivity,
        FailureType::Memory,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FailureType::None => "none",
            FailureType::Battery => "battery",
            FailureType::Thermal => "thermal",
            FailureType::Cpu => "cpu",
            FailureType::Storage => "storage",
            FailureType::Connectivity => "connectivity",
            FailureType::Memory => "memory",
        }
    }
}

impl fmt::Display for FailureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Storage type of a numeric telemetry field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumericKind {
    /// Continuous metric
    Float,
    /// Event or unit count
    Count,
}

/// Numeric telemetry fields in schema order (label fields excluded).
pub const NUMERIC_FIELDS: &[(&str, NumericKind)] = &[
    ("device_age_days", NumericKind::Count),
    ("software_uptime_hours", NumericKind::Float),
    ("software_system_crashes", NumericKind::Count),
    ("software_app_crashes", NumericKind::Count),
    ("battery_level_percent", NumericKind::Float),
    ("battery_temperature_c", NumericKind::Float),
    ("battery_voltage_mv", NumericKind::Count),
    ("battery_charge_cycles", NumericKind::Count),
    ("battery_current_ma", NumericKind::Count),
    ("battery_resistance_mohm", NumericKind::Count),
    ("battery_sudden_shutdowns", NumericKind::Count),
    ("cpu_usage_percent", NumericKind::Float),
    ("cpu_temperature_c_avg", NumericKind::Float),
    ("cpu_throttle_events", NumericKind::Count),
    ("cpu_voltage_scaling_errors", NumericKind::Count),
    ("cpu_watchdog_resets", NumericKind::Count),
    ("gpu_usage_percent", NumericKind::Float),
    ("gpu_temperature_c", NumericKind::Float),
    ("gpu_driver_resets", NumericKind::Count),
    ("gpu_frequency_mhz", NumericKind::Count),
    ("memory_total_mb", NumericKind::Count),
    ("memory_used_mb", NumericKind::Count),
    ("memory_swap_used_mb", NumericKind::Count),
    ("memory_page_faults", NumericKind::Count),
    ("memory_oom_kills", NumericKind::Count),
    ("memory_ecc_corrected_errors", NumericKind::Count),
    ("memory_dma_faults", NumericKind::Count),
    ("storage_total_gb", NumericKind::Count),
    ("storage_used_gb", NumericKind::Count),
    ("storage_read_errors", NumericKind::Count),
    ("storage_write_errors", NumericKind::Count),
    ("storage_bad_block_count", NumericKind::Count),
    ("storage_io_latency_ms", NumericKind::Float),
    ("storage_wear_level_percent", NumericKind::Float),
    ("thermal_hotspot_temp_c", NumericKind::Float),
    ("thermal_sensor_battery_c", NumericKind::Float),
    ("thermal_sensor_cpu_cluster0_c", NumericKind::Float),
    ("thermal_sensor_cpu_cluster1_c", NumericKind::Float),
    ("thermal_sensor_gpu_c", NumericKind::Float),
    ("thermal_sensor_pmic_c", NumericKind::Float),
    ("thermal_shutdowns", NumericKind::Count),
    ("wifi_signal_dbm", NumericKind::Count),
    ("wifi_disconnects", NumericKind::Count),
    ("wifi_firmware_crashes", NumericKind::Count),
    ("wifi_packet_loss_percent", NumericKind::Float),
    ("cellular_rsrp_dbm", NumericKind::Count),
    ("cellular_drop_calls", NumericKind::Count),
    ("cellular_modem_resets", NumericKind::Count),
    ("cellular_handshake_failures", NumericKind::Count),
    ("peripheral_touchscreen_errors", NumericKind::Count),
    ("peripheral_camera_init_failures", NumericKind::Count),
    ("peripheral_mic_speaker_faults", NumericKind::Count),
    ("peripheral_sensor_hub_desyncs", NumericKind::Count),
    ("kernel_panics", NumericKind::Count),
    ("kernel_anrs", NumericKind::Count),
    ("kernel_irq_storms", NumericKind::Count),
    ("kernel_driver_probe_failures", NumericKind::Count),
    ("kernel_system_crash_count", NumericKind::Count),
    ("user_account_age_days", NumericKind::Count),
    ("user_device_count", NumericKind::Count),
    ("user_failure_history_count", NumericKind::Count),
];

/// String-valued telemetry fields (identifiers, metadata, categoricals).
pub const STRING_FIELDS: &[&str] = &[
    "record_id",
    "device_id",
    "user_id",
    "timestamp",
    "device_model",
    "device_manufacturer",
    "device_batch_number",
    "device_production_date",
    "warranty_status",
    "os_name",
    "os_version",
    "os_build_number",
    "software_firmware_version",
    "software_security_patch",
    "battery_health_status",
    "battery_charging_status",
    "cpu_core_frequencies_mhz",
    "kernel_last_boot_reason",
    "user_region",
    "user_behavior_profile",
];

/// Label fields; optional on input.
pub const LABEL_FIELDS: &[&str] = &["failure_occurred", "failure_type", "failure_timestamp"];

/// Columns that must be present in a telemetry CSV header.
pub fn required_columns() -> impl Iterator<Item = &'static str> {
    STRING_FIELDS
        .iter()
        .copied()
        .chain(NUMERIC_FIELDS.iter().map(|(name, _)| *name))
}

/// One observation of a device's state at a point in time.
///
/// Null or empty input cells are tolerated: text reads as empty, continuous
/// metrics as NaN (a null feature) and counts as zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryRecord {
    // Identifiers
    #[serde(deserialize_with = "deserialize_text")]
    pub record_id: String,
    #[serde(deserialize_with = "deserialize_text")]
    pub device_id: String,
    #[serde(deserialize_with = "deserialize_text")]
    pub user_id: String,
    #[serde(deserialize_with = "deserialize_text")]
    pub timestamp: String,

    // Device metadata
    #[serde(deserialize_with = "deserialize_text")]
    pub device_model: String,
    #[serde(deserialize_with = "deserialize_text")]
    pub device_manufacturer: String,
    #[serde(deserialize_with = "deserialize_text")]
    pub device_batch_number: String,
    #[serde(deserialize_with = "deserialize_text")]
    pub device_production_date: String,
    #[serde(deserialize_with = "deserialize_count")]
    pub device_age_days: i64,
    #[serde(deserialize_with = "deserialize_text")]
    pub warranty_status: String,

    // OS & software
    #[serde(deserialize_with = "deserialize_text")]
    pub os_name: String,
    #[serde(deserialize_with = "deserialize_text")]
    pub os_version: String,
    #[serde(deserialize_with = "deserialize_text")]
    pub os_build_number: String,
    #[serde(deserialize_with = "deserialize_text")]
    pub software_firmware_version: String,
    #[serde(deserialize_with = "deserialize_text")]
    pub software_security_patch: String,
    #[serde(deserialize_with = "deserialize_number")]
    pub software_uptime_hours: f64,
    #[serde(deserialize_with = "deserialize_count")]
    pub software_system_crashes: i64,
    #[serde(deserialize_with = "deserialize_count")]
    pub software_app_crashes: i64,

    // Battery
    #[serde(deserialize_with = "deserialize_number")]
    pub battery_level_percent: f64,
    #[serde(deserialize_with = "deserialize_text")]
    pub battery_health_status: String,
    #[serde(deserialize_with = "deserialize_number")]
    pub battery_temperature_c: f64,
    #[serde(deserialize_with = "deserialize_count")]
    pub battery_voltage_mv: i64,
    #[serde(deserialize_with = "deserialize_count")]
    pub battery_charge_cycles: i64,
    #[serde(deserialize_with = "deserialize_text")]
    pub battery_charging_status: String,
    #[serde(deserialize_with = "deserialize_count")]
    pub battery_current_ma: i64,
    #[serde(deserialize_with = "deserialize_count")]
    pub battery_resistance_mohm: i64,
    #[serde(deserialize_with = "deserialize_count")]
    pub battery_sudden_shutdowns: i64,

    // CPU
    #[serde(deserialize_with = "deserialize_number")]
    pub cpu_usage_percent: f64,
    #[serde(deserialize_with = "deserialize_number")]
    pub cpu_temperature_c_avg: f64,
    #[serde(deserialize_with = "deserialize_count")]
    pub cpu_throttle_events: i64,
    #[serde(deserialize_with = "deserialize_text")]
    pub cpu_core_frequencies_mhz: String,
    #[serde(deserialize_with = "deserialize_count")]
    pub cpu_voltage_scaling_errors: i64,
    #[serde(deserialize_with = "deserialize_count")]
    pub cpu_watchdog_resets: i64,

    // GPU
    #[serde(deserialize_with = "deserialize_number")]
    pub gpu_usage_percent: f64,
    #[serde(deserialize_with = "deserialize_number")]
    pub gpu_temperature_c: f64,
    #[serde(deserialize_with = "deserialize_count")]
    pub gpu_driver_resets: i64,
    #[serde(deserialize_with = "deserialize_count")]
    pub gpu_frequency_mhz: i64,

    // Memory
    #[serde(deserialize_with = "deserialize_count")]
    pub memory_total_mb: i64,
    #[serde(deserialize_with = "deserialize_count")]
    pub memory_used_mb: i64,
    #[serde(deserialize_with = "deserialize_count")]
    pub memory_swap_used_mb: i64,
    #[serde(deserialize_with = "deserialize_count")]
    pub memory_page_faults: i64,
    #[serde(deserialize_with = "deserialize_count")]
    pub memory_oom_kills: i64,
    #[serde(deserialize_with = "deserialize_count")]
    pub memory_ecc_corrected_errors: i64,
    #[serde(deserialize_with = "deserialize_count")]
    pub memory_dma_faults: i64,

    // Storage
    #[serde(deserialize_with = "deserialize_count")]
    pub storage_total_gb: i64,
    #[serde(deserialize_with = "deserialize_count")]
    pub storage_used_gb: i64,
    #[serde(deserialize_with = "deserialize_count")]
    pub storage_read_errors: i64,
    #[serde(deserialize_with = "deserialize_count")]
    pub storage_write_errors: i64,
    #[serde(deserialize_with = "deserialize_count")]
    pub storage_bad_block_count: i64,
    #[serde(deserialize_with = "deserialize_number")]
    pub storage_io_latency_ms: f64,
    #[serde(deserialize_with = "deserialize_number")]
    pub storage_wear_level_percent: f64,

    // Thermal
    #[serde(deserialize_with = "deserialize_number")]
    pub thermal_hotspot_temp_c: f64,
    #[serde(deserialize_with = "deserialize_number")]
    pub thermal_sensor_battery_c: f64,
    #[serde(deserialize_with = "deserialize_number")]
    pub thermal_sensor_cpu_cluster0_c: f64,
    #[serde(deserialize_with = "deserialize_number")]
    pub thermal_sensor_cpu_cluster1_c: f64,
    #[serde(deserialize_with = "deserialize_number")]
    pub thermal_sensor_gpu_c: f64,
    #[serde(deserialize_with = "deserialize_number")]
    pub thermal_sensor_pmic_c: f64,
    #[serde(deserialize_with = "deserialize_count")]
    pub thermal_shutdowns: i64,

    // Connectivity
    #[serde(deserialize_with = "deserialize_count")]
    pub wifi_signal_dbm: i64,
    #[serde(deserialize_with = "deserialize_count")]
    pub wifi_disconnects: i64,
    #[serde(deserialize_with = "deserialize_count")]
    pub wifi_firmware_crashes: i64,
    #[serde(deserialize_with = "deserialize_number")]
    pub wifi_packet_loss_percent: f64,
    #[serde(deserialize_with = "deserialize_count")]
    pub cellular_rsrp_dbm: i64,
    #[serde(deserialize_with = "deserialize_count")]
    pub cellular_drop_calls: i64,
    #[serde(deserialize_with = "deserialize_count")]
    pub cellular_modem_resets: i64,
    #[serde(deserialize_with = "deserialize_count")]
    pub cellular_handshake_failures: i64,

    // Peripherals
    #[serde(deserialize_with = "deserialize_count")]
    pub peripheral_touchscreen_errors: i64,
    #[serde(deserialize_with = "deserialize_count")]
    pub peripheral_camera_init_failures: i64,
    #[serde(deserialize_with = "deserialize_count")]
    pub peripheral_mic_speaker_faults: i64,
    #[serde(deserialize_with = "deserialize_count")]
    pub peripheral_sensor_hub_desyncs: i64,

    // Kernel
    #[serde(deserialize_with = "deserialize_count")]
    pub kernel_panics: i64,
    #[serde(deserialize_with = "deserialize_count")]
    pub kernel_anrs: i64,
    #[serde(deserialize_with = "deserialize_count")]
    pub kernel_irq_storms: i64,
    #[serde(deserialize_with = "deserialize_count")]
    pub kernel_driver_probe_failures: i64,
    #[serde(deserialize_with = "deserialize_count")]
    pub kernel_system_crash_count: i64,
    #[serde(deserialize_with = "deserialize_text")]
    pub kernel_last_boot_reason: String,

    // User profile
    #[serde(deserialize_with = "deserialize_text")]
    pub user_region: String,
    #[serde(deserialize_with = "deserialize_count")]
    pub user_account_age_days: i64,
    #[serde(deserialize_with = "deserialize_count")]
    pub user_device_count: i64,
    #[serde(deserialize_with = "deserialize_count")]
    pub user_failure_history_count: i64,
    #[serde(deserialize_with = "deserialize_text")]
    pub user_behavior_profile: String,

    // Labels
    #[serde(default, deserialize_with = "deserialize_flag")]
    pub failure_occurred: bool,
    #[serde(default)]
    pub failure_type: Option<String>,
    #[serde(default)]
    pub failure_timestamp: Option<String>,
}

impl TelemetryRecord {
    /// Create a healthy record with the given identity; every indicator is
    /// below its failure threshold.
    pub fn new(record_id: &str, device_id: &str, user_id: &str, timestamp: &str) -> Self {
        Self {
            record_id: record_id.to_string(),
            device_id: device_id.to_string(),
            user_id: user_id.to_string(),
            timestamp: timestamp.to_string(),
            device_model: "Samsung-Galaxy-S22".to_string(),
            device_manufacturer: "Samsung".to_string(),
            device_batch_number: "batch_001".to_string(),
            device_production_date: "2023-01-15".to_string(),
            device_age_days: 581,
            warranty_status: "in_warranty".to_string(),
            os_name: "Android".to_string(),
            os_version: "13".to_string(),
            os_build_number: "build_1234".to_string(),
            software_firmware_version: "fw_5.12".to_string(),
            software_security_patch: "2024-07-01".to_string(),
            software_uptime_hours: 72.5,
            software_system_crashes: 0,
            software_app_crashes: 2,
            battery_level_percent: 45.2,
            battery_health_status: "good".to_string(),
            battery_temperature_c: 32.1,
            battery_voltage_mv: 3847,
            battery_charge_cycles: 567,
            battery_charging_status: "discharging".to_string(),
            battery_current_ma: -1250,
            battery_resistance_mohm: 150,
            battery_sudden_shutdowns: 0,
            cpu_usage_percent: 23.4,
            cpu_temperature_c_avg: 41.2,
            cpu_throttle_events: 1,
            cpu_core_frequencies_mhz: "1785,1785,2265,2265,2840,2840,2840,2840".to_string(),
            cpu_voltage_scaling_errors: 0,
            cpu_watchdog_resets: 0,
            gpu_usage_percent: 12.1,
            gpu_temperature_c: 38.5,
            gpu_driver_resets: 0,
            gpu_frequency_mhz: 572,
            memory_total_mb: 8192,
            memory_used_mb: 4856,
            memory_swap_used_mb: 0,
            memory_page_faults: 1250,
            memory_oom_kills: 0,
            memory_ecc_corrected_errors: 0,
            memory_dma_faults: 0,
            storage_total_gb: 128,
            storage_used_gb: 89,
            storage_read_errors: 0,
            storage_write_errors: 0,
            storage_bad_block_count: 0,
            storage_io_latency_ms: 4.2,
            storage_wear_level_percent: 12.3,
            thermal_hotspot_temp_c: 43.1,
            thermal_sensor_battery_c: 32.1,
            thermal_sensor_cpu_cluster0_c: 41.2,
            thermal_sensor_cpu_cluster1_c: 42.8,
            thermal_sensor_gpu_c: 38.5,
            thermal_sensor_pmic_c: 35.7,
            thermal_shutdowns: 0,
            wifi_signal_dbm: -67,
            wifi_disconnects: 2,
            wifi_firmware_crashes: 0,
            wifi_packet_loss_percent: 0.8,
            cellular_rsrp_dbm: -95,
            cellular_drop_calls: 0,
            cellular_modem_resets: 0,
            cellular_handshake_failures: 1,
            peripheral_touchscreen_errors: 0,
            peripheral_camera_init_failures: 0,
            peripheral_mic_speaker_faults: 0,
            peripheral_sensor_hub_desyncs: 0,
            kernel_panics: 0,
            kernel_anrs: 1,
            kernel_irq_storms: 0,
            kernel_driver_probe_failures: 0,
            kernel_system_crash_count: 0,
            kernel_last_boot_reason: "normal".to_string(),
            user_region: "US".to_string(),
            user_account_age_days: 1825,
            user_device_count: 3,
            user_failure_history_count: 1,
            user_behavior_profile: "normal_user".to_string(),
            failure_occurred: false,
            failure_type: None,
            failure_timestamp: None,
        }
    }

    /// Values of [`NUMERIC_FIELDS`], in the same order.
    pub fn numeric_values(&self) -> Vec<f64> {
        vec![
            self.device_age_days as f64,
            self.software_uptime_hours,
            self.software_system_crashes as f64,
            self.software_app_crashes as f64,
            self.battery_level_percent,
            self.battery_temperature_c,
            self.battery_voltage_mv as f64,
            self.battery_charge_cycles as f64,
            self.battery_current_ma as f64,
            self.battery_resistance_mohm as f64,
            self.battery_sudden_shutdowns as f64,
            self.cpu_usage_percent,
            self.cpu_temperature_c_avg,
            self.cpu_throttle_events as f64,
            self.cpu_voltage_scaling_errors as f64,
            self.cpu_watchdog_resets as f64,
            self.gpu_usage_percent,
            self.gpu_temperature_c,
            self.gpu_driver_resets as f64,
            self.gpu_frequency_mhz as f64,
            self.memory_total_mb as f64,
            self.memory_used_mb as f64,
            self.memory_swap_used_mb as f64,
            self.memory_page_faults as f64,
            self.memory_oom_kills as f64,
            self.memory_ecc_corrected_errors as f64,
            self.memory_dma_faults as f64,
            self.storage_total_gb as f64,
            self.storage_used_gb as f64,
            self.storage_read_errors as f64,
            self.storage_write_errors as f64,
            self.storage_bad_block_count as f64,
            self.storage_io_latency_ms,
            self.storage_wear_level_percent,
            self.thermal_hotspot_temp_c,
            self.thermal_sensor_battery_c,
            self.thermal_sensor_cpu_cluster0_c,
            self.thermal_sensor_cpu_cluster1_c,
            self.thermal_sensor_gpu_c,
            self.thermal_sensor_pmic_c,
            self.thermal_shutdowns as f64,
            self.wifi_signal_dbm as f64,
            self.wifi_disconnects as f64,
            self.wifi_firmware_crashes as f64,
            self.wifi_packet_loss_percent,
            self.cellular_rsrp_dbm as f64,
            self.cellular_drop_calls as f64,
            self.cellular_modem_resets as f64,
            self.cellular_handshake_failures as f64,
            self.peripheral_touchscreen_errors as f64,
            self.peripheral_camera_init_failures as f64,
            self.peripheral_mic_speaker_faults as f64,
            self.peripheral_sensor_hub_desyncs as f64,
            self.kernel_panics as f64,
            self.kernel_anrs as f64,
            self.kernel_irq_storms as f64,
            self.kernel_driver_probe_failures as f64,
            self.kernel_system_crash_count as f64,
            self.user_account_age_days as f64,
            self.user_device_count as f64,
            self.user_failure_history_count as f64,
        ]
    }

    /// Target label; missing or empty labels read as `none`.
    pub fn failure_label(&self) -> &str {
        match self.failure_type.as_deref() {
            Some(label) if !label.is_empty() => label,
            _ => FailureType::None.as_str(),
        }
    }
}

fn deserialize_text<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

fn deserialize_number<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<f64>::deserialize(deserializer)?.unwrap_or(f64::NAN))
}

fn deserialize_count<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<i64>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Deserialize)]
#[serde(untagged)]
enum FlagValue {
    Bool(bool),
    Int(i64),
    Text(String),
}

/// Accepts `true`/`false`, `1`/`0` and their string spellings; null is `false`.
fn deserialize_flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<FlagValue>::deserialize(deserializer)? {
        None => Ok(false),
        Some(FlagValue::Bool(value)) => Ok(value),
        Some(FlagValue::Int(value)) => Ok(value != 0),
        Some(FlagValue::Text(text)) => match text.trim().to_ascii_lowercase().as_str() {
            "true" | "1" => Ok(true),
            "false" | "0" | "" => Ok(false),
            other => Err(serde::de::Error::custom(format!(
                "invalid failure_occurred flag: {other}"
            ))),
        },
    }
}
