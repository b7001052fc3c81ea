//! Report rows. The field order of each struct is the CSV column order; bump
//! the schema constant whenever a column changes.

use serde::Serialize;
use time::{Date, OffsetDateTime};

use crate::{
    assets::Asset,
    classifier::{AnomalyKind, ClassifiedInterval, DayTotals},
    energy::{EnergyDeviation, WattageEstimate},
};

pub const ANOMALY_SCHEMA: &str = "anomaly-v1";
pub const DAILY_SCHEMA: &str = "daily-v1";
pub const ENERGY_DEVIATION_SCHEMA: &str = "energy-deviation-v1";
pub const ACTUAL_WATTAGE_SCHEMA: &str = "actual-wattage-v1";

/// One flagged interval.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnomalyRecord {
    pub record_id: String,
    pub region: String,
    pub asset_id: i64,
    pub meter_component_id: i64,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub installation_date: Date,
    pub commissioning_date: Date,
    pub street_name: Option<String>,
    pub nominal_wattage: f64,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp_start: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp_end: OffsetDateTime,
    pub calendar_percentage: Option<f64>,
    pub expected_wattage: f64,
    pub actual_wattage: f64,
    pub error_type: &'static str,
    pub schema_version: &'static str,
}

impl AnomalyRecord {
    /// `None` when the interval was not flagged.
    pub fn from_interval(region: &str, asset: &Asset, nominal_w: f64, c: &ClassifiedInterval) -> Option<Self> {
        let kind = c.anomaly?;
        let i = &c.interval;
        Some(Self {
            record_id: record_id(asset.asset_id, i.meter_component_id, i.start, i.end, kind),
            region: region.to_string(),
            asset_id: asset.asset_id,
            meter_component_id: i.meter_component_id,
            latitude: asset.latitude,
            longitude: asset.longitude,
            installation_date: asset.installation_date,
            commissioning_date: asset.commissioning_date,
            street_name: asset.street_name.clone(),
            nominal_wattage: nominal_w,
            timestamp_start: i.start,
            timestamp_end: i.end,
            calendar_percentage: c.calendar_percent,
            expected_wattage: c.expected_w,
            actual_wattage: i.power_w,
            error_type: kind.as_str(),
            schema_version: ANOMALY_SCHEMA,
        })
    }
}

/// Daily totals of one anomaly kind for one asset.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailySummary {
    pub region: String,
    pub asset_id: i64,
    pub date: Date,
    pub error_type: &'static str,
    pub interval_count: u32,
    pub on_time_minutes: f64,
    pub energy_kwh: f64,
    pub mean_wattage: f64,
    pub schema_version: &'static str,
}

impl DailySummary {
    pub fn new(region: &str, asset_id: i64, date: Date, kind: AnomalyKind, totals: &DayTotals) -> Self {
        Self {
            region: region.to_string(),
            asset_id,
            date,
            error_type: kind.as_str(),
            interval_count: totals.interval_count,
            on_time_minutes: totals.on_time_minutes,
            energy_kwh: totals.energy_kwh,
            mean_wattage: totals.mean_power_w(),
            schema_version: DAILY_SCHEMA,
        }
    }
}

/// A day whose consumption broke out of the rolling window.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnergyDeviationRecord {
    pub region: String,
    pub asset_id: i64,
    pub meter_component_id: i64,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub street_name: Option<String>,
    pub date: Date,
    pub daily_energy_kwh: f64,
    pub window_mean_kwh: f64,
    pub window_std_kwh: f64,
    pub num_std: Option<f64>,
    pub schema_version: &'static str,
}

impl EnergyDeviationRecord {
    pub fn new(region: &str, asset: &Asset, d: &EnergyDeviation) -> Self {
        Self {
            region: region.to_string(),
            asset_id: asset.asset_id,
            meter_component_id: d.meter_component_id,
            latitude: asset.latitude,
            longitude: asset.longitude,
            street_name: asset.street_name.clone(),
            date: d.date,
            daily_energy_kwh: d.daily_kwh,
            window_mean_kwh: d.window_mean_kwh,
            window_std_kwh: d.window_std_kwh,
            num_std: d.num_std,
            schema_version: ENERGY_DEVIATION_SCHEMA,
        }
    }
}

/// Estimated draw of one asset next to its registered nominal wattage.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActualWattageRecord {
    pub region: String,
    pub asset_id: i64,
    pub luminaire_type: Option<String>,
    pub nominal_wattage: f64,
    pub actual_wattage: f64,
    pub days: u32,
    pub schema_version: &'static str,
}

impl ActualWattageRecord {
    pub fn new(region: &str, asset: &Asset, nominal_w: f64, estimate: &WattageEstimate) -> Self {
        Self {
            region: region.to_string(),
            asset_id: asset.asset_id,
            luminaire_type: asset.luminaire_type.clone(),
            nominal_wattage: nominal_w,
            actual_wattage: estimate.actual_wattage_w,
            days: estimate.days,
            schema_version: ACTUAL_WATTAGE_SCHEMA,
        }
    }
}

fn hash_i64(hasher: &mut blake3::Hasher, v: i64) {
    hasher.update(&v.to_le_bytes());
}

/// Stable across re-runs over the same data, so downstream loads can dedupe.
pub fn record_id(
    asset_id: i64,
    meter_component_id: i64,
    start: OffsetDateTime,
    end: OffsetDateTime,
    kind: AnomalyKind,
) -> String {
    let mut h = blake3::Hasher::new();
    hash_i64(&mut h, asset_id);
    hash_i64(&mut h, meter_component_id);
    h.update(&start.unix_timestamp_nanos().to_le_bytes());
    h.update(&end.unix_timestamp_nanos().to_le_bytes());
    h.update(kind.as_str().as_bytes());
    h.finalize().to_hex()[..32].to_string()
}
