use serde::Deserialize;
use std::{fs, path::PathBuf};
use time::{Date, UtcOffset};

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub uri: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RunConfig {
    /// Label written into every report row, usually the source database name.
    pub region: String,
    pub start_date: Date,
    /// Exclusive.
    pub end_date: Date,
    /// Fixed offset of the local time used by the dimming calendars.
    #[serde(default)]
    pub utc_offset_hours: i8,
    /// Readings before `commissioning_date + grace` are ignored.
    #[serde(default)]
    pub commissioning_grace_days: u16,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Restrict the run to these assets; all live assets when absent.
    #[serde(default)]
    pub asset_ids: Option<Vec<i64>>,
    pub anomaly_report_path: PathBuf,
    pub daily_report_path: PathBuf,
    #[serde(default)]
    pub run_report_path: Option<PathBuf>,
    /// Days whose consumption breaks out of the rolling window.
    #[serde(default)]
    pub energy_deviation_report_path: Option<PathBuf>,
    #[serde(default)]
    pub actual_wattage_report_path: Option<PathBuf>,
    #[serde(default = "default_report_batch_size")]
    pub report_batch_size: usize,
}

impl RunConfig {
    pub fn utc_offset(&self) -> anyhow::Result<UtcOffset> {
        UtcOffset::from_hms(self.utc_offset_hours, 0, 0)
            .map_err(|e| anyhow::anyhow!("invalid run.utc_offset_hours {}: {e}", self.utc_offset_hours))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LocationConfig {
    pub latitude: f64,
    pub longitude: f64,
    /// Compute sun times from each asset's own coordinates instead of the fleet location.
    #[serde(default)]
    pub use_asset_location: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    /// Watts above the dimmed floor before a day interval counts as burning.
    pub energy_threshold_w: f64,
    pub nominal_wattage_ratio: f64,
    /// Day draw at or above this multiple of nominal is a meter glitch.
    pub dayburner_ceiling_ratio: f64,
    /// Tolerance around the calendar percent at night, as a fraction of nominal.
    pub night_tolerance_ratio: f64,
    pub above_nominal_ratio: f64,
    pub min_on_time_minutes: f64,
    pub sunrise_buffer_minutes: i64,
    pub sunset_buffer_minutes: i64,
    /// Intervals longer than this are treated as data gaps and dropped.
    pub max_interval_minutes: Option<f64>,
    /// Previous days a day's consumption is compared against.
    pub rolling_window_days: usize,
    pub deviation_num_std: f64,
    pub deviation_min_excess_kwh: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            energy_threshold_w: 2.0,
            nominal_wattage_ratio: 0.3,
            dayburner_ceiling_ratio: 5.0,
            night_tolerance_ratio: 0.1,
            above_nominal_ratio: 1.1,
            min_on_time_minutes: 30.0,
            sunrise_buffer_minutes: 0,
            sunset_buffer_minutes: 0,
            max_interval_minutes: None,
            rolling_window_days: 30,
            deviation_num_std: 1.5,
            deviation_min_excess_kwh: 0.2,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    pub bind_addr: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub run: RunConfig,
    pub location: LocationConfig,
    #[serde(default)]
    pub thresholds: Thresholds,
    pub metrics: Option<MetricsConfig>,
}

fn default_max_connections() -> u32 {
    4
}

fn default_page_size() -> usize {
    5_000
}

fn default_workers() -> usize {
    4
}

fn default_report_batch_size() -> usize {
    500
}

impl AppConfig {
    pub fn load() -> anyhow::Result<Self> {
        use std::env;

        let path = env::var("STREETLIGHT_CONFIG").unwrap_or_else(|_| "streetlight-config.toml".to_string());
        let contents = fs::read_to_string(&path)
            .map_err(|e| anyhow::anyhow!("failed to read config {path}: {e}"))?;
        let cfg = Self::from_toml(&contents)?;
        tracing::info!(path = %path, region = %cfg.run.region, "loaded configuration");
        Ok(cfg)
    }

    pub fn from_toml(contents: &str) -> anyhow::Result<Self> {
        let cfg: AppConfig = toml::from_str(contents)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.run.end_date <= self.run.start_date {
            anyhow::bail!(
                "run.end_date {} must be after run.start_date {}",
                self.run.end_date,
                self.run.start_date
            );
        }
        if self.run.workers == 0 || self.run.page_size == 0 || self.run.report_batch_size == 0 {
            anyhow::bail!("run.workers, run.page_size and run.report_batch_size must be positive");
        }
        if !(-90.0..=90.0).contains(&self.location.latitude)
            || !(-180.0..=180.0).contains(&self.location.longitude)
        {
            anyhow::bail!(
                "location ({}, {}) is outside valid coordinates",
                self.location.latitude,
                self.location.longitude
            );
        }
        if self.thresholds.rolling_window_days < 2 {
            anyhow::bail!(
                "thresholds.rolling_window_days must be at least 2, got {}",
                self.thresholds.rolling_window_days
            );
        }
        self.run.utc_offset()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::date;

    const MINIMAL: &str = r#"
        [database]
        uri = "postgres://analytics@localhost/barcelona"

        [run]
        region = "barcelona"
        start_date = "2016-09-01"
        end_date = "2016-10-01"
        utc_offset_hours = 2
        anomaly_report_path = "out/anomalies.csv"
        daily_report_path = "out/daily.csv"

        [location]
        latitude = 41.3826
        longitude = 2.1768
    "#;

    #[test]
    fn minimal_config_fills_defaults() {
        let cfg = AppConfig::from_toml(MINIMAL).unwrap();
        assert_eq!(cfg.database.max_connections, 4);
        assert_eq!(cfg.run.start_date, date!(2016-09-01));
        assert_eq!(cfg.run.utc_offset().unwrap(), UtcOffset::from_hms(2, 0, 0).unwrap());
        assert_eq!(cfg.run.workers, 4);
        assert!(cfg.run.asset_ids.is_none());
        assert_eq!(cfg.thresholds, Thresholds::default());
        assert!(!cfg.location.use_asset_location);
        assert!(cfg.metrics.is_none());
    }

    #[test]
    fn partial_thresholds_keep_other_defaults() {
        let toml = format!("{MINIMAL}\n[thresholds]\nenergy_threshold_w = 5.0\nmax_interval_minutes = 120.0\n");
        let cfg = AppConfig::from_toml(&toml).unwrap();
        assert_eq!(cfg.thresholds.energy_threshold_w, 5.0);
        assert_eq!(cfg.thresholds.max_interval_minutes, Some(120.0));
        assert_eq!(cfg.thresholds.nominal_wattage_ratio, 0.3);
        assert_eq!(cfg.thresholds.rolling_window_days, 30);
        assert_eq!(cfg.thresholds.deviation_min_excess_kwh, 0.2);
    }

    #[test]
    fn rejects_window_without_spread() {
        let toml = format!("{MINIMAL}\n[thresholds]\nrolling_window_days = 1\n");
        assert!(AppConfig::from_toml(&toml).is_err());
    }

    #[test]
    fn rejects_empty_date_range() {
        let toml = MINIMAL.replace("2016-10-01", "2016-09-01");
        assert!(AppConfig::from_toml(&toml).is_err());
    }

    #[test]
    fn rejects_invalid_latitude() {
        let toml = MINIMAL.replace("41.3826", "141.0");
        assert!(AppConfig::from_toml(&toml).is_err());
    }
}
