//! Per-asset analysis and the whole-fleet runner.

use std::{collections::BTreeMap, sync::Arc};

use futures::StreamExt;
use serde::Serialize;
use sqlx::PgPool;
use streetlight_client::db::{self, QueryError};
use streetlight_client::domain::MeterReading;
use time::{Date, OffsetDateTime, Time};
use tracing::Instrument;

use crate::{
    assets::{Asset, AssetRegistry},
    calendar::{CalendarError, DimmingCalendar},
    classifier::{AnomalyKind, ClassifierSettings, ClassifierStats, DropReason, IntervalClassifier, Step},
    config::AppConfig,
    energy::EnergyProfile,
    pipeline::{EnvelopeStream, Pipeline, PipelineError},
    report::{ActualWattageRecord, AnomalyRecord, DailySummary, EnergyDeviationRecord},
    sources::MeterReadingDbSource,
    suntime::{SunTable, SunTimeError},
    transform::MeterReadingValidation,
};

#[derive(thiserror::Error, Debug)]
pub enum AssetError {
    #[error("query failed: {0}")]
    Query(#[from] QueryError),
    #[error("asset {asset_id} has no usable {field}")]
    MissingReference { asset_id: i64, field: &'static str },
    #[error("asset {asset_id} has no dimming calendar")]
    MissingCalendar { asset_id: i64 },
    #[error("asset {asset_id} has a malformed dimming calendar: {source}")]
    MalformedCalendar { asset_id: i64, source: CalendarError },
    #[error(transparent)]
    SunTime(#[from] SunTimeError),
    #[error("reading stream failed: {0}")]
    Source(String),
}

impl AssetError {
    /// Stable label for logs, metrics and the run report.
    pub fn kind(&self) -> &'static str {
        match self {
            AssetError::Query(_) => "query",
            AssetError::MissingReference { .. } => "missing_reference",
            AssetError::MissingCalendar { .. } => "missing_calendar",
            AssetError::MalformedCalendar { .. } => "malformed_calendar",
            AssetError::SunTime(_) => "sun_time",
            AssetError::Source(_) => "source",
        }
    }
}

/// Everything an asset analysis needs besides the asset itself.
#[derive(Debug, Clone)]
pub struct AnalysisContext {
    pub region: String,
    pub settings: ClassifierSettings,
    /// Sun times at the fleet location.
    pub sun: SunTable,
    pub use_asset_location: bool,
    pub start: OffsetDateTime,
    /// Exclusive.
    pub end: OffsetDateTime,
    pub page_size: usize,
}

impl AnalysisContext {
    pub fn from_config(cfg: &AppConfig) -> anyhow::Result<Self> {
        let utc_offset = cfg.run.utc_offset()?;
        let (first, last) = sun_range(cfg.run.start_date, cfg.run.end_date);
        let sun = SunTable::build(cfg.location.latitude, cfg.location.longitude, first, last)?;

        Ok(Self {
            region: cfg.run.region.clone(),
            settings: ClassifierSettings {
                thresholds: cfg.thresholds.clone(),
                utc_offset,
                commissioning_grace_days: cfg.run.commissioning_grace_days,
            },
            sun,
            use_asset_location: cfg.location.use_asset_location,
            start: cfg.run.start_date.with_time(Time::MIDNIGHT).assume_offset(utc_offset),
            end: cfg.run.end_date.with_time(Time::MIDNIGHT).assume_offset(utc_offset),
            page_size: cfg.run.page_size,
        })
    }

    /// Sun table for one asset: its own coordinates when configured and known.
    fn sun_for(&self, asset: &Asset) -> Result<Option<SunTable>, SunTimeError> {
        if !self.use_asset_location {
            return Ok(None);
        }
        let Some((latitude, longitude)) = asset.coordinates() else {
            tracing::debug!(asset_id = asset.asset_id, "no asset coordinates, using fleet location");
            return Ok(None);
        };
        let first = self.start.to_offset(self.settings.utc_offset).date();
        let last = self.end.to_offset(self.settings.utc_offset).date();
        let (first, last) = sun_range(first, last);
        SunTable::build(latitude, longitude, first, last).map(Some)
    }
}

// Readings just after local midnight of the first day look up the previous
// evening's sunset.
fn sun_range(start: Date, end: Date) -> (Date, Date) {
    (start.previous_day().unwrap_or(start), end)
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AssetOutcome {
    pub anomalies: Vec<AnomalyRecord>,
    pub daily: Vec<DailySummary>,
    pub deviations: Vec<EnergyDeviationRecord>,
    /// `None` when no day drew any energy.
    pub actual_wattage: Option<ActualWattageRecord>,
    /// Readings the stream rejected before classification.
    pub rejected: u64,
    pub stats: ClassifierStats,
}

/// Classifies one asset's readings and runs the day-level energy checks over
/// the same readings.
///
/// A [`PipelineError::Transform`] item rejects one reading and the stream
/// continues; any other stream error aborts the asset.
pub async fn analyze_asset(
    ctx: &AnalysisContext,
    asset: &Asset,
    calendar: &DimmingCalendar,
    mut readings: EnvelopeStream<MeterReading>,
) -> Result<AssetOutcome, AssetError> {
    let nominal_w = asset.usable_nominal_wattage().ok_or(AssetError::MissingReference {
        asset_id: asset.asset_id,
        field: "nominal_wattage",
    })?;
    let own_sun = ctx.sun_for(asset)?;
    let sun = own_sun.as_ref().unwrap_or(&ctx.sun);

    let mut classifier =
        IntervalClassifier::new(&ctx.settings, sun, calendar, nominal_w, asset.commissioning_date);
    let mut energy = EnergyProfile::new(&ctx.settings.thresholds, ctx.settings.utc_offset, sun);
    let mut anomalies = Vec::new();
    let mut rejected = 0u64;

    while let Some(item) = readings.next().await {
        let reading = match item {
            Ok(env) => env.payload,
            Err(PipelineError::Transform(msg)) => {
                tracing::warn!(asset_id = asset.asset_id, error = %msg, "reading rejected");
                rejected += 1;
                continue;
            }
            Err(e) => return Err(AssetError::Source(e.to_string())),
        };

        let step = classifier.push(reading.clone())?;
        if !matches!(step, Step::Dropped(DropReason::BeforeCommissioning)) {
            energy.push(&reading)?;
        }

        match step {
            Step::Classified(c) => {
                if let Some(record) = AnomalyRecord::from_interval(&ctx.region, asset, nominal_w, &c) {
                    anomalies.push(record);
                }
            }
            Step::Dropped(reason) => {
                metrics::counter!("intervals_dropped_total", "reason" => reason.as_str()).increment(1);
            }
            Step::Primed => {}
        }
    }

    let (totals, stats) = classifier.finish();
    for (kind, count) in &stats.anomalies {
        metrics::counter!("anomalies_flagged_total", "kind" => kind.as_str()).increment(*count);
    }
    let daily = totals
        .into_iter()
        .map(|(date, kind, t)| DailySummary::new(&ctx.region, asset.asset_id, date, kind, &t))
        .collect();

    let (deviations, estimate) = energy.finish();
    metrics::counter!("energy_deviations_flagged_total").increment(deviations.len() as u64);
    let deviations: Vec<_> = deviations
        .iter()
        .map(|d| EnergyDeviationRecord::new(&ctx.region, asset, d))
        .collect();
    let actual_wattage = estimate.map(|e| ActualWattageRecord::new(&ctx.region, asset, nominal_w, &e));

    tracing::debug!(
        asset_id = asset.asset_id,
        readings = stats.readings,
        classified = stats.classified,
        anomalies = anomalies.len(),
        deviations = deviations.len(),
        actual_wattage = actual_wattage.as_ref().map(|w| w.actual_wattage),
        "asset analyzed"
    );

    Ok(AssetOutcome {
        anomalies,
        daily,
        deviations,
        actual_wattage,
        rejected,
        stats,
    })
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkippedAsset {
    pub asset_id: i64,
    pub reason: &'static str,
    pub detail: String,
}

/// Run-level summary written next to the reports.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunReport {
    pub region: String,
    pub assets_total: usize,
    pub assets_analyzed: usize,
    pub assets_skipped: usize,
    pub readings: u64,
    pub readings_rejected: u64,
    pub intervals_classified: u64,
    pub day_intervals: u64,
    pub night_intervals: u64,
    pub twilight_intervals: u64,
    pub dropped: BTreeMap<&'static str, u64>,
    pub anomalies: BTreeMap<&'static str, u64>,
    pub daily_summaries: usize,
    pub energy_deviations: usize,
    pub wattage_estimates: usize,
    pub skipped: Vec<SkippedAsset>,
}

impl RunReport {
    pub fn new(region: &str, assets_total: usize) -> Self {
        let mut report = Self {
            region: region.to_string(),
            assets_total,
            ..Self::default()
        };
        for kind in AnomalyKind::ALL {
            report.anomalies.insert(kind.as_str(), 0);
        }
        report
    }

    pub fn record_outcome(&mut self, outcome: &AssetOutcome) {
        let s = &outcome.stats;
        self.assets_analyzed += 1;
        self.readings += s.readings;
        self.readings_rejected += outcome.rejected;
        self.intervals_classified += s.classified;
        self.day_intervals += s.day;
        self.night_intervals += s.night;
        self.twilight_intervals += s.twilight;
        for (reason, n) in &s.dropped {
            *self.dropped.entry(reason.as_str()).or_default() += n;
        }
        for (kind, n) in &s.anomalies {
            *self.anomalies.entry(kind.as_str()).or_default() += n;
        }
        self.daily_summaries += outcome.daily.len();
        self.energy_deviations += outcome.deviations.len();
        self.wattage_estimates += usize::from(outcome.actual_wattage.is_some());
    }

    pub fn record_skip(&mut self, asset_id: i64, err: &AssetError) {
        self.assets_skipped += 1;
        self.skipped.push(SkippedAsset {
            asset_id,
            reason: err.kind(),
            detail: err.to_string(),
        });
    }
}

/// Reports of a whole run, rows ordered by asset.
#[derive(Debug, Default)]
pub struct FleetOutcome {
    pub anomalies: Vec<AnomalyRecord>,
    pub daily: Vec<DailySummary>,
    pub deviations: Vec<EnergyDeviationRecord>,
    pub wattages: Vec<ActualWattageRecord>,
    pub report: RunReport,
}

impl FleetOutcome {
    fn new(region: &str, assets_total: usize) -> Self {
        Self {
            report: RunReport::new(region, assets_total),
            ..Self::default()
        }
    }

    /// Folds one asset's result in; a failed asset is logged and skipped.
    pub fn absorb(&mut self, asset_id: i64, result: Result<AssetOutcome, AssetError>) {
        match result {
            Ok(outcome) => {
                self.report.record_outcome(&outcome);
                self.anomalies.extend(outcome.anomalies);
                self.daily.extend(outcome.daily);
                self.deviations.extend(outcome.deviations);
                self.wattages.extend(outcome.actual_wattage);
            }
            Err(e) => {
                metrics::counter!("assets_skipped_total", "reason" => e.kind()).increment(1);
                tracing::warn!(asset_id, reason = e.kind(), error = %e, "skipping asset");
                self.report.record_skip(asset_id, &e);
            }
        }
    }

    fn sort(&mut self) {
        self.anomalies
            .sort_by_key(|r| (r.asset_id, r.meter_component_id, r.timestamp_start, r.error_type));
        self.daily.sort_by_key(|d| (d.asset_id, d.date, d.error_type));
        self.deviations.sort_by_key(|d| (d.asset_id, d.meter_component_id, d.date));
        self.wattages.sort_by_key(|w| w.asset_id);
        self.report.skipped.sort_by_key(|s| s.asset_id);
    }
}

/// Fetches the calendar and readings of one asset from Postgres and analyzes it.
pub async fn process_asset(pool: PgPool, ctx: Arc<AnalysisContext>, asset: Asset) -> Result<AssetOutcome, AssetError> {
    let asset_id = asset.asset_id;
    if asset.usable_nominal_wattage().is_none() {
        return Err(AssetError::MissingReference {
            asset_id,
            field: "nominal_wattage",
        });
    }
    let node = asset.node_component_id.ok_or(AssetError::MissingReference {
        asset_id,
        field: "node_component_id",
    })?;

    let xml = db::dimming_calendar_xml_for_node(&pool, node)
        .await?
        .ok_or(AssetError::MissingCalendar { asset_id })?;
    let calendar =
        DimmingCalendar::parse(&xml).map_err(|source| AssetError::MalformedCalendar { asset_id, source })?;

    let pipeline: Pipeline<_, MeterReading> = Pipeline {
        source: MeterReadingDbSource::new(pool, asset_id, ctx.start, ctx.end, ctx.page_size),
        transforms: vec![Arc::new(MeterReadingValidation)],
    };
    let readings = pipeline.stream().await;

    analyze_asset(&ctx, &asset, &calendar, readings).await
}

/// Analyzes every asset in the registry with up to `workers` assets in flight.
pub async fn run_fleet(pool: &PgPool, ctx: Arc<AnalysisContext>, registry: &AssetRegistry, workers: usize) -> FleetOutcome {
    let mut fleet = FleetOutcome::new(&ctx.region, registry.len());

    let tasks = registry.iter().cloned().map(|asset| {
        let pool = pool.clone();
        let ctx = ctx.clone();
        let asset_id = asset.asset_id;
        let span = tracing::info_span!("asset", asset_id);
        async move { (asset_id, process_asset(pool, ctx, asset).await) }.instrument(span)
    });

    let mut results = futures::stream::iter(tasks).buffer_unordered(workers.max(1));
    let mut done = 0usize;
    while let Some((asset_id, result)) = results.next().await {
        fleet.absorb(asset_id, result);
        done += 1;
        if done % 100 == 0 {
            tracing::info!(done, total = registry.len(), "assets processed");
        }
    }

    fleet.sort();
    fleet
}
