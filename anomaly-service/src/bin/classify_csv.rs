use anyhow::{bail, Context, Result};
use anomaly_service::{
    analysis::{self, AnalysisContext},
    assets::Asset,
    calendar::DimmingCalendar,
    config::AppConfig,
    observability,
    pipeline::{Pipeline, VecSource},
    report::{AnomalyRecord, DailySummary},
    sinks::{write_optional_report, CsvReportSink},
    sources::MeterReadingCsvFileSource,
    transform,
};
use std::{env, sync::Arc};
use streetlight_client::domain::MeterReading;
use time::Date;

/// Offline run of the classifier over a CSV export of one asset's readings.
///
/// Thresholds, location, offset and report paths come from the usual config
/// file; the database section is not used.
#[tokio::main]
async fn main() -> Result<()> {
    observability::init_tracing();

    let args: Vec<String> = env::args().collect();
    if args.len() < 5 {
        bail!("usage: classify_csv <readings.csv> <calendar.xml> <asset_id> <nominal_wattage>");
    }
    let readings_path = &args[1];
    let calendar_path = &args[2];
    let asset_id: i64 = args[3].parse().with_context(|| format!("invalid asset_id '{}'", args[3]))?;
    let nominal_wattage: f64 = args[4]
        .parse()
        .with_context(|| format!("invalid nominal_wattage '{}'", args[4]))?;

    let cfg = AppConfig::load()?;
    let ctx = AnalysisContext::from_config(&cfg)?;

    let xml = std::fs::read_to_string(calendar_path)
        .with_context(|| format!("failed to read calendar {calendar_path}"))?;
    let calendar = DimmingCalendar::parse(&xml)?;

    // Exports carry no reference data; every reading counts as commissioned.
    let asset = Asset {
        asset_id,
        latitude: None,
        longitude: None,
        installation_date: Date::MIN,
        commissioning_date: Date::MIN,
        street_name: None,
        luminaire_type: None,
        nominal_wattage: Some(nominal_wattage),
        node_component_id: None,
    };

    let pipeline: Pipeline<_, MeterReading> = Pipeline {
        source: MeterReadingCsvFileSource::new(readings_path).for_asset(asset_id),
        transforms: vec![Arc::new(transform::MeterReadingValidation)],
    };
    let outcome = analysis::analyze_asset(&ctx, &asset, &calendar, pipeline.stream().await).await?;

    tracing::info!(
        asset_id,
        readings = outcome.stats.readings,
        classified = outcome.stats.classified,
        anomalies = outcome.anomalies.len(),
        daily_summaries = outcome.daily.len(),
        energy_deviations = outcome.deviations.len(),
        actual_wattage = outcome.actual_wattage.as_ref().map(|w| w.actual_wattage),
        "classified CSV export"
    );

    let anomaly_sink = CsvReportSink::<AnomalyRecord>::new(&cfg.run.anomaly_report_path, cfg.run.report_batch_size);
    let daily_sink = CsvReportSink::<DailySummary>::new(&cfg.run.daily_report_path, cfg.run.report_batch_size);
    Pipeline { source: VecSource::new(outcome.anomalies), transforms: vec![] }
        .run(&anomaly_sink)
        .await?;
    Pipeline { source: VecSource::new(outcome.daily), transforms: vec![] }
        .run(&daily_sink)
        .await?;
    write_optional_report(
        cfg.run.energy_deviation_report_path.as_deref(),
        outcome.deviations,
        cfg.run.report_batch_size,
    )
    .await?;
    write_optional_report(
        cfg.run.actual_wattage_report_path.as_deref(),
        outcome.actual_wattage.into_iter().collect(),
        cfg.run.report_batch_size,
    )
    .await?;

    Ok(())
}
