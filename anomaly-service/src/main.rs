use anyhow::Result;
use anomaly_service::{
    analysis::{self, AnalysisContext, FleetOutcome},
    assets::AssetRegistry,
    config::AppConfig,
    metrics_server,
    observability,
    pipeline::{Pipeline, VecSource},
    report::{AnomalyRecord, DailySummary},
    sinks::{write_optional_report, CsvReportSink},
};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use streetlight_client::db;

#[tokio::main]
async fn main() -> Result<()> {
    observability::init_tracing();

    // Load configuration
    let cfg = AppConfig::load()?;

    // Start metrics server if configured
    if let Some(metrics_cfg) = &cfg.metrics {
        metrics_server::init(&metrics_cfg.bind_addr)?;
    }

    let pool = PgPoolOptions::new()
        .max_connections(cfg.database.max_connections)
        .connect(&cfg.database.uri)
        .await?;

    // Reference data for the whole fleet, loaded once.
    let (assets, wattages, nodes) = tokio::try_join!(
        db::load_assets(&pool),
        db::load_nominal_wattages(&pool),
        db::load_node_components(&pool),
    )?;
    let mut registry = AssetRegistry::from_rows(assets, wattages, nodes);
    if let Some(ids) = &cfg.run.asset_ids {
        registry.retain_ids(ids);
    }
    tracing::info!(
        region = %cfg.run.region,
        assets = registry.len(),
        start = %cfg.run.start_date,
        end = %cfg.run.end_date,
        "starting anomaly run"
    );

    let ctx = Arc::new(AnalysisContext::from_config(&cfg)?);
    let FleetOutcome {
        anomalies,
        daily,
        deviations,
        wattages: actual_wattages,
        report,
    } = analysis::run_fleet(&pool, ctx, &registry, cfg.run.workers).await;

    let batch_size = cfg.run.report_batch_size;
    let anomaly_pipeline: Pipeline<_, AnomalyRecord> = Pipeline {
        source: VecSource::new(anomalies),
        transforms: vec![],
    };
    let daily_pipeline: Pipeline<_, DailySummary> = Pipeline {
        source: VecSource::new(daily),
        transforms: vec![],
    };
    let anomaly_sink = CsvReportSink::<AnomalyRecord>::new(&cfg.run.anomaly_report_path, batch_size);
    let daily_sink = CsvReportSink::<DailySummary>::new(&cfg.run.daily_report_path, batch_size);

    tokio::try_join!(
        anomaly_pipeline.run(&anomaly_sink),
        daily_pipeline.run(&daily_sink),
        write_optional_report(cfg.run.energy_deviation_report_path.as_deref(), deviations, batch_size),
        write_optional_report(cfg.run.actual_wattage_report_path.as_deref(), actual_wattages, batch_size),
    )?;

    if let Some(path) = &cfg.run.run_report_path {
        std::fs::write(path, serde_json::to_string_pretty(&report)?)
            .map_err(|e| anyhow::anyhow!("failed to write run report {}: {e}", path.display()))?;
    }

    tracing::info!(
        analyzed = report.assets_analyzed,
        skipped = report.assets_skipped,
        rejected = report.readings_rejected,
        readings = report.readings,
        intervals = report.intervals_classified,
        anomalies = ?report.anomalies,
        daily_summaries = report.daily_summaries,
        energy_deviations = report.energy_deviations,
        wattage_estimates = report.wattage_estimates,
        "anomaly run finished"
    );

    Ok(())
}
