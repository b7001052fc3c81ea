use std::{
    marker::PhantomData,
    path::{Path, PathBuf},
};

use futures::StreamExt;
use serde::Serialize;

use crate::{
    pipeline::{Envelope, Pipeline, PipelineError, Sink, VecSource},
    report::{ActualWattageRecord, AnomalyRecord, DailySummary, EnergyDeviationRecord},
};

/// A row type with a fixed column schema.
///
/// `HEADER` is written even when a report has no rows, so an empty report is
/// still a valid file of its schema.
pub trait ReportRow: Serialize {
    const REPORT: &'static str;
    const HEADER: &'static [&'static str];
}

impl ReportRow for AnomalyRecord {
    const REPORT: &'static str = "anomalies";
    const HEADER: &'static [&'static str] = &[
        "record_id",
        "region",
        "asset_id",
        "meter_component_id",
        "latitude",
        "longitude",
        "installation_date",
        "commissioning_date",
        "street_name",
        "nominal_wattage",
        "timestamp_start",
        "timestamp_end",
        "calendar_percentage",
        "expected_wattage",
        "actual_wattage",
        "error_type",
        "schema_version",
    ];
}

impl ReportRow for DailySummary {
    const REPORT: &'static str = "daily";
    const HEADER: &'static [&'static str] = &[
        "region",
        "asset_id",
        "date",
        "error_type",
        "interval_count",
        "on_time_minutes",
        "energy_kwh",
        "mean_wattage",
        "schema_version",
    ];
}

impl ReportRow for EnergyDeviationRecord {
    const REPORT: &'static str = "energy_deviations";
    const HEADER: &'static [&'static str] = &[
        "region",
        "asset_id",
        "meter_component_id",
        "latitude",
        "longitude",
        "street_name",
        "date",
        "daily_energy_kwh",
        "window_mean_kwh",
        "window_std_kwh",
        "num_std",
        "schema_version",
    ];
}

impl ReportRow for ActualWattageRecord {
    const REPORT: &'static str = "actual_wattage";
    const HEADER: &'static [&'static str] = &[
        "region",
        "asset_id",
        "luminaire_type",
        "nominal_wattage",
        "actual_wattage",
        "days",
        "schema_version",
    ];
}

/// Writes report rows to a CSV file, flushing every `batch_size` rows.
pub struct CsvReportSink<T> {
    path: PathBuf,
    batch_size: usize,
    _marker: PhantomData<fn() -> T>,
}

impl<T> CsvReportSink<T> {
    pub fn new<P: Into<PathBuf>>(path: P, batch_size: usize) -> Self {
        Self {
            path: path.into(),
            batch_size: batch_size.max(1),
            _marker: PhantomData,
        }
    }
}

impl<T> CsvReportSink<T>
where
    T: ReportRow,
{
    fn open(&self) -> Result<csv::Writer<std::fs::File>, PipelineError> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)
                .map_err(|e| PipelineError::Sink(format!("failed to create {}: {e}", dir.display())))?;
        }
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_path(&self.path)
            .map_err(|e| PipelineError::Sink(format!("failed to create {}: {e}", self.path.display())))?;
        writer
            .write_record(T::HEADER)
            .map_err(|e| PipelineError::Sink(format!("failed to write {} header: {e}", T::REPORT)))?;
        Ok(writer)
    }

    fn flush_batch(&self, writer: &mut csv::Writer<std::fs::File>, batch: &[Envelope<T>]) -> Result<(), PipelineError> {
        if batch.is_empty() {
            return Ok(());
        }

        for env in batch {
            writer.serialize(&env.payload).map_err(|e| {
                metrics::counter!("report_sink_errors_total", "report" => T::REPORT).increment(1);
                PipelineError::Sink(format!("failed to write {} row: {e}", T::REPORT))
            })?;
        }
        writer
            .flush()
            .map_err(|e| PipelineError::Sink(format!("failed to flush {}: {e}", self.path.display())))?;

        metrics::counter!("report_rows_written_total", "report" => T::REPORT).increment(batch.len() as u64);
        Ok(())
    }
}

impl<T> CsvReportSink<T>
where
    T: ReportRow + Send + Sync + 'static,
{
    /// Writes already collected rows.
    pub async fn write_all(&self, rows: Vec<T>) -> Result<(), PipelineError> {
        let pipeline: Pipeline<_, T> = Pipeline {
            source: VecSource::new(rows),
            transforms: vec![],
        };
        pipeline.run(self).await
    }
}

/// Writes `rows` when the report is configured, does nothing otherwise.
pub async fn write_optional_report<T>(path: Option<&Path>, rows: Vec<T>, batch_size: usize) -> Result<(), PipelineError>
where
    T: ReportRow + Send + Sync + 'static,
{
    match path {
        Some(path) => CsvReportSink::<T>::new(path, batch_size).write_all(rows).await,
        None => {
            tracing::debug!(report = T::REPORT, rows = rows.len(), "report not configured");
            Ok(())
        }
    }
}

#[async_trait::async_trait]
impl<T> Sink<T> for CsvReportSink<T>
where
    T: ReportRow + Send + Sync + 'static,
{
    async fn run<S>(&self, mut input: S) -> Result<(), PipelineError>
    where
        S: futures::Stream<Item = Result<Envelope<T>, PipelineError>> + Send + Unpin + 'static,
    {
        let mut writer = self.open()?;
        let mut buffer: Vec<Envelope<T>> = Vec::with_capacity(self.batch_size);
        let mut rows = 0usize;

        while let Some(item) = input.next().await {
            let env = match item {
                Ok(env) => env,
                Err(e) => {
                    tracing::error!(error = %e, report = T::REPORT, "error in upstream pipeline for CsvReportSink");
                    continue;
                }
            };

            buffer.push(env);
            if buffer.len() >= self.batch_size {
                self.flush_batch(&mut writer, &buffer)?;
                rows += buffer.len();
                buffer.clear();
            }
        }

        if !buffer.is_empty() {
            self.flush_batch(&mut writer, &buffer)?;
            rows += buffer.len();
        }
        writer
            .flush()
            .map_err(|e| PipelineError::Sink(format!("failed to flush {}: {e}", self.path.display())))?;

        tracing::info!(report = T::REPORT, rows, path = %self.path.display(), "report written");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::{AnomalyKind, DayTotals};
    use crate::energy::{EnergyDeviation, WattageEstimate};
    use time::macros::{date, datetime};

    fn anomaly() -> AnomalyRecord {
        AnomalyRecord {
            record_id: "abc".to_string(),
            region: "barcelona".to_string(),
            asset_id: 2003,
            meter_component_id: 3957,
            latitude: Some(41.5),
            longitude: Some(2.25),
            installation_date: date!(2016-02-19),
            commissioning_date: date!(2016-02-20),
            street_name: None,
            nominal_wattage: 72.0,
            timestamp_start: datetime!(2016-09-10 20:00 UTC),
            timestamp_end: datetime!(2016-09-10 20:15 UTC),
            calendar_percentage: Some(100.0),
            expected_wattage: 72.0,
            actual_wattage: 0.0,
            error_type: AnomalyKind::NightOutage.as_str(),
            schema_version: crate::report::ANOMALY_SCHEMA,
        }
    }

    fn header_of<T: Serialize>(row: &T) -> String {
        let mut w = csv::Writer::from_writer(vec![]);
        w.serialize(row).unwrap();
        let out = String::from_utf8(w.into_inner().unwrap()).unwrap();
        out.lines().next().unwrap().to_string()
    }

    #[test]
    fn declared_headers_match_serialized_fields() {
        assert_eq!(header_of(&anomaly()), AnomalyRecord::HEADER.join(","));
        let daily = DailySummary::new("barcelona", 1, date!(2016-09-10), AnomalyKind::Dayburner, &DayTotals::default());
        assert_eq!(header_of(&daily), DailySummary::HEADER.join(","));
    }

    #[tokio::test]
    async fn energy_reports_match_their_headers() {
        let asset = crate::assets::Asset {
            asset_id: 2003,
            latitude: Some(41.5),
            longitude: Some(2.25),
            installation_date: date!(2016-02-19),
            commissioning_date: date!(2016-02-20),
            street_name: Some("Carrer Gran".to_string()),
            luminaire_type: Some("LED".to_string()),
            nominal_wattage: Some(72.0),
            node_component_id: Some(1),
        };
        let flat = EnergyDeviation {
            meter_component_id: 3957,
            date: date!(2016-09-10),
            daily_kwh: 1.5,
            window_mean_kwh: 1.0,
            window_std_kwh: 0.0,
            num_std: None,
        };
        let deviation = EnergyDeviationRecord::new("barcelona", &asset, &flat);
        assert_eq!(header_of(&deviation), EnergyDeviationRecord::HEADER.join(","));
        let wattage = ActualWattageRecord::new("barcelona", &asset, 72.0, &WattageEstimate { actual_wattage_w: 80.0, days: 3 });
        assert_eq!(header_of(&wattage), ActualWattageRecord::HEADER.join(","));

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("deviations.csv");
        CsvReportSink::<EnergyDeviationRecord>::new(&path, 10)
            .write_all(vec![deviation])
            .await
            .unwrap();
        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(
            contents.lines().nth(1).unwrap(),
            "barcelona,2003,3957,41.5,2.25,Carrer Gran,2016-09-10,1.5,1.0,0.0,,energy-deviation-v1"
        );
    }

    #[tokio::test]
    async fn writes_header_and_rows_across_batches() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("anomalies.csv");
        let sink = CsvReportSink::<AnomalyRecord>::new(&path, 2);

        let pipeline: Pipeline<_, AnomalyRecord> = Pipeline {
            source: VecSource::new(vec![anomaly(), anomaly(), anomaly()]),
            transforms: vec![],
        };
        pipeline.run(&sink).await.unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0], AnomalyRecord::HEADER.join(","));
        assert_eq!(
            lines[1],
            "abc,barcelona,2003,3957,41.5,2.25,2016-02-19,2016-02-20,,72.0,\
             2016-09-10T20:00:00Z,2016-09-10T20:15:00Z,100.0,72.0,0.0,night_outage,anomaly-v1"
        );
    }

    #[tokio::test]
    async fn unconfigured_report_writes_nothing() {
        write_optional_report::<DailySummary>(None, vec![], 10).await.unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("daily.csv");
        write_optional_report::<DailySummary>(Some(path.as_path()), vec![], 10).await.unwrap();
        assert!(path.exists());
    }

    #[tokio::test]
    async fn empty_report_still_has_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("daily.csv");
        let sink = CsvReportSink::<DailySummary>::new(&path, 10);
        sink.run(futures::stream::empty::<Result<Envelope<DailySummary>, PipelineError>>())
            .await
            .unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.trim_end(), DailySummary::HEADER.join(","));
    }
}
