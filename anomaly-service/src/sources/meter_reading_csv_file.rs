use std::{fs::File, path::PathBuf};

use csv::StringRecord;
use streetlight_client::domain::MeterReading;
use time::OffsetDateTime;

use crate::pipeline::{Envelope, EnvelopeStream, PipelineError, Source};

/// CSV export of meter readings.
///
/// Expected header columns (by name):
/// - ts (RFC3339 timestamp)
/// - asset_id
/// - meter_component_id (optional, defaults to 0)
/// - kwh (cumulative counter)
///
/// Rows must already be ordered by meter and time, as the database query returns them.
pub struct MeterReadingCsvFileSource {
    path: PathBuf,
    asset_id: Option<i64>,
}

impl MeterReadingCsvFileSource {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            path: path.into(),
            asset_id: None,
        }
    }

    /// Only yield rows of one asset.
    pub fn for_asset(mut self, asset_id: i64) -> Self {
        self.asset_id = Some(asset_id);
        self
    }
}

fn parse_field<T: std::str::FromStr>(name: &str, raw: &str) -> Result<T, PipelineError>
where
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e| PipelineError::Transform(format!("invalid {name} '{raw}': {e}")))
}

fn record_to_meter_reading(record: &StringRecord, headers: &StringRecord) -> Result<MeterReading, PipelineError> {
    let get = |name: &str| -> Option<&str> {
        headers
            .iter()
            .position(|h| h.trim() == name)
            .and_then(|idx| record.get(idx))
    };
    let require = |name: &str| -> Result<&str, PipelineError> {
        get(name).ok_or_else(|| PipelineError::Transform(format!("missing column '{name}' in CSV record")))
    };

    let ts_str = require("ts")?;
    let ts = OffsetDateTime::parse(ts_str.trim(), &time::format_description::well_known::Rfc3339)
        .map_err(|e| PipelineError::Transform(format!("invalid ts '{ts_str}': {e}")))?;

    let meter_component_id = match get("meter_component_id").map(str::trim) {
        Some(raw) if !raw.is_empty() => parse_field("meter_component_id", raw)?,
        _ => 0,
    };

    Ok(MeterReading {
        ts,
        asset_id: parse_field("asset_id", require("asset_id")?)?,
        meter_component_id,
        kwh: parse_field("kwh", require("kwh")?)?,
    })
}

#[async_trait::async_trait]
impl Source<MeterReading> for MeterReadingCsvFileSource {
    async fn stream(&self) -> EnvelopeStream<MeterReading> {
        // Blocking reader inside one task; exports are per asset and small.
        let path = self.path.clone();
        let only_asset = self.asset_id;
        let s = async_stream::try_stream! {
            let file = File::open(&path)
                .map_err(|e| PipelineError::Source(format!("failed to open CSV file {}: {e}", path.display())))?;
            let mut rdr = csv::Reader::from_reader(file);
            let headers = rdr
                .headers()
                .map_err(|e| PipelineError::Source(format!("failed to read CSV headers: {e}")))?
                .clone();

            for result in rdr.records() {
                let record = result.map_err(|e| PipelineError::Source(format!(
                    "failed to read CSV record: {e}"
                )))?;

                let reading = match record_to_meter_reading(&record, &headers) {
                    Ok(r) => r,
                    Err(e) => {
                        metrics::counter!("meter_reading_csv_parse_errors_total").increment(1);
                        tracing::warn!(error = %e, line = ?record.position().map(|p| p.line()), "skipping CSV row");
                        continue;
                    }
                };

                if only_asset.is_some_and(|id| id != reading.asset_id) {
                    continue;
                }

                yield Envelope::now(reading);
            }
        };

        Box::pin(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use std::io::Write;
    use time::macros::datetime;

    fn write_csv(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[tokio::test]
    async fn reads_rows_and_skips_bad_ones() {
        let file = write_csv(
            "ts,asset_id,meter_component_id,kwh\n\
             2024-03-10T20:00:00Z,1,10,1.0\n\
             not-a-time,1,10,1.1\n\
             2024-03-10T20:15:00Z,1,10,1.025\n\
             2024-03-10T20:15:00Z,2,20,9.0\n",
        );

        let source = MeterReadingCsvFileSource::new(file.path()).for_asset(1);
        let items: Vec<_> = source.stream().await.collect().await;
        let readings: Vec<MeterReading> = items.into_iter().map(|i| i.unwrap().payload).collect();

        assert_eq!(readings.len(), 2);
        assert_eq!(readings[0].ts, datetime!(2024-03-10 20:00 UTC));
        assert_eq!(readings[1].kwh, 1.025);
        assert_eq!(readings[1].meter_component_id, 10);
    }

    #[tokio::test]
    async fn meter_column_is_optional() {
        let file = write_csv("ts,asset_id,kwh\n2024-03-10T20:00:00+02:00,5,3.5\n");
        let items: Vec<_> = MeterReadingCsvFileSource::new(file.path()).stream().await.collect().await;
        let reading = &items[0].as_ref().unwrap().payload;
        assert_eq!(reading.meter_component_id, 0);
        assert_eq!(reading.ts, datetime!(2024-03-10 18:00 UTC));
    }

    #[tokio::test]
    async fn missing_file_is_a_source_error() {
        let items: Vec<_> = MeterReadingCsvFileSource::new("/nonexistent/readings.csv")
            .stream()
            .await
            .collect()
            .await;
        assert_eq!(items.len(), 1);
        assert!(matches!(items[0], Err(PipelineError::Source(_))));
    }
}
