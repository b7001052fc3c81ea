use sqlx::PgPool;
use streetlight_client::db::{self, ReadingCursor};
use streetlight_client::domain::MeterReading;
use time::OffsetDateTime;

use crate::pipeline::{Envelope, EnvelopeStream, PipelineError, Source};

/// Meter readings of one asset streamed from Postgres a page at a time.
///
/// Only one page is held in memory, so whole-fleet runs stay bounded no matter
/// how long the date range is.
pub struct MeterReadingDbSource {
    pool: PgPool,
    asset_id: i64,
    start: OffsetDateTime,
    end: OffsetDateTime,
    page_size: usize,
}

impl MeterReadingDbSource {
    pub fn new(pool: PgPool, asset_id: i64, start: OffsetDateTime, end: OffsetDateTime, page_size: usize) -> Self {
        Self {
            pool,
            asset_id,
            start,
            end,
            page_size: page_size.max(1),
        }
    }
}

#[async_trait::async_trait]
impl Source<MeterReading> for MeterReadingDbSource {
    async fn stream(&self) -> EnvelopeStream<MeterReading> {
        let pool = self.pool.clone();
        let (asset_id, start, end, page_size) = (self.asset_id, self.start, self.end, self.page_size);

        let s = async_stream::try_stream! {
            let mut cursor = ReadingCursor::before(start);
            let mut pages = 0u32;
            loop {
                let page = db::meter_readings_page(&pool, asset_id, start, end, cursor, page_size as i64)
                    .await
                    .map_err(|e| PipelineError::Source(format!("asset {asset_id}: {e}")))?;
                pages += 1;

                let full = page.len() == page_size;
                if let Some(last) = page.last() {
                    cursor = ReadingCursor::after(last);
                }
                metrics::counter!("readings_read_total").increment(page.len() as u64);

                for row in page {
                    yield Envelope::now(row.reading);
                }

                if !full {
                    break;
                }
            }
            tracing::debug!(asset_id, pages, "meter readings exhausted");
        };

        Box::pin(s)
    }
}
