use time::OffsetDateTime;

/// One cumulative energy counter sample of a streetlight meter.
///
/// `kwh` is the running total since the meter was installed; consumption over
/// an interval is the difference between two samples of the same meter.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct MeterReading {
    pub ts: OffsetDateTime,
    pub asset_id: i64,
    pub meter_component_id: i64,
    pub kwh: f64,
}

/// A reading as paged out of the database.
///
/// `reading_id` is the row key; it breaks ties between readings of one meter
/// that share a timestamp, so paging order is total.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct MeterReadingRow {
    pub reading_id: i64,
    #[sqlx(flatten)]
    pub reading: MeterReading,
}
