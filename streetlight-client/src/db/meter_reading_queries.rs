use sqlx::PgPool;
use time::{OffsetDateTime, PrimitiveDateTime, UtcOffset};

use super::Result;
use crate::domain::{AssetRow, MeterReadingRow, NodeComponentRow, NominalWattageRow};

/// Position after the last row of a page of meter readings.
///
/// Readings are ordered by `(meter_component_id, ts, reading_id)`, a unique
/// key, so the next page starts strictly after this key and never skips a
/// reading that shares a timestamp with the last one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadingCursor {
    pub meter_component_id: i64,
    pub ts: OffsetDateTime,
    pub reading_id: i64,
}

impl ReadingCursor {
    /// Cursor that sorts before every reading at or after `start`.
    pub fn before(start: OffsetDateTime) -> Self {
        Self {
            meter_component_id: i64::MIN,
            ts: start,
            reading_id: i64::MIN,
        }
    }

    pub fn after(row: &MeterReadingRow) -> Self {
        Self {
            meter_component_id: row.reading.meter_component_id,
            ts: row.reading.ts,
            reading_id: row.reading_id,
        }
    }
}

// `timestamp_utc` is a timestamp without time zone holding UTC wall time.
fn naive_utc(ts: OffsetDateTime) -> PrimitiveDateTime {
    let utc = ts.to_offset(UtcOffset::UTC);
    PrimitiveDateTime::new(utc.date(), utc.time())
}

/// Live assets that have been installed and commissioned.
pub async fn load_assets(pool: &PgPool) -> Result<Vec<AssetRow>> {
    let rows = sqlx::query_as::<_, AssetRow>(
        r#"
        SELECT
            a.id::int8              AS asset_id,
            a.latitude::float8      AS latitude,
            a.longitude::float8     AS longitude,
            a.installation_date,
            a.commissioning_date,
            s.name                  AS street_name
        FROM assets a
        LEFT JOIN streets s ON a.street_id = s.id
        WHERE a.is_deleted = 'f'
          AND a.installation_date IS NOT NULL
          AND a.commissioning_date IS NOT NULL
        ORDER BY a.id
        "#,
    )
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// Luminaire type and rated wattage for every live asset.
pub async fn load_nominal_wattages(pool: &PgPool) -> Result<Vec<NominalWattageRow>> {
    let rows = sqlx::query_as::<_, NominalWattageRow>(
        r#"
        SELECT
            a.id::int8                  AS asset_id,
            lt.type_designation         AS luminaire_type,
            lt.nominal_wattage::float8  AS nominal_wattage
        FROM luminaire_types lt
        JOIN luminaires l ON l.luminaire_type_id = lt.id
        JOIN components c ON c.id = l.id
        JOIN assets a ON a.id = c.asset_id
        WHERE a.is_deleted = 'f'
          AND a.installation_date IS NOT NULL
          AND a.commissioning_date IS NOT NULL
        ORDER BY a.id
        "#,
    )
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// Registered communication node component of every live asset.
pub async fn load_node_components(pool: &PgPool) -> Result<Vec<NodeComponentRow>> {
    let rows = sqlx::query_as::<_, NodeComponentRow>(
        r#"
        SELECT
            a.id::int8 AS asset_id,
            c.id::int8 AS component_id
        FROM assets a
        JOIN components c ON c.asset_id = a.id
        WHERE a.is_deleted = 'f'
          AND a.installation_date IS NOT NULL
          AND a.commissioning_date IS NOT NULL
          AND c.is_deleted = 'f'
          AND c.component_kind = 0
          AND c.is_registered = 't'
        ORDER BY a.id
        "#,
    )
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// Latest serialized schedule revision of a calendar, if the calendar exists.
pub async fn dimming_calendar_xml(pool: &PgPool, calendar_id: i64) -> Result<Option<String>> {
    let xml = sqlx::query_scalar::<_, String>(
        r#"
        SELECT serialized_schedules
        FROM driver_calendar_revisions
        WHERE core_calendar_id = $1
        ORDER BY created_on_utc DESC
        LIMIT 1
        "#,
    )
    .bind(calendar_id)
    .fetch_optional(pool)
    .await?;

    Ok(xml)
}

/// Latest schedule revision of the calendar assigned to a communication node.
pub async fn dimming_calendar_xml_for_node(
    pool: &PgPool,
    node_component_id: i64,
) -> Result<Option<String>> {
    let xml = sqlx::query_scalar::<_, String>(
        r#"
        SELECT r.serialized_schedules
        FROM communications_nodes n
        JOIN driver_calendar_revisions r ON r.core_calendar_id = n.dimming_calendar_id
        WHERE n.id = $1
        ORDER BY r.created_on_utc DESC
        LIMIT 1
        "#,
    )
    .bind(node_component_id)
    .fetch_optional(pool)
    .await?;

    Ok(xml)
}

/// One page of an asset's meter readings in `[start, end)`, ordered by meter,
/// time and row key, starting strictly after `after`.
pub async fn meter_readings_page(
    pool: &PgPool,
    asset_id: i64,
    start: OffsetDateTime,
    end: OffsetDateTime,
    after: ReadingCursor,
    limit: i64,
) -> Result<Vec<MeterReadingRow>> {
    let rows = sqlx::query_as::<_, MeterReadingRow>(
        r#"
        SELECT
            a.id::int8                          AS reading_id,
            a.timestamp_utc AT TIME ZONE 'UTC'  AS ts,
            b.asset_id::int8                    AS asset_id,
            b.meter_component_id::int8          AS meter_component_id,
            a.kwh::float8                       AS kwh
        FROM energy_metering_points b
        JOIN energy_meter_readings a ON b.id = a.metering_point_id
        WHERE b.asset_id = $1
          AND a.timestamp_utc >= $2
          AND a.timestamp_utc <  $3
          AND (b.meter_component_id, a.timestamp_utc, a.id) > ($4, $5, $6)
        ORDER BY b.meter_component_id, a.timestamp_utc, a.id
        LIMIT $7
        "#,
    )
    .bind(asset_id)
    .bind(naive_utc(start))
    .bind(naive_utc(end))
    .bind(after.meter_component_id)
    .bind(naive_utc(after.ts))
    .bind(after.reading_id)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::MeterReading;
    use time::macros::datetime;

    #[test]
    fn naive_utc_drops_offset_after_normalizing() {
        let ts = datetime!(2024-03-01 01:30:00 +02:00);
        assert_eq!(naive_utc(ts), datetime!(2024-02-29 23:30:00));
    }

    #[test]
    fn cursor_before_sorts_ahead_of_any_meter() {
        let start = datetime!(2024-01-01 00:00:00 UTC);
        let cursor = ReadingCursor::before(start);
        assert_eq!(cursor.meter_component_id, i64::MIN);
        assert_eq!(cursor.ts, start);
    }

    fn row(reading_id: i64, meter_component_id: i64, ts: OffsetDateTime, kwh: f64) -> MeterReadingRow {
        MeterReadingRow {
            reading_id,
            reading: MeterReading {
                ts,
                asset_id: 7,
                meter_component_id,
                kwh,
            },
        }
    }

    fn key(meter_component_id: i64, ts: OffsetDateTime, reading_id: i64) -> (i64, OffsetDateTime, i64) {
        (meter_component_id, ts, reading_id)
    }

    /// In-memory rendition of the paging predicate and order of `meter_readings_page`.
    fn page(rows: &[MeterReadingRow], after: ReadingCursor, limit: usize) -> Vec<MeterReadingRow> {
        let mut sorted: Vec<_> = rows.to_vec();
        sorted.sort_by_key(|r| key(r.reading.meter_component_id, r.reading.ts, r.reading_id));
        sorted
            .into_iter()
            .filter(|r| {
                key(r.reading.meter_component_id, r.reading.ts, r.reading_id)
                    > key(after.meter_component_id, after.ts, after.reading_id)
            })
            .take(limit)
            .collect()
    }

    #[test]
    fn cursor_after_row_points_at_it() {
        let r = row(900, 42, datetime!(2024-01-01 00:15:00 UTC), 1.25);
        let cursor = ReadingCursor::after(&r);
        assert_eq!(cursor.meter_component_id, 42);
        assert_eq!(cursor.ts, r.reading.ts);
        assert_eq!(cursor.reading_id, 900);
    }

    #[test]
    fn paging_keeps_duplicate_timestamps_at_any_page_size() {
        let t0 = datetime!(2024-01-01 00:00:00 UTC);
        let t1 = datetime!(2024-01-01 00:15:00 UTC);
        let rows = vec![
            row(1, 42, t0, 1.0),
            row(2, 42, t0, 1.5),
            row(3, 42, t1, 1.5),
            row(4, 43, t0, 9.0),
        ];

        for limit in 1..=rows.len() {
            let mut cursor = ReadingCursor::before(t0);
            let mut seen = Vec::new();
            loop {
                let batch = page(&rows, cursor, limit);
                if let Some(last) = batch.last() {
                    cursor = ReadingCursor::after(last);
                }
                let full = batch.len() == limit;
                seen.extend(batch.iter().map(|r| r.reading_id));
                if !full {
                    break;
                }
            }
            assert_eq!(seen, vec![1, 2, 3, 4], "page size {limit}");
        }
    }
}
