use anyhow::{bail, Result};
use anomaly_service::{calendar::DimmingCalendar, config::AppConfig, observability};
use sqlx::postgres::PgPoolOptions;
use std::env;
use streetlight_client::db;

const WEEKDAYS: [&str; 7] = ["Sunday", "Monday", "Tuesday", "Wednesday", "Thursday", "Friday", "Saturday"];

// 1740 -> "+1 05:00"
fn clock(minute: i64) -> String {
    let day = minute.div_euclid(1440);
    let m = minute.rem_euclid(1440);
    let hhmm = format!("{:02}:{:02}", m / 60, m % 60);
    match day {
        0 => hhmm,
        d => format!("{d:+} {hhmm}"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    observability::init_tracing();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        bail!("usage: dump_calendar <calendar_id>");
    }
    let calendar_id: i64 = args[1].parse()?;

    let cfg = AppConfig::load()?;
    let pool = PgPoolOptions::new()
        .max_connections(1)
        .connect(&cfg.database.uri)
        .await?;

    let Some(xml) = db::dimming_calendar_xml(&pool, calendar_id).await? else {
        bail!("calendar {calendar_id} has no revisions");
    };
    let calendar = DimmingCalendar::parse(&xml)?;

    for (day, shape) in WEEKDAYS.iter().zip(calendar.shapes()) {
        let program: Vec<String> = shape
            .breakpoints()
            .iter()
            .map(|b| format!("{}={}%", clock(b.minute), b.percent))
            .collect();
        tracing::info!(
            calendar_id,
            day,
            shape_id = %shape.id,
            name = shape.name.as_deref().unwrap_or("-"),
            default = shape.is_default,
            sunrise_offset = shape.sunrise_offset_minutes,
            sunset_offset = shape.sunset_offset_minutes,
            program = %program.join(" "),
            "dimming shape"
        );
    }

    Ok(())
}
