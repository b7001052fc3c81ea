use anyhow::{bail, Context, Result};
use anomaly_service::suntime::SunTable;
use serde::Serialize;
use std::env;
use time::{macros::format_description, Date, OffsetDateTime};

#[derive(Serialize)]
struct Row {
    date: Date,
    #[serde(with = "time::serde::rfc3339")]
    sunrise: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    sunset: OffsetDateTime,
    daylight_minutes: i64,
}

fn parse_date(raw: &str) -> Result<Date> {
    Date::parse(raw, format_description!("[year]-[month]-[day]")).with_context(|| format!("invalid date '{raw}'"))
}

/// Prints sunrise and sunset (UTC) for each date in `start..=end` as CSV.
fn main() -> Result<()> {
    let args: Vec<String> = env::args().collect();
    if args.len() < 5 {
        bail!("usage: sun_times <latitude> <longitude> <start YYYY-MM-DD> <end YYYY-MM-DD>");
    }
    let latitude: f64 = args[1].parse().with_context(|| format!("invalid latitude '{}'", args[1]))?;
    let longitude: f64 = args[2].parse().with_context(|| format!("invalid longitude '{}'", args[2]))?;
    let start = parse_date(&args[3])?;
    let end = parse_date(&args[4])?;
    if end < start {
        bail!("end {end} is before start {start}");
    }

    let table = SunTable::build(latitude, longitude, start, end)?;

    let mut out = csv::Writer::from_writer(std::io::stdout());
    let mut day = start;
    loop {
        let times = table.get(day)?;
        out.serialize(Row {
            date: day,
            sunrise: times.sunrise,
            sunset: times.sunset,
            daylight_minutes: times.daylight().whole_minutes(),
        })?;
        match day.next_day() {
            Some(next) if next <= end => day = next,
            _ => break,
        }
    }
    out.flush()?;

    Ok(())
}
