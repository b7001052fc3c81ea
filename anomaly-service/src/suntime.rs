//! Sunrise and sunset from the NOAA general solar position approximation.
//!
//! Accuracy is within a couple of minutes for mid latitudes, well inside the
//! meter reading cadence. Places without a sunrise or sunset on a date (polar
//! day or night) are unsupported and return an error.

use std::collections::BTreeMap;

use time::{Date, Duration, OffsetDateTime, Time};

/// Solar zenith of the apparent sunrise/sunset, including refraction and the solar disc.
const SUNRISE_ZENITH_DEG: f64 = 90.833;

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum SunTimeError {
    #[error("coordinates ({latitude}, {longitude}) are out of range")]
    InvalidCoordinates { latitude: f64, longitude: f64 },
    #[error("no sunrise or sunset at latitude {latitude} on {date}")]
    NoSunriseOrSunset { latitude: f64, date: Date },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SunTimes {
    pub sunrise: OffsetDateTime,
    pub sunset: OffsetDateTime,
}

impl SunTimes {
    pub fn daylight(&self) -> Duration {
        self.sunset - self.sunrise
    }
}

/// Sunrise and sunset in UTC for `date` at the given position.
pub fn sun_times(date: Date, latitude: f64, longitude: f64) -> Result<SunTimes, SunTimeError> {
    if !(-90.0..=90.0).contains(&latitude) || !(-180.0..=180.0).contains(&longitude) {
        return Err(SunTimeError::InvalidCoordinates { latitude, longitude });
    }

    let days_in_year = if time::util::is_leap_year(date.year()) { 366.0 } else { 365.0 };
    // Fractional year at solar noon, radians.
    let gamma = 2.0 * std::f64::consts::PI / days_in_year * (f64::from(date.ordinal()) - 1.0);

    let eq_time_min = 229.18
        * (0.000075 + 0.001868 * gamma.cos()
            - 0.032077 * gamma.sin()
            - 0.014615 * (2.0 * gamma).cos()
            - 0.040849 * (2.0 * gamma).sin());

    let declination = 0.006918 - 0.399912 * gamma.cos() + 0.070257 * gamma.sin()
        - 0.006758 * (2.0 * gamma).cos()
        + 0.000907 * (2.0 * gamma).sin()
        - 0.002697 * (3.0 * gamma).cos()
        + 0.00148 * (3.0 * gamma).sin();

    let lat = latitude.to_radians();
    let cos_hour_angle = SUNRISE_ZENITH_DEG.to_radians().cos() / (lat.cos() * declination.cos())
        - lat.tan() * declination.tan();
    if !(-1.0..=1.0).contains(&cos_hour_angle) {
        return Err(SunTimeError::NoSunriseOrSunset { latitude, date });
    }
    let hour_angle_deg = cos_hour_angle.acos().to_degrees();

    // Minutes after UTC midnight of `date`; may fall outside [0, 1440) far from Greenwich.
    let sunrise_min = 720.0 - 4.0 * (longitude + hour_angle_deg) - eq_time_min;
    let sunset_min = 720.0 - 4.0 * (longitude - hour_angle_deg) - eq_time_min;

    let midnight = date.with_time(Time::MIDNIGHT).assume_utc();
    Ok(SunTimes {
        sunrise: midnight + Duration::seconds_f64(sunrise_min * 60.0),
        sunset: midnight + Duration::seconds_f64(sunset_min * 60.0),
    })
}

/// Sun times for one position, precomputed for a range of dates.
#[derive(Debug, Clone)]
pub struct SunTable {
    latitude: f64,
    longitude: f64,
    days: BTreeMap<Date, SunTimes>,
}

impl SunTable {
    /// Computes every date in `first..=last`.
    pub fn build(latitude: f64, longitude: f64, first: Date, last: Date) -> Result<Self, SunTimeError> {
        let mut days = BTreeMap::new();
        let mut day = first;
        while day <= last {
            days.insert(day, sun_times(day, latitude, longitude)?);
            match day.next_day() {
                Some(next) => day = next,
                None => break,
            }
        }
        Ok(Self {
            latitude,
            longitude,
            days,
        })
    }

    pub fn latitude(&self) -> f64 {
        self.latitude
    }

    pub fn longitude(&self) -> f64 {
        self.longitude
    }

    /// Precomputed value when `date` is in range, computed on demand otherwise.
    pub fn get(&self, date: Date) -> Result<SunTimes, SunTimeError> {
        match self.days.get(&date) {
            Some(times) => Ok(*times),
            None => sun_times(date, self.latitude, self.longitude),
        }
    }

    pub fn len(&self) -> usize {
        self.days.len()
    }

    pub fn is_empty(&self) -> bool {
        self.days.is_empty()
    }
}
