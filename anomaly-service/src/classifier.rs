//! Day/night classification of metered intervals.
//!
//! Consecutive cumulative readings of one meter form an interval whose mean
//! power is compared against what the light should draw at that time: nothing
//! during the day, the dimming calendar's percent of nominal at night.

use std::collections::BTreeMap;

use streetlight_client::domain::MeterReading;
use time::{macros::time, Date, Duration, OffsetDateTime, Time, UtcOffset};

use crate::{
    calendar::{DimmingCalendar, DimmingShape},
    config::Thresholds,
    suntime::{SunTable, SunTimeError, SunTimes},
};

/// Local hour before which a reading belongs to the previous evening's program.
const CALENDAR_DAY_PIVOT: Time = time!(12:00);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Phase {
    Day,
    Night,
    /// Between the day and night boundaries when sunrise/sunset buffers are set.
    Twilight,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AnomalyKind {
    Dayburner,
    NightOutage,
    NightNotDimming,
    AboveNominal,
}

impl AnomalyKind {
    pub const ALL: [AnomalyKind; 4] = [
        AnomalyKind::Dayburner,
        AnomalyKind::NightOutage,
        AnomalyKind::NightNotDimming,
        AnomalyKind::AboveNominal,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AnomalyKind::Dayburner => "dayburner",
            AnomalyKind::NightOutage => "night_outage",
            AnomalyKind::NightNotDimming => "night_not_dimming",
            AnomalyKind::AboveNominal => "actual_above_nominal_wattage",
        }
    }
}

impl std::fmt::Display for AnomalyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DropReason {
    BeforeCommissioning,
    OutOfOrder,
    ZeroLength,
    NegativeEnergy,
    Gap,
}

impl DropReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DropReason::BeforeCommissioning => "before_commissioning",
            DropReason::OutOfOrder => "out_of_order",
            DropReason::ZeroLength => "zero_length",
            DropReason::NegativeEnergy => "negative_energy",
            DropReason::Gap => "gap",
        }
    }
}

/// Run-wide settings shared by every asset.
#[derive(Debug, Clone)]
pub struct ClassifierSettings {
    pub thresholds: Thresholds,
    pub utc_offset: UtcOffset,
    pub commissioning_grace_days: u16,
}

/// Two consecutive readings of the same meter.
#[derive(Debug, Clone, PartialEq)]
pub struct Interval {
    pub meter_component_id: i64,
    pub start: OffsetDateTime,
    pub end: OffsetDateTime,
    pub energy_kwh: f64,
    pub power_w: f64,
}

impl Interval {
    /// `None` when the readings are not strictly increasing in time.
    pub fn between(last: &MeterReading, current: &MeterReading) -> Option<Self> {
        let seconds = (current.ts - last.ts).as_seconds_f64();
        if seconds <= 0.0 {
            return None;
        }
        let energy_kwh = current.kwh - last.kwh;
        Some(Self {
            meter_component_id: current.meter_component_id,
            start: last.ts,
            end: current.ts,
            energy_kwh,
            power_w: energy_kwh * 1000.0 / (seconds / 3600.0),
        })
    }

    pub fn minutes(&self) -> f64 {
        (self.end - self.start).as_seconds_f64() / 60.0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClassifiedInterval {
    pub interval: Interval,
    pub phase: Phase,
    /// Date the interval counts toward in the daily totals.
    pub report_date: Date,
    /// Programmed brightness; only looked up at night.
    pub calendar_percent: Option<f64>,
    pub expected_w: f64,
    pub anomaly: Option<AnomalyKind>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    /// First usable reading of a meter; nothing to classify yet.
    Primed,
    Dropped(DropReason),
    Classified(ClassifiedInterval),
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DayTotals {
    pub interval_count: u32,
    pub on_time_minutes: f64,
    pub energy_kwh: f64,
    pub power_sum_w: f64,
}

impl DayTotals {
    fn add(&mut self, interval: &Interval) {
        self.interval_count += 1;
        self.on_time_minutes += interval.minutes();
        self.energy_kwh += interval.energy_kwh;
        self.power_sum_w += interval.power_w;
    }

    pub fn mean_power_w(&self) -> f64 {
        if self.interval_count == 0 {
            0.0
        } else {
            self.power_sum_w / f64::from(self.interval_count)
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClassifierStats {
    pub readings: u64,
    pub classified: u64,
    pub day: u64,
    pub night: u64,
    pub twilight: u64,
    pub dropped: BTreeMap<DropReason, u64>,
    pub anomalies: BTreeMap<AnomalyKind, u64>,
}

/// Judge one interval from its power and the sun/calendar inputs.
///
/// Pure: the verdict depends only on the arguments, never on what was
/// classified before.
pub fn judge(
    interval: &Interval,
    nominal_w: f64,
    settings: &ClassifierSettings,
    sun: &SunTable,
    calendar: &DimmingCalendar,
) -> Result<ClassifiedInterval, SunTimeError> {
    let t = &settings.thresholds;
    let local = interval.end.to_offset(settings.utc_offset);
    let local_date = local.date();
    let calendar_date = if local.time() < CALENDAR_DAY_PIVOT {
        local_date.previous_day().unwrap_or(local_date)
    } else {
        local_date
    };
    let shape = calendar.shape(calendar_date.weekday().number_days_from_sunday());

    let phase = phase_at(interval.end, shape, sun.get(local_date)?, t);
    let power = interval.power_w;

    let (report_date, calendar_percent, expected_w, anomaly) = match phase {
        Phase::Day => {
            let burning = power > nominal_w * t.nominal_wattage_ratio + t.energy_threshold_w
                && power < t.dayburner_ceiling_ratio * nominal_w;
            (local_date, None, 0.0, burning.then_some(AnomalyKind::Dayburner))
        }
        Phase::Night => {
            let calendar_midnight = calendar_date.with_time(Time::MIDNIGHT).assume_offset(settings.utc_offset);
            let minute = (local - calendar_midnight).whole_minutes();
            let percent = shape.lookup(minute).percent;
            let ratio = percent / 100.0;
            let anomaly = if power < nominal_w * (ratio - t.night_tolerance_ratio) {
                Some(AnomalyKind::NightOutage)
            } else if power > nominal_w * t.above_nominal_ratio {
                Some(AnomalyKind::AboveNominal)
            } else if power > nominal_w * (ratio + t.night_tolerance_ratio) {
                Some(AnomalyKind::NightNotDimming)
            } else {
                None
            };
            (calendar_date, Some(percent), nominal_w * ratio, anomaly)
        }
        Phase::Twilight => (local_date, None, 0.0, None),
    };

    Ok(ClassifiedInterval {
        interval: interval.clone(),
        phase,
        report_date,
        calendar_percent,
        expected_w,
        anomaly,
    })
}

fn phase_at(t: OffsetDateTime, shape: &DimmingShape, sun: SunTimes, th: &Thresholds) -> Phase {
    let sunrise = sun.sunrise + Duration::minutes(shape.sunrise_offset_minutes);
    let sunset = sun.sunset + Duration::minutes(shape.sunset_offset_minutes);
    let rise_buffer = Duration::minutes(th.sunrise_buffer_minutes);
    let set_buffer = Duration::minutes(th.sunset_buffer_minutes);

    if t >= sunrise + rise_buffer && t <= sunset - set_buffer {
        Phase::Day
    } else if t < sunrise - rise_buffer || t > sunset + set_buffer {
        Phase::Night
    } else {
        Phase::Twilight
    }
}

/// Per-asset state machine over readings ordered by meter and time.
pub struct IntervalClassifier<'a> {
    settings: &'a ClassifierSettings,
    sun: &'a SunTable,
    calendar: &'a DimmingCalendar,
    nominal_w: f64,
    valid_from: Date,
    last: Option<MeterReading>,
    daily: BTreeMap<(Date, AnomalyKind), DayTotals>,
    stats: ClassifierStats,
}

impl<'a> IntervalClassifier<'a> {
    pub fn new(
        settings: &'a ClassifierSettings,
        sun: &'a SunTable,
        calendar: &'a DimmingCalendar,
        nominal_w: f64,
        commissioning_date: Date,
    ) -> Self {
        let valid_from = commissioning_date
            .checked_add(Duration::days(i64::from(settings.commissioning_grace_days)))
            .unwrap_or(commissioning_date);
        Self {
            settings,
            sun,
            calendar,
            nominal_w,
            valid_from,
            last: None,
            daily: BTreeMap::new(),
            stats: ClassifierStats::default(),
        }
    }

    pub fn push(&mut self, reading: MeterReading) -> Result<Step, SunTimeError> {
        self.stats.readings += 1;

        if reading.ts.to_offset(self.settings.utc_offset).date() < self.valid_from {
            return Ok(self.drop_with(DropReason::BeforeCommissioning));
        }

        let last = match self.last.take() {
            Some(last) if last.meter_component_id == reading.meter_component_id => last,
            _ => {
                self.last = Some(reading);
                return Ok(Step::Primed);
            }
        };

        if reading.ts < last.ts {
            self.last = Some(last);
            return Ok(self.drop_with(DropReason::OutOfOrder));
        }

        let interval = Interval::between(&last, &reading);
        self.last = Some(reading);

        let Some(interval) = interval else {
            return Ok(self.drop_with(DropReason::ZeroLength));
        };
        if interval.energy_kwh < 0.0 {
            return Ok(self.drop_with(DropReason::NegativeEnergy));
        }
        if let Some(max) = self.settings.thresholds.max_interval_minutes {
            if interval.minutes() > max {
                return Ok(self.drop_with(DropReason::Gap));
            }
        }

        let classified = judge(&interval, self.nominal_w, self.settings, self.sun, self.calendar)?;
        self.stats.classified += 1;
        match classified.phase {
            Phase::Day => self.stats.day += 1,
            Phase::Night => self.stats.night += 1,
            Phase::Twilight => self.stats.twilight += 1,
        }
        if let Some(kind) = classified.anomaly {
            *self.stats.anomalies.entry(kind).or_default() += 1;
            self.daily
                .entry((classified.report_date, kind))
                .or_default()
                .add(&classified.interval);
        }

        Ok(Step::Classified(classified))
    }

    fn drop_with(&mut self, reason: DropReason) -> Step {
        *self.stats.dropped.entry(reason).or_default() += 1;
        Step::Dropped(reason)
    }

    /// Daily totals whose on-time exceeds the configured minimum, with run stats.
    pub fn finish(self) -> (Vec<(Date, AnomalyKind, DayTotals)>, ClassifierStats) {
        let min_on_time = self.settings.thresholds.min_on_time_minutes;
        let daily = self
            .daily
            .into_iter()
            .filter(|(_, totals)| totals.on_time_minutes > min_on_time)
            .map(|((date, kind), totals)| (date, kind, totals))
            .collect();
        (daily, self.stats)
    }
}
