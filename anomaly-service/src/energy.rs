//! Day-level checks over the cumulative readings: consumption that jumps
//! above a rolling window of previous days, and the wattage a light actually
//! draws judged from daily energy over the hours of darkness.

use std::collections::VecDeque;

use streetlight_client::domain::MeterReading;
use time::{Date, UtcOffset};

use crate::{
    config::Thresholds,
    suntime::{SunTable, SunTimeError},
};

const HOURS_PER_DAY: f64 = 24.0;

/// Consumption of one meter attributed to one local date.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DailyEnergy {
    pub meter_component_id: i64,
    pub date: Date,
    pub kwh: f64,
}

/// Turns ordered readings into daily consumption.
///
/// The first reading of each local date anchors that date. When the next date
/// shows up, the energy since the anchor is spread evenly over the days in
/// between and attributed to the anchor date.
#[derive(Debug, Clone)]
pub struct DailyEnergyTracker {
    utc_offset: UtcOffset,
    anchor: Option<(i64, Date, f64)>,
}

impl DailyEnergyTracker {
    pub fn new(utc_offset: UtcOffset) -> Self {
        Self {
            utc_offset,
            anchor: None,
        }
    }

    pub fn push(&mut self, reading: &MeterReading) -> Option<DailyEnergy> {
        let date = reading.ts.to_offset(self.utc_offset).date();
        let meter = reading.meter_component_id;

        let (anchor_meter, anchor_date, anchor_kwh) = match self.anchor {
            Some(anchor) if anchor.0 == meter => anchor,
            _ => {
                self.anchor = Some((meter, date, reading.kwh));
                return None;
            }
        };
        if date <= anchor_date {
            return None;
        }

        self.anchor = Some((meter, date, reading.kwh));
        let days = (date - anchor_date).whole_days();
        let kwh = (reading.kwh - anchor_kwh) / days as f64;
        // Meter reset or replacement.
        if kwh < 0.0 {
            return None;
        }
        Some(DailyEnergy {
            meter_component_id: anchor_meter,
            date: anchor_date,
            kwh,
        })
    }
}

/// A day whose consumption stands out against the window before it.
#[derive(Debug, Clone, PartialEq)]
pub struct EnergyDeviation {
    pub meter_component_id: i64,
    pub date: Date,
    pub daily_kwh: f64,
    pub window_mean_kwh: f64,
    pub window_std_kwh: f64,
    /// `None` when the window has no spread at all.
    pub num_std: Option<f64>,
}

/// Rolling window of the previous `rolling_window_days` daily consumptions.
///
/// A day is only judged once the window is full. It is flagged when it
/// exceeds the window mean by more than `deviation_min_excess_kwh` and by more
/// than `deviation_num_std` sample standard deviations; a window without
/// spread only needs the excess. Flagged days still enter the window.
#[derive(Debug, Clone)]
pub struct RollingDeviation {
    window_days: usize,
    min_num_std: f64,
    min_excess_kwh: f64,
    meter: Option<i64>,
    window: VecDeque<f64>,
}

impl RollingDeviation {
    pub fn new(thresholds: &Thresholds) -> Self {
        let window_days = thresholds.rolling_window_days.max(2);
        Self {
            window_days,
            min_num_std: thresholds.deviation_num_std,
            min_excess_kwh: thresholds.deviation_min_excess_kwh,
            meter: None,
            window: VecDeque::with_capacity(window_days + 1),
        }
    }

    pub fn push(&mut self, day: &DailyEnergy) -> Option<EnergyDeviation> {
        if self.meter != Some(day.meter_component_id) {
            self.meter = Some(day.meter_component_id);
            self.window.clear();
        }

        let verdict = if self.window.len() == self.window_days {
            self.judge(day)
        } else {
            None
        };

        if self.window.len() == self.window_days {
            self.window.pop_front();
        }
        self.window.push_back(day.kwh);
        verdict
    }

    fn judge(&self, day: &DailyEnergy) -> Option<EnergyDeviation> {
        let n = self.window.len() as f64;
        let mean = self.window.iter().sum::<f64>() / n;
        let variance = self.window.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (n - 1.0);
        let std = variance.sqrt();

        let excess = day.kwh - mean;
        let num_std = (std > 0.0).then(|| excess / std);
        let flagged = excess > self.min_excess_kwh && num_std.map_or(true, |k| k > self.min_num_std);

        flagged.then(|| EnergyDeviation {
            meter_component_id: day.meter_component_id,
            date: day.date,
            daily_kwh: day.kwh,
            window_mean_kwh: mean,
            window_std_kwh: std,
            num_std,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WattageEstimate {
    pub actual_wattage_w: f64,
    pub days: u32,
}

/// Mean over days of `daily kWh / hours of darkness`, in watts.
///
/// Days that drew nothing are left out of the mean.
#[derive(Debug, Clone)]
pub struct ActualWattageEstimator<'a> {
    sun: &'a SunTable,
    sum_w: f64,
    days: u32,
}

impl<'a> ActualWattageEstimator<'a> {
    pub fn new(sun: &'a SunTable) -> Self {
        Self {
            sun,
            sum_w: 0.0,
            days: 0,
        }
    }

    pub fn push(&mut self, day: &DailyEnergy) -> Result<(), SunTimeError> {
        let daylight_hours = self.sun.get(day.date)?.daylight().as_seconds_f64() / 3600.0;
        let night_hours = HOURS_PER_DAY - daylight_hours;
        if night_hours <= 0.0 {
            return Ok(());
        }

        let watts = day.kwh / night_hours * 1000.0;
        if watts != 0.0 {
            self.sum_w += watts;
            self.days += 1;
        }
        Ok(())
    }

    pub fn finish(&self) -> Option<WattageEstimate> {
        (self.days > 0).then(|| WattageEstimate {
            actual_wattage_w: self.sum_w / f64::from(self.days),
            days: self.days,
        })
    }
}

/// Both day-level checks fed from one reading stream.
pub struct EnergyProfile<'a> {
    tracker: DailyEnergyTracker,
    rolling: RollingDeviation,
    wattage: ActualWattageEstimator<'a>,
    deviations: Vec<EnergyDeviation>,
}

impl<'a> EnergyProfile<'a> {
    pub fn new(thresholds: &Thresholds, utc_offset: UtcOffset, sun: &'a SunTable) -> Self {
        Self {
            tracker: DailyEnergyTracker::new(utc_offset),
            rolling: RollingDeviation::new(thresholds),
            wattage: ActualWattageEstimator::new(sun),
            deviations: Vec::new(),
        }
    }

    pub fn push(&mut self, reading: &MeterReading) -> Result<(), SunTimeError> {
        let Some(day) = self.tracker.push(reading) else {
            return Ok(());
        };
        self.wattage.push(&day)?;
        if let Some(deviation) = self.rolling.push(&day) {
            self.deviations.push(deviation);
        }
        Ok(())
    }

    pub fn finish(self) -> (Vec<EnergyDeviation>, Option<WattageEstimate>) {
        let estimate = self.wattage.finish();
        (self.deviations, estimate)
    }
}
