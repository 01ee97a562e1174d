//! Background load of a resource depending on local time.

use serde::{Deserialize, Serialize};

const PEAK_START_HOUR: f64 = 9.;
const PEAK_END_HOUR: f64 = 17.;

/// Calendar describing the background load of a resource.
///
/// Simulation time is measured in seconds, time 0 is midnight GMT of a Monday. Local time is
/// obtained by adding the time zone offset. Weekdays are numbered from 0 (Monday) to 6 (Sunday),
/// holidays are given as day numbers since the simulation start.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResourceCalendar {
    pub time_zone: f64,
    pub peak_load: f64,
    pub off_peak_load: f64,
    pub holiday_load: f64,
    pub weekends: Vec<u32>,
    pub holidays: Vec<u32>,
}

impl ResourceCalendar {
    pub fn new(time_zone: f64, peak_load: f64, off_peak_load: f64, holiday_load: f64) -> Self {
        Self {
            time_zone,
            peak_load: clamp_load(peak_load),
            off_peak_load: clamp_load(off_peak_load),
            holiday_load: clamp_load(holiday_load),
            weekends: vec![5, 6],
            holidays: Vec::new(),
        }
    }

    /// Calendar of a dedicated resource without background load.
    pub fn idle(time_zone: f64) -> Self {
        Self::new(time_zone, 0., 0., 0.)
    }

    pub fn with_weekends(mut self, weekends: Vec<u32>) -> Self {
        self.weekends = weekends;
        self
    }

    pub fn with_holidays(mut self, holidays: Vec<u32>) -> Self {
        self.holidays = holidays;
        self
    }

    /// Local day number since the simulation start (may be negative for western time zones).
    pub fn local_day(&self, time: f64) -> i64 {
        (self.local_hours(time) / 24.).floor() as i64
    }

    /// Local hour of the day in `[0, 24)`.
    pub fn local_hour(&self, time: f64) -> f64 {
        self.local_hours(time).rem_euclid(24.)
    }

    fn local_hours(&self, time: f64) -> f64 {
        time / 3600. + self.time_zone
    }

    pub fn is_holiday(&self, time: f64) -> bool {
        let day = self.local_day(time);
        let weekday = day.rem_euclid(7) as u32;
        self.weekends.contains(&weekday) || (day >= 0 && self.holidays.contains(&(day as u32)))
    }

    /// Background load in `[0, 1]` at the given simulation time.
    pub fn current_load(&self, time: f64) -> f64 {
        if self.is_holiday(time) {
            return self.holiday_load;
        }
        let hour = self.local_hour(time);
        if (PEAK_START_HOUR..PEAK_END_HOUR).contains(&hour) {
            self.peak_load
        } else {
            self.off_peak_load
        }
    }
}

fn clamp_load(load: f64) -> f64 {
    load.clamp(0., 1.)
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOUR: f64 = 3600.;
    const DAY: f64 = 24. * HOUR;

    #[test]
    fn load_follows_local_time() {
        let calendar = ResourceCalendar::new(0., 0.5, 0.1, 0.05);
        assert_eq!(calendar.current_load(3. * HOUR), 0.1);
        assert_eq!(calendar.current_load(10. * HOUR), 0.5);
        assert_eq!(calendar.current_load(17. * HOUR), 0.1);
        // saturday
        assert_eq!(calendar.current_load(5. * DAY + 10. * HOUR), 0.05);
    }

    #[test]
    fn time_zone_shifts_peak_hours() {
        let calendar = ResourceCalendar::new(9., 0.5, 0.1, 0.05);
        assert_eq!(calendar.local_hour(0.), 9.);
        assert_eq!(calendar.current_load(0.), 0.5);
        let west = ResourceCalendar::new(-5., 0.5, 0.1, 0.05);
        // sunday evening locally
        assert_eq!(west.local_day(0.), -1);
        assert_eq!(west.current_load(0.), 0.05);
    }

    #[test]
    fn holidays_and_clamping() {
        let calendar = ResourceCalendar::new(0., 1.5, -1., 0.3).with_holidays(vec![2]);
        assert_eq!(calendar.peak_load, 1.);
        assert_eq!(calendar.off_peak_load, 0.);
        assert!(calendar.is_holiday(2. * DAY + HOUR));
        assert!(!calendar.is_holiday(DAY + HOUR));
    }
}
