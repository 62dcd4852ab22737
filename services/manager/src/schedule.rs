//! Work window gating.

use ankadepth_proto::WorkSchedule;
use chrono::{Datelike, NaiveDateTime, NaiveTime, Weekday};

/// Whether the schedule allows handing out work at local time `now`.
///
/// A window whose stop time is not after its start time wraps past midnight.
pub fn permits(schedule: &WorkSchedule, now: NaiveDateTime) -> bool {
    if !schedule.enabled {
        return true;
    }
    match now.weekday() {
        Weekday::Sat if schedule.full_day_saturday => return true,
        Weekday::Sun if schedule.full_day_sunday => return true,
        _ => {}
    }
    in_window(schedule.start, schedule.stop, now.time())
}

fn in_window(start: NaiveTime, stop: NaiveTime, time: NaiveTime) -> bool {
    if start < stop {
        start <= time && time < stop
    } else {
        time >= start || time < stop
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use rstest::rstest;

    fn hms(h: u32, m: u32, s: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, s).unwrap()
    }

    // 2019-06-12 was a Wednesday.
    fn at(day: u32, time: NaiveTime) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2019, 6, day).unwrap().and_time(time)
    }

    fn schedule(start: NaiveTime, stop: NaiveTime) -> WorkSchedule {
        WorkSchedule {
            enabled: true,
            full_day_saturday: false,
            full_day_sunday: false,
            start,
            stop,
        }
    }

    #[test]
    fn test_disabled_always_permits() {
        let schedule = WorkSchedule {
            enabled: false,
            ..schedule(hms(9, 0, 0), hms(10, 0, 0))
        };
        assert!(permits(&schedule, at(12, hms(3, 0, 0))));
    }

    #[rstest]
    #[case(hms(8, 59, 59), false)]
    #[case(hms(9, 0, 0), true)]
    #[case(hms(16, 59, 59), true)]
    #[case(hms(17, 0, 0), false)]
    fn test_day_window(#[case] time: NaiveTime, #[case] expected: bool) {
        assert_eq!(permits(&schedule(hms(9, 0, 0), hms(17, 0, 0)), at(12, time)), expected);
    }

    #[rstest]
    #[case(hms(19, 59, 59), false)]
    #[case(hms(20, 0, 0), true)]
    #[case(hms(23, 59, 59), true)]
    #[case(hms(0, 0, 0), true)]
    #[case(hms(5, 59, 59), true)]
    #[case(hms(6, 0, 0), false)]
    #[case(hms(12, 0, 0), false)]
    fn test_overnight_window(#[case] time: NaiveTime, #[case] expected: bool) {
        assert_eq!(permits(&schedule(hms(20, 0, 0), hms(6, 0, 0)), at(12, time)), expected);
    }

    #[test]
    fn test_equal_bounds_cover_the_whole_day() {
        let schedule = schedule(hms(8, 0, 0), hms(8, 0, 0));
        assert!(permits(&schedule, at(12, hms(8, 0, 0))));
        assert!(permits(&schedule, at(12, hms(7, 59, 59))));
    }

    #[rstest]
    // Saturday 2019-06-15, Sunday 2019-06-16.
    #[case(15, true, false, true)]
    #[case(15, false, true, false)]
    #[case(16, false, true, true)]
    #[case(16, true, false, false)]
    fn test_weekends(
        #[case] day: u32,
        #[case] saturday: bool,
        #[case] sunday: bool,
        #[case] expected: bool,
    ) {
        let schedule = WorkSchedule {
            full_day_saturday: saturday,
            full_day_sunday: sunday,
            ..schedule(hms(9, 0, 0), hms(10, 0, 0))
        };
        assert_eq!(permits(&schedule, at(day, hms(13, 0, 0))), expected);
    }
}
