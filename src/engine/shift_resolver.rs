use chrono::{NaiveDate, NaiveDateTime, Timelike};

use crate::model::shift::Shift;

/// Calendar date a punch is attributed to.
///
/// Night shifts spill past midnight: a punch in the early hours still
/// belongs to the previous day as long as it falls within `buffer_hours`
/// after the shift's end. Day shifts always attribute to the punch's own
/// date. Pure and deterministic: the aggregator keys records by this
/// result and the nightly batch must re-derive the same date on replay.
pub fn attribute_date(shift: &Shift, punched_at: NaiveDateTime, buffer_hours: u32) -> NaiveDate {
    let own = punched_at.date();
    if !shift.is_night_shift {
        return own;
    }

    // Minutes since midnight of the shift's *own* day. An end at or
    // before the start means the shift crosses midnight, so its end sits
    // in the next day's early hours.
    let start_min = minutes(shift.start_time.hour(), shift.start_time.minute());
    let mut end_min = minutes(shift.end_time.hour(), shift.end_time.minute());
    if end_min <= start_min {
        end_min += 24 * 60;
    }
    let window_end = end_min + (buffer_hours * 60) as i64;

    // Viewed from the previous day, this punch sits at 24h + its own
    // wall-clock offset. Inside the spill window it belongs back there.
    let punch_min = 24 * 60 + minutes(punched_at.hour(), punched_at.minute());
    if punch_min <= window_end {
        own.pred_opt().unwrap_or(own)
    } else {
        own
    }
}

fn minutes(h: u32, m: u32) -> i64 {
    (h * 60 + m) as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, NaiveTime};

    fn night_shift(start: (u32, u32), end: (u32, u32)) -> Shift {
        Shift {
            id: 1,
            org_id: 1,
            name: "Night".into(),
            start_time: NaiveTime::from_hms_opt(start.0, start.1, 0).unwrap(),
            end_time: NaiveTime::from_hms_opt(end.0, end.1, 0).unwrap(),
            break_minutes: 30,
            grace_minutes: 15,
            half_day_hours: 4.0,
            full_day_hours: 8.0,
            is_night_shift: true,
            weekly_off_days: "sun".into(),
            overtime_multiplier: 1.5,
            night_overtime_multiplier: 2.0,
            holiday_worked_multiplier: 2.0,
            weekoff_worked_multiplier: 1.5,
        }
    }

    fn dt(d: u32, h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 8, d)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    #[test]
    fn late_evening_end_rolls_early_punch_back() {
        // Shift 15:00-23:00, buffer 4h: spill window reaches 03:00.
        let s = night_shift((15, 0), (23, 0));
        assert_eq!(
            attribute_date(&s, dt(2, 1, 30), 4),
            NaiveDate::from_ymd_opt(2026, 8, 1).unwrap()
        );
    }

    #[test]
    fn early_end_exceeds_buffer_keeps_own_date() {
        // Shift ending 14:00: 01:30 next day is far outside the window.
        let s = night_shift((6, 0), (14, 0));
        assert_eq!(
            attribute_date(&s, dt(2, 1, 30), 4),
            NaiveDate::from_ymd_opt(2026, 8, 2).unwrap()
        );
    }

    #[test]
    fn midnight_crossing_shift_attributes_post_midnight_punches_back() {
        // 18:00-02:00 crosses midnight; window reaches 06:00.
        let s = night_shift((18, 0), (2, 0));
        assert_eq!(attribute_date(&s, dt(2, 1, 30), 4), dt(1, 0, 0).date());
        assert_eq!(attribute_date(&s, dt(2, 5, 59), 4), dt(1, 0, 0).date());
        assert_eq!(attribute_date(&s, dt(2, 6, 1), 4), dt(2, 0, 0).date());
    }

    #[test]
    fn evening_punches_keep_their_own_date() {
        let s = night_shift((18, 0), (2, 0));
        assert_eq!(attribute_date(&s, dt(1, 18, 5), 4), dt(1, 0, 0).date());
        assert_eq!(attribute_date(&s, dt(1, 23, 59), 4), dt(1, 0, 0).date());
    }

    #[test]
    fn day_shift_never_rolls_over() {
        let mut s = night_shift((9, 0), (18, 0));
        s.is_night_shift = false;
        assert_eq!(attribute_date(&s, dt(2, 1, 30), 4), dt(2, 0, 0).date());
    }

    #[test]
    fn same_inputs_same_output() {
        let s = night_shift((18, 0), (2, 0));
        let a = attribute_date(&s, dt(2, 3, 15), 4);
        let b = attribute_date(&s, dt(2, 3, 15), 4);
        assert_eq!(a, b);
    }
}
