use chrono::{NaiveTime, Weekday};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Named work schedule owned by an organization. Changes apply
/// prospectively; closed periods keep the values they were derived with.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow, ToSchema)]
pub struct Shift {
    #[schema(example = 1)]
    pub id: u64,
    #[schema(example = 10)]
    pub org_id: u64,
    #[schema(example = "General")]
    pub name: String,
    #[schema(value_type = String, example = "09:00:00")]
    pub start_time: NaiveTime,
    #[schema(value_type = String, example = "18:00:00")]
    pub end_time: NaiveTime,
    #[schema(example = 60)]
    pub break_minutes: u32,
    /// Minutes after `start_time` still counted as on-time.
    #[schema(example = 15)]
    pub grace_minutes: u32,
    /// Net hours below this mark the day half-day.
    #[schema(example = 4.0)]
    pub half_day_hours: f64,
    /// Net hours above this count as overtime.
    #[schema(example = 8.0)]
    pub full_day_hours: f64,
    pub is_night_shift: bool,
    /// Comma-separated weekday names or ISO numbers (Monday=1),
    /// e.g. "sat,sun" or "6,7".
    #[schema(example = "sat,sun")]
    pub weekly_off_days: String,
    #[schema(example = 1.5)]
    pub overtime_multiplier: f64,
    /// Night shifts pay overtime at a distinct, usually higher, rate.
    #[schema(example = 2.0)]
    pub night_overtime_multiplier: f64,
    #[schema(example = 2.0)]
    pub holiday_worked_multiplier: f64,
    #[schema(example = 1.5)]
    pub weekoff_worked_multiplier: f64,
}

impl Shift {
    /// Accepts both weekday names ("sat,sun") and ISO weekday numbers
    /// ("6,7", Monday=1) since imported rosters use either form.
    pub fn is_weekly_off(&self, day: Weekday) -> bool {
        let name = weekday_token(day);
        let number = (day.number_from_monday()).to_string();
        self.weekly_off_days.split(',').any(|d| {
            let d = d.trim();
            d.eq_ignore_ascii_case(name) || d == number
        })
    }

    pub fn effective_overtime_multiplier(&self) -> f64 {
        if self.is_night_shift {
            self.night_overtime_multiplier
        } else {
            self.overtime_multiplier
        }
    }
}

fn weekday_token(day: Weekday) -> &'static str {
    match day {
        Weekday::Mon => "mon",
        Weekday::Tue => "tue",
        Weekday::Wed => "wed",
        Weekday::Thu => "thu",
        Weekday::Fri => "fri",
        Weekday::Sat => "sat",
        Weekday::Sun => "sun",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveTime;

    fn shift(days: &str) -> Shift {
        Shift {
            id: 1,
            org_id: 1,
            name: "General".into(),
            start_time: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            end_time: NaiveTime::from_hms_opt(18, 0, 0).unwrap(),
            break_minutes: 60,
            grace_minutes: 15,
            half_day_hours: 4.0,
            full_day_hours: 8.0,
            is_night_shift: false,
            weekly_off_days: days.into(),
            overtime_multiplier: 1.5,
            night_overtime_multiplier: 2.0,
            holiday_worked_multiplier: 2.0,
            weekoff_worked_multiplier: 1.5,
        }
    }

    #[test]
    fn weekly_off_parses_comma_list() {
        let s = shift("sat, sun");
        assert!(s.is_weekly_off(Weekday::Sat));
        assert!(s.is_weekly_off(Weekday::Sun));
        assert!(!s.is_weekly_off(Weekday::Mon));
    }

    #[test]
    fn weekly_off_accepts_iso_weekday_numbers() {
        let s = shift("6,7");
        assert!(s.is_weekly_off(Weekday::Sat));
        assert!(s.is_weekly_off(Weekday::Sun));
        assert!(!s.is_weekly_off(Weekday::Fri));
    }

    #[test]
    fn weekly_off_empty_set() {
        let s = shift("");
        assert!(!s.is_weekly_off(Weekday::Sun));
    }

    #[test]
    fn night_shift_uses_night_overtime_rate() {
        let mut s = shift("sun");
        assert_eq!(s.effective_overtime_multiplier(), 1.5);
        s.is_night_shift = true;
        assert_eq!(s.effective_overtime_multiplier(), 2.0);
    }
}
