use chrono::{Duration, NaiveDateTime};

use crate::model::daily::AttendanceStatus;
use crate::model::punch::{PunchLite, PunchType};
use crate::model::request::RequestType;
use crate::model::shift::Shift;

/// Approved leave-family request covering the day.
#[derive(Debug, Clone, PartialEq)]
pub struct LeaveFact {
    pub request_id: String,
    pub request_type: RequestType,
    pub leave_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HolidayFact {
    pub name: String,
    pub worked_multiplier: f64,
}

/// Everything the derivation needs besides the punches themselves.
/// `day_closed` is false while folding online punches and true during
/// the nightly pass; "absent" and "missed punch" are only ever assigned
/// once the day has closed.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DayFacts {
    pub holiday: Option<HolidayFact>,
    pub weekly_off: bool,
    pub approved_leave: Option<LeaveFact>,
    pub day_closed: bool,
}

/// Pure derivation output. Equality of two derivations from the same
/// inputs is what makes the nightly batch a no-op on unchanged days.
#[derive(Debug, Clone, PartialEq)]
pub struct DerivedDay {
    pub first_in: Option<NaiveDateTime>,
    pub last_out: Option<NaiveDateTime>,
    pub total_work_hours: f64,
    pub net_work_hours: f64,
    pub break_hours: f64,
    pub overtime_hours: f64,
    pub status: AttendanceStatus,
    pub is_late: bool,
    pub is_half_day: bool,
    pub is_overtime: bool,
    /// Rate the overtime hours pay at; 1.0 when there is no overtime.
    pub overtime_multiplier: f64,
    pub payout_multiplier: f64,
    pub punch_ids: Vec<u64>,
    pub source_request_id: Option<String>,
}

/// Fold one day's punches plus reference facts into the canonical
/// record. Pure function of its inputs: punches are sorted by timestamp
/// first, so arrival order never changes the result, and re-running the
/// derivation on unchanged inputs yields an identical value.
///
/// Day-type precedence, highest first: approved leave, explicit punches,
/// holiday, weekly off, absent. Worked holidays and week-offs upgrade to
/// their `*_worked` statuses with the corresponding payout multiplier.
///
/// Returns None when there is nothing to record yet (no punches, no
/// applicable day type, day still open).
pub fn derive_day(shift: &Shift, punches: &[PunchLite], facts: &DayFacts) -> Option<DerivedDay> {
    let mut sorted: Vec<PunchLite> = punches.to_vec();
    sorted.sort_by_key(|p| (p.at, p.id));

    let punch_ids: Vec<u64> = sorted.iter().map(|p| p.id).collect();
    let fold = fold_punches(&sorted);

    let mut total = 0.0;
    let mut break_hours = 0.0;
    let mut net = 0.0;
    let mut overtime = 0.0;
    let mut is_late = false;
    let mut is_half_day = false;
    let mut is_overtime = false;

    if let Some(first_in) = fold.first_in {
        let scheduled = shift.start_time + Duration::minutes(shift.grace_minutes as i64);
        is_late = first_in.time() > scheduled;
    }

    if let (Some(first_in), Some(last_out)) = (fold.first_in, fold.last_out) {
        if last_out >= first_in {
            total = hours_between(first_in, last_out);
            break_hours = if fold.explicit_break_hours > 0.0 {
                fold.explicit_break_hours
            } else {
                shift.break_minutes as f64 / 60.0
            };
            break_hours = round2(break_hours.min(total));
            net = round2((total - break_hours).max(0.0));
            total = round2(total);

            is_half_day = net < shift.half_day_hours;
            if net > shift.full_day_hours {
                overtime = round2(net - shift.full_day_hours);
                is_overtime = true;
            }
        }
    }

    let has_punches = !sorted.is_empty();

    let (status, multiplier, source_request_id) = if let Some(leave) = &facts.approved_leave {
        let status = match leave.request_type {
            RequestType::WorkFromHome => AttendanceStatus::WorkFromHome,
            RequestType::OnDuty => AttendanceStatus::OnDuty,
            _ => AttendanceStatus::OnLeave,
        };
        (status, 1.0, Some(leave.request_id.clone()))
    } else if has_punches {
        if let Some(h) = &facts.holiday {
            (AttendanceStatus::HolidayWorked, h.worked_multiplier, None)
        } else if facts.weekly_off {
            (
                AttendanceStatus::WeekOffWorked,
                shift.weekoff_worked_multiplier,
                None,
            )
        } else if facts.day_closed && (fold.first_in.is_none() || fold.last_out.is_none()) {
            (AttendanceStatus::MissedPunch, 1.0, None)
        } else if fold.last_out.is_some() && is_half_day {
            (AttendanceStatus::HalfDay, 1.0, None)
        } else if is_late {
            (AttendanceStatus::Late, 1.0, None)
        } else {
            (AttendanceStatus::Present, 1.0, None)
        }
    } else if facts.holiday.is_some() {
        (AttendanceStatus::Holiday, 1.0, None)
    } else if facts.weekly_off {
        (AttendanceStatus::WeekOff, 1.0, None)
    } else if facts.day_closed {
        (AttendanceStatus::Absent, 1.0, None)
    } else {
        return None;
    };

    Some(DerivedDay {
        first_in: fold.first_in,
        last_out: fold.last_out,
        total_work_hours: total,
        net_work_hours: net,
        break_hours,
        overtime_hours: overtime,
        status,
        is_late,
        is_half_day,
        is_overtime,
        overtime_multiplier: if is_overtime {
            shift.effective_overtime_multiplier()
        } else {
            1.0
        },
        payout_multiplier: multiplier,
        punch_ids,
        source_request_id,
    })
}

struct PunchFold {
    first_in: Option<NaiveDateTime>,
    last_out: Option<NaiveDateTime>,
    explicit_break_hours: f64,
}

/// First-in is the earliest inbound punch, last-out the latest outbound;
/// a late-arriving but earlier-timestamped punch can still move first-in
/// earlier because the caller always refolds the whole day.
fn fold_punches(sorted: &[PunchLite]) -> PunchFold {
    let mut first_in = None;
    let mut last_out = None;
    let mut break_secs = 0i64;
    let mut open_break: Option<NaiveDateTime> = None;

    for p in sorted {
        match p.punch_type.canonical() {
            PunchType::In => {
                if first_in.is_none_or(|cur| p.at < cur) {
                    first_in = Some(p.at);
                }
            }
            PunchType::Out => {
                if last_out.is_none_or(|cur| p.at > cur) {
                    last_out = Some(p.at);
                }
            }
            PunchType::BreakStart => {
                // A dangling break-start is superseded by the next one.
                open_break = Some(p.at);
            }
            PunchType::BreakEnd => {
                if let Some(start) = open_break.take() {
                    break_secs += (p.at - start).num_seconds().max(0);
                }
            }
            _ => {}
        }
    }

    PunchFold {
        first_in,
        last_out,
        explicit_break_hours: break_secs as f64 / 3600.0,
    }
}

fn hours_between(a: NaiveDateTime, b: NaiveDateTime) -> f64 {
    (b - a).num_seconds() as f64 / 3600.0
}

fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, NaiveDateTime, NaiveTime};

    fn shift() -> Shift {
        Shift {
            id: 7,
            org_id: 1,
            name: "General".into(),
            start_time: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            end_time: NaiveTime::from_hms_opt(18, 0, 0).unwrap(),
            break_minutes: 60,
            grace_minutes: 15,
            half_day_hours: 4.0,
            full_day_hours: 8.0,
            is_night_shift: false,
            weekly_off_days: "sun".into(),
            overtime_multiplier: 1.5,
            night_overtime_multiplier: 2.0,
            holiday_worked_multiplier: 2.0,
            weekoff_worked_multiplier: 1.5,
        }
    }

    fn dt(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 8, 3)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    fn punch(id: u64, t: PunchType, h: u32, m: u32) -> PunchLite {
        PunchLite {
            id,
            punch_type: t,
            at: dt(h, m),
        }
    }

    fn closed() -> DayFacts {
        DayFacts {
            day_closed: true,
            ..DayFacts::default()
        }
    }

    #[test]
    fn hours_independent_of_arrival_order() {
        let a = [
            punch(1, PunchType::In, 9, 0),
            punch(2, PunchType::Out, 13, 0),
            punch(3, PunchType::In, 14, 0),
            punch(4, PunchType::Out, 18, 30),
        ];
        let mut b = a;
        b.reverse();

        let da = derive_day(&shift(), &a, &closed()).unwrap();
        let db = derive_day(&shift(), &b, &closed()).unwrap();
        assert_eq!(da, db);
        assert_eq!(da.first_in, Some(dt(9, 0)));
        assert_eq!(da.last_out, Some(dt(18, 30)));
        // 9.5h span minus the scheduled 1h break.
        assert_eq!(da.total_work_hours, 9.5);
        assert_eq!(da.net_work_hours, 8.5);
    }

    #[test]
    fn late_arriving_earlier_punch_moves_first_in() {
        let early = [
            punch(2, PunchType::Out, 18, 0),
            // id 5 arrived last but is the earliest in of the day
            punch(5, PunchType::In, 8, 45),
            punch(1, PunchType::In, 9, 30),
        ];
        let d = derive_day(&shift(), &early, &closed()).unwrap();
        assert_eq!(d.first_in, Some(dt(8, 45)));
        assert!(!d.is_late);
    }

    #[test]
    fn rederivation_is_identical() {
        let p = [
            punch(1, PunchType::In, 9, 5),
            punch(2, PunchType::Out, 18, 0),
        ];
        let first = derive_day(&shift(), &p, &closed()).unwrap();
        let second = derive_day(&shift(), &p, &closed()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn grace_period_boundaries() {
        // grace 15min, scheduled 09:00: 09:10 on time, 09:20 late.
        let on_time = [
            punch(1, PunchType::In, 9, 10),
            punch(2, PunchType::Out, 18, 0),
        ];
        let late = [
            punch(1, PunchType::In, 9, 20),
            punch(2, PunchType::Out, 18, 0),
        ];
        let d1 = derive_day(&shift(), &on_time, &closed()).unwrap();
        let d2 = derive_day(&shift(), &late, &closed()).unwrap();
        assert!(!d1.is_late);
        assert!(d2.is_late);
        assert_eq!(d2.status, AttendanceStatus::Late);
    }

    #[test]
    fn overtime_beyond_full_day_threshold() {
        // 10.5h span - 1h break = 9.5h net against an 8h threshold.
        let p = [
            punch(1, PunchType::In, 8, 0),
            punch(2, PunchType::Out, 18, 30),
        ];
        let d = derive_day(&shift(), &p, &closed()).unwrap();
        assert_eq!(d.net_work_hours, 9.5);
        assert!(d.is_overtime);
        assert_eq!(d.overtime_hours, 1.5);
        assert_eq!(d.overtime_multiplier, 1.5);
    }

    #[test]
    fn overtime_on_night_shift_pays_night_rate() {
        let mut s = shift();
        s.is_night_shift = true;
        let p = [
            punch(1, PunchType::In, 8, 0),
            punch(2, PunchType::Out, 18, 30),
        ];
        let d = derive_day(&s, &p, &closed()).unwrap();
        assert!(d.is_overtime);
        assert_eq!(d.overtime_multiplier, 2.0);

        // No overtime, no rate.
        let short = [
            punch(1, PunchType::In, 9, 0),
            punch(2, PunchType::Out, 18, 0),
        ];
        let d = derive_day(&s, &short, &closed()).unwrap();
        assert!(!d.is_overtime);
        assert_eq!(d.overtime_multiplier, 1.0);
    }

    #[test]
    fn short_day_is_half_day() {
        let p = [
            punch(1, PunchType::In, 9, 0),
            punch(2, PunchType::Out, 12, 0),
        ];
        let d = derive_day(&shift(), &p, &closed()).unwrap();
        // 3h span minus 1h scheduled break = 2h net, under the 4h mark.
        assert!(d.is_half_day);
        assert_eq!(d.status, AttendanceStatus::HalfDay);
    }

    #[test]
    fn explicit_breaks_replace_scheduled_deduction() {
        let p = [
            punch(1, PunchType::In, 9, 0),
            punch(2, PunchType::BreakStart, 13, 0),
            punch(3, PunchType::BreakEnd, 13, 30),
            punch(4, PunchType::Out, 18, 0),
        ];
        let d = derive_day(&shift(), &p, &closed()).unwrap();
        assert_eq!(d.break_hours, 0.5);
        assert_eq!(d.net_work_hours, 8.5);
    }

    #[test]
    fn missed_punch_only_after_day_close() {
        let p = [punch(1, PunchType::In, 9, 0)];
        let open = derive_day(&shift(), &p, &DayFacts::default()).unwrap();
        assert_eq!(open.status, AttendanceStatus::Present);

        let d = derive_day(&shift(), &p, &closed()).unwrap();
        assert_eq!(d.status, AttendanceStatus::MissedPunch);
    }

    #[test]
    fn absent_only_on_reconciliation() {
        assert!(derive_day(&shift(), &[], &DayFacts::default()).is_none());
        let d = derive_day(&shift(), &[], &closed()).unwrap();
        assert_eq!(d.status, AttendanceStatus::Absent);
    }

    #[test]
    fn holiday_without_punches() {
        let facts = DayFacts {
            holiday: Some(HolidayFact {
                name: "Eid".into(),
                worked_multiplier: 2.0,
            }),
            day_closed: true,
            ..DayFacts::default()
        };
        let d = derive_day(&shift(), &[], &facts).unwrap();
        assert_eq!(d.status, AttendanceStatus::Holiday);
        assert_eq!(d.payout_multiplier, 1.0);
        assert_eq!(d.total_work_hours, 0.0);
    }

    #[test]
    fn worked_holiday_overrides_day_type() {
        let facts = DayFacts {
            holiday: Some(HolidayFact {
                name: "Eid".into(),
                worked_multiplier: 2.0,
            }),
            day_closed: true,
            ..DayFacts::default()
        };
        let p = [
            punch(1, PunchType::In, 9, 0),
            punch(2, PunchType::Out, 18, 0),
        ];
        let d = derive_day(&shift(), &p, &facts).unwrap();
        assert_eq!(d.status, AttendanceStatus::HolidayWorked);
        assert_eq!(d.payout_multiplier, 2.0);
        assert_eq!(d.net_work_hours, 8.0);
    }

    #[test]
    fn worked_week_off_gets_weekoff_multiplier() {
        let facts = DayFacts {
            weekly_off: true,
            day_closed: true,
            ..DayFacts::default()
        };
        let p = [
            punch(1, PunchType::In, 9, 0),
            punch(2, PunchType::Out, 18, 0),
        ];
        let d = derive_day(&shift(), &p, &facts).unwrap();
        assert_eq!(d.status, AttendanceStatus::WeekOffWorked);
        assert_eq!(d.payout_multiplier, 1.5);
    }

    #[test]
    fn approved_leave_beats_punches_and_holiday() {
        let facts = DayFacts {
            holiday: Some(HolidayFact {
                name: "Eid".into(),
                worked_multiplier: 2.0,
            }),
            approved_leave: Some(LeaveFact {
                request_id: "req-1".into(),
                request_type: RequestType::Leave,
                leave_type: Some("sick".into()),
            }),
            day_closed: true,
            ..DayFacts::default()
        };
        let p = [
            punch(1, PunchType::In, 9, 0),
            punch(2, PunchType::Out, 12, 0),
        ];
        let d = derive_day(&shift(), &p, &facts).unwrap();
        assert_eq!(d.status, AttendanceStatus::OnLeave);
        assert_eq!(d.source_request_id.as_deref(), Some("req-1"));
    }

    #[test]
    fn work_from_home_status_from_request_type() {
        let facts = DayFacts {
            approved_leave: Some(LeaveFact {
                request_id: "req-2".into(),
                request_type: RequestType::WorkFromHome,
                leave_type: None,
            }),
            day_closed: true,
            ..DayFacts::default()
        };
        let d = derive_day(&shift(), &[], &facts).unwrap();
        assert_eq!(d.status, AttendanceStatus::WorkFromHome);
    }

    #[test]
    fn net_never_negative() {
        // 30-minute stay with a 60-minute scheduled break.
        let p = [
            punch(1, PunchType::In, 9, 0),
            punch(2, PunchType::Out, 9, 30),
        ];
        let d = derive_day(&shift(), &p, &closed()).unwrap();
        assert_eq!(d.net_work_hours, 0.0);
        assert!(d.net_work_hours >= 0.0);
    }
}
