use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};
use utoipa::ToSchema;

use crate::model::punch::PunchType;

/// Terminal firmware families we ingest from. Each gets a declarative
/// code table below; aggregation logic never branches on the provider.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, ToSchema, Display,
    EnumString, AsRefStr,
)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Provider {
    Zkteco,
    Essl,
    Realtime,
    Generic,
}

/// Provider status code -> canonical punch type. Adding a provider means
/// adding one table entry here, nothing else.
pub fn map_provider_code(provider: Provider, code: &str) -> Option<PunchType> {
    let table: &[(&str, PunchType)] = match provider {
        Provider::Zkteco => &[
            ("0", PunchType::In),
            ("1", PunchType::Out),
            ("2", PunchType::BreakStart),
            ("3", PunchType::BreakEnd),
            ("4", PunchType::In),  // overtime-in maps onto plain in
            ("5", PunchType::Out), // overtime-out maps onto plain out
        ],
        Provider::Essl => &[
            ("I", PunchType::In),
            ("O", PunchType::Out),
            ("BI", PunchType::BreakStart),
            ("BO", PunchType::BreakEnd),
        ],
        Provider::Realtime => &[
            ("CHECKIN", PunchType::In),
            ("CHECKOUT", PunchType::Out),
            ("BREAKON", PunchType::BreakStart),
            ("BREAKOFF", PunchType::BreakEnd),
        ],
        Provider::Generic => &[
            ("in", PunchType::In),
            ("out", PunchType::Out),
            ("break_start", PunchType::BreakStart),
            ("break_end", PunchType::BreakEnd),
            ("remote_in", PunchType::RemoteIn),
            ("remote_out", PunchType::RemoteOut),
        ],
    };
    table
        .iter()
        .find(|(c, _)| c.eq_ignore_ascii_case(code))
        .map(|(_, t)| *t)
}

/// Punch types considered valid right after `prev`. Compared on the
/// canonical type, so remote punches follow the same grammar.
pub fn allowed_after(prev: PunchType) -> &'static [PunchType] {
    match prev.canonical() {
        PunchType::In => &[PunchType::Out, PunchType::BreakStart],
        PunchType::Out => &[PunchType::In],
        PunchType::BreakStart => &[PunchType::BreakEnd],
        PunchType::BreakEnd => &[PunchType::In, PunchType::BreakStart],
        _ => unreachable!("canonical() never returns remote variants"),
    }
}

/// Sequence check against the subject's last known punch. A violation
/// flags the event rather than rejecting it, so the day stays visible
/// for correction.
pub fn sequence_ok(prev: Option<PunchType>, next: PunchType) -> bool {
    match prev {
        // The very first punch of a subject must open, not close.
        None => next.is_inbound(),
        Some(p) => allowed_after(p)
            .iter()
            .any(|t| *t == next.canonical()),
    }
}

/// A punch of the same canonical type within `window_secs` of the last
/// matching punch is a duplicate. Rejected with a distinct signal, never
/// silently merged.
pub fn is_duplicate(
    prev: Option<(PunchType, NaiveDateTime)>,
    next_type: PunchType,
    at: NaiveDateTime,
    window_secs: i64,
) -> bool {
    match prev {
        Some((t, prev_at)) if t.canonical() == next_type.canonical() => {
            (at - prev_at).num_seconds().abs() <= window_secs
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 8, 1)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    #[test]
    fn provider_tables_map_known_codes() {
        assert_eq!(map_provider_code(Provider::Zkteco, "0"), Some(PunchType::In));
        assert_eq!(map_provider_code(Provider::Zkteco, "5"), Some(PunchType::Out));
        assert_eq!(map_provider_code(Provider::Essl, "BI"), Some(PunchType::BreakStart));
        assert_eq!(
            map_provider_code(Provider::Realtime, "checkout"),
            Some(PunchType::Out)
        );
        assert_eq!(
            map_provider_code(Provider::Generic, "remote_in"),
            Some(PunchType::RemoteIn)
        );
    }

    #[test]
    fn unknown_code_is_none() {
        assert_eq!(map_provider_code(Provider::Zkteco, "9"), None);
        assert_eq!(map_provider_code(Provider::Essl, ""), None);
    }

    #[test]
    fn sequence_grammar() {
        assert!(sequence_ok(None, PunchType::In));
        assert!(sequence_ok(None, PunchType::RemoteIn));
        assert!(!sequence_ok(None, PunchType::Out));
        assert!(sequence_ok(Some(PunchType::In), PunchType::Out));
        assert!(sequence_ok(Some(PunchType::In), PunchType::BreakStart));
        assert!(!sequence_ok(Some(PunchType::In), PunchType::In));
        assert!(sequence_ok(Some(PunchType::Out), PunchType::In));
        assert!(!sequence_ok(Some(PunchType::Out), PunchType::BreakEnd));
        assert!(sequence_ok(Some(PunchType::BreakStart), PunchType::BreakEnd));
        assert!(!sequence_ok(Some(PunchType::BreakStart), PunchType::Out));
        assert!(sequence_ok(Some(PunchType::BreakEnd), PunchType::In));
    }

    #[test]
    fn remote_punches_follow_plain_grammar() {
        assert!(sequence_ok(Some(PunchType::RemoteIn), PunchType::RemoteOut));
        assert!(sequence_ok(Some(PunchType::RemoteIn), PunchType::Out));
        assert!(!sequence_ok(Some(PunchType::RemoteOut), PunchType::Out));
    }

    #[test]
    fn duplicate_within_window() {
        let prev = Some((PunchType::In, at(9, 0, 0)));
        assert!(is_duplicate(prev, PunchType::In, at(9, 1, 30), 120));
        assert!(is_duplicate(prev, PunchType::RemoteIn, at(9, 2, 0), 120));
    }

    #[test]
    fn not_duplicate_outside_window_or_other_type() {
        let prev = Some((PunchType::In, at(9, 0, 0)));
        assert!(!is_duplicate(prev, PunchType::In, at(9, 2, 1), 120));
        assert!(!is_duplicate(prev, PunchType::Out, at(9, 0, 30), 120));
        assert!(!is_duplicate(None, PunchType::In, at(9, 0, 0), 120));
    }
}
