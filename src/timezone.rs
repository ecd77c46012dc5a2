//! Timezone catalog.
//!
//! Canonicalizes user-supplied IANA timezone names and computes the next
//! UTC instant a given local "HH:MM" wall-clock time occurs in a zone,
//! crossing DST boundaries correctly. Built on `chrono` + `chrono_tz`.

use std::collections::HashMap;
use std::sync::OnceLock;

use chrono::{DateTime, Duration, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;

use crate::error::AppError;

fn lowercase_index() -> &'static HashMap<String, Tz> {
    static INDEX: OnceLock<HashMap<String, Tz>> = OnceLock::new();
    INDEX.get_or_init(|| {
        chrono_tz::TZ_VARIANTS
            .iter()
            .map(|tz| (tz.name().to_lowercase(), *tz))
            .collect()
    })
}

/// Canonicalize a user-supplied timezone name: trim whitespace, lowercase,
/// and validate it against the IANA database. Returns the canonical
/// lowercase form (the data model's storage representation) or a
/// validation error if the name isn't a recognized zone.
pub fn canonicalize(raw: &str) -> Result<String, AppError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(AppError::InvalidTimezone("timezone is empty".to_string()));
    }
    let lower = trimmed.to_lowercase();
    if lowercase_index().contains_key(&lower) {
        Ok(lower)
    } else {
        Err(AppError::InvalidTimezone(format!(
            "unrecognized IANA timezone: {raw}"
        )))
    }
}

/// Resolve a canonical (lowercase) timezone name back to a `chrono_tz::Tz`
/// for DST-aware arithmetic.
pub fn resolve(canonical: &str) -> Result<Tz, AppError> {
    lowercase_index()
        .get(canonical)
        .copied()
        .ok_or_else(|| AppError::InvalidTimezone(format!("unrecognized timezone: {canonical}")))
}

/// Parse a strict "HH:MM" local time string: both components must be
/// exactly two zero-padded digits ("9:5" is rejected even though 09:05 would
/// be a valid time; this format is stricter than general time parsing).
pub fn parse_local_time(s: &str) -> Result<NaiveTime, AppError> {
    let bytes = s.as_bytes();
    if bytes.len() != 5 || bytes[2] != b':' {
        return Err(AppError::Validation(format!(
            "local_time must be in strict HH:MM form: {s}"
        )));
    }
    let (h_part, m_part) = (&s[0..2], &s[3..5]);
    if !h_part.chars().all(|c| c.is_ascii_digit()) || !m_part.chars().all(|c| c.is_ascii_digit()) {
        return Err(AppError::Validation(format!(
            "local_time must be in strict HH:MM form: {s}"
        )));
    }
    let hour: u32 = h_part.parse().unwrap();
    let minute: u32 = m_part.parse().unwrap();
    NaiveTime::from_hms_opt(hour, minute, 0)
        .ok_or_else(|| AppError::Validation(format!("local_time out of range: {s}")))
}

/// Compute the next UTC instant at which `local_time` occurs in `tz`,
/// strictly after `now`. DST-aware: advances by calendar days in the target
/// zone (not by a fixed 24h `Duration`), so a spring-forward/fall-back
/// transition shifts the UTC instant by the zone's changed offset rather
/// than skipping or repeating the local time.
pub fn next_occurrence_utc(local_time: NaiveTime, tz: Tz, now: DateTime<Utc>) -> DateTime<Utc> {
    let now_local = now.with_timezone(&tz);
    let mut date = now_local.date_naive();

    loop {
        let candidate_naive = date.and_time(local_time);
        let candidate = match tz.from_local_datetime(&candidate_naive) {
            chrono::LocalResult::Single(dt) => dt,
            // Ambiguous (fall-back, time occurs twice): take the earlier
            // occurrence, the conventional choice for "next time this fires".
            chrono::LocalResult::Ambiguous(earliest, _latest) => earliest,
            // Nonexistent (spring-forward, local time skipped): there is no
            // instant for this wall-clock time on this date; roll to the
            // next day and retry.
            chrono::LocalResult::None => {
                date = date.succ_opt().expect("date overflow");
                continue;
            }
        };

        if candidate > now_local {
            return candidate.with_timezone(&Utc);
        }
        date = date.succ_opt().expect("date overflow");
    }
}

/// Convenience used by the planner when rescheduling immediately after a
/// firing: computes the occurrence for "tomorrow" relative to the instant
/// that just fired, rather than relative to wall-clock `now` (which may have
/// drifted during dispatch).
pub fn next_occurrence_after(
    local_time: NaiveTime,
    tz: Tz,
    fired_at: DateTime<Utc>,
) -> DateTime<Utc> {
    next_occurrence_utc(local_time, tz, fired_at + Duration::seconds(1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone as _;

    #[test]
    fn canonicalize_accepts_case_insensitive_iana_names() {
        assert_eq!(canonicalize("Europe/London").unwrap(), "europe/london");
        assert_eq!(canonicalize("  EUROPE/LONDON  ").unwrap(), "europe/london");
    }

    #[test]
    fn canonicalize_rejects_unknown_zones() {
        assert!(canonicalize("Mars/Olympus_Mons").is_err());
        assert!(canonicalize("").is_err());
    }

    #[test]
    fn parse_local_time_rejects_non_padded_forms() {
        assert!(parse_local_time("9:5").is_err());
        assert!(parse_local_time("24:00").is_err());
        assert!(parse_local_time("09:05").is_ok());
    }

    #[test]
    fn next_occurrence_advances_a_day_when_time_has_passed() {
        let tz = resolve("europe/london").unwrap();
        let local_time = parse_local_time("09:00").unwrap();
        // 10:00 UTC on a winter day is already past 09:00 local.
        let now = Utc.with_ymd_and_hms(2026, 1, 10, 10, 0, 0).unwrap();
        let next = next_occurrence_utc(local_time, tz, now);
        assert_eq!(next.with_timezone(&tz).date_naive().to_string(), "2026-01-11");
    }

    #[test]
    fn next_occurrence_crosses_dst_spring_forward_correctly() {
        // Europe/London goes forward at 01:00 UTC on 2026-03-29 (clocks jump
        // to 02:00 local -> no 01:30 local on that day).
        let tz = resolve("europe/london").unwrap();
        let local_time = parse_local_time("09:00").unwrap();
        let now = Utc.with_ymd_and_hms(2026, 3, 28, 23, 0, 0).unwrap();
        let next = next_occurrence_utc(local_time, tz, now);
        // After the transition, BST is UTC+1, so 09:00 local == 08:00 UTC.
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 3, 29, 8, 0, 0).unwrap());
    }
}
