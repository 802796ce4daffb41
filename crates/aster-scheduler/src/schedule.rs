//! Next-run computation for the three schedule types.

use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use cron::Schedule;

use aster_store::types::ScheduleType;

use crate::error::{Result, SchedulerError};

/// Compute the next UTC execution time.
///
/// Values by type:
///   once      RFC 3339 / ISO-8601 timestamp (a past instant fires on the
///             next tick — useful for "in 2 seconds" reminders)
///   interval  seconds as a decimal string
///   cron      5-field cron expression (a seconds field may be included)
pub fn compute_next_run(
    schedule_type: ScheduleType,
    schedule_value: &str,
    from: DateTime<Utc>,
) -> Result<DateTime<Utc>> {
    match schedule_type {
        ScheduleType::Once => {
            let normalized = schedule_value.replace('Z', "+00:00");
            DateTime::parse_from_rfc3339(&normalized)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|e| {
                    SchedulerError::InvalidSchedule(format!(
                        "bad timestamp '{schedule_value}': {e}"
                    ))
                })
        }

        ScheduleType::Interval => {
            let secs: i64 = schedule_value.trim().parse().map_err(|_| {
                SchedulerError::InvalidSchedule(format!("bad interval '{schedule_value}'"))
            })?;
            if secs <= 0 {
                return Err(SchedulerError::InvalidSchedule(
                    "interval must be positive".to_string(),
                ));
            }
            Ok(from + Duration::seconds(secs))
        }

        ScheduleType::Cron => {
            let expr = normalize_cron(schedule_value);
            let schedule = Schedule::from_str(&expr).map_err(|e| {
                SchedulerError::InvalidSchedule(format!(
                    "bad cron expression '{schedule_value}': {e}"
                ))
            })?;
            schedule.after(&from).next().ok_or_else(|| {
                SchedulerError::InvalidSchedule(format!(
                    "cron expression '{schedule_value}' has no future instant"
                ))
            })
        }
    }
}

/// The cron parser wants a seconds field; prepend one for the common
/// 5-field form ("0 9 * * *").
fn normalize_cron(expr: &str) -> String {
    let fields = expr.split_whitespace().count();
    if fields == 5 {
        format!("0 {expr}")
    } else {
        expr.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn once_parses_iso_and_z_suffix() {
        let from = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let next =
            compute_next_run(ScheduleType::Once, "2026-06-01T09:30:00Z", from).unwrap();
        assert_eq!(next, at("2026-06-01T09:30:00+00:00"));
    }

    #[test]
    fn once_in_the_past_still_yields_that_instant() {
        let from = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let next =
            compute_next_run(ScheduleType::Once, "2020-01-01T00:00:00+00:00", from).unwrap();
        assert!(next < from);
    }

    #[test]
    fn interval_adds_seconds() {
        let from = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let next = compute_next_run(ScheduleType::Interval, "3600", from).unwrap();
        assert_eq!(next, from + Duration::hours(1));
    }

    #[test]
    fn interval_rejects_nonsense() {
        let from = Utc::now();
        assert!(compute_next_run(ScheduleType::Interval, "soon", from).is_err());
        assert!(compute_next_run(ScheduleType::Interval, "-5", from).is_err());
    }

    #[test]
    fn five_field_cron_daily_at_nine() {
        let from = at("2026-03-10T10:00:00+00:00");
        let next = compute_next_run(ScheduleType::Cron, "0 9 * * *", from).unwrap();
        assert_eq!(next, at("2026-03-11T09:00:00+00:00"));
    }

    #[test]
    fn six_field_cron_passes_through() {
        let from = at("2026-03-10T10:00:00+00:00");
        let next = compute_next_run(ScheduleType::Cron, "30 0 9 * * *", from).unwrap();
        assert_eq!(next, at("2026-03-11T09:00:30+00:00"));
    }

    #[test]
    fn bad_cron_is_rejected() {
        assert!(compute_next_run(ScheduleType::Cron, "not cron", Utc::now()).is_err());
    }
}
