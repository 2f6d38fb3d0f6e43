use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use tracing::warn;

use crate::types::Schedule;

/// Compute the next UTC execution time for `schedule` starting *after* `from`.
///
/// Returns `None` when the schedule is exhausted (a `Once` job whose time
/// has already passed) or when evaluation fails (an invalid cron
/// expression) — the job is left enabled but unscheduled; the caller
/// records the reason in `last_result`.
pub fn compute_next_run(schedule: &Schedule, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
    match schedule {
        Schedule::Once { at } => {
            if *at > from {
                Some(*at)
            } else {
                None
            }
        }

        Schedule::Interval { every_ms, anchor_ms } => {
            let every = Duration::milliseconds(*every_ms);
            if every_ms <= &0 {
                return None;
            }
            match anchor_ms {
                Some(anchor) => {
                    let anchor_dt = DateTime::from_timestamp_millis(*anchor).unwrap_or(from);
                    if anchor_dt > from {
                        return Some(anchor_dt);
                    }
                    // Advance from the anchor in whole-interval steps until
                    // strictly after `from` — this keeps the sequence
                    // anchor, anchor+every, anchor+2*every, ... regardless
                    // of how long the scheduler was offline.
                    let elapsed_ms = (from - anchor_dt).num_milliseconds();
                    let steps = elapsed_ms / every_ms + 1;
                    Some(anchor_dt + every * steps as i32)
                }
                None => Some(from + every),
            }
        }

        Schedule::Cron { expression, tz: _ } => match cron::Schedule::from_str(expression) {
            Ok(parsed) => parsed.after(&from).next(),
            Err(e) => {
                warn!(expression = %expression, err = %e, "invalid cron expression");
                None
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Schedule;

    #[test]
    fn interval_anchored_is_strictly_increasing() {
        let anchor = Utc::now();
        let schedule = Schedule::Interval { every_ms: 60_000, anchor_ms: Some(anchor.timestamp_millis()) };

        let first = compute_next_run(&schedule, anchor).unwrap();
        let second = compute_next_run(&schedule, first).unwrap();
        let third = compute_next_run(&schedule, second).unwrap();

        assert_eq!((second - first).num_milliseconds(), 60_000);
        assert_eq!((third - second).num_milliseconds(), 60_000);
    }

    #[test]
    fn once_in_the_past_is_exhausted() {
        let schedule = Schedule::Once { at: Utc::now() - Duration::seconds(10) };
        assert!(compute_next_run(&schedule, Utc::now()).is_none());
    }

    #[test]
    fn invalid_cron_returns_none() {
        let schedule = Schedule::Cron { expression: "not a cron expr".to_string(), tz: None };
        assert!(compute_next_run(&schedule, Utc::now()).is_none());
    }

    #[test]
    fn valid_cron_advances() {
        // every minute at second 0
        let schedule = Schedule::Cron { expression: "0 * * * * *".to_string(), tz: None };
        let from = Utc::now();
        let next = compute_next_run(&schedule, from).unwrap();
        assert!(next > from);
    }
}
