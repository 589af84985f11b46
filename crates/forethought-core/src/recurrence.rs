//! Reset boundaries and task classification.
//!
//! Everything here is pure: the same task, policy and `now` always classify
//! the same way. Boundaries are calendar aligned in the policy's timezone:
//!
//! | recurrence | resets at (local time)                           |
//! |------------|--------------------------------------------------|
//! | `daily`    | 00:00 of the day after the completion            |
//! | `weekly`   | 00:00 of the first day of the following week     |
//! | `monthly`  | 00:00 of the first day of the following month    |
//! | `none`     | never                                            |

use chrono::{DateTime, Datelike, Days, NaiveDate, Utc, Weekday};
use chrono_tz::Tz;
use serde::Serialize;

use crate::datetime::{local_date, start_of_local_day};
use crate::task::{Recurrence, Task};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    Active,
    CompletedFresh,
    CompletedStale,
}

impl Classification {
    /// Whether the task should be presented as done.
    pub fn is_completed(self) -> bool {
        self == Classification::CompletedFresh
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResetPolicy {
    pub timezone: Tz,
    pub week_start: Weekday,
}

impl Default for ResetPolicy {
    fn default() -> Self {
        Self::new(chrono_tz::UTC)
    }
}

impl ResetPolicy {
    pub fn new(timezone: Tz) -> Self {
        Self {
            timezone,
            week_start: Weekday::Mon,
        }
    }

    pub fn with_week_start(mut self, week_start: Weekday) -> Self {
        self.week_start = week_start;
        self
    }

    /// Instant at which a completion made at `last_completed_at` stops
    /// counting for the current cycle.
    ///
    /// Absent completions yield the earliest representable instant so the
    /// task never blocks as completed.
    pub fn next_reset_boundary(
        &self,
        last_completed_at: Option<DateTime<Utc>>,
        recurrence: Recurrence,
    ) -> DateTime<Utc> {
        let Some(completed_at) = last_completed_at else {
            return DateTime::<Utc>::MIN_UTC;
        };

        let completed_on = local_date(completed_at, self.timezone);
        let next_cycle_day = match recurrence {
            Recurrence::None => return DateTime::<Utc>::MAX_UTC,
            Recurrence::Daily => completed_on.checked_add_days(Days::new(1)),
            Recurrence::Weekly => self.next_week_start(completed_on),
            Recurrence::Monthly => first_of_next_month(completed_on),
        };

        next_cycle_day
            .and_then(|day| start_of_local_day(day, self.timezone))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    pub fn classify(&self, task: &Task, now: DateTime<Utc>) -> Classification {
        if !task.completed {
            return Classification::Active;
        }
        if !task.recurrence.is_recurring() {
            return Classification::CompletedFresh;
        }

        let boundary = self.next_reset_boundary(task.last_completed_at, task.recurrence);
        if now < boundary {
            Classification::CompletedFresh
        } else {
            Classification::CompletedStale
        }
    }

    fn next_week_start(&self, day: NaiveDate) -> Option<NaiveDate> {
        let into_week = (day.weekday().num_days_from_monday() + 7
            - self.week_start.num_days_from_monday())
            % 7;
        day.checked_add_days(Days::new(u64::from(7 - into_week)))
    }
}

fn first_of_next_month(day: NaiveDate) -> Option<NaiveDate> {
    if day.month() == 12 {
        NaiveDate::from_ymd_opt(day.year().checked_add(1)?, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(day.year(), day.month() + 1, 1)
    }
}
