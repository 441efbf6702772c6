//! Cron schedule parsing and occurrence computation.

use crate::error::ScheduleError;
use chrono::{DateTime, Utc};
use cron::Schedule;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// A cron schedule.
///
/// Expressions use the six/seven-field cron syntax of the `cron` crate
/// (seconds first), e.g. `"0 0 7 * * *"` for 7am daily.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CronSchedule {
    /// The cron expression.
    pub expression: String,
}

impl CronSchedule {
    /// Creates a new cron schedule.
    #[must_use]
    pub fn new(expression: impl Into<String>) -> Self {
        Self {
            expression: expression.into(),
        }
    }

    /// Validates the cron expression.
    ///
    /// # Errors
    ///
    /// Returns an error if the expression is invalid.
    pub fn validate(&self) -> Result<(), ScheduleError> {
        self.parse().map(|_| ())
    }

    /// Returns the next occurrence strictly after the given time.
    ///
    /// # Errors
    ///
    /// Returns an error if the expression is invalid.
    pub fn next_after(&self, after: DateTime<Utc>) -> Result<Option<DateTime<Utc>>, ScheduleError> {
        Ok(self.parse()?.after(&after).next())
    }

    /// Returns whether the schedule fires in the half-open window
    /// `(start, end]`.
    ///
    /// # Errors
    ///
    /// Returns an error if the expression is invalid.
    pub fn fires_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<bool, ScheduleError> {
        Ok(self.next_after(start)?.is_some_and(|next| next <= end))
    }

    fn parse(&self) -> Result<Schedule, ScheduleError> {
        Schedule::from_str(&self.expression).map_err(|e| ScheduleError::InvalidCronExpression {
            expression: self.expression.clone(),
            reason: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn validates_daily_expression() {
        let schedule = CronSchedule::new("0 0 7 * * *");
        schedule.validate().expect("should be valid");
    }

    #[test]
    fn rejects_garbage_expression() {
        let schedule = CronSchedule::new("not a cron");
        let err = schedule.validate().expect_err("should be invalid");
        assert!(matches!(err, ScheduleError::InvalidCronExpression { .. }));
    }

    #[test]
    fn next_after_daily_seven_am() {
        let schedule = CronSchedule::new("0 0 7 * * *");
        let after = Utc.with_ymd_and_hms(2026, 3, 1, 6, 0, 0).unwrap();

        let next = schedule
            .next_after(after)
            .expect("valid expression")
            .expect("has next");
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 3, 1, 7, 0, 0).unwrap());
    }

    #[test]
    fn fires_between_windows() {
        let schedule = CronSchedule::new("0 0 7 * * *");
        let before = Utc.with_ymd_and_hms(2026, 3, 1, 6, 0, 0).unwrap();
        let after = Utc.with_ymd_and_hms(2026, 3, 1, 8, 0, 0).unwrap();

        assert!(schedule.fires_between(before, after).expect("valid"));

        let short_end = Utc.with_ymd_and_hms(2026, 3, 1, 6, 30, 0).unwrap();
        assert!(!schedule.fires_between(before, short_end).expect("valid"));
    }
}
