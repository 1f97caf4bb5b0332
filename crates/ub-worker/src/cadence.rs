use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use cron::Schedule;

use crate::error::{Result, WorkerError};

/// When a job fires
#[derive(Clone)]
pub enum Cadence {
    /// Fixed period; the first run happens one period after start
    Every(Duration),
    /// Cron schedule evaluated in UTC
    Cron(Box<Schedule>),
}

impl Cadence {
    pub fn every(period: Duration) -> Self {
        Self::Every(period)
    }

    /// Parse a cron expression.
    ///
    /// Accepts the classic 5-field form (`min hour dom month dow`) as well as
    /// the 6/7-field form with seconds; 5-field expressions fire at second 0.
    pub fn cron(expr: &str) -> Result<Self> {
        let fields = expr.split_whitespace().count();
        let normalized = if fields == 5 {
            format!("0 {}", expr.trim())
        } else {
            expr.trim().to_string()
        };

        Schedule::from_str(&normalized)
            .map(|schedule| Self::Cron(Box::new(schedule)))
            .map_err(|e| WorkerError::InvalidCron {
                expr: expr.to_string(),
                message: e.to_string(),
            })
    }

    /// Next fire time strictly after `now`; `None` when a cron schedule has
    /// no upcoming occurrence
    pub fn next_after(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Self::Every(period) => chrono::Duration::from_std(*period).ok().map(|d| now + d),
            Self::Cron(schedule) => schedule.after(&now).next(),
        }
    }
}

impl fmt::Display for Cadence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Every(period) => write!(f, "every {:?}", period),
            Self::Cron(schedule) => write!(f, "cron '{}'", schedule),
        }
    }
}

impl fmt::Debug for Cadence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Timelike};

    #[test]
    fn test_five_field_cron_gets_seconds() {
        let cadence = Cadence::cron("*/15 * * * *").unwrap();
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 10, 7, 30).unwrap();
        let next = cadence.next_after(now).unwrap();
        assert_eq!(next.minute(), 15);
        assert_eq!(next.second(), 0);
    }

    #[test]
    fn test_six_field_cron() {
        let cadence = Cadence::cron("30 0 * * * *").unwrap();
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 10, 7, 0).unwrap();
        let next = cadence.next_after(now).unwrap();
        assert_eq!((next.hour(), next.minute(), next.second()), (11, 0, 30));
    }

    #[test]
    fn test_invalid_cron() {
        let err = Cadence::cron("every tuesday").unwrap_err();
        assert!(matches!(err, WorkerError::InvalidCron { ref expr, .. } if expr == "every tuesday"));
        assert!(Cadence::cron("").is_err());
    }

    #[test]
    fn test_interval_next_is_one_period_later() {
        let cadence = Cadence::every(Duration::from_secs(300));
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap();
        assert_eq!(
            cadence.next_after(now).unwrap(),
            Utc.with_ymd_and_hms(2024, 3, 1, 10, 5, 0).unwrap()
        );
        assert_eq!(cadence.to_string(), "every 300s");
    }
}
