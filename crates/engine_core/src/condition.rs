//! Condition evaluator (spec §4.1).
//!
//! A [`Condition`] is a pure predicate over an [`EngineSnapshot`]: boolean
//! combinators over job status, timepoints, and clock expressions. The only
//! condition that is not pure is [`Condition::EveryPeriod`], which tracks
//! the last time it returned `true` via interior mutability.

use std::sync::Mutex;

use chrono::{DateTime, Datelike, Local, Timelike};
use engine_ids::JobId;

use crate::error::{EngineError, Result};
use crate::job::status::Status;

/// A read-only view of engine state that conditions evaluate against.
/// Implemented by the job manager so conditions never need a full
/// `Engine` reference (and, per spec §5, must never mutate engine state).
pub trait EngineSnapshot {
    fn status_of(&self, job_id: &JobId) -> Option<Status>;
}

/// Valid fields for [`Condition::AfterTimepoint`] / [`Condition::BeforeTimepoint`]
/// field-wise comparisons.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimepointField {
    Year,
    Month,
    Day,
    Hour,
    Minute,
    Second,
}

impl TimepointField {
    fn parse(name: &str) -> Result<Self> {
        match name {
            "year" => Ok(Self::Year),
            "month" => Ok(Self::Month),
            "day" => Ok(Self::Day),
            "hour" => Ok(Self::Hour),
            "minute" => Ok(Self::Minute),
            "second" => Ok(Self::Second),
            other => Err(EngineError::validation(format!(
                "invalid timepoint field: {other}"
            ))),
        }
    }

    fn extract(self, dt: &DateTime<Local>) -> i64 {
        match self {
            Self::Year => dt.year() as i64,
            Self::Month => dt.month() as i64,
            Self::Day => dt.day() as i64,
            Self::Hour => dt.hour() as i64,
            Self::Minute => dt.minute() as i64,
            Self::Second => dt.second() as i64,
        }
    }
}

/// Combination mode for [`Condition::AfterOthers`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinMode {
    All,
    Any,
}

/// The statuses that satisfy a job-dependency condition by default.
pub fn terminal_statuses() -> Vec<Status> {
    vec![Status::Done, Status::Failed, Status::Cancelled]
}

/// A predicate gating a job's admission to `running`.
///
/// Conditions are plain data (no closures), so they can be cloned freely
/// and compared structurally by callers that serialize a job snapshot.
pub enum Condition {
    AfterAnother {
        job_id: JobId,
        statuses: Vec<Status>,
    },
    AfterOthers {
        job_ids: Vec<JobId>,
        statuses: Vec<Status>,
        mode: JoinMode,
    },
    AfterTimepoint {
        timepoint: DateTime<Local>,
        compare_fields: Option<Vec<TimepointField>>,
    },
    BeforeTimepoint {
        timepoint: DateTime<Local>,
        compare_fields: Option<Vec<TimepointField>>,
    },
    AfterClock {
        hour: u32,
        minute: u32,
        second: u32,
    },
    BeforeClock {
        hour: u32,
        minute: u32,
        second: u32,
    },
    AfterWeekday {
        weekday: u32,
    },
    BeforeWeekday {
        weekday: u32,
    },
    EveryPeriod {
        period: chrono::Duration,
        immediate: bool,
        last_true: Mutex<Option<DateTime<Local>>>,
    },
    AllSatisfied(Vec<Condition>),
    AnySatisfied(Vec<Condition>),
}

impl Clone for Condition {
    fn clone(&self) -> Self {
        match self {
            Self::AfterAnother { job_id, statuses } => Self::AfterAnother {
                job_id: job_id.clone(),
                statuses: statuses.clone(),
            },
            Self::AfterOthers {
                job_ids,
                statuses,
                mode,
            } => Self::AfterOthers {
                job_ids: job_ids.clone(),
                statuses: statuses.clone(),
                mode: *mode,
            },
            Self::AfterTimepoint {
                timepoint,
                compare_fields,
            } => Self::AfterTimepoint {
                timepoint: *timepoint,
                compare_fields: compare_fields.clone(),
            },
            Self::BeforeTimepoint {
                timepoint,
                compare_fields,
            } => Self::BeforeTimepoint {
                timepoint: *timepoint,
                compare_fields: compare_fields.clone(),
            },
            Self::AfterClock {
                hour,
                minute,
                second,
            } => Self::AfterClock {
                hour: *hour,
                minute: *minute,
                second: *second,
            },
            Self::BeforeClock {
                hour,
                minute,
                second,
            } => Self::BeforeClock {
                hour: *hour,
                minute: *minute,
                second: *second,
            },
            Self::AfterWeekday { weekday } => Self::AfterWeekday { weekday: *weekday },
            Self::BeforeWeekday { weekday } => Self::BeforeWeekday { weekday: *weekday },
            Self::EveryPeriod {
                period,
                immediate,
                last_true,
            } => Self::EveryPeriod {
                period: *period,
                immediate: *immediate,
                last_true: Mutex::new(*last_true.lock().unwrap()),
            },
            Self::AllSatisfied(conds) => Self::AllSatisfied(conds.clone()),
            Self::AnySatisfied(conds) => Self::AnySatisfied(conds.clone()),
        }
    }
}

impl Condition {
    pub fn after_another(job_id: JobId, statuses: Vec<Status>) -> Self {
        Self::AfterAnother { job_id, statuses }
    }

    pub fn after_any_terminal(job_id: JobId) -> Self {
        Self::AfterAnother {
            job_id,
            statuses: terminal_statuses(),
        }
    }

    pub fn after_others(job_ids: Vec<JobId>, statuses: Vec<Status>, mode: JoinMode) -> Self {
        Self::AfterOthers {
            job_ids,
            statuses,
            mode,
        }
    }

    /// Parse a duration string of the form `<number><unit>` with
    /// `unit ∈ {d, h, m, s}`.
    pub fn parse_duration(period_str: &str) -> Result<chrono::Duration> {
        let (value, unit) = period_str.split_at(period_str.len().saturating_sub(1));
        let n: f64 = value.parse().map_err(|_| {
            EngineError::validation(format!("invalid duration string: {period_str}"))
        })?;
        let millis = match unit {
            "d" => n * 86_400_000.0,
            "h" => n * 3_600_000.0,
            "m" => n * 60_000.0,
            "s" => n * 1_000.0,
            _ => {
                return Err(EngineError::validation(format!(
                    "invalid duration unit in {period_str}, expected one of d|h|m|s"
                )))
            }
        };
        Ok(chrono::Duration::milliseconds(millis as i64))
    }

    pub fn every_period(period_str: &str, immediate: bool) -> Result<Self> {
        let period = Self::parse_duration(period_str)?;
        Ok(Self::EveryPeriod {
            period,
            immediate,
            last_true: Mutex::new(None),
        })
    }

    /// Parse a clock string: `H`, `H:M`, or `H:M:S`.
    pub fn parse_clock(clock_str: &str) -> Result<(u32, u32, u32)> {
        let parts: Vec<&str> = clock_str.split(':').collect();
        let parse_part = |s: &str| -> Result<u32> {
            s.parse()
                .map_err(|_| EngineError::validation(format!("invalid clock string: {clock_str}")))
        };
        match parts.as_slice() {
            [h] => Ok((parse_part(h)?, 0, 0)),
            [h, m] => Ok((parse_part(h)?, parse_part(m)?, 0)),
            [h, m, s] => Ok((parse_part(h)?, parse_part(m)?, parse_part(s)?)),
            _ => Err(EngineError::validation(format!(
                "invalid clock string: {clock_str}"
            ))),
        }
    }

    pub fn after_clock(clock_str: &str) -> Result<Self> {
        let (hour, minute, second) = Self::parse_clock(clock_str)?;
        Ok(Self::AfterClock {
            hour,
            minute,
            second,
        })
    }

    pub fn before_clock(clock_str: &str) -> Result<Self> {
        let (hour, minute, second) = Self::parse_clock(clock_str)?;
        Ok(Self::BeforeClock {
            hour,
            minute,
            second,
        })
    }

    /// Parse a weekday name (full or 3-letter, case-insensitive). Mon=0..Sun=6.
    pub fn parse_weekday(weekday_str: &str) -> Result<u32> {
        match weekday_str.to_lowercase().as_str() {
            "monday" | "mon" => Ok(0),
            "tuesday" | "tue" => Ok(1),
            "wednesday" | "wed" => Ok(2),
            "thursday" | "thu" => Ok(3),
            "friday" | "fri" => Ok(4),
            "saturday" | "sat" => Ok(5),
            "sunday" | "sun" => Ok(6),
            _ => Err(EngineError::validation(format!(
                "invalid weekday string: {weekday_str}"
            ))),
        }
    }

    pub fn after_weekday(weekday_str: &str) -> Result<Self> {
        Ok(Self::AfterWeekday {
            weekday: Self::parse_weekday(weekday_str)?,
        })
    }

    pub fn before_weekday(weekday_str: &str) -> Result<Self> {
        Ok(Self::BeforeWeekday {
            weekday: Self::parse_weekday(weekday_str)?,
        })
    }

    /// Evaluate this condition against a snapshot of engine/job state.
    pub fn satisfy(&self, snapshot: &dyn EngineSnapshot) -> bool {
        match self {
            Self::AfterAnother { job_id, statuses } => match snapshot.status_of(job_id) {
                Some(status) => statuses.contains(&status),
                None => false,
            },
            Self::AfterOthers {
                job_ids,
                statuses,
                mode,
            } => {
                let mut results = job_ids.iter().map(|id| match snapshot.status_of(id) {
                    Some(status) => statuses.contains(&status),
                    None => false,
                });
                match mode {
                    JoinMode::All => results.all(|ok| ok),
                    JoinMode::Any => results.any(|ok| ok),
                }
            }
            Self::AfterTimepoint {
                timepoint,
                compare_fields,
            } => {
                let now = Local::now();
                match compare_fields {
                    None => now > *timepoint,
                    Some(fields) => fields
                        .iter()
                        .all(|f| f.extract(&now) > f.extract(timepoint)),
                }
            }
            Self::BeforeTimepoint {
                timepoint,
                compare_fields,
            } => {
                let now = Local::now();
                match compare_fields {
                    None => now < *timepoint,
                    Some(fields) => fields
                        .iter()
                        .all(|f| f.extract(&now) < f.extract(timepoint)),
                }
            }
            Self::AfterClock {
                hour,
                minute,
                second,
            } => {
                let now = Local::now();
                now.hour() >= *hour && now.minute() >= *minute && now.second() >= *second
            }
            Self::BeforeClock {
                hour,
                minute,
                second,
            } => {
                let now = Local::now();
                now.hour() <= *hour && now.minute() <= *minute && now.second() <= *second
            }
            Self::AfterWeekday { weekday } => {
                Local::now().weekday().num_days_from_monday() >= *weekday
            }
            Self::BeforeWeekday { weekday } => {
                Local::now().weekday().num_days_from_monday() <= *weekday
            }
            Self::EveryPeriod {
                period,
                immediate,
                last_true,
            } => {
                let mut guard = last_true.lock().unwrap();
                let now = Local::now();
                let result = match *guard {
                    None => *immediate,
                    Some(last) => now - last >= *period,
                };
                if result {
                    *guard = Some(now);
                } else if guard.is_none() {
                    *guard = Some(now);
                }
                result
            }
            Self::AllSatisfied(conds) => conds.iter().all(|c| c.satisfy(snapshot)),
            Self::AnySatisfied(conds) => conds.iter().any(|c| c.satisfy(snapshot)),
        }
    }

    /// Combine two conditions as `AllSatisfied`, the `&` operator in the
    /// original source.
    pub fn and(self, other: Condition) -> Condition {
        Condition::AllSatisfied(vec![self, other])
    }

    /// Combine two conditions as `AnySatisfied`, the `|` operator in the
    /// original source.
    pub fn or(self, other: Condition) -> Condition {
        Condition::AnySatisfied(vec![self, other])
    }
}

impl std::ops::BitAnd for Condition {
    type Output = Condition;
    fn bitand(self, rhs: Condition) -> Condition {
        self.and(rhs)
    }
}

impl std::ops::BitOr for Condition {
    type Output = Condition;
    fn bitor(self, rhs: Condition) -> Condition {
        self.or(rhs)
    }
}
