//! Job lifecycle states and the transition table (spec §4.2).

use std::fmt;

use crate::error::{EngineError, Result};

/// A job's lifecycle state. `Created` is not one of the five store
/// statuses tracked by the manager (spec §4.3) — a job only enters a
/// store once it becomes `Pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum Status {
    Created,
    Pending,
    Running,
    Done,
    Failed,
    Cancelled,
}

impl Status {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed | Self::Cancelled)
    }

    /// The five statuses the job manager keeps a store for.
    pub const STORE_STATUSES: [Status; 5] = [
        Status::Pending,
        Status::Running,
        Status::Done,
        Status::Failed,
        Status::Cancelled,
    ];

    /// Validate and execute a transition, per the table in spec §4.2:
    /// `created->pending`; `pending->running`; `running->{done,failed,cancelled}`;
    /// `pending->cancelled`; `{done,failed,cancelled}->pending` (re-run).
    pub fn validate_transition(self, next: Status) -> Result<()> {
        let allowed = matches!(
            (self, next),
            (Status::Created, Status::Pending)
                | (Status::Pending, Status::Running)
                | (Status::Running, Status::Done)
                | (Status::Running, Status::Failed)
                | (Status::Running, Status::Cancelled)
                | (Status::Pending, Status::Cancelled)
                | (Status::Done, Status::Pending)
                | (Status::Failed, Status::Pending)
                | (Status::Cancelled, Status::Pending)
        );
        if allowed {
            Ok(())
        } else {
            Err(EngineError::invalid_state(format!(
                "cannot transition from {self:?} to {next:?}"
            )))
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Created => "created",
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Done => "done",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}
