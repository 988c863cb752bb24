/// Job definitions for the persisted frontier
use chrono::{DateTime, Utc};
use std::fmt;

/// Lifecycle state of a frontier job
///
/// Jobs move from `Pending` to `Done` exactly once. There is no in-progress
/// state: a job that was read but never resolved is still pending on the
/// next run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobState {
    Pending,
    Done,
}

impl JobState {
    /// Converts the job state to a database string representation
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Done => "done",
        }
    }

    /// Parses a job state from a database string representation
    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "done" => Some(Self::Done),
            _ => None,
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Pending => "PENDING",
            Self::Done => "DONE",
        })
    }
}

/// One unit of crawl work, keyed by entity identifier
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub id: i64,
    pub queue_name: String,
    pub key: String,
    pub state: JobState,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn is_pending(&self) -> bool {
        self.state == JobState::Pending
    }
}
