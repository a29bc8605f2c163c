//! # Detail-fetch queue entities
//!
//! One `QueueEntry` exists per discovered listing. The enumerator only ever
//! inserts PENDING entries; the detail worker moves them through
//! RUNNING -> DONE | ERROR. Entries are never deleted.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Queue entry status as persisted in `car_queue.status`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QueueStatus {
    Pending,
    Running,
    Done,
    Error,
}

impl QueueStatus {
    pub const ALL: [Self; 4] = [Self::Pending, Self::Running, Self::Done, Self::Error];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Running => "RUNNING",
            Self::Done => "DONE",
            Self::Error => "ERROR",
        }
    }
}

impl fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown queue status: {0}")]
pub struct UnknownQueueStatus(pub String);

impl FromStr for QueueStatus {
    type Err = UnknownQueueStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "RUNNING" => Ok(Self::Running),
            "DONE" => Ok(Self::Done),
            "ERROR" => Ok(Self::Error),
            other => Err(UnknownQueueStatus(other.to_string())),
        }
    }
}

/// Persisted job state for a single listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub car_id: String,
    pub status: QueueStatus,
    pub retry_count: u32,
    pub last_error: Option<String>,
    pub updated_at: Option<NaiveDateTime>,
}

/// Queue size per status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueCounts {
    pub pending: u64,
    pub running: u64,
    pub done: u64,
    pub error: u64,
}

impl QueueCounts {
    #[must_use]
    pub const fn total(&self) -> u64 {
        self.pending + self.running + self.done + self.error
    }

    pub fn add(&mut self, status: QueueStatus, count: u64) {
        match status {
            QueueStatus::Pending => self.pending += count,
            QueueStatus::Running => self.running += count,
            QueueStatus::Done => self.done += count,
            QueueStatus::Error => self.error += count,
        }
    }
}
