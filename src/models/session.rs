//! Crawl session audit record.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle state of a crawl session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Running,
    Completed,
    Failed,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        })
    }
}

/// One audit record per pipeline run. Finalized exactly once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrawlSession {
    pub session_id: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub status: SessionStatus,
    pub total_found: usize,
    pub new_count: usize,
    pub updated_count: usize,
    pub removed_count: usize,
    pub error_message: Option<String>,
}

/// Final counts of a successful reconciliation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionCounts {
    pub total_found: usize,
    pub new_count: usize,
    pub updated_count: usize,
    pub removed_count: usize,
}

impl CrawlSession {
    /// Start a new running session with a fresh id.
    pub fn start() -> Self {
        Self {
            session_id: Uuid::new_v4().to_string(),
            started_at: Utc::now(),
            completed_at: None,
            status: SessionStatus::Running,
            total_found: 0,
            new_count: 0,
            updated_count: 0,
            removed_count: 0,
            error_message: None,
        }
    }

    pub fn is_finalized(&self) -> bool {
        self.status != SessionStatus::Running
    }

    /// Finalize as completed. Returns `false` if already finalized.
    pub fn complete(&mut self, counts: SessionCounts) -> bool {
        if self.is_finalized() {
            return false;
        }
        self.status = SessionStatus::Completed;
        self.completed_at = Some(Utc::now());
        self.total_found = counts.total_found;
        self.new_count = counts.new_count;
        self.updated_count = counts.updated_count;
        self.removed_count = counts.removed_count;
        true
    }

    /// Finalize as failed. Counts stay at zero. Returns `false` if already finalized.
    pub fn fail(&mut self, message: impl fmt::Display) -> bool {
        if self.is_finalized() {
            return false;
        }
        self.status = SessionStatus::Failed;
        self.completed_at = Some(Utc::now());
        self.error_message = Some(message.to_string());
        true
    }
}
