//! Lifecycle of one submission-account post
//!
//! ```text
//! Pending -> InFlight -> Succeeded | Failed | Cancelled
//! Pending -> Cancelled
//! ```
//!
//! Terminal states are final.

use std::collections::HashMap;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{MultipostError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PostState {
    Pending,
    InFlight,
    Succeeded,
    Failed,
    Cancelled,
}

impl PostState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PostState::Succeeded | PostState::Failed | PostState::Cancelled
        )
    }

    pub fn can_transition_to(&self, next: PostState) -> bool {
        matches!(
            (self, next),
            (PostState::Pending, PostState::InFlight)
                | (PostState::Pending, PostState::Cancelled)
                | (PostState::InFlight, PostState::Succeeded)
                | (PostState::InFlight, PostState::Failed)
                | (PostState::InFlight, PostState::Cancelled)
        )
    }
}

impl std::fmt::Display for PostState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            PostState::Pending => "pending",
            PostState::InFlight => "in_flight",
            PostState::Succeeded => "succeeded",
            PostState::Failed => "failed",
            PostState::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// States of every submission-account pair seen by the orchestrator
#[derive(Default)]
pub struct PostTracker {
    states: Mutex<HashMap<(String, String), PostState>>,
}

impl PostTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking a pair as `Pending`, unless it is already in flight
    pub fn begin(&self, submission_id: &str, account_id: &str) -> Result<()> {
        let mut states = self.lock()?;
        let key = (submission_id.to_string(), account_id.to_string());
        if states.get(&key) == Some(&PostState::InFlight) {
            return Err(MultipostError::InvalidInput(format!(
                "{} is already posting to {}",
                submission_id, account_id
            )));
        }
        states.insert(key, PostState::Pending);
        Ok(())
    }

    pub fn transition(&self, submission_id: &str, account_id: &str, next: PostState) -> Result<()> {
        let mut states = self.lock()?;
        let key = (submission_id.to_string(), account_id.to_string());
        let current = states.get(&key).copied().ok_or_else(|| {
            MultipostError::NotFound(format!("post of {} to {}", submission_id, account_id))
        })?;

        if !current.can_transition_to(next) {
            return Err(MultipostError::InvalidInput(format!(
                "Illegal post transition {} -> {}",
                current, next
            )));
        }

        debug!(submission = %submission_id, account = %account_id, from = %current, to = %next, "Post state");
        states.insert(key, next);
        Ok(())
    }

    pub fn state(&self, submission_id: &str, account_id: &str) -> Option<PostState> {
        self.states
            .lock()
            .ok()?
            .get(&(submission_id.to_string(), account_id.to_string()))
            .copied()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<(String, String), PostState>>> {
        self.states
            .lock()
            .map_err(|_| MultipostError::InvalidInput("Post tracker is poisoned".to_string()))
    }
}
