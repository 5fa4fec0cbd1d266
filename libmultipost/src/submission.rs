//! Submissions, their parts, and the submission store boundary

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{MultipostError, Result};
use crate::types::{Submission, SubmissionPart};

/// Merging of default and per-account values
///
/// Every function takes the default part's value first and the account
/// part's value second.
pub mod form_content {
    use crate::types::{DefaultOptions, DescriptionData, Submission, SubmissionRating, TagData};

    /// `extend_default` puts the override's tags first, then the defaults
    pub fn get_tags(default: &TagData, part: &TagData) -> Vec<String> {
        if part.extend_default {
            part.value.iter().chain(default.value.iter()).cloned().collect()
        } else {
            part.value.clone()
        }
    }

    pub fn get_description(default: &DescriptionData, part: &DescriptionData) -> String {
        if part.overwrite_default {
            part.value.clone()
        } else {
            default.value.clone()
        }
    }

    pub fn get_title(submission: &Submission, default: &DefaultOptions, part: &DefaultOptions) -> String {
        non_blank(part.title.as_deref())
            .or_else(|| non_blank(default.title.as_deref()))
            .unwrap_or(&submission.title)
            .to_string()
    }

    pub fn get_rating(
        submission: &Submission,
        default: &DefaultOptions,
        part: &DefaultOptions,
    ) -> Option<SubmissionRating> {
        part.rating.or(default.rating).or(submission.rating)
    }

    /// Source URLs of the part, falling back to the defaults then the submission
    pub fn get_sources(submission: &Submission, default: &DefaultOptions, part: &DefaultOptions) -> Vec<String> {
        [&part.sources, &default.sources, &submission.sources]
            .into_iter()
            .find(|sources| !sources.is_empty())
            .cloned()
            .unwrap_or_default()
    }

    fn non_blank(value: Option<&str>) -> Option<&str> {
        value.filter(|v| !v.trim().is_empty())
    }
}

/// A submission together with all of its parts, as read from a bundle file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionBundle {
    pub submission: Submission,
    #[serde(default)]
    pub parts: Vec<SubmissionPart>,
}

impl SubmissionBundle {
    pub fn from_json(content: &str) -> Result<Self> {
        let mut bundle: SubmissionBundle = serde_json::from_str(content)
            .map_err(|e| MultipostError::InvalidInput(format!("Malformed submission bundle: {}", e)))?;
        bundle.attach_parts();
        Ok(bundle)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    pub fn default_part(&self) -> Option<&SubmissionPart> {
        self.parts.iter().find(|p| p.is_default)
    }

    /// Bundles may omit `submission_id` on parts; tie them to the submission
    fn attach_parts(&mut self) {
        for part in &mut self.parts {
            if part.submission_id.is_empty() {
                part.submission_id = self.submission.id.clone();
            }
        }
    }
}

#[async_trait]
pub trait SubmissionStore: Send + Sync {
    async fn get_submission(&self, id: &str) -> Option<Submission>;

    /// Every part of the submission, default part included
    async fn get_parts(&self, submission_id: &str) -> Vec<SubmissionPart>;
}

#[derive(Default)]
struct StoreState {
    submissions: HashMap<String, Submission>,
    parts: HashMap<String, Vec<SubmissionPart>>,
}

/// In-memory submission store
#[derive(Clone, Default)]
pub struct MemorySubmissionStore {
    state: Arc<RwLock<StoreState>>,
}

impl MemorySubmissionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_bundle(&self, bundle: SubmissionBundle) -> Result<()> {
        let id = bundle.submission.id.clone();
        self.insert_submission(bundle.submission)?;
        for part in bundle.parts {
            self.insert_part(SubmissionPart {
                submission_id: id.clone(),
                ..part
            })?;
        }
        Ok(())
    }

    pub fn insert_submission(&self, submission: Submission) -> Result<()> {
        let mut state = self.write()?;
        state.submissions.insert(submission.id.clone(), submission);
        Ok(())
    }

    /// Add or replace the part for `part.account_id`
    ///
    /// Fails when the submission is unknown: a part never outlives its
    /// submission.
    pub fn insert_part(&self, part: SubmissionPart) -> Result<()> {
        let mut state = self.write()?;
        if !state.submissions.contains_key(&part.submission_id) {
            return Err(MultipostError::NotFound(format!(
                "submission {}",
                part.submission_id
            )));
        }

        let parts = state.parts.entry(part.submission_id.clone()).or_default();
        parts.retain(|p| p.account_id != part.account_id);
        parts.push(part);
        Ok(())
    }

    /// Remove a submission and every part attached to it
    pub fn remove_submission(&self, id: &str) -> Result<bool> {
        let mut state = self.write()?;
        state.parts.remove(id);
        Ok(state.submissions.remove(id).is_some())
    }

    /// Remove every part posting to `account_id` (account deletion)
    pub fn remove_account_parts(&self, account_id: &str) -> Result<()> {
        let mut state = self.write()?;
        for parts in state.parts.values_mut() {
            parts.retain(|p| p.account_id != account_id);
        }
        Ok(())
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, StoreState>> {
        self.state
            .write()
            .map_err(|_| MultipostError::InvalidInput("Submission store is poisoned".to_string()))
    }
}

#[async_trait]
impl SubmissionStore for MemorySubmissionStore {
    async fn get_submission(&self, id: &str) -> Option<Submission> {
        self.state.read().ok()?.submissions.get(id).cloned()
    }

    async fn get_parts(&self, submission_id: &str) -> Vec<SubmissionPart> {
        self.state
            .read()
            .ok()
            .and_then(|state| state.parts.get(submission_id).cloned())
            .unwrap_or_default()
    }
}
