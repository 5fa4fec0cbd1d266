//! Validation engine
//!
//! Validation is pure: it inspects a submission and its parts, reads cached
//! account information and reports per-account [`ValidationParts`]. Problems
//! block posting; warnings describe what will be adjusted automatically.
//! Results are recomputed on every call.

use std::collections::HashMap;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::WebsiteError;
use crate::registry::AdapterRegistry;
use crate::submission::form_content;
use crate::types::{
    DefaultOptions, Submission, SubmissionPart, SubmissionRating, SubmissionType, ValidationParts,
};
use crate::websites::{unsupported_rating, WebsiteAdapter};

pub mod files;

pub const MISSING_DEFAULT_PART: &str = "Submission has no default part.";

/// Effective values for one account, merged from the default part
#[derive(Debug, Clone)]
pub struct ValidationInput {
    pub submission: Submission,
    pub part: SubmissionPart,
    pub default_part: SubmissionPart,
    pub title: String,
    pub tags: Vec<String>,
    /// Raw (unrendered) description
    pub description: String,
    pub rating: Option<SubmissionRating>,
    pub sources: Vec<String>,
    /// Shared options of the account's part
    pub options: DefaultOptions,
}

impl ValidationInput {
    pub fn new(
        submission: &Submission,
        default_part: &SubmissionPart,
        part: &SubmissionPart,
    ) -> Result<Self, WebsiteError> {
        let defaults = default_part.default_options()?;
        let options = part.default_options()?;

        Ok(Self {
            title: form_content::get_title(submission, &defaults, &options),
            tags: form_content::get_tags(&defaults.tags, &options.tags),
            description: form_content::get_description(&defaults.description, &options.description),
            rating: form_content::get_rating(submission, &defaults, &options),
            sources: form_content::get_sources(submission, &defaults, &options),
            submission: submission.clone(),
            part: part.clone(),
            default_part: default_part.clone(),
            options,
        })
    }

    /// Decode the account part into an adapter's option struct
    pub fn options_as<U: DeserializeOwned>(&self) -> Result<U, WebsiteError> {
        self.part.options_as()
    }
}

pub struct ValidationEngine {
    registry: Arc<AdapterRegistry>,
    advertise: bool,
}

impl ValidationEngine {
    /// Engine that measures descriptions without the advertisement
    pub fn new(registry: Arc<AdapterRegistry>) -> Self {
        Self {
            registry,
            advertise: false,
        }
    }

    /// Measure descriptions with the advertisement where posting adds it
    pub fn with_advertisement(mut self, advertise: bool) -> Self {
        self.advertise = advertise;
        self
    }

    /// Validate every non-default part, keyed by account id
    pub fn validate(&self, submission: &Submission, parts: &[SubmissionPart]) -> HashMap<String, ValidationParts> {
        let default_part = parts.iter().find(|p| p.is_default);

        parts
            .iter()
            .filter(|p| !p.is_default)
            .map(|part| {
                let result = match default_part {
                    Some(default_part) => self.validate_part(submission, default_part, part),
                    None => {
                        let mut result = ValidationParts::default();
                        result.problem(MISSING_DEFAULT_PART);
                        result
                    }
                };
                debug!(
                    account = %part.account_id,
                    problems = result.problems.len(),
                    warnings = result.warnings.len(),
                    "Validated part"
                );
                (part.account_id.clone(), result)
            })
            .collect()
    }

    /// Every problem across all accounts, prefixed with the account id
    pub fn problems(&self, submission: &Submission, parts: &[SubmissionPart]) -> Vec<String> {
        let mut problems: Vec<String> = self
            .validate(submission, parts)
            .into_iter()
            .flat_map(|(account, result)| {
                result
                    .problems
                    .into_iter()
                    .map(move |problem| format!("{}: {}", account, problem))
            })
            .collect();
        problems.sort();
        problems
    }

    fn validate_part(
        &self,
        submission: &Submission,
        default_part: &SubmissionPart,
        part: &SubmissionPart,
    ) -> ValidationParts {
        let mut result = ValidationParts::default();

        let Some(website) = part.website else {
            result.problem(format!("Part for account {} has no website.", part.account_id));
            return result;
        };

        let adapter = match self.registry.get_adapter(website) {
            Ok(adapter) => adapter,
            Err(e) => {
                result.problem(e.to_string());
                return result;
            }
        };

        let input = match ValidationInput::new(submission, default_part, part) {
            Ok(input) => input,
            Err(e) => {
                result.problem(e.to_string());
                return result;
            }
        };

        self.check_common(adapter.as_ref(), &input, &mut result);

        let specific = match submission.submission_type {
            SubmissionType::File => adapter.validate_file_submission(&input),
            SubmissionType::Notification if adapter.capabilities().supports_notifications => {
                adapter.validate_notification_submission(&input)
            }
            SubmissionType::Notification => {
                result.problem(format!(
                    "{} does not support notifications.",
                    website.display_name()
                ));
                return result;
            }
        };
        result.merge(specific);
        result
    }

    /// Checks every website shares: title, rating support, description length
    fn check_common(&self, adapter: &dyn WebsiteAdapter, input: &ValidationInput, result: &mut ValidationParts) {
        let website = adapter.id();

        if input.title.trim().is_empty() {
            result.problem("Title is required.");
        }

        if let Some(rating) = input.rating {
            if adapter.rating_code(rating).is_none() {
                result.problem(unsupported_rating(website, rating));
            }
        }

        if let Some(max) = adapter.capabilities().max_description_length {
            let rendered = self
                .registry
                .render_description(adapter, &input.description, self.advertise);
            if rendered.chars().count() > max {
                result.warning(format!(
                    "{} description will be truncated to {} characters.",
                    website.display_name(),
                    max
                ));
            }
        }
    }
}
