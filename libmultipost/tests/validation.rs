//! Validation scenarios across the built-in adapters

use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use libmultipost::registry::AdapterRegistry;
use libmultipost::transport::MockTransport;
use libmultipost::types::{
    FileRecord, Submission, SubmissionPart, SubmissionRating, SubmissionType, ValidationParts,
    WebsiteId,
};
use libmultipost::validation::files::FALLBACK_REQUIRED;
use libmultipost::validation::ValidationEngine;
use libmultipost::websites::{AccountInfo, Folder, MB};
use pretty_assertions::assert_eq;
use tempfile::TempDir;

fn registry() -> Arc<AdapterRegistry> {
    Arc::new(AdapterRegistry::with_defaults(Arc::new(MockTransport::new())))
}

/// Sparse file of `size` bytes
fn file(dir: &Path, name: &str, size: u64) -> FileRecord {
    let path = dir.join(name);
    File::create(&path).unwrap().set_len(size).unwrap();
    FileRecord::from_path(&path).unwrap()
}

fn parts(website: WebsiteId, default: serde_json::Value, account: serde_json::Value) -> Vec<SubmissionPart> {
    vec![
        SubmissionPart {
            submission_id: "s".to_string(),
            account_id: "default".to_string(),
            website: None,
            is_default: true,
            data: default,
        },
        SubmissionPart {
            submission_id: "s".to_string(),
            account_id: "acc".to_string(),
            website: Some(website),
            is_default: false,
            data: account,
        },
    ]
}

fn validate_one(
    registry: Arc<AdapterRegistry>,
    submission: &Submission,
    parts: &[SubmissionPart],
) -> ValidationParts {
    let engine = ValidationEngine::new(registry);
    engine.validate(submission, parts).remove("acc").unwrap()
}

fn file_submission(primary: FileRecord, rating: Option<SubmissionRating>) -> Submission {
    let mut submission = Submission::new(SubmissionType::File, "Fox");
    submission.primary = Some(primary);
    submission.rating = rating;
    submission
}

#[test]
fn test_oversized_png_is_scaled_with_warning() {
    let dir = TempDir::new().unwrap();
    let submission = file_submission(
        file(dir.path(), "fox.png", 30 * MB),
        Some(SubmissionRating::General),
    );
    let parts = parts(WebsiteId::FurAffinity, serde_json::json!({}), serde_json::json!({}));

    let result = validate_one(registry(), &submission, &parts);
    assert_eq!(result.problems, Vec::<String>::new());
    assert_eq!(result.warnings, vec!["fox.png will be scaled down to 10MB"]);
}

#[test]
fn test_oversized_png_without_auto_scale_is_a_problem() {
    let dir = TempDir::new().unwrap();
    let submission = file_submission(
        file(dir.path(), "fox.png", 30 * MB),
        Some(SubmissionRating::General),
    );
    let parts = parts(
        WebsiteId::FurAffinity,
        serde_json::json!({}),
        serde_json::json!({"auto_scale": false}),
    );

    let result = validate_one(registry(), &submission, &parts);
    assert_eq!(result.problems, vec!["Fur Affinity limits image/png to 10MB"]);
}

#[test]
fn test_size_ceiling_boundary() {
    let dir = TempDir::new().unwrap();
    let at_limit = file_submission(
        file(dir.path(), "fox.png", 10 * MB),
        Some(SubmissionRating::General),
    );
    let over_limit = file_submission(
        file(dir.path(), "big.png", 10 * MB + 1),
        Some(SubmissionRating::General),
    );
    let scaled = parts(WebsiteId::FurAffinity, serde_json::json!({}), serde_json::json!({}));
    let unscaled = parts(
        WebsiteId::FurAffinity,
        serde_json::json!({}),
        serde_json::json!({"auto_scale": false}),
    );

    let result = validate_one(registry(), &at_limit, &unscaled);
    assert_eq!(result, ValidationParts::default());

    let result = validate_one(registry(), &over_limit, &scaled);
    assert_eq!(result.problems, Vec::<String>::new());
    assert_eq!(result.warnings, vec!["big.png will be scaled down to 10MB"]);

    let result = validate_one(registry(), &over_limit, &unscaled);
    assert_eq!(result.problems, vec!["Fur Affinity limits image/png to 10MB"]);
    assert_eq!(result.warnings, Vec::<String>::new());
}

#[test]
fn test_oversized_gif_cannot_be_scaled() {
    let dir = TempDir::new().unwrap();
    let submission = file_submission(
        file(dir.path(), "loop.gif", 11 * MB),
        Some(SubmissionRating::General),
    );
    let parts = parts(WebsiteId::FurAffinity, serde_json::json!({}), serde_json::json!({}));

    let result = validate_one(registry(), &submission, &parts);
    assert_eq!(result.problems, vec!["Fur Affinity limits image/gif to 10MB"]);
    assert!(result.warnings.is_empty());
}

#[test]
fn test_unsupported_text_needs_fallback() {
    let dir = TempDir::new().unwrap();
    let story = file(dir.path(), "story.docx", 100);
    let submission = file_submission(story, Some(SubmissionRating::General));
    let parts = parts(
        WebsiteId::Derpibooru,
        serde_json::json!({"tags": {"value": ["pony", "art"]}}),
        serde_json::json!({}),
    );

    let result = validate_one(registry(), &submission, &parts);
    assert_eq!(result.problems.len(), 2);
    assert!(result.problems[0].starts_with("Derpibooru does not support file format: (story.docx)"));
    assert_eq!(result.problems[1], FALLBACK_REQUIRED);
}

#[test]
fn test_fallback_turns_text_problem_into_warning() {
    let dir = TempDir::new().unwrap();
    let mut submission = file_submission(
        file(dir.path(), "story.docx", 100),
        Some(SubmissionRating::General),
    );
    submission.fallback = Some(file(dir.path(), "story.txt", 50));
    let parts = parts(
        WebsiteId::Derpibooru,
        serde_json::json!({"tags": {"value": ["pony", "art"]}}),
        serde_json::json!({}),
    );

    let result = validate_one(registry(), &submission, &parts);
    assert_eq!(result.problems, Vec::<String>::new());
    assert_eq!(
        result.warnings,
        vec!["story.docx will be posted using the fallback text (story.txt)."]
    );
}

#[test]
fn test_rating_the_website_cannot_take() {
    let dir = TempDir::new().unwrap();
    let submission = file_submission(
        file(dir.path(), "fox.png", 10),
        Some(SubmissionRating::Extreme),
    );
    let parts = parts(WebsiteId::FurAffinity, serde_json::json!({}), serde_json::json!({}));

    let result = validate_one(registry(), &submission, &parts);
    assert_eq!(result.problems, vec!["Fur Affinity does not support rating: extreme"]);
}

#[test]
fn test_part_rating_overrides_submission_rating() {
    let dir = TempDir::new().unwrap();
    let submission = file_submission(file(dir.path(), "fox.png", 10), None);
    let parts = parts(
        WebsiteId::FurAffinity,
        serde_json::json!({}),
        serde_json::json!({"rating": "mature"}),
    );

    let result = validate_one(registry(), &submission, &parts);
    assert!(result.is_valid());
}

#[test]
fn test_long_mastodon_status_warns_about_truncation() {
    let dir = TempDir::new().unwrap();
    let submission = file_submission(
        file(dir.path(), "fox.png", 10),
        Some(SubmissionRating::General),
    );
    let long = format!("<p>{}</p>", "a".repeat(600));
    let parts = parts(
        WebsiteId::Mastodon,
        serde_json::json!({"description": {"value": long}}),
        serde_json::json!({}),
    );

    let result = validate_one(registry(), &submission, &parts);
    assert!(result.is_valid());
    assert!(result
        .warnings
        .contains(&"Mastodon description will be truncated to 500 characters.".to_string()));
}

#[test]
fn test_advertisement_counts_toward_truncation() {
    let dir = TempDir::new().unwrap();
    let submission = file_submission(
        file(dir.path(), "fox.png", 10),
        Some(SubmissionRating::General),
    );
    let near_limit = format!("<p>{}</p>", "a".repeat(480));
    let parts = parts(
        WebsiteId::Mastodon,
        serde_json::json!({"description": {"value": near_limit}}),
        serde_json::json!({}),
    );
    let truncated = "Mastodon description will be truncated to 500 characters.".to_string();

    let plain = validate_one(registry(), &submission, &parts);
    assert!(!plain.warnings.contains(&truncated));

    let advertised = ValidationEngine::new(registry())
        .with_advertisement(true)
        .validate(&submission, &parts)
        .remove("acc")
        .unwrap();
    assert!(advertised.is_valid());
    assert!(advertised.warnings.contains(&truncated));
}

#[test]
fn test_ignored_primary_is_not_checked() {
    let dir = TempDir::new().unwrap();
    let mut primary = file(dir.path(), "song.flac", 10);
    primary.ignored_accounts.push("acc".to_string());
    let submission = file_submission(primary, Some(SubmissionRating::General));
    let parts = parts(WebsiteId::FurAffinity, serde_json::json!({}), serde_json::json!({}));

    let result = validate_one(registry(), &submission, &parts);
    assert!(result.is_valid());
}

#[test]
fn test_results_follow_account_information() {
    let dir = TempDir::new().unwrap();
    let registry = registry();
    let submission = file_submission(
        file(dir.path(), "fox.png", 10),
        Some(SubmissionRating::General),
    );
    let parts = parts(
        WebsiteId::FurAffinity,
        serde_json::json!({}),
        serde_json::json!({"folders": ["7"]}),
    );

    let before = validate_one(registry.clone(), &submission, &parts);
    assert!(before.warnings.is_empty());

    registry
        .get_adapter(WebsiteId::FurAffinity)
        .unwrap()
        .account_info()
        .set(
            "acc",
            AccountInfo::Folders(vec![Folder {
                id: "5".to_string(),
                name: "Comics".to_string(),
            }]),
        );

    let after = validate_one(registry, &submission, &parts);
    assert_eq!(after.warnings, vec!["Folder 7 was not found on Fur Affinity."]);
}
