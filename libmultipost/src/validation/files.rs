//! File checks shared by every adapter
//!
//! One idiom for all websites: each file slated for upload is compared with
//! the website's accepted formats and byte ceiling. Oversized images the
//! scaler can shrink produce a warning, everything else a problem.

use crate::types::{FileRecord, FileType, ValidationParts};
use crate::validation::ValidationInput;
use crate::websites::{WebsiteAdapter, MB};

pub const FALLBACK_REQUIRED: &str = "A fallback file is required.";

/// Mimetypes the image scaler can re-encode
const SCALABLE_MIMETYPES: [&str; 6] = [
    "image/png",
    "image/jpeg",
    "image/jpg",
    "image/bmp",
    "image/tiff",
    "image/webp",
];

pub fn is_scalable_image(file: &FileRecord) -> bool {
    file.file_type == FileType::Image
        && SCALABLE_MIMETYPES.contains(&file.mimetype.to_lowercase().as_str())
}

/// Whether `file` matches one of the accepted entries; empty accepts all
///
/// Entries are extensions (`png`), mimetypes (`image/png`) or families
/// (`image/*`).
pub fn is_accepted(accepts: &[&str], file: &FileRecord) -> bool {
    if accepts.is_empty() {
        return true;
    }

    let mimetype = file.mimetype.to_lowercase();
    let extension = file.extension();
    accepts.iter().any(|entry| {
        let entry = entry.to_lowercase();
        match entry.strip_suffix("/*") {
            Some(family) => mimetype.split('/').next() == Some(family),
            None if entry.contains('/') => mimetype == entry,
            None => extension.as_deref() == Some(entry.as_str()),
        }
    })
}

/// Human size in whole or tenth megabytes
pub fn megabytes(bytes: u64) -> String {
    if bytes % MB == 0 {
        format!("{}", bytes / MB)
    } else {
        format!("{:.1}", bytes as f64 / MB as f64)
    }
}

pub fn unsupported_format(adapter_name: &str, file: &FileRecord) -> String {
    format!(
        "{} does not support file format: ({}) {}.",
        adapter_name, file.name, file.mimetype
    )
}

/// Validate every file the account would upload
pub fn check_files<A: WebsiteAdapter + ?Sized>(adapter: &A, input: &ValidationInput) -> ValidationParts {
    let mut parts = ValidationParts::default();
    let website = adapter.id();
    let capabilities = adapter.capabilities();
    let account_id = input.part.account_id.as_str();

    let Some(primary) = &input.submission.primary else {
        parts.problem("Submission has no primary file.");
        return parts;
    };

    if !primary.is_ignored_for(account_id) {
        if is_accepted(&capabilities.accepts_files, primary) {
            check_size(adapter, primary, input.options.auto_scale, &mut parts);
        } else if primary.file_type == FileType::Text {
            match &input.submission.fallback {
                Some(fallback) => {
                    parts.warning(format!(
                        "{} will be posted using the fallback text ({}).",
                        primary.name, fallback.name
                    ));
                    check_size(adapter, fallback, false, &mut parts);
                }
                None => {
                    parts.problem(unsupported_format(website.display_name(), primary));
                    parts.problem(FALLBACK_REQUIRED);
                }
            }
        } else {
            parts.problem(unsupported_format(website.display_name(), primary));
        }
    }

    let additional: Vec<&FileRecord> = input
        .submission
        .additional
        .iter()
        .filter(|file| !file.is_ignored_for(account_id))
        .collect();

    if !additional.is_empty() && !capabilities.accepts_additional_files {
        parts.warning(format!(
            "{} does not accept additional files; they will not be posted.",
            website.display_name()
        ));
        return parts;
    }

    for file in additional {
        if is_accepted(&capabilities.accepts_files, file) {
            check_size(adapter, file, input.options.auto_scale, &mut parts);
        } else {
            parts.problem(unsupported_format(website.display_name(), file));
        }
    }

    parts
}

fn check_size<A: WebsiteAdapter + ?Sized>(
    adapter: &A,
    file: &FileRecord,
    auto_scale: bool,
    parts: &mut ValidationParts,
) {
    let Some(ceiling) = adapter.scaling_options(file).map(|s| s.max_size) else {
        return;
    };

    if file.size <= ceiling {
        return;
    }

    if auto_scale && is_scalable_image(file) {
        parts.warning(format!(
            "{} will be scaled down to {}MB",
            file.name,
            megabytes(ceiling)
        ));
    } else {
        parts.problem(format!(
            "{} limits {} to {}MB",
            adapter.id().display_name(),
            file.mimetype,
            megabytes(ceiling)
        ));
    }
}
