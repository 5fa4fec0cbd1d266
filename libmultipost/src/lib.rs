//! Multipost - post one submission to many art and social websites
//!
//! This library holds the website adapters, the description and tag
//! pipelines, submission validation and the posting service.

pub mod accounts;
pub mod cancel;
pub mod config;
pub mod description;
pub mod error;
pub mod logging;
pub mod registry;
pub mod service;
pub mod submission;
pub mod tags;
pub mod transport;
pub mod types;
pub mod validation;
pub mod websites;

// Re-export commonly used types
pub use accounts::{Account, AccountStore, MemoryAccountStore};
pub use config::Config;
pub use error::{MultipostError, Result, WebsiteError};
pub use registry::AdapterRegistry;
pub use service::MultipostService;
pub use submission::{MemorySubmissionStore, SubmissionBundle, SubmissionStore};
pub use types::{PostOutcome, PostResponse, Submission, SubmissionPart, ValidationParts, WebsiteId};
