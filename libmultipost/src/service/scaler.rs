//! Image scaling seam
//!
//! Scaling itself lives outside the library. The orchestrator only decides
//! when a file must shrink and hands it to an [`ImageScaler`] together with
//! the website's byte ceiling.

use async_trait::async_trait;

use crate::error::WebsiteError;
use crate::types::{FilePayload, ScalingOptions};

#[async_trait]
pub trait ImageScaler: Send + Sync {
    /// Return `file` re-encoded to fit `options.max_size`
    async fn scale(&self, file: FilePayload, options: ScalingOptions) -> Result<FilePayload, WebsiteError>;
}

/// Scaler that hands files back untouched
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughScaler;

#[async_trait]
impl ImageScaler for PassthroughScaler {
    async fn scale(&self, file: FilePayload, _options: ScalingOptions) -> Result<FilePayload, WebsiteError> {
        Ok(file)
    }
}
