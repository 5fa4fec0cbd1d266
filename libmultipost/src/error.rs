//! Error types for Multipost

use thiserror::Error;

pub type Result<T> = std::result::Result<T, MultipostError>;

#[derive(Error, Debug)]
pub enum MultipostError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Website error: {0}")]
    Website(#[from] WebsiteError),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation failed: {}", .problems.join("; "))]
    ValidationFailed { problems: Vec<String> },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl MultipostError {
    /// Returns the appropriate exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            MultipostError::InvalidInput(_) | MultipostError::ValidationFailed { .. } => 3,
            MultipostError::Website(WebsiteError::Authentication(_)) => 2,
            MultipostError::Website(_) => 1,
            MultipostError::Config(_) => 1,
            MultipostError::NotFound(_) => 1,
            MultipostError::Io(_) => 1,
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}

/// Failures raised by a website adapter or the transport underneath it
#[derive(Error, Debug, Clone)]
pub enum WebsiteError {
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Non-2xx/3xx response or a transport-level error
    #[error("{message}")]
    Transport {
        message: String,
        status: Option<u16>,
        body: Option<String>,
    },

    /// 2xx response whose body signals a platform-level rejection
    #[error("{message}")]
    Protocol {
        message: String,
        body: Option<String>,
    },

    #[error("Invalid options: {0}")]
    InvalidOptions(String),

    #[error("Not supported: {0}")]
    NotSupported(String),

    #[error("Cancelled")]
    Cancelled,
}

impl WebsiteError {
    pub fn protocol(message: impl Into<String>, body: impl Into<String>) -> Self {
        WebsiteError::Protocol {
            message: message.into(),
            body: Some(body.into()),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, WebsiteError::Cancelled)
    }

    /// The offending response body, when the failure carries one
    pub fn body(&self) -> Option<&str> {
        match self {
            WebsiteError::Transport { body, .. } | WebsiteError::Protocol { body, .. } => {
                body.as_deref()
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_code_invalid_input() {
        let error = MultipostError::InvalidInput("Empty bundle".to_string());
        assert_eq!(error.exit_code(), 3);
    }

    #[test]
    fn test_exit_code_validation_failed() {
        let error = MultipostError::ValidationFailed {
            problems: vec!["A fallback file is required.".to_string()],
        };
        assert_eq!(error.exit_code(), 3);
    }

    #[test]
    fn test_exit_code_authentication_error() {
        let error = MultipostError::Website(WebsiteError::Authentication(
            "Session expired".to_string(),
        ));
        assert_eq!(error.exit_code(), 2);
    }

    #[test]
    fn test_exit_code_transport_error() {
        let error = MultipostError::Website(WebsiteError::Transport {
            message: "Bad gateway".to_string(),
            status: Some(502),
            body: None,
        });
        assert_eq!(error.exit_code(), 1);
    }

    #[test]
    fn test_validation_failed_formatting() {
        let error = MultipostError::ValidationFailed {
            problems: vec!["first".to_string(), "second".to_string()],
        };
        assert_eq!(error.to_string(), "Validation failed: first; second");
    }

    #[test]
    fn test_error_conversion_from_website_error() {
        let error: MultipostError = WebsiteError::Cancelled.into();
        match error {
            MultipostError::Website(WebsiteError::Cancelled) => {}
            other => panic!("Expected MultipostError::Website, got {:?}", other),
        }
    }

    #[test]
    fn test_website_error_body() {
        let error = WebsiteError::protocol("error_code present", "{\"error_code\":4}");
        assert_eq!(error.body(), Some("{\"error_code\":4}"));
        assert!(WebsiteError::Cancelled.body().is_none());
    }

    #[test]
    fn test_transport_error_displays_message_only() {
        let error = WebsiteError::Transport {
            message: "Weasyl responded with status 500".to_string(),
            status: Some(500),
            body: Some("<html>oops</html>".to_string()),
        };
        assert_eq!(error.to_string(), "Weasyl responded with status 500");
    }

    #[test]
    fn test_config_error_formatting() {
        let error = MultipostError::Config(ConfigError::MissingField("accounts".to_string()));
        assert_eq!(
            error.to_string(),
            "Configuration error: Missing required field: accounts"
        );
    }

    #[test]
    fn test_website_error_clone() {
        let original = WebsiteError::Authentication("expired".to_string());
        let cloned = original.clone();
        assert_eq!(original.to_string(), cloned.to_string());
    }
}
