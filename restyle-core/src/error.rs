use thiserror::Error;

/// Everything that can go wrong between receiving a request and handing back an image.
#[derive(Debug, Error)]
pub enum GenerateError {
    /// The request is missing something the selected backend needs.
    #[error("{0}")]
    Validation(String),

    /// An image or mask payload could not be decoded.
    #[error("{0}")]
    Decode(String),

    /// The pipeline or hosted API failed, or answered with something unusable.
    #[error("{message}")]
    Backend {
        message: String,
        details: Option<String>,
    },
}

impl GenerateError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode(msg.into())
    }

    pub fn backend(msg: impl Into<String>) -> Self {
        Self::Backend {
            message: msg.into(),
            details: None,
        }
    }

    pub fn with_details(self, hint: impl Into<String>) -> Self {
        match self {
            Self::Backend { message, .. } => Self::Backend {
                message,
                details: Some(hint.into()),
            },
            other => other,
        }
    }

    /// HTTP status code this error maps to at the endpoint boundary.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::Validation(_) | Self::Decode(_) => 400,
            Self::Backend { .. } => 500,
        }
    }

    pub fn details(&self) -> Option<&str> {
        match self {
            Self::Backend { details, .. } => details.as_deref(),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, GenerateError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_errors_map_to_400() {
        assert_eq!(GenerateError::validation("Missing image data").http_status(), 400);
        assert_eq!(GenerateError::decode("bad base64").http_status(), 400);
    }

    #[test]
    fn backend_errors_map_to_500_and_keep_details() {
        let err = GenerateError::backend("boom").with_details("try again");
        assert_eq!(err.http_status(), 500);
        assert_eq!(err.to_string(), "boom");
        assert_eq!(err.details(), Some("try again"));
    }

    #[test]
    fn details_are_ignored_for_client_errors() {
        let err = GenerateError::validation("Missing mask data").with_details("ignored");
        assert_eq!(err.details(), None);
    }
}
