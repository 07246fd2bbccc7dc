use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("source url is empty")]
    EmptyUrl,
    #[error("source url `{url}` could not be parsed: {reason}")]
    MalformedUrl { url: String, reason: String },
    #[error("source url scheme `{scheme}` is not supported")]
    UnsupportedScheme { scheme: String },
    #[error("preset `{name}` is not configured")]
    UnknownPreset { name: String },
    #[error("domain validation failed: {message}")]
    Validation { message: String },
}

impl DomainError {
    pub fn unknown_preset(name: impl Into<String>) -> Self {
        Self::UnknownPreset { name: name.into() }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }
}
