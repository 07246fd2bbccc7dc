//! Source image identity.

use std::fmt;

use url::Url;

use super::error::DomainError;

/// A parsed, absolute http(s) URL naming the original image.
///
/// The textual form returned by [`SourceUrl::as_str`] is the identity used for
/// cache keys, in-flight tracking and filesystem hashing, so it is always the
/// normalized serialization produced by the `url` crate.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SourceUrl(Url);

impl SourceUrl {
    pub fn parse(raw: &str) -> Result<Self, DomainError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(DomainError::EmptyUrl);
        }

        let url = Url::parse(trimmed).map_err(|err| DomainError::MalformedUrl {
            url: trimmed.to_string(),
            reason: err.to_string(),
        })?;

        match url.scheme() {
            "http" | "https" => {}
            other => {
                return Err(DomainError::UnsupportedScheme {
                    scheme: other.to_string(),
                });
            }
        }

        if url.host_str().is_none_or(str::is_empty) {
            return Err(DomainError::MalformedUrl {
                url: trimmed.to_string(),
                reason: "missing host".to_string(),
            });
        }

        Ok(Self(url))
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    /// Path component of the URL, always starting with `/`.
    pub fn path(&self) -> &str {
        self.0.path()
    }

    /// Lower-cased file extension of the last path segment, if any.
    pub fn extension(&self) -> Option<String> {
        let segment = self.0.path_segments()?.next_back()?;
        let (stem, ext) = segment.rsplit_once('.')?;
        if stem.is_empty() || ext.is_empty() || ext.len() > 8 {
            return None;
        }
        ext.chars()
            .all(|c| c.is_ascii_alphanumeric())
            .then(|| ext.to_ascii_lowercase())
    }
}

impl fmt::Display for SourceUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
