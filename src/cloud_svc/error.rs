use crate::sandbox::SandboxError;

pub type Result<T> = std::result::Result<T, Error>;

/// Longest slice of a provider response body carried in an error
pub const MAX_BODY_EXCERPT: usize = 512;

#[derive(Debug)]
pub enum Error {
    /// The destination config is malformed or misses a required field
    Validation(String),
    /// The remote storage rejected the request
    Provider(String),
    /// An expected local (or mock) object is absent
    Filesystem(String),
    IOError(std::io::Error),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Validation(msg) => write!(f, "invalid provider config: {}", msg),
            Error::Provider(msg) => write!(f, "provider error: {}", msg),
            Error::Filesystem(msg) => write!(f, "filesystem error: {}", msg),
            Error::IOError(e) => write!(f, "provider io error: {}", e),
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Error::IOError(value)
    }
}

impl From<SandboxError> for Error {
    fn from(value: SandboxError) -> Self {
        match value {
            SandboxError::PathEscape(_) => Error::Validation(value.to_string()),
            SandboxError::MissingObject(_) => Error::Filesystem(value.to_string()),
            SandboxError::IOError(e) => Error::IOError(e),
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(value: reqwest::Error) -> Self {
        Error::Provider(excerpt(&value.to_string()))
    }
}

///
/// Caps a response body (or error text) at `MAX_BODY_EXCERPT` characters
///
pub fn excerpt(body: &str) -> String {
    if body.chars().count() <= MAX_BODY_EXCERPT {
        return body.to_string();
    }
    let mut capped: String = body.chars().take(MAX_BODY_EXCERPT).collect();
    capped.push_str("...");
    capped
}

#[cfg(test)]
mod tests {
    use super::{excerpt, MAX_BODY_EXCERPT};

    #[test]
    fn test_excerpt_caps_long_bodies() {
        let body = "x".repeat(MAX_BODY_EXCERPT * 3);
        let capped = excerpt(&body);
        assert_eq!(capped.len(), MAX_BODY_EXCERPT + 3);
        assert!(capped.ends_with("..."));
        assert_eq!(excerpt("short"), "short");
    }
}
