//! Crate error type.
//!
//! Variants follow four families:
//! - invalid argument (caller error, nothing applied)
//! - malformed data (metadata blob rejected as a whole)
//! - range (no identifier emitted)
//! - collaborator failures (transport / storage), which the decision path logs and absorbs

use thiserror::Error;

/// Errors produced by `verdict`.
#[derive(Debug, Error)]
pub enum Error {
    /// A caller-supplied argument violated a precondition.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The metadata stream ended before a declared field was complete.
    #[error("truncated metadata: {0}")]
    Truncated(String),

    /// The metadata stream was readable but its content is invalid.
    #[error("malformed metadata: {0}")]
    MalformedMetadata(String),

    /// A required field of the model schema was absent or had the wrong type.
    #[error("missing or invalid metadata field `{0}`")]
    MissingField(&'static str),

    /// Identifier timestamp or payload outside representable bounds.
    #[error("identifier out of range: {0}")]
    IdRange(String),

    /// The OS entropy source failed.
    #[error("entropy source failed: {0}")]
    Entropy(String),

    /// Encoder or evaluator broke its contract (wrong output length, internal failure).
    #[error("scoring failed: {0}")]
    Scoring(String),

    /// Network collaborator failed (model fetch or tracking POST).
    #[error("transport error: {0}")]
    Transport(String),

    /// Persistence collaborator failed.
    #[error("storage error: {0}")]
    Storage(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Convenience alias used across the crate.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn invalid<T: Into<String>>(msg: T) -> Self {
        Error::InvalidArgument(msg.into())
    }

    pub fn malformed<T: Into<String>>(msg: T) -> Self {
        Error::MalformedMetadata(msg.into())
    }

    pub fn scoring<T: Into<String>>(msg: T) -> Self {
        Error::Scoring(msg.into())
    }

    pub fn transport<T: Into<String>>(msg: T) -> Self {
        Error::Transport(msg.into())
    }

    pub fn storage<T: Into<String>>(msg: T) -> Self {
        Error::Storage(msg.into())
    }

    /// Whether this is a caller error (nothing was applied).
    pub fn is_invalid_argument(&self) -> bool {
        matches!(self, Error::InvalidArgument(_))
    }

    /// Whether a metadata blob was rejected.
    pub fn is_malformed_data(&self) -> bool {
        matches!(
            self,
            Error::Truncated(_) | Error::MalformedMetadata(_) | Error::MissingField(_)
        )
    }

    /// Whether a collaborator (transport or storage) failed.
    pub fn is_collaborator(&self) -> bool {
        matches!(self, Error::Transport(_) | Error::Storage(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifiers_match_families() {
        assert!(Error::invalid("x").is_invalid_argument());
        assert!(Error::malformed("x").is_malformed_data());
        assert!(Error::MissingField("feature_names").is_malformed_data());
        assert!(Error::Truncated("key".into()).is_malformed_data());
        assert!(Error::transport("x").is_collaborator());
        assert!(Error::storage("x").is_collaborator());
        assert!(!Error::IdRange("x".into()).is_collaborator());
    }

    #[test]
    fn missing_field_names_the_field() {
        let e = Error::MissingField("feature_names");
        assert!(e.to_string().contains("feature_names"));
    }
}
