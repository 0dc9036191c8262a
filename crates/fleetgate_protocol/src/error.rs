//! Error types for the protocol crate.

use thiserror::Error;

/// Result type for protocol operations.
pub type FrameResult<T> = Result<T, FrameError>;

/// Errors raised while recovering or interpreting an agent request body.
#[derive(Error, Debug)]
pub enum FrameError {
    /// The body declared `Content-Encoding: gzip` but is not a gzip stream.
    #[error("failed to decompress gzip body: {0}")]
    Gzip(#[source] std::io::Error),

    /// The body declared `Content-Encoding: deflate` but neither zlib nor
    /// raw deflate framing could be reversed.
    #[error("failed to decompress deflate body: {0}")]
    Deflate(#[source] std::io::Error),

    /// The decoded body does not match the expected message schema.
    #[error("malformed message: {0}")]
    Malformed(String),

    /// An unrecognised tag (policy, rule type, vote type or mode).
    #[error("unknown {kind} tag: {value:?}")]
    UnknownTag {
        /// Which kind of tag was being parsed.
        kind: &'static str,
        /// The offending input.
        value: String,
    },
}

impl FrameError {
    /// Creates an unknown-tag error.
    pub fn unknown_tag(kind: &'static str, value: impl Into<String>) -> Self {
        Self::UnknownTag {
            kind,
            value: value.into(),
        }
    }

    /// Returns true if the error was caused by the body framing.
    pub fn is_decode_failure(&self) -> bool {
        matches!(self, FrameError::Gzip(_) | FrameError::Deflate(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_classification() {
        let io = std::io::Error::new(std::io::ErrorKind::InvalidData, "bad header");
        assert!(FrameError::Gzip(io).is_decode_failure());
        assert!(!FrameError::unknown_tag("policy", "MAYBE").is_decode_failure());
    }

    #[test]
    fn error_display() {
        let msg = FrameError::unknown_tag("rule type", "HASH").to_string();
        assert!(msg.contains("rule type"));
        assert!(msg.contains("HASH"));
    }
}
