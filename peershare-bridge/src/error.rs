//! Error types for the bridge.

use std::path::PathBuf;

use thiserror::Error;

/// A local or remote change that cannot be mapped onto the other side.
///
/// Any of these means the buffer and the shared document no longer agree
/// and the session must be resynchronized.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TranslationError {
    #[error("range {offset}+{length} exceeds document length {document_length}")]
    OutOfBounds {
        offset: u32,
        length: u32,
        document_length: u32,
    },
    #[error("unsupported delta entry: {0}")]
    UnsupportedDelta(String),
}

/// Errors reported by a collaboration session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("a session for room `{room}` is already active")]
    AlreadyActive { room: String },

    #[error("no session is active")]
    NotActive,

    #[error("room `{room}` batch {sequence_id:?}: {source}")]
    Translation {
        room: String,
        sequence_id: Option<u64>,
        #[source]
        source: TranslationError,
    },

    #[error("room `{room}` batch {sequence_id}: host rejected the edit after {attempts} attempts")]
    ApplyFailure {
        room: String,
        sequence_id: u64,
        attempts: u32,
    },

    #[error("room `{room}` batch {sequence_id}: expected buffer notification never arrived")]
    EchoTimeout { room: String, sequence_id: u64 },

    #[error("room `{room}`: connection error: {message}")]
    Connection { room: String, message: String },

    #[error("room `{room}`: connection closed ({code:?}): {reason}")]
    ConnectionClosed {
        room: String,
        code: Option<u16>,
        reason: String,
    },

    #[error("room `{room}`: buffer ({buffer_length} units) and shared document ({shared_length} units) differ")]
    Diverged {
        room: String,
        buffer_length: u32,
        shared_length: u32,
    },

    #[error("room `{room}`: failed to apply remote update: {message}")]
    RemoteUpdate { room: String, message: String },

    #[error("session driver stopped unexpectedly")]
    DriverGone,

    #[error("a session must be started from within a tokio runtime")]
    NoRuntime,
}

impl SessionError {
    /// Room the error belongs to, if any.
    pub fn room(&self) -> Option<&str> {
        match self {
            Self::AlreadyActive { room }
            | Self::Translation { room, .. }
            | Self::ApplyFailure { room, .. }
            | Self::EchoTimeout { room, .. }
            | Self::Connection { room, .. }
            | Self::ConnectionClosed { room, .. }
            | Self::Diverged { room, .. }
            | Self::RemoteUpdate { room, .. } => Some(room),
            Self::NotActive | Self::DriverGone | Self::NoRuntime => None,
        }
    }

    /// Batch the error belongs to, if any.
    pub fn sequence_id(&self) -> Option<u64> {
        match self {
            Self::Translation { sequence_id, .. } => *sequence_id,
            Self::ApplyFailure { sequence_id, .. } | Self::EchoTimeout { sequence_id, .. } => {
                Some(*sequence_id)
            }
            _ => None,
        }
    }

    /// Whether this error leaves the session desynchronized.
    pub fn desynchronizes(&self) -> bool {
        matches!(
            self,
            Self::Translation { .. } | Self::ApplyFailure { .. } | Self::Diverged { .. }
        )
    }
}

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid configuration: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_context() {
        let err = SessionError::ApplyFailure {
            room: "r".into(),
            sequence_id: 7,
            attempts: 5,
        };
        assert_eq!(err.room(), Some("r"));
        assert_eq!(err.sequence_id(), Some(7));
        assert!(err.desynchronizes());
        assert!(err.to_string().contains("after 5 attempts"));
    }

    #[test]
    fn test_echo_timeout_is_soft() {
        let err = SessionError::EchoTimeout {
            room: "r".into(),
            sequence_id: 3,
        };
        assert!(!err.desynchronizes());
        assert_eq!(SessionError::NotActive.room(), None);
    }

    #[test]
    fn test_translation_display() {
        let err = TranslationError::OutOfBounds {
            offset: 4,
            length: 3,
            document_length: 5,
        };
        assert_eq!(err.to_string(), "range 4+3 exceeds document length 5");
    }
}
