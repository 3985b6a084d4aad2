use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Phase of a garbage collection run, used to annotate failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GcPhase {
    /// Listing and resolving references into root descriptors
    RootResolution,
    /// Transitive marking from the root set
    Mark,
    /// Deleting unreachable blobs
    Sweep,
    /// Engine-level compaction after the sweep
    Compaction,
}

impl fmt::Display for GcPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RootResolution => write!(f, "root resolution"),
            Self::Mark => write!(f, "mark"),
            Self::Sweep => write!(f, "sweep"),
            Self::Compaction => write!(f, "compaction"),
        }
    }
}

/// Bale error types
#[derive(Error, Debug)]
pub enum BaleError {
    /// Reference or blob absent from the store
    #[error("Not found: {0}")]
    NotFound(String),

    /// Media type the decoder cannot interpret
    #[error("Unsupported schema: {media_type}")]
    UnsupportedSchema { media_type: String },

    /// Content does not hash to its digest, or does not parse as its schema
    #[error("Corrupt blob {digest}: {reason}")]
    CorruptBlob { digest: String, reason: String },

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// I/O error with the operation that produced it
    #[error("I/O error: {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    /// Cooperative cancellation observed mid-run
    #[error("Aborted: {0}")]
    Aborted(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Invalid caller input (bad mapping string, empty path, ...)
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Failure inside a garbage collection phase
    #[error("GC {phase} failed ({subject}): {source}")]
    Gc {
        phase: GcPhase,
        subject: String,
        #[source]
        source: Box<BaleError>,
    },
}

/// Coarse classification of a [`BaleError`], stable across context wrapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    UnsupportedSchema,
    CorruptBlob,
    Io,
    Aborted,
    Serialization,
    Config,
    InvalidArgument,
}

impl BaleError {
    /// Build an I/O error annotated with what was being attempted.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        BaleError::Io {
            context: context.into(),
            source,
        }
    }

    /// Wrap this error with the GC phase and the root or digest being processed.
    pub fn in_phase(self, phase: GcPhase, subject: impl Into<String>) -> Self {
        BaleError::Gc {
            phase,
            subject: subject.into(),
            source: Box::new(self),
        }
    }

    /// Kind of the innermost error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            BaleError::NotFound(_) => ErrorKind::NotFound,
            BaleError::UnsupportedSchema { .. } => ErrorKind::UnsupportedSchema,
            BaleError::CorruptBlob { .. } => ErrorKind::CorruptBlob,
            BaleError::IoError(_) | BaleError::Io { .. } => ErrorKind::Io,
            BaleError::Aborted(_) => ErrorKind::Aborted,
            BaleError::SerializationError(_) => ErrorKind::Serialization,
            BaleError::ConfigError(_) => ErrorKind::Config,
            BaleError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            BaleError::Gc { source, .. } => source.kind(),
        }
    }

    /// Phase of the outermost GC annotation, if any.
    pub fn phase(&self) -> Option<GcPhase> {
        match self {
            BaleError::Gc { phase, .. } => Some(*phase),
            _ => None,
        }
    }

    /// Root or digest named by the outermost GC annotation, if any.
    pub fn subject(&self) -> Option<&str> {
        match self {
            BaleError::Gc { subject, .. } => Some(subject),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for BaleError {
    fn from(err: serde_json::Error) -> Self {
        BaleError::SerializationError(err.to_string())
    }
}

impl From<serde_yaml::Error> for BaleError {
    fn from(err: serde_yaml::Error) -> Self {
        BaleError::SerializationError(err.to_string())
    }
}

/// Result type alias for bale operations
pub type Result<T> = std::result::Result<T, BaleError>;
