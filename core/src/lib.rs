//! Bale Core - Foundational Types
//!
//! Error taxonomy, configuration and event emission shared by the
//! bale runtime and CLI.

pub mod config;
pub mod error;
pub mod event;

// Re-export commonly used types
pub use config::{BaleConfig, GcConfig, LogLevel, UnpackConfig};
pub use error::{BaleError, ErrorKind, GcPhase, Result};
pub use event::{EventEmitter, EventPayload, GcEvent};

/// Bale version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
