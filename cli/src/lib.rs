//! bale CLI - OCI image layout garbage collection and bundle unpacking.

pub mod commands;
pub mod output;
pub mod resolve;
