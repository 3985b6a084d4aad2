//! CLI command definitions and dispatch.

mod gc;
mod refs;
mod unpack;
mod version;

use std::path::Path;

use bale_core::{BaleConfig, LogLevel};
use bale_runtime::DirEngine;
use clap::{Parser, Subcommand};

/// bale: manage OCI image layouts.
#[derive(Parser)]
#[command(name = "bale", version, about)]
pub struct Cli {
    /// Log level when RUST_LOG is not set (debug, info, warn, error)
    #[arg(long, global = true)]
    pub log_level: Option<LogLevel>,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Subcommand)]
pub enum Command {
    /// Garbage collect unreferenced blobs in an image layout
    Gc(gc::GcArgs),
    /// Unpack a tagged image into a runtime bundle
    Unpack(unpack::UnpackArgs),
    /// List the references in an image layout
    Refs(refs::RefsArgs),
    /// Show version information
    Version(version::VersionArgs),
}

/// Open an existing image layout.
pub(crate) fn open_layout(path: &Path) -> Result<DirEngine, Box<dyn std::error::Error>> {
    let engine = DirEngine::open(path)?;
    Ok(engine)
}

/// Dispatch a parsed CLI to the appropriate command handler.
pub async fn dispatch(cli: Cli, config: BaleConfig) -> Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        Command::Gc(args) => gc::execute(args, &config).await,
        Command::Unpack(args) => unpack::execute(args, &config).await,
        Command::Refs(args) => refs::execute(args).await,
        Command::Version(args) => version::execute(args).await,
    }
}
