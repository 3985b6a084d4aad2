//! `bale gc` command: remove blobs no reference can reach.

use std::path::PathBuf;

use bale_core::BaleConfig;
use bale_runtime::{Collector, GcOptions, GcReport};
use clap::Args;
use tokio_util::sync::CancellationToken;

#[derive(Args)]
pub struct GcArgs {
    /// Path to the OCI image layout
    #[arg(long)]
    pub layout: PathBuf,

    /// Only list the blobs that would be removed
    #[arg(long)]
    pub dry_run: bool,
}

pub async fn execute(args: GcArgs, config: &BaleConfig) -> Result<(), Box<dyn std::error::Error>> {
    let engine = super::open_layout(&args.layout)?;
    let options = GcOptions {
        dry_run: args.dry_run || config.gc.dry_run,
    };

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    let watcher = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("Interrupted, stopping garbage collection...");
            on_interrupt.cancel();
        }
    });

    let result = Collector::new(&engine)
        .with_options(options)
        .with_cancellation(cancel)
        .run()
        .await;
    watcher.abort();

    let report = result?;
    println!("{}", summary(&report));
    Ok(())
}

fn summary(report: &GcReport) -> String {
    if report.dry_run {
        let mut lines = vec![format!("Would remove {} blob(s):", report.white.len())];
        lines.extend(report.white.iter().map(|digest| format!("  {digest}")));
        lines.join("\n")
    } else {
        format!(
            "Removed {} blob(s), kept {} reachable from {} reference(s)",
            report.deleted(),
            report.black.len(),
            report.roots.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_dry_run_lists_digests() {
        let report = GcReport {
            white: vec!["sha256:aa".to_string(), "sha256:bb".to_string()],
            dry_run: true,
            ..GcReport::default()
        };
        assert_eq!(
            summary(&report),
            "Would remove 2 blob(s):\n  sha256:aa\n  sha256:bb"
        );
    }

    #[test]
    fn test_summary_counts() {
        let report = GcReport {
            white: vec!["sha256:aa".to_string()],
            black: ["sha256:bb".to_string()].into_iter().collect(),
            ..GcReport::default()
        };
        assert_eq!(
            summary(&report),
            "Removed 1 blob(s), kept 1 reachable from 0 reference(s)"
        );
    }
}
