//! Mark-and-sweep garbage collection for a CAS engine.
//!
//! The root set is every reference in the engine plus any descriptor the
//! engine pins outside of its references. Everything reachable
//! from a root by following descriptors is kept; every other blob is
//! deleted, after which the engine is asked to compact itself.
//!
//! ```text
//! Init ─► RootsGathered ─► Marked ─► Swept ─► Compacted ─► Done
//!   │           │             │         │          │
//!   └───────────┴─────────────┴─────────┴──────────┴──► Failed
//! ```
//!
//! References and blobs are listed once, at the start of their phase.
//! The collector assumes it is the only writer for the duration of the
//! run; concurrent tagging or blob writes can lead to live data being
//! deleted. Nothing is deleted until every root has been marked.

mod mark;
mod sweep;
mod walker;

use std::collections::{BTreeSet, HashSet};

use bale_core::error::{BaleError, GcPhase, Result};
use bale_core::event::{EventEmitter, EventPayload};
use tokio_util::sync::CancellationToken;

use crate::cas::Engine;
use crate::oci::Descriptor;

pub use mark::{reachable, Marker};
pub use sweep::{white_set, Sweeper};
pub use walker::{edges, Edges};

/// Collector progress. No state is entered twice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GcState {
    Init,
    RootsGathered,
    Marked,
    Swept,
    Compacted,
    Done,
    /// Terminal failure, with the phase and root or digest that failed
    Failed {
        phase: Option<GcPhase>,
        subject: Option<String>,
    },
}

/// Options for a collection run.
#[derive(Debug, Clone, Default)]
pub struct GcOptions {
    /// Stop after computing the white set; nothing is deleted or compacted.
    pub dry_run: bool,
}

/// A resolved root.
#[derive(Debug, Clone, PartialEq)]
pub struct Root {
    pub name: String,
    pub descriptor: Descriptor,
}

/// Outcome of a successful run.
#[derive(Debug, Clone, Default)]
pub struct GcReport {
    pub roots: Vec<Root>,
    /// Digests reachable from the roots
    pub black: BTreeSet<String>,
    /// Digests deleted (or, for a dry run, that would be deleted)
    pub white: Vec<String>,
    pub dry_run: bool,
}

impl GcReport {
    /// Number of blobs logically deleted.
    pub fn deleted(&self) -> usize {
        if self.dry_run {
            0
        } else {
            self.white.len()
        }
    }
}

/// Single-use garbage collector over an engine.
pub struct Collector<'a> {
    engine: &'a dyn Engine,
    options: GcOptions,
    events: Option<EventEmitter>,
    cancel: Option<CancellationToken>,
    state: GcState,
}

impl<'a> Collector<'a> {
    pub fn new(engine: &'a dyn Engine) -> Self {
        Self {
            engine,
            options: GcOptions::default(),
            events: None,
            cancel: None,
            state: GcState::Init,
        }
    }

    pub fn with_options(mut self, options: GcOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_events(mut self, events: EventEmitter) -> Self {
        self.events = Some(events);
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Current state.
    pub fn state(&self) -> GcState {
        self.state.clone()
    }

    /// Run the collection to completion.
    ///
    /// On failure the collector is left in [`GcState::Failed`] and the
    /// error names the phase and the root or digest being processed.
    pub async fn run(&mut self) -> Result<GcReport> {
        if self.state != GcState::Init {
            return Err(BaleError::InvalidArgument(format!(
                "collector already run (state {:?})",
                self.state
            )));
        }

        match self.run_phases().await {
            Ok(report) => {
                self.transition(GcState::Done);
                self.emit_completed(&report);
                tracing::info!(
                    deleted = report.deleted(),
                    retained = report.black.len(),
                    dry_run = report.dry_run,
                    "GC: garbage collected {} blobs",
                    report.deleted()
                );
                Ok(report)
            }
            Err(e) => {
                let from = self.state.clone();
                self.transition(GcState::Failed {
                    phase: e.phase(),
                    subject: e.subject().map(str::to_string),
                });
                tracing::warn!(state = ?from, error = %e, "GC failed");
                if let Some(emitter) = &self.events {
                    emitter.emit(EventPayload::failed(&e));
                }
                Err(e)
            }
        }
    }

    async fn run_phases(&mut self) -> Result<GcReport> {
        let roots = self.gather_roots().await?;
        self.transition(GcState::RootsGathered);

        let black = self.mark(&roots).await?;
        self.transition(GcState::Marked);

        let events = self.events.clone();
        let cancel = self.cancel.clone();
        let sweeper = Sweeper::new(self.engine)
            .with_events(events.as_ref())
            .with_cancellation(cancel.as_ref());

        let mut report = GcReport {
            roots,
            black: black.iter().cloned().collect(),
            white: Vec::new(),
            dry_run: self.options.dry_run,
        };

        if self.options.dry_run {
            report.white = sweeper.plan(&black).await?;
            return Ok(report);
        }

        report.white = sweeper.sweep(&black).await?;
        self.transition(GcState::Swept);

        sweeper.compact().await?;
        self.transition(GcState::Compacted);

        Ok(report)
    }

    /// List and resolve every reference, then add pinned descriptors not
    /// already covered. Any unresolvable root aborts the run.
    async fn gather_roots(&self) -> Result<Vec<Root>> {
        let names = self
            .engine
            .list_references()
            .await
            .map_err(|e| e.in_phase(GcPhase::RootResolution, "list references"))?;

        let mut roots = Vec::with_capacity(names.len());
        for name in names {
            let descriptor = self
                .engine
                .get_reference(&name)
                .await
                .map_err(|e| e.in_phase(GcPhase::RootResolution, format!("root {}", name)))?;

            tracing::debug!(name = %name, digest = %descriptor.digest, "GC: got reference");
            self.add_root(&mut roots, name, descriptor);
        }

        let pinned = self
            .engine
            .pinned_descriptors()
            .await
            .map_err(|e| e.in_phase(GcPhase::RootResolution, "list pinned descriptors"))?;
        let mut seen: HashSet<String> = roots.iter().map(|r| r.descriptor.digest.clone()).collect();
        for descriptor in pinned {
            if !seen.insert(descriptor.digest.clone()) {
                continue;
            }
            let name = descriptor
                .ref_name()
                .map(str::to_string)
                .unwrap_or_else(|| descriptor.digest.clone());
            tracing::debug!(name = %name, digest = %descriptor.digest, "GC: got pinned descriptor");
            self.add_root(&mut roots, name, descriptor);
        }

        Ok(roots)
    }

    fn add_root(&self, roots: &mut Vec<Root>, name: String, descriptor: Descriptor) {
        if let Some(emitter) = &self.events {
            emitter.emit(EventPayload::RootResolved {
                name: name.clone(),
                digest: descriptor.digest.clone(),
            });
        }
        roots.push(Root { name, descriptor });
    }

    /// Mark from every root in root order.
    async fn mark(&self, roots: &[Root]) -> Result<HashSet<String>> {
        let mut marker = Marker::new(self.engine)
            .with_events(self.events.as_ref())
            .with_cancellation(self.cancel.as_ref());

        for (idx, root) in roots.iter().enumerate() {
            tracing::debug!(digest = %root.descriptor.digest, "GC: marking from root");
            let label = format!("root {} ({})", idx, root.name);
            marker.mark(&label, &root.descriptor).await?;
        }

        if let Some(emitter) = &self.events {
            emitter.emit(EventPayload::MarkCompleted {
                black: marker.len(),
            });
        }

        Ok(marker.into_black())
    }

    fn transition(&mut self, next: GcState) {
        tracing::trace!(from = ?self.state, to = ?next, "GC state");
        self.state = next;
    }

    fn emit_completed(&self, report: &GcReport) {
        if let Some(emitter) = &self.events {
            emitter.emit(EventPayload::Completed {
                deleted: report.deleted(),
                retained: report.black.len(),
                dry_run: report.dry_run,
            });
        }
    }
}

/// Collect garbage in `engine` and return the number of deleted blobs.
pub async fn gc(engine: &dyn Engine) -> Result<usize> {
    let report = Collector::new(engine).run().await?;
    Ok(report.deleted())
}
