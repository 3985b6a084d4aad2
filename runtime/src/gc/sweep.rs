//! Sweep phase: delete every blob outside the black set, then compact.

use std::collections::HashSet;

use bale_core::error::{BaleError, GcPhase, Result};
use bale_core::event::{EventEmitter, EventPayload};
use tokio_util::sync::CancellationToken;

use crate::cas::Engine;

/// Digests in `inventory` that are not in `black`, in inventory order.
pub fn white_set(inventory: &[String], black: &HashSet<String>) -> Vec<String> {
    inventory
        .iter()
        .filter(|digest| !black.contains(*digest))
        .cloned()
        .collect()
}

/// Deletes unreachable blobs from an engine.
pub struct Sweeper<'a> {
    engine: &'a dyn Engine,
    events: Option<&'a EventEmitter>,
    cancel: Option<&'a CancellationToken>,
}

impl<'a> Sweeper<'a> {
    pub fn new(engine: &'a dyn Engine) -> Self {
        Self {
            engine,
            events: None,
            cancel: None,
        }
    }

    pub fn with_events(mut self, events: Option<&'a EventEmitter>) -> Self {
        self.events = events;
        self
    }

    pub fn with_cancellation(mut self, cancel: Option<&'a CancellationToken>) -> Self {
        self.cancel = cancel;
        self
    }

    /// List the inventory and compute what a sweep would delete.
    pub async fn plan(&self, black: &HashSet<String>) -> Result<Vec<String>> {
        let inventory = self
            .engine
            .list_blobs()
            .await
            .map_err(|e| e.in_phase(GcPhase::Sweep, "list blobs"))?;
        Ok(white_set(&inventory, black))
    }

    /// Delete every blob not in `black`, returning the deleted digests.
    ///
    /// The first failed deletion aborts the sweep; blobs deleted before it
    /// stay deleted.
    pub async fn sweep(&self, black: &HashSet<String>) -> Result<Vec<String>> {
        let white = self.plan(black).await?;
        let mut deleted = Vec::with_capacity(white.len());

        for digest in white {
            if self.cancel.is_some_and(|c| c.is_cancelled()) {
                return Err(BaleError::Aborted(format!(
                    "cancelled during sweep after {} deletion(s)",
                    deleted.len()
                ))
                .in_phase(GcPhase::Sweep, digest));
            }

            tracing::info!(digest = %digest, "GC: garbage collecting blob");
            self.engine
                .delete_blob(&digest)
                .await
                .map_err(|e| e.in_phase(GcPhase::Sweep, format!("remove unmarked blob {}", digest)))?;

            if let Some(emitter) = self.events {
                emitter.emit(EventPayload::Deleted {
                    digest: digest.clone(),
                });
            }
            deleted.push(digest);
        }

        Ok(deleted)
    }

    /// Run the engine's compaction hook.
    pub async fn compact(&self) -> Result<()> {
        self.engine
            .gc()
            .await
            .map_err(|e| e.in_phase(GcPhase::Compaction, "engine gc"))?;

        if let Some(emitter) = self.events {
            emitter.emit(EventPayload::Compacted);
        }
        Ok(())
    }
}
