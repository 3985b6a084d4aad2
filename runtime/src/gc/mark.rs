//! Mark phase: transitive closure over the descriptor graph.

use std::collections::HashSet;

use bale_core::error::{BaleError, GcPhase, Result};
use bale_core::event::{EventEmitter, EventPayload};
use tokio_util::sync::CancellationToken;

use super::walker::edges;
use crate::cas::Engine;
use crate::oci::{from_descriptor, Descriptor};

/// Accumulates the black set across one or more roots.
///
/// The walk is depth-first pre-order over an explicit stack, so arbitrarily
/// deep graphs do not grow the call stack. A digest is inserted into the
/// visited set before its blob is fetched; revisits (shared subtrees, or
/// cycles in a malformed store) return immediately.
pub struct Marker<'a> {
    engine: &'a dyn Engine,
    events: Option<&'a EventEmitter>,
    cancel: Option<&'a CancellationToken>,
    black: HashSet<String>,
    /// Descriptors in first-visit order
    visited: Vec<Descriptor>,
}

impl<'a> Marker<'a> {
    pub fn new(engine: &'a dyn Engine) -> Self {
        Self {
            engine,
            events: None,
            cancel: None,
            black: HashSet::new(),
            visited: Vec::new(),
        }
    }

    /// Emit a `gc.mark.visited` event per blob.
    pub fn with_events(mut self, events: Option<&'a EventEmitter>) -> Self {
        self.events = events;
        self
    }

    /// Abort between blob fetches once `cancel` fires.
    pub fn with_cancellation(mut self, cancel: Option<&'a CancellationToken>) -> Self {
        self.cancel = cancel;
        self
    }

    /// Mark everything reachable from `root`.
    ///
    /// Any failure to fetch or decode a reachable blob aborts marking. The
    /// error is annotated with `root_label` and the failing digest.
    pub async fn mark(&mut self, root_label: &str, root: &Descriptor) -> Result<()> {
        let mut stack = vec![root.clone()];

        while let Some(descriptor) = stack.pop() {
            if self.black.contains(&descriptor.digest) {
                continue;
            }

            if self.cancel.is_some_and(|c| c.is_cancelled()) {
                return Err(BaleError::Aborted("cancelled during mark".to_string())
                    .in_phase(GcPhase::Mark, format!("{}, blob {}", root_label, descriptor.digest)));
            }

            self.black.insert(descriptor.digest.clone());

            tracing::debug!(digest = %descriptor.digest, root = root_label, "gc.mark");

            let blob = from_descriptor(self.engine, &descriptor).await.map_err(|e| {
                e.in_phase(
                    GcPhase::Mark,
                    format!("{}, blob {}", root_label, descriptor.digest),
                )
            })?;

            let children = edges(&blob.payload);
            for child in &children {
                tracing::trace!(
                    digest = %descriptor.digest,
                    child = %child.digest,
                    "gc.mark recursing into child"
                );
            }

            if let Some(emitter) = self.events {
                emitter.emit(EventPayload::Visited {
                    root: root_label.to_string(),
                    digest: descriptor.digest.clone(),
                    children: children.len(),
                });
            }

            self.visited.push(descriptor);

            // Reverse so the first child is popped first.
            stack.extend(children.into_iter().rev());
        }

        Ok(())
    }

    /// Whether `digest` has been marked.
    pub fn is_marked(&self, digest: &str) -> bool {
        self.black.contains(digest)
    }

    /// Number of marked digests.
    pub fn len(&self) -> usize {
        self.black.len()
    }

    pub fn is_empty(&self) -> bool {
        self.black.is_empty()
    }

    /// Descriptors in the order they were first visited.
    pub fn visited(&self) -> &[Descriptor] {
        &self.visited
    }

    /// Consume the marker, yielding the black set.
    pub fn into_black(self) -> HashSet<String> {
        self.black
    }
}

/// Every descriptor transitively reachable from `descriptor`, itself
/// included, in first-visit order.
pub async fn reachable(engine: &dyn Engine, descriptor: &Descriptor) -> Result<Vec<Descriptor>> {
    let mut marker = Marker::new(engine);
    marker.mark(&descriptor.digest, descriptor).await?;
    Ok(marker.visited)
}
