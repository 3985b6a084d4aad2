//! Descriptor graph walker.
//!
//! Every schema record states which of its fields are edges by
//! implementing [`Edges`]. The walker never looks at fields a record does
//! not hand it, so annotations, platform records, image configuration
//! contents and layer bytes are skipped without inspection.
//!
//! Traversal rules, applied structurally:
//!
//! - a [`Descriptor`] is one edge; it is not descended into
//! - an empty `Option` contributes nothing
//! - a `Vec` contributes its elements' edges in order
//! - a record contributes its fields' edges in declaration order

use crate::oci::{Descriptor, Index, Manifest, Payload};

/// Direct children of a node in the blob graph.
pub trait Edges {
    /// Append this node's edges to `out`, in traversal order.
    fn collect_edges<'a>(&'a self, out: &mut Vec<&'a Descriptor>);
}

impl Edges for Descriptor {
    fn collect_edges<'a>(&'a self, out: &mut Vec<&'a Descriptor>) {
        out.push(self);
    }
}

impl<T: Edges> Edges for Option<T> {
    fn collect_edges<'a>(&'a self, out: &mut Vec<&'a Descriptor>) {
        if let Some(inner) = self {
            inner.collect_edges(out);
        }
    }
}

impl<T: Edges> Edges for Vec<T> {
    fn collect_edges<'a>(&'a self, out: &mut Vec<&'a Descriptor>) {
        for item in self {
            item.collect_edges(out);
        }
    }
}

impl<T: Edges + ?Sized> Edges for Box<T> {
    fn collect_edges<'a>(&'a self, out: &mut Vec<&'a Descriptor>) {
        (**self).collect_edges(out);
    }
}

impl Edges for Manifest {
    fn collect_edges<'a>(&'a self, out: &mut Vec<&'a Descriptor>) {
        self.config.collect_edges(out);
        self.layers.collect_edges(out);
        self.subject.collect_edges(out);
    }
}

impl Edges for Index {
    fn collect_edges<'a>(&'a self, out: &mut Vec<&'a Descriptor>) {
        self.manifests.collect_edges(out);
        self.subject.collect_edges(out);
    }
}

impl Edges for Payload {
    fn collect_edges<'a>(&'a self, out: &mut Vec<&'a Descriptor>) {
        match self {
            Payload::Manifest(manifest) => manifest.collect_edges(out),
            Payload::Index(index) => index.collect_edges(out),
            Payload::ImageConfig(_) | Payload::Layer => {}
        }
    }
}

/// Descriptors directly referenced by `node`, in traversal order.
pub fn edges<T: Edges + ?Sized>(node: &T) -> Vec<Descriptor> {
    let mut out = Vec::new();
    node.collect_edges(&mut out);
    out.into_iter().cloned().collect()
}
