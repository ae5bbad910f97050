//! HTTP/2 stream priority (RFC 7540 Section 5.3)
//!
//! The tree records dependencies and weights so they can be queried; it
//! does not drive output scheduling.

use super::error::{Error, ErrorCode, Result};
use super::stream::StreamId;
use std::collections::BTreeMap;
use tracing::trace;

/// Weight given to streams without explicit priority
pub const DEFAULT_WEIGHT: u16 = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Node {
    parent: StreamId,
    weight: u16,
}

/// Stream dependency tree rooted at stream 0
#[derive(Debug, Default)]
pub struct PriorityTree {
    nodes: BTreeMap<StreamId, Node>,
}

impl PriorityTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `stream_id` depend on `parent`.
    ///
    /// A stream depending on itself, directly or through its descendants,
    /// is a connection PROTOCOL_ERROR. An unknown parent is created with
    /// default priority under the root. With `exclusive`, the parent's
    /// existing children move under `stream_id`.
    pub fn add(&mut self, stream_id: StreamId, parent: StreamId, weight: u16, exclusive: bool) -> Result<()> {
        if parent == stream_id || self.has_parent(parent, stream_id) {
            return Err(Error::connection(
                ErrorCode::ProtocolError,
                format!("stream {} cannot depend on {}", stream_id, parent),
            ));
        }

        if parent != 0 {
            self.nodes.entry(parent).or_insert(Node {
                parent: 0,
                weight: DEFAULT_WEIGHT,
            });
        }

        if exclusive {
            for child in self.children_of(parent) {
                if let Some(node) = self.nodes.get_mut(&child) {
                    node.parent = stream_id;
                }
            }
        }

        trace!(stream_id, parent, weight, exclusive, "priority updated");
        self.nodes.insert(stream_id, Node { parent, weight });
        Ok(())
    }

    /// True if `ancestor` appears anywhere above `child`
    pub fn has_parent(&self, child: StreamId, ancestor: StreamId) -> bool {
        let mut current = self.nodes.get(&child);
        let mut steps = 0;
        while let Some(node) = current {
            if node.parent == ancestor {
                return true;
            }
            // the add check keeps the tree acyclic; the bound is a backstop
            steps += 1;
            if steps > self.nodes.len() {
                return false;
            }
            current = self.nodes.get(&node.parent);
        }
        false
    }

    /// Ancestors of `child`, nearest first, excluding the root
    pub fn parents_of(&self, child: StreamId) -> Vec<StreamId> {
        let mut parents = Vec::new();
        let mut current = self.nodes.get(&child);
        while let Some(node) = current {
            if node.parent == 0 || parents.len() > self.nodes.len() {
                break;
            }
            parents.push(node.parent);
            current = self.nodes.get(&node.parent);
        }
        parents
    }

    /// Direct dependents of `parent`
    pub fn children_of(&self, parent: StreamId) -> Vec<StreamId> {
        self.nodes
            .iter()
            .filter(|(_, node)| node.parent == parent)
            .map(|(&id, _)| id)
            .collect()
    }

    /// Weight of a stream, if it is in the tree
    pub fn weight(&self, stream_id: StreamId) -> Option<u16> {
        self.nodes.get(&stream_id).map(|n| n.weight)
    }

    /// Direct parent of a stream, if it is in the tree
    pub fn parent(&self, stream_id: StreamId) -> Option<StreamId> {
        self.nodes.get(&stream_id).map(|n| n.parent)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
