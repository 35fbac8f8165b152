//! Graph Nodes
//!
//! This module defines the node entries that live in the graph's arena.
//! A node owns its ports, the boxed [`System`] that implements its
//! behavior, and its clock membership.

use smallvec::SmallVec;

use super::port::{InputId, OutputId};
use crate::system::System;

slotmap::new_key_type! {
    /// Arena key of a node.
    pub struct NodeId;
}

/// Identifier of one execution cycle.
///
/// Tokens are handed out by a strictly increasing counter and are never
/// reused, so a node stamped with the current token has already been
/// evaluated this cycle.
pub type UpdateToken = u64;

/// The token a node carries before its first evaluation.
pub const UT_NULL: UpdateToken = 0;

/// How a node relates to the execution manager that clocks the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Membership {
    /// Nothing managed reads from this node; it is never evaluated.
    #[default]
    Unmanaged,

    /// Managed because some managed node (transitively) reads from it.
    /// Re-derived from the topology whenever a connection changes.
    Derived,

    /// Registered with the manager by `start_managing`. Pinned until
    /// `stop_managing`.
    Direct,
}

impl Membership {
    /// Whether the node is clocked by the manager at all.
    pub fn is_managed(self) -> bool {
        !matches!(self, Self::Unmanaged)
    }
}

/// A node in the graph.
pub(crate) struct NodeEntry {
    /// Type name of the system, for diagnostics.
    name: &'static str,

    /// The behavior. Taken out while the node is being evaluated.
    pub(crate) system: Option<Box<dyn System>>,

    /// Inputs owned by this node, in creation order.
    pub(crate) inputs: SmallVec<[InputId; 4]>,

    /// Outputs owned by this node, in creation order.
    pub(crate) outputs: SmallVec<[OutputId; 4]>,

    membership: Membership,

    /// Must run every cycle while managed, even if nothing pulls from it.
    update_every_cycle: bool,

    /// Token of the last cycle that evaluated this node.
    token: UpdateToken,
}

impl NodeEntry {
    /// Create an unmanaged node without behavior or ports.
    pub(crate) fn new(name: &'static str) -> Self {
        Self {
            name,
            system: None,
            inputs: SmallVec::new(),
            outputs: SmallVec::new(),
            membership: Membership::Unmanaged,
            update_every_cycle: false,
            token: UT_NULL,
        }
    }

    pub(crate) fn name(&self) -> &'static str {
        self.name
    }

    pub(crate) fn membership(&self) -> Membership {
        self.membership
    }

    pub(crate) fn set_membership(&mut self, membership: Membership) {
        self.membership = membership;
    }

    pub(crate) fn is_managed(&self) -> bool {
        self.membership.is_managed()
    }

    pub(crate) fn updates_every_cycle(&self) -> bool {
        self.update_every_cycle
    }

    pub(crate) fn set_update_every_cycle(&mut self, always: bool) {
        self.update_every_cycle = always;
    }

    /// Stamp the node with `token`.
    ///
    /// Returns `false` if it already carried that token, i.e. it has
    /// already been evaluated in this cycle.
    pub(crate) fn stamp(&mut self, token: UpdateToken) -> bool {
        if self.token == token {
            return false;
        }
        self.token = token;
        true
    }
}

impl std::fmt::Debug for NodeEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeEntry")
            .field("name", &self.name)
            .field("inputs", &self.inputs.len())
            .field("outputs", &self.outputs.len())
            .field("membership", &self.membership)
            .field("update_every_cycle", &self.update_every_cycle)
            .field("token", &self.token)
            .finish()
    }
}
