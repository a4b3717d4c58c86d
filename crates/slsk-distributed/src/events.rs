//! Lifecycle events the overlay emits as the tree shape changes.

/// A change to this client's position in the distributed-overlay tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DistributedEvent {
    /// A new parent was adopted.
    ParentAdopted {
        /// The parent's username.
        username: String,
        /// The advertised root of the branch the parent belongs to.
        branch_root: String,
    },
    /// The current parent disconnected or was dropped.
    ParentDisconnected {
        /// The parent's username.
        username: String,
    },
    /// This client became the root of its own branch (no parent, and the
    /// promotion delay elapsed with no replacement found).
    PromotedToBranchRoot,
    /// This client adopted a parent after having been a branch root.
    DemotedFromBranchRoot {
        /// The newly adopted parent.
        username: String,
    },
    /// A child connected and was added to the tree.
    ChildAdded {
        /// The child's username.
        username: String,
    },
    /// A child disconnected.
    ChildDisconnected {
        /// The child's username.
        username: String,
    },
    /// The whole distributed network was reset (e.g. after a server
    /// reconnect); all parent and child state was cleared.
    DistributedNetworkReset,
}
