//! # slsk-distributed
//!
//! The distributed search overlay: a tree of parent/child connections that
//! forwards search requests without requiring every client to dial every
//! other client.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod events;
pub mod overlay;

pub use error::DistributedError;
pub use events::DistributedEvent;
pub use overlay::{DistributedOverlay, ParentInfo};
