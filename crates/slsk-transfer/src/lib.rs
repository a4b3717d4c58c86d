//! # slsk-transfer
//!
//! The upload and download state machines, the per-chunk throttle
//! collaborator trait, and the raw transfer-socket wire protocol.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod download;
pub mod error;
pub mod governor;
pub mod registry;
pub mod socket;
pub mod upload;

pub use download::{DownloadSession, DownloadState};
pub use error::TransferError;
pub use governor::{ChunkContext, Governor, NoopGovernor};
pub use registry::TransferRegistry;
pub use socket::{read_chunk, recv_offset, send_offset, write_chunk};
pub use upload::{UploadSession, UploadState};
