//! # tidemark-queue
//!
//! Ordered file-claim coordinator for the Tidemark ingestion queue.
//!
//! Tidemark streams objects from a shared object store into many worker
//! replicas. This crate guarantees that each object is processed exactly
//! once across the fleet, that processing proceeds in path-sorted order per
//! shard, and that crashed workers never block progress. All coordination
//! is layered on an external strongly-consistent coordination service
//! through the contract in `tidemark-core`.
//!
//! ## How it fits together
//!
//! A worker that has selected a candidate path:
//!
//! 1. asks [`OrderedQueue::bucket_for`] which shard the path belongs to;
//! 2. acquires the shard's lease via [`OrderedQueue::try_acquire_bucket`];
//! 3. drives [`FileClaim::set_processing`] to move the file into
//!    *Processing*, processes the bytes via external collaborators, then
//!    [`FileClaim::set_processed`] or [`FileClaim::set_failed`];
//! 4. releases the lease.
//!
//! Completed work leaves no per-file trace: each shard keeps a single
//! `processed` cursor recording the greatest path durably processed, and a
//! path at or below the cursor is already done.
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use tidemark_core::MemoryCluster;
//! use tidemark_queue::{ClaimOutcome, CommitOutcome, OrderedQueue, QueueConfig};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), tidemark_queue::QueueError> {
//! let cluster = MemoryCluster::new();
//! let session = Arc::new(cluster.session());
//! let queue = OrderedQueue::new(session, QueueConfig::new("/queues/events"))?;
//! queue.ensure_layout().await?;
//!
//! let mut claim = queue.claim("imports/part-00.parquet");
//! assert!(matches!(
//!     claim.set_processing().await?,
//!     ClaimOutcome::Claimed { .. }
//! ));
//! // ... download and ingest the object ...
//! assert!(matches!(claim.set_processed().await?, CommitOutcome::Committed));
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod bootstrap;
pub mod claim;
pub mod config;
pub mod error;
pub mod lease;
pub mod metadata;
pub mod metrics;
pub mod paths;
pub mod queue;
pub mod shard;

// Re-export main types at crate root
pub use claim::{
    CURSOR_RETRY_LIMIT, ClaimOutcome, CommitOutcome, FailOutcome, FencingToken, FileClaim,
};
pub use config::{ProcessorInfo, QueueConfig};
pub use error::{QueueError, Result};
pub use lease::{BucketLease, LeaseOutcome};
pub use metadata::{FileMetadata, MAX_NODE_PAYLOAD};
pub use paths::{QueuePaths, encode_node_name};
pub use queue::OrderedQueue;
pub use shard::bucket_for_path;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::claim::{ClaimOutcome, CommitOutcome, FailOutcome, FencingToken, FileClaim};
    pub use crate::config::{ProcessorInfo, QueueConfig};
    pub use crate::error::{QueueError, Result};
    pub use crate::lease::{BucketLease, LeaseOutcome};
    pub use crate::metadata::FileMetadata;
    pub use crate::paths::QueuePaths;
    pub use crate::queue::OrderedQueue;
}
