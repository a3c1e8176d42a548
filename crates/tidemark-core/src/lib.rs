//! # tidemark-core
//!
//! Core abstractions for the Tidemark ordered ingestion queue.
//!
//! This crate provides the foundational types used across all Tidemark
//! components:
//!
//! - **Coordinator Contract**: The capability set required from the
//!   coordination service (hierarchical versioned nodes, ephemerals,
//!   atomic multi-requests, sessions), plus an in-memory implementation
//!   for tests
//! - **Error Types**: Shared error definitions and result types
//! - **Observability**: Structured logging bootstrap and span helpers
//!
//! ## Crate Boundary
//!
//! `tidemark-core` is the only crate allowed to define shared primitives.
//! The queue coordinator in `tidemark-queue` builds exclusively on the
//! contract defined here; it never talks to a concrete coordination
//! service directly.
//!
//! ## Example
//!
//! ```rust
//! use tidemark_core::prelude::*;
//!
//! let cluster = MemoryCluster::new();
//! let session = cluster.session();
//! assert!(session.is_alive());
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod coordinator;
pub mod error;
pub mod observability;

/// Prelude module for convenient imports.
///
/// # Example
///
/// ```rust
/// use tidemark_core::prelude::*;
/// ```
pub mod prelude {
    pub use crate::coordinator::{
        ANY_VERSION, CheckOutcome, Coordinator, CreateOutcome, MemoryCluster, MemorySession,
        NodeMode, RemoveOutcome, SetOutcome, TxnError, TxnOp, TxnOpResult, TxnOutcome,
        VersionedPayload,
    };
    pub use crate::error::{Error, Result};
    pub use crate::observability::{LogFormat, init_logging};
}

// Re-export key types at crate root for ergonomics
pub use coordinator::{
    ANY_VERSION, CheckOutcome, Coordinator, CreateOutcome, MemoryCluster, MemorySession, NodeMode,
    RemoveOutcome, SetOutcome, TxnError, TxnOp, TxnOpResult, TxnOutcome, VersionedPayload,
};
pub use error::{Error, Result};
pub use observability::{LogFormat, init_logging};
