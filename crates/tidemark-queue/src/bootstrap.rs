//! Layout bootstrap.
//!
//! Populates the queue root with the persistent directories the state
//! machine assumes exist, before any worker runs. Every create uses
//! `ignore_if_exists`, so running bootstrap any number of times leaves the
//! same coordinator state as running it once. Cursor nodes are created
//! lazily by the state machine, never here.

use bytes::Bytes;
use tidemark_core::{Coordinator, NodeMode};

use crate::error::Result;
use crate::paths::QueuePaths;

/// Idempotently creates the queue root (including its ancestors) and the
/// persistent directory layout for the configured bucket count.
///
/// # Errors
///
/// Returns a transient error when the coordinator connection failed.
pub async fn ensure_layout<C: Coordinator + ?Sized>(
    coordinator: &C,
    paths: &QueuePaths,
) -> Result<()> {
    for node in ancestors_and_self(paths.root()) {
        coordinator
            .create(&node, Bytes::new(), NodeMode::Persistent, true)
            .await?;
    }
    for dir in paths.bootstrap_dirs() {
        coordinator
            .create(&dir, Bytes::new(), NodeMode::Persistent, true)
            .await?;
    }
    tracing::debug!(root = paths.root(), buckets = paths.buckets(), "layout ready");
    Ok(())
}

/// Expands `/a/b/c` into `["/a", "/a/b", "/a/b/c"]`.
fn ancestors_and_self(root: &str) -> Vec<String> {
    let mut nodes = Vec::new();
    let mut current = String::new();
    for component in root.split('/').filter(|c| !c.is_empty()) {
        current.push('/');
        current.push_str(component);
        nodes.push(current.clone());
    }
    nodes
}
