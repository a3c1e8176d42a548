//! Coordinator client abstraction.
//!
//! This module defines the contract Tidemark requires from its coordination
//! service: hierarchical named nodes with byte payloads, per-node
//! monotonically increasing versions, persistent and ephemeral node modes,
//! atomic multi-request transactions with per-operation failure reporting,
//! and a session abstraction whose death removes the ephemerals created
//! within it.
//!
//! Protocol-level conditions (node exists, version mismatch, missing node)
//! are reported as enumerated outcomes, never as `Err`. Only connection-level
//! failures surface as [`Error::ConnectionLost`], and those terminate the
//! current attempt without asserting anything about in-flight operations.
//!
//! [`MemoryCluster`] provides the in-memory implementation used by tests.
//! It is also the executable reference for the contract above.
//!
//! [`Error::ConnectionLost`]: crate::error::Error::ConnectionLost

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::{Error, Result};

/// Version wildcard: matches any current version in `remove`, `set`, and
/// `check` requests.
pub const ANY_VERSION: i64 = -1;

/// Node creation mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeMode {
    /// The node outlives the session that created it.
    Persistent,
    /// The node is deleted automatically when its creator's session ends.
    Ephemeral,
}

/// A payload together with the node version it was read at.
#[derive(Debug, Clone)]
pub struct VersionedPayload {
    /// The node's payload bytes.
    pub payload: Bytes,
    /// The node's version as reported by the coordinator.
    pub version: i64,
}

/// One operation inside an atomic multi-request.
#[derive(Debug, Clone)]
pub enum TxnOp {
    /// Create a node.
    Create {
        /// Absolute node path.
        path: String,
        /// Initial payload.
        payload: Bytes,
        /// Persistent or ephemeral.
        mode: NodeMode,
        /// Treat an existing node as success instead of aborting.
        ignore_if_exists: bool,
    },
    /// Remove a node whose version matches `expected_version`
    /// (or any version when [`ANY_VERSION`]).
    Remove {
        /// Absolute node path.
        path: String,
        /// Required current version, or [`ANY_VERSION`].
        expected_version: i64,
    },
    /// Replace a node's payload, bumping its version.
    Set {
        /// Absolute node path.
        path: String,
        /// New payload.
        payload: Bytes,
        /// Required current version, or [`ANY_VERSION`].
        expected_version: i64,
    },
    /// Assert a node exists at the given version without mutating it.
    Check {
        /// Absolute node path.
        path: String,
        /// Required current version, or [`ANY_VERSION`].
        expected_version: i64,
    },
}

/// Why an individual transaction operation failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnError {
    /// A `Create` found the node already present.
    NodeExists,
    /// The node's current version did not match `expected_version`.
    BadVersion,
    /// The node (or a `Create`'s parent) does not exist.
    NoNode,
}

/// Per-operation result of a committed transaction.
#[derive(Debug, Clone)]
pub enum TxnOpResult {
    /// The node was created (or already existed under `ignore_if_exists`).
    Created,
    /// The node was removed.
    Removed,
    /// The payload was replaced; carries the new version.
    Set {
        /// Version of the node after the write.
        version: i64,
    },
    /// The check passed.
    Checked,
}

/// Outcome of an atomic multi-request.
///
/// Either every operation took effect, or none did and the index of the
/// first failing operation is reported.
#[derive(Debug, Clone)]
pub enum TxnOutcome {
    /// All operations took effect, in order.
    Committed(Vec<TxnOpResult>),
    /// No operation took effect.
    Aborted {
        /// Index of the first operation that failed.
        failed_index: usize,
        /// Why it failed.
        error: TxnError,
    },
}

/// Outcome of a standalone `create`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    /// The node was created.
    Created,
    /// A node already exists at this path.
    Exists,
}

/// Outcome of a standalone `remove`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoveOutcome {
    /// The node was removed.
    Removed,
    /// The node's version did not match.
    BadVersion,
    /// No node exists at this path.
    NoNode,
}

/// Outcome of a standalone `set`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetOutcome {
    /// The payload was replaced; carries the new version.
    Set {
        /// Version of the node after the write.
        version: i64,
    },
    /// The node's version did not match.
    BadVersion,
    /// No node exists at this path.
    NoNode,
}

/// Outcome of a standalone `check`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckOutcome {
    /// The node exists at the expected version.
    Matched,
    /// The node's version did not match.
    BadVersion,
    /// No node exists at this path.
    NoNode,
}

/// The capability set Tidemark needs from a coordination service.
///
/// Implementations are session-bound: ephemeral nodes created through a
/// client handle vanish when that handle's session ends. All handles are
/// expected to be shared behind `Arc` and used from multiple tasks.
///
/// The standalone operations have default implementations in terms of
/// [`submit`], so an implementation only has to provide the transaction
/// primitive and `get`.
///
/// [`submit`]: Coordinator::submit
#[async_trait]
pub trait Coordinator: Send + Sync {
    /// Submits an atomic multi-request.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionLost`] when the session or connection
    /// failed; the outcome of the transaction is then unknown.
    async fn submit(&self, ops: Vec<TxnOp>) -> Result<TxnOutcome>;

    /// Reads a node's payload and version, or `None` if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionLost`] when the session or connection
    /// failed.
    async fn get(&self, path: &str) -> Result<Option<VersionedPayload>>;

    /// Creates a single node.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionLost`] on connection failure, and
    /// [`Error::InvariantViolation`] if the create fails for a reason other
    /// than an existing node (e.g. a missing parent outside bootstrap).
    async fn create(
        &self,
        path: &str,
        payload: Bytes,
        mode: NodeMode,
        ignore_if_exists: bool,
    ) -> Result<CreateOutcome> {
        let op = TxnOp::Create {
            path: path.to_string(),
            payload,
            mode,
            ignore_if_exists,
        };
        match self.submit(vec![op]).await? {
            TxnOutcome::Committed(_) => Ok(CreateOutcome::Created),
            TxnOutcome::Aborted {
                error: TxnError::NodeExists,
                ..
            } => Ok(CreateOutcome::Exists),
            TxnOutcome::Aborted { error, .. } => Err(Error::invariant(format!(
                "unexpected create failure at {path}: {error:?}"
            ))),
        }
    }

    /// Removes a single node.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionLost`] on connection failure.
    async fn remove(&self, path: &str, expected_version: i64) -> Result<RemoveOutcome> {
        let op = TxnOp::Remove {
            path: path.to_string(),
            expected_version,
        };
        match self.submit(vec![op]).await? {
            TxnOutcome::Committed(_) => Ok(RemoveOutcome::Removed),
            TxnOutcome::Aborted {
                error: TxnError::BadVersion,
                ..
            } => Ok(RemoveOutcome::BadVersion),
            TxnOutcome::Aborted {
                error: TxnError::NoNode,
                ..
            } => Ok(RemoveOutcome::NoNode),
            TxnOutcome::Aborted { error, .. } => Err(Error::invariant(format!(
                "unexpected remove failure at {path}: {error:?}"
            ))),
        }
    }

    /// Replaces a single node's payload.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionLost`] on connection failure.
    async fn set(&self, path: &str, payload: Bytes, expected_version: i64) -> Result<SetOutcome> {
        let op = TxnOp::Set {
            path: path.to_string(),
            payload,
            expected_version,
        };
        match self.submit(vec![op]).await? {
            TxnOutcome::Committed(results) => match results.first() {
                Some(TxnOpResult::Set { version }) => Ok(SetOutcome::Set { version: *version }),
                other => Err(Error::invariant(format!(
                    "set at {path} committed with unexpected result: {other:?}"
                ))),
            },
            TxnOutcome::Aborted {
                error: TxnError::BadVersion,
                ..
            } => Ok(SetOutcome::BadVersion),
            TxnOutcome::Aborted {
                error: TxnError::NoNode,
                ..
            } => Ok(SetOutcome::NoNode),
            TxnOutcome::Aborted { error, .. } => Err(Error::invariant(format!(
                "unexpected set failure at {path}: {error:?}"
            ))),
        }
    }

    /// Asserts a node's version without mutating it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionLost`] on connection failure.
    async fn check(&self, path: &str, expected_version: i64) -> Result<CheckOutcome> {
        let op = TxnOp::Check {
            path: path.to_string(),
            expected_version,
        };
        match self.submit(vec![op]).await? {
            TxnOutcome::Committed(_) => Ok(CheckOutcome::Matched),
            TxnOutcome::Aborted {
                error: TxnError::BadVersion,
                ..
            } => Ok(CheckOutcome::BadVersion),
            TxnOutcome::Aborted {
                error: TxnError::NoNode,
                ..
            } => Ok(CheckOutcome::NoNode),
            TxnOutcome::Aborted { error, .. } => Err(Error::invariant(format!(
                "unexpected check failure at {path}: {error:?}"
            ))),
        }
    }
}

// ============================================================================
// MemoryCluster - in-memory coordinator for testing
// ============================================================================

/// In-memory coordinator cluster for testing.
///
/// Thread-safe via `Mutex`. Not suitable for production. Nodes carry numeric
/// versions starting at 0 on create; each `set` bumps the version by one.
/// Parent nodes must exist before children can be created, as in the real
/// service.
#[derive(Debug, Clone, Default)]
pub struct MemoryCluster {
    state: Arc<Mutex<ClusterState>>,
}

#[derive(Debug, Default)]
struct ClusterState {
    nodes: BTreeMap<String, NodeEntry>,
    live_sessions: HashSet<u64>,
    next_session: u64,
}

#[derive(Debug, Clone)]
struct NodeEntry {
    payload: Bytes,
    version: i64,
    ephemeral_owner: Option<u64>,
}

impl MemoryCluster {
    /// Creates a new empty cluster.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a new session against this cluster.
    ///
    /// # Panics
    ///
    /// Panics if the cluster mutex is poisoned (test-only type).
    #[must_use]
    pub fn session(&self) -> MemorySession {
        let mut state = self.state.lock().expect("cluster mutex poisoned");
        let id = state.next_session;
        state.next_session += 1;
        state.live_sessions.insert(id);
        MemorySession {
            state: Arc::clone(&self.state),
            id,
        }
    }

    /// Returns all node paths with the given prefix, sorted.
    ///
    /// Observer helper for assertions; bypasses sessions entirely.
    ///
    /// # Panics
    ///
    /// Panics if the cluster mutex is poisoned (test-only type).
    #[must_use]
    pub fn paths_with_prefix(&self, prefix: &str) -> Vec<String> {
        let state = self.state.lock().expect("cluster mutex poisoned");
        state
            .nodes
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect()
    }

    /// Returns a node's payload, or `None` if it does not exist.
    ///
    /// Observer helper for assertions; bypasses sessions entirely.
    ///
    /// # Panics
    ///
    /// Panics if the cluster mutex is poisoned (test-only type).
    #[must_use]
    pub fn payload(&self, path: &str) -> Option<Bytes> {
        let state = self.state.lock().expect("cluster mutex poisoned");
        state.nodes.get(path).map(|n| n.payload.clone())
    }
}

/// A session-bound client handle onto a [`MemoryCluster`].
///
/// Dropping the handle (or calling [`expire`]) ends the session and reaps
/// every ephemeral node it created, modeling coordinator session death.
///
/// [`expire`]: MemorySession::expire
#[derive(Debug)]
pub struct MemorySession {
    state: Arc<Mutex<ClusterState>>,
    id: u64,
}

impl MemorySession {
    /// Returns this session's id.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Ends the session, deleting every ephemeral node it owns.
    ///
    /// Idempotent; subsequent operations through this handle fail with
    /// [`Error::ConnectionLost`].
    pub fn expire(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.live_sessions.remove(&self.id);
            let id = self.id;
            state.nodes.retain(|_, n| n.ephemeral_owner != Some(id));
        }
    }

    /// Returns whether the session is still alive.
    ///
    /// # Panics
    ///
    /// Panics if the cluster mutex is poisoned (test-only type).
    #[must_use]
    pub fn is_alive(&self) -> bool {
        let state = self.state.lock().expect("cluster mutex poisoned");
        state.live_sessions.contains(&self.id)
    }
}

impl Drop for MemorySession {
    fn drop(&mut self) {
        self.expire();
    }
}

fn parent_exists(nodes: &BTreeMap<String, NodeEntry>, path: &str) -> bool {
    match path.rsplit_once('/') {
        Some(("", _)) | None => true,
        Some((parent, _)) => nodes.contains_key(parent),
    }
}

fn version_matches(current: i64, expected: i64) -> bool {
    expected == ANY_VERSION || current == expected
}

#[async_trait]
impl Coordinator for MemorySession {
    async fn submit(&self, ops: Vec<TxnOp>) -> Result<TxnOutcome> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| Error::invariant("cluster mutex poisoned"))?;
        if !state.live_sessions.contains(&self.id) {
            return Err(Error::connection_lost("session expired"));
        }

        // Validate and apply against a scratch copy; commit only if every
        // operation succeeds.
        let mut nodes = state.nodes.clone();
        let mut results = Vec::with_capacity(ops.len());

        for (index, op) in ops.into_iter().enumerate() {
            let error = match op {
                TxnOp::Create {
                    path,
                    payload,
                    mode,
                    ignore_if_exists,
                } => {
                    if nodes.contains_key(&path) {
                        if ignore_if_exists {
                            results.push(TxnOpResult::Created);
                            continue;
                        }
                        TxnError::NodeExists
                    } else if !parent_exists(&nodes, &path) {
                        TxnError::NoNode
                    } else {
                        let ephemeral_owner = match mode {
                            NodeMode::Persistent => None,
                            NodeMode::Ephemeral => Some(self.id),
                        };
                        nodes.insert(
                            path,
                            NodeEntry {
                                payload,
                                version: 0,
                                ephemeral_owner,
                            },
                        );
                        results.push(TxnOpResult::Created);
                        continue;
                    }
                }
                TxnOp::Remove {
                    path,
                    expected_version,
                } => match nodes.get(&path) {
                    None => TxnError::NoNode,
                    Some(node) if !version_matches(node.version, expected_version) => {
                        TxnError::BadVersion
                    }
                    Some(_) => {
                        nodes.remove(&path);
                        results.push(TxnOpResult::Removed);
                        continue;
                    }
                },
                TxnOp::Set {
                    path,
                    payload,
                    expected_version,
                } => match nodes.get_mut(&path) {
                    None => TxnError::NoNode,
                    Some(node) if !version_matches(node.version, expected_version) => {
                        TxnError::BadVersion
                    }
                    Some(node) => {
                        node.payload = payload;
                        node.version += 1;
                        results.push(TxnOpResult::Set {
                            version: node.version,
                        });
                        continue;
                    }
                },
                TxnOp::Check {
                    path,
                    expected_version,
                } => match nodes.get(&path) {
                    None => TxnError::NoNode,
                    Some(node) if !version_matches(node.version, expected_version) => {
                        TxnError::BadVersion
                    }
                    Some(_) => {
                        results.push(TxnOpResult::Checked);
                        continue;
                    }
                },
            };

            return Ok(TxnOutcome::Aborted {
                failed_index: index,
                error,
            });
        }

        state.nodes = nodes;
        Ok(TxnOutcome::Committed(results))
    }

    async fn get(&self, path: &str) -> Result<Option<VersionedPayload>> {
        let state = self
            .state
            .lock()
            .map_err(|_| Error::invariant("cluster mutex poisoned"))?;
        if !state.live_sessions.contains(&self.id) {
            return Err(Error::connection_lost("session expired"));
        }
        Ok(state.nodes.get(path).map(|n| VersionedPayload {
            payload: n.payload.clone(),
            version: n.version,
        }))
    }
}
