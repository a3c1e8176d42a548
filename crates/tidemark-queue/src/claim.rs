//! The per-file claim state machine.
//!
//! Each file moves through **None → Processing → {Processed, Failed}**, and
//! every transition is a single atomic multi-request against the
//! coordinator. The multi is built so that each precondition maps to one
//! request index; on abort, the index of the first failed request tells the
//! state machine exactly which precondition broke:
//!
//! - a `create`+`remove` probe pair asserts "this node is absent" without a
//!   negative primitive (the coordinator's multi only takes positive
//!   assertions);
//! - the ephemeral `processing/<name>` create is the claim itself;
//! - a version bump of the persistent `processing_id/<name>` node yields the
//!   fencing token every later transition must present;
//! - a check of the bucket's `processed` cursor (or a probe pair when the
//!   cursor does not exist yet) detects concurrent cursor advancement, which
//!   is retried up to [`CURSOR_RETRY_LIMIT`] times.
//!
//! A path at or below the bucket cursor is already processed: the cursor is
//! the only durable record of completed work, so the comparison is `<=`,
//! never strict.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use tidemark_core::{
    ANY_VERSION, Coordinator, NodeMode, RemoveOutcome, TxnError, TxnOp, TxnOpResult, TxnOutcome,
    VersionedPayload,
};
use ulid::Ulid;

use crate::config::ProcessorInfo;
use crate::error::{QueueError, Result};
use crate::metadata::FileMetadata;
use crate::metrics::{record_claim_outcome, record_cursor_retry};
use crate::paths::{QueuePaths, encode_node_name};
use crate::shard::bucket_for_path;

/// Bound on cursor-contention retries per transition (`R` in the contract).
///
/// Past this, the call surfaces a transient error so the scheduler can
/// escalate instead of spinning.
pub const CURSOR_RETRY_LIMIT: u32 = 16;

/// Fencing token proving ongoing ownership of a processing claim.
///
/// This is the version of the `processing_id/<name>` node observed when the
/// claim was taken. Every subsequent mutation presents it; a worker whose
/// token has been superseded cannot commit or fail the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FencingToken(i64);

impl FencingToken {
    pub(crate) fn new(version: i64) -> Self {
        Self(version)
    }

    /// Returns the underlying node version.
    #[must_use]
    pub fn version(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for FencingToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FencingToken({})", self.0)
    }
}

/// Outcome of [`FileClaim::set_processing`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// The file moved to *Processing*; the token fences later transitions.
    Claimed {
        /// Fencing token for this claim.
        token: FencingToken,
    },
    /// The bucket cursor already subsumes this path.
    AlreadyProcessed,
    /// Another worker currently holds the processing claim.
    AlreadyInFlight,
    /// The path has exhausted its retries and is permanently failed.
    PermanentlyFailed,
}

/// Outcome of [`FileClaim::set_processed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    /// The cursor advanced (or already subsumed the path) and the claim
    /// nodes were released.
    Committed,
    /// The connection dropped before the commit could be confirmed. The
    /// ephemeral claim dies with the session and another worker will redo
    /// the file; at-least-once delivery bounded by the cursor invariant.
    ConnectionLost,
    /// Another worker owns the file now; nothing was mutated.
    Fenced,
}

/// Outcome of [`FileClaim::set_failed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailOutcome {
    /// The path is permanently failed and recorded under `failed/`.
    TerminalFailure,
    /// The failure was recorded as retriable; the path returns to *None*.
    RetryScheduled {
        /// Retriable attempts consumed so far, including this one.
        attempt: u32,
    },
    /// Another worker owns the file now; nothing was mutated.
    Fenced,
}

/// What a cursor read observed.
struct CursorRead {
    /// The greatest processed path, when the cursor carries one.
    path: Option<String>,
    /// The cursor node's version.
    version: i64,
}

/// The claim state machine for one file.
///
/// Constructed per candidate path; drives `set_processing`,
/// `set_processed`, and `set_failed` against the coordinator. The
/// coordinator client is an explicit shared dependency, never a global.
pub struct FileClaim<C: Coordinator + ?Sized> {
    coordinator: Arc<C>,
    file_path: String,
    processing_path: String,
    processing_id_path: String,
    failed_path: String,
    retriable_path: String,
    processed_path: String,
    processor_identity: String,
    max_loading_retries: u32,
    metadata: FileMetadata,
    token: Option<FencingToken>,
}

impl<C: Coordinator + ?Sized> FileClaim<C> {
    /// Creates the state machine for one file path.
    #[must_use]
    pub fn new(
        coordinator: Arc<C>,
        paths: &QueuePaths,
        processor_identity: impl Into<String>,
        max_loading_retries: u32,
        hash_seed: u64,
        file_path: impl Into<String>,
    ) -> Self {
        let file_path = file_path.into();
        let node_name = encode_node_name(&file_path);
        let bucket = bucket_for_path(&file_path, hash_seed, paths.buckets());
        Self {
            coordinator,
            processing_path: paths.processing(&node_name),
            processing_id_path: paths.processing_id(&node_name),
            failed_path: paths.failed(&node_name),
            retriable_path: paths.retriable(&node_name),
            processed_path: paths.processed(bucket),
            processor_identity: processor_identity.into(),
            max_loading_retries,
            metadata: FileMetadata::new(file_path.clone()),
            file_path,
            token: None,
        }
    }

    /// Returns the file path this claim is for.
    #[must_use]
    pub fn file_path(&self) -> &str {
        &self.file_path
    }

    /// Returns the fencing token, if the file is currently claimed.
    #[must_use]
    pub fn token(&self) -> Option<FencingToken> {
        self.token
    }

    /// Moves the file from *None* to *Processing*.
    ///
    /// # Errors
    ///
    /// Returns a transient error when the connection failed or cursor
    /// contention persisted past [`CURSOR_RETRY_LIMIT`], and an invariant
    /// violation on an unexpected transaction response.
    pub async fn set_processing(&mut self) -> Result<ClaimOutcome> {
        // Request indices within the multi below.
        const FAILED_PROBE: usize = 0;
        const CLAIM_CREATE: usize = 2;
        const ID_SET: usize = 4;
        const CURSOR_GUARD: usize = 5;

        let processing_id = Ulid::new().to_string();
        self.metadata.processing_id = Some(processing_id.clone());
        let processor_info = ProcessorInfo::for_claim(&self.processor_identity, processing_id);
        let processor_payload: Bytes = serde_json::to_vec(&processor_info)
            .map_err(|e| QueueError::Serialization {
                message: format!("encode processor info: {e}"),
            })?
            .into();
        let claim_payload = self.metadata.to_payload()?;

        for _ in 0..CURSOR_RETRY_LIMIT {
            let cursor = self.read_cursor().await?;
            if let Some(read) = &cursor {
                if let Some(cursor_path) = &read.path {
                    if self.file_path <= *cursor_path {
                        record_claim_outcome("set_processing", "already_processed");
                        return Ok(ClaimOutcome::AlreadyProcessed);
                    }
                }
            }

            let mut ops = vec![
                // Probe pair: assert the path was never permanently failed.
                TxnOp::Create {
                    path: self.failed_path.clone(),
                    payload: Bytes::new(),
                    mode: NodeMode::Persistent,
                    ignore_if_exists: false,
                },
                TxnOp::Remove {
                    path: self.failed_path.clone(),
                    expected_version: ANY_VERSION,
                },
                // The claim itself.
                TxnOp::Create {
                    path: self.processing_path.clone(),
                    payload: claim_payload.clone(),
                    mode: NodeMode::Ephemeral,
                    ignore_if_exists: false,
                },
                // Bump the owner record; its new version is the fencing token.
                TxnOp::Create {
                    path: self.processing_id_path.clone(),
                    payload: processor_payload.clone(),
                    mode: NodeMode::Persistent,
                    ignore_if_exists: true,
                },
                TxnOp::Set {
                    path: self.processing_id_path.clone(),
                    payload: processor_payload.clone(),
                    expected_version: ANY_VERSION,
                },
            ];
            match &cursor {
                Some(read) => ops.push(TxnOp::Check {
                    path: self.processed_path.clone(),
                    expected_version: read.version,
                }),
                // No cursor yet: probe pair asserting it still does not exist.
                None => ops.extend([
                    TxnOp::Create {
                        path: self.processed_path.clone(),
                        payload: Bytes::new(),
                        mode: NodeMode::Persistent,
                        ignore_if_exists: false,
                    },
                    TxnOp::Remove {
                        path: self.processed_path.clone(),
                        expected_version: ANY_VERSION,
                    },
                ]),
            }

            match self.coordinator.submit(ops).await.map_err(QueueError::from)? {
                TxnOutcome::Committed(results) => {
                    let version = match results.get(ID_SET) {
                        Some(TxnOpResult::Set { version }) => *version,
                        other => {
                            return Err(QueueError::invariant(format!(
                                "claim multi committed with unexpected result at index {ID_SET}: {other:?}"
                            )));
                        }
                    };
                    let token = FencingToken::new(version);
                    self.token = Some(token);
                    record_claim_outcome("set_processing", "claimed");
                    return Ok(ClaimOutcome::Claimed { token });
                }
                TxnOutcome::Aborted {
                    failed_index: FAILED_PROBE,
                    error: TxnError::NodeExists,
                } => {
                    record_claim_outcome("set_processing", "permanently_failed");
                    return Ok(ClaimOutcome::PermanentlyFailed);
                }
                TxnOutcome::Aborted {
                    failed_index: CLAIM_CREATE,
                    error: TxnError::NodeExists,
                } => {
                    record_claim_outcome("set_processing", "already_in_flight");
                    return Ok(ClaimOutcome::AlreadyInFlight);
                }
                TxnOutcome::Aborted { failed_index, .. } if failed_index >= CURSOR_GUARD => {
                    tracing::debug!(
                        file = %self.file_path,
                        "cursor advanced during claim, retrying"
                    );
                    record_cursor_retry("set_processing");
                }
                TxnOutcome::Aborted {
                    failed_index,
                    error,
                } => {
                    return Err(QueueError::invariant(format!(
                        "unexpected claim multi failure at index {failed_index}: {error:?}"
                    )));
                }
            }
        }

        Err(QueueError::transient(format!(
            "cursor contention persisted for {} after {CURSOR_RETRY_LIMIT} attempts",
            self.file_path
        )))
    }

    /// Moves the file from *Processing* to *Processed* by advancing the
    /// bucket cursor and releasing the claim nodes atomically.
    ///
    /// # Errors
    ///
    /// Returns a transient error when cursor contention persisted past
    /// [`CURSOR_RETRY_LIMIT`], and an invariant violation on an unexpected
    /// transaction response. A lost connection is **not** an error here:
    /// the claim ephemeral dies with the session and another worker redoes
    /// the file, so the call reports [`CommitOutcome::ConnectionLost`].
    pub async fn set_processed(&mut self) -> Result<CommitOutcome> {
        const CURSOR_STEP: usize = 0;
        const FENCE_CHECK: usize = 1;
        const ID_REMOVE: usize = 2;
        const CLAIM_REMOVE: usize = 3;

        let cursor_payload = self.metadata.to_payload()?;

        for _ in 0..CURSOR_RETRY_LIMIT {
            let cursor = self.read_cursor().await?;

            // The cursor may already subsume this path (another worker
            // redid the file after we lost a session). Release our claim
            // nodes if we still hold any and report success.
            if let Some(read) = &cursor {
                if let Some(cursor_path) = &read.path {
                    if *cursor_path >= self.file_path {
                        self.release_superseded_claim().await?;
                        record_claim_outcome("set_processed", "subsumed");
                        return Ok(CommitOutcome::Committed);
                    }
                }
            }

            let mut ops = vec![match &cursor {
                Some(read) => TxnOp::Set {
                    path: self.processed_path.clone(),
                    payload: cursor_payload.clone(),
                    expected_version: read.version,
                },
                None => TxnOp::Create {
                    path: self.processed_path.clone(),
                    payload: cursor_payload.clone(),
                    mode: NodeMode::Persistent,
                    ignore_if_exists: false,
                },
            }];
            if let Some(token) = self.token {
                ops.extend(self.fence_release_ops(token));
            }

            let outcome = match self.coordinator.submit(ops).await {
                Ok(outcome) => outcome,
                Err(err) if err.is_transient() => {
                    tracing::warn!(
                        file = %self.file_path,
                        error = %err,
                        "lost connection while committing; claim dies with the session"
                    );
                    record_claim_outcome("set_processed", "connection_lost");
                    return Ok(CommitOutcome::ConnectionLost);
                }
                Err(err) => return Err(err.into()),
            };

            match outcome {
                TxnOutcome::Committed(_) => {
                    self.token = None;
                    if self.max_loading_retries > 0 {
                        self.cleanup_retriable_marker().await;
                    }
                    record_claim_outcome("set_processed", "committed");
                    return Ok(CommitOutcome::Committed);
                }
                TxnOutcome::Aborted {
                    failed_index: CURSOR_STEP,
                    ..
                } => {
                    record_cursor_retry("set_processed");
                }
                TxnOutcome::Aborted {
                    failed_index: FENCE_CHECK | ID_REMOVE,
                    ..
                } => {
                    tracing::warn!(
                        file = %self.file_path,
                        "processing id version changed; another worker owns this file"
                    );
                    record_claim_outcome("set_processed", "fenced");
                    return Ok(CommitOutcome::Fenced);
                }
                TxnOutcome::Aborted {
                    failed_index: CLAIM_REMOVE,
                    ..
                } => {
                    tracing::warn!(
                        file = %self.file_path,
                        "processing node already gone; session must have blinked"
                    );
                    record_claim_outcome("set_processed", "connection_lost");
                    return Ok(CommitOutcome::ConnectionLost);
                }
                TxnOutcome::Aborted {
                    failed_index,
                    error,
                } => {
                    return Err(QueueError::invariant(format!(
                        "unexpected commit multi failure at index {failed_index}: {error:?}"
                    )));
                }
            }
        }

        Err(QueueError::transient(format!(
            "cursor contention persisted for {} after {CURSOR_RETRY_LIMIT} attempts",
            self.file_path
        )))
    }

    /// Moves the file from *Processing* to *Failed*, or back to *None* with
    /// an incremented retry counter when retries are configured and not yet
    /// exhausted.
    ///
    /// # Errors
    ///
    /// Returns a transient error when the connection failed or counter
    /// contention persisted, and an invariant violation on an unexpected
    /// transaction response.
    pub async fn set_failed(&mut self, reason: impl Into<String>) -> Result<FailOutcome> {
        let reason = reason.into();
        self.metadata.last_exception = Some(reason);

        if self.max_loading_retries == 0 {
            return self.fail_terminal(false).await;
        }

        for _ in 0..CURSOR_RETRY_LIMIT {
            let retriable = self
                .coordinator
                .get(&self.retriable_path)
                .await
                .map_err(QueueError::from)?;
            let consumed = match &retriable {
                None => 0,
                Some(read) => parse_retry_counter(&read.payload, &self.retriable_path)?,
            };
            let attempt = consumed + 1;

            if attempt > self.max_loading_retries {
                self.metadata.retries = consumed;
                return self.fail_terminal(retriable.is_some()).await;
            }
            self.metadata.retries = attempt;

            let counter_payload = Bytes::from(attempt.to_string());
            let mut ops = vec![match &retriable {
                None => TxnOp::Create {
                    path: self.retriable_path.clone(),
                    payload: counter_payload,
                    mode: NodeMode::Persistent,
                    ignore_if_exists: false,
                },
                Some(read) => TxnOp::Set {
                    path: self.retriable_path.clone(),
                    payload: counter_payload,
                    expected_version: read.version,
                },
            }];
            if let Some(token) = self.token {
                ops.extend(self.fence_release_ops(token));
            }

            match self.coordinator.submit(ops).await.map_err(QueueError::from)? {
                TxnOutcome::Committed(_) => {
                    self.token = None;
                    record_claim_outcome("set_failed", "retry_scheduled");
                    return Ok(FailOutcome::RetryScheduled { attempt });
                }
                TxnOutcome::Aborted {
                    failed_index: 0, ..
                } => {
                    // Counter moved under us; re-read and retry.
                    record_cursor_retry("set_failed");
                }
                TxnOutcome::Aborted {
                    failed_index,
                    error,
                } => {
                    if self.token.is_none() {
                        return Err(QueueError::invariant(format!(
                            "unexpected failure multi response at index {failed_index}: {error:?}"
                        )));
                    }
                    tracing::warn!(
                        file = %self.file_path,
                        "claim nodes changed while recording failure; another worker owns this file"
                    );
                    record_claim_outcome("set_failed", "fenced");
                    return Ok(FailOutcome::Fenced);
                }
            }
        }

        Err(QueueError::transient(format!(
            "retry-counter contention persisted for {} after {CURSOR_RETRY_LIMIT} attempts",
            self.file_path
        )))
    }

    /// Records a terminal failure: creates the persistent `failed/` node,
    /// drops the retry counter if one exists, and releases the claim nodes
    /// under the fencing token. The cursor is not advanced.
    async fn fail_terminal(&mut self, remove_retriable: bool) -> Result<FailOutcome> {
        let meta_payload = self.metadata.to_payload()?;

        let mut ops = vec![TxnOp::Create {
            path: self.failed_path.clone(),
            payload: meta_payload,
            mode: NodeMode::Persistent,
            ignore_if_exists: false,
        }];
        if remove_retriable {
            // Only the fenced owner drives this file, so no version race.
            ops.push(TxnOp::Remove {
                path: self.retriable_path.clone(),
                expected_version: ANY_VERSION,
            });
        }
        let fence_base = ops.len();
        if let Some(token) = self.token {
            ops.extend(self.fence_release_ops(token));
        }

        match self.coordinator.submit(ops).await.map_err(QueueError::from)? {
            TxnOutcome::Committed(_) => {
                self.token = None;
                record_claim_outcome("set_failed", "terminal");
                Ok(FailOutcome::TerminalFailure)
            }
            TxnOutcome::Aborted {
                failed_index: 0, ..
            } => {
                // Already marked failed by an earlier attempt.
                tracing::warn!(file = %self.file_path, "failed node already present");
                record_claim_outcome("set_failed", "terminal");
                Ok(FailOutcome::TerminalFailure)
            }
            TxnOutcome::Aborted { failed_index, .. } if failed_index >= fence_base => {
                record_claim_outcome("set_failed", "fenced");
                Ok(FailOutcome::Fenced)
            }
            TxnOutcome::Aborted {
                failed_index,
                error,
            } => Err(QueueError::invariant(format!(
                "unexpected terminal-failure multi response at index {failed_index}: {error:?}"
            ))),
        }
    }

    /// Requests that assert and consume the fencing token while removing
    /// both claim nodes.
    fn fence_release_ops(&self, token: FencingToken) -> [TxnOp; 3] {
        [
            TxnOp::Check {
                path: self.processing_id_path.clone(),
                expected_version: token.version(),
            },
            TxnOp::Remove {
                path: self.processing_id_path.clone(),
                expected_version: token.version(),
            },
            TxnOp::Remove {
                path: self.processing_path.clone(),
                expected_version: ANY_VERSION,
            },
        ]
    }

    /// Releases claim nodes for a path the cursor already subsumes. Failure
    /// here means the claim was superseded or the session blinked; either
    /// way there is nothing left to undo.
    async fn release_superseded_claim(&mut self) -> Result<()> {
        let Some(token) = self.token.take() else {
            return Ok(());
        };
        match self
            .coordinator
            .submit(self.fence_release_ops(token).into())
            .await
            .map_err(QueueError::from)?
        {
            TxnOutcome::Committed(_) => {}
            TxnOutcome::Aborted { .. } => {
                tracing::warn!(
                    file = %self.file_path,
                    "claim nodes already superseded while releasing"
                );
            }
        }
        Ok(())
    }

    /// Best-effort removal of the retry counter after a successful commit.
    async fn cleanup_retriable_marker(&self) {
        match self.coordinator.remove(&self.retriable_path, ANY_VERSION).await {
            Ok(RemoveOutcome::Removed | RemoveOutcome::NoNode) => {}
            Ok(RemoveOutcome::BadVersion) => {}
            Err(err) => {
                tracing::debug!(
                    file = %self.file_path,
                    error = %err,
                    "could not clean up retry counter"
                );
            }
        }
    }

    /// Reads the bucket cursor. `None` when the cursor node does not exist;
    /// a node with an empty payload exists but holds no path yet.
    async fn read_cursor(&self) -> Result<Option<CursorRead>> {
        let Some(VersionedPayload { payload, version }) = self
            .coordinator
            .get(&self.processed_path)
            .await
            .map_err(QueueError::from)?
        else {
            return Ok(None);
        };

        let path = if payload.is_empty() {
            None
        } else {
            let meta = FileMetadata::from_payload(&payload)?;
            (!meta.file_path.is_empty()).then_some(meta.file_path)
        };
        Ok(Some(CursorRead { path, version }))
    }
}

fn parse_retry_counter(payload: &[u8], path: &str) -> Result<u32> {
    std::str::from_utf8(payload)
        .ok()
        .and_then(|s| s.trim().parse::<u32>().ok())
        .ok_or_else(|| QueueError::invariant(format!("malformed retry counter at {path}")))
}
