//! Failure-injection tests for the claim state machine.
//!
//! # Invariants Tested
//!
//! 1. **Transient escalation**: connection loss during a claim surfaces as
//!    a transient error without assuming the outcome
//! 2. **At-least-once commits**: a commit interrupted by connection loss
//!    reports success-with-warning, and the file is redone by another
//!    worker once the session dies
//! 3. **Retry boundedness**: unbounded cursor contention terminates within
//!    the configured attempt limit instead of spinning

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;

use tidemark_core::{
    ANY_VERSION, Coordinator, MemoryCluster, MemorySession, TxnOp, TxnOutcome, VersionedPayload,
};
use tidemark_core::{Error as CoreError, Result as CoreResult};
use tidemark_queue::{
    CURSOR_RETRY_LIMIT, ClaimOutcome, CommitOutcome, FileMetadata, OrderedQueue, QueueConfig,
    QueueError,
};

fn config(root: &str) -> QueueConfig {
    let mut config = QueueConfig::new(root);
    config.processor_identity = "test-worker".to_string();
    config
}

// ============================================================================
// FailingCoordinator - injects connection loss on multi-requests
// ============================================================================

/// Coordinator wrapper that fails the next N multi-requests with a
/// connection-level error while letting reads through.
struct FailingCoordinator {
    inner: Arc<MemorySession>,
    fail_submits: AtomicU32,
}

impl FailingCoordinator {
    fn new(inner: Arc<MemorySession>) -> Self {
        Self {
            inner,
            fail_submits: AtomicU32::new(0),
        }
    }

    fn fail_next_submits(&self, count: u32) {
        self.fail_submits.store(count, Ordering::SeqCst);
    }

    fn should_fail(&self) -> bool {
        self.fail_submits
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl Coordinator for FailingCoordinator {
    async fn submit(&self, ops: Vec<TxnOp>) -> CoreResult<TxnOutcome> {
        if self.should_fail() {
            return Err(CoreError::connection_lost("injected submit failure"));
        }
        self.inner.submit(ops).await
    }

    async fn get(&self, path: &str) -> CoreResult<Option<VersionedPayload>> {
        self.inner.get(path).await
    }
}

// ============================================================================
// ContendingCoordinator - bumps the cursor version before every claim multi
// ============================================================================

/// Coordinator wrapper that rewrites the cursor (same payload, new version)
/// before every multi-request, so the cursor guard always fails.
struct ContendingCoordinator {
    inner: Arc<MemorySession>,
    rival: Arc<MemorySession>,
    processed_path: String,
    multis: AtomicU32,
}

#[async_trait]
impl Coordinator for ContendingCoordinator {
    async fn submit(&self, ops: Vec<TxnOp>) -> CoreResult<TxnOutcome> {
        if ops.len() > 1 {
            self.multis.fetch_add(1, Ordering::SeqCst);
            if let Some(read) = self.rival.get(&self.processed_path).await? {
                self.rival
                    .set(&self.processed_path, read.payload, ANY_VERSION)
                    .await?;
            }
        }
        self.inner.submit(ops).await
    }

    async fn get(&self, path: &str) -> CoreResult<Option<VersionedPayload>> {
        self.inner.get(path).await
    }
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn test_connection_loss_during_claim_is_transient() {
    let cluster = MemoryCluster::new();
    let setup = OrderedQueue::new(Arc::new(cluster.session()), config("/q")).expect("queue");
    setup.ensure_layout().await.expect("bootstrap");

    let failing = Arc::new(FailingCoordinator::new(Arc::new(cluster.session())));
    let queue = OrderedQueue::new(Arc::clone(&failing), config("/q")).expect("queue");

    failing.fail_next_submits(1);
    let mut claim = queue.claim("a");
    let result = claim.set_processing().await;
    assert!(
        matches!(result, Err(QueueError::Transient { .. })),
        "got {result:?}"
    );

    // Nothing leaked: the interrupted multi left no claim nodes behind.
    assert_eq!(cluster.paths_with_prefix("/q/processing/"), Vec::<String>::new());

    // The same claim succeeds once the connection is back.
    let mut retry = queue.claim("a");
    assert!(matches!(
        retry.set_processing().await.expect("claim"),
        ClaimOutcome::Claimed { .. }
    ));
}

#[tokio::test]
async fn test_interrupted_commit_is_redone_by_next_worker() {
    let cluster = MemoryCluster::new();
    let setup = OrderedQueue::new(Arc::new(cluster.session()), config("/q")).expect("queue");
    setup.ensure_layout().await.expect("bootstrap");

    let session_a = Arc::new(cluster.session());
    let failing = Arc::new(FailingCoordinator::new(Arc::clone(&session_a)));
    let worker_a = OrderedQueue::new(Arc::clone(&failing), config("/q")).expect("queue");

    let mut claim_a = worker_a.claim("x");
    assert!(matches!(
        claim_a.set_processing().await.expect("claim"),
        ClaimOutcome::Claimed { .. }
    ));

    // The commit's multi never reaches the coordinator.
    failing.fail_next_submits(u32::MAX);
    assert_eq!(
        claim_a.set_processed().await.expect("commit"),
        CommitOutcome::ConnectionLost
    );

    // The cursor did not advance and the claim is still parked on A's
    // session; once that session dies the file frees up.
    assert!(cluster.payload("/q/processed").is_none());
    assert_eq!(cluster.paths_with_prefix("/q/processing/").len(), 1);
    session_a.expire();
    assert_eq!(cluster.paths_with_prefix("/q/processing/"), Vec::<String>::new());

    let worker_b = OrderedQueue::new(Arc::new(cluster.session()), config("/q")).expect("queue");
    let mut claim_b = worker_b.claim("x");
    assert!(matches!(
        claim_b.set_processing().await.expect("claim"),
        ClaimOutcome::Claimed { .. }
    ));
    assert_eq!(
        claim_b.set_processed().await.expect("commit"),
        CommitOutcome::Committed
    );

    let cursor = FileMetadata::from_payload(&cluster.payload("/q/processed").expect("cursor"))
        .expect("decode");
    assert_eq!(cursor.file_path, "x");
}

#[tokio::test]
async fn test_claim_retry_loop_is_bounded_under_contention() {
    let cluster = MemoryCluster::new();
    let setup = OrderedQueue::new(Arc::new(cluster.session()), config("/q")).expect("queue");
    setup.ensure_layout().await.expect("bootstrap");
    // A cursor must exist (below our path) so every attempt hits the
    // version check rather than the probe pair.
    setup.set_processed_at_start("aaa").await.expect("seed");

    let contending = Arc::new(ContendingCoordinator {
        inner: Arc::new(cluster.session()),
        rival: Arc::new(cluster.session()),
        processed_path: "/q/processed".to_string(),
        multis: AtomicU32::new(0),
    });
    let queue = OrderedQueue::new(Arc::clone(&contending), config("/q")).expect("queue");

    let mut claim = queue.claim("zzz");
    let result = claim.set_processing().await;
    assert!(
        matches!(result, Err(QueueError::Transient { .. })),
        "got {result:?}"
    );
    assert_eq!(
        contending.multis.load(Ordering::SeqCst),
        CURSOR_RETRY_LIMIT,
        "must stop after exactly the configured attempt bound"
    );
}

/// Coordinator wrapper that bumps the cursor version once, between a
/// commit's cursor read and its multi-request. Claim multis (6+ requests)
/// pass through untouched; only the 4-request commit is intercepted.
struct CommitContender {
    inner: Arc<MemorySession>,
    rival: Arc<MemorySession>,
    processed_path: String,
    fired: AtomicU32,
}

#[async_trait]
impl Coordinator for CommitContender {
    async fn submit(&self, ops: Vec<TxnOp>) -> CoreResult<TxnOutcome> {
        if (2..=4).contains(&ops.len()) && self.fired.fetch_add(1, Ordering::SeqCst) == 0 {
            if let Some(read) = self.rival.get(&self.processed_path).await? {
                self.rival
                    .set(&self.processed_path, read.payload, ANY_VERSION)
                    .await?;
            }
        }
        self.inner.submit(ops).await
    }

    async fn get(&self, path: &str) -> CoreResult<Option<VersionedPayload>> {
        self.inner.get(path).await
    }
}

#[tokio::test]
async fn test_commit_retries_cursor_contention_then_succeeds() {
    let cluster = MemoryCluster::new();
    let setup = OrderedQueue::new(Arc::new(cluster.session()), config("/q")).expect("queue");
    setup.ensure_layout().await.expect("bootstrap");
    setup.set_processed_at_start("a").await.expect("seed");

    let contender = Arc::new(CommitContender {
        inner: Arc::new(cluster.session()),
        rival: Arc::new(cluster.session()),
        processed_path: "/q/processed".to_string(),
        fired: AtomicU32::new(0),
    });
    let queue = OrderedQueue::new(Arc::clone(&contender), config("/q")).expect("queue");

    let mut claim = queue.claim("b");
    assert!(matches!(
        claim.set_processing().await.expect("claim"),
        ClaimOutcome::Claimed { .. }
    ));

    // The first commit attempt aborts on the stale cursor version, the
    // retry re-reads and succeeds.
    assert_eq!(
        claim.set_processed().await.expect("commit"),
        CommitOutcome::Committed
    );
    assert!(contender.fired.load(Ordering::SeqCst) >= 2);

    let cursor = FileMetadata::from_payload(&cluster.payload("/q/processed").expect("cursor"))
        .expect("decode");
    assert_eq!(cursor.file_path, "b");
}
