//! Canonical coordinator paths for the queue.
//!
//! This module is the single source of truth for the on-coordinator layout.
//! All writers must use [`QueuePaths`] to construct paths; no hardcoded path
//! strings should exist outside this module.
//!
//! # Layout (relative to the queue root)
//!
//! ```text
//! {root}/
//! ├── failed/
//! │   ├── {node-name}                # permanently failed path
//! │   └── {node-name}.retriable      # retry counter (decimal text)
//! ├── processing/
//! │   └── {node-name}                # ephemeral claim
//! ├── processing_id/
//! │   └── {node-name}                # persistent owner record, version = fencing token
//! ├── processed                      # unsharded cursor (buckets == 1)
//! └── buckets/                       # sharded layout (buckets > 1)
//!     └── {i}/
//!         ├── processed              # per-bucket cursor
//!         └── lock                   # ephemeral bucket lease
//! ```
//!
//! # Node names
//!
//! Leaf names are derived from arbitrary file paths by [`encode_node_name`]:
//! bytes outside `[A-Za-z0-9._-]` are percent-hex encoded, and names that
//! would exceed the coordinator's component limit are truncated with a
//! SHA-256 suffix so distinct paths keep distinct names with overwhelming
//! probability.

use sha2::{Digest, Sha256};

/// Maximum length of one encoded node name.
pub const MAX_NODE_NAME_LEN: usize = 255;

/// Hex characters of the disambiguating hash suffix on truncated names.
const NAME_HASH_LEN: usize = 16;

/// Suffix appended to a failed-node name to form its retry counter node.
pub const RETRIABLE_SUFFIX: &str = ".retriable";

/// Encodes an arbitrary file path into a coordinator-legal leaf name.
///
/// The encoding is injective for names that fit the length limit (percent
/// escapes are reversible); longer names keep a 64-bit hash of the full
/// path, so two paths collide only with negligible probability.
#[must_use]
pub fn encode_node_name(path: &str) -> String {
    let mut encoded = String::with_capacity(path.len());
    for &byte in path.as_bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'.' | b'_' | b'-') {
            encoded.push(char::from(byte));
        } else {
            encoded.push('%');
            encoded.push_str(&format!("{byte:02X}"));
        }
    }

    // "." and ".." are reserved component names on the coordinator.
    if encoded.is_empty() || encoded == "." || encoded == ".." {
        return format!("%{}", name_hash(path));
    }

    if encoded.len() <= MAX_NODE_NAME_LEN {
        return encoded;
    }

    let mut cut = MAX_NODE_NAME_LEN - NAME_HASH_LEN - 1;
    // Never split a %XX escape at the cut point.
    let bytes = encoded.as_bytes();
    if cut >= 1 && bytes[cut - 1] == b'%' {
        cut -= 1;
    } else if cut >= 2 && bytes[cut - 2] == b'%' {
        cut -= 2;
    }

    format!("{}.{}", &encoded[..cut], name_hash(path))
}

fn name_hash(path: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(path.as_bytes());
    let digest = hasher.finalize();
    hex::encode(&digest[..NAME_HASH_LEN / 2])
}

/// Canonical path generator for the queue's coordinator layout.
#[derive(Debug, Clone)]
pub struct QueuePaths {
    root: String,
    buckets: u32,
}

impl QueuePaths {
    /// Directory of permanently failed paths.
    pub const FAILED_DIR: &'static str = "failed";
    /// Directory of in-flight ephemeral claims.
    pub const PROCESSING_DIR: &'static str = "processing";
    /// Directory of persistent claim-owner records.
    pub const PROCESSING_ID_DIR: &'static str = "processing_id";
    /// Directory of bucket shards (sharded layout only).
    pub const BUCKETS_DIR: &'static str = "buckets";
    /// Name of a cursor node.
    pub const PROCESSED_NODE: &'static str = "processed";
    /// Name of a bucket lease node.
    pub const LOCK_NODE: &'static str = "lock";

    /// Creates a path generator for the given root and bucket count.
    #[must_use]
    pub fn new(root: impl Into<String>, buckets: u32) -> Self {
        Self {
            root: root.into(),
            buckets,
        }
    }

    /// Returns the queue root.
    #[must_use]
    pub fn root(&self) -> &str {
        &self.root
    }

    /// Returns the bucket count.
    #[must_use]
    pub fn buckets(&self) -> u32 {
        self.buckets
    }

    /// Returns whether the layout is sharded.
    #[must_use]
    pub fn is_sharded(&self) -> bool {
        self.buckets > 1
    }

    /// Path of the failed node for an encoded name.
    #[must_use]
    pub fn failed(&self, node_name: &str) -> String {
        format!("{}/{}/{node_name}", self.root, Self::FAILED_DIR)
    }

    /// Path of the retry-counter sibling of a failed node.
    #[must_use]
    pub fn retriable(&self, node_name: &str) -> String {
        format!("{}{RETRIABLE_SUFFIX}", self.failed(node_name))
    }

    /// Path of the ephemeral processing node for an encoded name.
    #[must_use]
    pub fn processing(&self, node_name: &str) -> String {
        format!("{}/{}/{node_name}", self.root, Self::PROCESSING_DIR)
    }

    /// Path of the persistent claim-owner node for an encoded name.
    #[must_use]
    pub fn processing_id(&self, node_name: &str) -> String {
        format!("{}/{}/{node_name}", self.root, Self::PROCESSING_ID_DIR)
    }

    /// Path of a bucket's directory.
    #[must_use]
    pub fn bucket_dir(&self, bucket: u32) -> String {
        debug_assert!(bucket < self.buckets, "bucket {bucket} out of range");
        format!("{}/{}/{bucket}", self.root, Self::BUCKETS_DIR)
    }

    /// Path of a bucket's ephemeral lease node.
    #[must_use]
    pub fn bucket_lock(&self, bucket: u32) -> String {
        format!("{}/{}", self.bucket_dir(bucket), Self::LOCK_NODE)
    }

    /// Path of the processed cursor for a bucket.
    ///
    /// In the unsharded layout the single cursor lives at the queue root.
    #[must_use]
    pub fn processed(&self, bucket: u32) -> String {
        if self.is_sharded() {
            format!("{}/{}", self.bucket_dir(bucket), Self::PROCESSED_NODE)
        } else {
            format!("{}/{}", self.root, Self::PROCESSED_NODE)
        }
    }

    /// The persistent directories layout bootstrap must create, in creation
    /// order (parents before children). Cursor nodes are created lazily by
    /// the state machine and are not listed here.
    #[must_use]
    pub fn bootstrap_dirs(&self) -> Vec<String> {
        let mut dirs = vec![
            format!("{}/{}", self.root, Self::FAILED_DIR),
            format!("{}/{}", self.root, Self::PROCESSING_DIR),
            format!("{}/{}", self.root, Self::PROCESSING_ID_DIR),
        ];
        if self.is_sharded() {
            dirs.push(format!("{}/{}", self.root, Self::BUCKETS_DIR));
            for bucket in 0..self.buckets {
                dirs.push(self.bucket_dir(bucket));
            }
        }
        dirs
    }
}
