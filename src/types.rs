use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Change-detection strategy used by a watched directory.
///
/// - `Polling`: periodically re-list the tree and diff snapshots (default;
///   the only reliable option on most network mounts).
/// - `Notify`: subscribe to OS change notifications and debounce them.
///   `"watchfiles"` is accepted as an alias for older configs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Polling,
    #[serde(alias = "watchfiles")]
    Notify,
}

impl Default for BackendKind {
    fn default() -> Self {
        BackendKind::Polling
    }
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Polling => "polling",
            BackendKind::Notify => "notify",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "polling" => Ok(BackendKind::Polling),
            "notify" | "watchfiles" => Ok(BackendKind::Notify),
            other => Err(format!(
                "invalid backend: {other} (expected \"polling\" or \"notify\")"
            )),
        }
    }
}

/// What the ingest queue does when producers outpace the writer.
///
/// - `Block`: producers wait for free capacity (default; nothing is lost).
/// - `DropOldest`: the oldest queued event is evicted to make room. Every
///   eviction is counted and logged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    Block,
    DropOldest,
}

impl Default for OverflowPolicy {
    fn default() -> Self {
        OverflowPolicy::Block
    }
}

impl FromStr for OverflowPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "block" => Ok(OverflowPolicy::Block),
            "drop_oldest" => Ok(OverflowPolicy::DropOldest),
            other => Err(format!(
                "invalid overflow_policy: {other} (expected \"block\" or \"drop_oldest\")"
            )),
        }
    }
}

/// Digest used for `compute_checksum` targets.
///
/// BLAKE3 is the default; MD5 and the SHA-2 family are kept for stores whose
/// consumers compare against digests produced by other tools.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChecksumAlgorithm {
    Blake3,
    Md5,
    Sha256,
    Sha512,
}

impl Default for ChecksumAlgorithm {
    fn default() -> Self {
        ChecksumAlgorithm::Blake3
    }
}

impl ChecksumAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChecksumAlgorithm::Blake3 => "blake3",
            ChecksumAlgorithm::Md5 => "md5",
            ChecksumAlgorithm::Sha256 => "sha256",
            ChecksumAlgorithm::Sha512 => "sha512",
        }
    }

    /// Length of the lowercase hex digest.
    pub fn hex_len(&self) -> usize {
        match self {
            ChecksumAlgorithm::Md5 => 32,
            ChecksumAlgorithm::Blake3 | ChecksumAlgorithm::Sha256 => 64,
            ChecksumAlgorithm::Sha512 => 128,
        }
    }
}

impl fmt::Display for ChecksumAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChecksumAlgorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "").as_str() {
            "blake3" => Ok(ChecksumAlgorithm::Blake3),
            "md5" => Ok(ChecksumAlgorithm::Md5),
            "sha256" => Ok(ChecksumAlgorithm::Sha256),
            "sha512" => Ok(ChecksumAlgorithm::Sha512),
            other => Err(format!(
                "unsupported checksum_algorithm: {other} (expected blake3, md5, sha256 or sha512)"
            )),
        }
    }
}

/// How the service runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// All components loop until shutdown is signalled.
    Continuous,
    /// Every watcher performs exactly one detection cycle, the writer
    /// flushes, and the process exits.
    Once,
}
