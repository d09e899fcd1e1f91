// src/watch/checksum.rs

use std::io::Read;
use std::path::Path;

use anyhow::{Context, Result};
use md5::Md5;
use sha2::{Digest, Sha256, Sha512};
use tracing::debug;

use crate::fs::FileSystem;
use crate::types::ChecksumAlgorithm;

const READ_CHUNK: usize = 64 * 1024;

/// Streaming hasher over the supported algorithms.
enum FileHasher {
    Blake3(Box<blake3::Hasher>),
    Md5(Md5),
    Sha256(Sha256),
    Sha512(Sha512),
}

impl FileHasher {
    fn new(algorithm: ChecksumAlgorithm) -> Self {
        match algorithm {
            ChecksumAlgorithm::Blake3 => FileHasher::Blake3(Box::new(blake3::Hasher::new())),
            ChecksumAlgorithm::Md5 => FileHasher::Md5(Md5::new()),
            ChecksumAlgorithm::Sha256 => FileHasher::Sha256(Sha256::new()),
            ChecksumAlgorithm::Sha512 => FileHasher::Sha512(Sha512::new()),
        }
    }

    fn update(&mut self, bytes: &[u8]) {
        match self {
            FileHasher::Blake3(h) => {
                h.update(bytes);
            }
            FileHasher::Md5(h) => h.update(bytes),
            FileHasher::Sha256(h) => h.update(bytes),
            FileHasher::Sha512(h) => h.update(bytes),
        }
    }

    fn finalize_hex(self) -> String {
        match self {
            FileHasher::Blake3(h) => h.finalize().to_hex().to_string(),
            FileHasher::Md5(h) => format!("{:x}", h.finalize()),
            FileHasher::Sha256(h) => format!("{:x}", h.finalize()),
            FileHasher::Sha512(h) => format!("{:x}", h.finalize()),
        }
    }
}

/// Compute the digest of a single file with `algorithm`, as lowercase hex.
///
/// Reads in 64 KiB chunks so large files on network mounts are streamed.
/// Fails if the file vanished or became unreadable since it was detected;
/// callers treat that as a soft, per-item failure.
pub fn compute_checksum(
    fs: &dyn FileSystem,
    path: &Path,
    algorithm: ChecksumAlgorithm,
) -> Result<String> {
    let mut hasher = FileHasher::new(algorithm);
    let mut file = fs
        .open_read(path)
        .with_context(|| format!("opening file for checksum: {:?}", path))?;
    let mut buf = vec![0u8; READ_CHUNK];
    loop {
        let n = file
            .read(&mut buf)
            .with_context(|| format!("reading file for checksum: {:?}", path))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    let digest = hasher.finalize_hex();
    debug!(?path, %algorithm, checksum = %digest, "computed checksum");
    Ok(digest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::mock::MockFileSystem;

    #[test]
    fn known_digests_of_hello_world() {
        let fs = MockFileSystem::new();
        fs.add_file("/f.txt", "hello world");
        let path = Path::new("/f.txt");

        assert_eq!(
            compute_checksum(&fs, path, ChecksumAlgorithm::Md5).unwrap(),
            "5eb63bbbe01eeed093cb22bb8f5acdc3"
        );
        assert_eq!(
            compute_checksum(&fs, path, ChecksumAlgorithm::Sha256).unwrap(),
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[test]
    fn missing_file_is_an_error() {
        let fs = MockFileSystem::new();
        assert!(compute_checksum(&fs, Path::new("/gone"), ChecksumAlgorithm::Blake3).is_err());
    }
}
