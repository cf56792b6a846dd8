//! POSIX `cksum`-compatible checksum
//!
//! The server verifies file integrity with the `cksum(1)` CRC: an
//! unreflected CRC-32 (polynomial 0x04C11DB7, zero init) over the file
//! contents, then over the content length as minimal little-endian octets,
//! with the final register complemented. Matching `cksum` bit-for-bit is the
//! interoperability contract with the server.
//!
//! # Test vector
//!
//! ```
//! use vaultsend_common::checksum::memcrc;
//!
//! // printf '%s' 123456789 | cksum   ->   930766865
//! assert_eq!(memcrc(b"123456789"), 930766865);
//! ```

use std::path::PathBuf;

use tokio::task::JoinHandle;
use tracing::warn;

/// CRC-32 polynomial used by `cksum(1)`.
const POLY: u32 = 0x04C1_1DB7;

/// Precomputed lookup table, generated at compile time.
const CRC_TABLE: [u32; 256] = {
    let mut table = [0u32; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = (i as u32) << 24;
        let mut j = 0;
        while j < 8 {
            crc = if crc & 0x8000_0000 != 0 {
                (crc << 1) ^ POLY
            } else {
                crc << 1
            };
            j += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
};

/// Checksum an in-memory buffer, `cksum(1)`-compatible.
#[must_use]
pub fn memcrc(data: &[u8]) -> u32 {
    let mut state: u32 = 0;
    for &byte in data {
        state = (state << 8) ^ CRC_TABLE[((state >> 24) ^ u32::from(byte)) as usize];
    }

    // feed the length, low octet first, as cksum does
    let mut remaining = data.len();
    while remaining != 0 {
        let octet = (remaining & 0xFF) as u32;
        remaining >>= 8;
        state = (state << 8) ^ CRC_TABLE[((state >> 24) ^ octet) as usize];
    }

    !state
}

/// Start checksumming `path` on the blocking pool.
///
/// The transfer pipeline overlaps this with encryption and chunk sends and
/// joins the handle right before the first CRC comparison. An unreadable
/// file yields 0, a value the server will not report for a delivered file,
/// which routes into the ordinary mismatch path.
pub fn spawn(path: PathBuf) -> JoinHandle<u32> {
    tokio::task::spawn_blocking(move || match std::fs::read(&path) {
        Ok(contents) => memcrc(&contents),
        Err(error) => {
            warn!(path = %path.display(), %error, "checksum read failed");
            0
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_cksum_values() {
        // cross-checked against coreutils cksum
        assert_eq!(memcrc(b"123456789"), 930766865);
        assert_eq!(memcrc(b""), 4294967295);
    }

    #[test]
    fn test_length_feed_distinguishes_zero_runs() {
        // same bytes, different lengths: the length octets must matter
        assert_ne!(memcrc(&[0u8; 10]), memcrc(&[0u8; 11]));
    }

    #[tokio::test]
    async fn test_spawn_matches_memcrc() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("payload.bin");
        let contents = vec![0xAB; 5000];
        std::fs::write(&path, &contents).unwrap();

        let crc = spawn(path).await.unwrap();
        assert_eq!(crc, memcrc(&contents));
    }

    #[tokio::test]
    async fn test_spawn_missing_file_yields_zero() {
        let dir = tempfile::tempdir().unwrap();
        let crc = spawn(dir.path().join("absent.bin")).await.unwrap();
        assert_eq!(crc, 0);
    }
}
