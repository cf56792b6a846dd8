//! File chunking for transmission
//!
//! The plaintext is read once, encrypted once with the session AES key, and
//! the ciphertext is walked in 4096-byte chunks. The declared packet count
//! is `ciphertext_len / 4096 + 1`: when the ciphertext is an exact multiple
//! of the chunk size the final packet is deliberately empty. The server
//! counts packets with the same convention, so the terminal packet is sent
//! either way.

use std::path::Path;

use anyhow::{Context, Result};
use vaultsend_common::crypto;
use vaultsend_common::wire::CHUNK_SIZE;

/// Owns the encrypted file and deals it out packet by packet.
pub struct FileChunker {
    file_name: String,
    original_size: u32,
    ciphertext: Vec<u8>,
    total_packets: u16,
    pos: usize,
    packets_emitted: u16,
}

impl FileChunker {
    /// Read `path` and encrypt its contents with `aes_key`.
    pub fn new(path: &Path, aes_key: &[u8]) -> Result<Self> {
        let plaintext = std::fs::read(path)
            .with_context(|| format!("could not open the file to send: {}", path.display()))?;
        let original_size = u32::try_from(plaintext.len())
            .with_context(|| format!("{} does not fit the 4 GiB size field", path.display()))?;

        let ciphertext = crypto::aes_encrypt(aes_key, &plaintext)?;
        let total_packets = u16::try_from(ciphertext.len() / CHUNK_SIZE + 1)
            .with_context(|| format!("{} needs more packets than the protocol can count", path.display()))?;

        let file_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .map(str::to_string)
            .with_context(|| format!("file path {} has no file name", path.display()))?;

        Ok(Self {
            file_name,
            original_size,
            ciphertext,
            total_packets,
            pos: 0,
            packets_emitted: 0,
        })
    }

    /// Packet count declared for the transfer; the terminal partial packet
    /// is counted even when it is empty.
    pub fn total_packets(&self) -> u16 {
        self.total_packets
    }

    /// Total AES ciphertext size.
    pub fn ciphertext_size(&self) -> u32 {
        self.ciphertext.len() as u32
    }

    /// Plaintext size of the file.
    pub fn original_size(&self) -> u32 {
        self.original_size
    }

    /// Basename of the file, as it goes on the wire.
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// Next chunk, `None` once every packet of this pass has been emitted.
    /// The final chunk may be empty.
    pub fn next_chunk(&mut self) -> Option<Vec<u8>> {
        if self.finished() {
            return None;
        }
        let end = (self.pos + CHUNK_SIZE).min(self.ciphertext.len());
        let chunk = self.ciphertext[self.pos..end].to_vec();
        self.pos = end;
        self.packets_emitted += 1;
        Some(chunk)
    }

    /// Whether every packet of this pass has been emitted.
    pub fn finished(&self) -> bool {
        self.packets_emitted == self.total_packets
    }

    /// 1-based number of the packet most recently returned by
    /// [`next_chunk`](Self::next_chunk).
    pub fn packets_emitted(&self) -> u16 {
        self.packets_emitted
    }

    /// Rewind for a full re-stream after a checksum mismatch.
    pub fn reset(&mut self) {
        self.pos = 0;
        self.packets_emitted = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: [u8; 16] = [7u8; 16];

    fn chunker_for(dir: &tempfile::TempDir, contents: &[u8]) -> FileChunker {
        let path = dir.path().join("a.bin");
        std::fs::write(&path, contents).unwrap();
        FileChunker::new(&path, &KEY).unwrap()
    }

    #[test]
    fn test_partial_terminal_chunk() {
        let dir = tempfile::tempdir().unwrap();
        // 5000 plaintext bytes -> 5008 ciphertext -> packets of 4096 and 912
        let mut chunker = chunker_for(&dir, &[0xAB; 5000]);

        assert_eq!(chunker.original_size(), 5000);
        assert_eq!(chunker.ciphertext_size(), 5008);
        assert_eq!(chunker.total_packets(), 2);
        assert_eq!(chunker.file_name(), "a.bin");

        assert_eq!(chunker.next_chunk().unwrap().len(), 4096);
        assert_eq!(chunker.packets_emitted(), 1);
        assert_eq!(chunker.next_chunk().unwrap().len(), 912);
        assert_eq!(chunker.packets_emitted(), 2);
        assert!(chunker.finished());
        assert!(chunker.next_chunk().is_none());
    }

    #[test]
    fn test_aligned_ciphertext_gets_empty_terminal_chunk() {
        let dir = tempfile::tempdir().unwrap();
        // 4080 plaintext bytes pad to exactly 4096 of ciphertext
        let mut chunker = chunker_for(&dir, &[0x11; 4080]);

        assert_eq!(chunker.ciphertext_size(), 4096);
        assert_eq!(chunker.total_packets(), 2);

        assert_eq!(chunker.next_chunk().unwrap().len(), 4096);
        let terminal = chunker.next_chunk().unwrap();
        assert!(terminal.is_empty());
        assert!(chunker.finished());
    }

    #[test]
    fn test_chunks_reassemble_to_ciphertext() {
        let dir = tempfile::tempdir().unwrap();
        let mut chunker = chunker_for(&dir, &[0x42; 10_000]);

        let mut reassembled = Vec::new();
        while let Some(chunk) = chunker.next_chunk() {
            reassembled.extend_from_slice(&chunk);
        }
        assert_eq!(reassembled.len() as u32, chunker.ciphertext_size());
    }

    #[test]
    fn test_reset_replays_the_stream() {
        let dir = tempfile::tempdir().unwrap();
        let mut chunker = chunker_for(&dir, &[0x42; 5000]);

        let first_pass: Vec<_> = std::iter::from_fn(|| chunker.next_chunk()).collect();
        chunker.reset();
        assert_eq!(chunker.packets_emitted(), 0);
        let second_pass: Vec<_> = std::iter::from_fn(|| chunker.next_chunk()).collect();

        assert_eq!(first_pass, second_pass);
    }

    #[test]
    fn test_empty_file_is_one_padded_packet() {
        let dir = tempfile::tempdir().unwrap();
        let mut chunker = chunker_for(&dir, &[]);

        // PKCS#7 always pads, so even an empty file ships one block
        assert_eq!(chunker.original_size(), 0);
        assert_eq!(chunker.ciphertext_size(), 16);
        assert_eq!(chunker.total_packets(), 1);
        assert_eq!(chunker.next_chunk().unwrap().len(), 16);
        assert!(chunker.finished());
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(FileChunker::new(&dir.path().join("absent.bin"), &KEY).is_err());
    }
}
