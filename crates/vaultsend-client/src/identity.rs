//! Persistent client identity
//!
//! me.info records the registered identity: line 1 the display name, line 2
//! the client ID as lowercase hex (newline per 16 decoded bytes), and the
//! remaining lines the base64 PKCS#1 private key. priv.key carries the same
//! base64 key and is the authoritative copy for decryption. Both files live
//! in the session working directory.
//!
//! A missing me.info simply means the client has never registered. A
//! malformed one is logged and treated the same way; the server-side
//! identity is then replaced by a fresh registration.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{info, warn};
use vaultsend_common::crypto;
use vaultsend_common::wire::CLIENT_ID_LEN;

/// Identity file written after registration.
pub const ME_INFO: &str = "me.info";

/// Private-key file, overwritten on every key generation.
pub const PRIV_KEY: &str = "priv.key";

/// Identity loaded back from me.info.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredIdentity {
    /// Display name recorded at registration.
    pub name: String,

    /// Server-assigned client ID.
    pub client_id: [u8; CLIENT_ID_LEN],
}

/// Reads and writes the identity files of one working directory.
#[derive(Debug, Clone)]
pub struct IdentityStore {
    dir: PathBuf,
}

impl IdentityStore {
    /// A store over the identity files in `dir`.
    pub fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
        }
    }

    fn me_info_path(&self) -> PathBuf {
        self.dir.join(ME_INFO)
    }

    fn priv_key_path(&self) -> PathBuf {
        self.dir.join(PRIV_KEY)
    }

    /// Load me.info. `None` means unregistered: the file is absent, or its
    /// content is malformed (logged; registration follows).
    pub fn load(&self) -> Option<StoredIdentity> {
        let contents = match std::fs::read_to_string(self.me_info_path()) {
            Ok(contents) => contents,
            Err(_) => {
                info!("me.info not found, client is not registered");
                return None;
            }
        };

        match parse_me_info(&contents) {
            Ok(identity) => {
                info!(
                    name = %identity.name,
                    id = %hex::encode(identity.client_id),
                    "me.info loaded"
                );
                Some(identity)
            }
            Err(error) => {
                warn!(%error, "me.info is malformed, registering anew");
                None
            }
        }
    }

    /// Write a fresh me.info with the registered name and server-assigned ID.
    /// Replaces any previous identity.
    pub fn persist_identity(&self, name: &str, client_id: &[u8; CLIENT_ID_LEN]) -> Result<()> {
        let path = self.me_info_path();
        let contents = format!("{name}\n{}", crypto::hexify(client_id));
        std::fs::write(&path, contents)
            .with_context(|| format!("could not write {}", path.display()))?;
        Ok(())
    }

    /// Record a newly generated private key: base64, appended to me.info and
    /// written to priv.key (replacing any previous key).
    pub fn store_private_key(&self, private_der: &[u8]) -> Result<()> {
        let encoded = crypto::base64_encode(private_der);

        let key_path = self.priv_key_path();
        std::fs::write(&key_path, &encoded)
            .with_context(|| format!("could not write {}", key_path.display()))?;

        let me_path = self.me_info_path();
        let mut me_info = OpenOptions::new()
            .append(true)
            .create(true)
            .open(&me_path)
            .with_context(|| format!("could not open {}", me_path.display()))?;
        me_info
            .write_all(encoded.as_bytes())
            .with_context(|| format!("could not append the key to {}", me_path.display()))?;

        Ok(())
    }

    /// Read priv.key, concatenating all lines, and decode the PKCS#1 DER.
    pub fn load_private_key(&self) -> Result<Vec<u8>> {
        let path = self.priv_key_path();
        let contents = std::fs::read_to_string(&path)
            .with_context(|| format!("could not read {}", path.display()))?;
        let encoded: String = contents.lines().collect();
        crypto::base64_decode(&encoded).context("priv.key is not valid base64")
    }
}

fn parse_me_info(contents: &str) -> Result<StoredIdentity> {
    let mut lines = contents.lines();

    let name = lines
        .next()
        .filter(|line| !line.is_empty())
        .context("missing name line")?;
    let id_line = lines.next().context("missing client ID line")?;

    let id_bytes = crypto::dehexify(id_line).context("client ID is not hex")?;
    let client_id: [u8; CLIENT_ID_LEN] = id_bytes
        .as_slice()
        .try_into()
        .ok()
        .context("client ID is not 16 bytes")?;

    Ok(StoredIdentity {
        name: name.to_string(),
        client_id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const ID: [u8; CLIENT_ID_LEN] = [
        0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0A, 0x0B, 0x0C, 0x0D, 0x0E, 0x0F,
        0x10,
    ];

    #[test]
    fn test_identity_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = IdentityStore::new(dir.path());

        store.persist_identity("Alice", &ID).unwrap();
        let loaded = store.load().unwrap();
        assert_eq!(loaded.name, "Alice");
        assert_eq!(loaded.client_id, ID);
    }

    #[test]
    fn test_me_info_format() {
        let dir = tempfile::tempdir().unwrap();
        let store = IdentityStore::new(dir.path());

        store.persist_identity("Alice", &ID).unwrap();
        let contents = std::fs::read_to_string(dir.path().join(ME_INFO)).unwrap();
        assert_eq!(contents, "Alice\n0102030405060708090a0b0c0d0e0f10\n");
    }

    #[test]
    fn test_private_key_roundtrip_and_me_info_append() {
        let dir = tempfile::tempdir().unwrap();
        let store = IdentityStore::new(dir.path());
        let key_der = vec![0x30, 0x82, 0x02, 0x5C, 0xAA, 0xBB];

        store.persist_identity("Alice", &ID).unwrap();
        store.store_private_key(&key_der).unwrap();

        assert_eq!(store.load_private_key().unwrap(), key_der);

        // the key lands on its own line after the hex ID, identity intact
        let contents = std::fs::read_to_string(dir.path().join(ME_INFO)).unwrap();
        assert!(contents.starts_with("Alice\n0102030405060708090a0b0c0d0e0f10\n"));
        assert_eq!(store.load().unwrap().client_id, ID);
    }

    #[test]
    fn test_private_key_spanning_lines() {
        let dir = tempfile::tempdir().unwrap();
        let store = IdentityStore::new(dir.path());

        // keys written by other tooling may be wrapped; lines concatenate
        let encoded = crypto::base64_encode(&[0xAB; 96]);
        let (head, tail) = encoded.split_at(64);
        std::fs::write(dir.path().join(PRIV_KEY), format!("{head}\n{tail}\n")).unwrap();

        assert_eq!(store.load_private_key().unwrap(), vec![0xAB; 96]);
    }

    #[test]
    fn test_absent_me_info_means_unregistered() {
        let dir = tempfile::tempdir().unwrap();
        assert!(IdentityStore::new(dir.path()).load().is_none());
    }

    #[test]
    fn test_malformed_me_info_means_unregistered() {
        let dir = tempfile::tempdir().unwrap();
        let store = IdentityStore::new(dir.path());

        for contents in ["", "Alice\n", "Alice\nnot-hex\n", "Alice\nabcd\n"] {
            std::fs::write(dir.path().join(ME_INFO), contents).unwrap();
            assert!(store.load().is_none(), "accepted {contents:?}");
        }
    }
}
