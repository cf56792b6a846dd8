//! transfer.info configuration
//!
//! Three lines, all mandatory: `host:port`, the client display name, and the
//! path of the file to upload. The file lives in the session working
//! directory and a missing or malformed copy is fatal; relative upload paths
//! resolve against that same directory.

use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use tracing::{info, warn};
use vaultsend_common::wire::NAME_LEN;

/// File name of the transfer configuration.
pub const TRANSFER_INFO: &str = "transfer.info";

/// Parsed transfer.info.
#[derive(Debug, Clone)]
pub struct TransferConfig {
    /// Server address, IPv4 only.
    pub host: Ipv4Addr,

    /// Server port.
    pub port: u16,

    /// Display name as written in the file. Only consulted when me.info does
    /// not already hold a registered name.
    pub name: String,

    /// File to upload, resolved against the session directory.
    pub file_path: PathBuf,
}

impl TransferConfig {
    /// Load and validate transfer.info from `dir`.
    pub fn load(dir: &Path) -> Result<Self> {
        let path = dir.join(TRANSFER_INFO);
        let contents = std::fs::read_to_string(&path)
            .with_context(|| format!("could not read {}", path.display()))?;
        let mut lines = contents.lines();

        let address = lines.next().context("transfer.info is empty")?;
        let (host, port) = parse_address(address)?;

        let name = lines
            .next()
            .context("transfer.info is missing the client name line")?
            .to_string();

        let file_line = lines
            .next()
            .context("transfer.info is missing the file path line")?;
        if file_line.is_empty() {
            bail!("transfer.info file path line is empty");
        }

        info!(
            address = %format!("{host}:{port}"),
            file = file_line,
            "transfer.info loaded"
        );

        Ok(Self {
            host,
            port,
            name,
            file_path: dir.join(file_line),
        })
    }
}

fn parse_address(line: &str) -> Result<(Ipv4Addr, u16)> {
    let (host, port) = line
        .split_once(':')
        .with_context(|| format!("address {line:?} is not in host:port form"))?;

    // Ipv4Addr's parser accepts exactly the strict dotted quad the protocol
    // allows: four octets in 0-255, no leading zeros
    let host: Ipv4Addr = host
        .parse()
        .with_context(|| format!("host {host:?} is not an IPv4 dotted quad"))?;
    let port: u16 = port
        .parse()
        .with_context(|| format!("port {port:?} is not an integer in 0-65535"))?;

    Ok((host, port))
}

/// Cap a display name to what its wire field can carry, on a char boundary.
pub fn effective_name(name: &str) -> String {
    if name.len() < NAME_LEN {
        return name.to_string();
    }
    warn!(
        "client name in transfer.info is longer than {} bytes, truncating",
        NAME_LEN - 1
    );
    let mut cut = NAME_LEN - 1;
    while !name.is_char_boundary(cut) {
        cut -= 1;
    }
    name[..cut].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_config(dir: &Path, contents: &str) {
        std::fs::write(dir.join(TRANSFER_INFO), contents).unwrap();
    }

    #[test]
    fn test_load_valid_config() {
        let dir = tempfile::tempdir().unwrap();
        write_config(dir.path(), "127.0.0.1:1234\nAlice\n./a.bin\n");

        let config = TransferConfig::load(dir.path()).unwrap();
        assert_eq!(config.host, Ipv4Addr::new(127, 0, 0, 1));
        assert_eq!(config.port, 1234);
        assert_eq!(config.name, "Alice");
        assert_eq!(config.file_path, dir.path().join("./a.bin"));
    }

    #[test]
    fn test_absolute_file_path_kept() {
        let dir = tempfile::tempdir().unwrap();
        write_config(dir.path(), "10.0.0.7:8080\nBob\n/data/payload.bin\n");

        let config = TransferConfig::load(dir.path()).unwrap();
        assert_eq!(config.file_path, PathBuf::from("/data/payload.bin"));
    }

    #[test]
    fn test_missing_file_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        assert!(TransferConfig::load(dir.path()).is_err());
    }

    #[test]
    fn test_rejects_bad_hosts() {
        let dir = tempfile::tempdir().unwrap();
        for address in [
            "256.1.1.1:80",
            "1.2.3:80",
            "host.example:80",
            "01.2.3.4:80",
            "1.2.3.4",
        ] {
            write_config(dir.path(), &format!("{address}\nAlice\na.bin\n"));
            assert!(
                TransferConfig::load(dir.path()).is_err(),
                "accepted {address}"
            );
        }
    }

    #[test]
    fn test_rejects_bad_ports() {
        let dir = tempfile::tempdir().unwrap();
        for address in ["1.2.3.4:65536", "1.2.3.4:-1", "1.2.3.4:port"] {
            write_config(dir.path(), &format!("{address}\nAlice\na.bin\n"));
            assert!(
                TransferConfig::load(dir.path()).is_err(),
                "accepted {address}"
            );
        }
    }

    #[test]
    fn test_missing_lines_are_fatal() {
        let dir = tempfile::tempdir().unwrap();
        write_config(dir.path(), "127.0.0.1:1234\nAlice\n");
        assert!(TransferConfig::load(dir.path()).is_err());
    }

    #[test]
    fn test_effective_name_truncates() {
        let long = "x".repeat(300);
        let capped = effective_name(&long);
        assert_eq!(capped.len(), NAME_LEN - 1);
        assert_eq!(effective_name("Alice"), "Alice");
    }
}
