//! Session state machine
//!
//! One linear pass: load configuration and any stored identity, connect,
//! reconnect (or register and upload a public key), unwrap the AES session
//! key, then stream the encrypted file until the server's checksum matches
//! or the attempts run out.
//!
//! Every request/response exchange goes through [`perform_operation`], which
//! builds the packet once and retries it a fixed number of times, so
//! registration, reconnection, key upload, and CRC confirmation all share
//! the same failure discipline. The only exception is CRC_BAD, which the
//! server never answers.

use std::path::Path;

use anyhow::{Context, Result, anyhow, bail};
use tracing::{error, info, warn};
use vaultsend_common::checksum;
use vaultsend_common::crypto;
use vaultsend_common::wire::{
    CLIENT_ID_LEN, NAME_LEN, NUMBER_OF_ATTEMPTS, Request, ResponseCode,
};

use crate::chunker::FileChunker;
use crate::config::{self, TransferConfig};
use crate::identity::IdentityStore;
use crate::transport::Connection;

/// How a completed session ended. Both are clean exits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    /// The server confirmed a matching checksum.
    Delivered,

    /// Checksums never matched; the transfer was abandoned with the
    /// server's acknowledgement.
    Aborted,
}

/// Verdict of a response parser on a single attempt.
enum Outcome<T> {
    Done(T),
    Retry(&'static str),
}

enum ReconnectOutcome {
    /// Payload of the 1605 response: echoed ID plus the wrapped AES key.
    Accepted(Vec<u8>),
    /// 1606: fall back to registration.
    Rejected,
}

/// One upload session over one connection.
pub struct Session {
    store: IdentityStore,
    config: TransferConfig,
    conn: Connection,
    name: String,
    client_id: [u8; CLIENT_ID_LEN],
    registered: bool,
}

impl Session {
    /// Run a full session out of `dir`, where the info files live.
    pub async fn run(dir: &Path) -> Result<SessionOutcome> {
        let config = TransferConfig::load(dir)?;
        let store = IdentityStore::new(dir);

        // me.info wins over transfer.info for the name, and keeps winning
        // even if the server later rejects the reconnect
        let (name, client_id, registered) = match store.load() {
            Some(identity) => (identity.name, identity.client_id, true),
            None => (
                config::effective_name(&config.name),
                [0u8; CLIENT_ID_LEN],
                false,
            ),
        };

        let conn = Connection::connect(config.host, config.port).await?;

        let mut session = Session {
            store,
            config,
            conn,
            name,
            client_id,
            registered,
        };

        let wrapped = session.establish_identity().await?;
        let aes_key = session.unwrap_aes_key(&wrapped)?;
        session.send_file(&aes_key).await
    }

    /// Reconnect when an identity is stored, falling back to registration
    /// plus key upload when the server rejects it (or nothing is stored).
    /// Returns the 1602/1605 payload carrying the wrapped AES key.
    async fn establish_identity(&mut self) -> Result<Vec<u8>> {
        if self.registered {
            match self.reconnect().await? {
                ReconnectOutcome::Accepted(payload) => return Ok(payload),
                ReconnectOutcome::Rejected => self.registered = false,
            }
        }
        self.register().await?;
        self.send_public_key().await
    }

    async fn register(&mut self) -> Result<()> {
        info!(name = %self.name, "registering with the server");
        let packet = Request::Register {
            name: self.name.clone(),
        }
        .pack(&self.client_id);

        let client_id = perform_operation(&mut self.conn, &packet, |code, payload| {
            if code != ResponseCode::RegisterSuccess {
                return Ok(Outcome::Retry(code.description()));
            }
            let id: [u8; CLIENT_ID_LEN] = payload
                .try_into()
                .map_err(|_| anyhow!("registration payload is not a 16-byte client ID"))?;
            Ok(Outcome::Done(id))
        })
        .await?;

        info!(id = %hex::encode(client_id), "registration accepted");
        self.client_id = client_id;
        self.store.persist_identity(&self.name, &client_id)?;
        Ok(())
    }

    /// Generate the RSA pair, persist the private half, upload the public
    /// half, and return the 1602 payload with the wrapped AES key.
    async fn send_public_key(&mut self) -> Result<Vec<u8>> {
        info!("generating an RSA key pair");
        let pair = crypto::rsa_generate()?;
        self.store.store_private_key(&pair.private_der)?;

        let packet = Request::SendPublicKey {
            name: self.name.clone(),
            public_key: pair.public_der,
        }
        .pack(&self.client_id);

        perform_operation(&mut self.conn, &packet, |code, payload| {
            if code != ResponseCode::AesKey {
                return Ok(Outcome::Retry(code.description()));
            }
            if payload.len() <= CLIENT_ID_LEN {
                bail!("AES key response carried no key material");
            }
            info!("public key accepted, AES key received");
            Ok(Outcome::Done(payload.to_vec()))
        })
        .await
    }

    async fn reconnect(&mut self) -> Result<ReconnectOutcome> {
        info!(name = %self.name, "attempting to reconnect");
        let packet = Request::Reconnect {
            name: self.name.clone(),
        }
        .pack(&self.client_id);

        perform_operation(&mut self.conn, &packet, |code, payload| match code {
            ResponseCode::ReconnectSuccess => {
                if payload.len() <= CLIENT_ID_LEN {
                    bail!("reconnect response carried no key material");
                }
                info!("reconnection accepted, AES key received");
                Ok(Outcome::Done(ReconnectOutcome::Accepted(payload.to_vec())))
            }
            ResponseCode::ReconnectRejected => {
                warn!("server rejected the reconnection, registering anew");
                Ok(Outcome::Done(ReconnectOutcome::Rejected))
            }
            other => Ok(Outcome::Retry(other.description())),
        })
        .await
    }

    /// Split a 1602/1605 payload into the echoed ID and the wrapped key, and
    /// unwrap it with the private key on disk.
    fn unwrap_aes_key(&self, payload: &[u8]) -> Result<Vec<u8>> {
        let wrapped = &payload[CLIENT_ID_LEN..];
        let private_der = self.store.load_private_key()?;
        let aes_key = crypto::rsa_decrypt(&private_der, wrapped)
            .context("could not unwrap the AES session key")?;
        info!(len = aes_key.len(), "AES session key unwrapped");
        Ok(aes_key)
    }

    async fn send_file(&mut self, aes_key: &[u8]) -> Result<SessionOutcome> {
        let path = self.config.file_path.clone();
        info!(path = %path.display(), "starting the file transfer");

        // checksum the plaintext in the background while we encrypt and send
        let crc_task = checksum::spawn(path.clone());
        let mut chunker = FileChunker::new(&path, aes_key)?;
        info!(
            original_size = chunker.original_size(),
            encrypted_size = chunker.ciphertext_size(),
            total_packets = chunker.total_packets(),
            "file prepared"
        );
        let file_name = chunker.file_name().to_string();
        let client_crc = crc_task.await.context("checksum worker failed")?;

        for attempt in 1..=NUMBER_OF_ATTEMPTS {
            info!(attempt, "streaming the file");
            chunker.reset();
            self.stream_chunks(&mut chunker).await?;

            let header = self.conn.recv_response_header().await?;
            let code = header.response_code()?;
            let payload = self.conn.recv_payload(&header).await?;
            if code != ResponseCode::SendFileSuccess {
                error!(
                    attempt,
                    code = header.code,
                    description = code.description(),
                    "server responded with an error"
                );
                continue;
            }

            let server_crc = parse_server_crc(&payload)?;
            info!(client_crc, server_crc, "comparing checksums");
            if server_crc == client_crc {
                info!("checksum confirmed");
                self.confirm_crc(Request::CrcOk {
                    file_name: file_name.clone(),
                })
                .await?;
                return Ok(SessionOutcome::Delivered);
            }

            if attempt < NUMBER_OF_ATTEMPTS {
                warn!("checksum mismatch, re-sending the file");
                // 901 gets no reply; flag the retry and stream again
                let packet = Request::CrcBad {
                    file_name: file_name.clone(),
                }
                .pack(&self.client_id);
                self.conn.send(&packet).await?;
            } else {
                error!("checksum mismatch on the final attempt, abandoning the transfer");
                self.confirm_crc(Request::CrcTerminate {
                    file_name: file_name.clone(),
                })
                .await?;
                return Ok(SessionOutcome::Aborted);
            }
        }

        bail!("server never accepted the file after {NUMBER_OF_ATTEMPTS} attempts")
    }

    async fn stream_chunks(&mut self, chunker: &mut FileChunker) -> Result<()> {
        let encrypted_size = chunker.ciphertext_size();
        let original_size = chunker.original_size();
        let total_packets = chunker.total_packets();
        let file_name = chunker.file_name().to_string();

        while let Some(chunk) = chunker.next_chunk() {
            let packet_number = chunker.packets_emitted();
            let request = Request::SendFile {
                encrypted_size,
                original_size,
                packet_number,
                total_packets,
                file_name: file_name.clone(),
                chunk,
            };
            self.conn.send(&request.pack(&self.client_id)).await?;
            info!(packet_number, total_packets, "packet sent");
        }
        Ok(())
    }

    /// Send a CRC verdict the server acknowledges with MESSAGE_CONFIRM.
    async fn confirm_crc(&mut self, request: Request) -> Result<()> {
        let packet = request.pack(&self.client_id);
        perform_operation(&mut self.conn, &packet, |code, _payload| {
            if code == ResponseCode::MessageConfirm {
                Ok(Outcome::Done(()))
            } else {
                Ok(Outcome::Retry(code.description()))
            }
        })
        .await
    }
}

/// Uniform retry discipline for one request/response exchange.
///
/// The packed request is reused across up to [`NUMBER_OF_ATTEMPTS`]
/// send/receive rounds; `parse` judges each response from its code and
/// payload. A response outside the protocol is fatal immediately; running
/// out of attempts surfaces the server's last reported description.
async fn perform_operation<T>(
    conn: &mut Connection,
    packet: &[u8],
    mut parse: impl FnMut(ResponseCode, &[u8]) -> Result<Outcome<T>>,
) -> Result<T> {
    let mut last_description = "no response";
    for attempt in 1..=NUMBER_OF_ATTEMPTS {
        info!(attempt, "sending request");
        conn.send(packet).await?;

        let header = conn.recv_response_header().await?;
        let code = header.response_code()?;
        let payload = conn.recv_payload(&header).await?;

        match parse(code, &payload)? {
            Outcome::Done(value) => return Ok(value),
            Outcome::Retry(description) => {
                error!(
                    attempt,
                    code = header.code,
                    description,
                    "server responded with an error"
                );
                last_description = description;
            }
        }
    }
    Err(anyhow!(
        "server rejected the request after {NUMBER_OF_ATTEMPTS} attempts: {last_description}"
    ))
}

/// Pull the trailing CRC out of a SEND_FILE_SUCCESS payload:
/// `client_id[16] ++ encrypted_size[4] ++ file_name[255] ++ crc[4]`.
fn parse_server_crc(payload: &[u8]) -> Result<u32> {
    const EXPECTED: usize = CLIENT_ID_LEN + 4 + NAME_LEN + 4;
    if payload.len() != EXPECTED {
        bail!(
            "SEND_FILE_SUCCESS payload is {} bytes, expected {EXPECTED}",
            payload.len()
        );
    }
    Ok(u32::from_le_bytes([
        payload[EXPECTED - 4],
        payload[EXPECTED - 3],
        payload[EXPECTED - 2],
        payload[EXPECTED - 1],
    ]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_server_crc() {
        let mut payload = vec![0u8; CLIENT_ID_LEN + 4 + NAME_LEN];
        payload.extend_from_slice(&0xDEAD_BEEFu32.to_le_bytes());

        assert_eq!(parse_server_crc(&payload).unwrap(), 0xDEAD_BEEF);
        assert!(parse_server_crc(&payload[1..]).is_err());
    }
}
