//! Socket plumbing
//!
//! One TCP connection per session, held open from the first request to
//! process exit. Reads and writes are sequential awaits on the session task,
//! so request N is fully flushed before response N is read and nothing can
//! interleave on the wire.

use std::net::Ipv4Addr;

use anyhow::{Context, Result};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, info};
use vaultsend_common::wire::{
    MAX_RESPONSE_PAYLOAD, RESPONSE_HEADER_LEN, ResponseHeader, WireError,
};

/// The session's connection to the upload server.
#[derive(Debug)]
pub struct Connection {
    stream: TcpStream,
}

impl Connection {
    /// Connect to the server. Failure is fatal for the session.
    pub async fn connect(host: Ipv4Addr, port: u16) -> Result<Self> {
        let stream = TcpStream::connect((host, port))
            .await
            .with_context(|| format!("could not connect to {host}:{port}"))?;
        info!("connected to {host}:{port}");
        Ok(Self { stream })
    }

    /// Send a complete packet.
    pub async fn send(&mut self, packet: &[u8]) -> Result<()> {
        debug!(len = packet.len(), "sending request");
        self.stream
            .write_all(packet)
            .await
            .context("socket write failed")?;
        self.stream.flush().await.context("socket flush failed")?;
        Ok(())
    }

    /// Read exactly `len` bytes.
    pub async fn recv_exact(&mut self, len: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        self.stream
            .read_exact(&mut buf)
            .await
            .context("socket read failed")?;
        Ok(buf)
    }

    /// Read and parse one response header.
    pub async fn recv_response_header(&mut self) -> Result<ResponseHeader> {
        let raw = self.recv_exact(RESPONSE_HEADER_LEN).await?;
        Ok(ResponseHeader::unpack(&raw)?)
    }

    /// Read the payload the header declares, within the plausibility bound.
    pub async fn recv_payload(&mut self, header: &ResponseHeader) -> Result<Vec<u8>> {
        if header.payload_size > MAX_RESPONSE_PAYLOAD {
            return Err(WireError::OversizedPayload {
                size: header.payload_size,
            }
            .into());
        }
        self.recv_exact(header.payload_size as usize).await
    }
}
