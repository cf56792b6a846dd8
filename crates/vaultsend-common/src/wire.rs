//! Vaultsend wire protocol
//!
//! Every request shares one envelope:
//!
//! ```text
//! ┌───────────┬─────────┬────────┬──────────────┬──────────┐
//! │ client_id │ version │ code   │ payload_size │ payload  │
//! │ 16 bytes  │ 1 byte  │ u16 LE │ u32 LE       │ N bytes  │
//! └───────────┴─────────┴────────┴──────────────┴──────────┘
//! ```
//!
//! Responses carry a 7-byte header (version, code u16 LE, payload_size
//! u32 LE) followed by a code-specific payload; payload parsing belongs to
//! the session layer, which knows which exchange it is in.
//!
//! String fields are fixed width: the value is truncated to `width - 1`
//! bytes when it does not fit, then null-padded to exactly `width`.

use bytes::{Buf, BufMut};
use thiserror::Error;
use tracing::warn;

/// Protocol version sent in every request header.
pub const CLIENT_VERSION: u8 = 3;

/// Total attempts for any request/response exchange before giving up.
pub const NUMBER_OF_ATTEMPTS: u32 = 4;

/// Ciphertext bytes carried by a single SEND_FILE request.
pub const CHUNK_SIZE: usize = 4096;

/// Width of the server-assigned client identifier.
pub const CLIENT_ID_LEN: usize = 16;

/// Width of name and file-name fields, null terminator included.
pub const NAME_LEN: usize = 255;

/// Width of the public-key field.
pub const PUBLIC_KEY_LEN: usize = 160;

/// Request header size: client_id + version + code + payload_size.
pub const REQUEST_HEADER_LEN: usize = CLIENT_ID_LEN + 1 + 2 + 4;

/// Response header size: version + code + payload_size.
pub const RESPONSE_HEADER_LEN: usize = 7;

/// Upper bound on a declared response payload before the header is treated
/// as garbage. Real responses top out at a few hundred bytes.
pub const MAX_RESPONSE_PAYLOAD: u32 = 65536;

/// Client ID carried by a registration request.
pub const ZERO_CLIENT_ID: [u8; CLIENT_ID_LEN] = [0u8; CLIENT_ID_LEN];

/// Wire-level decode failures.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum WireError {
    /// Fewer bytes than a response header requires.
    #[error("response header too short: got {got} bytes, expected 7")]
    MalformedHeader {
        /// How many bytes were available.
        got: usize,
    },

    /// The response code is not part of the protocol.
    #[error("unknown response code {0}")]
    UnknownCode(u16),

    /// The declared payload size cannot belong to a real response.
    #[error("response payload size {size} exceeds limit {MAX_RESPONSE_PAYLOAD}")]
    OversizedPayload {
        /// The size the header declared.
        size: u32,
    },
}

/// A client request, one variant per protocol code.
///
/// Packing a variant yields the complete packet: the shared envelope header
/// followed by the variant's payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// Code 825: claim a new identity. Always sent with an all-zero client ID.
    Register {
        /// Display name for the new identity.
        name: String,
    },

    /// Code 826: upload the RSA public key; answered by the wrapped AES key.
    SendPublicKey {
        /// Display name, repeated from registration.
        name: String,
        /// PKCS#1 DER public key, zero-padded to [`PUBLIC_KEY_LEN`].
        public_key: Vec<u8>,
    },

    /// Code 827: resume a prior identity; answered by a fresh wrapped AES key.
    Reconnect {
        /// Display name recorded at registration.
        name: String,
    },

    /// Code 828: one encrypted file chunk.
    SendFile {
        /// Total AES ciphertext size of the file.
        encrypted_size: u32,
        /// Plaintext size of the file.
        original_size: u32,
        /// 1-based position of this packet.
        packet_number: u16,
        /// Packet count declared for the whole transfer.
        total_packets: u16,
        /// Basename of the file being sent.
        file_name: String,
        /// Ciphertext slice, at most [`CHUNK_SIZE`] bytes.
        chunk: Vec<u8>,
    },

    /// Code 900: client checksum matches the server's.
    CrcOk {
        /// Basename of the transferred file.
        file_name: String,
    },

    /// Code 901: checksum mismatch, the file will be re-sent. The server
    /// sends no response to this code.
    CrcBad {
        /// Basename of the transferred file.
        file_name: String,
    },

    /// Code 902: checksum mismatch on the final attempt, transfer abandoned.
    CrcTerminate {
        /// Basename of the transferred file.
        file_name: String,
    },
}

impl Request {
    /// Protocol code for this variant.
    pub fn code(&self) -> u16 {
        match self {
            Request::Register { .. } => 825,
            Request::SendPublicKey { .. } => 826,
            Request::Reconnect { .. } => 827,
            Request::SendFile { .. } => 828,
            Request::CrcOk { .. } => 900,
            Request::CrcBad { .. } => 901,
            Request::CrcTerminate { .. } => 902,
        }
    }

    fn payload_size(&self) -> u32 {
        match self {
            Request::Register { .. } | Request::Reconnect { .. } => NAME_LEN as u32,
            Request::SendPublicKey { .. } => (NAME_LEN + PUBLIC_KEY_LEN) as u32,
            Request::SendFile { chunk, .. } => (4 + 4 + 2 + 2 + NAME_LEN + chunk.len()) as u32,
            Request::CrcOk { .. } | Request::CrcBad { .. } | Request::CrcTerminate { .. } => {
                NAME_LEN as u32
            }
        }
    }

    /// Serialize the full packet (little-endian).
    ///
    /// Registration ignores `client_id` and goes out with [`ZERO_CLIENT_ID`].
    pub fn pack(&self, client_id: &[u8; CLIENT_ID_LEN]) -> Vec<u8> {
        let mut buf = Vec::with_capacity(REQUEST_HEADER_LEN + self.payload_size() as usize);

        match self {
            Request::Register { .. } => buf.put_slice(&ZERO_CLIENT_ID),
            _ => buf.put_slice(client_id),
        }
        buf.put_u8(CLIENT_VERSION);
        buf.put_u16_le(self.code());
        buf.put_u32_le(self.payload_size());

        match self {
            Request::Register { name } | Request::Reconnect { name } => {
                put_padded_str(&mut buf, name, NAME_LEN);
            }
            Request::SendPublicKey { name, public_key } => {
                put_padded_str(&mut buf, name, NAME_LEN);
                put_padded_bytes(&mut buf, public_key, PUBLIC_KEY_LEN);
            }
            Request::SendFile {
                encrypted_size,
                original_size,
                packet_number,
                total_packets,
                file_name,
                chunk,
            } => {
                buf.put_u32_le(*encrypted_size);
                buf.put_u32_le(*original_size);
                buf.put_u16_le(*packet_number);
                buf.put_u16_le(*total_packets);
                put_padded_str(&mut buf, file_name, NAME_LEN);
                buf.put_slice(chunk);
            }
            Request::CrcOk { file_name }
            | Request::CrcBad { file_name }
            | Request::CrcTerminate { file_name } => {
                put_padded_str(&mut buf, file_name, NAME_LEN);
            }
        }

        buf
    }
}

/// Write a string field at its fixed wire width: truncated to `width - 1`
/// bytes when too long, then null-padded to exactly `width`.
fn put_padded_str(buf: &mut Vec<u8>, value: &str, width: usize) {
    let bytes = value.as_bytes();
    let kept = if bytes.len() >= width {
        warn!(
            "string field is {} bytes, longer than {} - truncating",
            bytes.len(),
            width - 1
        );
        &bytes[..width - 1]
    } else {
        bytes
    };
    buf.put_slice(kept);
    buf.put_bytes(0, width - kept.len());
}

/// Write a binary field at its fixed wire width, zero-padded.
fn put_padded_bytes(buf: &mut Vec<u8>, value: &[u8], width: usize) {
    let kept = if value.len() > width {
        warn!(
            "binary field is {} bytes, longer than {} - truncating",
            value.len(),
            width
        );
        &value[..width]
    } else {
        value
    };
    buf.put_slice(kept);
    buf.put_bytes(0, width - kept.len());
}

/// Parsed response envelope header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseHeader {
    /// Server protocol version.
    pub version: u8,

    /// Raw response code; see [`ResponseCode`].
    pub code: u16,

    /// Size of the payload that follows the header.
    pub payload_size: u32,
}

impl ResponseHeader {
    /// Parse the 7-byte response header (little-endian).
    pub fn unpack(data: &[u8]) -> Result<Self, WireError> {
        if data.len() < RESPONSE_HEADER_LEN {
            return Err(WireError::MalformedHeader { got: data.len() });
        }

        let mut data = data;
        let version = data.get_u8();
        let code = data.get_u16_le();
        let payload_size = data.get_u32_le();

        Ok(Self {
            version,
            code,
            payload_size,
        })
    }

    /// The response code, if it belongs to the protocol.
    pub fn response_code(&self) -> Result<ResponseCode, WireError> {
        ResponseCode::from_u16(self.code).ok_or(WireError::UnknownCode(self.code))
    }
}

/// Server response codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseCode {
    /// 1600: registration accepted, payload carries the new client ID.
    RegisterSuccess,
    /// 1601: registration refused.
    RegisterFailure,
    /// 1602: reply to SEND_PUBLIC_KEY, payload carries the wrapped AES key.
    AesKey,
    /// 1603: file received, payload carries the server's checksum.
    SendFileSuccess,
    /// 1604: acknowledgement of a CRC verdict.
    MessageConfirm,
    /// 1605: reconnection accepted, payload carries a fresh wrapped AES key.
    ReconnectSuccess,
    /// 1606: reconnection refused; the client must register again.
    ReconnectRejected,
    /// 1607: generic server-side failure.
    GeneralFailure,
}

impl ResponseCode {
    /// Map a wire code to its enum value, `None` for codes outside the
    /// protocol.
    pub fn from_u16(code: u16) -> Option<Self> {
        match code {
            1600 => Some(ResponseCode::RegisterSuccess),
            1601 => Some(ResponseCode::RegisterFailure),
            1602 => Some(ResponseCode::AesKey),
            1603 => Some(ResponseCode::SendFileSuccess),
            1604 => Some(ResponseCode::MessageConfirm),
            1605 => Some(ResponseCode::ReconnectSuccess),
            1606 => Some(ResponseCode::ReconnectRejected),
            1607 => Some(ResponseCode::GeneralFailure),
            _ => None,
        }
    }

    /// Human-readable description used in retry and failure logs.
    pub fn description(&self) -> &'static str {
        match self {
            ResponseCode::RegisterSuccess => "Registration success",
            ResponseCode::RegisterFailure => "Registration failed",
            ResponseCode::AesKey => "AES key sending",
            ResponseCode::SendFileSuccess => "File sending success",
            ResponseCode::MessageConfirm => "Message confirmed",
            ResponseCode::ReconnectSuccess => "Reconnection success",
            ResponseCode::ReconnectRejected => "Reconnection failed",
            ResponseCode::GeneralFailure => "General failure",
        }
    }
}
