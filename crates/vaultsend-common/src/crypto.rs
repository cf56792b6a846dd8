//! Cryptographic primitives for the session protocol
//!
//! Key exchange: the client generates an RSA-1024 key pair, uploads the
//! public key, and receives the AES session key wrapped with it (OAEP-SHA1).
//! File encryption: AES-CBC with an all-zero IV and PKCS#7 padding. The
//! zero IV is dictated by the server's protocol, not a choice made here.
//!
//! Also hosts the encodings the identity files use: base64 for private keys
//! and the hex-with-newlines form of the client ID.

use aes::cipher::generic_array::GenericArray;
use aes::cipher::{Block, BlockEncrypt, KeyInit};
use aes::{Aes128, Aes192, Aes256};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use rand::rngs::OsRng;
use rsa::pkcs1::{DecodeRsaPrivateKey, EncodeRsaPrivateKey, EncodeRsaPublicKey};
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha1::Sha1;
use thiserror::Error;

use crate::wire::PUBLIC_KEY_LEN;

/// RSA modulus size used for the key exchange.
pub const RSA_KEY_BITS: usize = 1024;

const AES_BLOCK_SIZE: usize = 16;

/// Failures from key handling, unwrapping, or the encodings.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// RSA key-pair generation failed.
    #[error("RSA key generation failed: {0}")]
    KeyGeneration(rsa::Error),

    /// The stored private key is not valid PKCS#1 DER.
    #[error("RSA private key is not valid PKCS#1 DER: {0}")]
    InvalidPrivateKey(rsa::pkcs1::Error),

    /// Serializing a freshly generated key failed.
    #[error("RSA key serialization failed: {0}")]
    EncodeKey(rsa::pkcs1::Error),

    /// The public key DER does not fit the fixed wire field.
    #[error("public key DER is {0} bytes, larger than the 160-byte wire field")]
    PublicKeyTooLarge(usize),

    /// Unwrapping the AES key failed.
    #[error("RSA decryption failed: {0}")]
    Decrypt(rsa::Error),

    /// The delivered AES key has an impossible length.
    #[error("AES key length {0} is not 16, 24, or 32 bytes")]
    InvalidAesKeyLength(usize),

    /// Base64 input could not be decoded.
    #[error("invalid base64: {0}")]
    Base64(#[from] base64::DecodeError),

    /// Hex input could not be decoded.
    #[error("invalid hex: {0}")]
    Hex(#[from] hex::FromHexError),
}

/// Freshly generated RSA key pair in wire/persistence form.
#[derive(Clone)]
pub struct RsaKeyPair {
    /// PKCS#1 DER private key; persisted base64-encoded in priv.key/me.info.
    pub private_der: Vec<u8>,

    /// PKCS#1 DER public key, zero-padded to the fixed wire field width.
    pub public_der: Vec<u8>,
}

/// Generate an RSA-1024 key pair for the key exchange.
pub fn rsa_generate() -> Result<RsaKeyPair, CryptoError> {
    let private = RsaPrivateKey::new(&mut OsRng, RSA_KEY_BITS).map_err(CryptoError::KeyGeneration)?;
    let public = RsaPublicKey::from(&private);

    let private_der = private
        .to_pkcs1_der()
        .map_err(CryptoError::EncodeKey)?
        .as_bytes()
        .to_vec();
    let mut public_der = public
        .to_pkcs1_der()
        .map_err(CryptoError::EncodeKey)?
        .into_vec();

    if public_der.len() > PUBLIC_KEY_LEN {
        return Err(CryptoError::PublicKeyTooLarge(public_der.len()));
    }
    public_der.resize(PUBLIC_KEY_LEN, 0);

    Ok(RsaKeyPair {
        private_der,
        public_der,
    })
}

/// Unwrap a server-delivered AES key with the stored private key (OAEP-SHA1).
pub fn rsa_decrypt(private_der: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let private =
        RsaPrivateKey::from_pkcs1_der(private_der).map_err(CryptoError::InvalidPrivateKey)?;
    private
        .decrypt(Oaep::new::<Sha1>(), ciphertext)
        .map_err(CryptoError::Decrypt)
}

/// AES-CBC encrypt with the protocol's all-zero IV and PKCS#7 padding.
///
/// The key is used at whatever length the server delivered it; 16 bytes is
/// the conventional case.
pub fn aes_encrypt(key: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    match key.len() {
        16 => Ok(cbc_encrypt_zero_iv(
            &Aes128::new(GenericArray::from_slice(key)),
            plaintext,
        )),
        24 => Ok(cbc_encrypt_zero_iv(
            &Aes192::new(GenericArray::from_slice(key)),
            plaintext,
        )),
        32 => Ok(cbc_encrypt_zero_iv(
            &Aes256::new(GenericArray::from_slice(key)),
            plaintext,
        )),
        other => Err(CryptoError::InvalidAesKeyLength(other)),
    }
}

fn cbc_encrypt_zero_iv<C: BlockEncrypt>(cipher: &C, plaintext: &[u8]) -> Vec<u8> {
    // PKCS#7: always pad, a full extra block when the input is block-aligned
    let padding_len = AES_BLOCK_SIZE - plaintext.len() % AES_BLOCK_SIZE;
    let mut padded = plaintext.to_vec();
    padded.extend(vec![padding_len as u8; padding_len]);

    let mut encrypted = Vec::with_capacity(padded.len());
    let mut prev = Block::<C>::default();
    for chunk in padded.chunks(AES_BLOCK_SIZE) {
        let mut block = Block::<C>::clone_from_slice(chunk);
        for (byte, fed) in block.iter_mut().zip(prev.iter()) {
            *byte ^= fed;
        }
        cipher.encrypt_block(&mut block);
        encrypted.extend_from_slice(&block);
        prev = block;
    }
    encrypted
}

/// Base64-encode (standard alphabet), the form stored in me.info / priv.key.
pub fn base64_encode(data: &[u8]) -> String {
    BASE64.encode(data)
}

/// Decode base64 produced by [`base64_encode`].
pub fn base64_decode(encoded: &str) -> Result<Vec<u8>, CryptoError> {
    Ok(BASE64.decode(encoded)?)
}

/// Lowercase hex with a newline after every 16 encoded bytes, the me.info
/// client-ID form.
pub fn hexify(data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len() * 2 + data.len() / 16);
    for chunk in data.chunks(16) {
        out.push_str(&hex::encode(chunk));
        if chunk.len() == 16 {
            out.push('\n');
        }
    }
    out
}

/// Reverse [`hexify`]. Embedded whitespace is tolerated; non-hex fails.
pub fn dehexify(text: &str) -> Result<Vec<u8>, CryptoError> {
    let compact: String = text.chars().filter(|c| !c.is_whitespace()).collect();
    Ok(hex::decode(compact)?)
}
