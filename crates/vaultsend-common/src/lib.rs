//! Vaultsend Common Library
//!
//! Shared protocol functionality for the vaultsend upload client:
//! - Wire codec (request packing, response headers)
//! - Cryptography (RSA key exchange, AES file encryption)
//! - POSIX `cksum`-compatible checksum engine

pub mod checksum;
pub mod crypto;
pub mod wire;

pub use wire::{Request, ResponseCode, ResponseHeader};
