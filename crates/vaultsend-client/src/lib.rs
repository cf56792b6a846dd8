//! Vaultsend Upload Client
//!
//! Drives one upload session against the transfer server: register (or
//! reconnect), exchange keys, stream the AES-encrypted file in fixed-size
//! packets, and verify delivery with a `cksum`-compatible checksum.
//!
//! The binary is a thin wrapper; everything it does lives here so the
//! integration tests can run full sessions against a scripted server.

pub mod chunker;
pub mod config;
pub mod identity;
pub mod session;
pub mod transport;
