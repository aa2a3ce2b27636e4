//! # hap-crypto
//!
//! Cryptographic primitives for HAP pairing and session security.
//!
//! This crate provides:
//! - SRP-6a (3072-bit) server and client sessions for pair-setup
//! - Ed25519 for long-term identity signatures
//! - Curve25519 ECDH for per-session key agreement
//! - HKDF-SHA512 for key derivation
//! - ChaCha20-Poly1305 for AEAD encryption
//! - the TLV8 codec used by the pairing messages
//!
//! All secret material is zeroized on drop.

pub mod chacha;
pub mod curve25519;
pub mod ed25519;
pub mod hkdf;
pub mod srp;
pub mod tlv;

pub use chacha::DirectionalCipher;
pub use tlv::{Tlv8, TlvType};
