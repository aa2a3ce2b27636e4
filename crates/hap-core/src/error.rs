//! Error types for the HAP accessory server.

use thiserror::Error;

/// Primary error type for all server operations.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Connection error: {0}")]
    Connection(#[from] std::io::Error),

    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Pairing error: {0}")]
    Pairing(#[from] PairingError),

    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),

    #[error("Persistence error: {0}")]
    Persist(#[from] PersistError),

    #[error("Advertisement error: {0}")]
    Advertise(#[from] AdvertiseError),

    #[error("Accessory model error: {0}")]
    Accessory(String),

    #[error("Operation timed out")]
    Timeout,
}

/// Cryptographic operation errors.
#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("Encryption failed: {0}")]
    Encryption(String),

    #[error("Decryption failed: {0}")]
    Decryption(String),

    #[error("Key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("Invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    #[error("Authentication tag mismatch")]
    AuthTagMismatch,
}

/// Errors during pair-setup and pair-verify.
#[derive(Error, Debug)]
pub enum PairingError {
    #[error("Invalid pairing state: {0}")]
    InvalidState(String),

    #[error("Missing required TLV type: 0x{0:02x}")]
    MissingTlv(u8),

    #[error("SRP verification failed")]
    SrpVerificationFailed,

    #[error("Signature verification failed")]
    SignatureInvalid,

    #[error("Controller is not paired")]
    UnknownController,

    #[error("Pairing unavailable: already paired")]
    AlreadyPaired,

    #[error("Another pair-setup is in progress")]
    Busy,

    #[error("Too many failed pairing attempts")]
    MaxTries,

    #[error("Protocol error: {0}")]
    Protocol(String),
}

/// Parsing errors for wire formats (TLV8, HTTP, UUIDs, JSON payloads).
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Invalid value: {0}")]
    InvalidValue(String),
}

/// Errors loading the static type catalog.
#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("Catalog is not valid JSON: {0}")]
    InvalidJson(String),

    #[error("Unknown characteristic type: {0}")]
    UnknownCharacteristic(String),

    #[error("Unknown service type: {0}")]
    UnknownService(String),

    #[error("Malformed catalog entry for {name}: {reason}")]
    MalformedEntry { name: String, reason: String },
}

/// Errors persisting or restoring server state.
#[derive(Error, Debug)]
pub enum PersistError {
    #[error("State file I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("State file is not valid JSON: {0}")]
    InvalidJson(String),

    #[error("State file field invalid: {0}")]
    InvalidField(String),
}

/// Errors registering or updating the mDNS advertisement.
#[derive(Error, Debug)]
pub enum AdvertiseError {
    #[error("mDNS daemon error: {0}")]
    Daemon(String),

    #[error("Service registration failed: {0}")]
    Registration(String),
}

/// Convenience Result type.
pub type Result<T> = std::result::Result<T, Error>;
