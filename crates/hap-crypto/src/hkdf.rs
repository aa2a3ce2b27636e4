//! HKDF-SHA512 key derivation for pairing and transport keys.

use hap_core::error::CryptoError;
use hkdf::Hkdf;
use sha2::Sha512;

/// Derive a key of arbitrary length using HKDF-SHA512.
pub fn derive_key(
    ikm: &[u8],
    salt: &[u8],
    info: &[u8],
    length: usize,
) -> Result<Vec<u8>, CryptoError> {
    let hk = Hkdf::<Sha512>::new(Some(salt), ikm);
    let mut okm = vec![0u8; length];
    hk.expand(info, &mut okm)
        .map_err(|_| CryptoError::KeyDerivation("HKDF expand failed".to_string()))?;
    Ok(okm)
}

/// Derive a fixed-size 32-byte key.
pub fn derive_key_32(ikm: &[u8], salt: &[u8], info: &[u8]) -> Result<[u8; 32], CryptoError> {
    let hk = Hkdf::<Sha512>::new(Some(salt), ikm);
    let mut okm = [0u8; 32];
    hk.expand(info, &mut okm)
        .map_err(|_| CryptoError::KeyDerivation("HKDF expand failed".to_string()))?;
    Ok(okm)
}

/// Well-known salt and info strings used by HAP.
pub mod constants {
    pub const PAIR_SETUP_ENCRYPT_SALT: &[u8] = b"Pair-Setup-Encrypt-Salt";
    pub const PAIR_SETUP_ENCRYPT_INFO: &[u8] = b"Pair-Setup-Encrypt-Info";

    pub const PAIR_SETUP_CONTROLLER_SIGN_SALT: &[u8] = b"Pair-Setup-Controller-Sign-Salt";
    pub const PAIR_SETUP_CONTROLLER_SIGN_INFO: &[u8] = b"Pair-Setup-Controller-Sign-Info";

    pub const PAIR_SETUP_ACCESSORY_SIGN_SALT: &[u8] = b"Pair-Setup-Accessory-Sign-Salt";
    pub const PAIR_SETUP_ACCESSORY_SIGN_INFO: &[u8] = b"Pair-Setup-Accessory-Sign-Info";

    pub const PAIR_VERIFY_ENCRYPT_SALT: &[u8] = b"Pair-Verify-Encrypt-Salt";
    pub const PAIR_VERIFY_ENCRYPT_INFO: &[u8] = b"Pair-Verify-Encrypt-Info";

    pub const CONTROL_SALT: &[u8] = b"Control-Salt";
    pub const CONTROL_READ_KEY_INFO: &[u8] = b"Control-Read-Encryption-Key";
    pub const CONTROL_WRITE_KEY_INFO: &[u8] = b"Control-Write-Encryption-Key";
}

/// Derive the pair-setup M5/M6 encryption key from the SRP shared secret.
pub fn derive_pair_setup_key(shared_secret: &[u8]) -> Result<[u8; 32], CryptoError> {
    derive_key_32(
        shared_secret,
        constants::PAIR_SETUP_ENCRYPT_SALT,
        constants::PAIR_SETUP_ENCRYPT_INFO,
    )
}

/// Derive the pair-verify M2/M3 session key from the ECDH shared secret.
pub fn derive_pair_verify_key(shared_secret: &[u8]) -> Result<[u8; 32], CryptoError> {
    derive_key_32(
        shared_secret,
        constants::PAIR_VERIFY_ENCRYPT_SALT,
        constants::PAIR_VERIFY_ENCRYPT_INFO,
    )
}

/// Derive the controller-to-accessory transport key (read by the server).
pub fn derive_control_read_key(shared_secret: &[u8]) -> Result<[u8; 32], CryptoError> {
    derive_key_32(
        shared_secret,
        constants::CONTROL_SALT,
        constants::CONTROL_READ_KEY_INFO,
    )
}

/// Derive the accessory-to-controller transport key (written by the server).
pub fn derive_control_write_key(shared_secret: &[u8]) -> Result<[u8; 32], CryptoError> {
    derive_key_32(
        shared_secret,
        constants::CONTROL_SALT,
        constants::CONTROL_WRITE_KEY_INFO,
    )
}
