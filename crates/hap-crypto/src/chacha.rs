//! ChaCha20-Poly1305 AEAD encryption for pairing messages and the session
//! transport.
//!
//! Pairing messages use fixed string nonces ("PS-Msg05", "PV-Msg02", ...)
//! right-aligned in the 12-byte nonce. The session transport uses a 64-bit
//! little-endian counter at nonce bytes 4..12, one counter per direction.

use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    ChaCha20Poly1305, Nonce,
};
use hap_core::error::CryptoError;
use zeroize::ZeroizeOnDrop;

/// One direction of an encrypted session.
///
/// The cipher instance is created once and reused for every frame; the
/// nonce counter increments after each operation and resets only on
/// session teardown.
#[derive(ZeroizeOnDrop)]
pub struct DirectionalCipher {
    key: [u8; 32],
    #[zeroize(skip)]
    cipher: ChaCha20Poly1305,
    #[zeroize(skip)]
    counter: u64,
}

impl DirectionalCipher {
    /// Create a cipher for one transport direction.
    pub fn new(key: [u8; 32]) -> Self {
        let cipher = ChaCha20Poly1305::new(&key.into());
        Self {
            key,
            cipher,
            counter: 0,
        }
    }

    /// Encrypt one block with the current counter nonce and the given AAD.
    ///
    /// Returns ciphertext with the 16-byte tag appended and advances the
    /// counter.
    pub fn seal(&mut self, aad: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let nonce_bytes = build_nonce_from_counter(self.counter);
        let nonce = Nonce::from_slice(&nonce_bytes);
        let sealed = self
            .cipher
            .encrypt(
                nonce,
                Payload {
                    msg: plaintext,
                    aad,
                },
            )
            .map_err(|e| CryptoError::Encryption(format!("Encryption failed: {e}")))?;
        self.counter += 1;
        Ok(sealed)
    }

    /// Decrypt one block (ciphertext + 16-byte tag) with the current counter
    /// nonce and the given AAD, advancing the counter on success.
    pub fn open(&mut self, aad: &[u8], ciphertext_with_tag: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if ciphertext_with_tag.len() < 16 {
            return Err(CryptoError::Decryption(
                "Ciphertext too short (missing tag)".to_string(),
            ));
        }
        let nonce_bytes = build_nonce_from_counter(self.counter);
        let nonce = Nonce::from_slice(&nonce_bytes);
        let plaintext = self
            .cipher
            .decrypt(
                nonce,
                Payload {
                    msg: ciphertext_with_tag,
                    aad,
                },
            )
            .map_err(|_| CryptoError::AuthTagMismatch)?;
        self.counter += 1;
        Ok(plaintext)
    }

    /// Current nonce counter.
    pub fn counter(&self) -> u64 {
        self.counter
    }

    /// Reset the counter (session teardown only).
    pub fn reset(&mut self) {
        self.counter = 0;
    }
}

/// Build 12-byte nonce from a counter: 4 zero bytes then the counter in
/// little-endian.
fn build_nonce_from_counter(counter: u64) -> [u8; 12] {
    let mut nonce = [0u8; 12];
    nonce[4..12].copy_from_slice(&counter.to_le_bytes());
    nonce
}

/// Encrypt with an explicit 12-byte nonce (pairing messages).
///
/// Returns ciphertext with 16-byte auth tag appended.
pub fn encrypt_with_nonce(
    key: &[u8; 32],
    nonce: &[u8; 12],
    plaintext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let cipher = ChaCha20Poly1305::new_from_slice(key)
        .map_err(|e| CryptoError::Encryption(format!("Invalid key: {e}")))?;
    cipher
        .encrypt(Nonce::from_slice(nonce), plaintext)
        .map_err(|e| CryptoError::Encryption(format!("Encryption failed: {e}")))
}

/// Decrypt with an explicit 12-byte nonce (pairing messages).
///
/// Expects ciphertext with 16-byte auth tag appended.
pub fn decrypt_with_nonce(
    key: &[u8; 32],
    nonce: &[u8; 12],
    ciphertext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    if ciphertext.len() < 16 {
        return Err(CryptoError::Decryption(
            "Ciphertext too short (missing tag)".to_string(),
        ));
    }
    let cipher = ChaCha20Poly1305::new_from_slice(key)
        .map_err(|e| CryptoError::Decryption(format!("Invalid key: {e}")))?;
    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| CryptoError::AuthTagMismatch)
}

/// Create a 12-byte nonce from a string (right-aligned, left-padded with
/// zeros). "PV-Msg02" becomes `\x00\x00\x00\x00PV-Msg02`.
pub fn nonce_from_string(s: &[u8]) -> [u8; 12] {
    let mut nonce = [0u8; 12];
    let len = s.len().min(12);
    let start = 12 - len;
    nonce[start..].copy_from_slice(&s[..len]);
    nonce
}
