//! Curve25519 ECDH for session key agreement.

use hap_core::error::CryptoError;
use rand::rngs::OsRng;
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::ZeroizeOnDrop;

/// Ephemeral Curve25519 key pair for ECDH.
#[derive(ZeroizeOnDrop)]
pub struct EcdhKeyPair {
    #[zeroize(skip)]
    public: [u8; 32],
    secret: [u8; 32],
}

impl EcdhKeyPair {
    /// Generate a new random key pair.
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = PublicKey::from(&secret);
        Self {
            public: public.to_bytes(),
            secret: secret.to_bytes(),
        }
    }

    /// Get the public key (32 bytes).
    pub fn public_key(&self) -> [u8; 32] {
        self.public
    }

    /// Perform Diffie-Hellman key exchange.
    ///
    /// Returns the shared secret (32 bytes). Low-order peer points produce
    /// an all-zero shared secret and are rejected.
    pub fn diffie_hellman(self, peer_public: &[u8; 32]) -> Result<[u8; 32], CryptoError> {
        if peer_public.iter().all(|&b| b == 0) {
            return Err(CryptoError::KeyDerivation(
                "Invalid peer public key: all zeros".to_string(),
            ));
        }

        let static_secret = StaticSecret::from(self.secret);
        let their_public = PublicKey::from(*peer_public);
        let shared = static_secret.diffie_hellman(&their_public);

        let shared_bytes = shared.to_bytes();
        if shared_bytes.iter().all(|&b| b == 0) {
            return Err(CryptoError::KeyDerivation(
                "Weak ECDH: shared secret is all zeros (low-order point)".to_string(),
            ));
        }

        Ok(shared_bytes)
    }
}
