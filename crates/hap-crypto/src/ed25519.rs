//! Ed25519 digital signatures for long-term identity.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use hap_core::error::CryptoError;
use rand::rngs::OsRng;
use zeroize::ZeroizeOnDrop;

/// Long-term Ed25519 identity key pair.
///
/// Note: Clone is implemented so the identity can be shared between the
/// pairing state machine and the persisted server state. Both copies
/// zeroize on drop.
#[derive(Clone, ZeroizeOnDrop)]
pub struct IdentityKeyPair {
    #[zeroize(skip)]
    public: [u8; 32],
    secret: [u8; 32], // Ed25519 seed (32 bytes, not expanded)
}

impl IdentityKeyPair {
    /// Generate a new random identity key pair.
    pub fn generate() -> Self {
        let signing_key = SigningKey::generate(&mut OsRng);
        let public = signing_key.verifying_key().to_bytes();
        let secret = signing_key.to_bytes();
        Self { public, secret }
    }

    /// Create from seed bytes (32 bytes).
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        let signing_key = SigningKey::from_bytes(seed);
        let public = signing_key.verifying_key().to_bytes();
        Self {
            public,
            secret: *seed,
        }
    }

    /// Get the public key (32 bytes).
    pub fn public_key(&self) -> [u8; 32] {
        self.public
    }

    /// Sign a message, returning 64-byte signature.
    pub fn sign(&self, message: &[u8]) -> [u8; 64] {
        let signing_key = SigningKey::from_bytes(&self.secret);
        signing_key.sign(message).to_bytes()
    }

    /// Export the seed for storage (32 bytes).
    pub fn seed(&self) -> [u8; 32] {
        self.secret
    }
}

/// Verify an Ed25519 signature.
pub fn verify(
    public_key: &[u8; 32],
    message: &[u8],
    signature: &[u8; 64],
) -> Result<(), CryptoError> {
    let verifying_key = VerifyingKey::from_bytes(public_key)
        .map_err(|e| CryptoError::KeyDerivation(format!("Invalid public key: {e}")))?;

    let sig = Signature::from_bytes(signature);

    verifying_key
        .verify(message, &sig)
        .map_err(|_| CryptoError::AuthTagMismatch)
}
