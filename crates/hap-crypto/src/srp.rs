//! SRP-6a implementation for HAP pair-setup.
//!
//! Uses 3072-bit prime (RFC 5054), generator g=5, SHA-512. The server side
//! (`SrpServer`) is what the accessory runs; the client side (`SrpClient`)
//! exists so pairing flows can be exercised end to end in tests and tools.

use hap_core::error::CryptoError;
use num_bigint::{BigUint, RandBigInt};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha512};
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// N size in bytes (3072 bits = 384 bytes).
const N_BYTES: usize = 384;

/// RFC 5054 3072-bit prime N as hex string.
const RFC5054_N_3072: &str = concat!(
    "FFFFFFFFFFFFFFFFC90FDAA22168C234C4C6628B80DC1CD129024E08",
    "8A67CC74020BBEA63B139B22514A08798E3404DDEF9519B3CD3A431B",
    "302B0A6DF25F14374FE1356D6D51C245E485B576625E7EC6F44C42E9",
    "A637ED6B0BFF5CB6F406B7EDEE386BFB5A899FA5AE9F24117C4B1FE6",
    "49286651ECE45B3DC2007CB8A163BF0598DA48361C55D39A69163FA8",
    "FD24CF5F83655D23DCA3AD961C62F356208552BB9ED529077096966D",
    "670C354E4ABC9804F1746C08CA18217C32905E462E36CE3BE39E772C",
    "180E86039B2783A2EC07A28FB5C55DF06F4C52C9DE2BCBF695581718",
    "3995497CEA956AE515D2261898FA051015728E5A8AAAC42DAD33170D",
    "04507A33A85521ABDF1CBA64ECFB850458DBEF0A8AEA71575D060C7D",
    "B3970F85A6E1E4C7ABF5AE8CDB0933D71E8C94E04A25619DCEE3D226",
    "1AD2EE6BF12FFA06D98A0864D87602733EC86A64521F2B18177B200C",
    "BBE117577A615D6C770988C0BAD946E208E24FA074E5AB3143DB5BFC",
    "E0FD108E4B82D120A93AD2CAFFFFFFFFFFFFFFFF"
);

/// Identity string used by pair-setup on both sides.
pub const PAIR_SETUP_IDENTITY: &[u8] = b"Pair-Setup";

/// SRP-6a parameters (3072-bit, RFC 5054).
pub struct SrpParams {
    /// Prime modulus N.
    pub n: BigUint,
    /// Generator g (always 5).
    pub g: BigUint,
}

impl Default for SrpParams {
    fn default() -> Self {
        let n = BigUint::parse_bytes(RFC5054_N_3072.as_bytes(), 16)
            .expect("Invalid RFC 5054 prime constant");
        let g = BigUint::from(5u32);
        Self { n, g }
    }
}

/// Server-side SRP session.
///
/// Created per pair-setup attempt. `challenge()` yields the M2 payload
/// (salt + B); `verify_proof()` checks the controller's M1 proof and, when
/// it matches, returns the server proof M2 for the reply.
pub struct SrpServer {
    params: SrpParams,
    identity: Vec<u8>,
    salt: [u8; 16],
    verifier: BigUint,
    private_key: BigUint,
    public_key: BigUint,
    session: Option<SrpSession>,
}

struct SrpSession {
    shared_secret: Vec<u8>,
    expected_proof: Vec<u8>,
    server_proof: Vec<u8>,
}

impl SrpServer {
    /// Create a new server session for the given identity and password.
    ///
    /// For HAP, identity is `"Pair-Setup"` and the password is the pincode
    /// in its display form (`NNN-NN-NNN`).
    pub fn new(identity: &[u8], password: &[u8]) -> Self {
        let mut salt = [0u8; 16];
        OsRng.fill_bytes(&mut salt);
        Self::with_salt(identity, password, salt)
    }

    /// Create a server session with a fixed salt (deterministic for tests).
    pub fn with_salt(identity: &[u8], password: &[u8], salt: [u8; 16]) -> Self {
        let params = SrpParams::default();

        // v = g^x mod N
        let x = compute_x(&salt, identity, password);
        let verifier = params.g.modpow(&x, &params.n);

        // B = (k*v + g^b) mod N
        let b = OsRng.gen_biguint(256);
        let k = compute_k(&params);
        let g_b = params.g.modpow(&b, &params.n);
        let k_v = (&k * &verifier) % &params.n;
        let public_key = (&k_v + &g_b) % &params.n;

        Self {
            params,
            identity: identity.to_vec(),
            salt,
            verifier,
            private_key: b,
            public_key,
            session: None,
        }
    }

    /// The 16-byte salt sent in M2.
    pub fn salt(&self) -> [u8; 16] {
        self.salt
    }

    /// Server public key B, padded to 384 bytes, sent in M2.
    pub fn public_key(&self) -> Vec<u8> {
        pad_to_n(&self.public_key)
    }

    /// Absorb the controller's public key A and compute the session.
    ///
    /// Rejects A == 0 (mod N), which would let a controller force a known
    /// shared secret.
    pub fn set_client_public_key(&mut self, client_public: &[u8]) -> Result<(), CryptoError> {
        let a = BigUint::from_bytes_be(client_public);
        if &a % &self.params.n == BigUint::ZERO {
            return Err(CryptoError::KeyDerivation(
                "Invalid client public key: A mod N = 0".to_string(),
            ));
        }

        // u = H(PAD(A) || PAD(B))
        let u = compute_u(&a, &self.public_key, &self.params);

        // S = (A * v^u)^b mod N
        let v_u = self.verifier.modpow(&u, &self.params.n);
        let base = (&a * &v_u) % &self.params.n;
        let s = base.modpow(&self.private_key, &self.params.n);

        // K = H(PAD(S))
        let mut hasher = Sha512::new();
        hasher.update(pad_to_n(&s));
        let shared_secret = hasher.finalize().to_vec();

        let expected_proof = compute_m1(
            &self.params,
            &self.identity,
            &self.salt,
            &a,
            &self.public_key,
            &shared_secret,
        );

        // M2 = H(PAD(A) || M1 || K)
        let mut hasher = Sha512::new();
        hasher.update(pad_to_n(&a));
        hasher.update(&expected_proof);
        hasher.update(&shared_secret);
        let server_proof = hasher.finalize().to_vec();

        self.session = Some(SrpSession {
            shared_secret,
            expected_proof,
            server_proof,
        });
        Ok(())
    }

    /// Verify the controller's proof M1.
    ///
    /// Returns the server proof for the M4 reply when the proof matches,
    /// `None` when it does not (wrong pincode).
    pub fn verify_proof(&self, client_proof: &[u8]) -> Option<Vec<u8>> {
        let session = self.session.as_ref()?;
        if bool::from(client_proof.ct_eq(&session.expected_proof)) {
            Some(session.server_proof.clone())
        } else {
            None
        }
    }

    /// The 64-byte shared secret K, available after the client key is set.
    pub fn shared_secret(&self) -> Option<&[u8]> {
        self.session.as_ref().map(|s| s.shared_secret.as_slice())
    }
}

/// Client-side SRP state machine.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SrpClient {
    #[zeroize(skip)]
    params: SrpParams,
    identity: Vec<u8>,
    password: Vec<u8>,
    private_key: Vec<u8>,
    #[zeroize(skip)]
    public_key: BigUint,
}

/// Server challenge containing salt and public key.
pub struct SrpChallenge {
    pub salt: [u8; 16],
    pub server_public_key: Vec<u8>,
}

/// Result of processing a challenge.
pub struct SrpProof {
    pub client_proof: Vec<u8>,
    pub shared_secret: Vec<u8>,
    pub expected_server_proof: Vec<u8>,
}

impl SrpClient {
    /// Create new SRP client with identity and password.
    pub fn new(identity: &[u8], password: &[u8]) -> Self {
        let params = SrpParams::default();

        // Random private key a (256 bits), A = g^a mod N
        let a = OsRng.gen_biguint(256);
        let private_key = a.to_bytes_be();
        let public_key = params.g.modpow(&a, &params.n);

        Self {
            params,
            identity: identity.to_vec(),
            password: password.to_vec(),
            private_key,
            public_key,
        }
    }

    /// Get client public key A (384 bytes for 3072-bit).
    pub fn public_key(&self) -> Vec<u8> {
        pad_to_n(&self.public_key)
    }

    /// Process server's challenge and generate proof.
    pub fn process_challenge(&self, challenge: &SrpChallenge) -> Result<SrpProof, CryptoError> {
        let b = BigUint::from_bytes_be(&challenge.server_public_key);

        if &b % &self.params.n == BigUint::ZERO {
            return Err(CryptoError::KeyDerivation(
                "Invalid server public key: B mod N = 0".to_string(),
            ));
        }

        let a = BigUint::from_bytes_be(&self.private_key);

        let u = compute_u(&self.public_key, &b, &self.params);
        if u == BigUint::ZERO {
            return Err(CryptoError::KeyDerivation("Invalid u value: u = 0".to_string()));
        }

        let x = compute_x(&challenge.salt, &self.identity, &self.password);
        let k = compute_k(&self.params);

        // S = (B - k * g^x)^(a + u*x) mod N
        let g_x = self.params.g.modpow(&x, &self.params.n);
        let k_gx = (&k * &g_x) % &self.params.n;
        let base = if b >= k_gx {
            (&b - &k_gx) % &self.params.n
        } else {
            (&b + &self.params.n - &k_gx) % &self.params.n
        };
        let exponent = (&a + &u * &x) % (&self.params.n - BigUint::from(1u32));
        let s = base.modpow(&exponent, &self.params.n);

        // K = H(PAD(S))
        let mut hasher = Sha512::new();
        hasher.update(pad_to_n(&s));
        let shared_secret = hasher.finalize().to_vec();

        let client_proof = compute_m1(
            &self.params,
            &self.identity,
            &challenge.salt,
            &self.public_key,
            &b,
            &shared_secret,
        );

        // Expected M2 = H(PAD(A) || M1 || K)
        let mut hasher = Sha512::new();
        hasher.update(pad_to_n(&self.public_key));
        hasher.update(&client_proof);
        hasher.update(&shared_secret);
        let expected_server_proof = hasher.finalize().to_vec();

        Ok(SrpProof {
            client_proof,
            shared_secret,
            expected_server_proof,
        })
    }

    /// Verify server's proof M2.
    pub fn verify_server_proof(&self, proof: &[u8], expected: &[u8]) -> bool {
        proof.ct_eq(expected).into()
    }
}

/// Compute M1 = H(H(N) XOR H(g) || H(I) || salt || PAD(A) || PAD(B) || K).
///
/// H(g) is taken over the raw generator bytes (0x05), not the padded form;
/// padding g here desynchronizes the proof between the two sides.
fn compute_m1(
    params: &SrpParams,
    identity: &[u8],
    salt: &[u8],
    a: &BigUint,
    b: &BigUint,
    k: &[u8],
) -> Vec<u8> {
    let mut hasher = Sha512::new();
    hasher.update(pad_to_n(&params.n));
    let h_n = hasher.finalize();

    let mut hasher = Sha512::new();
    hasher.update(params.g.to_bytes_be());
    let h_g = hasher.finalize();

    let mut xor_result = [0u8; 64];
    for i in 0..64 {
        xor_result[i] = h_n[i] ^ h_g[i];
    }

    let mut hasher = Sha512::new();
    hasher.update(identity);
    let h_i = hasher.finalize();

    let mut hasher = Sha512::new();
    hasher.update(xor_result);
    hasher.update(h_i);
    hasher.update(salt);
    hasher.update(pad_to_n(a));
    hasher.update(pad_to_n(b));
    hasher.update(k);
    hasher.finalize().to_vec()
}

/// Pad BigUint to N_BYTES with leading zeros.
fn pad_to_n(value: &BigUint) -> Vec<u8> {
    let bytes = value.to_bytes_be();
    if bytes.len() >= N_BYTES {
        bytes[bytes.len() - N_BYTES..].to_vec()
    } else {
        let mut padded = vec![0u8; N_BYTES - bytes.len()];
        padded.extend_from_slice(&bytes);
        padded
    }
}

/// Compute k = SHA512(PAD(N) || PAD(g)).
fn compute_k(params: &SrpParams) -> BigUint {
    let mut hasher = Sha512::new();
    hasher.update(pad_to_n(&params.n));
    hasher.update(pad_to_n(&params.g));
    BigUint::from_bytes_be(&hasher.finalize())
}

/// Compute u = SHA512(PAD(A) || PAD(B)).
fn compute_u(a: &BigUint, b: &BigUint, _params: &SrpParams) -> BigUint {
    let mut hasher = Sha512::new();
    hasher.update(pad_to_n(a));
    hasher.update(pad_to_n(b));
    BigUint::from_bytes_be(&hasher.finalize())
}

/// Compute x = SHA512(salt || SHA512(identity || ":" || password)).
fn compute_x(salt: &[u8], identity: &[u8], password: &[u8]) -> BigUint {
    let mut hasher = Sha512::new();
    hasher.update(identity);
    hasher.update(b":");
    hasher.update(password);
    let inner_hash = hasher.finalize();

    let mut hasher = Sha512::new();
    hasher.update(salt);
    hasher.update(inner_hash);
    BigUint::from_bytes_be(&hasher.finalize())
}
