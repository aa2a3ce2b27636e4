//! Server-side pair-setup and pair-verify state machines.
//!
//! Both operate on TLV payloads only; the HTTP layer feeds them request
//! bodies and writes back the reply TLV. Pair-setup state is shared
//! server-wide (only one setup may be in progress at a time, and failed
//! attempts are throttled globally). Pair-verify state is per connection.

use hap_crypto::chacha::{decrypt_with_nonce, encrypt_with_nonce, nonce_from_string};
use hap_crypto::curve25519::EcdhKeyPair;
use hap_crypto::ed25519;
use hap_crypto::hkdf::{self, constants, derive_key_32};
use hap_crypto::srp::{SrpServer, PAIR_SETUP_IDENTITY};
use hap_crypto::tlv::{Tlv8, TlvType};
use tracing::{debug, warn};

use crate::state::ServerState;

/// TLV error codes used in pairing replies.
pub mod error_code {
    pub const UNKNOWN: u8 = 0x01;
    pub const AUTHENTICATION: u8 = 0x02;
    pub const MAX_TRIES: u8 = 0x05;
    pub const UNAVAILABLE: u8 = 0x06;
    pub const BUSY: u8 = 0x07;
}

/// Pairing sequence numbers.
pub mod state_num {
    pub const M1: u8 = 0x01;
    pub const M2: u8 = 0x02;
    pub const M3: u8 = 0x03;
    pub const M4: u8 = 0x04;
    pub const M5: u8 = 0x05;
    pub const M6: u8 = 0x06;
}

/// Hard stop after this many failed SRP proofs until state is reset.
pub const MAX_FAILED_ATTEMPTS: u32 = 100;

const PS_MSG05_NONCE: &[u8] = b"PS-Msg05";
const PS_MSG06_NONCE: &[u8] = b"PS-Msg06";
const PV_MSG02_NONCE: &[u8] = b"PV-Msg02";
const PV_MSG03_NONCE: &[u8] = b"PV-Msg03";

/// A pairing admitted by a completed pair-setup exchange.
#[derive(Debug, Clone)]
pub struct NewPairing {
    pub username: String,
    pub ltpk: [u8; 32],
}

/// Outcome of one pair-setup message.
pub struct SetupReply {
    pub tlv: Tlv8,
    /// Insert a fixed delay before replying (bad proof, guessing
    /// resistance).
    pub delay_before_reply: bool,
    /// Present when M5 completed and the controller must be persisted as
    /// the first admin.
    pub new_pairing: Option<NewPairing>,
}

impl SetupReply {
    fn reply(tlv: Tlv8) -> Self {
        Self {
            tlv,
            delay_before_reply: false,
            new_pairing: None,
        }
    }

    fn error(state: u8, code: u8) -> Self {
        Self::reply(Tlv8::error_reply(state, code))
    }
}

struct ActiveSetup {
    owner: u64,
    srp: SrpServer,
}

/// Server-wide pair-setup state: the single in-progress exchange plus the
/// failed-attempt counter.
pub struct PairSetupShared {
    active: Option<ActiveSetup>,
    failed_attempts: u32,
}

impl Default for PairSetupShared {
    fn default() -> Self {
        Self::new()
    }
}

impl PairSetupShared {
    pub fn new() -> Self {
        Self {
            active: None,
            failed_attempts: 0,
        }
    }

    /// Manual reset of the hard throttle (e.g. by an operator action).
    pub fn reset_throttle(&mut self) {
        self.failed_attempts = 0;
    }

    pub fn failed_attempts(&self) -> u32 {
        self.failed_attempts
    }

    /// Forget an in-progress exchange owned by a closed connection.
    pub fn connection_lost(&mut self, session: u64) {
        if self.active.as_ref().map(|a| a.owner) == Some(session) {
            self.active = None;
        }
    }

    /// Process one pair-setup request body.
    pub fn handle(&mut self, session: u64, body: &[u8], state: &ServerState) -> SetupReply {
        if state.paired() {
            debug!("pair-setup attempted while already paired");
            return SetupReply::error(state_num::M2, error_code::UNAVAILABLE);
        }

        let Ok(tlv) = Tlv8::parse(body) else {
            return SetupReply::error(state_num::M2, error_code::UNKNOWN);
        };

        match tlv.state() {
            Some(state_num::M1) => self.m1(session, state),
            Some(state_num::M3) => self.m3(session, &tlv),
            Some(state_num::M5) => self.m5(session, &tlv, state),
            other => {
                warn!("pair-setup with unexpected state {other:?}");
                SetupReply::error(state_num::M2, error_code::UNKNOWN)
            }
        }
    }

    /// M1 -> M2: start an SRP exchange, reply with salt and B.
    fn m1(&mut self, session: u64, state: &ServerState) -> SetupReply {
        if self.failed_attempts >= MAX_FAILED_ATTEMPTS {
            warn!("pair-setup refused: too many failed attempts");
            return SetupReply::error(state_num::M2, error_code::MAX_TRIES);
        }
        if let Some(active) = &self.active {
            if active.owner != session {
                debug!("pair-setup busy: owned by session {}", active.owner);
                return SetupReply::error(state_num::M2, error_code::BUSY);
            }
        }

        debug!("pair-setup [1/3]: sending SRP challenge");
        let srp = SrpServer::new(PAIR_SETUP_IDENTITY, state.pincode().as_bytes());

        let mut reply = Tlv8::new();
        reply.push(TlvType::State, vec![state_num::M2]);
        reply.push(TlvType::Salt, srp.salt().to_vec());
        reply.push(TlvType::PublicKey, srp.public_key());

        self.active = Some(ActiveSetup {
            owner: session,
            srp,
        });
        SetupReply::reply(reply)
    }

    /// M3 -> M4: verify the controller's SRP proof.
    fn m3(&mut self, session: u64, tlv: &Tlv8) -> SetupReply {
        let Some(active) = self.active.as_mut().filter(|a| a.owner == session) else {
            return SetupReply::error(state_num::M4, error_code::UNKNOWN);
        };
        let (Some(client_public), Some(client_proof)) =
            (tlv.get(TlvType::PublicKey), tlv.get(TlvType::Proof))
        else {
            return SetupReply::error(state_num::M4, error_code::UNKNOWN);
        };

        debug!("pair-setup [2/3]: verifying SRP proof");
        if active.srp.set_client_public_key(client_public).is_err() {
            self.active = None;
            return SetupReply::error(state_num::M4, error_code::AUTHENTICATION);
        }

        match active.srp.verify_proof(client_proof) {
            Some(server_proof) => {
                let mut reply = Tlv8::new();
                reply.push(TlvType::State, vec![state_num::M4]);
                reply.push(TlvType::Proof, server_proof);
                SetupReply::reply(reply)
            }
            None => {
                warn!("pair-setup SRP proof mismatch (wrong pincode?)");
                self.failed_attempts += 1;
                self.active = None;
                let mut reply = SetupReply::error(state_num::M4, error_code::AUTHENTICATION);
                reply.delay_before_reply = true;
                reply
            }
        }
    }

    /// M5 -> M6: exchange long-term identities over the SRP session key.
    fn m5(&mut self, session: u64, tlv: &Tlv8, state: &ServerState) -> SetupReply {
        let Some(active) = self.active.as_ref().filter(|a| a.owner == session) else {
            return SetupReply::error(state_num::M6, error_code::UNKNOWN);
        };
        let Some(shared_secret) = active.srp.shared_secret() else {
            return SetupReply::error(state_num::M6, error_code::UNKNOWN);
        };
        let Some(encrypted_data) = tlv.get(TlvType::EncryptedData) else {
            return SetupReply::error(state_num::M6, error_code::UNKNOWN);
        };

        debug!("pair-setup [3/3]: identity exchange");
        let Ok(session_key) = hkdf::derive_pair_setup_key(shared_secret) else {
            return SetupReply::error(state_num::M6, error_code::UNKNOWN);
        };

        let nonce = nonce_from_string(PS_MSG05_NONCE);
        let Ok(decrypted) = decrypt_with_nonce(&session_key, &nonce, encrypted_data) else {
            warn!("pair-setup M5 decryption failed");
            self.active = None;
            return SetupReply::error(state_num::M6, error_code::AUTHENTICATION);
        };

        let Ok(inner) = Tlv8::parse(&decrypted) else {
            self.active = None;
            return SetupReply::error(state_num::M6, error_code::AUTHENTICATION);
        };
        let (Some(username_bytes), Some(client_ltpk), Some(client_sig)) = (
            inner.get(TlvType::Identifier),
            inner.get(TlvType::PublicKey),
            inner.get(TlvType::Signature),
        ) else {
            self.active = None;
            return SetupReply::error(state_num::M6, error_code::AUTHENTICATION);
        };

        let Ok(ltpk) = <[u8; 32]>::try_from(client_ltpk) else {
            self.active = None;
            return SetupReply::error(state_num::M6, error_code::AUTHENTICATION);
        };
        let Ok(signature) = <[u8; 64]>::try_from(client_sig) else {
            self.active = None;
            return SetupReply::error(state_num::M6, error_code::AUTHENTICATION);
        };

        // Verify the controller's proof over its signing key material.
        let Ok(controller_x) = derive_key_32(
            shared_secret,
            constants::PAIR_SETUP_CONTROLLER_SIGN_SALT,
            constants::PAIR_SETUP_CONTROLLER_SIGN_INFO,
        ) else {
            return SetupReply::error(state_num::M6, error_code::UNKNOWN);
        };
        let mut material = Vec::with_capacity(32 + username_bytes.len() + 32);
        material.extend_from_slice(&controller_x);
        material.extend_from_slice(username_bytes);
        material.extend_from_slice(&ltpk);

        if ed25519::verify(&ltpk, &material, &signature).is_err() {
            warn!("pair-setup M5 signature verification failed");
            self.active = None;
            return SetupReply::error(state_num::M6, error_code::AUTHENTICATION);
        }

        let Ok(username) = String::from_utf8(username_bytes.to_vec()) else {
            self.active = None;
            return SetupReply::error(state_num::M6, error_code::AUTHENTICATION);
        };

        // Build our own signed identity for the M6 payload.
        let Ok(accessory_x) = derive_key_32(
            shared_secret,
            constants::PAIR_SETUP_ACCESSORY_SIGN_SALT,
            constants::PAIR_SETUP_ACCESSORY_SIGN_INFO,
        ) else {
            return SetupReply::error(state_num::M6, error_code::UNKNOWN);
        };
        let mac = state.mac().as_bytes();
        let server_ltpk = state.identity().public_key();
        let mut material = Vec::with_capacity(32 + mac.len() + 32);
        material.extend_from_slice(&accessory_x);
        material.extend_from_slice(mac);
        material.extend_from_slice(&server_ltpk);
        let server_sig = state.identity().sign(&material);

        let mut inner_reply = Tlv8::new();
        inner_reply.push(TlvType::Identifier, mac.to_vec());
        inner_reply.push(TlvType::PublicKey, server_ltpk.to_vec());
        inner_reply.push(TlvType::Signature, server_sig.to_vec());

        let nonce = nonce_from_string(PS_MSG06_NONCE);
        let Ok(encrypted) = encrypt_with_nonce(&session_key, &nonce, &inner_reply.encode()) else {
            return SetupReply::error(state_num::M6, error_code::UNKNOWN);
        };

        let mut reply = Tlv8::new();
        reply.push(TlvType::State, vec![state_num::M6]);
        reply.push(TlvType::EncryptedData, encrypted);

        self.active = None;
        SetupReply {
            tlv: reply,
            delay_before_reply: false,
            new_pairing: Some(NewPairing { username, ltpk }),
        }
    }
}

/// Outcome of one pair-verify message.
pub struct VerifyReply {
    pub tlv: Tlv8,
    /// The ECDH shared secret; present on M4 success, at which point the
    /// transport upgrades to encrypted frames.
    pub shared_secret: Option<Vec<u8>>,
    /// Verified controller identifier, present alongside the secret.
    pub client_username: Option<String>,
}

impl VerifyReply {
    fn reply(tlv: Tlv8) -> Self {
        Self {
            tlv,
            shared_secret: None,
            client_username: None,
        }
    }

    fn error(state: u8, code: u8) -> Self {
        Self::reply(Tlv8::error_reply(state, code))
    }
}

struct VerifyContext {
    accessory_public: [u8; 32],
    client_public: [u8; 32],
    shared_secret: [u8; 32],
    session_key: [u8; 32],
}

/// Per-connection pair-verify state.
#[derive(Default)]
pub struct PairVerify {
    context: Option<VerifyContext>,
}

impl PairVerify {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process one pair-verify request body.
    pub fn handle(&mut self, body: &[u8], state: &ServerState) -> VerifyReply {
        if !state.paired() {
            return VerifyReply::error(state_num::M2, error_code::AUTHENTICATION);
        }

        let Ok(tlv) = Tlv8::parse(body) else {
            return VerifyReply::error(state_num::M2, error_code::UNKNOWN);
        };

        match tlv.state() {
            Some(state_num::M1) => self.m1(&tlv, state),
            Some(state_num::M3) => self.m3(&tlv, state),
            other => {
                warn!("pair-verify with unexpected state {other:?}");
                VerifyReply::error(state_num::M2, error_code::UNKNOWN)
            }
        }
    }

    /// M1 -> M2: ECDH exchange and signed accessory proof.
    fn m1(&mut self, tlv: &Tlv8, state: &ServerState) -> VerifyReply {
        let Some(client_public_raw) = tlv.get(TlvType::PublicKey) else {
            return VerifyReply::error(state_num::M2, error_code::UNKNOWN);
        };
        let Ok(client_public) = <[u8; 32]>::try_from(client_public_raw) else {
            return VerifyReply::error(state_num::M2, error_code::UNKNOWN);
        };

        debug!("pair-verify [1/2]");
        let keypair = EcdhKeyPair::generate();
        let accessory_public = keypair.public_key();
        let Ok(shared_secret) = keypair.diffie_hellman(&client_public) else {
            return VerifyReply::error(state_num::M2, error_code::AUTHENTICATION);
        };

        let mac = state.mac().as_bytes();
        let mut material = Vec::with_capacity(32 + mac.len() + 32);
        material.extend_from_slice(&accessory_public);
        material.extend_from_slice(mac);
        material.extend_from_slice(&client_public);
        let proof = state.identity().sign(&material);

        let Ok(session_key) = hkdf::derive_pair_verify_key(&shared_secret) else {
            return VerifyReply::error(state_num::M2, error_code::UNKNOWN);
        };

        let mut inner = Tlv8::new();
        inner.push(TlvType::Identifier, mac.to_vec());
        inner.push(TlvType::Signature, proof.to_vec());

        let nonce = nonce_from_string(PV_MSG02_NONCE);
        let Ok(encrypted) = encrypt_with_nonce(&session_key, &nonce, &inner.encode()) else {
            return VerifyReply::error(state_num::M2, error_code::UNKNOWN);
        };

        let mut reply = Tlv8::new();
        reply.push(TlvType::State, vec![state_num::M2]);
        reply.push(TlvType::PublicKey, accessory_public.to_vec());
        reply.push(TlvType::EncryptedData, encrypted);

        self.context = Some(VerifyContext {
            accessory_public,
            client_public,
            shared_secret,
            session_key,
        });
        VerifyReply::reply(reply)
    }

    /// M3 -> M4: verify the controller's proof and hand out the session
    /// secret.
    fn m3(&mut self, tlv: &Tlv8, state: &ServerState) -> VerifyReply {
        let Some(context) = self.context.take() else {
            return VerifyReply::error(state_num::M4, error_code::UNKNOWN);
        };
        let Some(encrypted_data) = tlv.get(TlvType::EncryptedData) else {
            return VerifyReply::error(state_num::M4, error_code::UNKNOWN);
        };

        debug!("pair-verify [2/2]");
        let nonce = nonce_from_string(PV_MSG03_NONCE);
        let Ok(decrypted) = decrypt_with_nonce(&context.session_key, &nonce, encrypted_data)
        else {
            return VerifyReply::error(state_num::M4, error_code::AUTHENTICATION);
        };

        let Ok(inner) = Tlv8::parse(&decrypted) else {
            return VerifyReply::error(state_num::M4, error_code::AUTHENTICATION);
        };
        let (Some(username_bytes), Some(signature_raw)) = (
            inner.get(TlvType::Identifier),
            inner.get(TlvType::Signature),
        ) else {
            return VerifyReply::error(state_num::M4, error_code::AUTHENTICATION);
        };
        let Ok(signature) = <[u8; 64]>::try_from(signature_raw) else {
            return VerifyReply::error(state_num::M4, error_code::AUTHENTICATION);
        };

        let Ok(username) = String::from_utf8(username_bytes.to_vec()) else {
            return VerifyReply::error(state_num::M4, error_code::AUTHENTICATION);
        };
        let Some(controller) = state.get_paired_client(&username) else {
            warn!("pair-verify from unknown controller {username}");
            return VerifyReply::error(state_num::M4, error_code::AUTHENTICATION);
        };

        let mut material =
            Vec::with_capacity(32 + username_bytes.len() + 32);
        material.extend_from_slice(&context.client_public);
        material.extend_from_slice(username_bytes);
        material.extend_from_slice(&context.accessory_public);

        if ed25519::verify(&controller.ltpk, &material, &signature).is_err() {
            warn!("pair-verify signature check failed for {username}");
            return VerifyReply::error(state_num::M4, error_code::AUTHENTICATION);
        }

        let mut reply = Tlv8::new();
        reply.push(TlvType::State, vec![state_num::M4]);
        VerifyReply {
            tlv: reply,
            shared_secret: Some(context.shared_secret.to_vec()),
            client_username: Some(username),
        }
    }
}
