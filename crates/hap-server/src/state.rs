//! Long-lived server identity and the paired-controller registry.
//!
//! The state survives restarts so controllers keep seeing the same device
//! id, keys and configuration version. Persistence is a JSON file written
//! atomically (temp file + rename); a missing file on startup means a
//! first run and a fresh identity is generated.

use std::collections::HashMap;
use std::path::Path;

use base64::Engine;
use hap_core::error::{Error, PersistError, Result};
use hap_crypto::ed25519::IdentityKeyPair;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::setup;

/// Controller may read and write but not manage pairings.
pub const PERMISSION_USER: u8 = 0x00;
/// Controller may also add, remove and list pairings.
pub const PERMISSION_ADMIN: u8 = 0x01;

/// One paired controller.
#[derive(Debug, Clone)]
pub struct PairedController {
    pub ltpk: [u8; 32],
    pub permissions: u8,
}

impl PairedController {
    pub fn is_admin(&self) -> bool {
        self.permissions & PERMISSION_ADMIN != 0
    }
}

/// All (semi-)static server state: identity, pairing registry and the
/// configuration version counter.
pub struct ServerState {
    mac: String,
    identity: IdentityKeyPair,
    pincode: String,
    setup_id: String,
    config_version: u32,
    paired_clients: HashMap<String, PairedController>,
    accessories_hash: Option<String>,
}

/// On-disk representation.
#[derive(Serialize, Deserialize)]
struct PersistedState {
    mac: String,
    private_key: String,
    public_key: String,
    paired_clients: HashMap<String, String>,
    permissions: HashMap<String, u8>,
    config_version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    accessories_hash: Option<String>,
}

impl ServerState {
    /// Create a fresh identity.
    ///
    /// An explicit pincode must have the `NNN-NN-NNN` shape and not be one
    /// of the trivial codes.
    pub fn new(pincode: Option<String>, mac: Option<String>) -> Result<Self> {
        let pincode = match pincode {
            Some(pincode) => {
                if !setup::is_valid_pincode(&pincode) {
                    return Err(Error::Accessory(format!("invalid pincode {pincode:?}")));
                }
                pincode
            }
            None => setup::generate_pincode(),
        };

        Ok(Self {
            mac: mac.unwrap_or_else(setup::generate_mac),
            identity: IdentityKeyPair::generate(),
            pincode,
            setup_id: setup::generate_setup_id(),
            config_version: 1,
            paired_clients: HashMap::new(),
            accessories_hash: None,
        })
    }

    /// Load state from disk, or create it when the file does not exist.
    pub fn load_or_create(
        path: &Path,
        pincode: Option<String>,
        mac: Option<String>,
    ) -> Result<Self> {
        if path.exists() {
            info!("Loading server state from {}", path.display());
            let mut state = Self::load(path)?;
            // The pincode and setup id are not persisted; reuse the caller's
            // pincode so the printed setup message matches the verifier.
            if let Some(pincode) = pincode {
                if !setup::is_valid_pincode(&pincode) {
                    return Err(Error::Accessory(format!("invalid pincode {pincode:?}")));
                }
                state.pincode = pincode;
            }
            Ok(state)
        } else {
            info!("No state file at {}, generating identity", path.display());
            Self::new(pincode, mac)
        }
    }

    fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(PersistError::Io)?;
        let persisted: PersistedState =
            serde_json::from_str(&text).map_err(|e| PersistError::InvalidJson(e.to_string()))?;

        let seed_bytes = hex::decode(&persisted.private_key)
            .map_err(|e| PersistError::InvalidField(format!("private_key: {e}")))?;
        let seed: [u8; 32] = seed_bytes
            .try_into()
            .map_err(|_| PersistError::InvalidField("private_key: wrong length".to_string()))?;
        let identity = IdentityKeyPair::from_seed(&seed);

        let expected_public = hex::decode(&persisted.public_key)
            .map_err(|e| PersistError::InvalidField(format!("public_key: {e}")))?;
        if identity.public_key().as_slice() != expected_public.as_slice() {
            return Err(PersistError::InvalidField(
                "public_key does not match private_key".to_string(),
            )
            .into());
        }

        let mut paired_clients = HashMap::new();
        for (username, ltpk_b64) in &persisted.paired_clients {
            let ltpk_bytes = base64::engine::general_purpose::STANDARD
                .decode(ltpk_b64)
                .map_err(|e| PersistError::InvalidField(format!("ltpk for {username}: {e}")))?;
            let ltpk: [u8; 32] = ltpk_bytes.try_into().map_err(|_| {
                PersistError::InvalidField(format!("ltpk for {username}: wrong length"))
            })?;
            let permissions = persisted
                .permissions
                .get(username)
                .copied()
                .unwrap_or(PERMISSION_USER);
            paired_clients.insert(username.clone(), PairedController { ltpk, permissions });
        }

        Ok(Self {
            mac: persisted.mac,
            identity,
            pincode: setup::generate_pincode(),
            setup_id: setup::generate_setup_id(),
            config_version: persisted.config_version,
            paired_clients,
            accessories_hash: persisted.accessories_hash,
        })
    }

    /// Persist atomically: write a temp file next to the target, then
    /// rename over it.
    pub fn persist(&self, path: &Path) -> Result<()> {
        let persisted = PersistedState {
            mac: self.mac.clone(),
            private_key: hex::encode(self.identity.seed()),
            public_key: hex::encode(self.identity.public_key()),
            paired_clients: self
                .paired_clients
                .iter()
                .map(|(username, controller)| {
                    (
                        username.clone(),
                        base64::engine::general_purpose::STANDARD.encode(controller.ltpk),
                    )
                })
                .collect(),
            permissions: self
                .paired_clients
                .iter()
                .map(|(username, controller)| (username.clone(), controller.permissions))
                .collect(),
            config_version: self.config_version,
            accessories_hash: self.accessories_hash.clone(),
        };

        let text = serde_json::to_string_pretty(&persisted)
            .map_err(|e| PersistError::InvalidJson(e.to_string()))?;

        let tmp_path = path.with_extension("tmp");
        std::fs::write(&tmp_path, text).map_err(PersistError::Io)?;
        std::fs::rename(&tmp_path, path).map_err(PersistError::Io)?;
        debug!("Persisted server state to {}", path.display());
        Ok(())
    }

    pub fn mac(&self) -> &str {
        &self.mac
    }

    pub fn identity(&self) -> &IdentityKeyPair {
        &self.identity
    }

    pub fn pincode(&self) -> &str {
        &self.pincode
    }

    pub fn setup_id(&self) -> &str {
        &self.setup_id
    }

    pub fn config_version(&self) -> u32 {
        self.config_version
    }

    pub fn increment_config_version(&mut self) {
        self.config_version = self.config_version.wrapping_add(1).max(1);
    }

    /// Track the structural hash; returns whether it changed (and the
    /// config version was bumped).
    pub fn set_accessories_hash(&mut self, hash: String) -> bool {
        if self.accessories_hash.as_deref() == Some(hash.as_str()) {
            return false;
        }
        let first_run = self.accessories_hash.is_none();
        self.accessories_hash = Some(hash);
        if !first_run {
            self.increment_config_version();
        }
        !first_run
    }

    // ### Pairing registry ###

    pub fn paired(&self) -> bool {
        !self.paired_clients.is_empty()
    }

    pub fn paired_clients(&self) -> &HashMap<String, PairedController> {
        &self.paired_clients
    }

    pub fn get_paired_client(&self, username: &str) -> Option<&PairedController> {
        self.paired_clients.get(username)
    }

    pub fn is_admin(&self, username: &str) -> bool {
        self.paired_clients
            .get(username)
            .map(PairedController::is_admin)
            .unwrap_or(false)
    }

    pub fn add_paired_client(&mut self, username: &str, ltpk: [u8; 32], permissions: u8) {
        self.paired_clients
            .insert(username.to_string(), PairedController { ltpk, permissions });
    }

    pub fn remove_paired_client(&mut self, username: &str) -> Option<PairedController> {
        self.paired_clients.remove(username)
    }

    pub fn clear_pairings(&mut self) {
        self.paired_clients.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> std::path::PathBuf {
        let mut path = std::env::temp_dir();
        path.push(format!("hap-state-test-{}-{}.json", name, std::process::id()));
        path
    }

    mod identity {
        use super::*;

        #[test]
        fn new_state_generates_everything() {
            let state = ServerState::new(None, None).unwrap();
            assert_eq!(state.mac().len(), 17);
            assert!(setup::is_valid_pincode(state.pincode()));
            assert_eq!(state.setup_id().len(), 4);
            assert_eq!(state.config_version(), 1);
            assert!(!state.paired());
        }

        #[test]
        fn explicit_pincode_is_validated() {
            assert!(ServerState::new(Some("031-45-154".to_string()), None).is_ok());
            assert!(ServerState::new(Some("000-00-000".to_string()), None).is_err());
            assert!(ServerState::new(Some("garbage".to_string()), None).is_err());
        }
    }

    mod registry {
        use super::*;

        #[test]
        fn first_pair_and_admin_checks() {
            let mut state = ServerState::new(None, None).unwrap();
            state.add_paired_client("uuid-1", [1u8; 32], PERMISSION_ADMIN);
            assert!(state.paired());
            assert!(state.is_admin("uuid-1"));
            assert!(!state.is_admin("uuid-2"));

            state.add_paired_client("uuid-2", [2u8; 32], PERMISSION_USER);
            assert!(!state.is_admin("uuid-2"));

            state.remove_paired_client("uuid-1");
            state.remove_paired_client("uuid-2");
            assert!(!state.paired());
        }

        #[test]
        fn clear_wipes_registry() {
            let mut state = ServerState::new(None, None).unwrap();
            state.add_paired_client("uuid-1", [1u8; 32], PERMISSION_ADMIN);
            state.add_paired_client("uuid-2", [2u8; 32], PERMISSION_USER);
            state.clear_pairings();
            assert!(!state.paired());
        }
    }

    mod config_version {
        use super::*;

        #[test]
        fn hash_change_bumps_version() {
            let mut state = ServerState::new(None, None).unwrap();
            // First hash observation records without bumping.
            assert!(!state.set_accessories_hash("aaa".to_string()));
            assert_eq!(state.config_version(), 1);

            assert!(state.set_accessories_hash("bbb".to_string()));
            assert_eq!(state.config_version(), 2);

            // Unchanged hash does not bump.
            assert!(!state.set_accessories_hash("bbb".to_string()));
            assert_eq!(state.config_version(), 2);
        }
    }

    mod persistence {
        use super::*;

        #[test]
        fn roundtrip_preserves_identity_and_pairings() {
            let path = temp_path("roundtrip");
            let mut state = ServerState::new(None, Some("AA:BB:CC:DD:EE:FF".to_string())).unwrap();
            state.add_paired_client("uuid-1", [7u8; 32], PERMISSION_ADMIN);
            state.increment_config_version();
            state.persist(&path).unwrap();

            let loaded = ServerState::load_or_create(&path, None, None).unwrap();
            assert_eq!(loaded.mac(), "AA:BB:CC:DD:EE:FF");
            assert_eq!(loaded.config_version(), 2);
            assert_eq!(
                loaded.identity().public_key(),
                state.identity().public_key()
            );
            let controller = loaded.get_paired_client("uuid-1").unwrap();
            assert_eq!(controller.ltpk, [7u8; 32]);
            assert!(controller.is_admin());

            std::fs::remove_file(&path).ok();
        }

        #[test]
        fn missing_file_generates_identity() {
            let path = temp_path("missing");
            std::fs::remove_file(&path).ok();
            let state = ServerState::load_or_create(&path, None, None).unwrap();
            assert!(!state.paired());
        }

        #[test]
        fn corrupt_file_is_an_error() {
            let path = temp_path("corrupt");
            std::fs::write(&path, "not json at all").unwrap();
            assert!(ServerState::load_or_create(&path, None, None).is_err());
            std::fs::remove_file(&path).ok();
        }

        #[test]
        fn state_file_matches_documented_shape() {
            let path = temp_path("shape");
            let state = ServerState::new(None, None).unwrap();
            state.persist(&path).unwrap();

            let text = std::fs::read_to_string(&path).unwrap();
            let json: serde_json::Value = serde_json::from_str(&text).unwrap();
            for key in [
                "mac",
                "private_key",
                "public_key",
                "paired_clients",
                "permissions",
                "config_version",
            ] {
                assert!(json.get(key).is_some(), "missing key {key}");
            }

            std::fs::remove_file(&path).ok();
        }
    }
}
