//! Accessories and the accessory database.
//!
//! The database is the single owning container for the whole attribute
//! tree: accessories keyed by AID, services and characteristics addressed
//! by `(aid, iid)`. Children never hold references to their parents.

use std::collections::BTreeMap;
use std::sync::Arc;

use hap_core::error::{Error, Result};
use hap_core::{Category, HapType, STANDALONE_AID};
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha512};

use crate::characteristic::Characteristic;
use crate::handler::AccessoryHandler;
use crate::loader::Loader;
use crate::service::Service;

/// Some controllers reject accessories with this AID.
const RESERVED_BRIDGED_AID: u64 = 7;

/// Kind discriminator for IID bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum IidKind {
    Service,
    Characteristic,
}

/// Allocates instance IDs within one accessory.
///
/// Assignment is first-come monotonic starting at 1 for the
/// AccessoryInformation service, so a given construction order always
/// produces the same IIDs across restarts. The `(kind, type, name)` map
/// lets callers look an IID back up without holding object references.
#[derive(Debug, Default)]
pub struct IidManager {
    counter: u64,
    assigned: Vec<((IidKind, HapType, String), u64)>,
}

impl IidManager {
    fn assign(&mut self, kind: IidKind, type_id: HapType, name: &str) -> u64 {
        self.counter += 1;
        self.assigned
            .push(((kind, type_id, name.to_string()), self.counter));
        self.counter
    }

    fn lookup(&self, kind: IidKind, type_id: HapType, name: &str) -> Option<u64> {
        self.assigned
            .iter()
            .find(|((k, t, n), _)| *k == kind && *t == type_id && n == name)
            .map(|(_, iid)| *iid)
    }
}

/// A unit exposed to HomeKit: an ordered set of services.
pub struct Accessory {
    aid: Option<u64>,
    display_name: String,
    category: Category,
    services: Vec<Service>,
    iid_manager: IidManager,
    handler: Option<Arc<dyn AccessoryHandler>>,
}

impl Accessory {
    /// Create an accessory with its mandatory AccessoryInformation service.
    pub fn new(loader: &Loader, display_name: impl Into<String>, category: Category) -> Result<Self> {
        let display_name = display_name.into();
        let mut accessory = Self {
            aid: None,
            display_name: display_name.clone(),
            category,
            services: Vec::new(),
            iid_manager: IidManager::default(),
            handler: None,
        };

        let mut info = loader.service("AccessoryInformation")?;
        if let Some(name) = info.configure_char("Name") {
            name.commit(json!(display_name));
        }
        if let Some(serial) = info.configure_char("SerialNumber") {
            serial.commit(json!("default"));
        }
        accessory.add_service(info);
        Ok(accessory)
    }

    pub fn aid(&self) -> Option<u64> {
        self.aid
    }

    fn set_aid(&mut self, aid: u64) {
        self.aid = Some(aid);
    }

    /// Pin an explicit AID so a bridged accessory keeps it across restarts.
    pub fn with_aid(mut self, aid: u64) -> Self {
        self.aid = Some(aid);
        self
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn category(&self) -> Category {
        self.category
    }

    /// Attach the capability implementation driving this accessory.
    pub fn set_handler(&mut self, handler: Arc<dyn AccessoryHandler>) {
        self.handler = Some(handler);
    }

    pub fn handler(&self) -> Option<Arc<dyn AccessoryHandler>> {
        self.handler.clone()
    }

    /// Add a service, assigning IIDs to it and its characteristics.
    ///
    /// Do not add characteristics to a service after it has been added;
    /// they would never receive an IID.
    pub fn add_service(&mut self, mut service: Service) {
        let iid = self
            .iid_manager
            .assign(IidKind::Service, service.type_id(), service.display_name());
        service.set_iid(iid);
        for characteristic in service.characteristics_mut() {
            let iid = self.iid_manager.assign(
                IidKind::Characteristic,
                characteristic.type_id(),
                characteristic.display_name(),
            );
            characteristic.set_iid(iid);
        }
        self.services.push(service);
    }

    /// Instantiate a catalog service with optional extra characteristics
    /// and add it to this accessory.
    pub fn add_preload_service(
        &mut self,
        loader: &Loader,
        service_name: &str,
        extra_chars: &[&str],
    ) -> Result<u64> {
        let mut service = loader.service(service_name)?;
        for char_name in extra_chars {
            service.add_characteristic(loader.characteristic(char_name)?);
        }
        self.add_service(service);
        Ok(self.services.last().map(|s| s.iid()).unwrap_or(0))
    }

    /// Quick-assign the AccessoryInformation fields.
    pub fn set_info_service(
        &mut self,
        firmware_revision: Option<&str>,
        manufacturer: Option<&str>,
        model: Option<&str>,
        serial_number: Option<&str>,
    ) {
        let Some(info) = self
            .services
            .iter_mut()
            .find(|s| s.display_name() == "AccessoryInformation")
        else {
            return;
        };
        let updates = [
            ("FirmwareRevision", firmware_revision),
            ("Manufacturer", manufacturer),
            ("Model", model),
            ("SerialNumber", serial_number),
        ];
        for (name, value) in updates {
            if let Some(value) = value {
                if let Some(characteristic) = info.configure_char(name) {
                    characteristic.commit(json!(value));
                }
            }
        }
    }

    pub fn services(&self) -> &[Service] {
        &self.services
    }

    /// Find a service by display name.
    pub fn get_service(&self, name: &str) -> Option<&Service> {
        self.services.iter().find(|s| s.display_name() == name)
    }

    pub fn get_service_mut(&mut self, name: &str) -> Option<&mut Service> {
        self.services.iter_mut().find(|s| s.display_name() == name)
    }

    /// Look up a characteristic by IID.
    pub fn get_characteristic(&self, iid: u64) -> Option<&Characteristic> {
        self.services
            .iter()
            .flat_map(|s| s.characteristics())
            .find(|c| c.iid() == iid)
    }

    pub fn get_characteristic_mut(&mut self, iid: u64) -> Option<&mut Characteristic> {
        self.services
            .iter_mut()
            .flat_map(|s| s.characteristics_mut().iter_mut())
            .find(|c| c.iid() == iid)
    }

    /// IID of a characteristic addressed by service and characteristic name.
    pub fn char_iid(&self, service_name: &str, char_name: &str) -> Option<u64> {
        self.get_service(service_name)
            .and_then(|s| s.get_characteristic(char_name))
            .map(|c| c.iid())
    }

    /// IID lookup through the manager, by type and display name.
    pub fn iid_of_type(&self, type_id: HapType, name: &str) -> Option<u64> {
        self.iid_manager
            .lookup(IidKind::Characteristic, type_id, name)
    }

    /// HAP JSON representation.
    pub fn to_hap(&self) -> Map<String, Value> {
        let mut rep = Map::new();
        rep.insert("aid".to_string(), json!(self.aid.unwrap_or(STANDALONE_AID)));
        rep.insert(
            "services".to_string(),
            json!(self.services.iter().map(|s| s.to_hap()).collect::<Vec<_>>()),
        );
        rep
    }
}

impl std::fmt::Debug for Accessory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Accessory")
            .field("aid", &self.aid)
            .field("display_name", &self.display_name)
            .field("category", &self.category)
            .field(
                "services",
                &self
                    .services
                    .iter()
                    .map(|s| s.display_name().to_string())
                    .collect::<Vec<_>>(),
            )
            .finish()
    }
}

/// The owning container for the served attribute tree.
///
/// A standalone server holds one accessory at AID 1. A bridge holds the
/// bridge accessory at AID 1 (AccessoryInformation only) plus bridged
/// accessories at AIDs >= 2, stable across restarts.
#[derive(Debug)]
pub struct AccessoryDatabase {
    accessories: BTreeMap<u64, Accessory>,
}

impl AccessoryDatabase {
    /// Expose a single accessory at AID 1.
    pub fn standalone(mut accessory: Accessory) -> Result<Self> {
        match accessory.aid() {
            None => accessory.set_aid(STANDALONE_AID),
            Some(STANDALONE_AID) => {}
            Some(other) => {
                return Err(Error::Accessory(format!(
                    "standalone accessory must have AID {STANDALONE_AID}, got {other}"
                )))
            }
        }
        let mut accessories = BTreeMap::new();
        accessories.insert(STANDALONE_AID, accessory);
        Ok(Self { accessories })
    }

    /// Create a bridge with its root accessory at AID 1.
    pub fn bridge(loader: &Loader, display_name: impl Into<String>) -> Result<Self> {
        let mut root = Accessory::new(loader, display_name, Category::Bridge)?;
        root.set_aid(STANDALONE_AID);
        let mut accessories = BTreeMap::new();
        accessories.insert(STANDALONE_AID, root);
        Ok(Self { accessories })
    }

    /// Add a bridged accessory.
    ///
    /// Auto-assigned AIDs start at 2 and skip the reserved AID 7. An
    /// explicit AID must not collide with an existing accessory.
    pub fn add_bridged(&mut self, mut accessory: Accessory) -> Result<u64> {
        if accessory.category() == Category::Bridge {
            return Err(Error::Accessory("bridges cannot be bridged".to_string()));
        }
        let aid = match accessory.aid() {
            Some(aid) => {
                if aid == STANDALONE_AID || self.accessories.contains_key(&aid) {
                    return Err(Error::Accessory(format!(
                        "duplicate AID {aid} when adding accessory"
                    )));
                }
                aid
            }
            None => (2..)
                .find(|aid| *aid != RESERVED_BRIDGED_AID && !self.accessories.contains_key(aid))
                .expect("unbounded range always yields a free AID"),
        };
        accessory.set_aid(aid);
        self.accessories.insert(aid, accessory);
        Ok(aid)
    }

    /// The primary accessory (AID 1).
    pub fn primary(&self) -> &Accessory {
        self.accessories
            .get(&STANDALONE_AID)
            .expect("database always holds the primary accessory")
    }

    pub fn is_bridge(&self) -> bool {
        self.primary().category() == Category::Bridge
    }

    pub fn get(&self, aid: u64) -> Option<&Accessory> {
        self.accessories.get(&aid)
    }

    pub fn get_mut(&mut self, aid: u64) -> Option<&mut Accessory> {
        self.accessories.get_mut(&aid)
    }

    pub fn accessories(&self) -> impl Iterator<Item = &Accessory> {
        self.accessories.values()
    }

    pub fn get_characteristic(&self, aid: u64, iid: u64) -> Option<&Characteristic> {
        self.accessories.get(&aid)?.get_characteristic(iid)
    }

    pub fn get_characteristic_mut(&mut self, aid: u64, iid: u64) -> Option<&mut Characteristic> {
        self.accessories.get_mut(&aid)?.get_characteristic_mut(iid)
    }

    /// Full `/accessories` payload.
    pub fn to_hap(&self) -> Value {
        json!({
            "accessories": self
                .accessories
                .values()
                .map(|a| a.to_hap())
                .collect::<Vec<_>>(),
        })
    }

    /// Hash of the tree structure, excluding characteristic values.
    ///
    /// Used to decide whether the advertised configuration version must be
    /// bumped. Value-only changes must not alter this hash.
    pub fn structural_hash(&self) -> String {
        let mut tree = self.to_hap();
        strip_values(&mut tree);
        let canonical = tree.to_string();
        let mut hasher = Sha512::new();
        hasher.update(canonical.as_bytes());
        hex::encode(hasher.finalize())
    }
}

/// Recursively remove `value` members from characteristic objects.
fn strip_values(value: &mut Value) {
    match value {
        Value::Object(map) => {
            map.remove("value");
            for v in map.values_mut() {
                strip_values(v);
            }
        }
        Value::Array(items) => {
            for v in items {
                strip_values(v);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loader() -> Loader {
        Loader::embedded().unwrap()
    }

    mod iids {
        use super::*;

        #[test]
        fn info_service_is_iid_1_with_identify_2() {
            let acc = Accessory::new(&loader(), "Test", Category::Other).unwrap();
            let info = acc.get_service("AccessoryInformation").unwrap();
            assert_eq!(info.iid(), 1);
            assert_eq!(acc.char_iid("AccessoryInformation", "Identify"), Some(2));
            assert_eq!(acc.char_iid("AccessoryInformation", "Manufacturer"), Some(3));
            assert_eq!(acc.char_iid("AccessoryInformation", "Model"), Some(4));
            assert_eq!(acc.char_iid("AccessoryInformation", "Name"), Some(5));
            assert_eq!(acc.char_iid("AccessoryInformation", "SerialNumber"), Some(6));
            assert_eq!(
                acc.char_iid("AccessoryInformation", "FirmwareRevision"),
                Some(7)
            );
        }

        #[test]
        fn second_service_continues_numbering() {
            let ld = loader();
            let mut acc = Accessory::new(&ld, "Lamp", Category::Lightbulb).unwrap();
            acc.add_preload_service(&ld, "Lightbulb", &[]).unwrap();
            let bulb = acc.get_service("Lightbulb").unwrap();
            assert_eq!(bulb.iid(), 8);
            assert_eq!(acc.char_iid("Lightbulb", "On"), Some(9));
        }

        #[test]
        fn same_construction_order_yields_same_iids() {
            let ld = loader();
            let build = || {
                let mut acc = Accessory::new(&ld, "Lamp", Category::Lightbulb).unwrap();
                acc.add_preload_service(&ld, "Lightbulb", &["Brightness"]).unwrap();
                acc
            };
            let a = build();
            let b = build();
            assert_eq!(
                a.char_iid("Lightbulb", "Brightness"),
                b.char_iid("Lightbulb", "Brightness")
            );
        }

        #[test]
        fn iid_lookup_by_type_and_name() {
            let acc = Accessory::new(&loader(), "Test", Category::Other).unwrap();
            let name_type = HapType::parse("23").unwrap();
            assert_eq!(acc.iid_of_type(name_type, "Name"), Some(5));
        }
    }

    mod bridge {
        use super::*;

        #[test]
        fn bridged_aids_start_at_2_and_skip_7() {
            let ld = loader();
            let mut db = AccessoryDatabase::bridge(&ld, "Test Bridge").unwrap();
            let mut aids = Vec::new();
            for i in 0..7 {
                let acc = Accessory::new(&ld, format!("Sensor {i}"), Category::Sensor).unwrap();
                aids.push(db.add_bridged(acc).unwrap());
            }
            assert_eq!(aids, vec![2, 3, 4, 5, 6, 8, 9]);
        }

        #[test]
        fn explicit_aid_is_kept_stable() {
            let ld = loader();
            let mut db = AccessoryDatabase::bridge(&ld, "Test Bridge").unwrap();
            let mut acc = Accessory::new(&ld, "Lamp", Category::Lightbulb).unwrap();
            acc.set_aid(42);
            assert_eq!(db.add_bridged(acc).unwrap(), 42);
        }

        #[test]
        fn duplicate_aid_rejected() {
            let ld = loader();
            let mut db = AccessoryDatabase::bridge(&ld, "Test Bridge").unwrap();
            let mut first = Accessory::new(&ld, "One", Category::Sensor).unwrap();
            first.set_aid(2);
            db.add_bridged(first).unwrap();

            let mut second = Accessory::new(&ld, "Two", Category::Sensor).unwrap();
            second.set_aid(2);
            assert!(db.add_bridged(second).is_err());
        }

        #[test]
        fn bridges_cannot_be_bridged() {
            let ld = loader();
            let mut db = AccessoryDatabase::bridge(&ld, "Outer").unwrap();
            let inner = Accessory::new(&ld, "Inner", Category::Bridge).unwrap();
            assert!(db.add_bridged(inner).is_err());
        }

        #[test]
        fn standalone_requires_aid_1() {
            let ld = loader();
            let mut acc = Accessory::new(&ld, "Lamp", Category::Lightbulb).unwrap();
            acc.set_aid(3);
            assert!(AccessoryDatabase::standalone(acc).is_err());
        }
    }

    mod serialization {
        use super::*;

        #[test]
        fn tree_contains_accessories_array() {
            let ld = loader();
            let mut db = AccessoryDatabase::bridge(&ld, "Test Bridge").unwrap();
            let acc = Accessory::new(&ld, "Lamp", Category::Lightbulb).unwrap();
            db.add_bridged(acc).unwrap();

            let tree = db.to_hap();
            let accessories = tree["accessories"].as_array().unwrap();
            assert_eq!(accessories.len(), 2);
            assert_eq!(accessories[0]["aid"], json!(1));
            assert_eq!(accessories[1]["aid"], json!(2));
        }

        #[test]
        fn structural_hash_ignores_value_changes() {
            let ld = loader();
            let mut acc = Accessory::new(&ld, "Lamp", Category::Lightbulb).unwrap();
            acc.add_preload_service(&ld, "Lightbulb", &[]).unwrap();
            let mut db = AccessoryDatabase::standalone(acc).unwrap();
            let before = db.structural_hash();

            let iid = db.primary().char_iid("Lightbulb", "On").unwrap();
            db.get_characteristic_mut(1, iid)
                .unwrap()
                .set_value(&json!(true))
                .unwrap();

            assert_eq!(db.structural_hash(), before);
        }

        #[test]
        fn structural_hash_tracks_topology_changes() {
            let ld = loader();
            let mut db = AccessoryDatabase::bridge(&ld, "Test Bridge").unwrap();
            let before = db.structural_hash();

            let acc = Accessory::new(&ld, "Lamp", Category::Lightbulb).unwrap();
            db.add_bridged(acc).unwrap();
            assert_ne!(db.structural_hash(), before);
        }
    }
}
