//! HAP services: named groupings of characteristics.

use hap_core::HapType;
use serde_json::{json, Map, Value};

use crate::characteristic::Characteristic;

/// A group of characteristics, e.g. `TemperatureSensor` or `Lightbulb`.
#[derive(Debug, Clone)]
pub struct Service {
    display_name: String,
    type_id: HapType,
    hidden: bool,
    primary: bool,
    linked: Vec<u64>,
    characteristics: Vec<Characteristic>,
    iid: u64,
}

impl Service {
    pub fn new(display_name: impl Into<String>, type_id: HapType) -> Self {
        Self {
            display_name: display_name.into(),
            type_id,
            hidden: false,
            primary: false,
            linked: Vec::new(),
            characteristics: Vec::new(),
            iid: 0,
        }
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn type_id(&self) -> HapType {
        self.type_id
    }

    pub fn iid(&self) -> u64 {
        self.iid
    }

    pub(crate) fn set_iid(&mut self, iid: u64) {
        self.iid = iid;
    }

    pub fn set_primary(&mut self, primary: bool) {
        self.primary = primary;
    }

    pub fn set_hidden(&mut self, hidden: bool) {
        self.hidden = hidden;
    }

    /// Link another service of the same accessory by its IID.
    pub fn add_linked_service(&mut self, iid: u64) {
        if !self.linked.contains(&iid) {
            self.linked.push(iid);
        }
    }

    /// Add characteristics, skipping any whose type is already present.
    pub fn add_characteristic(&mut self, characteristic: Characteristic) {
        let already_present = self
            .characteristics
            .iter()
            .any(|c| c.type_id() == characteristic.type_id());
        if !already_present {
            self.characteristics.push(characteristic);
        }
    }

    pub fn characteristics(&self) -> &[Characteristic] {
        &self.characteristics
    }

    pub fn characteristics_mut(&mut self) -> &mut [Characteristic] {
        &mut self.characteristics
    }

    /// Find a characteristic by its display name.
    pub fn get_characteristic(&self, name: &str) -> Option<&Characteristic> {
        self.characteristics.iter().find(|c| c.display_name() == name)
    }

    /// Mutable lookup by display name, used by `configure_char` flows.
    pub fn configure_char(&mut self, name: &str) -> Option<&mut Characteristic> {
        self.characteristics
            .iter_mut()
            .find(|c| c.display_name() == name)
    }

    /// HAP JSON representation.
    pub fn to_hap(&self) -> Map<String, Value> {
        let mut rep = Map::new();
        rep.insert("iid".to_string(), json!(self.iid));
        rep.insert("type".to_string(), json!(self.type_id.to_wire()));
        rep.insert(
            "characteristics".to_string(),
            json!(self
                .characteristics
                .iter()
                .map(|c| c.to_hap())
                .collect::<Vec<_>>()),
        );
        if self.primary {
            rep.insert("primary".to_string(), json!(true));
        }
        if self.hidden {
            rep.insert("hidden".to_string(), json!(true));
        }
        if !self.linked.is_empty() {
            rep.insert("linked".to_string(), json!(self.linked));
        }
        rep
    }
}
