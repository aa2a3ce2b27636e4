//! The static type catalog.
//!
//! Two JSON catalogs describe the Apple-defined characteristic and service
//! types by human-readable name. `service(name)` instantiates a service
//! with its mandatory characteristics attached; optional characteristics
//! are added by the caller, because once a characteristic is present a
//! controller expects values for it.
//!
//! The loader is an owned handle, injected into whatever builds
//! accessories; tests substitute a fixture catalog by parsing their own
//! JSON.

use std::collections::HashMap;
use std::path::Path;

use hap_core::error::{CatalogError, Result};
use hap_core::HapType;
use serde::Deserialize;

use crate::characteristic::{Characteristic, Format, Perm, Unit};
use crate::service::Service;

const CHARACTERISTICS_JSON: &str = include_str!("../resources/characteristics.json");
const SERVICES_JSON: &str = include_str!("../resources/services.json");

#[derive(Debug, Deserialize)]
struct CharEntry {
    #[serde(rename = "UUID")]
    uuid: String,
    #[serde(rename = "Format")]
    format: String,
    #[serde(rename = "Permissions")]
    permissions: Vec<String>,
    #[serde(rename = "minValue")]
    min_value: Option<f64>,
    #[serde(rename = "maxValue")]
    max_value: Option<f64>,
    #[serde(rename = "minStep")]
    min_step: Option<f64>,
    #[serde(rename = "maxLen")]
    max_len: Option<u64>,
    #[serde(rename = "maxDataLen")]
    max_data_len: Option<u64>,
    unit: Option<String>,
    #[serde(rename = "ValidValues")]
    valid_values: Option<HashMap<String, i64>>,
}

#[derive(Debug, Deserialize)]
struct ServiceEntry {
    #[serde(rename = "UUID")]
    uuid: String,
    #[serde(rename = "RequiredCharacteristics")]
    required: Vec<String>,
    #[serde(rename = "OptionalCharacteristics", default)]
    #[allow(dead_code)]
    optional: Vec<String>,
}

/// Looks up type descriptions by name and instantiates model objects.
#[derive(Debug)]
pub struct Loader {
    characteristics: HashMap<String, CharEntry>,
    services: HashMap<String, ServiceEntry>,
}

impl Loader {
    /// Load the embedded default catalogs.
    pub fn embedded() -> Result<Self> {
        Self::from_json(CHARACTERISTICS_JSON, SERVICES_JSON)
    }

    /// Load catalogs from JSON text.
    pub fn from_json(characteristics: &str, services: &str) -> Result<Self> {
        let characteristics: HashMap<String, CharEntry> = serde_json::from_str(characteristics)
            .map_err(|e| CatalogError::InvalidJson(e.to_string()))?;
        let services: HashMap<String, ServiceEntry> = serde_json::from_str(services)
            .map_err(|e| CatalogError::InvalidJson(e.to_string()))?;
        Ok(Self {
            characteristics,
            services,
        })
    }

    /// Load catalogs from files on disk.
    pub fn from_files(characteristics: &Path, services: &Path) -> Result<Self> {
        let chars_text = std::fs::read_to_string(characteristics)?;
        let services_text = std::fs::read_to_string(services)?;
        Self::from_json(&chars_text, &services_text)
    }

    /// Instantiate a characteristic by catalog name.
    pub fn characteristic(&self, name: &str) -> Result<Characteristic> {
        let entry = self
            .characteristics
            .get(name)
            .ok_or_else(|| CatalogError::UnknownCharacteristic(name.to_string()))?;

        let type_id = HapType::parse(&entry.uuid).map_err(|e| CatalogError::MalformedEntry {
            name: name.to_string(),
            reason: e.to_string(),
        })?;
        let format = Format::parse(&entry.format).map_err(|e| CatalogError::MalformedEntry {
            name: name.to_string(),
            reason: e.to_string(),
        })?;
        let perms = entry
            .permissions
            .iter()
            .map(|p| Perm::parse(p))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| CatalogError::MalformedEntry {
                name: name.to_string(),
                reason: e.to_string(),
            })?;

        let mut characteristic = Characteristic::new(name, type_id, format, perms);
        characteristic.set_constraints(entry.min_value, entry.max_value, entry.min_step);
        if let Some(max_len) = entry.max_len {
            characteristic.set_max_len(max_len);
        }
        if let Some(max_data_len) = entry.max_data_len {
            characteristic.set_max_data_len(max_data_len);
        }
        if let Some(unit) = &entry.unit {
            let unit = Unit::parse(unit).map_err(|e| CatalogError::MalformedEntry {
                name: name.to_string(),
                reason: e.to_string(),
            })?;
            characteristic.set_unit(unit);
        }
        if let Some(valid_values) = &entry.valid_values {
            let mut values: Vec<i64> = valid_values.values().copied().collect();
            values.sort_unstable();
            characteristic.set_valid_values(values);
        }

        // Constraints may have changed what a valid default is.
        if characteristic.has_perm(Perm::PairRead) {
            let default = characteristic.default_value();
            characteristic.commit(default);
        }
        Ok(characteristic)
    }

    /// Instantiate a service by catalog name with its mandatory
    /// characteristics attached.
    pub fn service(&self, name: &str) -> Result<Service> {
        let entry = self
            .services
            .get(name)
            .ok_or_else(|| CatalogError::UnknownService(name.to_string()))?;

        let type_id = HapType::parse(&entry.uuid).map_err(|e| CatalogError::MalformedEntry {
            name: name.to_string(),
            reason: e.to_string(),
        })?;

        let mut service = Service::new(name, type_id);
        for char_name in &entry.required {
            service.add_characteristic(self.characteristic(char_name)?);
        }
        Ok(service)
    }

    /// Names of all known services, mostly useful for diagnostics.
    pub fn service_names(&self) -> Vec<&str> {
        self.services.keys().map(String::as_str).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::characteristic::Perm;
    use serde_json::json;

    #[test]
    fn embedded_catalog_parses() {
        let loader = Loader::embedded().unwrap();
        assert!(loader.service_names().contains(&"AccessoryInformation"));
    }

    #[test]
    fn characteristic_carries_catalog_metadata() {
        let loader = Loader::embedded().unwrap();
        let brightness = loader.characteristic("Brightness").unwrap();
        assert_eq!(brightness.format(), Format::Int32);
        assert!(brightness.has_perm(Perm::PairWrite));
        assert_eq!(brightness.unit(), Some(Unit::Percentage));
        assert_eq!(brightness.type_id(), HapType::parse("8").unwrap());
    }

    #[test]
    fn enum_characteristic_defaults_to_smallest_valid_value() {
        let loader = Loader::embedded().unwrap();
        let state = loader.characteristic("SecuritySystemCurrentState").unwrap();
        assert_eq!(state.value(), Some(&json!(0)));
    }

    #[test]
    fn service_attaches_required_characteristics_in_order() {
        let loader = Loader::embedded().unwrap();
        let info = loader.service("AccessoryInformation").unwrap();
        let names: Vec<&str> = info
            .characteristics()
            .iter()
            .map(|c| c.display_name())
            .collect();
        assert_eq!(
            names,
            vec![
                "Identify",
                "Manufacturer",
                "Model",
                "Name",
                "SerialNumber",
                "FirmwareRevision"
            ]
        );
    }

    #[test]
    fn optional_characteristics_are_not_preloaded() {
        let loader = Loader::embedded().unwrap();
        let bulb = loader.service("Lightbulb").unwrap();
        assert!(bulb.get_characteristic("On").is_some());
        assert!(bulb.get_characteristic("Brightness").is_none());
    }

    #[test]
    fn unknown_names_are_reported() {
        let loader = Loader::embedded().unwrap();
        assert!(loader.characteristic("FluxCapacitor").is_err());
        assert!(loader.service("TimeMachine").is_err());
    }

    #[test]
    fn fixture_catalog_can_be_substituted() {
        let chars = r#"{
            "TestChar": {
                "Format": "uint8",
                "Permissions": ["pr", "pw"],
                "UUID": "00000099-0000-1000-8000-0026BB765291",
                "minValue": 0,
                "maxValue": 10
            }
        }"#;
        let services = r#"{
            "TestService": {
                "UUID": "000000F1-0000-1000-8000-0026BB765291",
                "RequiredCharacteristics": ["TestChar"]
            }
        }"#;
        let loader = Loader::from_json(chars, services).unwrap();
        let svc = loader.service("TestService").unwrap();
        assert_eq!(svc.characteristics().len(), 1);
    }

    #[test]
    fn malformed_catalog_is_rejected() {
        assert!(Loader::from_json("not json", "{}").is_err());
        let bad_format = r#"{
            "Broken": {
                "Format": "quaternion",
                "Permissions": ["pr"],
                "UUID": "00000099-0000-1000-8000-0026BB765291"
            }
        }"#;
        let loader = Loader::from_json(bad_format, "{}").unwrap();
        assert!(loader.characteristic("Broken").is_err());
    }
}
