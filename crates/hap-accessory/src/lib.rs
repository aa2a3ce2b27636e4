//! # hap-accessory
//!
//! The typed attribute model served to HomeKit controllers:
//! Accessory -> Service -> Characteristic, instance-id allocation, value
//! coercion, the static type catalog, and the capability interface an
//! accessory implementation supplies to the runtime.

pub mod accessory;
pub mod characteristic;
pub mod handler;
pub mod loader;
pub mod service;

pub use accessory::{Accessory, AccessoryDatabase, IidManager};
pub use characteristic::{Characteristic, CoercionMode, Format, Perm, PropertyOverrides, Unit};
pub use handler::{AccessoryContext, AccessoryHandler, ValueUpdate};
pub use loader::Loader;
pub use service::Service;
