//! Accessory categories.
//!
//! The category is a hint to controllers about what kind of device an
//! accessory is; it only affects the icon shown during setup. It is
//! advertised in the mDNS `ci` key and encoded into the setup payload.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum Category {
    Other = 1,
    Bridge = 2,
    Fan = 3,
    GarageDoorOpener = 4,
    Lightbulb = 5,
    DoorLock = 6,
    Outlet = 7,
    Switch = 8,
    Thermostat = 9,
    Sensor = 10,
    AlarmSystem = 11,
    Door = 12,
    Window = 13,
    WindowCovering = 14,
    ProgrammableSwitch = 15,
    RangeExtender = 16,
    Camera = 17,
}

impl Category {
    /// Numeric value used in the mDNS `ci` key and the setup payload.
    pub fn id(self) -> u8 {
        self as u8
    }
}

impl Default for Category {
    fn default() -> Self {
        Self::Other
    }
}
