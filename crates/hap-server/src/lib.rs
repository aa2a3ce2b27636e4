//! # hap-server
//!
//! The accessory server runtime: persisted identity, pair-setup and
//! pair-verify state machines, the session-encrypted HTTP transport, HAP
//! operation dispatch, event fan-out and mDNS advertisement.
//!
//! The entry point is [`HapDriver`]: build an
//! [`hap_accessory::AccessoryDatabase`], hand it to the driver together
//! with a [`DriverConfig`], and call `run()`.

pub mod advertise;
pub mod driver;
pub mod events;
pub mod handlers;
pub mod http;
pub mod pairing;
pub mod setup;
pub mod state;
pub mod transport;

pub use driver::{DriverConfig, DriverHandle, HapDriver};
pub use state::{PairedController, ServerState, PERMISSION_ADMIN, PERMISSION_USER};
