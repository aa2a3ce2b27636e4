//! # hap-core
//!
//! Shared types for the HAP accessory server:
//! - the error taxonomy used across the workspace
//! - per-characteristic HAP status codes
//! - accessory categories advertised in the mDNS `ci` key
//! - HAP type UUIDs with short/full form handling

pub mod category;
pub mod error;
pub mod hap_type;
pub mod status;

pub use category::Category;
pub use error::{Error, Result};
pub use hap_type::HapType;
pub use status::HapStatus;

/// The AID reserved for the primary (standalone or bridge) accessory.
pub const STANDALONE_AID: u64 = 1;

/// Default TCP port of the accessory server.
pub const DEFAULT_PORT: u16 = 51826;

/// Short protocol version advertised in the mDNS `pv` key.
pub const HAP_PROTOCOL_VERSION: &str = "1.1";
