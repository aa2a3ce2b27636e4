//! mDNS advertisement of the `_hap._tcp` service.
//!
//! The TXT record carries the configuration version (`c#`), status flags
//! (`sf`, bit 0 set while unpaired), the device id and category, and the
//! setup hash. Topology changes bump `c#` and re-announce so controllers
//! re-fetch `/accessories`.

use std::collections::HashMap;
use std::net::IpAddr;

use hap_core::error::{AdvertiseError, Result};
use hap_core::{Category, HAP_PROTOCOL_VERSION};
use mdns_sd::{ServiceDaemon, ServiceInfo};
use tracing::{debug, info};

use crate::setup;

const HAP_SERVICE_TYPE: &str = "_hap._tcp.local.";

/// Everything that goes into one announcement.
#[derive(Debug, Clone)]
pub struct AdvertisedInfo {
    pub display_name: String,
    pub mac: String,
    pub port: u16,
    pub category: Category,
    pub config_version: u32,
    pub paired: bool,
    pub setup_id: String,
    pub addresses: Vec<IpAddr>,
}

impl AdvertisedInfo {
    /// TXT key/value map for this announcement.
    pub fn txt_records(&self) -> HashMap<String, String> {
        let mut txt = HashMap::new();
        txt.insert("md".to_string(), valid_name(&self.display_name));
        txt.insert("pv".to_string(), HAP_PROTOCOL_VERSION.to_string());
        txt.insert("id".to_string(), self.mac.clone());
        txt.insert("c#".to_string(), self.config_version.to_string());
        txt.insert("s#".to_string(), "1".to_string());
        txt.insert("ff".to_string(), "0".to_string());
        txt.insert("ci".to_string(), self.category.id().to_string());
        txt.insert(
            "sf".to_string(),
            if self.paired { "0" } else { "1" }.to_string(),
        );
        txt.insert(
            "sh".to_string(),
            setup::setup_hash(&self.setup_id, &self.mac),
        );
        txt
    }

    fn instance_name(&self) -> String {
        let short_mac: String = self
            .mac
            .chars()
            .filter(|c| c.is_ascii_hexdigit())
            .skip(6)
            .collect();
        format!("{} {}.{}", valid_name(&self.display_name), short_mac, HAP_SERVICE_TYPE)
    }

    fn host_name(&self) -> String {
        let short_mac: String = self
            .mac
            .chars()
            .filter(|c| c.is_ascii_hexdigit())
            .skip(6)
            .collect();
        format!("{}-{}.local.", valid_host_name(&self.display_name), short_mac)
    }
}

/// Replace characters mDNS names cannot carry and trim stray separators.
fn valid_name(name: &str) -> String {
    let replaced: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' {
                c
            } else {
                ' '
            }
        })
        .collect();
    let collapsed = replaced.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed.trim_matches(|c| c == ' ' || c == '-').to_string()
}

fn valid_host_name(name: &str) -> String {
    valid_name(name).replace(' ', "-")
}

/// Owns the mDNS daemon and the currently registered announcement.
pub struct Advertiser {
    daemon: ServiceDaemon,
    registered_fullname: Option<String>,
}

impl Advertiser {
    pub fn new() -> Result<Self> {
        let daemon = ServiceDaemon::new()
            .map_err(|e| AdvertiseError::Daemon(format!("failed to create mDNS daemon: {e}")))?;
        Ok(Self {
            daemon,
            registered_fullname: None,
        })
    }

    /// Announce (or re-announce) the service.
    pub fn register(&mut self, info: &AdvertisedInfo) -> Result<()> {
        if let Some(fullname) = self.registered_fullname.take() {
            debug!("unregistering previous announcement {fullname}");
            let _ = self.daemon.unregister(&fullname);
        }

        let instance_name = info.instance_name();
        let service_info = ServiceInfo::new(
            HAP_SERVICE_TYPE,
            instance_name.trim_end_matches(&format!(".{HAP_SERVICE_TYPE}")),
            &info.host_name(),
            &info.addresses[..],
            info.port,
            info.txt_records(),
        )
        .map_err(|e| AdvertiseError::Registration(format!("bad service info: {e}")))?;

        let service_info = if info.addresses.is_empty() {
            service_info.enable_addr_auto()
        } else {
            service_info
        };

        let fullname = service_info.get_fullname().to_string();
        self.daemon
            .register(service_info)
            .map_err(|e| AdvertiseError::Registration(format!("register failed: {e}")))?;
        info!(
            "advertising {} on port {} (c#={}, sf={})",
            fullname,
            info.port,
            info.config_version,
            if info.paired { 0 } else { 1 }
        );
        self.registered_fullname = Some(fullname);
        Ok(())
    }

    /// Withdraw the announcement and stop the daemon.
    pub fn shutdown(mut self) {
        if let Some(fullname) = self.registered_fullname.take() {
            let _ = self.daemon.unregister(&fullname);
        }
        let _ = self.daemon.shutdown();
    }
}
