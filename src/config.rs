use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::path::Path;

use crate::duration::LeaseTime;
use crate::error::{Error, Result};

/// Appliance-level settings: where state lives, where rendered daemon
/// configuration goes, and the defaults that apply when a pool does not
/// override them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Path of the JSON datastore file.
    pub datastore_file: String,
    /// Interface the DHCP daemon binds.
    pub interface: String,
    /// Where the rendered DHCP daemon configuration is written.
    pub dhcp_config_file: String,
    /// Where the rendered resolver configuration is written.
    pub dns_config_file: String,
    /// Lease persistence file handed to the daemon's memfile backend.
    pub lease_file: String,
    pub domain_name: Option<String>,
    pub default_lease_time: LeaseTime,
    pub max_lease_time: LeaseTime,
    /// Upstream resolvers for the forwarding configuration, in order.
    pub upstream_resolvers: Vec<Ipv4Addr>,
    /// Forward DNS over TLS (port 853) instead of plain UDP.
    pub dns_over_tls: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            datastore_file: "datastore.json".to_string(),
            interface: "eth0".to_string(),
            dhcp_config_file: "kea-dhcp4.conf".to_string(),
            dns_config_file: "unbound-forward.conf".to_string(),
            lease_file: "/var/lib/kea/kea-leases4.csv".to_string(),
            domain_name: None,
            default_lease_time: LeaseTime::parse("24 hours"),
            max_lease_time: LeaseTime::parse("7 days"),
            upstream_resolvers: vec![Ipv4Addr::new(1, 1, 1, 1), Ipv4Addr::new(9, 9, 9, 9)],
            dns_over_tls: false,
        }
    }
}

impl Config {
    /// Loads the settings file, creating it with defaults if absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read, parsed, or
    /// validated.
    pub fn load_or_create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Config = serde_json::from_str(&content)?;
            config.validate()?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save(path)?;
            Ok(config)
        }
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.interface.trim().is_empty() {
            return Err(Error::InvalidConfig("interface must not be empty".to_string()));
        }

        if self.default_lease_time.seconds() == 0 {
            return Err(Error::InvalidConfig(
                "default_lease_time must be greater than 0".to_string(),
            ));
        }

        if self.max_lease_time.seconds() < self.default_lease_time.seconds() {
            return Err(Error::InvalidConfig(
                "max_lease_time must not be shorter than default_lease_time".to_string(),
            ));
        }

        Ok(())
    }
}
