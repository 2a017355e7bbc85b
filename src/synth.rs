//! Synthesis of downstream daemon configuration.
//!
//! Renders the active pool/reservation state into the declarative documents
//! the external daemons consume: a Kea-style `Dhcp4` JSON document for the
//! DHCP daemon and an Unbound-style forward-zone file for the resolver.
//!
//! Both renders are deterministic: identical state produces byte-identical
//! output, because the documents are diffed and versioned externally. Pools
//! are ordered by range start and reservations by IP before serialization,
//! and every struct serializes with a fixed field order.
//!
//! Rendering validates first and fails whole: overlapping active pools,
//! out-of-range reservations, or duplicate reservations abort the call with
//! a validation error before a single byte is produced. The registry and
//! store should have prevented all of these; this is the last line of
//! defense against concurrent edits and hand-modified state files.

use std::collections::HashSet;
use std::sync::Arc;

use serde::Serialize;
use tracing::info;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::pool::Pool;
use crate::reservation::Reservation;
use crate::store::Datastore;

/// Fixed reclamation timers handed to the daemon, in seconds.
const RECLAIM_TIMER_WAIT: u32 = 10;
const FLUSH_RECLAIMED_TIMER_WAIT: u32 = 25;
const HOLD_RECLAIMED_TIME: u32 = 3_600;
const MAX_RECLAIM_LEASES: u32 = 100;
const MAX_RECLAIM_TIME: u32 = 250;

#[derive(Serialize)]
struct KeaDocument {
    #[serde(rename = "Dhcp4")]
    dhcp4: Dhcp4,
}

#[derive(Serialize)]
#[serde(rename_all = "kebab-case")]
struct Dhcp4 {
    interfaces_config: InterfacesConfig,
    lease_database: LeaseDatabase,
    expired_leases_processing: ExpiredLeasesProcessing,
    valid_lifetime: u32,
    max_valid_lifetime: u32,
    subnet4: Vec<Subnet4>,
    loggers: Vec<Logger>,
}

#[derive(Serialize)]
struct InterfacesConfig {
    interfaces: Vec<String>,
}

#[derive(Serialize)]
struct LeaseDatabase {
    #[serde(rename = "type")]
    backend: &'static str,
    persist: bool,
    name: String,
}

#[derive(Serialize)]
#[serde(rename_all = "kebab-case")]
struct ExpiredLeasesProcessing {
    reclaim_timer_wait_time: u32,
    flush_reclaimed_timer_wait_time: u32,
    hold_reclaimed_time: u32,
    max_reclaim_leases: u32,
    max_reclaim_time: u32,
}

#[derive(Serialize)]
#[serde(rename_all = "kebab-case")]
struct Subnet4 {
    id: i64,
    subnet: String,
    pools: Vec<PoolEntry>,
    valid_lifetime: u32,
    max_valid_lifetime: u32,
    option_data: Vec<OptionData>,
    reservations: Vec<KeaReservation>,
}

#[derive(Serialize)]
#[serde(rename_all = "kebab-case")]
struct PoolEntry {
    pool: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    client_class: Option<&'static str>,
}

#[derive(Serialize)]
struct OptionData {
    name: &'static str,
    data: String,
}

#[derive(Serialize)]
#[serde(rename_all = "kebab-case")]
struct KeaReservation {
    hw_address: String,
    ip_address: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    hostname: Option<String>,
}

#[derive(Serialize)]
struct Logger {
    name: &'static str,
    output_options: Vec<LoggerOutput>,
    severity: &'static str,
}

#[derive(Serialize)]
struct LoggerOutput {
    output: &'static str,
}

/// Renders pool/reservation state into daemon configuration documents.
#[derive(Clone)]
pub struct ConfigSynthesizer {
    config: Arc<Config>,
    store: Arc<Datastore>,
}

impl ConfigSynthesizer {
    pub fn new(config: Arc<Config>, store: Arc<Datastore>) -> Self {
        Self { config, store }
    }

    /// Renders the DHCP daemon configuration document.
    ///
    /// Reads one consistent snapshot of the pool and reservation tables, so
    /// a concurrent edit cannot land between the pieces being rendered.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] if any two active pools overlap, a
    /// reservation's IP falls outside its declared pool's range, or two
    /// active reservations collide on IP or MAC. No partial output is
    /// emitted on failure.
    pub async fn render_dhcp(&self) -> Result<String> {
        let snapshot = self.store.snapshot().await;
        let mut pools: Vec<Pool> = snapshot.pools.into_iter().filter(|pool| pool.active).collect();
        pools.sort_by_key(|pool| pool.range());
        let reservations: Vec<Reservation> = snapshot
            .reservations
            .into_iter()
            .filter(|reservation| reservation.active)
            .collect();

        self.validate(&pools, &reservations)?;

        let subnets = pools
            .iter()
            .map(|pool| self.subnet_entry(pool, &reservations))
            .collect();

        let document = KeaDocument {
            dhcp4: Dhcp4 {
                interfaces_config: InterfacesConfig {
                    interfaces: vec![self.config.interface.clone()],
                },
                lease_database: LeaseDatabase {
                    backend: "memfile",
                    persist: true,
                    name: self.config.lease_file.clone(),
                },
                expired_leases_processing: ExpiredLeasesProcessing {
                    reclaim_timer_wait_time: RECLAIM_TIMER_WAIT,
                    flush_reclaimed_timer_wait_time: FLUSH_RECLAIMED_TIMER_WAIT,
                    hold_reclaimed_time: HOLD_RECLAIMED_TIME,
                    max_reclaim_leases: MAX_RECLAIM_LEASES,
                    max_reclaim_time: MAX_RECLAIM_TIME,
                },
                valid_lifetime: self.config.default_lease_time.seconds(),
                max_valid_lifetime: self.config.max_lease_time.seconds(),
                subnet4: subnets,
                loggers: vec![Logger {
                    name: "kea-dhcp4",
                    output_options: vec![LoggerOutput { output: "syslog" }],
                    severity: "INFO",
                }],
            },
        };

        let mut rendered = serde_json::to_string_pretty(&document)?;
        rendered.push('\n');
        info!("rendered DHCP configuration ({} subnets)", pools.len());
        Ok(rendered)
    }

    /// Renders the resolver forwarding configuration.
    ///
    /// Emits one forward-zone for the root with the configured upstreams in
    /// order, over TLS when enabled. With no upstreams configured, no
    /// forward-zone is emitted and the resolver recurses on its own.
    pub async fn render_dns(&self) -> Result<String> {
        let mut lines = vec![
            "# Forwarding configuration synthesized from appliance state.".to_string(),
            "# Do not edit; changes are overwritten on apply.".to_string(),
        ];

        if !self.config.upstream_resolvers.is_empty() {
            lines.push("forward-zone:".to_string());
            lines.push("    name: \".\"".to_string());
            if self.config.dns_over_tls {
                lines.push("    forward-tls-upstream: yes".to_string());
            }
            for upstream in &self.config.upstream_resolvers {
                if self.config.dns_over_tls {
                    lines.push(format!("    forward-addr: {upstream}@853"));
                } else {
                    lines.push(format!("    forward-addr: {upstream}"));
                }
            }
        }

        let mut rendered = lines.join("\n");
        rendered.push('\n');
        Ok(rendered)
    }

    /// Last-line-of-defense consistency check over the exact snapshot being
    /// rendered.
    fn validate(&self, pools: &[Pool], reservations: &[Reservation]) -> Result<()> {
        crate::pool::ensure_no_overlap(pools)
            .map_err(|error| Error::Validation(error.to_string()))?;

        let mut seen_ips = HashSet::new();
        let mut seen_macs = HashSet::new();
        for reservation in reservations {
            if !seen_ips.insert(reservation.ip) {
                return Err(Error::Validation(format!(
                    "duplicate reservation for IP {}",
                    reservation.ip
                )));
            }
            if !seen_macs.insert(reservation.mac) {
                return Err(Error::Validation(format!(
                    "duplicate reservation for MAC {}",
                    reservation.mac
                )));
            }

            if let Some(pool_id) = reservation.pool_id
                && let Some(pool) = pools.iter().find(|pool| pool.id == pool_id)
                && !pool.contains(reservation.ip)
            {
                return Err(Error::Validation(format!(
                    "reservation {} ({}) is outside pool '{}' range {}",
                    reservation.mac,
                    reservation.ip,
                    pool.name,
                    pool.range_display()
                )));
            }
        }

        Ok(())
    }

    fn subnet_entry(&self, pool: &Pool, reservations: &[Reservation]) -> Subnet4 {
        let mut scoped: Vec<&Reservation> = reservations
            .iter()
            .filter(|reservation| match reservation.pool_id {
                Some(pool_id) => pool_id == pool.id,
                None => pool.contains(reservation.ip),
            })
            .collect();
        scoped.sort_by_key(|reservation| u32::from(reservation.ip));

        let mut option_data = vec![
            OptionData {
                name: "routers",
                data: pool.gateway.to_string(),
            },
            OptionData {
                name: "domain-name-servers",
                data: pool
                    .dns_servers
                    .iter()
                    .map(|server| server.to_string())
                    .collect::<Vec<_>>()
                    .join(", "),
            },
        ];
        if let Some(domain) = &self.config.domain_name {
            option_data.push(OptionData {
                name: "domain-name",
                data: domain.clone(),
            });
        }

        Subnet4 {
            id: pool.id,
            subnet: pool.network.to_string(),
            pools: vec![PoolEntry {
                pool: format!("{} - {}", pool.range_start, pool.range_end),
                client_class: if pool.allow_unknown_clients {
                    None
                } else {
                    Some("KNOWN")
                },
            }],
            valid_lifetime: pool.lease_time.seconds(),
            max_valid_lifetime: pool.max_lease_time.seconds(),
            option_data,
            reservations: scoped
                .into_iter()
                .map(|reservation| KeaReservation {
                    hw_address: reservation.mac.to_string(),
                    ip_address: reservation.ip.to_string(),
                    hostname: reservation.hostname.clone(),
                })
                .collect(),
        }
    }
}
