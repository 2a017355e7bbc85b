//! Lease rows and the lease-table access patterns.
//!
//! A lease is a time-bounded dynamic MAC-to-IP binding with an explicit
//! lifecycle state. Rows are never deleted by the lifecycle: terminal states
//! (`released`, `expired`, `declined`) are retained for audit, and address
//! freedom is derived from the absence of an active, future-dated row rather
//! than tracked in a separate free ledger.
//!
//! [`LeaseStore`] defines the query patterns (by MAC, by pool, by state, by
//! expiry) over the datastore; the atomic commit and transition primitives
//! live on [`Datastore`] itself, which enforces the per-IP and per-MAC
//! single-active-row invariants under its write lock.

use std::net::Ipv4Addr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::addr::MacAddr;
use crate::store::Datastore;

/// Lifecycle state of a lease.
///
/// `Active` is the only non-terminal state. A MAC needing a new address
/// after release, decline, or expiry starts a fresh lease row rather than
/// resurrecting an old one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LeaseState {
    Active,
    Released,
    Expired,
    Declined,
}

impl std::fmt::Display for LeaseState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            LeaseState::Active => "active",
            LeaseState::Released => "released",
            LeaseState::Expired => "expired",
            LeaseState::Declined => "declined",
        };
        f.write_str(text)
    }
}

/// A time-bounded dynamic MAC-to-IP binding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lease {
    /// Row id assigned by the datastore; 0 until stored.
    #[serde(default)]
    pub id: i64,
    pub mac: MacAddr,
    pub ip: Ipv4Addr,
    /// Owning pool; `None` for leases materialized from a static reservation.
    pub pool_id: Option<i64>,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    #[serde(default)]
    pub renewal_count: u32,
    pub last_renewal: Option<DateTime<Utc>>,
    pub state: LeaseState,
}

impl Lease {
    /// A fresh active lease starting at `now` and running for `duration`.
    pub fn new(
        mac: MacAddr,
        ip: Ipv4Addr,
        pool_id: Option<i64>,
        now: DateTime<Utc>,
        duration: chrono::TimeDelta,
    ) -> Self {
        Self {
            id: 0,
            mac,
            ip,
            pool_id,
            starts_at: now,
            ends_at: now + duration,
            renewal_count: 0,
            last_renewal: None,
            state: LeaseState::Active,
        }
    }

    /// Whether the lease end has passed as of `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.ends_at <= now
    }

    /// An active row whose end is still in the future: the only kind that
    /// holds its address.
    pub fn holds_address_at(&self, now: DateTime<Utc>) -> bool {
        self.state == LeaseState::Active && !self.is_expired_at(now)
    }

    /// Seconds remaining until expiration, or 0 if already past.
    pub fn remaining_seconds(&self, now: DateTime<Utc>) -> i64 {
        (self.ends_at - now).num_seconds().max(0)
    }
}

/// Query patterns over the lease table.
#[derive(Clone)]
pub struct LeaseStore {
    store: Arc<Datastore>,
}

impl LeaseStore {
    pub fn new(store: Arc<Datastore>) -> Self {
        Self { store }
    }

    /// The underlying datastore handle, for commit primitives.
    pub fn datastore(&self) -> &Arc<Datastore> {
        &self.store
    }

    /// All lease rows, every state.
    pub async fn list(&self) -> Vec<Lease> {
        self.store.leases().await
    }

    /// The lease with the given id.
    pub async fn get(&self, id: i64) -> Option<Lease> {
        self.store
            .leases()
            .await
            .into_iter()
            .find(|lease| lease.id == id)
    }

    /// Leases in the given state.
    pub async fn in_state(&self, state: LeaseState) -> Vec<Lease> {
        self.store
            .leases()
            .await
            .into_iter()
            .filter(|lease| lease.state == state)
            .collect()
    }

    /// The active lease for a MAC, if any.
    ///
    /// The store's commit guard keeps this unique, so the first match is the
    /// only match.
    pub async fn active_for_mac(&self, mac: MacAddr) -> Option<Lease> {
        self.store
            .leases()
            .await
            .into_iter()
            .find(|lease| lease.state == LeaseState::Active && lease.mac == mac)
    }

    /// The active lease for an IP, if any.
    pub async fn active_for_ip(&self, ip: Ipv4Addr) -> Option<Lease> {
        self.store
            .leases()
            .await
            .into_iter()
            .find(|lease| lease.state == LeaseState::Active && lease.ip == ip)
    }

    /// Lease rows referencing the pool, every state.
    pub async fn for_pool(&self, pool_id: i64) -> Vec<Lease> {
        self.store
            .leases()
            .await
            .into_iter()
            .filter(|lease| lease.pool_id == Some(pool_id))
            .collect()
    }

    /// Active, future-dated leases whose IP falls inside the inclusive
    /// ordinal range. This is the lease half of every used-set computation.
    pub async fn holding_in_range(&self, start: u32, end: u32, now: DateTime<Utc>) -> Vec<Lease> {
        self.store
            .leases()
            .await
            .into_iter()
            .filter(|lease| {
                let ordinal = u32::from(lease.ip);
                lease.holds_address_at(now) && ordinal >= start && ordinal <= end
            })
            .collect()
    }

    /// Active leases whose end has passed as of `now`: the sweep candidates.
    pub async fn expired_as_of(&self, now: DateTime<Utc>) -> Vec<Lease> {
        self.store
            .leases()
            .await
            .into_iter()
            .filter(|lease| lease.state == LeaseState::Active && lease.is_expired_at(now))
            .collect()
    }
}
