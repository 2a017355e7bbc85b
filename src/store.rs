//! The datastore handle backing pools, reservations, and leases.
//!
//! This is the row store the rest of the crate is written against: three
//! tables behind one `RwLock`, persisted as a JSON document with an atomic
//! tmp-file-and-rename write. The constraints the schema would carry in a
//! relational engine are enforced here, inside the write lock:
//!
//! - no two active pools with intersecting ranges
//! - at most one active reservation per MAC and per IP
//! - at most one active lease per MAC and per IP
//! - an active lease may not claim an IP reserved for a different MAC
//! - lease state changes go through a compare-and-set transition
//!
//! Allocation scans elsewhere are advisory; the commit here is the
//! authority. A handle is constructed by the process entry point and passed
//! into each component; there is no global accessor.

use std::path::PathBuf;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

use crate::error::{Error, Result};
use crate::lease::{Lease, LeaseState};
use crate::pool::Pool;
use crate::reservation::Reservation;

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct Tables {
    #[serde(default)]
    next_id: i64,
    #[serde(default)]
    pools: Vec<Pool>,
    #[serde(default)]
    reservations: Vec<Reservation>,
    #[serde(default)]
    leases: Vec<Lease>,
}

impl Tables {
    fn assign_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn reconcile_next_id(&mut self) {
        let highest = self
            .pools
            .iter()
            .map(|pool| pool.id)
            .chain(self.reservations.iter().map(|reservation| reservation.id))
            .chain(self.leases.iter().map(|lease| lease.id))
            .max()
            .unwrap_or(0);
        self.next_id = self.next_id.max(highest);
    }

    fn check_pool_overlap(&self, candidate: &Pool, exclude_id: Option<i64>) -> Result<()> {
        if !candidate.active {
            return Ok(());
        }
        for existing in &self.pools {
            if Some(existing.id) == exclude_id || !existing.active {
                continue;
            }
            if candidate.overlaps(existing) {
                return Err(Error::PoolOverlap {
                    pool: candidate.name.clone(),
                    pool_range: candidate.range_display(),
                    other: existing.name.clone(),
                    other_range: existing.range_display(),
                });
            }
        }
        Ok(())
    }

    fn check_reservation_claim(&self, candidate: &Reservation) -> Result<()> {
        if !candidate.active {
            return Ok(());
        }
        for existing in &self.reservations {
            if !existing.active {
                continue;
            }
            if existing.mac == candidate.mac {
                return Err(Error::Conflict(format!(
                    "MAC {} already has an active reservation ({})",
                    candidate.mac, existing.ip
                )));
            }
            if existing.ip == candidate.ip {
                return Err(Error::Conflict(format!(
                    "IP {} is already reserved for {}",
                    candidate.ip, existing.mac
                )));
            }
        }
        for lease in &self.leases {
            if lease.state == LeaseState::Active && lease.ip == candidate.ip && lease.mac != candidate.mac
            {
                return Err(Error::Conflict(format!(
                    "IP {} has an active lease held by {}",
                    candidate.ip, lease.mac
                )));
            }
        }
        Ok(())
    }

    fn check_lease_commit(&self, candidate: &Lease) -> Result<()> {
        if candidate.ends_at <= candidate.starts_at {
            return Err(Error::Validation(format!(
                "lease for {} ends at or before it starts",
                candidate.mac
            )));
        }
        if candidate.state != LeaseState::Active {
            return Ok(());
        }
        for existing in &self.leases {
            if existing.state != LeaseState::Active {
                continue;
            }
            if existing.ip == candidate.ip {
                return Err(Error::Conflict(format!(
                    "IP {} already has an active lease (held by {})",
                    candidate.ip, existing.mac
                )));
            }
            if existing.mac == candidate.mac {
                return Err(Error::Conflict(format!(
                    "MAC {} already has an active lease ({})",
                    candidate.mac, existing.ip
                )));
            }
        }
        for reservation in &self.reservations {
            if reservation.active && reservation.ip == candidate.ip && reservation.mac != candidate.mac
            {
                return Err(Error::Conflict(format!(
                    "IP {} is reserved for {}",
                    candidate.ip, reservation.mac
                )));
            }
        }
        Ok(())
    }
}

/// A point-in-time copy of all three tables, taken under one read lock so
/// the pieces are mutually consistent.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub pools: Vec<Pool>,
    pub reservations: Vec<Reservation>,
    pub leases: Vec<Lease>,
}

/// Explicitly constructed, dependency-injected store handle.
#[derive(Debug)]
pub struct Datastore {
    tables: RwLock<Tables>,
    path: Option<PathBuf>,
    save_lock: Mutex<()>,
}

impl Datastore {
    /// Opens (or initializes) a store persisted at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let mut tables = if path.exists() {
            let content = tokio::fs::read_to_string(&path).await?;
            serde_json::from_str(&content)?
        } else {
            Tables::default()
        };
        tables.reconcile_next_id();

        Ok(Self {
            tables: RwLock::new(tables),
            path: Some(path),
            save_lock: Mutex::new(()),
        })
    }

    /// A store with no backing file; state lives only in memory.
    pub fn in_memory() -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
            path: None,
            save_lock: Mutex::new(()),
        }
    }

    async fn persist(&self, snapshot: Tables) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let _lock = self.save_lock.lock().await;
        let content = serde_json::to_string_pretty(&snapshot)?;
        let tmp_path = path.with_extension("tmp");
        tokio::fs::write(&tmp_path, content).await?;
        tokio::fs::rename(&tmp_path, path).await?;
        debug!("persisted datastore to {}", path.display());
        Ok(())
    }

    // --- pools ---

    /// Inserts a pool, enforcing the active-range no-overlap constraint.
    pub async fn insert_pool(&self, mut pool: Pool) -> Result<Pool> {
        let snapshot = {
            let mut tables = self.tables.write().await;
            tables.check_pool_overlap(&pool, None)?;
            pool.id = tables.assign_id();
            tables.pools.push(pool.clone());
            tables.clone()
        };
        self.persist(snapshot).await?;
        Ok(pool)
    }

    /// Replaces the pool row with the given id, re-checking overlap.
    pub async fn update_pool(&self, id: i64, mut pool: Pool) -> Result<Pool> {
        let snapshot = {
            let mut tables = self.tables.write().await;
            tables.check_pool_overlap(&pool, Some(id))?;
            let row = tables
                .pools
                .iter_mut()
                .find(|existing| existing.id == id)
                .ok_or_else(|| Error::NotFound(format!("pool {id}")))?;
            pool.id = id;
            *row = pool.clone();
            tables.clone()
        };
        self.persist(snapshot).await?;
        Ok(pool)
    }

    /// Deletes the pool row. Returns whether a row was removed.
    pub async fn delete_pool(&self, id: i64) -> Result<bool> {
        let (removed, snapshot) = {
            let mut tables = self.tables.write().await;
            let before = tables.pools.len();
            tables.pools.retain(|pool| pool.id != id);
            (tables.pools.len() != before, tables.clone())
        };
        if removed {
            self.persist(snapshot).await?;
        }
        Ok(removed)
    }

    pub async fn get_pool(&self, id: i64) -> Option<Pool> {
        self.tables
            .read()
            .await
            .pools
            .iter()
            .find(|pool| pool.id == id)
            .cloned()
    }

    pub async fn pools(&self) -> Vec<Pool> {
        self.tables.read().await.pools.clone()
    }

    // --- reservations ---

    /// Inserts a reservation, enforcing the claim invariant.
    pub async fn insert_reservation(&self, mut reservation: Reservation) -> Result<Reservation> {
        let snapshot = {
            let mut tables = self.tables.write().await;
            tables.check_reservation_claim(&reservation)?;
            reservation.id = tables.assign_id();
            tables.reservations.push(reservation.clone());
            tables.clone()
        };
        self.persist(snapshot).await?;
        Ok(reservation)
    }

    /// Deletes the reservation row. Returns whether a row was removed.
    pub async fn delete_reservation(&self, id: i64) -> Result<bool> {
        let (removed, snapshot) = {
            let mut tables = self.tables.write().await;
            let before = tables.reservations.len();
            tables.reservations.retain(|reservation| reservation.id != id);
            (tables.reservations.len() != before, tables.clone())
        };
        if removed {
            self.persist(snapshot).await?;
        }
        Ok(removed)
    }

    pub async fn reservations(&self) -> Vec<Reservation> {
        self.tables.read().await.reservations.clone()
    }

    // --- leases ---

    /// Commits a lease row.
    ///
    /// This is the single-writer authority behind allocation: the uniqueness
    /// checks and the insert happen under one write lock, so two racing
    /// allocators cannot both commit the same IP or MAC. The losing caller
    /// receives [`Error::Conflict`] and must re-run its scan.
    pub async fn insert_lease(&self, mut lease: Lease) -> Result<Lease> {
        let snapshot = {
            let mut tables = self.tables.write().await;
            tables.check_lease_commit(&lease)?;
            lease.id = tables.assign_id();
            tables.leases.push(lease.clone());
            tables.clone()
        };
        self.persist(snapshot).await?;
        Ok(lease)
    }

    /// Compare-and-set state transition for a lease row.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the row does not exist and
    /// [`Error::Conflict`] if its current state is not `from` (a concurrent
    /// writer got there first).
    pub async fn transition_lease(&self, id: i64, from: LeaseState, to: LeaseState) -> Result<Lease> {
        let (lease, snapshot) = {
            let mut tables = self.tables.write().await;
            let row = tables
                .leases
                .iter_mut()
                .find(|lease| lease.id == id)
                .ok_or_else(|| Error::NotFound(format!("lease {id}")))?;
            if row.state != from {
                return Err(Error::Conflict(format!(
                    "lease {id} is {} (expected {from})",
                    row.state
                )));
            }
            row.state = to;
            (row.clone(), tables.clone())
        };
        self.persist(snapshot).await?;
        Ok(lease)
    }

    /// Extends an active, unexpired lease by `duration` from `now`.
    ///
    /// The expiry check happens under the write lock so a sweep running
    /// concurrently cannot interleave between check and extension.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for a missing row, [`Error::Conflict`] if
    /// the lease is not active or its end has already passed (the caller
    /// must perform a fresh allocation instead).
    pub async fn renew_lease(
        &self,
        id: i64,
        now: DateTime<Utc>,
        duration: TimeDelta,
    ) -> Result<Lease> {
        let (lease, snapshot) = {
            let mut tables = self.tables.write().await;
            let row = tables
                .leases
                .iter_mut()
                .find(|lease| lease.id == id)
                .ok_or_else(|| Error::NotFound(format!("lease {id}")))?;
            if row.state != LeaseState::Active {
                return Err(Error::Conflict(format!("lease {id} is {}, not active", row.state)));
            }
            if row.ends_at <= now {
                return Err(Error::Conflict(format!(
                    "lease {id} expired at {}; renewal requires a fresh allocation",
                    row.ends_at
                )));
            }
            row.ends_at = now + duration;
            row.renewal_count += 1;
            row.last_renewal = Some(now);
            (row.clone(), tables.clone())
        };
        self.persist(snapshot).await?;
        Ok(lease)
    }

    pub async fn leases(&self) -> Vec<Lease> {
        self.tables.read().await.leases.clone()
    }

    /// A consistent snapshot of every table.
    ///
    /// Readers that correlate tables (configuration synthesis in
    /// particular) use this instead of per-table reads, so a concurrent
    /// edit cannot land between the pieces.
    pub async fn snapshot(&self) -> Snapshot {
        let tables = self.tables.read().await;
        Snapshot {
            pools: tables.pools.clone(),
            reservations: tables.reservations.clone(),
            leases: tables.leases.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addr::MacAddr;
    use crate::duration::LeaseTime;
    use std::net::Ipv4Addr;
    use std::sync::Arc;

    fn mac(last: u8) -> MacAddr {
        MacAddr::from([0xaa, 0xbb, 0xcc, 0xdd, 0xee, last])
    }

    fn active_lease(mac_last: u8, ip: [u8; 4]) -> Lease {
        Lease::new(
            mac(mac_last),
            Ipv4Addr::from(ip),
            Some(1),
            Utc::now(),
            TimeDelta::hours(1),
        )
    }

    fn pool(name: &str, start: [u8; 4], end: [u8; 4]) -> Pool {
        Pool {
            id: 0,
            name: name.to_string(),
            vlan: 10,
            network: "10.0.0.0/24".parse().unwrap(),
            range_start: Ipv4Addr::from(start),
            range_end: Ipv4Addr::from(end),
            gateway: Ipv4Addr::new(10, 0, 0, 1),
            dns_servers: vec![Ipv4Addr::new(9, 9, 9, 9)],
            lease_time: LeaseTime::default(),
            max_lease_time: LeaseTime::parse("7 days"),
            active: true,
            allow_unknown_clients: true,
            require_authorization: false,
        }
    }

    #[tokio::test]
    async fn test_ids_are_assigned_sequentially() {
        let store = Datastore::in_memory();
        let first = store.insert_pool(pool("a", [10, 0, 0, 10], [10, 0, 0, 20])).await.unwrap();
        let second = store.insert_pool(pool("b", [10, 0, 0, 30], [10, 0, 0, 40])).await.unwrap();
        assert_eq!(first.id, 1);
        assert_eq!(second.id, 2);
    }

    #[tokio::test]
    async fn test_active_ip_uniqueness_enforced() {
        let store = Datastore::in_memory();
        store.insert_lease(active_lease(1, [10, 0, 0, 5])).await.unwrap();

        let error = store.insert_lease(active_lease(2, [10, 0, 0, 5])).await.unwrap_err();
        assert!(matches!(error, Error::Conflict(_)));
    }

    #[tokio::test]
    async fn test_active_mac_uniqueness_enforced() {
        let store = Datastore::in_memory();
        store.insert_lease(active_lease(1, [10, 0, 0, 5])).await.unwrap();

        let error = store.insert_lease(active_lease(1, [10, 0, 0, 6])).await.unwrap_err();
        assert!(matches!(error, Error::Conflict(_)));
    }

    #[tokio::test]
    async fn test_terminal_rows_do_not_conflict() {
        let store = Datastore::in_memory();
        let mut released = active_lease(1, [10, 0, 0, 5]);
        released.state = LeaseState::Released;
        store.insert_lease(released).await.unwrap();

        store.insert_lease(active_lease(2, [10, 0, 0, 5])).await.unwrap();
    }

    #[tokio::test]
    async fn test_lease_cannot_claim_foreign_reservation() {
        let store = Datastore::in_memory();
        store
            .insert_reservation(Reservation {
                id: 0,
                mac: mac(9),
                ip: Ipv4Addr::new(10, 0, 0, 5),
                pool_id: None,
                hostname: None,
                lease_time: None,
                active: true,
            })
            .await
            .unwrap();

        assert!(store.insert_lease(active_lease(1, [10, 0, 0, 5])).await.is_err());

        // The reservation's own MAC may hold its address.
        store.insert_lease(active_lease(9, [10, 0, 0, 5])).await.unwrap();
    }

    #[tokio::test]
    async fn test_lease_end_must_follow_start() {
        let store = Datastore::in_memory();
        let mut lease = active_lease(1, [10, 0, 0, 5]);
        lease.ends_at = lease.starts_at;
        assert!(matches!(
            store.insert_lease(lease).await,
            Err(Error::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_transition_is_compare_and_set() {
        let store = Datastore::in_memory();
        let lease = store.insert_lease(active_lease(1, [10, 0, 0, 5])).await.unwrap();

        let expired = store
            .transition_lease(lease.id, LeaseState::Active, LeaseState::Expired)
            .await
            .unwrap();
        assert_eq!(expired.state, LeaseState::Expired);

        // Second transition from Active must lose: the row moved on.
        assert!(matches!(
            store
                .transition_lease(lease.id, LeaseState::Active, LeaseState::Released)
                .await,
            Err(Error::Conflict(_))
        ));
        assert!(matches!(
            store.transition_lease(999, LeaseState::Active, LeaseState::Expired).await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_renew_rejects_expired_row() {
        let store = Datastore::in_memory();
        let now = Utc::now();
        let mut lease = active_lease(1, [10, 0, 0, 5]);
        lease.starts_at = now - TimeDelta::hours(2);
        lease.ends_at = now - TimeDelta::hours(1);
        let lease = store.insert_lease(lease).await.unwrap();

        assert!(matches!(
            store.renew_lease(lease.id, now, TimeDelta::hours(1)).await,
            Err(Error::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn test_renew_extends_and_counts() {
        let store = Datastore::in_memory();
        let now = Utc::now();
        let lease = store.insert_lease(active_lease(1, [10, 0, 0, 5])).await.unwrap();

        let renewed = store.renew_lease(lease.id, now, TimeDelta::hours(4)).await.unwrap();
        assert_eq!(renewed.ends_at, now + TimeDelta::hours(4));
        assert_eq!(renewed.renewal_count, 1);
        assert_eq!(renewed.last_renewal, Some(now));
    }

    #[tokio::test]
    async fn test_persistence_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("datastore.json");

        {
            let store = Datastore::open(&path).await.unwrap();
            store.insert_pool(pool("lan", [10, 0, 0, 10], [10, 0, 0, 20])).await.unwrap();
            store.insert_lease(active_lease(1, [10, 0, 0, 10])).await.unwrap();
        }

        let reopened = Datastore::open(&path).await.unwrap();
        assert_eq!(reopened.pools().await.len(), 1);
        assert_eq!(reopened.leases().await.len(), 1);

        // Ids keep advancing past what was on disk.
        let next = reopened.insert_pool(pool("dmz", [10, 0, 0, 30], [10, 0, 0, 40])).await.unwrap();
        assert_eq!(next.id, 3);
    }

    #[tokio::test]
    async fn test_in_memory_store_shared_between_views() {
        let store = Arc::new(Datastore::in_memory());
        store.insert_lease(active_lease(1, [10, 0, 0, 5])).await.unwrap();
        assert_eq!(store.leases().await.len(), 1);
    }
}
