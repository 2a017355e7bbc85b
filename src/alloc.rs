//! Free-address computation.
//!
//! The engine derives the used set fresh on every call: active future-dated
//! leases plus active reservations inside the pool's range. Nothing is
//! cached and no free list is maintained, so the scan stays correct across
//! concurrent mutation of the lease table; the datastore's commit guard is
//! what makes the result binding. Scan order is ascending from the range
//! start, so allocation is reproducible.
//!
//! Pool sizes are bounded in practice (/24 typical, /16 at the outside), so
//! the linear scan is the whole cost model.

use std::collections::BTreeSet;
use std::net::Ipv4Addr;

use chrono::Utc;
use serde::Serialize;
use tracing::debug;

use crate::addr::MacAddr;
use crate::error::{Error, Result};
use crate::lease::LeaseStore;
use crate::pool::{Pool, PoolRegistry};
use crate::reservation::{Reservation, ReservationStore};

/// Per-pool utilization snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct PoolStats {
    pub pool_id: i64,
    pub name: String,
    pub vlan: u16,
    pub size: u64,
    pub active_leases: u64,
    pub reservations: u64,
    pub free: u64,
}

/// Finds the next free address in a pool.
#[derive(Clone)]
pub struct AllocationEngine {
    pools: PoolRegistry,
    leases: LeaseStore,
    reservations: ReservationStore,
}

impl AllocationEngine {
    pub fn new(pools: PoolRegistry, leases: LeaseStore, reservations: ReservationStore) -> Self {
        Self {
            pools,
            leases,
            reservations,
        }
    }

    /// The active reservation for a MAC, which preempts dynamic allocation.
    pub async fn reserved_for(&self, mac: MacAddr) -> Option<Reservation> {
        self.reservations.active_for_mac(mac).await
    }

    /// The first free address in the pool, scanning ascending from the
    /// range start.
    ///
    /// The result is advisory: a concurrent allocator may commit the same
    /// address first, in which case the datastore rejects the losing commit
    /// and the caller re-scans.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for an unknown pool, [`Error::Conflict`]
    /// for an inactive one, and [`Error::PoolExhausted`] when every address
    /// in the range is held — an expected outcome for a full pool, not a
    /// fault.
    pub async fn next_free_address(&self, pool_id: i64) -> Result<Ipv4Addr> {
        let pool = self.pools.get(pool_id).await?;
        if !pool.active {
            return Err(Error::Conflict(format!(
                "pool '{}' is inactive and not eligible for allocation",
                pool.name
            )));
        }

        let used = self.used_set(&pool).await;
        let (start, end) = pool.range();

        for ordinal in start..=end {
            if !used.contains(&ordinal) {
                let ip = Ipv4Addr::from(ordinal);
                debug!("pool '{}': next free address is {}", pool.name, ip);
                return Ok(ip);
            }
        }

        Err(Error::PoolExhausted { pool: pool.name })
    }

    /// Addresses in the pool's range held by an active future-dated lease
    /// or an active reservation.
    async fn used_set(&self, pool: &Pool) -> BTreeSet<u32> {
        let now = Utc::now();
        let (start, end) = pool.range();

        let mut used: BTreeSet<u32> = self
            .leases
            .holding_in_range(start, end, now)
            .await
            .into_iter()
            .map(|lease| u32::from(lease.ip))
            .collect();
        used.extend(
            self.reservations
                .active_in_range(start, end)
                .await
                .into_iter()
                .map(|reservation| u32::from(reservation.ip)),
        );
        used
    }

    /// Utilization for every configured pool.
    pub async fn stats(&self) -> Vec<PoolStats> {
        let now = Utc::now();
        let mut stats = Vec::new();

        for pool in self.pools.list().await {
            let (start, end) = pool.range();
            let active_leases = self.leases.holding_in_range(start, end, now).await.len() as u64;
            let reservations = self.reservations.active_in_range(start, end).await.len() as u64;
            let used = self.used_set(&pool).await.len() as u64;
            let size = pool.size();

            stats.push(PoolStats {
                pool_id: pool.id,
                name: pool.name.clone(),
                vlan: pool.vlan,
                size,
                active_leases,
                reservations,
                free: size.saturating_sub(used),
            });
        }

        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::duration::LeaseTime;
    use crate::lease::Lease;
    use crate::store::Datastore;
    use chrono::TimeDelta;
    use std::sync::Arc;

    fn mac(last: u8) -> MacAddr {
        MacAddr::from([0xaa, 0xbb, 0xcc, 0xdd, 0xee, last])
    }

    fn pool(start: [u8; 4], end: [u8; 4]) -> Pool {
        Pool {
            id: 0,
            name: "lan".to_string(),
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

    fn engine(store: &Arc<Datastore>) -> AllocationEngine {
        AllocationEngine::new(
            PoolRegistry::new(Arc::clone(store)),
            LeaseStore::new(Arc::clone(store)),
            ReservationStore::new(Arc::clone(store)),
        )
    }

    #[tokio::test]
    async fn test_two_address_pool_exhausts_on_third() {
        let store = Arc::new(Datastore::in_memory());
        let engine = engine(&store);
        let pool = store.insert_pool(pool([10, 0, 0, 100], [10, 0, 0, 101])).await.unwrap();
        let now = Utc::now();

        let first = engine.next_free_address(pool.id).await.unwrap();
        assert_eq!(first, Ipv4Addr::new(10, 0, 0, 100));
        store
            .insert_lease(Lease::new(mac(1), first, Some(pool.id), now, TimeDelta::hours(1)))
            .await
            .unwrap();

        let second = engine.next_free_address(pool.id).await.unwrap();
        assert_eq!(second, Ipv4Addr::new(10, 0, 0, 101));
        store
            .insert_lease(Lease::new(mac(2), second, Some(pool.id), now, TimeDelta::hours(1)))
            .await
            .unwrap();

        match engine.next_free_address(pool.id).await {
            Err(Error::PoolExhausted { pool }) => assert_eq!(pool, "lan"),
            other => panic!("expected PoolExhausted, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_reservations_count_as_used() {
        let store = Arc::new(Datastore::in_memory());
        let engine = engine(&store);
        let pool = store.insert_pool(pool([10, 0, 0, 100], [10, 0, 0, 102])).await.unwrap();

        store
            .insert_reservation(Reservation {
                id: 0,
                mac: mac(9),
                ip: Ipv4Addr::new(10, 0, 0, 100),
                pool_id: Some(pool.id),
                hostname: None,
                lease_time: None,
                active: true,
            })
            .await
            .unwrap();

        assert_eq!(
            engine.next_free_address(pool.id).await.unwrap(),
            Ipv4Addr::new(10, 0, 0, 101)
        );
    }

    #[tokio::test]
    async fn test_terminal_lease_frees_its_address() {
        let store = Arc::new(Datastore::in_memory());
        let engine = engine(&store);
        let pool = store.insert_pool(pool([10, 0, 0, 100], [10, 0, 0, 101])).await.unwrap();
        let now = Utc::now();

        let lease = store
            .insert_lease(Lease::new(
                mac(1),
                Ipv4Addr::new(10, 0, 0, 100),
                Some(pool.id),
                now,
                TimeDelta::hours(1),
            ))
            .await
            .unwrap();
        assert_eq!(
            engine.next_free_address(pool.id).await.unwrap(),
            Ipv4Addr::new(10, 0, 0, 101)
        );

        store
            .transition_lease(lease.id, crate::lease::LeaseState::Active, crate::lease::LeaseState::Released)
            .await
            .unwrap();
        assert_eq!(
            engine.next_free_address(pool.id).await.unwrap(),
            Ipv4Addr::new(10, 0, 0, 100),
            "released address is allocatable again, and scan order is ascending"
        );
    }

    #[tokio::test]
    async fn test_inactive_pool_not_eligible() {
        let store = Arc::new(Datastore::in_memory());
        let engine = engine(&store);
        let mut parked = pool([10, 0, 0, 100], [10, 0, 0, 101]);
        parked.active = false;
        let parked = store.insert_pool(parked).await.unwrap();

        assert!(matches!(
            engine.next_free_address(parked.id).await,
            Err(Error::Conflict(_))
        ));
        assert!(matches!(
            engine.next_free_address(999).await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_stats_counts() {
        let store = Arc::new(Datastore::in_memory());
        let engine = engine(&store);
        let pool = store.insert_pool(pool([10, 0, 0, 100], [10, 0, 0, 109])).await.unwrap();
        let now = Utc::now();

        store
            .insert_lease(Lease::new(
                mac(1),
                Ipv4Addr::new(10, 0, 0, 100),
                Some(pool.id),
                now,
                TimeDelta::hours(1),
            ))
            .await
            .unwrap();
        store
            .insert_reservation(Reservation {
                id: 0,
                mac: mac(9),
                ip: Ipv4Addr::new(10, 0, 0, 105),
                pool_id: Some(pool.id),
                hostname: None,
                lease_time: None,
                active: true,
            })
            .await
            .unwrap();

        let stats = engine.stats().await;
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].size, 10);
        assert_eq!(stats[0].active_leases, 1);
        assert_eq!(stats[0].reservations, 1);
        assert_eq!(stats[0].free, 8);
    }
}
