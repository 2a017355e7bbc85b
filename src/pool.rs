//! Address pools and the pool registry.
//!
//! A pool is a VLAN-scoped contiguous IPv4 range with allocation policy
//! metadata. The registry's core invariant: no two active pools' inclusive
//! `[start, end]` ranges may intersect. The check runs on every add and
//! update, and again as a whole-set consistency pass before configuration
//! synthesis, so an invalid pool set can never be persisted even transiently.

use std::net::Ipv4Addr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::addr::{self, Cidr};
use crate::duration::LeaseTime;
use crate::error::{Error, Result};
use crate::store::Datastore;

fn default_true() -> bool {
    true
}

/// A VLAN-scoped contiguous address range with allocation policy metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pool {
    /// Row id assigned by the datastore; 0 until stored.
    #[serde(default)]
    pub id: i64,
    pub name: String,
    /// VLAN tag, 1..=4094.
    pub vlan: u16,
    pub network: Cidr,
    /// First address of the inclusive allocation range.
    pub range_start: Ipv4Addr,
    /// Last address of the inclusive allocation range.
    pub range_end: Ipv4Addr,
    pub gateway: Ipv4Addr,
    /// Resolver addresses handed to clients, in priority order.
    pub dns_servers: Vec<Ipv4Addr>,
    pub lease_time: LeaseTime,
    pub max_lease_time: LeaseTime,
    /// Inactive pools are retained for audit but excluded from allocation
    /// and synthesis.
    #[serde(default = "default_true")]
    pub active: bool,
    #[serde(default = "default_true")]
    pub allow_unknown_clients: bool,
    #[serde(default)]
    pub require_authorization: bool,
}

impl Pool {
    /// Range bounds as ordinals.
    pub fn range(&self) -> (u32, u32) {
        (u32::from(self.range_start), u32::from(self.range_end))
    }

    /// Number of addresses in the range.
    pub fn size(&self) -> u64 {
        let (start, end) = self.range();
        addr::range_size(start, end)
    }

    /// Whether the address falls inside the allocation range.
    pub fn contains(&self, ip: Ipv4Addr) -> bool {
        let (start, end) = self.range();
        addr::in_range(u32::from(ip), start, end)
    }

    /// Whether two pools' inclusive ranges intersect.
    pub fn overlaps(&self, other: &Pool) -> bool {
        let (start_a, end_a) = self.range();
        let (start_b, end_b) = other.range();
        !(end_a < start_b || end_b < start_a)
    }

    /// The range in `start-end` display form, used in diagnostics.
    pub fn range_display(&self) -> String {
        format!("{}-{}", self.range_start, self.range_end)
    }

    /// Validates the pool's own field invariants.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] for an empty name, an out-of-range
    /// VLAN tag, an inverted range, or range bounds outside the network.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::InvalidConfig("pool name must not be empty".to_string()));
        }

        if self.vlan == 0 || self.vlan > 4094 {
            return Err(Error::InvalidConfig(format!(
                "pool '{}': VLAN tag {} is outside 1..=4094",
                self.name, self.vlan
            )));
        }

        let (start, end) = self.range();
        if start > end {
            return Err(Error::InvalidConfig(format!(
                "pool '{}': range start {} is after range end {}",
                self.name, self.range_start, self.range_end
            )));
        }

        if !self.network.contains(self.range_start) || !self.network.contains(self.range_end) {
            return Err(Error::InvalidConfig(format!(
                "pool '{}': range {} is not contained in network {}",
                self.name,
                self.range_display(),
                self.network
            )));
        }

        Ok(())
    }
}

/// Pairwise overlap check over a pool snapshot.
///
/// # Errors
///
/// Returns [`Error::PoolOverlap`] naming the first conflicting pair.
pub fn ensure_no_overlap(pools: &[Pool]) -> Result<()> {
    for (index, pool) in pools.iter().enumerate() {
        for other in &pools[index + 1..] {
            if pool.overlaps(other) {
                return Err(Error::PoolOverlap {
                    pool: pool.name.clone(),
                    pool_range: pool.range_display(),
                    other: other.name.clone(),
                    other_range: other.range_display(),
                });
            }
        }
    }
    Ok(())
}

/// Owns the configured pool set and its no-overlap invariant.
///
/// Validation runs here before any write reaches the datastore; the store
/// re-checks overlap under its write lock so concurrent adds cannot slip
/// past each other.
#[derive(Clone)]
pub struct PoolRegistry {
    store: Arc<Datastore>,
}

impl PoolRegistry {
    pub fn new(store: Arc<Datastore>) -> Self {
        Self { store }
    }

    /// Adds a pool after validating its fields.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] on bad fields and
    /// [`Error::PoolOverlap`] if the range intersects an existing active
    /// pool's range.
    pub async fn add(&self, pool: Pool) -> Result<Pool> {
        pool.validate()?;
        let pool = self.store.insert_pool(pool).await?;
        info!(
            "added pool '{}' (id {}, vlan {}, range {})",
            pool.name,
            pool.id,
            pool.vlan,
            pool.range_display()
        );
        Ok(pool)
    }

    /// Replaces the pool with the given id.
    ///
    /// Runs the same field validation and overlap check as [`add`](Self::add);
    /// activating a pool whose range now collides is rejected.
    pub async fn update(&self, id: i64, pool: Pool) -> Result<Pool> {
        pool.validate()?;
        let pool = self.store.update_pool(id, pool).await?;
        info!("updated pool '{}' (id {})", pool.name, pool.id);
        Ok(pool)
    }

    /// Deletes the pool row entirely.
    ///
    /// Deactivation (update with `active = false`) is the usual operator
    /// path; historical leases referencing the pool are retained either way.
    pub async fn remove(&self, id: i64) -> Result<()> {
        if !self.store.delete_pool(id).await? {
            return Err(Error::NotFound(format!("pool {id}")));
        }
        info!("removed pool {id}");
        Ok(())
    }

    /// The pool with the given id.
    pub async fn get(&self, id: i64) -> Result<Pool> {
        self.store
            .get_pool(id)
            .await
            .ok_or_else(|| Error::NotFound(format!("pool {id}")))
    }

    /// All pools, active or not.
    pub async fn list(&self) -> Vec<Pool> {
        self.store.pools().await
    }

    /// Active pools only, the allocation-eligible set.
    pub async fn list_active(&self) -> Vec<Pool> {
        self.store
            .pools()
            .await
            .into_iter()
            .filter(|pool| pool.active)
            .collect()
    }

    /// Whole-set overlap check over the current active pools.
    ///
    /// Defense against concurrent edits: synthesis runs the same check over
    /// its own snapshot before rendering, so a bad pair produced by racing
    /// updates is caught even though each individual write was checked.
    pub async fn check_consistency(&self) -> Result<()> {
        ensure_no_overlap(&self.list_active().await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_pool(name: &str, start: [u8; 4], end: [u8; 4]) -> Pool {
        Pool {
            id: 0,
            name: name.to_string(),
            vlan: 10,
            network: "192.168.1.0/24".parse().unwrap(),
            range_start: Ipv4Addr::from(start),
            range_end: Ipv4Addr::from(end),
            gateway: Ipv4Addr::new(192, 168, 1, 1),
            dns_servers: vec![Ipv4Addr::new(8, 8, 8, 8)],
            lease_time: LeaseTime::parse("24 hours"),
            max_lease_time: LeaseTime::parse("7 days"),
            active: true,
            allow_unknown_clients: true,
            require_authorization: false,
        }
    }

    #[test]
    fn test_validate_vlan_bounds() {
        let mut pool = test_pool("lan", [192, 168, 1, 100], [192, 168, 1, 200]);
        assert!(pool.validate().is_ok());

        pool.vlan = 0;
        assert!(pool.validate().is_err());
        pool.vlan = 4095;
        assert!(pool.validate().is_err());
        pool.vlan = 4094;
        assert!(pool.validate().is_ok());
    }

    #[test]
    fn test_validate_range_inside_network() {
        let mut pool = test_pool("lan", [192, 168, 1, 200], [192, 168, 1, 100]);
        assert!(pool.validate().is_err(), "inverted range must fail");

        pool = test_pool("lan", [192, 168, 1, 100], [192, 168, 1, 200]);
        pool.range_end = Ipv4Addr::new(192, 168, 2, 10);
        assert!(pool.validate().is_err(), "range outside network must fail");
    }

    #[test]
    fn test_overlap_predicate() {
        let a = test_pool("a", [192, 168, 1, 100], [192, 168, 1, 200]);
        let b = test_pool("b", [192, 168, 1, 50], [192, 168, 1, 150]);
        let c = test_pool("c", [192, 168, 1, 201], [192, 168, 1, 220]);

        assert!(a.overlaps(&b));
        assert!(b.overlaps(&a));
        assert!(!a.overlaps(&c));

        // Single shared address still counts.
        let d = test_pool("d", [192, 168, 1, 200], [192, 168, 1, 210]);
        assert!(a.overlaps(&d));
    }

    #[tokio::test]
    async fn test_add_rejects_overlapping_range() {
        let store = Arc::new(Datastore::in_memory());
        let registry = PoolRegistry::new(store);

        registry
            .add(test_pool("existing", [192, 168, 1, 100], [192, 168, 1, 200]))
            .await
            .unwrap();

        let error = registry
            .add(test_pool("new", [192, 168, 1, 50], [192, 168, 1, 150]))
            .await
            .unwrap_err();
        match error {
            Error::PoolOverlap { pool, other, .. } => {
                assert_eq!(pool, "new");
                assert_eq!(other, "existing");
            }
            other => panic!("expected PoolOverlap, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_inactive_pool_does_not_block() {
        let store = Arc::new(Datastore::in_memory());
        let registry = PoolRegistry::new(store);

        let mut inactive = test_pool("old", [192, 168, 1, 100], [192, 168, 1, 200]);
        inactive.active = false;
        registry.add(inactive).await.unwrap();

        registry
            .add(test_pool("new", [192, 168, 1, 150], [192, 168, 1, 250]))
            .await
            .unwrap();
        assert_eq!(registry.list_active().await.len(), 1);
        assert_eq!(registry.list().await.len(), 2);
    }

    #[tokio::test]
    async fn test_update_reactivation_checks_overlap() {
        let store = Arc::new(Datastore::in_memory());
        let registry = PoolRegistry::new(store);

        let mut parked = test_pool("parked", [192, 168, 1, 100], [192, 168, 1, 200]);
        parked.active = false;
        let parked = registry.add(parked).await.unwrap();

        registry
            .add(test_pool("live", [192, 168, 1, 150], [192, 168, 1, 250]))
            .await
            .unwrap();

        let mut reactivated = registry.get(parked.id).await.unwrap();
        reactivated.active = true;
        assert!(matches!(
            registry.update(parked.id, reactivated).await,
            Err(Error::PoolOverlap { .. })
        ));
    }

    #[test]
    fn test_ensure_no_overlap_names_the_pair() {
        let a = test_pool("a", [192, 168, 1, 100], [192, 168, 1, 200]);
        let b = test_pool("b", [192, 168, 1, 201], [192, 168, 1, 220]);
        assert!(ensure_no_overlap(&[a.clone(), b.clone()]).is_ok());

        let c = test_pool("c", [192, 168, 1, 150], [192, 168, 1, 210]);
        match ensure_no_overlap(&[a, b, c]) {
            Err(Error::PoolOverlap { pool, other, .. }) => {
                assert_eq!(pool, "a");
                assert_eq!(other, "c");
            }
            other => panic!("expected PoolOverlap, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_check_consistency_on_live_set() {
        let store = Arc::new(Datastore::in_memory());
        let registry = PoolRegistry::new(store);
        registry
            .add(test_pool("a", [192, 168, 1, 100], [192, 168, 1, 200]))
            .await
            .unwrap();
        registry
            .add(test_pool("b", [192, 168, 1, 201], [192, 168, 1, 220]))
            .await
            .unwrap();
        assert!(registry.check_consistency().await.is_ok());
    }

    #[tokio::test]
    async fn test_remove_missing_pool() {
        let store = Arc::new(Datastore::in_memory());
        let registry = PoolRegistry::new(store);
        assert!(matches!(registry.remove(42).await, Err(Error::NotFound(_))));
    }
}
