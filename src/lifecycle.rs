//! The lease lifecycle state machine.
//!
//! Creation, renewal, release, decline, and the periodic expiry sweep all
//! funnel through the datastore's atomic primitives, so every state change
//! is a single-writer commit. The allocation path re-runs its advisory scan
//! a bounded number of times when a commit loses a race; it never retries
//! the same address blindly and never loops indefinitely.

use serde::Serialize;
use tracing::{info, warn};

use chrono::{DateTime, Utc};

use crate::addr::MacAddr;
use crate::alloc::AllocationEngine;
use crate::duration::LeaseTime;
use crate::error::{Error, Result};
use crate::lease::{Lease, LeaseState, LeaseStore};
use crate::pool::PoolRegistry;
use crate::reservation::Reservation;

/// Re-scan attempts before a lost allocation race surfaces as a conflict.
const MAX_ALLOCATION_RETRIES: usize = 3;

/// Outcome of an address request.
#[derive(Debug, Clone)]
pub enum Assignment {
    /// A fresh dynamic lease was committed.
    Leased(Lease),
    /// The MAC has an active static reservation, which preempts dynamic
    /// allocation; no lease row is created.
    Reserved(Reservation),
}

/// Result of an expiry sweep.
///
/// A failure on an individual lease does not abort the batch; the sweep
/// continues and reports the ids it could not transition.
#[derive(Debug, Clone, Serialize)]
pub struct SweepReport {
    pub expired: usize,
    pub skipped: Vec<i64>,
}

/// Governs a lease from creation through renewal, release, decline, and
/// expiry.
#[derive(Clone)]
pub struct LeaseLifecycleManager {
    pools: PoolRegistry,
    leases: LeaseStore,
    engine: AllocationEngine,
    default_time: LeaseTime,
}

impl LeaseLifecycleManager {
    pub fn new(
        pools: PoolRegistry,
        leases: LeaseStore,
        engine: AllocationEngine,
        default_time: LeaseTime,
    ) -> Self {
        Self {
            pools,
            leases,
            engine,
            default_time,
        }
    }

    /// Assigns an address to a MAC from the given pool.
    ///
    /// An active reservation for the MAC preempts dynamic allocation and is
    /// returned as [`Assignment::Reserved`]. Otherwise the engine's scan
    /// proposes an address and the datastore commit decides; a lost race
    /// triggers a fresh scan, up to a small fixed number of attempts.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Conflict`] if the MAC already holds an active lease
    /// or every retry lost its commit race, and [`Error::PoolExhausted`]
    /// when the pool has no free address.
    pub async fn allocate(&self, mac: MacAddr, pool_id: i64) -> Result<Assignment> {
        if let Some(reservation) = self.engine.reserved_for(mac).await {
            info!("{mac} is statically reserved {}", reservation.ip);
            return Ok(Assignment::Reserved(reservation));
        }

        if let Some(existing) = self.leases.active_for_mac(mac).await {
            return Err(Error::Conflict(format!(
                "MAC {mac} already has an active lease ({})",
                existing.ip
            )));
        }

        let pool = self.pools.get(pool_id).await?;
        let mut attempt = 0;
        loop {
            attempt += 1;
            let ip = self.engine.next_free_address(pool_id).await?;
            match self.create(mac, ip, Some(pool_id), &pool.lease_time).await {
                Ok(lease) => {
                    info!("leased {} to {mac} from pool '{}'", lease.ip, pool.name);
                    return Ok(Assignment::Leased(lease));
                }
                Err(Error::Conflict(reason)) if attempt < MAX_ALLOCATION_RETRIES => {
                    warn!("allocation commit lost a race ({reason}), re-scanning");
                }
                Err(error) => return Err(error),
            }
        }
    }

    /// Commits a fresh active lease.
    ///
    /// Preconditions (no active lease for the MAC, none for the IP, the IP
    /// not reserved for another MAC) are enforced atomically by the
    /// datastore; violations surface as [`Error::Conflict`].
    pub async fn create(
        &self,
        mac: MacAddr,
        ip: std::net::Ipv4Addr,
        pool_id: Option<i64>,
        duration: &LeaseTime,
    ) -> Result<Lease> {
        let now = Utc::now();
        self.leases
            .datastore()
            .insert_lease(Lease::new(mac, ip, pool_id, now, duration.delta()))
            .await
    }

    /// Extends an active lease from now.
    ///
    /// Uses `new_duration` when given, else the owning pool's configured
    /// duration, else the appliance default. A lease whose end has already
    /// passed is not silently resurrected: renewal is rejected and the
    /// caller must perform a fresh allocation.
    pub async fn renew(&self, lease_id: i64, new_duration: Option<LeaseTime>) -> Result<Lease> {
        let lease = self
            .leases
            .get(lease_id)
            .await
            .ok_or_else(|| Error::NotFound(format!("lease {lease_id}")))?;

        let duration = match new_duration {
            Some(duration) => duration,
            None => match lease.pool_id {
                Some(pool_id) => match self.pools.get(pool_id).await {
                    Ok(pool) => pool.lease_time,
                    Err(_) => self.default_time.clone(),
                },
                None => self.default_time.clone(),
            },
        };

        let renewed = self
            .leases
            .datastore()
            .renew_lease(lease_id, Utc::now(), duration.delta())
            .await?;
        info!(
            "renewed lease {} for {} until {} (renewal #{})",
            renewed.id, renewed.mac, renewed.ends_at, renewed.renewal_count
        );
        Ok(renewed)
    }

    /// Releases the MAC's active lease, if it has one.
    ///
    /// Idempotent: a MAC with no active lease is a no-op success, because
    /// clients race and retry. Returns the released lease when one existed.
    pub async fn release(&self, mac: MacAddr) -> Result<Option<Lease>> {
        let Some(lease) = self.leases.active_for_mac(mac).await else {
            return Ok(None);
        };

        match self
            .leases
            .datastore()
            .transition_lease(lease.id, LeaseState::Active, LeaseState::Released)
            .await
        {
            Ok(released) => {
                info!("released {} from {mac}", released.ip);
                Ok(Some(released))
            }
            // A concurrent sweep or release got there first; the lease is
            // no longer active, which is what the caller asked for.
            Err(Error::Conflict(_)) | Err(Error::NotFound(_)) => Ok(None),
            Err(error) => Err(error),
        }
    }

    /// Records a declined address as a terminal lease state.
    pub async fn decline(&self, lease_id: i64) -> Result<Lease> {
        let declined = self
            .leases
            .datastore()
            .transition_lease(lease_id, LeaseState::Active, LeaseState::Declined)
            .await?;
        warn!("lease {} ({}) declined by {}", declined.id, declined.ip, declined.mac);
        Ok(declined)
    }

    /// Transitions every active lease whose end has passed to `expired`.
    ///
    /// Idempotent: a second consecutive run with no new expirations
    /// processes zero leases. Safe against concurrent allocation because
    /// each transition is a compare-and-set on the lease row.
    pub async fn sweep_expired(&self) -> Result<SweepReport> {
        self.sweep_expired_at(Utc::now()).await
    }

    pub(crate) async fn sweep_expired_at(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        let candidates = self.leases.expired_as_of(now).await;
        let mut report = SweepReport {
            expired: 0,
            skipped: Vec::new(),
        };

        for lease in candidates {
            match self
                .leases
                .datastore()
                .transition_lease(lease.id, LeaseState::Active, LeaseState::Expired)
                .await
            {
                Ok(_) => report.expired += 1,
                // Stale reference: the row moved on or vanished between the
                // query and the transition. Skip it, keep sweeping.
                Err(Error::Conflict(_)) | Err(Error::NotFound(_)) => report.skipped.push(lease.id),
                Err(error) => return Err(error),
            }
        }

        if report.expired > 0 || !report.skipped.is_empty() {
            info!(
                "expiry sweep: {} expired, {} skipped",
                report.expired,
                report.skipped.len()
            );
        }
        Ok(report)
    }
}
