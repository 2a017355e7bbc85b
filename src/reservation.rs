//! Static MAC-to-IP reservations.
//!
//! A reservation pre-allocates an address outside the dynamic lease flow:
//! while active it preempts allocation for its MAC and its IP counts as used
//! in every free-address computation. The datastore enforces the claim
//! invariant (no other active reservation or foreign active lease on the
//! same IP, one active reservation per MAC) at commit time.

use std::net::Ipv4Addr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::addr::MacAddr;
use crate::duration::LeaseTime;
use crate::error::{Error, Result};
use crate::store::Datastore;

fn default_true() -> bool {
    true
}

/// A static MAC-to-IP binding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reservation {
    /// Row id assigned by the datastore; 0 until stored.
    #[serde(default)]
    pub id: i64,
    pub mac: MacAddr,
    pub ip: Ipv4Addr,
    /// Owning pool, when the reservation lives inside a managed range.
    pub pool_id: Option<i64>,
    pub hostname: Option<String>,
    /// Per-reservation override of the pool's lease duration.
    pub lease_time: Option<LeaseTime>,
    #[serde(default = "default_true")]
    pub active: bool,
}

/// Access patterns over the reservation table.
#[derive(Clone)]
pub struct ReservationStore {
    store: Arc<Datastore>,
}

impl ReservationStore {
    pub fn new(store: Arc<Datastore>) -> Self {
        Self { store }
    }

    /// Adds a reservation.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Conflict`] if the MAC already has an active
    /// reservation, or the IP is claimed by another active reservation or an
    /// active lease held by a different MAC.
    pub async fn add(&self, reservation: Reservation) -> Result<Reservation> {
        let reservation = self.store.insert_reservation(reservation).await?;
        info!(
            "added reservation {} -> {} (id {})",
            reservation.mac, reservation.ip, reservation.id
        );
        Ok(reservation)
    }

    /// Deletes the reservation row.
    pub async fn remove(&self, id: i64) -> Result<()> {
        if !self.store.delete_reservation(id).await? {
            return Err(Error::NotFound(format!("reservation {id}")));
        }
        info!("removed reservation {id}");
        Ok(())
    }

    /// All reservations, active or not.
    pub async fn list(&self) -> Vec<Reservation> {
        self.store.reservations().await
    }

    /// Active reservations only.
    pub async fn list_active(&self) -> Vec<Reservation> {
        self.store
            .reservations()
            .await
            .into_iter()
            .filter(|reservation| reservation.active)
            .collect()
    }

    /// The active reservation for a MAC, if any.
    pub async fn active_for_mac(&self, mac: MacAddr) -> Option<Reservation> {
        self.list_active()
            .await
            .into_iter()
            .find(|reservation| reservation.mac == mac)
    }

    /// Active reservations whose IP falls inside the inclusive ordinal range.
    pub async fn active_in_range(&self, start: u32, end: u32) -> Vec<Reservation> {
        self.list_active()
            .await
            .into_iter()
            .filter(|reservation| {
                let ordinal = u32::from(reservation.ip);
                ordinal >= start && ordinal <= end
            })
            .collect()
    }
}
