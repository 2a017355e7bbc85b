//! # dhcpwarden
//!
//! Pool allocation, lease lifecycle, and daemon configuration synthesis for
//! a small-network appliance's DHCP service.
//!
//! ## Features
//!
//! - VLAN-scoped address pools with a guaranteed no-overlap invariant
//! - Static MAC-to-IP reservations that preempt dynamic allocation
//! - Lease lifecycle: create, renew, release, decline, expiry sweep
//! - Deterministic free-address scan with atomic commit arbitration
//! - Byte-deterministic synthesis of DHCP daemon and resolver configuration
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use dhcpwarden::{
//!     AllocationEngine, Config, Datastore, LeaseLifecycleManager, LeaseStore,
//!     PoolRegistry, ReservationStore,
//! };
//!
//! # async fn example() -> dhcpwarden::Result<()> {
//! let config = Arc::new(Config::default());
//! let store = Arc::new(Datastore::open(&config.datastore_file).await?);
//!
//! let pools = PoolRegistry::new(Arc::clone(&store));
//! let leases = LeaseStore::new(Arc::clone(&store));
//! let reservations = ReservationStore::new(Arc::clone(&store));
//! let engine = AllocationEngine::new(pools.clone(), leases.clone(), reservations);
//! let lifecycle = LeaseLifecycleManager::new(
//!     pools,
//!     leases,
//!     engine,
//!     config.default_lease_time.clone(),
//! );
//!
//! let mac = "aa:bb:cc:dd:ee:ff".parse()?;
//! let assignment = lifecycle.allocate(mac, 1).await?;
//! # let _ = assignment;
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`Datastore`] - Row store with atomic commit guards and JSON persistence
//! - [`PoolRegistry`] - Pool set and its no-overlap invariant
//! - [`ReservationStore`] - Static MAC-to-IP bindings
//! - [`LeaseStore`] - Lease-table query patterns
//! - [`AllocationEngine`] - Deterministic free-address scan
//! - [`LeaseLifecycleManager`] - Lease state machine and expiry sweep
//! - [`ConfigSynthesizer`] - Daemon configuration rendering

pub mod addr;
pub mod alloc;
pub mod config;
pub mod duration;
pub mod error;
pub mod lease;
pub mod lifecycle;
pub mod pool;
pub mod reservation;
pub mod store;
pub mod synth;

pub use addr::{Cidr, MacAddr};
pub use alloc::{AllocationEngine, PoolStats};
pub use config::Config;
pub use duration::LeaseTime;
pub use error::{Error, Result};
pub use lease::{Lease, LeaseState, LeaseStore};
pub use lifecycle::{Assignment, LeaseLifecycleManager, SweepReport};
pub use pool::{Pool, PoolRegistry};
pub use reservation::{Reservation, ReservationStore};
pub use store::{Datastore, Snapshot};
pub use synth::ConfigSynthesizer;
