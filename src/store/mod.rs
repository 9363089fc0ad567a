//! Lease persistence contract and backends.
//!
//! The binding managers only talk to [`LeaseStore`]; which backend sits
//! behind it is chosen at startup from the configuration. Leases are keyed
//! by address: a given address or delegated prefix has at most one row.

use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::binding::{IaKey, IaType, LeaseState};
use crate::config::Config;
use crate::error::Result;
use crate::lease::Lease;
use crate::range::Range;

mod file;
mod memory;

pub use file::JsonFileLeaseStore;
pub use memory::MemoryLeaseStore;

/// Storage operations the binding managers depend on.
#[async_trait]
pub trait LeaseStore: Send + Sync + fmt::Debug {
    /// Inserts a new row. Fails if a row for the address already exists.
    async fn insert_lease(&self, lease: &Lease) -> Result<()>;

    /// Replaces the row for `lease.ip`. Fails if none exists.
    async fn update_lease(&self, lease: &Lease) -> Result<()>;

    /// Deletes the row for `lease.ip`; returns whether one was removed.
    async fn delete_lease(&self, lease: &Lease) -> Result<bool>;

    /// All rows belonging to one IA.
    async fn find_ia_leases(&self, key: &IaKey) -> Result<Vec<Lease>>;

    async fn find_lease_by_ip(&self, ip: IpAddr) -> Result<Option<Lease>>;

    /// Rows whose address falls inside `range`, in address order.
    async fn find_existing_leases(&self, range: &Range) -> Result<Vec<Lease>>;

    /// Rows inside `range` that may be handed to a new client: available,
    /// released or expired rows, and offers made before `offered_before`.
    /// Ordered never-used first, then by valid end time, then by address.
    async fn find_unused_leases(
        &self,
        range: &Range,
        offered_before: DateTime<Utc>,
    ) -> Result<Vec<Lease>>;

    /// Rows of `ia_type` whose valid lifetime ended before `now` and which
    /// are not already available.
    async fn find_expired_leases(&self, ia_type: IaType, now: DateTime<Utc>)
    -> Result<Vec<Lease>>;

    /// Deletes every row outside `ranges`; returns how many were removed.
    async fn reconcile_leases(&self, ranges: &[Range]) -> Result<usize>;

    async fn delete_all_leases(&self) -> Result<()>;

    async fn list_leases(&self) -> Result<Vec<Lease>>;

    /// Flushes buffered writes. A no-op for volatile backends.
    async fn save(&self) -> Result<()> {
        Ok(())
    }
}

/// True when a row can be reused by another client.
pub(crate) fn is_unused(lease: &Lease, offered_before: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    match lease.state {
        LeaseState::Available | LeaseState::Released | LeaseState::Expired => true,
        LeaseState::Offered => lease.start_time < offered_before || lease.valid_end_time < now,
        LeaseState::Leased => lease.valid_end_time < now,
        LeaseState::Declined | LeaseState::Reserved => false,
    }
}

/// Sort order for [`LeaseStore::find_unused_leases`].
pub(crate) fn sort_unused(leases: &mut [Lease]) {
    leases.sort_by(|a, b| {
        a.state
            .reuse_rank()
            .cmp(&b.state.reuse_rank())
            .then(a.valid_end_time.cmp(&b.valid_end_time))
            .then(a.ip.cmp(&b.ip))
    });
}

/// Opens the backend named by the configuration: a JSON file when
/// `leases_file` is set, memory otherwise.
pub async fn open(config: &Config) -> Result<Arc<dyn LeaseStore>> {
    match &config.leases_file {
        Some(path) => Ok(Arc::new(JsonFileLeaseStore::open(path).await?)),
        None => Ok(Arc::new(MemoryLeaseStore::new())),
    }
}
