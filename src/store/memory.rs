use std::collections::BTreeMap;
use std::net::IpAddr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::{LeaseStore, is_unused, sort_unused};
use crate::binding::{IaKey, IaType, LeaseState};
use crate::error::{Error, Result};
use crate::lease::Lease;
use crate::range::Range;

/// Volatile store keeping every row in an address-ordered map.
#[derive(Debug, Default)]
pub struct MemoryLeaseStore {
    leases: RwLock<BTreeMap<IpAddr, Lease>>,
}

impl MemoryLeaseStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a store pre-populated with `leases`.
    pub fn with_leases(leases: impl IntoIterator<Item = Lease>) -> Self {
        Self {
            leases: RwLock::new(leases.into_iter().map(|lease| (lease.ip, lease)).collect()),
        }
    }
}

fn in_range<'a>(
    leases: &'a BTreeMap<IpAddr, Lease>,
    range: &'a Range,
) -> impl Iterator<Item = &'a Lease> + 'a {
    leases
        .range(range.first()..=range.last())
        .map(|(_, lease)| lease)
        .filter(move |lease| range.contains(lease.ip))
}

#[async_trait]
impl LeaseStore for MemoryLeaseStore {
    async fn insert_lease(&self, lease: &Lease) -> Result<()> {
        let mut leases = self.leases.write().await;
        if leases.contains_key(&lease.ip) {
            return Err(Error::Store(format!("lease for {} already exists", lease.ip)));
        }
        leases.insert(lease.ip, lease.clone());
        Ok(())
    }

    async fn update_lease(&self, lease: &Lease) -> Result<()> {
        let mut leases = self.leases.write().await;
        match leases.get_mut(&lease.ip) {
            Some(existing) => {
                *existing = lease.clone();
                Ok(())
            }
            None => Err(Error::LeaseNotFound(lease.ip)),
        }
    }

    async fn delete_lease(&self, lease: &Lease) -> Result<bool> {
        Ok(self.leases.write().await.remove(&lease.ip).is_some())
    }

    async fn find_ia_leases(&self, key: &IaKey) -> Result<Vec<Lease>> {
        let leases = self.leases.read().await;
        Ok(leases
            .values()
            .filter(|lease| {
                lease.ia_type == key.ia_type
                    && lease.iaid == key.iaid
                    && lease.client_id == key.client_id
            })
            .cloned()
            .collect())
    }

    async fn find_lease_by_ip(&self, ip: IpAddr) -> Result<Option<Lease>> {
        Ok(self.leases.read().await.get(&ip).cloned())
    }

    async fn find_existing_leases(&self, range: &Range) -> Result<Vec<Lease>> {
        let leases = self.leases.read().await;
        Ok(in_range(&leases, range).cloned().collect())
    }

    async fn find_unused_leases(
        &self,
        range: &Range,
        offered_before: DateTime<Utc>,
    ) -> Result<Vec<Lease>> {
        let now = Utc::now();
        let leases = self.leases.read().await;
        let mut unused: Vec<Lease> = in_range(&leases, range)
            .filter(|lease| is_unused(lease, offered_before, now))
            .cloned()
            .collect();
        sort_unused(&mut unused);
        Ok(unused)
    }

    async fn find_expired_leases(
        &self,
        ia_type: IaType,
        now: DateTime<Utc>,
    ) -> Result<Vec<Lease>> {
        let leases = self.leases.read().await;
        Ok(leases
            .values()
            .filter(|lease| {
                lease.ia_type == ia_type
                    && lease.state != LeaseState::Available
                    && lease.valid_end_time < now
            })
            .cloned()
            .collect())
    }

    async fn reconcile_leases(&self, ranges: &[Range]) -> Result<usize> {
        let mut leases = self.leases.write().await;
        let before = leases.len();
        leases.retain(|ip, _| ranges.iter().any(|range| range.contains(*ip)));
        Ok(before - leases.len())
    }

    async fn delete_all_leases(&self) -> Result<()> {
        self.leases.write().await.clear();
        Ok(())
    }

    async fn list_leases(&self) -> Result<Vec<Lease>> {
        Ok(self.leases.read().await.values().cloned().collect())
    }
}
