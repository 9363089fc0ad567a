//! Configured pools and their occupancy.
//!
//! Each pool owns one range and a set of member indexes currently held by a
//! binding (offered, leased, reserved) or quarantined after a decline. The
//! set sits behind a `tokio` mutex: every allocation, release and reclaim of
//! a member happens with the pool locked, so two clients can never be handed
//! the same address or prefix.

use std::collections::BTreeSet;
use std::net::IpAddr;

use tokio::sync::{Mutex, MutexGuard};

use crate::binding::IaType;
use crate::config::{OptionSet, PolicyMap};
use crate::range::Range;

#[derive(Debug)]
pub struct Pool {
    pub ia_type: IaType,
    pub range: Range,
    /// Name of the owning link.
    pub link: String,
    /// Name of the filter the pool is scoped to, if any.
    pub filter: Option<String>,
    pub policies: PolicyMap,
    pub options: OptionSet,
    used: Mutex<BTreeSet<u128>>,
}

/// Exclusive access to a pool's occupancy.
pub struct PoolGuard<'a> {
    range: Range,
    used: MutexGuard<'a, BTreeSet<u128>>,
}

impl Pool {
    pub fn new(
        ia_type: IaType,
        range: Range,
        link: &str,
        filter: Option<&str>,
        policies: PolicyMap,
        options: OptionSet,
    ) -> Self {
        Self {
            ia_type,
            range,
            link: link.to_string(),
            filter: filter.map(str::to_string),
            policies,
            options,
            used: Mutex::new(BTreeSet::new()),
        }
    }

    pub fn contains(&self, ip: IpAddr) -> bool {
        self.range.contains(ip)
    }

    pub async fn lock(&self) -> PoolGuard<'_> {
        PoolGuard {
            range: self.range,
            used: self.used.lock().await,
        }
    }
}

impl PoolGuard<'_> {
    pub fn is_free(&self, ip: IpAddr) -> bool {
        self.range
            .index_of(ip)
            .is_some_and(|index| !self.used.contains(&index))
    }

    /// Lowest free member not in `skip`.
    pub fn first_free(&self, skip: &BTreeSet<IpAddr>) -> Option<IpAddr> {
        let mut candidate = 0u128;
        let mut used = self.used.iter().peekable();
        while candidate < self.range.size() {
            match used.peek() {
                Some(&&index) if index == candidate => {
                    used.next();
                }
                _ => {
                    let ip = self.range.member(candidate)?;
                    if !skip.contains(&ip) {
                        return Some(ip);
                    }
                }
            }
            candidate = candidate.checked_add(1)?;
        }
        None
    }

    pub fn mark_used(&mut self, ip: IpAddr) {
        if let Some(index) = self.range.index_of(ip) {
            self.used.insert(index);
        }
    }

    pub fn mark_free(&mut self, ip: IpAddr) {
        if let Some(index) = self.range.index_of(ip) {
            self.used.remove(&index);
        }
    }
}
