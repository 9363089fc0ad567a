//! Bounded write-through caches in front of the lease store.
//!
//! Two LRU maps are kept: whole-IA lease lists keyed by [`IaKey`] and single
//! leases keyed by address. Writers update the store first, then call
//! [`LeaseCache::record`] or [`LeaseCache::forget`]. Readers that miss fill
//! the cache with [`LeaseCache::fill_ia`], passing the generation they read
//! before going to the store; a fill is dropped if any write happened in
//! between, so a slow reader never overwrites a newer write.

use std::net::IpAddr;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};

use lru::LruCache;
use parking_lot::Mutex;

use crate::binding::IaKey;
use crate::lease::Lease;

/// Default number of entries in each cache.
pub const DEFAULT_CACHE_SIZE: usize = 1000;

#[derive(Debug)]
struct Caches {
    ia_leases: LruCache<IaKey, Vec<Lease>>,
    leases: LruCache<IpAddr, Lease>,
}

/// IA and lease caches. A capacity of zero disables caching entirely.
#[derive(Debug)]
pub struct LeaseCache {
    caches: Option<Mutex<Caches>>,
    generation: AtomicU64,
}

impl LeaseCache {
    pub fn new(capacity: usize) -> Self {
        let caches = NonZeroUsize::new(capacity).map(|capacity| {
            Mutex::new(Caches {
                ia_leases: LruCache::new(capacity),
                leases: LruCache::new(capacity),
            })
        });
        Self {
            caches,
            generation: AtomicU64::new(0),
        }
    }

    /// Generation to pass back to [`LeaseCache::fill_ia`] after a store read.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    pub fn get_ia(&self, key: &IaKey) -> Option<Vec<Lease>> {
        let caches = self.caches.as_ref()?;
        caches.lock().ia_leases.get(key).cloned()
    }

    pub fn get_lease(&self, ip: IpAddr) -> Option<Lease> {
        let caches = self.caches.as_ref()?;
        caches.lock().leases.get(&ip).cloned()
    }

    /// Stores the result of a store read unless a write raced it.
    pub fn fill_ia(&self, key: IaKey, leases: Vec<Lease>, generation: u64) {
        let Some(caches) = &self.caches else {
            return;
        };
        let mut caches = caches.lock();
        if self.generation.load(Ordering::Acquire) != generation {
            return;
        }
        for lease in &leases {
            caches.leases.put(lease.ip, lease.clone());
        }
        caches.ia_leases.put(key, leases);
    }

    /// Stores a single row read from the store unless a write raced it.
    pub fn fill_lease(&self, lease: Lease, generation: u64) {
        let Some(caches) = &self.caches else {
            return;
        };
        let mut caches = caches.lock();
        if self.generation.load(Ordering::Acquire) != generation {
            return;
        }
        caches.leases.put(lease.ip, lease);
    }

    /// Records a row written to the store. `previous` is the row it
    /// replaced, which may have belonged to another IA.
    pub fn record(&self, previous: Option<&Lease>, lease: &Lease) {
        let Some(caches) = &self.caches else {
            return;
        };
        let mut caches = caches.lock();
        self.generation.fetch_add(1, Ordering::AcqRel);
        if let Some(previous) = previous
            && previous.key() != lease.key()
            && let Some(list) = caches.ia_leases.get_mut(&previous.key())
        {
            list.retain(|row| row.ip != previous.ip);
        }
        if let Some(list) = caches.ia_leases.get_mut(&lease.key()) {
            match list.iter_mut().find(|row| row.ip == lease.ip) {
                Some(row) => *row = lease.clone(),
                None => list.push(lease.clone()),
            }
        }
        caches.leases.put(lease.ip, lease.clone());
    }

    /// Records a row deleted from the store.
    pub fn forget(&self, lease: &Lease) {
        let Some(caches) = &self.caches else {
            return;
        };
        let mut caches = caches.lock();
        self.generation.fetch_add(1, Ordering::AcqRel);
        if let Some(list) = caches.ia_leases.get_mut(&lease.key()) {
            list.retain(|row| row.ip != lease.ip);
        }
        caches.leases.pop(&lease.ip);
    }
}
