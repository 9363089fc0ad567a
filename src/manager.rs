//! Binding managers: the allocation engine.
//!
//! One [`BindingManager`] exists per resource kind (IA_NA, IA_TA, IA_PD and
//! v4). Managers are the only code that changes lease state. Every decision
//! about a pool member is taken with that pool locked, and every write goes
//! to the store first and then to the write-through cache.

use std::collections::BTreeSet;
use std::net::IpAddr;
use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use tracing::{debug, info, warn};

use crate::binding::{Binding, BindingObject, BindingResource, IaKey, IaType, LeaseState, Lifetimes};
use crate::cache::LeaseCache;
use crate::config::PolicyMap;
use crate::error::{Error, Result};
use crate::lease::{Lease, encode_client_id};
use crate::link::{Link, LinkMap};
use crate::policy::{Filter, Policy, PolicyScope};
use crate::pool::Pool;
use crate::range::Range;
use crate::store::{LeaseStore, is_unused};

/// The client, IA and link a manager call is made for.
#[derive(Debug, Clone, Copy)]
pub struct BindingRequest<'a> {
    pub link: &'a Link,
    pub client_id: &'a [u8],
    /// Always zero for v4.
    pub iaid: u32,
    /// Filters of the link matching the client's message.
    pub filters: &'a [&'a Filter],
    /// Addresses or prefixes the client asked for, tried first.
    pub hints: &'a [IpAddr],
}

#[derive(Debug)]
pub struct BindingManager {
    ia_type: IaType,
    store: Arc<dyn LeaseStore>,
    cache: LeaseCache,
    global: PolicyMap,
}

impl BindingManager {
    pub fn new(
        ia_type: IaType,
        store: Arc<dyn LeaseStore>,
        cache_size: usize,
        global: PolicyMap,
    ) -> Self {
        Self {
            ia_type,
            store,
            cache: LeaseCache::new(cache_size),
            global,
        }
    }

    pub fn ia_type(&self) -> IaType {
        self.ia_type
    }

    fn key(&self, request: &BindingRequest<'_>) -> IaKey {
        IaKey::new(request.client_id, self.ia_type, request.iaid)
    }

    fn scope<'a>(&'a self, request: &BindingRequest<'a>, pool: &'a Pool) -> PolicyScope<'a> {
        request.link.scope(&self.global, Some(pool), request.filters)
    }

    fn lifetimes(&self, scope: &PolicyScope<'_>) -> Lifetimes {
        match self.ia_type {
            IaType::V4 => {
                let lease_time = scope.get_u32(Policy::V4LeaseTime);
                Lifetimes::new(lease_time, lease_time)
            }
            IaType::Na | IaType::Ta | IaType::Pd => {
                let valid = scope.get_u32(Policy::V6ValidLifetime);
                let preferred = scope.get_u32(Policy::V6PreferredLifetime);
                Lifetimes::new(preferred.min(valid), valid)
            }
        }
    }

    fn shell(&self, request: &BindingRequest<'_>, state: LeaseState) -> Binding {
        Binding {
            client_id: request.client_id.to_vec(),
            ia_type: self.ia_type,
            iaid: request.iaid,
            state,
            link: request.link.name.clone(),
            objects: Vec::new(),
        }
    }

    fn lease(&self, request: &BindingRequest<'_>, object: &BindingObject) -> Lease {
        Lease::from_object(&self.shell(request, object.state), object)
    }

    /// Leases of one IA, from the cache or the store.
    async fn ia_leases(&self, key: &IaKey) -> Result<Vec<Lease>> {
        if let Some(leases) = self.cache.get_ia(key) {
            return Ok(leases);
        }
        let generation = self.cache.generation();
        let leases = self.store.find_ia_leases(key).await?;
        self.cache.fill_ia(key.clone(), leases.clone(), generation);
        Ok(leases)
    }

    /// The row for one address, from the cache or the store.
    async fn lease_by_ip(&self, ip: IpAddr) -> Result<Option<Lease>> {
        if let Some(lease) = self.cache.get_lease(ip) {
            return Ok(Some(lease));
        }
        let generation = self.cache.generation();
        let lease = self.store.find_lease_by_ip(ip).await?;
        if let Some(lease) = &lease {
            self.cache.fill_lease(lease.clone(), generation);
        }
        Ok(lease)
    }

    async fn write(&self, previous: Option<&Lease>, lease: &Lease) -> Result<()> {
        match previous {
            Some(_) => self.store.update_lease(lease).await?,
            None => self.store.insert_lease(lease).await?,
        }
        self.cache.record(previous, lease);
        Ok(())
    }

    /// The binding currently held by the IA on `request.link`, if any.
    /// Only offered, leased and reserved objects from this link's pools
    /// are included. Never allocates.
    pub async fn find_current_binding(&self, request: &BindingRequest<'_>) -> Result<Option<Binding>> {
        let key = self.key(request);
        let mut objects = Vec::new();
        for lease in self.ia_leases(&key).await? {
            if !lease.state.is_held() {
                continue;
            }
            match request.link.find_pool(self.ia_type, lease.ip) {
                Some(pool) => objects.push(lease.to_object(pool.range)),
                None => debug!(
                    "Ignoring {} of client {}: not in a pool of link {}",
                    lease.ip,
                    encode_client_id(request.client_id),
                    request.link.name
                ),
            }
        }
        if objects.is_empty() {
            return Ok(None);
        }

        let state = if objects.iter().any(|object| object.state == LeaseState::Leased) {
            LeaseState::Leased
        } else if objects.iter().any(|object| object.state == LeaseState::Offered) {
            LeaseState::Offered
        } else {
            LeaseState::Reserved
        };
        let mut binding = self.shell(request, state);
        binding.objects = objects;
        Ok(Some(binding))
    }

    /// Allocates one address or prefix for a new binding, offered or
    /// committed. Hints are tried first, then each candidate pool in order.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PoolExhausted`] when no candidate pool has a free
    /// or reclaimable member, or the store error that stopped allocation.
    pub async fn create_solicit_binding(
        &self,
        request: &BindingRequest<'_>,
        commit: bool,
    ) -> Result<Binding> {
        let state = if commit {
            LeaseState::Leased
        } else {
            LeaseState::Offered
        };
        let pools = request.link.candidate_pools(self.ia_type, request.filters);
        if pools.is_empty() {
            warn!("No {} pools on link {}", self.ia_type, request.link.name);
            return Err(Error::PoolExhausted);
        }

        let mut object = None;
        for hint in request.hints {
            if let Some(pool) = pools.iter().find(|pool| pool.contains(*hint)) {
                object = self.claim(request, pool, Some(*hint), state).await?;
                if object.is_some() {
                    break;
                }
                debug!("Hint {} unavailable for {}", hint, self.ia_type);
            }
        }
        if object.is_none() {
            for pool in &pools {
                object = self.claim(request, pool, None, state).await?;
                if object.is_some() {
                    break;
                }
            }
        }

        let Some(object) = object else {
            warn!(
                "No free {} on link {} for client {}",
                self.ia_type,
                request.link.name,
                encode_client_id(request.client_id)
            );
            return Err(Error::PoolExhausted);
        };
        let mut binding = self.shell(request, state);
        binding.objects.push(object);
        Ok(binding)
    }

    /// Takes one member of `pool` for the requesting IA: the hint if it is
    /// free, otherwise the lowest free member, otherwise the best stale or
    /// expired row. Runs entirely under the pool lock.
    async fn claim(
        &self,
        request: &BindingRequest<'_>,
        pool: &Pool,
        hint: Option<IpAddr>,
        state: LeaseState,
    ) -> Result<Option<BindingObject>> {
        let key = self.key(request);
        let scope = self.scope(request, pool);
        let lifetimes = self.lifetimes(&scope);
        let now = Utc::now();
        let offered_before = now - TimeDelta::milliseconds(scope.get_long(Policy::OfferExpiration));

        let mut guard = pool.lock().await;
        let mut skipped = BTreeSet::new();
        let (ip, previous) = loop {
            let candidate = match hint {
                Some(ip) if guard.is_free(ip) && !skipped.contains(&ip) => Some(ip),
                Some(_) => return Ok(None),
                None => guard.first_free(&skipped),
            };
            let Some(ip) = candidate else {
                break match self.reclaimable(pool, offered_before).await? {
                    Some(row) => (row.ip, Some(row)),
                    None => return Ok(None),
                };
            };

            let previous = self.lease_by_ip(ip).await?;
            if let Some(row) = &previous
                && row.key() != key
                && !is_unused(row, offered_before, now)
            {
                debug!("{} is held by another client, skipping", ip);
                guard.mark_used(ip);
                skipped.insert(ip);
                continue;
            }
            break (ip, previous);
        };

        let resource = match (pool.range, ip) {
            (Range::Prefix(range), IpAddr::V6(prefix)) => BindingResource::Prefix {
                prefix,
                length: range.delegated_length(),
            },
            _ => BindingResource::Address(ip),
        };
        let object = BindingObject::new(resource, pool.range, state, lifetimes);
        let lease = self.lease(request, &object);
        self.write(previous.as_ref(), &lease).await?;
        guard.mark_used(ip);

        info!(
            "{} {} to client {} iaid {} on link {}",
            state,
            object.resource,
            encode_client_id(request.client_id),
            request.iaid,
            request.link.name
        );
        Ok(Some(object))
    }

    /// Best row of a full pool that may be taken over: a stale offer or a
    /// lease past its valid lifetime.
    async fn reclaimable(&self, pool: &Pool, offered_before: DateTime<Utc>) -> Result<Option<Lease>> {
        let rows = self.store.find_unused_leases(&pool.range, offered_before).await?;
        Ok(rows.into_iter().find(|row| row.ia_type == self.ia_type))
    }

    /// Refreshes an existing binding and moves it to `target`. Objects that
    /// left the link's pools or were taken over are dropped; if none
    /// remain a new member is allocated.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PoolExhausted`] when reallocation finds nothing.
    pub async fn update_binding(
        &self,
        request: &BindingRequest<'_>,
        binding: Binding,
        target: LeaseState,
    ) -> Result<Binding> {
        let key = binding.key();
        let mut kept = Vec::with_capacity(binding.objects.len());

        for mut object in binding.objects {
            let ip = object.ip();
            let Some(pool) = request.link.find_pool(self.ia_type, ip) else {
                info!("{} is no longer in a pool of link {}", ip, request.link.name);
                continue;
            };
            let lifetimes = self.lifetimes(&self.scope(request, pool));

            let mut guard = pool.lock().await;
            let current = self.lease_by_ip(ip).await?;
            match &current {
                Some(row) if row.key() == key && row.state.is_held() => {}
                _ => {
                    warn!(
                        "{} no longer belongs to client {} iaid {}",
                        ip,
                        encode_client_id(request.client_id),
                        request.iaid
                    );
                    continue;
                }
            }

            object.refresh(target, lifetimes);
            let lease = self.lease(request, &object);
            self.write(current.as_ref(), &lease).await?;
            guard.mark_used(ip);
            debug!("Refreshed {} as {}", object.resource, target);
            kept.push(object);
        }

        if kept.is_empty() {
            info!(
                "Binding of client {} iaid {} has no usable objects, reallocating",
                encode_client_id(request.client_id),
                request.iaid
            );
            return self
                .create_solicit_binding(request, target == LeaseState::Leased)
                .await;
        }

        let mut binding = self.shell(request, target);
        binding.objects = kept;
        Ok(binding)
    }

    /// Releases every object of `binding`.
    pub async fn release_binding(&self, request: &BindingRequest<'_>, binding: &Binding) -> Result<()> {
        for object in &binding.objects {
            match object.resource {
                BindingResource::Address(ip) => {
                    self.release_ia_address(request, ip).await?;
                }
                BindingResource::Prefix { prefix, .. } => {
                    self.release_ia_prefix(request, IpAddr::V6(prefix)).await?;
                }
            }
        }
        Ok(())
    }

    /// Returns an address to its pool. `false` if the IA did not hold it.
    pub async fn release_ia_address(&self, request: &BindingRequest<'_>, ip: IpAddr) -> Result<bool> {
        self.release_object(request, ip).await
    }

    /// Returns a delegated prefix to its pool. `false` if the IA did not
    /// hold it.
    pub async fn release_ia_prefix(&self, request: &BindingRequest<'_>, prefix: IpAddr) -> Result<bool> {
        self.release_object(request, prefix).await
    }

    async fn release_object(&self, request: &BindingRequest<'_>, ip: IpAddr) -> Result<bool> {
        let Some(pool) = request.link.find_pool(self.ia_type, ip) else {
            return Ok(false);
        };
        let delete = self.scope(request, pool).get_bool(Policy::DeleteOnRelease);
        let key = self.key(request);

        let mut guard = pool.lock().await;
        let Some(row) = self.lease_by_ip(ip).await? else {
            return Ok(false);
        };
        if row.key() != key || !row.state.is_held() {
            return Ok(false);
        }

        if delete {
            self.store.delete_lease(&row).await?;
            self.cache.forget(&row);
        } else {
            let now = Utc::now();
            let mut released = row.clone();
            released.state = LeaseState::Released;
            released.preferred_end_time = now;
            released.valid_end_time = now;
            self.write(Some(&row), &released).await?;
        }
        guard.mark_free(ip);
        info!(
            "Released {} from client {} iaid {}",
            ip,
            encode_client_id(request.client_id),
            request.iaid
        );
        Ok(true)
    }

    /// Marks an address the client found in use elsewhere. It stays out of
    /// the pool for `binding.decline-hold` seconds.
    pub async fn decline_ia_address(&self, request: &BindingRequest<'_>, ip: IpAddr) -> Result<bool> {
        let Some(pool) = request.link.find_pool(self.ia_type, ip) else {
            return Ok(false);
        };
        let hold = self.scope(request, pool).get_long(Policy::DeclineHold);
        let key = self.key(request);

        let mut guard = pool.lock().await;
        let Some(row) = self.lease_by_ip(ip).await? else {
            return Ok(false);
        };
        if row.key() != key || !row.state.is_held() {
            return Ok(false);
        }

        let now = Utc::now();
        let mut declined = row.clone();
        declined.state = LeaseState::Declined;
        declined.start_time = now;
        declined.preferred_end_time = now;
        declined.valid_end_time = now + TimeDelta::seconds(hold);
        self.write(Some(&row), &declined).await?;
        guard.mark_used(ip);
        warn!(
            "{} declined by client {}, held for {}s",
            ip,
            encode_client_id(request.client_id),
            hold
        );
        Ok(true)
    }

    /// Marks the members of this kind's pools that the store says are in
    /// use. Called once at startup, after reconciliation.
    pub async fn load_pools(&self, links: &LinkMap) -> Result<usize> {
        let mut loaded = 0;
        for pool in links.pools(self.ia_type) {
            let mut guard = pool.lock().await;
            for row in self.store.find_existing_leases(&pool.range).await? {
                if row.ia_type == self.ia_type
                    && (row.state.is_held() || row.state == LeaseState::Declined)
                {
                    guard.mark_used(row.ip);
                    loaded += 1;
                }
            }
        }
        Ok(loaded)
    }

    /// Returns expired leases, elapsed decline holds and stale offers to
    /// their pools. Returns how many rows were reclaimed.
    pub async fn reap_expired(&self, links: &LinkMap) -> Result<usize> {
        let now = Utc::now();
        let mut reclaimed = 0;

        for lease in self.store.find_expired_leases(self.ia_type, now).await? {
            let Some(pool) = links.find_pool(self.ia_type, lease.ip) else {
                continue;
            };
            if self
                .reclaim(pool, lease.ip, |row| {
                    row.state != LeaseState::Available && row.valid_end_time < now
                })
                .await?
            {
                reclaimed += 1;
            }
        }

        for pool in links.pools(self.ia_type) {
            let Some(link) = links.get(&pool.link) else {
                continue;
            };
            let expiration = link
                .scope(&self.global, Some(pool), &[])
                .get_long(Policy::OfferExpiration);
            let offered_before = now - TimeDelta::milliseconds(expiration);
            for lease in self.store.find_unused_leases(&pool.range, offered_before).await? {
                if lease.state != LeaseState::Offered {
                    continue;
                }
                if self
                    .reclaim(pool, lease.ip, |row| {
                        row.state == LeaseState::Offered && row.start_time < offered_before
                    })
                    .await?
                {
                    reclaimed += 1;
                }
            }
        }

        if reclaimed > 0 {
            info!("Reclaimed {} {} leases", reclaimed, self.ia_type);
        }
        Ok(reclaimed)
    }

    async fn reclaim(
        &self,
        pool: &Pool,
        ip: IpAddr,
        still_reclaimable: impl Fn(&Lease) -> bool,
    ) -> Result<bool> {
        let mut guard = pool.lock().await;
        let Some(row) = self.lease_by_ip(ip).await? else {
            return Ok(false);
        };
        if row.ia_type != self.ia_type || !still_reclaimable(&row) {
            return Ok(false);
        }
        let mut available = row.clone();
        available.state = LeaseState::Available;
        self.write(Some(&row), &available).await?;
        guard.mark_free(ip);
        debug!("{} ({}) is available again", ip, row.state);
        Ok(true)
    }
}

/// The four managers, sharing one store.
#[derive(Debug)]
pub struct BindingManagers {
    store: Arc<dyn LeaseStore>,
    na: BindingManager,
    ta: BindingManager,
    pd: BindingManager,
    v4: BindingManager,
}

impl BindingManagers {
    pub fn new(store: Arc<dyn LeaseStore>, cache_size: usize, global: &PolicyMap) -> Self {
        let manager = |ia_type| BindingManager::new(ia_type, store.clone(), cache_size, global.clone());
        Self {
            na: manager(IaType::Na),
            ta: manager(IaType::Ta),
            pd: manager(IaType::Pd),
            v4: manager(IaType::V4),
            store,
        }
    }

    pub fn get(&self, ia_type: IaType) -> &BindingManager {
        match ia_type {
            IaType::Na => &self.na,
            IaType::Ta => &self.ta,
            IaType::Pd => &self.pd,
            IaType::V4 => &self.v4,
        }
    }

    pub fn all(&self) -> [&BindingManager; 4] {
        [&self.na, &self.ta, &self.pd, &self.v4]
    }

    pub fn store(&self) -> &Arc<dyn LeaseStore> {
        &self.store
    }

    /// Deletes stored leases outside every configured pool, then loads
    /// pool occupancy from what remains.
    pub async fn reconcile(&self, links: &LinkMap) -> Result<()> {
        let ranges: Vec<Range> = links
            .links()
            .iter()
            .flat_map(|link| link.pools.iter().map(|pool| pool.range))
            .collect();
        let removed = self.store.reconcile_leases(&ranges).await?;
        if removed > 0 {
            warn!("Removed {} leases outside the configured pools", removed);
        }
        for manager in self.all() {
            let loaded = manager.load_pools(links).await?;
            debug!("Loaded {} in-use {} leases", loaded, manager.ia_type());
        }
        Ok(())
    }

    /// One reaper pass over every kind.
    pub async fn reap_expired(&self, links: &LinkMap) -> Result<usize> {
        let mut total = 0;
        for manager in self.all() {
            total += manager.reap_expired(links).await?;
        }
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, LinkConfig, OptionSet, PoolConfig, PoolSet};
    use crate::store::MemoryLeaseStore;

    const CLIENT: &[u8] = &[0x00, 0x01, 0xaa, 0xbb];
    const OTHER: &[u8] = &[0x00, 0x01, 0xcc, 0xdd];

    fn links(range: &str, policies: &[(&str, &str)]) -> LinkMap {
        let config = Config {
            links: vec![LinkConfig {
                name: "lan".to_string(),
                subnet: "2001:db8::/64".parse().unwrap(),
                interface: None,
                policies: policies
                    .iter()
                    .map(|(key, value)| (key.to_string(), value.to_string()))
                    .collect(),
                options: OptionSet::default(),
                pools: PoolSet {
                    na_pools: vec![PoolConfig {
                        range: range.to_string(),
                        policies: PolicyMap::new(),
                        options: OptionSet::default(),
                    }],
                    ..PoolSet::default()
                },
                filters: Vec::new(),
            }],
            ..Config::default()
        };
        LinkMap::from_config(&config).unwrap()
    }

    fn manager(store: Arc<dyn LeaseStore>) -> BindingManager {
        BindingManager::new(IaType::Na, store, 100, PolicyMap::new())
    }

    fn request<'a>(link: &'a Link, client_id: &'a [u8], hints: &'a [IpAddr]) -> BindingRequest<'a> {
        BindingRequest {
            link,
            client_id,
            iaid: 1,
            filters: &[],
            hints,
        }
    }

    fn ip(text: &str) -> IpAddr {
        text.parse().unwrap()
    }

    #[tokio::test]
    async fn test_solicit_then_commit() {
        let links = links("2001:db8::10-2001:db8::11", &[]);
        let link = links.get("lan").unwrap();
        let store: Arc<dyn LeaseStore> = Arc::new(MemoryLeaseStore::new());
        let manager = manager(store.clone());
        let request = request(link, CLIENT, &[]);

        assert!(manager.find_current_binding(&request).await.unwrap().is_none());

        let offered = manager.create_solicit_binding(&request, false).await.unwrap();
        assert_eq!(offered.state, LeaseState::Offered);
        assert_eq!(offered.objects[0].ip(), ip("2001:db8::10"));
        assert_eq!(offered.objects[0].lifetimes(), Lifetimes::new(3600, 3600));

        let current = manager.find_current_binding(&request).await.unwrap().unwrap();
        assert_eq!(current.objects[0].ip(), ip("2001:db8::10"));

        let committed = manager
            .update_binding(&request, current, LeaseState::Leased)
            .await
            .unwrap();
        assert_eq!(committed.state, LeaseState::Leased);
        let row = store.find_lease_by_ip(ip("2001:db8::10")).await.unwrap().unwrap();
        assert_eq!(row.state, LeaseState::Leased);
    }

    #[tokio::test]
    async fn test_exhaustion_and_hints() {
        let links = links("2001:db8::10-2001:db8::11", &[]);
        let link = links.get("lan").unwrap();
        let manager = manager(Arc::new(MemoryLeaseStore::new()));

        let hints = [ip("2001:db8::11")];
        let first = manager
            .create_solicit_binding(&request(link, CLIENT, &hints), true)
            .await
            .unwrap();
        assert_eq!(first.objects[0].ip(), ip("2001:db8::11"));

        let second = manager
            .create_solicit_binding(&request(link, OTHER, &hints), true)
            .await
            .unwrap();
        assert_eq!(second.objects[0].ip(), ip("2001:db8::10"));

        let third = manager
            .create_solicit_binding(&request(link, &[9, 9], &[]), true)
            .await;
        assert!(matches!(third, Err(Error::PoolExhausted)));
    }

    #[tokio::test]
    async fn test_concurrent_allocation_never_doubles() {
        let links = Arc::new(links("2001:db8::10-2001:db8::19", &[]));
        let manager = Arc::new(manager(Arc::new(MemoryLeaseStore::new())));

        let mut tasks = Vec::new();
        for client in 0u8..25 {
            let links = links.clone();
            let manager = manager.clone();
            tasks.push(tokio::spawn(async move {
                let link = links.get("lan").unwrap();
                let client_id = [0x00, 0x01, client];
                manager
                    .create_solicit_binding(&request(link, &client_id, &[]), true)
                    .await
                    .ok()
                    .map(|binding| binding.objects[0].ip())
            }));
        }

        let mut allocated = BTreeSet::new();
        for task in tasks {
            if let Some(ip) = task.await.unwrap() {
                assert!(allocated.insert(ip), "{} allocated twice", ip);
            }
        }
        assert_eq!(allocated.len(), 10);
    }

    #[tokio::test]
    async fn test_release_then_reallocate() {
        let links = links("2001:db8::10", &[]);
        let link = links.get("lan").unwrap();
        let store: Arc<dyn LeaseStore> = Arc::new(MemoryLeaseStore::new());
        let manager = manager(store.clone());

        let binding = manager
            .create_solicit_binding(&request(link, CLIENT, &[]), true)
            .await
            .unwrap();
        manager
            .release_binding(&request(link, CLIENT, &[]), &binding)
            .await
            .unwrap();
        assert!(manager
            .find_current_binding(&request(link, CLIENT, &[]))
            .await
            .unwrap()
            .is_none());

        let other = manager
            .create_solicit_binding(&request(link, OTHER, &[]), false)
            .await
            .unwrap();
        assert_eq!(other.objects[0].ip(), ip("2001:db8::10"));
        let row = store.find_lease_by_ip(ip("2001:db8::10")).await.unwrap().unwrap();
        assert_eq!(row.client_id, OTHER);
        assert_eq!(row.state, LeaseState::Offered);
    }

    #[tokio::test]
    async fn test_release_of_foreign_address_is_refused() {
        let links = links("2001:db8::10-2001:db8::11", &[]);
        let link = links.get("lan").unwrap();
        let manager = manager(Arc::new(MemoryLeaseStore::new()));

        manager
            .create_solicit_binding(&request(link, CLIENT, &[]), true)
            .await
            .unwrap();
        let released = manager
            .release_ia_address(&request(link, OTHER, &[]), ip("2001:db8::10"))
            .await
            .unwrap();
        assert!(!released);
    }

    #[tokio::test]
    async fn test_stale_offer_is_taken_over() {
        let links = links("2001:db8::10", &[("binding.offer-expiration", "0")]);
        let link = links.get("lan").unwrap();
        let manager = manager(Arc::new(MemoryLeaseStore::new()));

        manager
            .create_solicit_binding(&request(link, CLIENT, &[]), false)
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;

        let other = manager
            .create_solicit_binding(&request(link, OTHER, &[]), false)
            .await
            .unwrap();
        assert_eq!(other.objects[0].ip(), ip("2001:db8::10"));
        assert!(manager
            .find_current_binding(&request(link, CLIENT, &[]))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_decline_holds_address() {
        let links = links("2001:db8::10", &[("binding.decline-hold", "0")]);
        let link = links.get("lan").unwrap();
        let store: Arc<dyn LeaseStore> = Arc::new(MemoryLeaseStore::new());
        let manager = manager(store.clone());

        manager
            .create_solicit_binding(&request(link, CLIENT, &[]), true)
            .await
            .unwrap();
        assert!(manager
            .decline_ia_address(&request(link, CLIENT, &[]), ip("2001:db8::10"))
            .await
            .unwrap());
        assert!(manager
            .create_solicit_binding(&request(link, OTHER, &[]), true)
            .await
            .is_err());

        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        assert_eq!(manager.reap_expired(&links).await.unwrap(), 1);
        let row = store.find_lease_by_ip(ip("2001:db8::10")).await.unwrap().unwrap();
        assert_eq!(row.state, LeaseState::Available);
        assert!(manager
            .create_solicit_binding(&request(link, OTHER, &[]), true)
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_reaper_reclaims_expired_lease() {
        let links = links("2001:db8::10", &[("dhcp.v6.valid-lifetime", "0")]);
        let link = links.get("lan").unwrap();
        let store: Arc<dyn LeaseStore> = Arc::new(MemoryLeaseStore::new());
        let manager = manager(store.clone());

        let leased = manager
            .create_solicit_binding(&request(link, CLIENT, &[]), true)
            .await
            .unwrap();
        assert_eq!(leased.state, LeaseState::Leased);

        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        assert_eq!(manager.reap_expired(&links).await.unwrap(), 1);
        let row = store.find_lease_by_ip(ip("2001:db8::10")).await.unwrap().unwrap();
        assert_eq!(row.state, LeaseState::Available);
        assert_eq!(manager.reap_expired(&links).await.unwrap(), 0);

        let other = manager
            .create_solicit_binding(&request(link, OTHER, &[]), true)
            .await
            .unwrap();
        assert_eq!(other.objects[0].ip(), ip("2001:db8::10"));
        assert!(manager
            .find_current_binding(&request(link, CLIENT, &[]))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_reaper_reclaims_stale_offer() {
        let links = links("2001:db8::10", &[("binding.offer-expiration", "0")]);
        let link = links.get("lan").unwrap();
        let store: Arc<dyn LeaseStore> = Arc::new(MemoryLeaseStore::new());
        let manager = manager(store.clone());

        manager
            .create_solicit_binding(&request(link, CLIENT, &[]), false)
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;

        assert_eq!(manager.reap_expired(&links).await.unwrap(), 1);
        let row = store.find_lease_by_ip(ip("2001:db8::10")).await.unwrap().unwrap();
        assert_eq!(row.state, LeaseState::Available);
        assert!(manager
            .find_current_binding(&request(link, CLIENT, &[]))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_reaper_leaves_live_leases() {
        let links = links("2001:db8::10", &[("binding.offer-expiration", "0")]);
        let link = links.get("lan").unwrap();
        let manager = manager(Arc::new(MemoryLeaseStore::new()));

        manager
            .create_solicit_binding(&request(link, CLIENT, &[]), true)
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        assert_eq!(manager.reap_expired(&links).await.unwrap(), 0);
        assert!(manager
            .find_current_binding(&request(link, CLIENT, &[]))
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_reconcile_and_load_pools() {
        let links = links("2001:db8::10-2001:db8::11", &[]);
        let link = links.get("lan").unwrap();
        let store: Arc<dyn LeaseStore> = Arc::new(MemoryLeaseStore::new());

        let seeded = manager(store.clone());
        seeded
            .create_solicit_binding(&request(link, CLIENT, &[]), true)
            .await
            .unwrap();
        let mut stray = store.find_lease_by_ip(ip("2001:db8::10")).await.unwrap().unwrap();
        stray.ip = ip("2001:db8::99");
        store.insert_lease(&stray).await.unwrap();

        let fresh_links = self::links("2001:db8::10-2001:db8::11", &[]);
        let managers = BindingManagers::new(store.clone(), 100, &PolicyMap::new());
        managers.reconcile(&fresh_links).await.unwrap();
        assert!(store.find_lease_by_ip(ip("2001:db8::99")).await.unwrap().is_none());

        let link = fresh_links.get("lan").unwrap();
        let other = managers
            .get(IaType::Na)
            .create_solicit_binding(&request(link, OTHER, &[]), true)
            .await
            .unwrap();
        assert_eq!(other.objects[0].ip(), ip("2001:db8::11"));
    }
}
