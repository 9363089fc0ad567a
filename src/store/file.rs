use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::{LeaseStore, MemoryLeaseStore};
use crate::binding::{IaKey, IaType};
use crate::error::Result;
use crate::lease::Lease;
use crate::range::Range;

/// Minimum interval between lease file saves (5 seconds).
///
/// Prevents excessive disk I/O when handling many requests. The dirty flag
/// is checked and cleared on each save.
const SAVE_INTERVAL_MILLIS: u64 = 5000;

/// On-disk format of the lease file.
#[derive(Debug, Default, Serialize, Deserialize)]
struct LeaseFile {
    leases: Vec<Lease>,
}

#[derive(Debug)]
struct SaveState {
    /// Whether rows changed since the last save.
    dirty: bool,
    last_save: Instant,
}

/// Store that keeps rows in memory and persists them to a JSON file.
///
/// Writes mark the store dirty and are flushed at most every
/// [`SAVE_INTERVAL_MILLIS`]; [`LeaseStore::save`] flushes immediately when
/// dirty. A failed background flush leaves the rows in memory and the store
/// dirty, so the next save retries it.
#[derive(Debug)]
pub struct JsonFileLeaseStore {
    rows: MemoryLeaseStore,
    path: PathBuf,
    state: Mutex<SaveState>,
    /// Mutex to prevent concurrent file writes.
    save_lock: Mutex<()>,
}

impl JsonFileLeaseStore {
    /// Loads `path` if it exists, otherwise starts empty.
    ///
    /// # Errors
    ///
    /// Returns an error if the lease file exists but cannot be read or parsed.
    pub async fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = if path.exists() {
            let content = tokio::fs::read_to_string(&path).await?;
            serde_json::from_str::<LeaseFile>(&content)?
        } else {
            LeaseFile::default()
        };
        debug!("Loaded {} lease(s) from {}", file.leases.len(), path.display());

        Ok(Self {
            rows: MemoryLeaseStore::with_leases(file.leases),
            path,
            state: Mutex::new(SaveState {
                dirty: false,
                last_save: Instant::now(),
            }),
            save_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn write_file(&self) -> Result<()> {
        let file = LeaseFile {
            leases: self.rows.list_leases().await?,
        };
        let _lock = self.save_lock.lock().await;
        let content = serde_json::to_string_pretty(&file)?;
        tokio::fs::write(&self.path, content).await?;
        Ok(())
    }

    async fn maybe_save(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        state.dirty = true;
        if state.last_save.elapsed().as_millis() < SAVE_INTERVAL_MILLIS as u128 {
            return Ok(());
        }
        state.dirty = false;
        state.last_save = Instant::now();
        drop(state);

        if let Err(error) = self.write_file().await {
            warn!(
                "Failed to write lease file {}, will retry: {}",
                self.path.display(),
                error
            );
            self.state.lock().await.dirty = true;
        }
        Ok(())
    }

    async fn is_dirty(&self) -> bool {
        self.state.lock().await.dirty
    }
}

#[async_trait]
impl LeaseStore for JsonFileLeaseStore {
    async fn insert_lease(&self, lease: &Lease) -> Result<()> {
        self.rows.insert_lease(lease).await?;
        self.maybe_save().await
    }

    async fn update_lease(&self, lease: &Lease) -> Result<()> {
        self.rows.update_lease(lease).await?;
        self.maybe_save().await
    }

    async fn delete_lease(&self, lease: &Lease) -> Result<bool> {
        let removed = self.rows.delete_lease(lease).await?;
        if removed {
            self.maybe_save().await?;
        }
        Ok(removed)
    }

    async fn find_ia_leases(&self, key: &IaKey) -> Result<Vec<Lease>> {
        self.rows.find_ia_leases(key).await
    }

    async fn find_lease_by_ip(&self, ip: IpAddr) -> Result<Option<Lease>> {
        self.rows.find_lease_by_ip(ip).await
    }

    async fn find_existing_leases(&self, range: &Range) -> Result<Vec<Lease>> {
        self.rows.find_existing_leases(range).await
    }

    async fn find_unused_leases(
        &self,
        range: &Range,
        offered_before: DateTime<Utc>,
    ) -> Result<Vec<Lease>> {
        self.rows.find_unused_leases(range, offered_before).await
    }

    async fn find_expired_leases(
        &self,
        ia_type: IaType,
        now: DateTime<Utc>,
    ) -> Result<Vec<Lease>> {
        self.rows.find_expired_leases(ia_type, now).await
    }

    async fn reconcile_leases(&self, ranges: &[Range]) -> Result<usize> {
        let removed = self.rows.reconcile_leases(ranges).await?;
        if removed > 0 {
            self.maybe_save().await?;
        }
        Ok(removed)
    }

    async fn delete_all_leases(&self) -> Result<()> {
        self.rows.delete_all_leases().await?;
        self.maybe_save().await
    }

    async fn list_leases(&self) -> Result<Vec<Lease>> {
        self.rows.list_leases().await
    }

    async fn save(&self) -> Result<()> {
        {
            let mut state = self.state.lock().await;
            if !state.dirty {
                return Ok(());
            }
            state.dirty = false;
            state.last_save = Instant::now();
        }
        if let Err(error) = self.write_file().await {
            self.state.lock().await.dirty = true;
            return Err(error);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binding::LeaseState;
    use chrono::TimeDelta;

    struct TestGuard(String);
    impl Drop for TestGuard {
        fn drop(&mut self) {
            let _ = std::fs::remove_file(&self.0);
        }
    }

    fn lease(ip: &str) -> Lease {
        let now = Utc::now();
        Lease {
            ip: ip.parse().unwrap(),
            prefix_length: 32,
            client_id: vec![1, 0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff],
            ia_type: IaType::V4,
            iaid: 0,
            state: LeaseState::Leased,
            link: "lan".to_string(),
            start_time: now,
            preferred_end_time: now + TimeDelta::seconds(3600),
            valid_end_time: now + TimeDelta::seconds(3600),
            options: vec![],
        }
    }

    #[tokio::test]
    async fn test_lease_persistence() {
        let path = "test_leases_store_persist.json".to_string();
        let _guard = TestGuard(path.clone());

        {
            let store = JsonFileLeaseStore::open(&path).await.unwrap();
            store.insert_lease(&lease("192.168.1.100")).await.unwrap();
            store.save().await.unwrap();
        }

        {
            let store = JsonFileLeaseStore::open(&path).await.unwrap();
            let found = store
                .find_lease_by_ip("192.168.1.100".parse().unwrap())
                .await
                .unwrap()
                .unwrap();
            assert_eq!(found.client_id, vec![1, 0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]);
            assert_eq!(found.state, LeaseState::Leased);
        }
    }

    #[tokio::test]
    async fn test_failed_flush_keeps_row_and_stays_dirty() {
        let store = JsonFileLeaseStore::open("/nonexistent_lease_dir/leases.json")
            .await
            .unwrap();
        if let Some(past) = Instant::now().checked_sub(std::time::Duration::from_secs(10)) {
            store.state.lock().await.last_save = past;
        }

        store.insert_lease(&lease("192.168.1.100")).await.unwrap();
        assert!(store
            .find_lease_by_ip("192.168.1.100".parse().unwrap())
            .await
            .unwrap()
            .is_some());
        assert!(store.is_dirty().await);

        assert!(store.save().await.is_err());
        assert!(store.is_dirty().await);
    }

    #[tokio::test]
    async fn test_save_skips_clean_store() {
        let path = "test_leases_store_clean.json".to_string();
        let _guard = TestGuard(path.clone());
        let store = JsonFileLeaseStore::open(&path).await.unwrap();
        store.save().await.unwrap();
        assert!(!store.path().exists());

        store.insert_lease(&lease("192.168.1.100")).await.unwrap();
        store.save().await.unwrap();
        assert!(store.path().exists());
        assert!(!store.is_dirty().await);
    }

    #[tokio::test]
    async fn test_missing_file_starts_empty() {
        let store = JsonFileLeaseStore::open("test_leases_store_missing.json")
            .await
            .unwrap();
        assert!(store.list_leases().await.unwrap().is_empty());
        assert!(!store.path().exists());
    }

    #[tokio::test]
    async fn test_corrupt_file_is_rejected() {
        let path = "test_leases_store_corrupt.json".to_string();
        let _guard = TestGuard(path.clone());
        std::fs::write(&path, "{ not json").unwrap();
        assert!(JsonFileLeaseStore::open(&path).await.is_err());
    }
}
