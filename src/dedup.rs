//! Suppression of retransmitted client messages.
//!
//! Raw messages are remembered for a policy-configured window, which may
//! differ per link or filter. Expired entries are pruned lazily from the
//! oldest end whenever the set is touched, so no timer task is needed per
//! message.

use std::num::NonZeroUsize;
use std::time::Duration;

use lru::LruCache;
use parking_lot::Mutex;
use tokio::time::Instant;

/// Upper bound on remembered messages per family.
pub const DEFAULT_RECENT_MESSAGES: usize = 10_000;

#[derive(Debug)]
pub struct RecentMessages {
    /// Raw message -> expiry; `None` never expires on its own.
    entries: Mutex<LruCache<Vec<u8>, Option<Instant>>>,
}

impl RecentMessages {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Records `message` for `window`; a zero window keeps it until it is
    /// removed or evicted. Returns `false` if an unexpired copy is already
    /// present, i.e. the message is a retransmission to drop.
    pub fn insert(&self, message: &[u8], window: Duration) -> bool {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        Self::prune(&mut entries, now);
        if entries
            .peek(message)
            .is_some_and(|expiry| !is_expired(*expiry, now))
        {
            return false;
        }
        let expiry = (!window.is_zero()).then(|| now + window);
        entries.put(message.to_vec(), expiry);
        true
    }

    pub fn remove(&self, message: &[u8]) {
        self.entries.lock().pop(message);
    }

    /// Number of unexpired entries.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        let entries = self.entries.lock();
        entries
            .iter()
            .filter(|(_, expiry)| !is_expired(**expiry, now))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops expired entries from the least recently inserted end, stopping
    /// at the first live one.
    fn prune(entries: &mut LruCache<Vec<u8>, Option<Instant>>, now: Instant) {
        while entries
            .peek_lru()
            .is_some_and(|(_, expiry)| is_expired(*expiry, now))
        {
            entries.pop_lru();
        }
    }
}

fn is_expired(expiry: Option<Instant>, now: Instant) -> bool {
    expiry.is_some_and(|expiry| expiry <= now)
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_millis(5000);

    #[tokio::test(start_paused = true)]
    async fn test_retransmission_suppressed_within_window() {
        let recent = RecentMessages::new(16);
        assert!(recent.insert(b"solicit", WINDOW));
        assert!(!recent.insert(b"solicit", WINDOW));
        assert!(recent.insert(b"other", WINDOW));

        tokio::time::advance(Duration::from_millis(5001)).await;
        assert!(recent.insert(b"solicit", WINDOW));
        assert_eq!(recent.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_window_keeps_until_removed() {
        let recent = RecentMessages::new(16);
        assert!(recent.insert(b"request", Duration::ZERO));
        tokio::time::advance(Duration::from_secs(3600)).await;
        assert!(!recent.insert(b"request", Duration::ZERO));
        recent.remove(b"request");
        assert!(recent.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_short_window_expires_behind_longer_one() {
        let recent = RecentMessages::new(16);
        assert!(recent.insert(b"long", Duration::from_secs(10)));
        assert!(recent.insert(b"short", Duration::from_secs(1)));

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(recent.len(), 1);
        assert!(recent.insert(b"short", Duration::from_secs(1)));
        assert!(!recent.insert(b"long", Duration::from_secs(10)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_prune_stops_at_first_live_entry() {
        let recent = RecentMessages::new(16);
        recent.insert(b"a", Duration::from_secs(1));
        recent.insert(b"b", Duration::from_secs(1));
        recent.insert(b"c", Duration::from_secs(60));

        tokio::time::advance(Duration::from_secs(2)).await;
        recent.insert(b"d", Duration::from_secs(60));
        assert_eq!(recent.entries.lock().len(), 2);
    }

    #[test]
    fn test_capacity_bounds_entries() {
        let recent = RecentMessages::new(2);
        recent.insert(b"a", WINDOW);
        recent.insert(b"b", WINDOW);
        recent.insert(b"c", WINDOW);
        assert_eq!(recent.len(), 2);
        assert!(recent.insert(b"a", WINDOW));
    }
}
