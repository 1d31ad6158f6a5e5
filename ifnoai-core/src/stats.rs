//! Interception statistics shared between connection handlers and readers.
//!
//! A single lock guards both the total and the per-domain map so a reader
//! never sees one updated without the other.

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;

/// Point-in-time copy of the interception counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    /// Total number of intercepted connections
    pub total: u64,
    /// Intercepted connections per domain label; values sum to `total`
    pub domain_counts: HashMap<String, u64>,
}

impl StatsSnapshot {
    /// Up to `n` domains ordered by hit count, highest first. Ties are broken
    /// alphabetically so the order is stable between snapshots.
    pub fn top_domains(&self, n: usize) -> Vec<(String, u64)> {
        let mut domains: Vec<(String, u64)> = self
            .domain_counts
            .iter()
            .map(|(domain, count)| (domain.clone(), *count))
            .collect();
        domains.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        domains.truncate(n);
        domains
    }
}

/// Accumulates hits for the lifetime of a server instance.
#[derive(Debug, Default)]
pub struct StatsStore {
    inner: Mutex<StatsSnapshot>,
}

impl StatsStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one intercepted connection for `domain`.
    pub fn record_hit(&self, domain: &str) {
        let mut stats = self.inner.lock();
        stats.total += 1;
        match stats.domain_counts.get_mut(domain) {
            Some(count) => *count += 1,
            None => {
                stats.domain_counts.insert(domain.to_string(), 1);
            }
        }
    }

    /// Consistent copy of the counters; the lock is held only for the clone.
    pub fn snapshot(&self) -> StatsSnapshot {
        self.inner.lock().clone()
    }

    pub fn total(&self) -> u64 {
        self.inner.lock().total
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_record_hit() {
        let store = StatsStore::new();
        store.record_hit("chat.openai.com");
        store.record_hit("chat.openai.com");
        store.record_hit("claude.ai");

        let snapshot = store.snapshot();
        assert_eq!(snapshot.total, 3);
        assert_eq!(snapshot.domain_counts["chat.openai.com"], 2);
        assert_eq!(snapshot.domain_counts["claude.ai"], 1);
        assert_eq!(store.total(), 3);
    }

    #[test]
    fn test_snapshot_is_independent() {
        let store = StatsStore::new();
        store.record_hit("a.com");
        let before = store.snapshot();
        store.record_hit("b.com");

        assert_eq!(before.total, 1);
        assert!(!before.domain_counts.contains_key("b.com"));
        assert_eq!(store.snapshot().total, 2);
    }

    #[test]
    fn test_concurrent_hits_sum_to_total() {
        let store = Arc::new(StatsStore::new());
        let threads: Vec<_> = (0..8)
            .map(|t| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    for i in 0..500 {
                        store.record_hit(&format!("domain-{}.com", (t * i) % 13));
                    }
                })
            })
            .collect();

        // Readers running alongside writers must always see a consistent view
        let reader = {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                for _ in 0..200 {
                    let snapshot = store.snapshot();
                    assert_eq!(snapshot.domain_counts.values().sum::<u64>(), snapshot.total);
                }
            })
        };

        for t in threads {
            t.join().unwrap();
        }
        reader.join().unwrap();

        let snapshot = store.snapshot();
        assert_eq!(snapshot.total, 4000);
        assert_eq!(snapshot.domain_counts.values().sum::<u64>(), 4000);
    }

    #[test]
    fn test_top_domains() {
        let store = StatsStore::new();
        for _ in 0..3 {
            store.record_hit("chat.openai.com");
        }
        store.record_hit("claude.ai");
        store.record_hit("bard.google.com");
        for _ in 0..2 {
            store.record_hit("Encrypted AI Service");
        }

        let top = store.snapshot().top_domains(3);
        assert_eq!(
            top,
            vec![
                ("chat.openai.com".to_string(), 3),
                ("Encrypted AI Service".to_string(), 2),
                ("bard.google.com".to_string(), 1),
            ]
        );
    }

    #[test]
    fn test_empty_snapshot() {
        let snapshot = StatsStore::new().snapshot();
        assert_eq!(snapshot, StatsSnapshot::default());
        assert!(snapshot.top_domains(10).is_empty());
    }
}
