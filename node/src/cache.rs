//! Bounded LRU caches in front of the daemon.
//!
//! Content-addressed caches are keyed by a block or transaction hash and
//! never go stale. State caches project the chain at the current tip and
//! are flushed together whenever the tip moves.

use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

use lru::LruCache;
use zipcore_rpc::responses::AddressBalance;
use zipcore_rpc::responses::AddressUtxo;
use zipcore_types::Block;

use crate::metrics::ServiceMetrics;
use crate::model::{
    AddressSummary, BlockHeaderInfo, BlockOverview, DecodedTransaction, DetailedTransaction,
    MasternodeEntry,
};

/// A named, thread-safe LRU map from string keys to cloneable values.
pub struct Cache<V> {
    name: &'static str,
    inner: Mutex<LruCache<String, V>>,
    metrics: Arc<ServiceMetrics>,
}

impl<V: Clone> Cache<V> {
    pub fn new(name: &'static str, capacity: usize, metrics: Arc<ServiceMetrics>) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            name,
            inner: Mutex::new(LruCache::new(capacity)),
            metrics,
        }
    }

    pub fn get(&self, key: &str) -> Option<V> {
        let hit = self.inner.lock().ok().and_then(|mut c| c.get(key).cloned());
        let counter = if hit.is_some() {
            &self.metrics.cache_hits
        } else {
            &self.metrics.cache_misses
        };
        counter.with_label_values(&[self.name]).inc();
        hit
    }

    pub fn put(&self, key: impl Into<String>, value: V) {
        if let Ok(mut c) = self.inner.lock() {
            c.put(key.into(), value);
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.inner.lock().map(|c| c.contains(key)).unwrap_or(false)
    }

    pub fn clear(&self) {
        if let Ok(mut c) = self.inner.lock() {
            c.clear();
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map(|c| c.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

/// Every cache the service keeps.
pub struct CacheSet {
    // state projections, flushed on tip change
    pub utxos: Cache<Vec<AddressUtxo>>,
    pub txids: Cache<Vec<String>>,
    pub balance: Cache<AddressBalance>,
    pub summary: Cache<AddressSummary>,
    pub block_overview: Cache<BlockOverview>,
    pub transaction_detailed: Cache<DetailedTransaction>,
    pub masternode_list: Cache<Vec<MasternodeEntry>>,

    // content-addressed
    pub transaction: Cache<DecodedTransaction>,
    pub raw_transaction: Cache<Vec<u8>>,
    pub block: Cache<Arc<Block>>,
    pub raw_block: Cache<Vec<u8>>,
    pub block_header: Cache<BlockHeaderInfo>,
}

impl CacheSet {
    pub fn new(metrics: Arc<ServiceMetrics>) -> Self {
        let m = || metrics.clone();
        Self {
            utxos: Cache::new("utxos", 50_000, m()),
            txids: Cache::new("txids", 50_000, m()),
            balance: Cache::new("balance", 50_000, m()),
            summary: Cache::new("summary", 50_000, m()),
            block_overview: Cache::new("block_overview", 144, m()),
            transaction_detailed: Cache::new("transaction_detailed", 100_000, m()),
            masternode_list: Cache::new("masternode_list", 1, m()),
            transaction: Cache::new("transaction", 100_000, m()),
            raw_transaction: Cache::new("raw_transaction", 50_000, m()),
            block: Cache::new("block", 144, m()),
            raw_block: Cache::new("raw_block", 72, m()),
            block_header: Cache::new("block_header", 288, m()),
        }
    }

    /// Flush the state projections. Content caches are left alone.
    pub fn reset(&self) {
        self.utxos.clear();
        self.txids.clear();
        self.balance.clear();
        self.summary.clear();
        self.block_overview.clear();
        self.transaction_detailed.clear();
        self.masternode_list.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metrics() -> Arc<ServiceMetrics> {
        Arc::new(ServiceMetrics::new().unwrap())
    }

    #[test]
    fn evicts_least_recently_used() {
        let cache: Cache<u32> = Cache::new("test", 2, metrics());
        cache.put("a", 1);
        cache.put("b", 2);
        assert_eq!(cache.get("a"), Some(1)); // a is now most recent
        cache.put("c", 3);
        assert_eq!(cache.get("b"), None);
        assert_eq!(cache.get("a"), Some(1));
        assert_eq!(cache.get("c"), Some(3));
    }

    #[test]
    fn zero_capacity_holds_one() {
        let cache: Cache<u32> = Cache::new("test", 0, metrics());
        cache.put("a", 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn counts_hits_and_misses() {
        let m = metrics();
        let cache: Cache<u32> = Cache::new("raw_block", 4, m.clone());
        cache.get("x");
        cache.put("x", 1);
        cache.get("x");
        cache.get("x");
        assert_eq!(m.cache_hits.with_label_values(&["raw_block"]).get(), 2);
        assert_eq!(m.cache_misses.with_label_values(&["raw_block"]).get(), 1);
    }

    #[test]
    fn reset_flushes_state_caches_only() {
        let caches = CacheSet::new(metrics());
        caches.txids.put("addr", vec!["t1".to_string()]);
        caches.balance.put("addr", AddressBalance { balance: 1, received: 2 });
        caches.summary.put("addr", AddressSummary::default());
        caches.transaction_detailed.put("t1", DetailedTransaction::default());
        caches.utxos.put("addr", vec![]);
        caches.masternode_list.put("list", vec![]);
        caches.raw_transaction.put("t1", vec![1, 2, 3]);
        caches.raw_block.put("b1", vec![4]);

        caches.reset();

        assert!(caches.txids.is_empty());
        assert!(caches.balance.is_empty());
        assert!(caches.summary.is_empty());
        assert!(caches.transaction_detailed.is_empty());
        assert!(caches.utxos.is_empty());
        assert!(caches.masternode_list.is_empty());
        assert!(caches.raw_transaction.contains("t1"));
        assert!(caches.raw_block.contains("b1"));
    }
}
