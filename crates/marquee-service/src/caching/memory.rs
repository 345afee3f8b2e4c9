use lru::LruCache;

use crate::config::InMemoryCacheConfig;

use super::CacheKey;

/// An item held in a [`BoundedCache`], along with its cost.
#[derive(Debug)]
struct CostedItem<V> {
    value: V,
    cost: u64,
}

/// An in-memory cache bounded by both the number of items and their total cost.
///
/// Inserting an item evicts the least recently used items until both limits hold again. An item
/// that could never fit (its own cost exceeds the cost limit, or the count limit is zero) is
/// refused, leaving the cache untouched.
///
/// The cache itself does no synchronization, owners wrap it in a lock.
pub struct BoundedCache<V> {
    items: LruCache<CacheKey, CostedItem<V>>,
    total_cost: u64,
    count_limit: usize,
    cost_limit: u64,
}

impl<V> std::fmt::Debug for BoundedCache<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundedCache")
            .field("items", &self.items.len())
            .field("total_cost", &self.total_cost)
            .field("count_limit", &self.count_limit)
            .field("cost_limit", &self.cost_limit)
            .finish()
    }
}

impl<V: Clone> BoundedCache<V> {
    pub fn new(count_limit: usize, cost_limit: u64) -> Self {
        Self {
            // Capacity is enforced manually below, as it also depends on the cost.
            items: LruCache::unbounded(),
            total_cost: 0,
            count_limit,
            cost_limit,
        }
    }

    pub fn from_config(config: &InMemoryCacheConfig) -> Self {
        Self::new(config.decoded_count_limit, config.decoded_cost_limit)
    }

    /// Returns the item for `key`, marking it as most recently used.
    pub fn get(&mut self, key: &str) -> Option<V> {
        self.items.get(key).map(|item| item.value.clone())
    }

    /// Returns the item for `key` without changing its recency.
    pub fn peek(&self, key: &str) -> Option<V> {
        self.items.peek(key).map(|item| item.value.clone())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.items.contains(key)
    }

    /// Inserts or replaces the item for `key`.
    ///
    /// Returns `true` if the item is resident afterwards, and `false` if it was refused.
    pub fn put(&mut self, key: CacheKey, value: V, cost: u64) -> bool {
        if self.count_limit == 0 || cost > self.cost_limit {
            tracing::warn!(
                key = %key,
                cost,
                cost_limit = self.cost_limit,
                "Refusing to cache item exceeding the cache limits",
            );
            metric!(counter("images.memory.refused") += 1);
            return false;
        }

        if let Some(replaced) = self.items.pop(key.as_str()) {
            self.total_cost -= replaced.cost;
        }

        let mut evicted: i64 = 0;
        while self.items.len() >= self.count_limit || self.total_cost + cost > self.cost_limit {
            match self.items.pop_lru() {
                Some((evicted_key, item)) => {
                    tracing::trace!("Evicting `{evicted_key}` from memory");
                    self.total_cost -= item.cost;
                    evicted += 1;
                }
                None => break,
            }
        }
        if evicted > 0 {
            metric!(counter("images.memory.evicted") += evicted);
        }

        self.items.put(key, CostedItem { value, cost });
        self.total_cost += cost;
        metric!(gauge("images.memory.cost") = self.total_cost);

        true
    }

    /// Removes the item for `key`, returning it if it was resident.
    pub fn remove(&mut self, key: &str) -> Option<V> {
        let item = self.items.pop(key)?;
        self.total_cost -= item.cost;
        Some(item.value)
    }

    pub fn clear(&mut self) {
        self.items.clear();
        self.total_cost = 0;
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// The sum of the costs of all resident items.
    pub fn total_cost(&self) -> u64 {
        self.total_cost
    }
}
