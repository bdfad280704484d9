//! A stack of bounded, per-endpoint entity caches.

use std::collections::VecDeque;

use super::Entity;
use crate::prelude::*;

/// A first-in, first-out cache of entities of one type. A `max_size` of 0
/// means unbounded.
#[derive(Debug)]
struct FifoCache {
    max_size: usize,
    entries: HashMap<i64, Entity>,
    order: VecDeque<i64>,
}

impl FifoCache {
    fn new(max_size: usize) -> FifoCache {
        FifoCache {
            max_size,
            entries: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    fn get(&self, id: i64) -> Option<&Entity> {
        self.entries.get(&id)
    }

    fn put(&mut self, entity: Entity) {
        let id = entity.id();
        if self.entries.insert(id, entity).is_none() {
            self.order.push_back(id);
        }
        while self.max_size > 0 && self.order.len() > self.max_size {
            if let Some(oldest) = self.order.pop_front() {
                self.entries.remove(&oldest);
            }
        }
    }
}

/// One level of the stack: caches for the endpoints it was configured with.
#[derive(Debug)]
struct CacheLevel {
    caches: BTreeMap<String, FifoCache>,
}

/// Caches are looked up from the most recently pushed level downwards, and
/// entities are stored into every level which caches their endpoint, so
/// nesting levels never loses hits.
#[derive(Debug, Default)]
pub(crate) struct CacheStack {
    levels: Vec<CacheLevel>,
}

impl CacheStack {
    /// Push a level caching the specified endpoints.
    pub(crate) fn push(&mut self, endpoints: &[&str], max_size: usize) {
        debug!("enabling entity cache for {:?} (max_size {})", endpoints, max_size);
        let caches = endpoints
            .iter()
            .map(|e| (e.to_ascii_lowercase(), FifoCache::new(max_size)))
            .collect();
        self.levels.push(CacheLevel { caches });
    }

    /// Discard the most recently pushed level.
    pub(crate) fn pop(&mut self) {
        self.levels.pop();
    }

    pub(crate) fn get(&self, endpoint: &str, id: i64) -> Option<Entity> {
        let hit = self
            .levels
            .iter()
            .rev()
            .filter_map(|level| level.caches.get(endpoint))
            .find_map(|cache| cache.get(id))
            .cloned();
        if self.levels.iter().any(|level| level.caches.contains_key(endpoint)) {
            trace!(
                "cache {} for {}/{}",
                if hit.is_some() { "hit" } else { "miss" },
                endpoint,
                id
            );
        }
        hit
    }

    pub(crate) fn put(&mut self, endpoint: &str, entity: &Entity) {
        for level in self.levels.iter_mut().rev() {
            if let Some(cache) = level.caches.get_mut(endpoint) {
                cache.put(entity.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entity(id: i64) -> Entity {
        Entity::from_json("resource", json!({"id": id})).unwrap()
    }

    #[test]
    fn fifo_evicts_oldest() {
        let mut stack = CacheStack::default();
        stack.push(&["resource"], 2);
        for id in 1..=3 {
            stack.put("resource", &entity(id));
        }
        assert!(stack.get("resource", 1).is_none());
        assert!(stack.get("resource", 2).is_some());
        assert!(stack.get("resource", 3).is_some());
    }

    #[test]
    fn nested_levels_keep_hits_after_pop() {
        let mut stack = CacheStack::default();
        stack.push(&["resource"], 0);
        stack.push(&["Resource", "storage"], 0);
        stack.put("resource", &entity(5));
        stack.pop();
        assert!(stack.get("resource", 5).is_some());
        stack.pop();
        assert!(stack.get("resource", 5).is_none());
    }

    #[test]
    fn uncached_endpoints_are_ignored() {
        let mut stack = CacheStack::default();
        stack.push(&["storage"], 0);
        stack.put("resource", &entity(1));
        assert!(stack.get("resource", 1).is_none());
    }
}
