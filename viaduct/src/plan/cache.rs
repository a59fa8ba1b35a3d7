//! The bounded, shared cache of built query plans.

use std::{
    num::NonZeroUsize,
    sync::{Arc, Mutex},
};

use lru::LruCache;

use super::{PlanError, QueryPlan};

/// What makes two plans interchangeable: the exact selection text against the
/// exact schema build, under the same access-check placement. Variable
/// _values_ are deliberately absent; arguments are coerced at execution time.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct PlanCacheKey {
    pub schema_digest: u64,
    pub selection_text: String,
    pub execute_access_checks_in_modstrat: bool,
}

/// A bounded LRU of [`QueryPlan`]s.
///
/// Values are handed out as [`Arc`]s: eviction drops the cache's reference
/// only, so a plan referenced by an in-flight request stays alive for as long
/// as that request runs.
pub struct PlanCache {
    inner: Mutex<LruCache<PlanCacheKey, Arc<QueryPlan>>>,
}

impl PlanCache {
    /// Creates a cache bounded to `capacity` plans.
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).expect("non-zero capacity");
        Self {
            inner: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Returns the cached plan for `key`, building and inserting it on miss.
    pub fn get_or_build<F>(
        &self,
        key: PlanCacheKey,
        build: F,
    ) -> Result<Arc<QueryPlan>, PlanError>
    where
        F: FnOnce() -> Result<Arc<QueryPlan>, PlanError>,
    {
        if let Some(plan) = self.inner.lock().expect("plan cache poisoned").get(&key) {
            tracing::trace!(digest = key.schema_digest, "query plan cache hit");
            return Ok(Arc::clone(plan));
        }

        // Built outside the lock: planning can be slow and concurrent misses
        // for the same key are harmless (last insert wins).
        let plan = build()?;
        tracing::debug!(
            digest = key.schema_digest,
            steps = plan.steps.len(),
            "query plan built",
        );
        self.inner
            .lock()
            .expect("plan cache poisoned")
            .put(key, Arc::clone(&plan));
        Ok(plan)
    }

    /// Number of currently cached plans.
    pub fn len(&self) -> usize {
        self.inner.lock().expect("plan cache poisoned").len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::plan::{PlanOperation, QueryPlan};

    use super::{PlanCache, PlanCacheKey};

    fn key(text: &str) -> PlanCacheKey {
        PlanCacheKey {
            schema_digest: 7,
            selection_text: text.into(),
            execute_access_checks_in_modstrat: false,
        }
    }

    fn empty_plan() -> Arc<QueryPlan> {
        Arc::new(QueryPlan {
            root_type: "Query".into(),
            operation: PlanOperation::Query,
            steps: Vec::new(),
            is_root_query_plan: true,
        })
    }

    #[test]
    fn hits_do_not_rebuild() {
        let cache = PlanCache::new(8);
        let first = cache.get_or_build(key("{ a }"), || Ok(empty_plan())).unwrap();
        let second = cache
            .get_or_build(key("{ a }"), || panic!("must not rebuild"))
            .unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn evicted_plans_survive_through_their_arcs() {
        let cache = PlanCache::new(1);
        let pinned = cache.get_or_build(key("{ a }"), || Ok(empty_plan())).unwrap();
        cache.get_or_build(key("{ b }"), || Ok(empty_plan())).unwrap();
        assert_eq!(cache.len(), 1);
        // `{ a }` was evicted, but the in-flight reference still works.
        assert_eq!(pinned.root_type, "Query");
    }

    #[test]
    fn modstrat_flag_partitions_the_key_space() {
        let cache = PlanCache::new(8);
        let mut with_flag = key("{ a }");
        with_flag.execute_access_checks_in_modstrat = true;
        cache.get_or_build(key("{ a }"), || Ok(empty_plan())).unwrap();
        let built = std::cell::Cell::new(false);
        cache
            .get_or_build(with_flag, || {
                built.set(true);
                Ok(empty_plan())
            })
            .unwrap();
        assert!(built.get());
    }
}
