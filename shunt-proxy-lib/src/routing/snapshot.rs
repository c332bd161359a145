use ahash::AHashMap;
use std::sync::Arc;
use std::time::Instant;

use crate::config::Backend;
use crate::load_balancing;

/// Immutable point-in-time routing view.
///
/// A snapshot is never changed after construction. Every transition
/// ([`RouteSnapshot::with_override`], [`RouteSnapshot::reset`]) builds a new
/// value, copying the override map, so a reader holding an older
/// `Arc<RouteSnapshot>` keeps seeing exactly what it was handed.
#[derive(Debug, Clone)]
pub struct RouteSnapshot {
    overrides: AHashMap<String, Backend>,
    default_pool: Arc<[Backend]>,
    created_at: Instant,
    generation: u64,
}

/// Where a request should go, and why
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Destination<'a> {
    /// The identity has been flagged; send it to its override
    Override(&'a Backend),
    /// No override; a member of the default pool
    Default(&'a Backend),
}

impl<'a> Destination<'a> {
    pub fn backend(&self) -> &'a Backend {
        match self {
            Destination::Override(b) | Destination::Default(b) => b,
        }
    }

    pub fn is_override(&self) -> bool {
        matches!(self, Destination::Override(_))
    }
}

impl RouteSnapshot {
    /// The startup snapshot: no overrides, default pool only.
    pub fn initial(default_pool: Arc<[Backend]>, now: Instant) -> Self {
        Self { overrides: AHashMap::new(), default_pool, created_at: now, generation: 0 }
    }

    /// A new snapshot with `identity` mapped to `target`, everything else copied.
    pub fn with_override(&self, identity: &str, target: Backend, now: Instant) -> Self {
        let mut overrides = self.overrides.clone();
        overrides.insert(identity.to_string(), target);
        Self {
            overrides,
            default_pool: Arc::clone(&self.default_pool),
            created_at: now,
            generation: self.generation.saturating_add(1),
        }
    }

    /// A new snapshot with every override cleared.
    pub fn reset(&self, now: Instant) -> Self {
        Self {
            overrides: AHashMap::new(),
            default_pool: Arc::clone(&self.default_pool),
            created_at: now,
            generation: self.generation.saturating_add(1),
        }
    }

    pub fn override_for(&self, identity: &str) -> Option<&Backend> {
        self.overrides.get(identity)
    }

    pub fn is_overridden(&self, identity: &str) -> bool {
        self.overrides.contains_key(identity)
    }

    pub fn overrides_len(&self) -> usize {
        self.overrides.len()
    }

    pub fn default_pool(&self) -> &[Backend] {
        &self.default_pool
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Whether this snapshot supersedes `other`.
    pub fn is_newer_than(&self, other: &RouteSnapshot) -> bool {
        self.generation > other.generation
            || (self.generation == other.generation && self.created_at > other.created_at)
    }

    /// Resolve the destination for `identity`.
    ///
    /// An override wins; otherwise `draw` picks from the default pool.
    /// `None` only if the default pool is empty.
    pub fn resolve(&self, identity: &str, draw: u64) -> Option<Destination<'_>> {
        if let Some(target) = self.override_for(identity) {
            return Some(Destination::Override(target));
        }
        self.pick_default(draw).map(Destination::Default)
    }

    /// Pick from the default pool, ignoring overrides.
    pub fn pick_default(&self, draw: u64) -> Option<&Backend> {
        load_balancing::pick(&self.default_pool, draw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn pool() -> Arc<[Backend]> {
        vec![Backend::new("a:1"), Backend::new("b:1"), Backend::new("c:1")].into()
    }

    #[test]
    fn initial_snapshot_has_no_overrides() {
        let snap = RouteSnapshot::initial(pool(), Instant::now());
        assert_eq!(snap.overrides_len(), 0);
        assert_eq!(snap.generation(), 0);
        assert_eq!(snap.default_pool().len(), 3);
    }

    #[test]
    fn with_override_leaves_original_untouched() {
        let t0 = Instant::now();
        let before = RouteSnapshot::initial(pool(), t0);
        let after = before.with_override("123", Backend::new("overflow:1"), t0 + Duration::from_secs(1));

        assert!(!before.is_overridden("123"));
        assert!(after.is_overridden("123"));
        assert!(after.is_newer_than(&before));
        assert!(!before.is_newer_than(&after));
        assert_eq!(after.default_pool(), before.default_pool());
    }

    #[test]
    fn reset_clears_overrides_and_bumps_generation() {
        let t0 = Instant::now();
        let snap = RouteSnapshot::initial(pool(), t0)
            .with_override("1", Backend::new("o:1"), t0)
            .with_override("2", Backend::new("o:1"), t0);
        let reset = snap.reset(t0);
        assert_eq!(snap.overrides_len(), 2);
        assert_eq!(reset.overrides_len(), 0);
        assert_eq!(reset.generation(), 3);
    }

    #[test]
    fn resolve_prefers_override() {
        let t0 = Instant::now();
        let snap = RouteSnapshot::initial(pool(), t0).with_override("123", Backend::new("o:1"), t0);
        assert_eq!(snap.resolve("123", 0), Some(Destination::Override(&Backend::new("o:1"))));
        assert_eq!(snap.resolve("456", 4), Some(Destination::Default(&Backend::new("b:1"))));
    }

    #[test]
    fn resolve_on_empty_pool_is_none() {
        let snap = RouteSnapshot::initial(Vec::<Backend>::new().into(), Instant::now());
        assert!(snap.resolve("x", 7).is_none());
    }
}
