//! Endpoint registry and rotation scheduler.
//!
//! The `Registry` is the single piece of shared mutable state in the balancer:
//! the ordered endpoint pool, the set of indices currently believed dead, the
//! round-robin rotation cursor and the all-down flag all live behind one
//! reader/writer lock. The health monitor and every request handler go through
//! the transition-aware operations here; no raw field is ever exposed, so no
//! reader can observe a partially-applied update.

use parking_lot::RwLock;
use std::collections::HashSet;
use tracing::{info, warn};

use crate::endpoint::Endpoint;
use crate::metrics::{ALL_DOWN, LIVE_ENDPOINTS};

#[derive(Debug)]
struct PoolInner {
    endpoints: Vec<Endpoint>,
    /// Indices currently considered unreachable. Redundant with each
    /// endpoint's `live` flag but kept as a fast-skip structure for rotation.
    dead: HashSet<usize>,
    /// Rotation cursor, always in `[0, endpoints.len())`. Rotation starts
    /// just past this index so consecutive requests cycle through distinct
    /// endpoints instead of re-biasing toward low indices.
    cursor: usize,
    all_down: bool,
}

impl PoolInner {
    fn live_count(&self) -> usize {
        self.endpoints.len() - self.dead.len()
    }

    /// Recounts the dead set and updates the all-down flag. The alert is
    /// re-emitted on every call while the outage persists, which doubles as a
    /// sustained-outage heartbeat in the logs.
    fn recheck_all_down(&mut self) -> bool {
        self.all_down = self.dead.len() == self.endpoints.len();
        if self.all_down {
            warn!("All connections are down");
        }
        ALL_DOWN.set(i64::from(self.all_down));
        self.all_down
    }
}

/// Owns the backend pool and arbitrates all concurrent access to it.
#[derive(Debug)]
pub struct Registry {
    inner: RwLock<PoolInner>,
}

impl Registry {
    /// Builds a registry over a fixed, non-empty pool. The cursor starts at
    /// the last index so the first [`advance`](Self::advance) selects index 0.
    ///
    /// # Panics
    ///
    /// Panics if `endpoints` is empty; configuration validation rejects an
    /// empty pool before this is reached.
    pub fn new(mut endpoints: Vec<Endpoint>) -> Self {
        assert!(!endpoints.is_empty(), "endpoint pool must not be empty");
        // Everything starts live; the startup sweep establishes real state.
        for ep in &mut endpoints {
            ep.live = true;
        }
        let cursor = endpoints.len() - 1;
        LIVE_ENDPOINTS.set(endpoints.len() as i64);
        Self {
            inner: RwLock::new(PoolInner {
                endpoints,
                dead: HashSet::new(),
                cursor,
                all_down: false,
            }),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.read().endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_all_down(&self) -> bool {
        self.inner.read().all_down
    }

    pub fn cursor(&self) -> usize {
        self.inner.read().cursor
    }

    /// Clones endpoint `i` for use outside the lock (address lookup on the
    /// dispatch path, status snapshots).
    pub fn endpoint(&self, i: usize) -> Endpoint {
        self.inner.read().endpoints[i].clone()
    }

    pub fn snapshot(&self) -> Vec<Endpoint> {
        self.inner.read().endpoints.clone()
    }

    /// Marks endpoint `i` live. No-op (including no log line) when it already
    /// is, so repeated successful probes do not spam the log. Returns whether
    /// a Dead→Live transition actually happened.
    pub fn set_live(&self, i: usize) -> bool {
        let mut inner = self.inner.write();
        if inner.endpoints[i].live {
            return false;
        }
        inner.endpoints[i].live = true;
        inner.dead.remove(&i);
        inner.all_down = false;
        ALL_DOWN.set(0);
        LIVE_ENDPOINTS.set(inner.live_count() as i64);
        info!(endpoint = %inner.endpoints[i], index = i, "Endpoint active");
        true
    }

    /// Marks endpoint `i` dead and rechecks the all-down condition.
    /// Symmetric no-op when it is already dead. Returns whether a Live→Dead
    /// transition actually happened.
    pub fn set_dead(&self, i: usize) -> bool {
        let mut inner = self.inner.write();
        if !inner.endpoints[i].live {
            return false;
        }
        inner.endpoints[i].live = false;
        inner.dead.insert(i);
        LIVE_ENDPOINTS.set(inner.live_count() as i64);
        warn!(endpoint = %inner.endpoints[i], index = i, "Endpoint down");
        inner.recheck_all_down();
        true
    }

    /// Recomputes the all-down flag from the dead set and returns it.
    pub fn check_all_down(&self) -> bool {
        self.inner.write().recheck_all_down()
    }

    /// Applies the result of the startup probe sweep without emitting
    /// transition notifications; the sweep prints its own summary.
    pub fn apply_initial(&self, i: usize, live: bool) {
        let mut inner = self.inner.write();
        inner.endpoints[i].live = live;
        if live {
            inner.dead.remove(&i);
        } else {
            inner.dead.insert(i);
        }
        inner.all_down = inner.dead.len() == inner.endpoints.len();
        ALL_DOWN.set(i64::from(inner.all_down));
        LIVE_ENDPOINTS.set(inner.live_count() as i64);
    }

    /// Advances the rotation cursor to the next live endpoint and returns its
    /// index.
    ///
    /// The scan starts at `(cursor + 1) % len` and wraps exactly once,
    /// visiting every slot including the cursor's own, so a pool of one live
    /// endpoint keeps selecting that endpoint. Dead indices are skipped in the
    /// same pass rather than pre-filtered, keeping the cursor's meaning stable
    /// as liveness flips between calls. When every endpoint is dead the cursor
    /// is left unchanged, the all-down recheck fires and `None` is returned.
    pub fn advance(&self) -> Option<usize> {
        let mut inner = self.inner.write();
        let len = inner.endpoints.len();
        for step in 1..=len {
            let candidate = (inner.cursor + step) % len;
            if !inner.dead.contains(&candidate) {
                inner.cursor = candidate;
                return Some(candidate);
            }
        }
        inner.recheck_all_down();
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn pool(n: usize) -> Registry {
        let endpoints = (0..n)
            .map(|i| Endpoint { host: "127.0.0.1".to_string(), port: 9000 + i as u16, live: true })
            .collect();
        Registry::new(endpoints)
    }

    #[test]
    fn rotation_visits_every_index_in_ascending_order() {
        let reg = pool(4);
        let first_cycle: Vec<_> = (0..4).map(|_| reg.advance().unwrap()).collect();
        assert_eq!(first_cycle, vec![0, 1, 2, 3]);
        // Second full cycle repeats the same order.
        let second_cycle: Vec<_> = (0..4).map(|_| reg.advance().unwrap()).collect();
        assert_eq!(second_cycle, vec![0, 1, 2, 3]);
    }

    #[test]
    fn rotation_wraps_past_the_pool_boundary() {
        let reg = pool(3);
        assert_eq!(reg.advance(), Some(0));
        assert_eq!(reg.advance(), Some(1));
        assert_eq!(reg.advance(), Some(2));
        assert_eq!(reg.advance(), Some(0));
    }

    #[test]
    fn dead_endpoint_is_skipped_until_revived() {
        let reg = pool(3);
        assert!(reg.set_dead(1));
        assert_eq!(reg.advance(), Some(0));
        assert_eq!(reg.advance(), Some(2));
        assert_eq!(reg.advance(), Some(0));

        // Revival re-admits index 1 at its original position in the order.
        assert!(reg.set_live(1));
        assert_eq!(reg.advance(), Some(1));
        assert_eq!(reg.advance(), Some(2));
        assert_eq!(reg.advance(), Some(0));
    }

    #[test]
    fn pool_of_one_keeps_selecting_the_same_index() {
        let reg = pool(1);
        assert_eq!(reg.advance(), Some(0));
        assert_eq!(reg.advance(), Some(0));
        reg.set_dead(0);
        assert_eq!(reg.advance(), None);
    }

    #[test]
    fn all_dead_leaves_cursor_unchanged() {
        let reg = pool(3);
        assert_eq!(reg.advance(), Some(0));
        assert_eq!(reg.advance(), Some(1));

        for i in 0..3 {
            reg.set_dead(i);
        }
        assert_eq!(reg.advance(), None);
        assert!(reg.is_all_down());
        assert_eq!(reg.cursor(), 1);

        // After full recovery rotation resumes just past the preserved cursor.
        for i in 0..3 {
            reg.set_live(i);
        }
        assert_eq!(reg.advance(), Some(2));
    }

    #[test]
    fn setters_are_idempotent_and_report_transitions() {
        let reg = pool(2);
        assert!(reg.set_dead(0));
        assert!(!reg.set_dead(0));
        assert!(reg.set_live(0));
        assert!(!reg.set_live(0));
        assert!(!reg.set_live(1));
    }

    #[test]
    fn set_dead_triggers_all_down_and_set_live_clears_it() {
        let reg = pool(2);
        reg.set_dead(0);
        assert!(!reg.is_all_down());
        reg.set_dead(1);
        assert!(reg.is_all_down());
        reg.set_live(0);
        assert!(!reg.is_all_down());
        assert!(!reg.check_all_down());
    }

    #[test]
    fn apply_initial_sets_state_without_transitions() {
        let reg = pool(2);
        reg.apply_initial(0, false);
        reg.apply_initial(1, false);
        assert!(reg.is_all_down());
        assert_eq!(reg.advance(), None);
        reg.apply_initial(1, true);
        assert!(!reg.is_all_down());
        assert_eq!(reg.advance(), Some(1));
    }

    #[test]
    fn concurrent_advance_stays_fair_and_in_range() {
        let reg = Arc::new(pool(4));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let reg = reg.clone();
            handles.push(std::thread::spawn(move || {
                let mut picks = Vec::with_capacity(50);
                for _ in 0..50 {
                    picks.push(reg.advance().unwrap());
                }
                picks
            }));
        }

        let mut counts = [0usize; 4];
        for handle in handles {
            for pick in handle.join().unwrap() {
                assert!(pick < 4);
                counts[pick] += 1;
            }
        }
        // Cursor mutation is serialized by the write lock, so 400 calls over
        // a fully-live pool of 4 select each index exactly 100 times.
        assert_eq!(counts, [100, 100, 100, 100]);
    }

    #[test]
    #[should_panic]
    fn empty_pool_is_rejected() {
        let _ = Registry::new(Vec::new());
    }
}
