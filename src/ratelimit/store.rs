//! Per-key state storage shared by all limiter algorithms.

use std::time::Duration;

use dashmap::DashMap;

use super::clock::Clock;

/// A stored state together with the last time it was touched.
struct Slot<S> {
    state: S,
    touched: Duration,
    /// The state carries no history past this instant
    expires: Duration,
}

impl<S> Slot<S> {
    fn touch(&mut self, now: Duration, hold: Duration) {
        self.touched = now;
        self.expires = self.expires.max(now.saturating_add(hold));
    }
}

/// Sharded map from client key to algorithm state.
///
/// Each shard has its own lock, so a read-modify-write on one key only
/// blocks keys hashed to the same shard.
pub(crate) struct KeyStore<S> {
    slots: DashMap<String, Slot<S>>,
}

impl<S> KeyStore<S> {
    pub(crate) fn new() -> Self {
        Self {
            slots: DashMap::new(),
        }
    }

    /// Run `f` on the state for `key` while holding its shard lock,
    /// creating the state with `init` on first use.
    ///
    /// The clock is read under the lock and never earlier than the key's
    /// last touch, so per key time only moves forward. `hold` is how long
    /// the state stays meaningful after this call; eviction waits for it.
    pub(crate) fn with_state<R>(
        &self,
        key: &str,
        clock: &dyn Clock,
        hold: Duration,
        init: impl FnOnce(Duration) -> S,
        f: impl FnOnce(&mut S, Duration) -> R,
    ) -> R {
        if let Some(mut slot) = self.slots.get_mut(key) {
            let now = clock.now().max(slot.touched);
            slot.touch(now, hold);
            return f(&mut slot.state, now);
        }

        let entry = self.slots.entry(key.to_string());
        let now = clock.now();
        let mut slot = entry.or_insert_with(|| Slot {
            state: init(now),
            touched: now,
            expires: now,
        });
        let now = now.max(slot.touched);
        slot.touch(now, hold);
        f(&mut slot.state, now)
    }

    /// Read the state for `key` without creating it.
    pub(crate) fn inspect<R>(&self, key: &str, f: impl FnOnce(&S) -> R) -> Option<R> {
        self.slots.get(key).map(|slot| f(&slot.state))
    }

    pub(crate) fn remove(&self, key: &str) -> bool {
        self.slots.remove(key).is_some()
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }

    /// Drop every key not touched within `idle_ttl` of `now` whose state
    /// has also expired.
    ///
    /// Returns the number of keys evicted.
    pub(crate) fn evict_idle(&self, now: Duration, idle_ttl: Duration) -> usize {
        let mut evicted = 0;
        self.slots.retain(|_, slot| {
            let idle = now.saturating_sub(slot.touched) >= idle_ttl;
            let keep = !idle || now < slot.expires;
            if !keep {
                evicted += 1;
            }
            keep
        });
        evicted
    }
}
