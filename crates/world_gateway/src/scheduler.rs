//! Tick-counted deferred world mutations.
//!
//! Each entry lives at one key with a countdown. `tick_with` decrements every
//! countdown, then resolves and removes the entries that reached zero in the
//! same pass.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::hash::Hash;
use std::str::FromStr;
use tracing::{debug, warn};

use super::types::{DimensionPos, WorldTick};
use super::world::{WorldAccess, WorldContent};

/// What `schedule` does when the key already has a pending entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReschedulePolicy {
    /// Replace snapshot and countdown with the newer request.
    #[default]
    LastWins,
    /// Keep the pending snapshot and countdown; drop the newer request.
    KeepEarliest,
}

impl ReschedulePolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            ReschedulePolicy::LastWins => "last_wins",
            ReschedulePolicy::KeepEarliest => "keep_earliest",
        }
    }
}

impl fmt::Display for ReschedulePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReschedulePolicy {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "last_wins" => Ok(ReschedulePolicy::LastWins),
            "keep_earliest" => Ok(ReschedulePolicy::KeepEarliest),
            _ => Err(format!("unknown reschedule policy: {raw}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScheduleOutcome<K> {
    Scheduled,
    Replaced,
    KeptExisting,
    /// Scheduled after evicting the oldest pending entry at the ceiling.
    ScheduledEvicting(K),
}

#[derive(Debug, Clone)]
struct PendingMutation<S> {
    snapshot: S,
    ticks_remaining: WorldTick,
    seq: u64,
}

#[derive(Debug, Clone)]
pub struct DelayedMutationScheduler<K, S> {
    pending: HashMap<K, PendingMutation<S>>,
    /// Insertion sequence -> key, oldest first.
    order: BTreeMap<u64, K>,
    next_seq: u64,
    max_pending: usize,
    policy: ReschedulePolicy,
}

impl<K, S> DelayedMutationScheduler<K, S>
where
    K: Clone + Eq + Hash + fmt::Debug,
{
    pub fn new(max_pending: usize, policy: ReschedulePolicy) -> Self {
        Self {
            pending: HashMap::new(),
            order: BTreeMap::new(),
            next_seq: 0,
            max_pending: max_pending.max(1),
            policy,
        }
    }

    pub fn policy(&self) -> ReschedulePolicy {
        self.policy
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn contains(&self, key: &K) -> bool {
        self.pending.contains_key(key)
    }

    pub fn ticks_remaining(&self, key: &K) -> Option<WorldTick> {
        self.pending.get(key).map(|entry| entry.ticks_remaining)
    }

    /// A delay of zero resolves on the next tick.
    pub fn schedule(&mut self, key: K, snapshot: S, delay_ticks: WorldTick) -> ScheduleOutcome<K> {
        let ticks_remaining = delay_ticks.max(1);
        if let Some(existing) = self.pending.get(&key) {
            if self.policy == ReschedulePolicy::KeepEarliest {
                debug!(?key, "restoration already pending; keeping earliest");
                return ScheduleOutcome::KeptExisting;
            }
            let old_seq = existing.seq;
            self.order.remove(&old_seq);
            self.insert(key, snapshot, ticks_remaining);
            return ScheduleOutcome::Replaced;
        }

        let evicted = if self.pending.len() >= self.max_pending {
            self.evict_oldest()
        } else {
            None
        };
        self.insert(key, snapshot, ticks_remaining);
        match evicted {
            Some(evicted) => ScheduleOutcome::ScheduledEvicting(evicted),
            None => ScheduleOutcome::Scheduled,
        }
    }

    /// Advances every countdown by one and hands each expired entry to
    /// `resolve`. Returns how many entries resolved.
    pub fn tick_with<F>(&mut self, mut resolve: F) -> usize
    where
        F: FnMut(K, S),
    {
        let mut expired = Vec::new();
        for (key, entry) in self.pending.iter_mut() {
            entry.ticks_remaining = entry.ticks_remaining.saturating_sub(1);
            if entry.ticks_remaining == 0 {
                expired.push((entry.seq, key.clone()));
            }
        }
        // Resolve in scheduling order so the outcome does not depend on hash order.
        expired.sort_by_key(|(seq, _)| *seq);

        let resolved = expired.len();
        for (seq, key) in expired {
            self.order.remove(&seq);
            if let Some(entry) = self.pending.remove(&key) {
                resolve(key, entry.snapshot);
            }
        }
        resolved
    }

    fn insert(&mut self, key: K, snapshot: S, ticks_remaining: WorldTick) {
        let seq = self.next_seq;
        self.next_seq = self.next_seq.saturating_add(1);
        self.order.insert(seq, key.clone());
        self.pending.insert(
            key,
            PendingMutation {
                snapshot,
                ticks_remaining,
                seq,
            },
        );
    }

    fn evict_oldest(&mut self) -> Option<K> {
        let (_, key) = self.order.pop_first()?;
        self.pending.remove(&key);
        warn!(
            ?key,
            max_pending = self.max_pending,
            "delayed mutation ceiling reached; dropped oldest pending entry"
        );
        Some(key)
    }
}

// ============================================================================
// World content restoration
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreOutcome {
    AlreadyPresent,
    Placed,
    ClearedThenPlaced,
}

/// Writes `snapshot` back at `location`. Any different occupant is cleared
/// silently first so its side state goes through the clear path instead of
/// being overwritten.
pub fn restore_content<W>(
    world: &mut W,
    location: &DimensionPos,
    snapshot: WorldContent,
) -> RestoreOutcome
where
    W: WorldAccess + ?Sized,
{
    let current = world.content_at(&location.dimension, location.pos);
    if current == snapshot {
        return RestoreOutcome::AlreadyPresent;
    }
    let outcome = if current.is_empty() {
        RestoreOutcome::Placed
    } else {
        world.clear_silently(&location.dimension, location.pos);
        RestoreOutcome::ClearedThenPlaced
    };
    world.place(&location.dimension, location.pos, snapshot);
    debug!(%location, ?outcome, "restored delayed world content");
    outcome
}
