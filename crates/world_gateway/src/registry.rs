//! Concurrent index of every portal known to one world.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::{info, warn};

use super::portal::{PortalInstance, PortalState, PortalTransition};
use super::types::{BlockPos, DimensionId, PortalId};

/// Mutation happens on the simulation thread only; the save thread reads
/// through `snapshot` while ticks keep running.
#[derive(Debug)]
pub struct PortalRegistry {
    portals: DashMap<PortalId, PortalInstance>,
    next_id: AtomicU64,
    dirty: AtomicBool,
}

impl Default for PortalRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl PortalRegistry {
    pub fn new() -> Self {
        Self {
            portals: DashMap::new(),
            next_id: AtomicU64::new(1),
            dirty: AtomicBool::new(false),
        }
    }

    /// Rebuilds a registry from persisted portals. The result starts clean.
    /// A portal whose id or anchor is already taken by an earlier entry is
    /// skipped; the first one wins.
    pub fn restore(portals: Vec<PortalInstance>, next_id: u64) -> Self {
        let registry = Self::new();
        let mut next_id = next_id.max(1);
        for portal in portals {
            next_id = next_id.max(portal.id().0.saturating_add(1));
            registry.insert_unique(portal);
        }
        registry.next_id.store(next_id, Ordering::SeqCst);
        registry
    }

    pub fn allocate_id(&self) -> PortalId {
        PortalId(self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    pub fn next_id(&self) -> u64 {
        self.next_id.load(Ordering::SeqCst)
    }

    /// Fails when the id is already taken or another portal already sits on
    /// the same anchor in the same dimension. Existing entries are never
    /// overwritten.
    pub fn register(&self, instance: PortalInstance) -> bool {
        let id = instance.id();
        let anchor = instance.anchor();
        let state = instance.state();
        let dimension = instance.source_dimension().clone();
        if !self.insert_unique(instance) {
            return false;
        }
        info!(
            portal = %id,
            %dimension,
            %anchor,
            %state,
            "portal registered"
        );
        self.mark_dirty();
        true
    }

    pub fn get(&self, id: PortalId) -> Option<PortalInstance> {
        self.portals.get(&id).map(|entry| entry.value().clone())
    }

    pub fn state_of(&self, id: PortalId) -> Option<PortalState> {
        self.portals.get(&id).map(|entry| entry.value().state())
    }

    /// Applies a transition in place. `None` for an unknown id, otherwise
    /// whether the transition was legal.
    pub fn apply(&self, id: PortalId, transition: PortalTransition) -> Option<bool> {
        let mut entry = self.portals.get_mut(&id)?;
        let before = entry.state();
        let applied = entry.apply(transition);
        if entry.state() != before {
            self.mark_dirty();
        }
        Some(applied)
    }

    /// First portal of `dimension` whose anchor lies in the cube of
    /// half-width `radius` around `center`. Only registered portals are
    /// scanned, never world content.
    pub fn find_near(
        &self,
        dimension: &DimensionId,
        center: BlockPos,
        radius: i32,
    ) -> Option<PortalInstance> {
        self.portals
            .iter()
            .find(|entry| {
                let portal = entry.value();
                portal.source_dimension() == dimension && portal.anchor().within_cube(center, radius)
            })
            .map(|entry| entry.value().clone())
    }

    /// Point-in-time copy ordered by id; later registrations are not seen.
    pub fn all_in_dimension(&self, dimension: &DimensionId) -> Vec<PortalInstance> {
        let mut portals: Vec<PortalInstance> = self
            .portals
            .iter()
            .filter(|entry| entry.value().source_dimension() == dimension)
            .map(|entry| entry.value().clone())
            .collect();
        portals.sort_by_key(PortalInstance::id);
        portals
    }

    pub fn snapshot(&self) -> Vec<PortalInstance> {
        let mut portals: Vec<PortalInstance> = self
            .portals
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        portals.sort_by_key(PortalInstance::id);
        portals
    }

    pub fn len(&self) -> usize {
        self.portals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.portals.is_empty()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::SeqCst)
    }

    pub(crate) fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::SeqCst);
    }

    /// Clears the dirty flag, returning whether it was set.
    pub(crate) fn take_dirty(&self) -> bool {
        self.dirty.swap(false, Ordering::SeqCst)
    }

    fn insert_unique(&self, instance: PortalInstance) -> bool {
        if self.anchor_taken(instance.source_dimension(), instance.anchor()) {
            warn!(
                portal = %instance.id(),
                dimension = %instance.source_dimension(),
                anchor = %instance.anchor(),
                "portal anchor already registered"
            );
            return false;
        }
        match self.portals.entry(instance.id()) {
            Entry::Occupied(_) => {
                warn!(portal = %instance.id(), "portal id already registered");
                false
            }
            Entry::Vacant(slot) => {
                slot.insert(instance);
                true
            }
        }
    }

    fn anchor_taken(&self, dimension: &DimensionId, anchor: BlockPos) -> bool {
        self.portals.iter().any(|entry| {
            let portal = entry.value();
            portal.source_dimension() == dimension && portal.anchor() == anchor
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::Arc;
    use std::thread;

    fn dim(name: &str) -> DimensionId {
        DimensionId::new(name).expect("dimension")
    }

    fn new_portal(registry: &PortalRegistry, dimension: &str, anchor: BlockPos) -> PortalId {
        let id = registry.allocate_id();
        assert!(registry.register(PortalInstance::new(id, anchor, dim(dimension))));
        id
    }

    #[test]
    fn register_and_get_by_id() {
        let registry = PortalRegistry::new();
        let id = new_portal(&registry, "gateway", BlockPos::new(1, 2, 3));

        let portal = registry.get(id).expect("portal");
        assert_eq!(portal.anchor(), BlockPos::new(1, 2, 3));
        assert_eq!(portal.state(), PortalState::Inactive);
        assert!(registry.is_dirty());
        assert!(registry.get(PortalId(999)).is_none());
    }

    #[test]
    fn duplicate_id_is_rejected_without_overwrite() {
        let registry = PortalRegistry::new();
        let id = new_portal(&registry, "gateway", BlockPos::new(0, 0, 0));

        let clash = PortalInstance::new(id, BlockPos::new(50, 0, 0), dim("gateway"));
        assert!(!registry.register(clash));
        assert_eq!(registry.len(), 1);
        assert_eq!(
            registry.get(id).expect("portal").anchor(),
            BlockPos::new(0, 0, 0)
        );
    }

    #[test]
    fn duplicate_anchor_in_same_dimension_is_rejected() {
        let registry = PortalRegistry::new();
        new_portal(&registry, "gateway", BlockPos::new(4, 4, 4));

        let same_anchor =
            PortalInstance::new(registry.allocate_id(), BlockPos::new(4, 4, 4), dim("gateway"));
        assert!(!registry.register(same_anchor));

        let other_dimension =
            PortalInstance::new(registry.allocate_id(), BlockPos::new(4, 4, 4), dim("overworld"));
        assert!(registry.register(other_dimension));
    }

    #[test]
    fn apply_marks_dirty_only_on_change() {
        let registry = PortalRegistry::new();
        let id = new_portal(&registry, "gateway", BlockPos::new(0, 0, 0));
        assert!(registry.take_dirty());

        assert_eq!(registry.apply(id, PortalTransition::Activate), Some(true));
        assert!(registry.take_dirty());

        assert_eq!(registry.apply(id, PortalTransition::Activate), Some(false));
        assert!(!registry.is_dirty());

        assert_eq!(registry.apply(PortalId(77), PortalTransition::Stabilize), None);
    }

    #[test]
    fn find_near_respects_dimension_and_radius() {
        let registry = PortalRegistry::new();
        let id = new_portal(&registry, "gateway", BlockPos::new(100, 64, 100));
        new_portal(&registry, "overworld", BlockPos::new(0, 64, 0));

        let hit = registry
            .find_near(&dim("gateway"), BlockPos::new(103, 62, 97), 3)
            .expect("near portal");
        assert_eq!(hit.id(), id);
        assert!(registry
            .find_near(&dim("gateway"), BlockPos::new(104, 64, 100), 3)
            .is_none());
        assert!(registry
            .find_near(&dim("gateway"), BlockPos::new(0, 64, 0), 3)
            .is_none());
    }

    #[test]
    fn all_in_dimension_is_a_snapshot() {
        let registry = PortalRegistry::new();
        let first = new_portal(&registry, "gateway", BlockPos::new(0, 0, 0));
        new_portal(&registry, "overworld", BlockPos::new(0, 0, 0));

        let listed = registry.all_in_dimension(&dim("gateway"));
        new_portal(&registry, "gateway", BlockPos::new(40, 0, 0));

        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id(), first);
        assert_eq!(registry.all_in_dimension(&dim("gateway")).len(), 2);
    }

    #[test]
    fn restore_keeps_id_allocation_ahead_of_loaded_portals() {
        let portals = vec![PortalInstance::new(
            PortalId(41),
            BlockPos::new(0, 0, 0),
            dim("gateway"),
        )];
        let registry = PortalRegistry::restore(portals, 3);
        assert_eq!(registry.allocate_id(), PortalId(42));
        assert!(!registry.is_dirty());
    }

    #[test]
    fn restore_keeps_first_of_conflicting_portals() {
        let portals = vec![
            PortalInstance::new(PortalId(1), BlockPos::new(0, 0, 0), dim("gateway")),
            PortalInstance::new(PortalId(1), BlockPos::new(9, 0, 0), dim("gateway")),
            PortalInstance::new(PortalId(2), BlockPos::new(0, 0, 0), dim("gateway")),
            PortalInstance::new(PortalId(3), BlockPos::new(0, 0, 0), dim("overworld")),
        ];
        let registry = PortalRegistry::restore(portals, 1);

        assert_eq!(registry.len(), 2);
        assert_eq!(
            registry.get(PortalId(1)).expect("first portal").anchor(),
            BlockPos::new(0, 0, 0)
        );
        assert!(registry.get(PortalId(2)).is_none());
        assert_eq!(registry.allocate_id(), PortalId(4));
        assert!(!registry.is_dirty());
    }

    #[test]
    fn snapshot_while_registering_from_another_thread() {
        let registry = Arc::new(PortalRegistry::new());
        let writer = {
            let registry = Arc::clone(&registry);
            thread::spawn(move || {
                for i in 0..200 {
                    let id = registry.allocate_id();
                    registry.register(PortalInstance::new(
                        id,
                        BlockPos::new(i * 100, 0, 0),
                        DimensionId::new("gateway").expect("dimension"),
                    ));
                }
            })
        };
        for _ in 0..50 {
            let seen = registry.snapshot();
            assert!(seen.windows(2).all(|pair| pair[0].id() < pair[1].id()));
        }
        writer.join().expect("writer thread");
        assert_eq!(registry.len(), 200);
    }

    proptest! {
        #[test]
        fn prop_find_near_matches_cube_test(
            anchor in (-1000i32..1000, -64i32..320, -1000i32..1000),
            query in (-1000i32..1000, -64i32..320, -1000i32..1000),
            radius in 0i32..64,
        ) {
            let registry = PortalRegistry::new();
            let anchor = BlockPos::new(anchor.0, anchor.1, anchor.2);
            let query = BlockPos::new(query.0, query.1, query.2);
            let id = new_portal(&registry, "gateway", anchor);

            let expected = (anchor.x - query.x).abs() <= radius
                && (anchor.y - query.y).abs() <= radius
                && (anchor.z - query.z).abs() <= radius;
            let found = registry.find_near(&dim("gateway"), query, radius);
            prop_assert_eq!(found.map(|portal| portal.id()), expected.then_some(id));
            prop_assert!(registry.find_near(&dim("overworld"), query, radius).is_none());
        }
    }
}
