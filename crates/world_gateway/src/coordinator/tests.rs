use super::*;
use crate::persistence::{PersistenceAdapter, RecordCodec};
use crate::portal::PortalState;
use crate::scheduler::{ReschedulePolicy, ScheduleOutcome};
use crate::signals::{EntryOutcome, GatewaySignal, SignalOutcome};
use crate::store::MemoryStore;
use crate::world::{InMemoryWorld, MarkerKind, WorldEdit};

fn gateway_dim() -> DimensionId {
    DimensionId::new("gateway").expect("dimension")
}

fn overworld() -> DimensionId {
    DimensionId::new("overworld").expect("dimension")
}

fn coordinator_with(config: GatewayConfig) -> TickCoordinator {
    let adapter = PersistenceAdapter::new(RecordCodec::Json);
    let store = MemoryStore::new();
    let handle = adapter.get_or_create("world-1", &store).expect("handle");
    TickCoordinator::new(handle, config)
}

fn coordinator() -> TickCoordinator {
    coordinator_with(GatewayConfig::default())
}

fn loaded_world() -> InMemoryWorld {
    InMemoryWorld::with_loaded([gateway_dim(), overworld()])
}

fn place_marker(world: &mut InMemoryWorld, pos: BlockPos) {
    world.set(&gateway_dim(), pos, WorldContent::marker(MarkerKind::Gateway));
}

#[test]
fn stable_world_skips_reconciliation() {
    let mut coordinator = coordinator();
    let mut world = loaded_world();
    place_marker(&mut world, BlockPos::new(0, 64, 0));

    let report = coordinator.tick(&mut world);

    assert_eq!(report.tick, 1);
    assert!(!report.travel_unstable);
    assert_eq!(report.markers_purged, 0);
    assert_eq!(world.count_markers(&gateway_dim()), 1);
}

#[test]
fn entry_while_unstable_registers_deactivated_portal_and_purges() {
    let mut coordinator = coordinator();
    let mut world = loaded_world();
    let entry = BlockPos::new(12, 70, -30);
    place_marker(&mut world, entry.offset(1, 0, 0));
    place_marker(&mut world, entry.offset(-1, 1, 0));

    let outcome = coordinator.on_participant_entered_dimension(&mut world, &gateway_dim(), entry);

    let EntryOutcome::Registered(id) = outcome else {
        panic!("expected registration, got {outcome:?}");
    };
    assert!(coordinator.gateway().gate.entered());
    assert!(coordinator.gateway().gate.travel_unstable());
    let portal = coordinator.gateway().registry.get(id).expect("portal");
    assert_eq!(portal.state(), PortalState::Deactivated);
    assert_eq!(portal.anchor(), entry);
    assert_eq!(world.count_markers(&gateway_dim()), 0);
}

#[test]
fn entry_near_existing_portal_deactivates_it() {
    let mut coordinator = coordinator();
    let mut world = loaded_world();
    let registry = &coordinator.gateway().registry;
    let id = registry.allocate_id();
    assert!(registry.register(crate::portal::PortalInstance::with_state(
        id,
        BlockPos::new(100, 64, 100),
        gateway_dim(),
        PortalState::Activated,
    )));

    let outcome = coordinator.on_participant_entered_dimension(
        &mut world,
        &gateway_dim(),
        BlockPos::new(102, 65, 98),
    );

    assert_eq!(outcome, EntryOutcome::Deactivated(id));
    assert_eq!(coordinator.gateway().registry.len(), 1);
    assert_eq!(
        coordinator.gateway().registry.state_of(id),
        Some(PortalState::Deactivated)
    );
}

#[test]
fn entry_into_other_dimension_is_ignored() {
    let mut coordinator = coordinator();
    let mut world = loaded_world();
    let outcome =
        coordinator.on_participant_entered_dimension(&mut world, &overworld(), BlockPos::default());
    assert_eq!(outcome, EntryOutcome::OtherDimension);
    assert!(!coordinator.gateway().gate.entered());
}

#[test]
fn stabilization_scenario_end_to_end() {
    let mut coordinator = coordinator();
    let mut world = loaded_world();
    let entry = BlockPos::new(0, 80, 0);

    let first = coordinator.handle_signal(
        &mut world,
        GatewaySignal::ParticipantEnteredDimension {
            dimension: gateway_dim(),
            position: entry,
        },
    );
    let SignalOutcome::Entry(EntryOutcome::Registered(id)) = first else {
        panic!("expected registration, got {first:?}");
    };
    assert!(coordinator.status().travel_unstable);

    // Markers that reappear are purged every tick while unstable.
    place_marker(&mut world, entry.offset(0, 1, 0));
    let report = coordinator.tick(&mut world);
    assert!(report.travel_unstable);
    assert_eq!(report.markers_purged, 1);

    coordinator.handle_signal(&mut world, GatewaySignal::StabilizationItemUsed);
    let status = coordinator.status();
    assert!(status.stabilized);
    assert!(!status.travel_unstable);

    let second = coordinator.handle_signal(
        &mut world,
        GatewaySignal::ParticipantEnteredDimension {
            dimension: gateway_dim(),
            position: entry.offset(1, 0, 0),
        },
    );
    assert_eq!(second, SignalOutcome::Entry(EntryOutcome::TravelStable));
    assert!(coordinator.gateway().gate.stabilized());
    assert_eq!(
        coordinator.gateway().registry.state_of(id),
        Some(PortalState::Deactivated)
    );

    place_marker(&mut world, entry.offset(0, 1, 0));
    let report = coordinator.tick(&mut world);
    assert!(!report.travel_unstable);
    assert_eq!(report.markers_purged, 0);
    assert_eq!(world.count_markers(&gateway_dim()), 1);
}

#[test]
fn stabilized_portals_are_not_purged() {
    let mut coordinator = coordinator();
    let mut world = loaded_world();
    coordinator.gateway().gate.mark_entered();
    let registry = &coordinator.gateway().registry;
    let id = registry.allocate_id();
    registry.register(crate::portal::PortalInstance::with_state(
        id,
        BlockPos::new(0, 64, 0),
        gateway_dim(),
        PortalState::Stabilized,
    ));
    place_marker(&mut world, BlockPos::new(0, 65, 0));

    let report = coordinator.tick(&mut world);
    assert!(report.travel_unstable);
    assert_eq!(report.markers_purged, 0);
}

#[test]
fn purge_escalates_only_when_near_cube_is_empty() {
    let mut coordinator = coordinator_with(GatewayConfig {
        purge_radius: 2,
        purge_escalated_radius: 5,
        ..GatewayConfig::default()
    });
    let mut world = loaded_world();
    let anchor = BlockPos::new(0, 64, 0);
    coordinator.on_participant_entered_dimension(&mut world, &gateway_dim(), anchor);

    place_marker(&mut world, anchor.offset(1, 0, 0));
    place_marker(&mut world, anchor.offset(4, 0, 0));
    let report = coordinator.tick(&mut world);
    assert_eq!(report.markers_purged, 1);
    assert_eq!(world.count_markers(&gateway_dim()), 1);

    let report = coordinator.tick(&mut world);
    assert_eq!(report.markers_purged, 1);
    assert_eq!(world.count_markers(&gateway_dim()), 0);

    place_marker(&mut world, anchor.offset(6, 0, 0));
    let report = coordinator.tick(&mut world);
    assert_eq!(report.markers_purged, 0);
}

#[test]
fn unloaded_target_dimension_retries_next_tick() {
    let mut coordinator = coordinator();
    let mut world = loaded_world();
    let anchor = BlockPos::new(0, 64, 0);
    coordinator.on_participant_entered_dimension(&mut world, &gateway_dim(), anchor);
    world.unload_dimension(&gateway_dim());
    place_marker(&mut world, anchor.offset(0, 2, 0));

    let report = coordinator.tick(&mut world);
    assert!(report.dimension_unloaded);
    assert_eq!(report.markers_purged, 0);

    world.load_dimension(gateway_dim());
    let report = coordinator.tick(&mut world);
    assert!(!report.dimension_unloaded);
    assert_eq!(report.markers_purged, 1);
}

#[test]
fn block_restoration_resolves_on_tick_sixty_with_clear_then_restore() {
    let mut coordinator = coordinator();
    let mut world = loaded_world();
    let location = DimensionPos::new(overworld(), BlockPos::new(8, 40, 8));
    let original = WorldContent::block("gateway_keystone");

    let outcome = coordinator.handle_signal(
        &mut world,
        GatewaySignal::SpecialBlockBroken {
            location: location.clone(),
            snapshot: original.clone(),
        },
    );
    assert_eq!(
        outcome,
        SignalOutcome::RestorationScheduled(ScheduleOutcome::Scheduled)
    );
    world.set(&location.dimension, location.pos, WorldContent::block("chest"));

    for _ in 0..59 {
        let report = coordinator.tick(&mut world);
        assert_eq!(report.restorations_resolved, 0);
    }
    assert_eq!(
        world.content_at(&location.dimension, location.pos),
        WorldContent::block("chest")
    );
    assert!(coordinator.restorations().contains(&location));

    let report = coordinator.tick(&mut world);
    assert_eq!(report.tick, 60);
    assert_eq!(report.restorations_resolved, 1);
    assert_eq!(world.content_at(&location.dimension, location.pos), original);
    assert!(!coordinator.restorations().contains(&location));
    assert_eq!(
        world.edits(),
        &[
            WorldEdit::Cleared(location.clone()),
            WorldEdit::Placed(location.clone(), original),
        ]
    );
}

#[test]
fn rescheduling_policy_is_taken_from_config() {
    let mut coordinator = coordinator_with(GatewayConfig {
        reschedule_policy: ReschedulePolicy::KeepEarliest,
        restore_delay_ticks: 3,
        ..GatewayConfig::default()
    });
    let mut world = loaded_world();
    let location = DimensionPos::new(overworld(), BlockPos::new(1, 1, 1));

    coordinator.on_special_block_broken(location.clone(), WorldContent::block("first"));
    assert_eq!(
        coordinator.on_special_block_broken(location.clone(), WorldContent::block("second")),
        ScheduleOutcome::KeptExisting
    );
    for _ in 0..3 {
        coordinator.tick(&mut world);
    }
    assert_eq!(
        world.content_at(&location.dimension, location.pos),
        WorldContent::block("first")
    );
}

#[test]
fn final_boss_defeat_is_recorded() {
    let mut coordinator = coordinator();
    let mut world = loaded_world();
    coordinator.handle_signal(
        &mut world,
        GatewaySignal::FinalBossDefeated {
            location: DimensionPos::new(gateway_dim(), BlockPos::new(0, 100, 0)),
        },
    );
    let status = coordinator.status();
    assert!(status.final_event_completed);
    assert!(!status.entered);
    assert!(coordinator.gateway().is_dirty());
}
