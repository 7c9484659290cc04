use world_gateway::{
    BlockPos, DimensionId, DimensionPos, EntryOutcome, GatewayConfig, GatewaySignal,
    InMemoryWorld, MarkerKind, MemoryStore, PersistenceAdapter, PortalState, RecordCodec,
    SignalOutcome, TickCoordinator, WorldAccess, WorldContent,
};

fn gateway_dim() -> DimensionId {
    DimensionId::new("gateway").expect("dimension")
}

fn entered(position: BlockPos) -> GatewaySignal {
    GatewaySignal::ParticipantEnteredDimension {
        dimension: gateway_dim(),
        position,
    }
}

#[test]
fn unstable_travel_survives_a_restart_until_stabilized() {
    let store = MemoryStore::new();
    let config = GatewayConfig::default();
    let entry = BlockPos::new(-40, 72, 16);
    let mut world = InMemoryWorld::with_loaded([gateway_dim()]);

    let portal_id = {
        let adapter = PersistenceAdapter::new(RecordCodec::Cbor);
        let handle = adapter.get_or_create("world-1", &store).expect("handle");
        let mut coordinator = TickCoordinator::new(handle.clone(), config.clone());
        let outcome = coordinator.handle_signal(&mut world, entered(entry));
        let SignalOutcome::Entry(EntryOutcome::Registered(id)) = outcome else {
            panic!("expected a new portal, got {outcome:?}");
        };
        let saved = adapter.save_if_dirty(&handle, &store).expect("save");
        assert!(saved.gate_state_written && saved.portals_written);
        id
    };

    // A fresh adapter reads what the previous session wrote.
    let adapter = PersistenceAdapter::new(RecordCodec::Cbor);
    let handle = adapter.get_or_create("world-1", &store).expect("reload");
    assert!(handle.gate.travel_unstable());
    assert_eq!(
        handle.registry.state_of(portal_id),
        Some(PortalState::Deactivated)
    );

    let mut coordinator = TickCoordinator::new(handle.clone(), config);
    world.set(
        &gateway_dim(),
        entry.offset(0, 1, 0),
        WorldContent::marker(MarkerKind::Return),
    );
    assert_eq!(coordinator.tick(&mut world).markers_purged, 1);

    coordinator.handle_signal(&mut world, GatewaySignal::StabilizationItemUsed);
    adapter.save_if_dirty(&handle, &store).expect("save");

    let reloaded = PersistenceAdapter::new(RecordCodec::Cbor)
        .load_gate_state(&store)
        .expect("reload gate");
    assert!(reloaded.entered());
    assert!(reloaded.stabilized());
    assert!(!reloaded.travel_unstable());

    world.set(
        &gateway_dim(),
        entry.offset(0, 1, 0),
        WorldContent::marker(MarkerKind::Gateway),
    );
    assert_eq!(coordinator.tick(&mut world).markers_purged, 0);
}

#[test]
fn broken_block_comes_back_after_the_configured_delay() {
    let store = MemoryStore::new();
    let adapter = PersistenceAdapter::new(RecordCodec::Json);
    let handle = adapter.get_or_create("world-1", &store).expect("handle");
    let mut coordinator = TickCoordinator::new(
        handle,
        GatewayConfig {
            restore_delay_ticks: 5,
            ..GatewayConfig::default()
        },
    );
    let overworld = DimensionId::new("overworld").expect("dimension");
    let mut world = InMemoryWorld::with_loaded([gateway_dim(), overworld.clone()]);
    let location = DimensionPos::new(overworld, BlockPos::new(3, 3, 3));
    let snapshot = WorldContent::Block {
        block_id: "altar".to_string(),
        attached_state: Some(serde_json::json!({ "charge": 3 })),
    };

    coordinator.handle_signal(
        &mut world,
        GatewaySignal::SpecialBlockBroken {
            location: location.clone(),
            snapshot: snapshot.clone(),
        },
    );
    let resolved: usize = (0..5)
        .map(|_| coordinator.tick(&mut world).restorations_resolved)
        .sum();

    assert_eq!(resolved, 1);
    assert_eq!(world.content_at(&location.dimension, location.pos), snapshot);
    assert_eq!(coordinator.status().pending_restorations, 0);
}
