pub mod config;
pub mod coordinator;
pub mod error;
pub mod gate_state;
pub mod persistence;
pub mod portal;
pub mod registry;
pub mod runtime;
pub mod scheduler;
pub mod signals;
pub mod store;
pub mod types;
pub mod world;

pub use config::{
    GatewayConfig, GatewayConfigError, DEFAULT_CONFIG_FILE_NAME, DEFAULT_DEDUP_RADIUS,
    DEFAULT_MAX_PENDING_RESTORATIONS, DEFAULT_PURGE_ESCALATED_RADIUS, DEFAULT_PURGE_RADIUS,
    DEFAULT_RESTORE_DELAY_TICKS, DEFAULT_TARGET_DIMENSION, DEFAULT_TICK_INTERVAL_MS,
    ENV_DEDUP_RADIUS, ENV_MAX_PENDING_RESTORATIONS, ENV_PURGE_ESCALATED_RADIUS, ENV_PURGE_RADIUS,
    ENV_RECORD_CODEC, ENV_RESCHEDULE_POLICY, ENV_RESTORE_DELAY_TICKS, ENV_TARGET_DIMENSION,
    ENV_TICK_INTERVAL_MS,
};
pub use coordinator::{RestorationScheduler, TickCoordinator, TickReport, WorldGatewayStatus};
pub use error::GatewayError;
pub use gate_state::{GateFlags, GatewayGateState};
pub use persistence::{
    GateStateRecord, GatewayHandle, PersistenceAdapter, PortalRecord, PortalRegistryRecord,
    RecordCodec, SaveOutcome, GATE_STATE_KEY, GATE_STATE_RECORD_VERSION, PORTALS_KEY,
    PORTAL_RECORD_VERSION,
};
pub use portal::{PortalInstance, PortalState, PortalTransition};
pub use registry::PortalRegistry;
pub use runtime::{GatewayRuntime, GatewayRuntimeSnapshot};
pub use scheduler::{
    restore_content, DelayedMutationScheduler, ReschedulePolicy, RestoreOutcome, ScheduleOutcome,
};
pub use signals::{EntryOutcome, GatewaySignal, SignalOutcome};
pub use store::{DirStore, MemoryStore, WorldStore};
pub use types::{BlockPos, DimensionId, DimensionPos, InvalidDimensionId, PortalId, WorldId, WorldTick};
pub use world::{InMemoryWorld, MarkerKind, UnknownMarkerKind, WorldAccess, WorldContent, WorldEdit};
