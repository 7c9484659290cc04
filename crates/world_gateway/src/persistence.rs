//! Load/save bridge between a world's store and its in-memory gateway state.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info};

use super::error::GatewayError;
use super::gate_state::{GateFlags, GatewayGateState};
use super::portal::{PortalInstance, PortalState};
use super::registry::PortalRegistry;
use super::store::WorldStore;
use super::types::{BlockPos, DimensionId, DimensionPos, PortalId, WorldId};

pub const GATE_STATE_KEY: &str = "world_gateway/gate_state";
pub const PORTALS_KEY: &str = "world_gateway/portals";
pub const GATE_STATE_RECORD_VERSION: u32 = 1;
pub const PORTAL_RECORD_VERSION: u32 = 1;

// ============================================================================
// Codec
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordCodec {
    #[default]
    Json,
    Cbor,
}

impl RecordCodec {
    pub fn as_str(self) -> &'static str {
        match self {
            RecordCodec::Json => "json",
            RecordCodec::Cbor => "cbor",
        }
    }

    pub fn encode<T: Serialize>(self, value: &T) -> Result<Vec<u8>, GatewayError> {
        match self {
            RecordCodec::Json => Ok(serde_json::to_vec_pretty(value)?),
            RecordCodec::Cbor => Ok(serde_cbor::to_vec(value)?),
        }
    }

    pub fn decode<T: DeserializeOwned>(self, bytes: &[u8]) -> Result<T, GatewayError> {
        match self {
            RecordCodec::Json => Ok(serde_json::from_slice(bytes)?),
            RecordCodec::Cbor => Ok(serde_cbor::from_slice(bytes)?),
        }
    }
}

impl fmt::Display for RecordCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecordCodec {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(RecordCodec::Json),
            "cbor" => Ok(RecordCodec::Cbor),
            _ => Err(format!("unknown record codec: {raw}")),
        }
    }
}

// ============================================================================
// Records
// ============================================================================

fn default_gate_state_version() -> u32 {
    GATE_STATE_RECORD_VERSION
}

fn default_portal_record_version() -> u32 {
    PORTAL_RECORD_VERSION
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateStateRecord {
    #[serde(default = "default_gate_state_version")]
    pub version: u32,
    pub entered: bool,
    pub stabilized: bool,
    pub final_event_completed: bool,
}

impl GateStateRecord {
    pub fn from_flags(flags: GateFlags) -> Self {
        Self {
            version: GATE_STATE_RECORD_VERSION,
            entered: flags.entered,
            stabilized: flags.stabilized,
            final_event_completed: flags.final_event_completed,
        }
    }

    pub fn flags(&self) -> GateFlags {
        GateFlags {
            entered: self.entered,
            stabilized: self.stabilized,
            final_event_completed: self.final_event_completed,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortalRecord {
    pub id: PortalId,
    pub anchor: BlockPos,
    pub dimension: DimensionId,
    pub state: PortalState,
}

impl PortalRecord {
    pub fn from_instance(instance: &PortalInstance) -> Self {
        Self {
            id: instance.id(),
            anchor: instance.anchor(),
            dimension: instance.source_dimension().clone(),
            state: instance.state(),
        }
    }

    pub fn into_instance(self) -> PortalInstance {
        PortalInstance::with_state(self.id, self.anchor, self.dimension, self.state)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortalRegistryRecord {
    #[serde(default = "default_portal_record_version")]
    pub version: u32,
    pub next_id: u64,
    #[serde(default)]
    pub portals: Vec<PortalRecord>,
}

/// A stored registry may not repeat an id or a `(dimension, anchor)` pair.
fn validate_unique_portals(portals: &[PortalRecord]) -> Result<(), GatewayError> {
    let mut ids = HashSet::new();
    let mut anchors = HashSet::new();
    for portal in portals {
        if !ids.insert(portal.id) {
            return Err(GatewayError::InvalidRecord {
                key: PORTALS_KEY.to_string(),
                reason: format!("duplicate portal id {}", portal.id),
            });
        }
        if !anchors.insert((&portal.dimension, portal.anchor)) {
            return Err(GatewayError::InvalidRecord {
                key: PORTALS_KEY.to_string(),
                reason: format!(
                    "portals share anchor {}",
                    DimensionPos::new(portal.dimension.clone(), portal.anchor)
                ),
            });
        }
    }
    Ok(())
}

fn validate_version(kind: &str, version: u32, expected: u32) -> Result<(), GatewayError> {
    if version == expected {
        Ok(())
    } else {
        Err(GatewayError::UnsupportedVersion {
            kind: kind.to_string(),
            version,
            expected,
        })
    }
}

// ============================================================================
// Adapter
// ============================================================================

/// The gateway state of one world, shared by the simulation and save threads.
#[derive(Debug, Clone)]
pub struct GatewayHandle {
    pub world_id: WorldId,
    pub gate: Arc<GatewayGateState>,
    pub registry: Arc<PortalRegistry>,
}

impl GatewayHandle {
    pub fn is_dirty(&self) -> bool {
        self.gate.is_dirty() || self.registry.is_dirty()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SaveOutcome {
    pub gate_state_written: bool,
    pub portals_written: bool,
}

impl SaveOutcome {
    pub fn wrote_anything(self) -> bool {
        self.gate_state_written || self.portals_written
    }
}

/// Hands out at most one live `GatewayHandle` per world.
#[derive(Debug, Default)]
pub struct PersistenceAdapter {
    codec: RecordCodec,
    worlds: Mutex<HashMap<WorldId, GatewayHandle>>,
}

impl PersistenceAdapter {
    pub fn new(codec: RecordCodec) -> Self {
        Self {
            codec,
            worlds: Mutex::new(HashMap::new()),
        }
    }

    pub fn codec(&self) -> RecordCodec {
        self.codec
    }

    /// A missing key is the first-run path and yields the default state.
    pub fn load_gate_state(&self, store: &dyn WorldStore) -> Result<GatewayGateState, GatewayError> {
        let Some(bytes) = store.read(GATE_STATE_KEY)? else {
            return Ok(GatewayGateState::new());
        };
        let record: GateStateRecord = self.codec.decode(&bytes)?;
        validate_version("gate_state", record.version, GATE_STATE_RECORD_VERSION)?;
        Ok(GatewayGateState::from_flags(record.flags()))
    }

    pub fn load_registry(&self, store: &dyn WorldStore) -> Result<PortalRegistry, GatewayError> {
        let Some(bytes) = store.read(PORTALS_KEY)? else {
            return Ok(PortalRegistry::new());
        };
        let record: PortalRegistryRecord = self.codec.decode(&bytes)?;
        validate_version("portals", record.version, PORTAL_RECORD_VERSION)?;
        validate_unique_portals(&record.portals)?;
        let portals = record
            .portals
            .into_iter()
            .map(PortalRecord::into_instance)
            .collect();
        Ok(PortalRegistry::restore(portals, record.next_id))
    }

    pub fn get_or_create(
        &self,
        world_id: &str,
        store: &dyn WorldStore,
    ) -> Result<GatewayHandle, GatewayError> {
        let mut worlds = self.lock_worlds();
        if let Some(handle) = worlds.get(world_id) {
            return Ok(handle.clone());
        }
        let handle = GatewayHandle {
            world_id: world_id.to_string(),
            gate: Arc::new(self.load_gate_state(store)?),
            registry: Arc::new(self.load_registry(store)?),
        };
        info!(
            world = world_id,
            portals = handle.registry.len(),
            entered = handle.gate.entered(),
            stabilized = handle.gate.stabilized(),
            "gateway state loaded"
        );
        worlds.insert(world_id.to_string(), handle.clone());
        Ok(handle)
    }

    pub fn cached(&self, world_id: &str) -> Option<GatewayHandle> {
        self.lock_worlds().get(world_id).cloned()
    }

    /// Drops the cached handle, e.g. when the world unloads.
    pub fn forget(&self, world_id: &str) -> Option<GatewayHandle> {
        self.lock_worlds().remove(world_id)
    }

    /// Writes whichever records are dirty. Each flag is cleared before its
    /// record is encoded and set again if the write fails, so a mutation
    /// that races with the save is never lost.
    pub fn save_if_dirty(
        &self,
        handle: &GatewayHandle,
        store: &dyn WorldStore,
    ) -> Result<SaveOutcome, GatewayError> {
        let mut outcome = SaveOutcome::default();
        if handle.gate.take_dirty() {
            if let Err(err) = self.write_gate_state(&handle.gate, store) {
                handle.gate.mark_dirty();
                return Err(err);
            }
            outcome.gate_state_written = true;
        }
        if handle.registry.take_dirty() {
            if let Err(err) = self.write_registry(&handle.registry, store) {
                handle.registry.mark_dirty();
                return Err(err);
            }
            outcome.portals_written = true;
        }
        if outcome.wrote_anything() {
            debug!(world = %handle.world_id, ?outcome, "gateway state saved");
        }
        Ok(outcome)
    }

    pub fn save_world(
        &self,
        world_id: &str,
        store: &dyn WorldStore,
    ) -> Result<SaveOutcome, GatewayError> {
        let handle = self
            .cached(world_id)
            .ok_or_else(|| GatewayError::UnknownWorld {
                world_id: world_id.to_string(),
            })?;
        self.save_if_dirty(&handle, store)
    }

    /// Unconditional write of both records.
    pub fn save_all(&self, handle: &GatewayHandle, store: &dyn WorldStore) -> Result<(), GatewayError> {
        handle.gate.take_dirty();
        handle.registry.take_dirty();
        let written = self
            .write_gate_state(&handle.gate, store)
            .and_then(|()| self.write_registry(&handle.registry, store));
        if written.is_err() {
            handle.gate.mark_dirty();
            handle.registry.mark_dirty();
        }
        written
    }

    pub fn encode_gate_state(&self, flags: GateFlags) -> Result<Vec<u8>, GatewayError> {
        self.codec.encode(&GateStateRecord::from_flags(flags))
    }

    pub fn encode_registry(&self, registry: &PortalRegistry) -> Result<Vec<u8>, GatewayError> {
        let record = PortalRegistryRecord {
            version: PORTAL_RECORD_VERSION,
            next_id: registry.next_id(),
            portals: registry
                .snapshot()
                .iter()
                .map(PortalRecord::from_instance)
                .collect(),
        };
        self.codec.encode(&record)
    }

    fn write_gate_state(
        &self,
        gate: &GatewayGateState,
        store: &dyn WorldStore,
    ) -> Result<(), GatewayError> {
        let bytes = self.encode_gate_state(gate.flags())?;
        store.write(GATE_STATE_KEY, &bytes)
    }

    fn write_registry(
        &self,
        registry: &PortalRegistry,
        store: &dyn WorldStore,
    ) -> Result<(), GatewayError> {
        let bytes = self.encode_registry(registry)?;
        store.write(PORTALS_KEY, &bytes)
    }

    fn lock_worlds(&self) -> MutexGuard<'_, HashMap<WorldId, GatewayHandle>> {
        self.worlds
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
