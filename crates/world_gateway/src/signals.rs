//! Signals raised by host collaborators and how each one mutates gateway state.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::coordinator::TickCoordinator;
use super::portal::{PortalInstance, PortalState, PortalTransition};
use super::scheduler::ScheduleOutcome;
use super::types::{BlockPos, DimensionId, DimensionPos, PortalId};
use super::world::{WorldAccess, WorldContent};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "signal", rename_all = "snake_case")]
pub enum GatewaySignal {
    ParticipantEnteredDimension {
        dimension: DimensionId,
        position: BlockPos,
    },
    StabilizationItemUsed,
    FinalBossDefeated {
        location: DimensionPos,
    },
    SpecialBlockBroken {
        location: DimensionPos,
        snapshot: WorldContent,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryOutcome {
    OtherDimension,
    TravelStable,
    Deactivated(PortalId),
    /// The nearby portal could not be deactivated (already deactivated or stabilized).
    AlreadyDeactivated(PortalId),
    Registered(PortalId),
    RegistrationRejected,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SignalOutcome {
    Entry(EntryOutcome),
    Stabilized,
    FinalEventCompleted,
    RestorationScheduled(ScheduleOutcome<DimensionPos>),
}

impl TickCoordinator {
    pub fn handle_signal<W>(&mut self, world: &mut W, signal: GatewaySignal) -> SignalOutcome
    where
        W: WorldAccess + ?Sized,
    {
        match signal {
            GatewaySignal::ParticipantEnteredDimension {
                dimension,
                position,
            } => SignalOutcome::Entry(self.on_participant_entered_dimension(
                world, &dimension, position,
            )),
            GatewaySignal::StabilizationItemUsed => {
                self.on_stabilization_item_used();
                SignalOutcome::Stabilized
            }
            GatewaySignal::FinalBossDefeated { location } => {
                self.on_final_boss_defeated(&location);
                SignalOutcome::FinalEventCompleted
            }
            GatewaySignal::SpecialBlockBroken { location, snapshot } => {
                SignalOutcome::RestorationScheduled(self.on_special_block_broken(location, snapshot))
            }
        }
    }

    /// First arrival arms instability. While travel is unstable, the portal
    /// the participant came through is deactivated (or recorded as a new
    /// deactivated portal) and its markers are purged at once.
    pub fn on_participant_entered_dimension<W>(
        &mut self,
        world: &mut W,
        dimension: &DimensionId,
        position: BlockPos,
    ) -> EntryOutcome
    where
        W: WorldAccess + ?Sized,
    {
        if dimension != &self.config.target_dimension {
            return EntryOutcome::OtherDimension;
        }
        let gate = &self.gateway.gate;
        gate.mark_entered();
        if !gate.travel_unstable() {
            return EntryOutcome::TravelStable;
        }

        let registry = &self.gateway.registry;
        let (outcome, anchor) =
            match registry.find_near(dimension, position, self.config.dedup_radius) {
                Some(existing) => {
                    let id = existing.id();
                    let outcome = match registry.apply(id, PortalTransition::Deactivate) {
                        Some(true) => EntryOutcome::Deactivated(id),
                        _ => EntryOutcome::AlreadyDeactivated(id),
                    };
                    (outcome, existing.anchor())
                }
                None => {
                    let id = registry.allocate_id();
                    let instance = PortalInstance::with_state(
                        id,
                        position,
                        dimension.clone(),
                        PortalState::Deactivated,
                    );
                    if registry.register(instance) {
                        (EntryOutcome::Registered(id), position)
                    } else {
                        (EntryOutcome::RegistrationRejected, position)
                    }
                }
            };

        if world.is_dimension_loaded(dimension) {
            self.purge_markers_near(world, anchor);
        }
        info!(
            world = %self.gateway.world_id,
            %position,
            ?outcome,
            "participant entered gateway dimension while travel is unstable"
        );
        outcome
    }

    pub fn on_stabilization_item_used(&mut self) {
        self.gateway.gate.mark_stabilized();
    }

    /// Unprotecting the boss arena belongs to the host.
    pub fn on_final_boss_defeated(&mut self, location: &DimensionPos) {
        self.gateway.gate.mark_final_event_completed();
        info!(world = %self.gateway.world_id, %location, "final boss defeated");
    }

    pub fn on_special_block_broken(
        &mut self,
        location: DimensionPos,
        snapshot: WorldContent,
    ) -> ScheduleOutcome<DimensionPos> {
        let delay = self.config.restore_delay_ticks;
        debug!(world = %self.gateway.world_id, %location, delay, "scheduling block restoration");
        self.restorations.schedule(location, snapshot, delay)
    }
}
