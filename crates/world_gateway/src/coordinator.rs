//! Per-world fixed-rate driver: reconciles manifested portal markers against
//! the gate state and advances pending restorations.

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use super::config::GatewayConfig;
use super::persistence::GatewayHandle;
use super::scheduler::{restore_content, DelayedMutationScheduler};
use super::types::{BlockPos, DimensionId, DimensionPos, WorldId, WorldTick};
use super::world::{WorldAccess, WorldContent};

#[cfg(test)]
mod tests;

pub type RestorationScheduler = DelayedMutationScheduler<DimensionPos, WorldContent>;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickReport {
    pub tick: WorldTick,
    pub travel_unstable: bool,
    /// The target dimension was not loaded, so reconciliation waits for the next tick.
    pub dimension_unloaded: bool,
    pub markers_purged: usize,
    pub restorations_resolved: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorldGatewayStatus {
    pub world_id: WorldId,
    pub tick: WorldTick,
    pub entered: bool,
    pub stabilized: bool,
    pub final_event_completed: bool,
    pub travel_unstable: bool,
    pub portals: usize,
    pub pending_restorations: usize,
}

#[derive(Debug)]
pub struct TickCoordinator {
    pub(crate) gateway: GatewayHandle,
    pub(crate) restorations: RestorationScheduler,
    pub(crate) config: GatewayConfig,
    tick: WorldTick,
}

impl TickCoordinator {
    pub fn new(gateway: GatewayHandle, config: GatewayConfig) -> Self {
        let restorations =
            DelayedMutationScheduler::new(config.max_pending_restorations, config.reschedule_policy);
        Self {
            gateway,
            restorations,
            config,
            tick: 0,
        }
    }

    pub fn world_id(&self) -> &str {
        &self.gateway.world_id
    }

    pub fn gateway(&self) -> &GatewayHandle {
        &self.gateway
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn restorations(&self) -> &RestorationScheduler {
        &self.restorations
    }

    pub fn current_tick(&self) -> WorldTick {
        self.tick
    }

    pub fn tick<W>(&mut self, world: &mut W) -> TickReport
    where
        W: WorldAccess + ?Sized,
    {
        self.tick = self.tick.saturating_add(1);
        let mut report = TickReport {
            tick: self.tick,
            travel_unstable: self.gateway.gate.travel_unstable(),
            ..TickReport::default()
        };

        if report.travel_unstable {
            let target = &self.config.target_dimension;
            if world.is_dimension_loaded(target) {
                for portal in self.gateway.registry.all_in_dimension(target) {
                    if portal.state().is_terminal() {
                        continue;
                    }
                    report.markers_purged += self.purge_markers_near(world, portal.anchor());
                }
            } else {
                report.dimension_unloaded = true;
            }
        }

        report.restorations_resolved = self
            .restorations
            .tick_with(|location, snapshot| {
                restore_content(world, &location, snapshot);
            });

        trace!(world = %self.gateway.world_id, ?report, "gateway tick");
        report
    }

    /// Removes manifested markers around `anchor` in the target dimension.
    /// Scans the near cube first and the escalated cube only when the near
    /// cube held none.
    pub fn purge_markers_near<W>(&self, world: &mut W, anchor: BlockPos) -> usize
    where
        W: WorldAccess + ?Sized,
    {
        let target = &self.config.target_dimension;
        let mut purged = purge_cube(world, target, anchor, self.config.purge_radius);
        if purged == 0 && self.config.purge_escalated_radius > self.config.purge_radius {
            purged = purge_cube(world, target, anchor, self.config.purge_escalated_radius);
        }
        if purged > 0 {
            debug!(
                world = %self.gateway.world_id,
                %anchor,
                purged,
                "purged portal markers while travel is unstable"
            );
        }
        purged
    }

    pub fn status(&self) -> WorldGatewayStatus {
        let flags = self.gateway.gate.flags();
        WorldGatewayStatus {
            world_id: self.gateway.world_id.clone(),
            tick: self.tick,
            entered: flags.entered,
            stabilized: flags.stabilized,
            final_event_completed: flags.final_event_completed,
            travel_unstable: flags.travel_unstable(),
            portals: self.gateway.registry.len(),
            pending_restorations: self.restorations.pending_len(),
        }
    }
}

fn purge_cube<W>(world: &mut W, dimension: &DimensionId, center: BlockPos, radius: i32) -> usize
where
    W: WorldAccess + ?Sized,
{
    let mut purged = 0;
    for pos in center.cube_around(radius) {
        if world.content_at(dimension, pos).is_portal_marker() {
            world.clear_silently(dimension, pos);
            purged += 1;
        }
    }
    purged
}
