//! Portal lifecycle: states, legal transitions, and the portal record itself.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::types::{BlockPos, DimensionId, PortalId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PortalState {
    Inactive,
    Activated,
    Deactivated,
    /// Terminal.
    Stabilized,
}

impl PortalState {
    pub fn as_str(self) -> &'static str {
        match self {
            PortalState::Inactive => "inactive",
            PortalState::Activated => "activated",
            PortalState::Deactivated => "deactivated",
            PortalState::Stabilized => "stabilized",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, PortalState::Stabilized)
    }

    /// State reached by `transition`, or `None` when it is not legal from `self`.
    pub fn after(self, transition: PortalTransition) -> Option<PortalState> {
        match (transition, self) {
            (PortalTransition::Activate, PortalState::Inactive) => Some(PortalState::Activated),
            (PortalTransition::Activate, _) => None,
            (
                PortalTransition::Deactivate,
                PortalState::Inactive | PortalState::Activated,
            ) => Some(PortalState::Deactivated),
            (PortalTransition::Deactivate, _) => None,
            (PortalTransition::Stabilize, _) => Some(PortalState::Stabilized),
        }
    }
}

impl fmt::Display for PortalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PortalTransition {
    Activate,
    Deactivate,
    Stabilize,
}

/// One known portal. Identity, anchor and dimension never change after
/// creation; only `state` moves, and only through the transition methods.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortalInstance {
    id: PortalId,
    anchor: BlockPos,
    source_dimension: DimensionId,
    state: PortalState,
}

impl PortalInstance {
    pub fn new(id: PortalId, anchor: BlockPos, source_dimension: DimensionId) -> Self {
        Self::with_state(id, anchor, source_dimension, PortalState::Inactive)
    }

    pub fn with_state(
        id: PortalId,
        anchor: BlockPos,
        source_dimension: DimensionId,
        state: PortalState,
    ) -> Self {
        Self {
            id,
            anchor,
            source_dimension,
            state,
        }
    }

    pub fn id(&self) -> PortalId {
        self.id
    }

    pub fn anchor(&self) -> BlockPos {
        self.anchor
    }

    pub fn source_dimension(&self) -> &DimensionId {
        &self.source_dimension
    }

    pub fn state(&self) -> PortalState {
        self.state
    }

    pub fn activate(&mut self) -> bool {
        self.apply(PortalTransition::Activate)
    }

    pub fn deactivate(&mut self) -> bool {
        self.apply(PortalTransition::Deactivate)
    }

    /// Idempotent: returns `true` when already stabilized.
    pub fn stabilize(&mut self) -> bool {
        self.apply(PortalTransition::Stabilize)
    }

    /// Returns `false` and leaves the state untouched when the transition
    /// is not legal from the current state.
    pub fn apply(&mut self, transition: PortalTransition) -> bool {
        match self.state.after(transition) {
            Some(next) => {
                self.state = next;
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_STATES: [PortalState; 4] = [
        PortalState::Inactive,
        PortalState::Activated,
        PortalState::Deactivated,
        PortalState::Stabilized,
    ];

    fn portal(state: PortalState) -> PortalInstance {
        PortalInstance::with_state(
            PortalId(1),
            BlockPos::new(10, 70, -4),
            DimensionId::new("gateway").expect("dimension"),
            state,
        )
    }

    #[test]
    fn activate_only_from_inactive() {
        let mut inactive = portal(PortalState::Inactive);
        assert!(inactive.activate());
        assert_eq!(inactive.state(), PortalState::Activated);

        for state in [
            PortalState::Activated,
            PortalState::Deactivated,
            PortalState::Stabilized,
        ] {
            let mut other = portal(state);
            assert!(!other.activate(), "activate from {state}");
            assert_eq!(other.state(), state);
        }
    }

    #[test]
    fn deactivate_from_inactive_or_activated() {
        for state in [PortalState::Inactive, PortalState::Activated] {
            let mut instance = portal(state);
            assert!(instance.deactivate());
            assert_eq!(instance.state(), PortalState::Deactivated);
        }

        let mut deactivated = portal(PortalState::Deactivated);
        assert!(!deactivated.deactivate());
        assert_eq!(deactivated.state(), PortalState::Deactivated);
    }

    #[test]
    fn stabilize_reaches_terminal_state_from_anywhere() {
        for state in ALL_STATES {
            let mut instance = portal(state);
            assert!(instance.stabilize());
            assert_eq!(instance.state(), PortalState::Stabilized);

            assert!(instance.stabilize());
            assert!(!instance.activate());
            assert!(!instance.deactivate());
            assert_eq!(instance.state(), PortalState::Stabilized);
        }
    }

    #[test]
    fn only_stabilized_is_terminal() {
        for state in ALL_STATES {
            assert_eq!(state.is_terminal(), state == PortalState::Stabilized);
        }
    }

    #[test]
    fn identity_survives_transitions() {
        let mut instance = portal(PortalState::Inactive);
        instance.activate();
        instance.stabilize();
        assert_eq!(instance.id(), PortalId(1));
        assert_eq!(instance.anchor(), BlockPos::new(10, 70, -4));
        assert_eq!(instance.source_dimension().as_str(), "gateway");
    }
}
