//! Seam to the host world: what occupies a coordinate, and how the gateway
//! subsystem reads and edits it.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use super::types::{BlockPos, DimensionId, DimensionPos};

// ============================================================================
// Content model
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarkerKind {
    Gateway,
    Return,
}

impl MarkerKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MarkerKind::Gateway => "gateway",
            MarkerKind::Return => "return",
        }
    }
}

impl fmt::Display for MarkerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MarkerKind {
    type Err = UnknownMarkerKind;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "gateway" => Ok(MarkerKind::Gateway),
            "return" => Ok(MarkerKind::Return),
            _ => Err(UnknownMarkerKind {
                kind: raw.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownMarkerKind {
    pub kind: String,
}

impl fmt::Display for UnknownMarkerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown portal marker kind: {}", self.kind)
    }
}

impl std::error::Error for UnknownMarkerKind {}

/// Whatever occupies one coordinate.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WorldContent {
    #[default]
    Empty,
    PortalMarker { marker: MarkerKind },
    Block {
        block_id: String,
        /// Side state such as an inventory, dropped on a silent clear.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        attached_state: Option<serde_json::Value>,
    },
}

impl WorldContent {
    pub fn marker(marker: MarkerKind) -> Self {
        WorldContent::PortalMarker { marker }
    }

    pub fn block(block_id: impl Into<String>) -> Self {
        WorldContent::Block {
            block_id: block_id.into(),
            attached_state: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, WorldContent::Empty)
    }

    pub fn is_portal_marker(&self) -> bool {
        match self {
            WorldContent::PortalMarker { .. } => true,
            WorldContent::Empty | WorldContent::Block { .. } => false,
        }
    }
}

// ============================================================================
// Host trait
// ============================================================================

pub trait WorldAccess {
    fn is_dimension_loaded(&self, dimension: &DimensionId) -> bool;

    /// Unknown or unloaded coordinates read as `Empty`.
    fn content_at(&self, dimension: &DimensionId, pos: BlockPos) -> WorldContent;

    /// Removes content and its side state without drops or other effects.
    fn clear_silently(&mut self, dimension: &DimensionId, pos: BlockPos);

    fn place(&mut self, dimension: &DimensionId, pos: BlockPos, content: WorldContent);
}

// ============================================================================
// In-memory host
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum WorldEdit {
    Cleared(DimensionPos),
    Placed(DimensionPos, WorldContent),
}

/// Sparse world used by the runtime tests and the scenario runner. Keeps an
/// ordered log of every edit made through `WorldAccess`.
#[derive(Debug, Clone, Default)]
pub struct InMemoryWorld {
    cells: BTreeMap<DimensionId, BTreeMap<BlockPos, WorldContent>>,
    loaded: BTreeSet<DimensionId>,
    edits: Vec<WorldEdit>,
}

impl InMemoryWorld {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_loaded(dimensions: impl IntoIterator<Item = DimensionId>) -> Self {
        let mut world = Self::new();
        for dimension in dimensions {
            world.load_dimension(dimension);
        }
        world
    }

    pub fn load_dimension(&mut self, dimension: DimensionId) {
        self.loaded.insert(dimension);
    }

    pub fn unload_dimension(&mut self, dimension: &DimensionId) {
        self.loaded.remove(dimension);
    }

    /// Host-side placement; not recorded in the edit log.
    pub fn set(&mut self, dimension: &DimensionId, pos: BlockPos, content: WorldContent) {
        self.write(dimension, pos, content);
    }

    pub fn edits(&self) -> &[WorldEdit] {
        &self.edits
    }

    pub fn count_markers(&self, dimension: &DimensionId) -> usize {
        self.cells
            .get(dimension)
            .map(|cells| cells.values().filter(|c| c.is_portal_marker()).count())
            .unwrap_or(0)
    }

    fn write(&mut self, dimension: &DimensionId, pos: BlockPos, content: WorldContent) {
        if content.is_empty() {
            if let Some(cells) = self.cells.get_mut(dimension) {
                cells.remove(&pos);
            }
            return;
        }
        self.cells
            .entry(dimension.clone())
            .or_default()
            .insert(pos, content);
    }
}

impl WorldAccess for InMemoryWorld {
    fn is_dimension_loaded(&self, dimension: &DimensionId) -> bool {
        self.loaded.contains(dimension)
    }

    fn content_at(&self, dimension: &DimensionId, pos: BlockPos) -> WorldContent {
        self.cells
            .get(dimension)
            .and_then(|cells| cells.get(&pos))
            .cloned()
            .unwrap_or_default()
    }

    fn clear_silently(&mut self, dimension: &DimensionId, pos: BlockPos) {
        self.write(dimension, pos, WorldContent::Empty);
        self.edits
            .push(WorldEdit::Cleared(DimensionPos::new(dimension.clone(), pos)));
    }

    fn place(&mut self, dimension: &DimensionId, pos: BlockPos, content: WorldContent) {
        self.write(dimension, pos, content.clone());
        self.edits.push(WorldEdit::Placed(
            DimensionPos::new(dimension.clone(), pos),
            content,
        ));
    }
}
