//! Core type definitions: IDs, coordinates, and dimension names.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// Type Aliases
// ============================================================================

pub type WorldId = String;
pub type WorldTick = u64;

// ============================================================================
// Coordinates
// ============================================================================

/// Integer block coordinate inside one dimension.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct BlockPos {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl BlockPos {
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    pub fn offset(self, dx: i32, dy: i32, dz: i32) -> Self {
        Self {
            x: self.x.saturating_add(dx),
            y: self.y.saturating_add(dy),
            z: self.z.saturating_add(dz),
        }
    }

    /// True when every axis of `self - center` is within `radius` (inclusive).
    pub fn within_cube(self, center: BlockPos, radius: i32) -> bool {
        let radius = i64::from(radius.max(0));
        axis_distance(self.x, center.x) <= radius
            && axis_distance(self.y, center.y) <= radius
            && axis_distance(self.z, center.z) <= radius
    }

    /// Every coordinate of the cube of half-width `radius` centered on `self`.
    pub fn cube_around(self, radius: i32) -> impl Iterator<Item = BlockPos> {
        let radius = radius.max(0);
        (-radius..=radius).flat_map(move |dx| {
            (-radius..=radius).flat_map(move |dy| {
                (-radius..=radius).map(move |dz| self.offset(dx, dy, dz))
            })
        })
    }
}

impl fmt::Display for BlockPos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.x, self.y, self.z)
    }
}

fn axis_distance(a: i32, b: i32) -> i64 {
    (i64::from(a) - i64::from(b)).abs()
}

// ============================================================================
// Dimensions
// ============================================================================

/// Name of an independently addressable partition of a world.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DimensionId(String);

impl DimensionId {
    pub fn new(name: impl Into<String>) -> Result<Self, InvalidDimensionId> {
        let name = name.into();
        let trimmed = name.trim();
        if trimmed.is_empty() {
            return Err(InvalidDimensionId { raw: name });
        }
        Ok(Self(trimmed.to_string()))
    }

    /// For compile-time names known to be non-empty.
    pub(crate) fn from_static(name: &'static str) -> Self {
        Self(name.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DimensionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for DimensionId {
    type Err = InvalidDimensionId;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        Self::new(raw)
    }
}

impl TryFrom<String> for DimensionId {
    type Error = InvalidDimensionId;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<DimensionId> for String {
    fn from(value: DimensionId) -> Self {
        value.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidDimensionId {
    pub raw: String,
}

impl fmt::Display for InvalidDimensionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid dimension id: {:?}", self.raw)
    }
}

impl std::error::Error for InvalidDimensionId {}

/// A block coordinate qualified by its dimension.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DimensionPos {
    pub dimension: DimensionId,
    pub pos: BlockPos,
}

impl DimensionPos {
    pub fn new(dimension: DimensionId, pos: BlockPos) -> Self {
        Self { dimension, pos }
    }
}

impl fmt::Display for DimensionPos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.dimension, self.pos)
    }
}

// ============================================================================
// Portal identity
// ============================================================================

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct PortalId(pub u64);

impl fmt::Display for PortalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "portal-{}", self.0)
    }
}
