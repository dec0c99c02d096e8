//! Region-grid geometry.
//!
//! World coordinates are meters. A region occupies a rectangle whose origin
//! sits on the addressing grid (multiples of [`REGION_SIZE`]) and whose
//! width/height are multiples of it, so a single variable-sized region can
//! cover several grid cells.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Mul, Sub};

/// Size of one addressing grid cell, in meters.
pub const REGION_SIZE: u32 = 256;

/// Position, velocity or direction in region-local or world space
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vector3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vector3 {
    pub const ZERO: Vector3 = Vector3::new(0.0, 0.0, 0.0);

    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

impl Add for Vector3 {
    type Output = Vector3;

    fn add(self, rhs: Vector3) -> Vector3 {
        Vector3::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl Sub for Vector3 {
    type Output = Vector3;

    fn sub(self, rhs: Vector3) -> Vector3 {
        Vector3::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

impl Mul<f32> for Vector3 {
    type Output = Vector3;

    fn mul(self, rhs: f32) -> Vector3 {
        Vector3::new(self.x * rhs, self.y * rhs, self.z * rhs)
    }
}

impl fmt::Display for Vector3 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{}, {}, {}>", self.x, self.y, self.z)
    }
}

/// Coarse encoding of a region's world origin: `(world_x << 32) | world_y`,
/// both in meters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RegionHandle(u64);

impl RegionHandle {
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Handle for a world origin given in meters.
    pub const fn from_world(world_x: u32, world_y: u32) -> Self {
        Self(((world_x as u64) << 32) | world_y as u64)
    }

    /// Handle for a grid location given in cells.
    pub const fn from_region_loc(loc_x: u32, loc_y: u32) -> Self {
        Self::from_world(loc_x * REGION_SIZE, loc_y * REGION_SIZE)
    }

    pub const fn raw(&self) -> u64 {
        self.0
    }

    pub const fn world_x(&self) -> u32 {
        (self.0 >> 32) as u32
    }

    pub const fn world_y(&self) -> u32 {
        self.0 as u32
    }

    /// Grid location in cells.
    pub const fn region_loc(&self) -> (u32, u32) {
        (self.world_x() / REGION_SIZE, self.world_y() / REGION_SIZE)
    }

    /// Legacy link regions are addressed on the `y == 0` row and only
    /// resolve by base handle.
    pub const fn is_legacy_link(&self) -> bool {
        self.world_y() == 0
    }
}

impl fmt::Display for RegionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (x, y) = self.region_loc();
        write!(f, "{}({},{})", self.0, x, y)
    }
}

/// Snap a world coordinate down to its grid cell origin.
///
/// Negative and non-finite coordinates snap to zero.
pub fn quantize_to_grid(coord: f64) -> u32 {
    if !coord.is_finite() || coord <= 0.0 {
        return 0;
    }
    let meters = coord.min(u32::MAX as f64) as u32;
    meters & !(REGION_SIZE - 1)
}

/// World-space rectangle covered by a region
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Footprint {
    pub world_x: u32,
    pub world_y: u32,
    pub size_x: u32,
    pub size_y: u32,
}

impl Footprint {
    pub const fn new(world_x: u32, world_y: u32, size_x: u32, size_y: u32) -> Self {
        Self {
            world_x,
            world_y,
            size_x,
            size_y,
        }
    }

    /// Single-cell footprint at the given grid location.
    pub const fn cell(loc_x: u32, loc_y: u32) -> Self {
        Self::new(loc_x * REGION_SIZE, loc_y * REGION_SIZE, REGION_SIZE, REGION_SIZE)
    }

    pub const fn handle(&self) -> RegionHandle {
        RegionHandle::from_world(self.world_x, self.world_y)
    }

    /// Whether a region-local position lies inside the horizontal bounds.
    pub fn contains_local(&self, position: Vector3) -> bool {
        position.x >= 0.0
            && position.y >= 0.0
            && (position.x as f64) < self.size_x as f64
            && (position.y as f64) < self.size_y as f64
    }

    pub fn contains_world(&self, world_x: f64, world_y: f64) -> bool {
        let dx = world_x - self.world_x as f64;
        let dy = world_y - self.world_y as f64;
        dx >= 0.0 && dy >= 0.0 && dx < self.size_x as f64 && dy < self.size_y as f64
    }

    /// World coordinates of a position given relative to `handle`.
    pub fn world_of(handle: RegionHandle, position: Vector3) -> (f64, f64) {
        (
            handle.world_x() as f64 + position.x as f64,
            handle.world_y() as f64 + position.y as f64,
        )
    }

    /// Position relative to this region for a point given relative to
    /// `handle`, or `None` when the point lies outside this region.
    ///
    /// Absorbs the offset of a handle that addresses a sub-cell of a
    /// variable-sized region.
    pub fn local_offset(&self, handle: RegionHandle, position: Vector3) -> Option<Vector3> {
        let (wx, wy) = Self::world_of(handle, position);
        if !self.contains_world(wx, wy) {
            return None;
        }
        Some(Vector3::new(
            (wx - self.world_x as f64) as f32,
            (wy - self.world_y as f64) as f32,
            position.z,
        ))
    }
}

/// Whether `to` lies beyond `draw_distance` of `from`, measured between the
/// edges of the two rectangles rather than their origins.
///
/// Direct neighbors are never outside view for any positive draw distance.
pub fn is_outside_view(draw_distance: f32, from: &Footprint, to: &Footprint) -> bool {
    let dd = draw_distance as f64 - 1.0;

    let (from_x, from_y) = (from.world_x as f64, from.world_y as f64);
    let (to_x, to_y) = (to.world_x as f64, to.world_y as f64);

    if from_x + from.size_x as f64 + dd < to_x || to_x + to.size_x as f64 + dd < from_x {
        return true;
    }
    from_y + from.size_y as f64 + dd < to_y || to_y + to.size_y as f64 + dd < from_y
}
