//! Map grid coordinates and the world/navigation axis mapping
//!
//! Maps are split into a 64 x 64 grid of square cells, one navigation tile
//! per cell. World space is z-up; the navigation mesh is y-up with its axes
//! ordered `(world.y, world.z, world.x)`.

use std::fmt;

use glam::Vec3;

/// Edge length of one map grid cell in world units
pub const MMAP_GRID_SIZE: f32 = 533.333_33;

/// Number of grid cells along each map axis
pub const MMAP_GRID_COUNT: u16 = 64;

/// Grid cell of a map, one navigation tile each
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serialization", derive(serde::Serialize, serde::Deserialize))]
pub struct TileCoord {
    pub x: u16,
    pub y: u16,
}

impl TileCoord {
    pub const fn new(x: u16, y: u16) -> Self {
        Self { x, y }
    }

    /// Key used for tile bookkeeping: `(x << 16) | y`
    pub const fn packed(self) -> u32 {
        ((self.x as u32) << 16) | self.y as u32
    }

    pub const fn from_packed(key: u32) -> Self {
        Self {
            x: (key >> 16) as u16,
            y: (key & 0xffff) as u16,
        }
    }

    /// Neighbouring cell, `None` when it falls off the grid
    pub fn offset(self, dx: i32, dy: i32) -> Option<Self> {
        let x = i32::from(self.x) + dx;
        let y = i32::from(self.y) + dy;
        let range = 0..i32::from(MMAP_GRID_COUNT);
        if range.contains(&x) && range.contains(&y) {
            Some(Self::new(x as u16, y as u16))
        } else {
            None
        }
    }

    /// This cell and its up to eight neighbours
    pub fn neighbourhood(self) -> impl Iterator<Item = TileCoord> {
        (-1..=1).flat_map(move |dy| (-1..=1).filter_map(move |dx| self.offset(dx, dy)))
    }

    /// Grid cell containing a world position
    pub fn from_world(pos: Vec3) -> Option<Self> {
        let gx = 32.0 - pos.x / MMAP_GRID_SIZE;
        let gy = 32.0 - pos.y / MMAP_GRID_SIZE;
        let range = 0.0..f32::from(MMAP_GRID_COUNT);
        if !range.contains(&gx) || !range.contains(&gy) {
            return None;
        }
        Some(Self::new(gx as u16, gy as u16))
    }

    /// Location of this cell in the navigation mesh tile grid
    ///
    /// Valid for meshes whose origin lies 32 cells below zero on both
    /// horizontal axes, which is how map meshes are laid out.
    pub fn mesh_tile_location(self) -> (i32, i32) {
        (63 - i32::from(self.y), 63 - i32::from(self.x))
    }
}

impl fmt::Display for TileCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:02},{:02}]", self.x, self.y)
    }
}

/// Converts a world position to navigation mesh space
pub fn world_to_nav(pos: Vec3) -> [f32; 3] {
    [pos.y, pos.z, pos.x]
}

/// Converts a navigation mesh position to world space
pub fn nav_to_world(pos: &[f32; 3]) -> Vec3 {
    Vec3::new(pos[2], pos[0], pos[1])
}
