// src/units.rs - Physical and pixel coordinates

use serde::{Deserialize, Serialize};

/// Physical position in millimeters
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Point3D {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Point3D {
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }
}

/// Pixel position in a buffer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PixelPos {
    pub row: usize,
    pub col: usize,
}

impl PixelPos {
    pub fn new(row: usize, col: usize) -> Self {
        Self { row, col }
    }

    /// Squared Euclidean distance, used for radius checks without sqrt
    #[inline]
    pub fn distance_sq(&self, other: &PixelPos) -> usize {
        let dr = self.row.abs_diff(other.row);
        let dc = self.col.abs_diff(other.col);
        dr * dr + dc * dc
    }
}

/// Millimeter to pixel conversion with a single global scale factor
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Units {
    pixels_in_mm: f32,
}

impl Units {
    pub fn new(pixels_in_mm: f32) -> Self {
        Self { pixels_in_mm }
    }

    pub fn pixels_in_mm(&self) -> f32 {
        self.pixels_in_mm
    }

    /// Convert millimeters to pixels, rounding half away from zero.
    /// Negative positions clamp to pixel 0.
    #[inline]
    pub fn mm_to_pixels(&self, mm: f32) -> usize {
        round_to_usize(self.pixels_in_mm * mm)
    }

    #[inline]
    pub fn pixels_to_mm(&self, pixels: usize) -> f32 {
        pixels as f32 / self.pixels_in_mm
    }

    /// Pixel position of the (x, y) part of a physical point
    pub fn to_pixel_pos(&self, point: &Point3D) -> PixelPos {
        PixelPos::new(self.mm_to_pixels(point.y), self.mm_to_pixels(point.x))
    }

    /// Physical point of a pixel on a layer at height `z`
    pub fn to_point(&self, pos: PixelPos, z: f32) -> Point3D {
        Point3D::new(self.pixels_to_mm(pos.col), self.pixels_to_mm(pos.row), z)
    }
}

/// Round half away from zero and clamp to the unsigned range
#[inline]
pub fn round_to_usize(value: f32) -> usize {
    let rounded = value.round();
    if rounded <= 0.0 {
        0
    } else {
        rounded as usize
    }
}

/// Round half away from zero and saturate to a gray level
#[inline]
pub fn round_to_u8(value: f32) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}

pub fn rad2deg(angle_radians: f32) -> usize {
    round_to_usize(angle_radians.to_degrees())
}

pub fn deg2rad(angle_degrees: usize) -> f32 {
    (angle_degrees as f32).to_radians()
}
