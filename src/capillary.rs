// src/capillary.rs - Records produced by detection and description passes

use serde::Serialize;

use crate::units::{PixelPos, Point3D};

/// Candidate capillary apex found by corner detection
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ScoredCorner {
    /// Physical position (mm) relative to the map origin
    pub position: Point3D,

    /// Percentage by which the local gradient exceeds the detection threshold
    pub score: f32,

    /// Raw gray level at the apex
    pub gray_level: u8,
}

impl ScoredCorner {
    pub fn new(position: Point3D, score: f32, gray_level: u8) -> Self {
        Self {
            position,
            score,
            gray_level,
        }
    }
}

/// Inclusive bounding box in pixels
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Limits {
    pub up: usize,
    pub down: usize,
    pub left: usize,
    pub right: usize,
}

impl Limits {
    /// Inverted box that any `include` call shrinks onto the first pixel
    pub fn empty(rows: usize, cols: usize) -> Self {
        Self {
            up: rows,
            down: 0,
            left: cols,
            right: 0,
        }
    }

    #[inline]
    pub fn include(&mut self, pos: PixelPos) {
        self.up = self.up.min(pos.row);
        self.down = self.down.max(pos.row);
        self.left = self.left.min(pos.col);
        self.right = self.right.max(pos.col);
    }

    pub fn is_empty(&self) -> bool {
        self.up > self.down || self.left > self.right
    }

    pub fn rows(&self) -> usize {
        if self.is_empty() {
            0
        } else {
            self.down - self.up + 1
        }
    }

    pub fn cols(&self) -> usize {
        if self.is_empty() {
            0
        } else {
            self.right - self.left + 1
        }
    }

    pub fn origin(&self) -> PixelPos {
        PixelPos::new(self.up, self.left)
    }
}

/// Description of a single capillary grown from an apex
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CapillaryInfo {
    /// Index of the apex in the layer's ranked corner list
    pub index: usize,
    pub apex: Point3D,
    pub limits: Limits,
    pub pixels_capillary: usize,
    pub energy_capillary: u64,
    pub pixels_surroundings: usize,
    pub energy_surroundings: u64,
    /// Rotation of the fitted frame in radians
    pub angle: f32,
    pub score: f32,
}

impl CapillaryInfo {
    pub fn new(index: usize, apex: Point3D) -> Self {
        Self {
            index,
            apex,
            ..Default::default()
        }
    }

    /// Average surrounding gray level minus average capillary gray level.
    /// Zero when either side has no pixels.
    pub fn contrast(&self) -> i32 {
        if self.pixels_capillary == 0 || self.pixels_surroundings == 0 {
            return 0;
        }
        let avg_capillary =
            (self.energy_capillary as f32 / self.pixels_capillary as f32).round() as i32;
        let avg_surroundings =
            (self.energy_surroundings as f32 / self.pixels_surroundings as f32).round() as i32;
        avg_surroundings - avg_capillary
    }
}

/// Per-layer detection and description results
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LayerInfo {
    pub layer_index: usize,
    pub z: f32,

    /// Detected corners ranked by score
    pub capillary_apexes: Vec<ScoredCorner>,

    /// Capillaries that hold a frame, ranked by score
    pub capillaries: Vec<CapillaryInfo>,

    pub max_score: f32,
    pub sum_score: f32,
}

impl LayerInfo {
    pub fn new(layer_index: usize, z: f32) -> Self {
        Self {
            layer_index,
            z,
            ..Default::default()
        }
    }
}
