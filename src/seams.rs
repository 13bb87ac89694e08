// src/seams.rs - Stitching boundaries excluded from detection and statistics

use std::collections::BTreeSet;

/// Axis of a seam query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    Row,
    Col,
}

/// Rows and columns where two stitched tiles meet, each widened by `radius`
/// pixels on both sides.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SeamSet {
    rows: BTreeSet<usize>,
    cols: BTreeSet<usize>,
    radius: usize,
}

impl SeamSet {
    pub fn new(radius: usize) -> Self {
        Self {
            rows: BTreeSet::new(),
            cols: BTreeSet::new(),
            radius,
        }
    }

    /// Seams at every internal boundary of a regular tile grid
    pub fn from_tile_grid(
        tile_rows: usize,
        tile_cols: usize,
        frame_height: usize,
        frame_width: usize,
        radius: usize,
    ) -> Self {
        let mut seams = Self::new(radius);
        for k in 1..tile_rows {
            seams.add_row(k * frame_height);
        }
        for k in 1..tile_cols {
            seams.add_col(k * frame_width);
        }
        seams
    }

    pub fn add_row(&mut self, row: usize) {
        self.rows.insert(row);
    }

    pub fn add_col(&mut self, col: usize) {
        self.cols.insert(col);
    }

    pub fn radius(&self) -> usize {
        self.radius
    }

    pub fn rows(&self) -> impl Iterator<Item = usize> + '_ {
        self.rows.iter().copied()
    }

    pub fn cols(&self) -> impl Iterator<Item = usize> + '_ {
        self.cols.iter().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty() && self.cols.is_empty()
    }

    /// True when `position` lies within `radius` of a seam on the given axis
    pub fn is_on_seam(&self, position: usize, axis: Axis) -> bool {
        let seams = match axis {
            Axis::Row => &self.rows,
            Axis::Col => &self.cols,
        };
        let low = position.saturating_sub(self.radius);
        seams.range(low..=position + self.radius).next().is_some()
    }

    /// True when the pixel sits on a seam row or a seam column
    #[inline]
    pub fn contains(&self, row: usize, col: usize) -> bool {
        self.is_on_seam(row, Axis::Row) || self.is_on_seam(col, Axis::Col)
    }
}
