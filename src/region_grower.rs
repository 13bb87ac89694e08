// src/region_grower.rs - Breadth-first growth of a capillary from its apex

use std::collections::{HashSet, VecDeque};

use crate::capillary::{CapillaryInfo, Limits};
use crate::config::GrayLevelWindow;
use crate::pixel_buffer::{PixelBuffer, BLACK, WHITE};
use crate::seams::SeamSet;
use crate::units::PixelPos;

/// Gray level marking pixels already claimed by a capillary
pub const VISITED: u8 = WHITE;

/// Parameters of region growth
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RegionParams {
    /// Pixels closer than this to any edge are never entered
    pub border_margin: usize,

    /// Filtered gray levels that belong to a capillary
    pub valid_gray_level: GrayLevelWindow,
}

/// Statistics of a grown capillary together with the pixels it claimed
#[derive(Debug, Clone, Default)]
pub struct CapillaryRegion {
    pub info: CapillaryInfo,
    pub pixels: Vec<PixelPos>,
}

impl CapillaryRegion {
    /// Binary mask of the claimed pixels cropped to the bounding box:
    /// `WHITE` foreground on a `BLACK` background
    pub fn mask(&self) -> PixelBuffer {
        let limits = self.info.limits;
        let mut mask = PixelBuffer::filled(limits.rows(), limits.cols(), BLACK);
        for pos in &self.pixels {
            mask.set(pos.row - limits.up, pos.col - limits.left, WHITE);
        }
        mask
    }
}

/// Grows connected capillary regions over an excess-filtered mask.
///
/// Growth is iterative with a FIFO queue, never recursive, so large
/// capillaries cannot exhaust the stack. Claimed pixels are marked `VISITED`
/// in the mask, which makes growth from an already claimed pixel a no-op.
pub struct RegionGrower<'a> {
    original: &'a PixelBuffer,
    seams: &'a SeamSet,
    params: RegionParams,
}

impl<'a> RegionGrower<'a> {
    /// `original` is the unfiltered layer used for energy accumulation
    pub fn new(original: &'a PixelBuffer, seams: &'a SeamSet, params: RegionParams) -> Self {
        Self {
            original,
            seams,
            params,
        }
    }

    /// Grow a region from `root`, marking claimed pixels in `mask`.
    ///
    /// Seam pixels are passed through without being counted, so a capillary
    /// crossing a stitching boundary stays connected. The result is only
    /// measured here; rejecting small regions is up to the caller.
    pub fn grow(&self, mask: &mut PixelBuffer, root: PixelPos) -> CapillaryRegion {
        let rows = mask.rows();
        let cols = mask.cols();

        let mut info = CapillaryInfo {
            limits: Limits::empty(rows, cols),
            ..Default::default()
        };
        let mut pixels = Vec::new();

        if root.row >= rows || root.col >= cols {
            return CapillaryRegion { info, pixels };
        }

        let mut queue = VecDeque::new();
        let mut passed_seam_pixels = HashSet::new();
        queue.push_back(root);

        while let Some(pos) = queue.pop_front() {
            // Duplicates are expected: a pixel is enqueued from several directions
            if mask.get_at(pos) == VISITED {
                continue;
            }

            if self.seams.contains(pos.row, pos.col) {
                if !passed_seam_pixels.insert(pos) {
                    continue;
                }
            } else {
                info.limits.include(pos);
                info.pixels_capillary += 1;
                info.energy_capillary += self.original.get_at(pos) as u64;
                mask.set_at(pos, VISITED);
                pixels.push(pos);
            }

            self.enqueue_neighbours(mask, pos, &mut queue);
        }

        CapillaryRegion { info, pixels }
    }

    fn enqueue_neighbours(&self, mask: &PixelBuffer, pos: PixelPos, queue: &mut VecDeque<PixelPos>) {
        let margin = self.params.border_margin;
        let row_range = margin..mask.rows().saturating_sub(margin);
        let col_range = margin..mask.cols().saturating_sub(margin);

        let neighbours = [
            pos.row.checked_sub(1).map(|row| PixelPos::new(row, pos.col)),
            Some(PixelPos::new(pos.row + 1, pos.col)),
            pos.col.checked_sub(1).map(|col| PixelPos::new(pos.row, col)),
            Some(PixelPos::new(pos.row, pos.col + 1)),
        ];

        for neighbour in neighbours.into_iter().flatten() {
            if row_range.contains(&neighbour.row)
                && col_range.contains(&neighbour.col)
                && self.params.valid_gray_level.contains(mask.get_at(neighbour))
            {
                queue.push_back(neighbour);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(border_margin: usize) -> RegionParams {
        RegionParams {
            border_margin,
            valid_gray_level: GrayLevelWindow::new(0, 120),
        }
    }

    /// Mask with background 200 and a valid rectangle of value 10
    fn mask_with_block(rows: usize, cols: usize, block: (usize, usize, usize, usize)) -> PixelBuffer {
        let mut mask = PixelBuffer::filled(rows, cols, 200);
        let (up, down, left, right) = block;
        for row in up..=down {
            for col in left..=right {
                mask.set(row, col, 10);
            }
        }
        mask
    }

    #[test]
    fn grows_over_connected_valid_pixels() {
        let original = PixelBuffer::filled(30, 30, 50);
        let seams = SeamSet::new(0);
        let grower = RegionGrower::new(&original, &seams, params(2));
        let mut mask = mask_with_block(30, 30, (5, 14, 8, 11));

        let region = grower.grow(&mut mask, PixelPos::new(7, 9));

        assert_eq!(region.info.pixels_capillary, 40);
        assert_eq!(region.info.energy_capillary, 40 * 50);
        assert_eq!(
            region.info.limits,
            Limits { up: 5, down: 14, left: 8, right: 11 }
        );
        assert_eq!(mask.count_value(VISITED), 40);
        assert_eq!(region.pixels.len(), 40);
    }

    #[test]
    fn second_growth_from_same_root_counts_nothing() {
        let original = PixelBuffer::filled(30, 30, 50);
        let seams = SeamSet::new(0);
        let grower = RegionGrower::new(&original, &seams, params(2));
        let mut mask = mask_with_block(30, 30, (5, 14, 8, 11));

        let first = grower.grow(&mut mask, PixelPos::new(10, 10));
        let second = grower.grow(&mut mask, PixelPos::new(10, 10));

        assert_eq!(first.info.pixels_capillary, 40);
        assert_eq!(second.info.pixels_capillary, 0);
        assert_eq!(second.info.energy_capillary, 0);
        assert!(second.info.limits.is_empty());
    }

    #[test]
    fn border_margin_stops_growth() {
        let original = PixelBuffer::filled(20, 20, 50);
        let seams = SeamSet::new(0);
        let grower = RegionGrower::new(&original, &seams, params(5));
        let mut mask = PixelBuffer::filled(20, 20, 10);

        let region = grower.grow(&mut mask, PixelPos::new(10, 10));

        // Rows and cols 5..15 are reachable
        assert_eq!(region.info.pixels_capillary, 100);
        assert_eq!(
            region.info.limits,
            Limits { up: 5, down: 14, left: 5, right: 14 }
        );
    }

    #[test]
    fn seams_are_passed_through_but_not_counted() {
        let mut original = PixelBuffer::filled(40, 40, 50);
        let mut seams = SeamSet::new(1);
        seams.add_col(20);
        // Seam pixels carry energy that must not be accumulated
        for row in 0..40 {
            for col in 19..=21 {
                original.set(row, col, 255);
            }
        }
        let grower = RegionGrower::new(&original, &seams, params(2));
        let mut mask = mask_with_block(40, 40, (10, 19, 10, 29));

        let region = grower.grow(&mut mask, PixelPos::new(12, 11));

        // 10 rows x 20 cols minus 3 seam columns
        assert_eq!(region.info.pixels_capillary, 170);
        assert_eq!(region.info.energy_capillary, 170 * 50);
        assert_eq!(region.info.limits.right, 29);
        assert_eq!(mask.get(15, 20), 10);
        assert_eq!(mask.get(15, 25), VISITED);
    }

    #[test]
    fn claimed_pixels_form_cropped_mask() {
        let original = PixelBuffer::filled(30, 30, 50);
        let seams = SeamSet::new(0);
        let grower = RegionGrower::new(&original, &seams, params(2));
        let mut mask = mask_with_block(30, 30, (5, 9, 8, 10));
        mask.set(9, 8, 200);

        let region = grower.grow(&mut mask, PixelPos::new(5, 8));
        let cropped = region.mask();

        assert_eq!((cropped.rows(), cropped.cols()), (5, 3));
        assert_eq!(cropped.count_value(WHITE), 14);
        assert_eq!(cropped.get(4, 0), BLACK);
    }

    #[test]
    fn root_outside_mask_yields_empty_region() {
        let original = PixelBuffer::filled(10, 10, 50);
        let seams = SeamSet::new(0);
        let grower = RegionGrower::new(&original, &seams, params(1));
        let mut mask = PixelBuffer::filled(10, 10, 10);

        let region = grower.grow(&mut mask, PixelPos::new(10, 3));
        assert_eq!(region.info.pixels_capillary, 0);
        assert!(region.pixels.is_empty());
    }
}
