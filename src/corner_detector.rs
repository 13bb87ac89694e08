// src/corner_detector.rs - Sobel-based detection of capillary apex candidates

use crate::capillary::ScoredCorner;
use crate::config::GrayLevelWindow;
use crate::filters::sobel_gradient;
use crate::pixel_buffer::PixelBuffer;
use crate::seams::{Axis, SeamSet};
use crate::units::{PixelPos, Units};

/// Parameters of corner detection
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CornerParams {
    /// Size of the gradient averaging neighbourhood
    pub kernel_size: usize,

    /// Minimal average gradient accepted as a corner
    pub gradient_threshold: u8,

    /// Minimal allowed distance between detected corners
    pub min_distance_px: usize,

    /// Rows at the bottom of the layer excluded from the search
    pub cropped_rows: usize,

    /// Raw gray levels a capillary apex may have
    pub valid_gray_level: GrayLevelWindow,
}

/// Corner found during the scan, still in pixel units
#[derive(Debug, Clone, Copy)]
struct PixelCorner {
    pos: PixelPos,
    score: f32,
    gray_level: u8,
}

/// Finds high-gradient pixels with capillary-like gray levels and keeps the
/// strongest one within each `min_distance_px` neighbourhood
pub struct CornerDetector {
    params: CornerParams,
    units: Units,
}

impl CornerDetector {
    pub fn new(params: CornerParams, units: Units) -> Self {
        Self { params, units }
    }

    /// Detect apex candidates on a raw layer image at height `z`.
    ///
    /// Returns corners ranked by descending score; corners of equal score keep
    /// their row-major scan order. An image without valid pixels yields an
    /// empty list.
    pub fn detect(&self, layer: &PixelBuffer, seams: &SeamSet, z: f32) -> Vec<ScoredCorner> {
        let rows = layer.rows();
        let cols = layer.cols();
        let half = (self.params.kernel_size / 2).max(1);
        let kernel_size = 2 * half + 1;

        if rows <= 2 * half || cols <= 2 * half {
            return Vec::new();
        }

        let gradient = sobel_gradient(layer);
        let threshold = self.params.gradient_threshold as f32;
        let kernel_area = (kernel_size * kernel_size) as f32;
        let min_distance_sq = self.params.min_distance_px * self.params.min_distance_px;

        let row_end = (rows - half).min(rows.saturating_sub(self.params.cropped_rows));
        let col_end = cols - half;

        let mut corners: Vec<PixelCorner> = Vec::new();

        for row in half..row_end {
            if seams.is_on_seam(row, Axis::Row) {
                continue;
            }

            for col in half..col_end {
                if seams.is_on_seam(col, Axis::Col) {
                    continue;
                }

                // Reject background and flare
                let gray_level = layer.get(row, col);
                if !self.params.valid_gray_level.contains(gray_level) {
                    continue;
                }

                let mut sum = 0u32;
                for kernel_row in row - half..=row + half {
                    for &value in &gradient.row(kernel_row)[col - half..=col + half] {
                        sum += value as u32;
                    }
                }
                let average = sum as f32 / kernel_area;
                if average < threshold {
                    continue;
                }

                let candidate = PixelCorner {
                    pos: PixelPos::new(row, col),
                    score: 100.0 * (average / threshold - 1.0),
                    gray_level,
                };
                merge_corner(&mut corners, candidate, min_distance_sq);
            }
        }

        // Stable sort keeps first-found order for equal scores
        corners.sort_by(|a, b| b.score.total_cmp(&a.score));

        corners
            .into_iter()
            .map(|corner| {
                ScoredCorner::new(
                    self.units.to_point(corner.pos, z),
                    corner.score,
                    corner.gray_level,
                )
            })
            .collect()
    }
}

/// Online non-maximum suppression: replace the first existing corner within
/// the radius when the candidate scores strictly higher, otherwise drop the
/// candidate; append when no corner is near.
fn merge_corner(corners: &mut Vec<PixelCorner>, candidate: PixelCorner, min_distance_sq: usize) {
    if let Some(existing) = corners
        .iter_mut()
        .find(|corner| corner.pos.distance_sq(&candidate.pos) < min_distance_sq)
    {
        if candidate.score > existing.score {
            *existing = candidate;
        }
        return;
    }
    corners.push(candidate);
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    fn params() -> CornerParams {
        CornerParams {
            kernel_size: 3,
            gradient_threshold: 30,
            min_distance_px: 20,
            cropped_rows: 0,
            valid_gray_level: GrayLevelWindow::new(30, 90),
        }
    }

    fn image_with_squares(squares: &[(usize, usize, u8)]) -> PixelBuffer {
        let mut image = PixelBuffer::filled(80, 80, 100);
        for &(top, left, value) in squares {
            for row in top..top + 3 {
                for col in left..left + 3 {
                    image.set(row, col, value);
                }
            }
        }
        image
    }

    fn pixel_of(corner: &ScoredCorner, units: &Units) -> PixelPos {
        units.to_pixel_pos(&corner.position)
    }

    #[test]
    fn close_corners_collapse_to_the_stronger() {
        let units = Units::new(10.0);
        let detector = CornerDetector::new(params(), units);
        // Weak square first in scan order, strong square 10 px away
        let image = image_with_squares(&[(20, 20, 85), (24, 30, 60)]);

        let corners = detector.detect(&image, &SeamSet::new(0), 2.0);

        assert_eq!(corners.len(), 1);
        assert_eq!(pixel_of(&corners[0], &units), PixelPos::new(25, 31));
        assert_eq!(corners[0].gray_level, 60);
        assert_approx_eq!(corners[0].position.z, 2.0);
    }

    #[test]
    fn equal_scores_keep_the_first_found_corner() {
        let units = Units::new(10.0);
        let detector = CornerDetector::new(params(), units);
        // Identical squares 10 px apart on the same rows
        let image = image_with_squares(&[(20, 20, 60), (20, 30, 60)]);

        let corners = detector.detect(&image, &SeamSet::new(0), 0.0);

        assert_eq!(corners.len(), 1);
        assert_eq!(pixel_of(&corners[0], &units), PixelPos::new(21, 21));
        assert_approx_eq!(corners[0].score, 100.0 * (1600.0 / 9.0 / 30.0 - 1.0), 1e-3);
    }

    #[test]
    fn distant_corners_are_ranked_by_score() {
        let units = Units::new(10.0);
        let detector = CornerDetector::new(params(), units);
        let image = image_with_squares(&[(20, 20, 85), (50, 55, 60)]);

        let corners = detector.detect(&image, &SeamSet::new(0), 0.0);

        assert_eq!(corners.len(), 2);
        assert_eq!(pixel_of(&corners[0], &units), PixelPos::new(51, 56));
        assert_eq!(pixel_of(&corners[1], &units), PixelPos::new(21, 21));
        assert!(corners[0].score > corners[1].score);
    }

    #[test]
    fn score_is_percentage_above_threshold() {
        let units = Units::new(1.0);
        let detector = CornerDetector::new(params(), units);
        let corners = detector.detect(&image_with_squares(&[(20, 20, 85)]), &SeamSet::new(0), 0.0);

        // Gradients inside a 3x3 square of contrast 15 sum to 600
        assert_eq!(corners.len(), 1);
        assert_approx_eq!(corners[0].score, 100.0 * (600.0 / 9.0 / 30.0 - 1.0), 1e-3);
    }

    #[test]
    fn seams_and_cropped_rows_suppress_detection() {
        let units = Units::new(1.0);
        let image = image_with_squares(&[(50, 55, 60)]);

        let mut seams = SeamSet::new(2);
        seams.add_col(56);
        let detector = CornerDetector::new(params(), units);
        assert!(detector.detect(&image, &seams, 0.0).is_empty());

        let mut cropped = params();
        cropped.cropped_rows = 30;
        let detector = CornerDetector::new(cropped, units);
        assert!(detector.detect(&image, &SeamSet::new(0), 0.0).is_empty());
    }

    #[test]
    fn flat_or_out_of_window_images_yield_nothing() {
        let detector = CornerDetector::new(params(), Units::new(1.0));
        assert!(detector
            .detect(&PixelBuffer::filled(40, 40, 60), &SeamSet::new(0), 0.0)
            .is_empty());
        assert!(detector
            .detect(&PixelBuffer::filled(40, 40, 200), &SeamSet::new(0), 0.0)
            .is_empty());
        assert!(detector
            .detect(&PixelBuffer::new(2, 2), &SeamSet::new(0), 0.0)
            .is_empty());
    }
}
