// src/filters.rs - Convolution filters over pixel buffers

use serde::{Deserialize, Serialize};

use crate::pixel_buffer::{PixelBuffer, BLACK, WHITE};
use crate::units::round_to_u8;

/// Baseline ratio below which a pixel counts as darker than its surroundings
const EXCESS_BASELINE: f32 = 0.75;

/// Summed-area table of a buffer, giving any rectangular sum in O(1)
pub struct IntegralImage {
    cols: usize,
    sums: Vec<u64>,
}

impl IntegralImage {
    pub fn new(buffer: &PixelBuffer) -> Self {
        let rows = buffer.rows();
        let cols = buffer.cols();
        let stride = cols + 1;
        let mut sums = vec![0u64; (rows + 1) * stride];

        for row in 0..rows {
            let mut row_sum = 0u64;
            for (col, &value) in buffer.row(row).iter().enumerate() {
                row_sum += value as u64;
                sums[(row + 1) * stride + col + 1] = sums[row * stride + col + 1] + row_sum;
            }
        }

        Self { cols, sums }
    }

    /// Sum of the half-open window `[top, top + rows) x [left, left + cols)`
    #[inline]
    pub fn window_sum(&self, top: usize, left: usize, rows: usize, cols: usize) -> u64 {
        let stride = self.cols + 1;
        let bottom = top + rows;
        let right = left + cols;
        self.sums[bottom * stride + right] + self.sums[top * stride + left]
            - self.sums[top * stride + right]
            - self.sums[bottom * stride + left]
    }

    /// Sum of a square kernel of odd `size` centered at (row, col)
    #[inline]
    pub fn kernel_sum(&self, row: usize, col: usize, size: usize) -> u64 {
        let half = size / 2;
        self.window_sum(row - half, col - half, size, size)
    }
}

/// Optional smoothing stage chained in front of the excess filter
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PreFilter {
    #[default]
    None,
    Gaussian,
    Uniform,
}

impl PreFilter {
    /// Apply the stage; `None` hands back a shared copy of `src`
    pub fn apply(&self, src: &PixelBuffer, fine_kernel_size: usize) -> PixelBuffer {
        match self {
            PreFilter::None => src.clone(),
            PreFilter::Gaussian => gaussian_blur(src),
            PreFilter::Uniform => uniform_smoothing(src, fine_kernel_size),
        }
    }
}

/// True when (row, col) lies within `margin` pixels of any edge
#[inline]
fn in_margin(row: usize, col: usize, rows: usize, cols: usize, margin: usize) -> bool {
    row < margin || col < margin || row + margin >= rows || col + margin >= cols
}

/// 3x3 Gaussian blur (weights 1-2-1, normalized by 16).
/// The one-pixel margin is copied from the source.
pub fn gaussian_blur(src: &PixelBuffer) -> PixelBuffer {
    let rows = src.rows();
    let cols = src.cols();
    let mut dst = src.clone();

    for row in 0..rows {
        for col in 0..cols {
            if in_margin(row, col, rows, cols, 1) {
                continue;
            }

            let center = src.get(row, col) as u16;
            let edges = src.get(row, col - 1) as u16
                + src.get(row, col + 1) as u16
                + src.get(row - 1, col) as u16
                + src.get(row + 1, col) as u16;
            let corners = src.get(row - 1, col - 1) as u16
                + src.get(row - 1, col + 1) as u16
                + src.get(row + 1, col - 1) as u16
                + src.get(row + 1, col + 1) as u16;

            let sum = 4 * center + 2 * edges + corners;
            dst.set(row, col, round_to_u8(sum as f32 / 16.0));
        }
    }

    dst
}

/// Box average over an odd `kernel_size`. Pixels within half a kernel of the
/// border are copied from the source.
pub fn uniform_smoothing(src: &PixelBuffer, kernel_size: usize) -> PixelBuffer {
    let rows = src.rows();
    let cols = src.cols();
    let half = kernel_size / 2;
    let area = (kernel_size * kernel_size) as f32;
    let integral = IntegralImage::new(src);
    let mut dst = src.clone();

    for row in 0..rows {
        for col in 0..cols {
            if in_margin(row, col, rows, cols, half) {
                continue;
            }
            let sum = integral.kernel_sum(row, col, kernel_size);
            dst.set(row, col, round_to_u8(sum as f32 / area));
        }
    }

    dst
}

/// High-pass "excess" filter: each pixel relative to its local box average.
///
/// `excess = 2 * (pixel / blurred - 0.75)`, clamped to [0, 1] and scaled to a
/// gray level. Dark capillary pixels map towards 0, flat background to ~128.
/// Pixels within half a kernel of the border are zeroed, not copied, so that
/// nothing downstream can grow into the dead margin.
pub fn excess_filter(src: &PixelBuffer, kernel_size: usize) -> PixelBuffer {
    let rows = src.rows();
    let cols = src.cols();
    let half = kernel_size / 2;
    let size = kernel_size as f32;
    let integral = IntegralImage::new(src);
    let mut dst = PixelBuffer::new(rows, cols);

    for row in 0..rows {
        for col in 0..cols {
            if in_margin(row, col, rows, cols, half) {
                continue;
            }

            let sum = integral.kernel_sum(row, col, kernel_size);
            let blurred = sum as f32 / size / size;
            let excess = if blurred > 0.0 {
                2.0 * (src.get(row, col) as f32 / blurred - EXCESS_BASELINE)
            } else {
                0.0
            };
            let excess = excess.clamp(0.0, 1.0);
            dst.set(row, col, round_to_u8(WHITE as f32 * excess));
        }
    }

    dst
}

/// Sobel gradient magnitude as the L1 norm |Gx| + |Gy|, saturated to 255.
/// Edge rows and columns are zero.
pub fn sobel_gradient(src: &PixelBuffer) -> PixelBuffer {
    let rows = src.rows();
    let cols = src.cols();
    let mut dst = PixelBuffer::filled(rows, cols, BLACK);

    for row in 0..rows {
        for col in 0..cols {
            if in_margin(row, col, rows, cols, 1) {
                continue;
            }

            let p = |dr: isize, dc: isize| -> i32 {
                src.get((row as isize + dr) as usize, (col as isize + dc) as usize) as i32
            };

            // Gx: [-1 0 1; -2 0 2; -1 0 1]
            let gx = -p(-1, -1) + p(-1, 1) - 2 * p(0, -1) + 2 * p(0, 1) - p(1, -1) + p(1, 1);
            // Gy: [-1 -2 -1; 0 0 0; 1 2 1]
            let gy = -p(-1, -1) - 2 * p(-1, 0) - p(-1, 1) + p(1, -1) + 2 * p(1, 0) + p(1, 1);

            let magnitude = (gx.abs() + gy.abs()).min(WHITE as i32);
            dst.set(row, col, magnitude as u8);
        }
    }

    dst
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pseudo_random(rows: usize, cols: usize, seed: u32) -> PixelBuffer {
        let mut state = seed;
        let data = (0..rows * cols)
            .map(|_| {
                state = state.wrapping_mul(1_103_515_245).wrapping_add(12_345);
                (state >> 16) as u8
            })
            .collect();
        PixelBuffer::from_vec(rows, cols, data).unwrap()
    }

    fn assert_margin_zero(buffer: &PixelBuffer, margin: usize) {
        for row in 0..buffer.rows() {
            for col in 0..buffer.cols() {
                if in_margin(row, col, buffer.rows(), buffer.cols(), margin) {
                    assert_eq!(buffer.get(row, col), 0, "pixel ({}, {})", row, col);
                }
            }
        }
    }

    #[test]
    fn integral_image_matches_direct_sum() {
        let buffer = pseudo_random(9, 7, 3);
        let integral = IntegralImage::new(&buffer);
        let mut direct = 0u64;
        for row in 2..7 {
            for col in 1..4 {
                direct += buffer.get(row, col) as u64;
            }
        }
        assert_eq!(integral.window_sum(2, 1, 5, 3), direct);
    }

    #[test]
    fn gaussian_blur_keeps_flat_image_and_border() {
        let mut src = PixelBuffer::filled(5, 5, 80);
        src.set(0, 0, 3);
        let dst = gaussian_blur(&src);
        assert_eq!(dst.get(0, 0), 3);
        assert_eq!(dst.get(2, 2), 80);
    }

    #[test]
    fn gaussian_blur_weights_center_by_quarter() {
        let mut src = PixelBuffer::new(3, 3);
        src.set(1, 1, 160);
        let dst = gaussian_blur(&src);
        assert_eq!(dst.get(1, 1), 40);
    }

    #[test]
    fn uniform_smoothing_rounds_mean() {
        let mut src = PixelBuffer::new(5, 5);
        src.set(2, 2, 50);
        // 50 / 25 = 2
        let dst = uniform_smoothing(&src, 5);
        assert_eq!(dst.get(2, 2), 2);
        // Margin is copied
        assert_eq!(dst.get(0, 0), 0);

        let mut src = PixelBuffer::new(3, 3);
        src.set(1, 1, 14);
        // 14 / 9 = 1.56 -> 2
        assert_eq!(uniform_smoothing(&src, 3).get(1, 1), 2);
    }

    #[test]
    fn excess_filter_zeroes_margin_for_any_input() {
        for seed in 1..4 {
            let src = pseudo_random(40, 33, seed);
            let dst = excess_filter(&src, 11);
            assert_margin_zero(&dst, 5);
        }
        let dst = excess_filter(&PixelBuffer::filled(20, 20, 255), 7);
        assert_margin_zero(&dst, 3);
    }

    #[test]
    fn excess_filter_separates_dark_spot_from_flat_background() {
        let mut src = PixelBuffer::filled(21, 21, 200);
        src.set(10, 10, 40);
        let dst = excess_filter(&src, 5);
        // Flat background: 2 * (1 - 0.75) * 255 = 127.5 -> 128
        assert_eq!(dst.get(3, 3), 128);
        assert_eq!(dst.get(10, 10), 0);
        // Bright neighbour of the dark spot stands out above background
        assert!(dst.get(10, 11) > 128);
    }

    #[test]
    fn pre_filter_none_shares_storage() {
        let src = pseudo_random(8, 8, 5);
        let dst = PreFilter::None.apply(&src, 5);
        assert!(dst.shares_storage_with(&src));
        assert_eq!(PreFilter::Uniform.apply(&src, 3), uniform_smoothing(&src, 3));
    }

    #[test]
    fn sobel_zeroes_border_for_any_input() {
        for seed in 1..4 {
            let dst = sobel_gradient(&pseudo_random(12, 17, seed));
            assert_margin_zero(&dst, 1);
        }
    }

    #[test]
    fn sobel_measures_vertical_step() {
        let mut src = PixelBuffer::new(5, 6);
        for row in 0..5 {
            for col in 3..6 {
                src.set(row, col, 10);
            }
        }
        let dst = sobel_gradient(&src);
        // Gx = 10 * (1 + 2 + 1) on both sides of the step, Gy = 0
        assert_eq!(dst.get(2, 2), 40);
        assert_eq!(dst.get(2, 3), 40);
        assert_eq!(dst.get(2, 1), 0);
    }

    #[test]
    fn sobel_saturates() {
        let mut src = PixelBuffer::new(3, 3);
        for row in 0..3 {
            src.set(row, 2, 255);
        }
        assert_eq!(sobel_gradient(&src).get(1, 1), 255);
    }
}
