// src/max_rectangle.rs - Fit of a fixed-size frame inside a rotated capillary mask

use nalgebra::{Rotation2, Vector2};

use crate::capillary::Limits;
use crate::filters::IntegralImage;
use crate::pixel_buffer::{PixelBuffer, BLACK, WHITE};
use crate::units::{deg2rad, round_to_usize, PixelPos};

/// Foreground gray level of finder masks
pub const FOREGROUND: u8 = WHITE;

/// Side of the dilation neighbourhood
const DILATION_KERNEL: usize = 3;

/// Frame geometry and acceptance rules
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameParams {
    /// Frame width in pixels (columns)
    pub width: usize,

    /// Frame height in pixels (rows)
    pub height: usize,

    /// Minimal foreground fraction accepted as a fit
    pub score_threshold: f32,

    /// Rotation step of the search in degrees
    pub angle_step_deg: usize,
}

/// Outcome of one rotation of the search
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AngleAttempt {
    pub angle_deg: usize,

    /// Best foreground fraction found at this angle
    pub local_score: f32,

    /// Best foreground fraction over this and all earlier angles
    pub best_so_far: f32,
}

/// Rotation about the centre of a crop, placing the result about the centre
/// of a larger square scratch buffer. x is the column, y the row.
#[derive(Debug, Clone, Copy)]
pub struct CropRotation {
    rotation: Rotation2<f64>,
    source_center: Vector2<f64>,
    target_center: Vector2<f64>,
}

impl CropRotation {
    pub fn new(angle_deg: usize, source_rows: usize, source_cols: usize, target_side: usize) -> Self {
        Self {
            rotation: Rotation2::new((angle_deg as f64).to_radians()),
            source_center: Vector2::new(
                (source_cols as f64 - 1.0) / 2.0,
                (source_rows as f64 - 1.0) / 2.0,
            ),
            target_center: Vector2::new(target_side as f64 / 2.0, target_side as f64 / 2.0),
        }
    }

    /// Rotated position of a crop pixel, `None` when it lands at negative
    /// coordinates
    pub fn to_rotated(&self, pos: PixelPos) -> Option<PixelPos> {
        let point = Vector2::new(pos.col as f64, pos.row as f64);
        let rotated = self.rotation * (point - self.source_center) + self.target_center;
        let (x, y) = (rotated.x.round(), rotated.y.round());
        if x < 0.0 || y < 0.0 {
            return None;
        }
        Some(PixelPos::new(y as usize, x as usize))
    }

    /// Crop position of a rotated pixel, rounded and clamped to zero
    pub fn to_source(&self, pos: PixelPos) -> PixelPos {
        let point = Vector2::new(pos.col as f64, pos.row as f64);
        let source = self.rotation.inverse() * (point - self.target_center) + self.source_center;
        PixelPos::new(
            round_to_usize(source.y as f32),
            round_to_usize(source.x as f32),
        )
    }
}

/// Best window found so far
#[derive(Debug, Clone, Copy)]
struct WindowFit {
    angle_deg: usize,
    top: usize,
    left: usize,
    fraction: f64,
}

/// Brute-force search for the rotation at which a fixed frame is best filled
/// by a capillary mask.
///
/// The mask must hold `FOREGROUND` pixels on a background of any other value
/// and be at least as large as the frame; callers check the size.
pub struct MaxRectangleFinder {
    mask: PixelBuffer,
    origin: PixelPos,
    params: FrameParams,
    best: Option<WindowFit>,
    attempts: Vec<AngleAttempt>,
}

impl MaxRectangleFinder {
    /// `origin` is the position of the mask's top-left pixel in the layer
    pub fn new(mask: PixelBuffer, origin: PixelPos, params: FrameParams) -> Self {
        Self {
            mask,
            origin,
            params,
            best: None,
            attempts: Vec::new(),
        }
    }

    /// Run the search and return the frame corners in layer coordinates,
    /// clockwise from the top-left corner of the unrotated frame.
    ///
    /// The search stops at the first angle whose fit meets the threshold.
    /// `None` when no angle reached it.
    pub fn find_rectangle(&mut self) -> Option<[PixelPos; 4]> {
        self.best = None;
        self.attempts.clear();

        let rows = self.mask.rows();
        let cols = self.mask.cols();
        let side = 2 * rows.max(cols);
        let threshold = self.params.score_threshold as f64;
        let step = self.params.angle_step_deg.max(1);

        // Scratch buffers live across angles and are reset before each use
        let mut rotated = PixelBuffer::filled(side, side, BLACK);
        let mut dilated = PixelBuffer::filled(side, side, BLACK);

        for angle_deg in (0..180).step_by(step) {
            let rotation = CropRotation::new(angle_deg, rows, cols, side);

            rotated.fill(BLACK);
            self.rotate_into(&rotation, &mut rotated);

            dilated.fill(BLACK);
            let local = silhouette_limits(&rotated)
                .and_then(|limits| {
                    dilate(&rotated, &limits, &mut dilated);
                    silhouette_limits(&dilated)
                })
                .and_then(|limits| self.best_window(&dilated, &limits, angle_deg));

            // Later angles can only raise the stored best
            let local_fraction = local.map_or(0.0, |fit| fit.fraction);
            if let Some(fit) = local {
                if self.best.map_or(true, |best| fit.fraction > best.fraction) {
                    self.best = Some(fit);
                }
            }

            self.attempts.push(AngleAttempt {
                angle_deg,
                local_score: local_fraction as f32,
                best_so_far: self.best_fraction() as f32,
            });

            if local_fraction >= threshold {
                break;
            }
        }

        let best = self.best?;
        if best.fraction < threshold {
            return None;
        }

        let rotation = CropRotation::new(best.angle_deg, rows, cols, side);
        let bottom = best.top + self.params.height - 1;
        let right = best.left + self.params.width - 1;
        let corners = [
            PixelPos::new(best.top, best.left),
            PixelPos::new(best.top, right),
            PixelPos::new(bottom, right),
            PixelPos::new(bottom, best.left),
        ];

        Some(corners.map(|corner| {
            let source = rotation.to_source(corner);
            PixelPos::new(source.row + self.origin.row, source.col + self.origin.col)
        }))
    }

    /// Winning angle in radians, 0 before a successful search
    pub fn angle(&self) -> f32 {
        self.best.map_or(0.0, |best| deg2rad(best.angle_deg))
    }

    /// Percentage points by which the best fraction exceeds the threshold
    pub fn score(&self) -> f32 {
        100.0 * (self.best_fraction() as f32 - self.params.score_threshold)
    }

    /// Per-angle history of the last search
    pub fn attempts(&self) -> &[AngleAttempt] {
        &self.attempts
    }

    fn best_fraction(&self) -> f64 {
        self.best.map_or(0.0, |best| best.fraction)
    }

    /// Place every foreground pixel of the mask at its rotated position
    fn rotate_into(&self, rotation: &CropRotation, rotated: &mut PixelBuffer) {
        let side = rotated.rows();
        for row in 0..self.mask.rows() {
            for (col, &value) in self.mask.row(row).iter().enumerate() {
                if value != FOREGROUND {
                    continue;
                }
                if let Some(pos) = rotation.to_rotated(PixelPos::new(row, col)) {
                    if pos.row < side && pos.col < side {
                        rotated.set_at(pos, FOREGROUND);
                    }
                }
            }
        }
    }

    /// Slide the frame over the silhouette and keep the first position with
    /// the highest foreground fraction
    fn best_window(&self, dilated: &PixelBuffer, limits: &Limits, angle_deg: usize) -> Option<WindowFit> {
        let height = self.params.height;
        let width = self.params.width;
        if limits.rows() < height || limits.cols() < width {
            return None;
        }

        let integral = IntegralImage::new(dilated);
        let full_window = (FOREGROUND as u64 * (height * width) as u64) as f64;
        let mut local: Option<WindowFit> = None;

        for top in limits.up..=limits.down + 1 - height {
            for left in limits.left..=limits.right + 1 - width {
                let fraction = integral.window_sum(top, left, height, width) as f64 / full_window;
                if fraction > local.map_or(0.0, |fit| fit.fraction) {
                    local = Some(WindowFit {
                        angle_deg,
                        top,
                        left,
                        fraction,
                    });
                }
            }
        }

        local
    }
}

/// Bounding box of foreground pixels found by scanning inwards from each side
fn silhouette_limits(buffer: &PixelBuffer) -> Option<Limits> {
    let rows = buffer.rows();
    let cols = buffer.cols();
    let row_has_foreground = |row: usize| buffer.row(row).contains(&FOREGROUND);
    let col_has_foreground = |col: usize| (0..rows).any(|row| buffer.get(row, col) == FOREGROUND);

    let up = (0..rows).find(|&row| row_has_foreground(row))?;
    let down = (0..rows).rev().find(|&row| row_has_foreground(row))?;
    let left = (0..cols).find(|&col| col_has_foreground(col))?;
    let right = (0..cols).rev().find(|&col| col_has_foreground(col))?;

    Some(Limits {
        up,
        down,
        left,
        right,
    })
}

/// Majority dilation: every pixel of the silhouette box whose 3x3
/// neighbourhood holds more than `area / 2 - 1` foreground pixels fills that
/// whole neighbourhood in `dilated`
fn dilate(src: &PixelBuffer, limits: &Limits, dilated: &mut PixelBuffer) {
    let rows = src.rows();
    let cols = src.cols();
    let half = DILATION_KERNEL / 2;
    let min_count = DILATION_KERNEL * DILATION_KERNEL / 2 - 1;

    for row in limits.up..=limits.down {
        let row_range = row.saturating_sub(half)..(row + half + 1).min(rows);
        for col in limits.left..=limits.right {
            let col_range = col.saturating_sub(half)..(col + half + 1).min(cols);

            let count = row_range
                .clone()
                .map(|r| {
                    src.row(r)[col_range.clone()]
                        .iter()
                        .filter(|&&value| value == FOREGROUND)
                        .count()
                })
                .sum::<usize>();

            if count > min_count {
                for r in row_range.clone() {
                    for c in col_range.clone() {
                        dilated.set(r, c, FOREGROUND);
                    }
                }
            }
        }
    }
}
