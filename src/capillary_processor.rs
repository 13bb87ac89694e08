// src/capillary_processor.rs - Description of capillaries grown from detected apexes

use std::fmt;
use std::time::Instant;

use log::{debug, info};

use crate::capillary::{CapillaryInfo, LayerInfo};
use crate::filters::{excess_filter, PreFilter};
use crate::max_rectangle::{FrameParams, MaxRectangleFinder};
use crate::pixel_buffer::PixelBuffer;
use crate::region_grower::{RegionGrower, RegionParams};
use crate::seams::SeamSet;
use crate::units::{PixelPos, Units};

/// Parameters of capillary description
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProcessorParams {
    /// Kernel of the excess filter baseline
    pub deep_kernel_size: usize,

    /// Kernel of the uniform pre-filter
    pub fine_kernel_size: usize,

    pub pre_filter: PreFilter,

    /// Regions with fewer pixels never reach frame fitting
    pub min_pixels_in_capillary: usize,

    /// Ranked apexes tried per layer
    pub max_apex_candidates: usize,

    /// Capillaries kept per layer after ranking by score
    pub described_capillaries: usize,

    /// Width of the surrounding band used for contrast
    pub surrounding_pixels: usize,

    pub region: RegionParams,
    pub frame: FrameParams,
}

/// What happened to one apex candidate
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CandidateOutcome {
    /// Fewer pixels than the minimum, not reported
    TooSparse { index: usize, pixels: usize },
    /// Bounding box cannot hold the frame
    TooSmall { index: usize, pixels: usize },
    /// No rotation reached the acceptance threshold
    NoFrame { index: usize, pixels: usize },
    Framed { index: usize, pixels: usize, score: f32 },
}

impl fmt::Display for CandidateOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            CandidateOutcome::TooSparse { index, pixels } => {
                write!(f, "Capillary {}: {} pixels - too sparse", index + 1, pixels)
            }
            CandidateOutcome::TooSmall { index, pixels } => {
                write!(f, "Capillary {}: {} pixels - too small", index + 1, pixels)
            }
            CandidateOutcome::NoFrame { index, pixels } => write!(
                f,
                "Capillary {}: {} pixels - score is lower than threshold",
                index + 1,
                pixels
            ),
            CandidateOutcome::Framed { index, pixels, score } => write!(
                f,
                "Capillary {}: {} pixels - score = {:.1}",
                index + 1,
                pixels,
                score
            ),
        }
    }
}

/// Frame fitted into a described capillary, corners in layer pixels
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FittedFrame {
    /// Index of the capillary's apex in the layer's ranked list
    pub index: usize,
    pub corners: [PixelPos; 4],
}

/// Products of describing one layer besides the updated `LayerInfo`
#[derive(Debug, Clone)]
pub struct DescribedLayer {
    /// Excess-filtered layer
    pub filtered: PixelBuffer,

    /// Excess-filtered layer with claimed pixels marked visited
    pub processed: PixelBuffer,

    /// Frames of the capillaries kept in `LayerInfo::capillaries`
    pub frames: Vec<FittedFrame>,

    pub outcomes: Vec<CandidateOutcome>,
}

/// Grows, filters and frames the capillaries of one layer.
///
/// Candidates are handled sequentially: every region marks its pixels in the
/// shared processed mask so later candidates cannot claim them again.
pub struct CapillaryProcessor {
    params: ProcessorParams,
    units: Units,
}

impl CapillaryProcessor {
    pub fn new(params: ProcessorParams, units: Units) -> Self {
        Self { params, units }
    }

    /// Describe the capillaries of `layer` starting from the apexes already
    /// stored in `layer_info`.
    ///
    /// Capillaries, max score and sum score of `layer_info` are replaced by
    /// the description results.
    pub fn describe_capillaries(
        &self,
        layer: &PixelBuffer,
        seams: &SeamSet,
        layer_info: &mut LayerInfo,
    ) -> DescribedLayer {
        let layer_number = layer_info.layer_index + 1;
        let start = Instant::now();

        layer_info.capillaries.clear();
        layer_info.max_score = 0.0;
        layer_info.sum_score = 0.0;

        // Filters in chain: optional smoothing, then the excess mask
        let smoothed = self.params.pre_filter.apply(layer, self.params.fine_kernel_size);
        let filtered = excess_filter(&smoothed, self.params.deep_kernel_size);
        // Shares storage until the first region marks its pixels
        let mut processed = filtered.clone();

        let candidates = layer_info
            .capillary_apexes
            .len()
            .min(self.params.max_apex_candidates);
        info!(
            "Layer {} - describing of capillaries started: {} capillaries",
            layer_number, candidates
        );

        let grower = RegionGrower::new(layer, seams, self.params.region);
        let frame = self.params.frame;
        let mut frames = Vec::new();
        let mut outcomes = Vec::with_capacity(candidates);

        for (index, apex) in layer_info.capillary_apexes.iter().take(candidates).enumerate() {
            let root = self.units.to_pixel_pos(&apex.position);
            let region = grower.grow(&mut processed, root);
            let pixels = region.info.pixels_capillary;

            let outcome = if pixels < self.params.min_pixels_in_capillary {
                CandidateOutcome::TooSparse { index, pixels }
            } else if region.info.limits.rows() < frame.height
                || region.info.limits.cols() < frame.width
            {
                CandidateOutcome::TooSmall { index, pixels }
            } else {
                let mut finder =
                    MaxRectangleFinder::new(region.mask(), region.info.limits.origin(), frame);
                match finder.find_rectangle() {
                    Some(corners) => {
                        let capillary = CapillaryInfo {
                            index,
                            apex: apex.position,
                            angle: finder.angle(),
                            score: finder.score(),
                            ..region.info
                        };
                        layer_info.capillaries.push(capillary);
                        frames.push(FittedFrame { index, corners });
                        CandidateOutcome::Framed {
                            index,
                            pixels,
                            score: finder.score(),
                        }
                    }
                    None => CandidateOutcome::NoFrame { index, pixels },
                }
            };

            debug!("Layer {} - {}", layer_number, outcome);
            outcomes.push(outcome);
        }

        info!(
            "Layer {} - describing of capillaries completed in {} ms",
            layer_number,
            start.elapsed().as_millis()
        );

        if layer_info.capillaries.is_empty() {
            info!("Layer {} - no capillaries found to hold FOV frame", layer_number);
        } else {
            self.collect_surroundings(layer, &mut layer_info.capillaries);
            self.trim_and_set_layer_scores(layer_info);
            frames.retain(|frame| {
                layer_info
                    .capillaries
                    .iter()
                    .any(|capillary| capillary.index == frame.index)
            });
        }

        DescribedLayer {
            filtered,
            processed,
            frames,
            outcomes,
        }
    }

    /// Accumulate pixels and gray levels of four bands around each capillary's
    /// bounding box, clipped to the layer
    pub fn collect_surroundings(&self, original: &PixelBuffer, capillaries: &mut [CapillaryInfo]) {
        let rows = original.rows();
        let cols = original.cols();
        let margin = self.params.surrounding_pixels;

        for capillary in capillaries.iter_mut() {
            if capillary.pixels_capillary < self.params.min_pixels_in_capillary {
                continue;
            }
            let limits = capillary.limits;
            let below = (limits.down + 1).min(rows);
            let right = (limits.right + 1).min(cols);

            // Bands as half-open (up, down, left, right)
            let bands = [
                (limits.up.saturating_sub(margin), limits.up, limits.left, right),
                (below, (below + margin).min(rows), limits.left, right),
                (limits.up, below, limits.left.saturating_sub(margin), limits.left),
                (limits.up, below, right, (right + margin).min(cols)),
            ];

            for (up, down, left, right) in bands {
                for row in up..down {
                    let band = &original.row(row)[left..right];
                    capillary.pixels_surroundings += band.len();
                    capillary.energy_surroundings +=
                        band.iter().map(|&value| value as u64).sum::<u64>();
                }
            }
        }
    }

    /// Rank capillaries by descending score, keep the configured number and
    /// set the layer's max and sum scores
    pub fn trim_and_set_layer_scores(&self, layer_info: &mut LayerInfo) {
        let capillaries = &mut layer_info.capillaries;
        capillaries.sort_by(|a, b| b.score.total_cmp(&a.score));

        layer_info.max_score = capillaries.first().map_or(0.0, |capillary| capillary.score);
        capillaries.truncate(self.params.described_capillaries);
        layer_info.sum_score = capillaries.iter().map(|capillary| capillary.score).sum();
    }
}
