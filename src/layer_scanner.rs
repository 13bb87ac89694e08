// src/layer_scanner.rs - Detection and description passes over all layers

use std::time::Instant;

use log::{info, warn};
use rayon::prelude::*;

use crate::capillary::LayerInfo;
use crate::capillary_processor::{CapillaryProcessor, DescribedLayer};
use crate::config::Config;
use crate::corner_detector::CornerDetector;
use crate::layer_map::{Layer, LayerMap};
use crate::seams::SeamSet;

/// Runs corner detection and capillary description on every layer of a map.
///
/// Layers are independent, so both passes may run one layer per worker.
/// The only cross-layer step is picking the best layer afterwards.
pub struct LayerScanner {
    detector: CornerDetector,
    processor: CapillaryProcessor,
    min_found_capillaries: usize,
    parallel: bool,
}

impl LayerScanner {
    pub fn new(
        detector: CornerDetector,
        processor: CapillaryProcessor,
        min_found_capillaries: usize,
        parallel: bool,
    ) -> Self {
        Self {
            detector,
            processor,
            min_found_capillaries,
            parallel,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        let units = config.units();
        Self::new(
            CornerDetector::new(config.corner_params(), units),
            CapillaryProcessor::new(config.processor_params(), units),
            config.min_found_capillaries,
            config.use_parallel,
        )
    }

    /// Detect apex candidates on every layer; results are ordered by layer
    pub fn detect_capillaries(&self, map: &LayerMap) -> Vec<LayerInfo> {
        info!("Detection of capillaries started");
        let start = Instant::now();

        let seams = map.seams();
        let layer_infos: Vec<LayerInfo> = if self.parallel {
            map.layers()
                .par_iter()
                .enumerate()
                .map(|(index, layer)| self.detect_layer(index, layer, seams))
                .collect()
        } else {
            map.layers()
                .iter()
                .enumerate()
                .map(|(index, layer)| self.detect_layer(index, layer, seams))
                .collect()
        };

        info!(
            "Detection of capillaries completed in {} ms",
            start.elapsed().as_millis()
        );

        layer_infos
    }

    /// Detect apexes on one layer and score the layer by them
    pub fn detect_layer(&self, index: usize, layer: &Layer, seams: &SeamSet) -> LayerInfo {
        let mut layer_info = LayerInfo::new(index, layer.z);
        layer_info.capillary_apexes = self.detector.detect(&layer.buffer, seams, layer.z);
        layer_info.max_score = layer_info
            .capillary_apexes
            .first()
            .map_or(0.0, |corner| corner.score);
        layer_info.sum_score = layer_info
            .capillary_apexes
            .iter()
            .map(|corner| corner.score)
            .sum();

        info!(
            "Layer {}: {} corners, max score {:.1}, sum score {:.1}",
            index + 1,
            layer_info.capillary_apexes.len(),
            layer_info.max_score,
            layer_info.sum_score
        );

        layer_info
    }

    /// Describe the capillaries of every detected layer in place.
    /// `layer_infos` must come from `detect_capillaries` on the same map.
    pub fn describe_capillaries(
        &self,
        map: &LayerMap,
        layer_infos: &mut [LayerInfo],
    ) -> Vec<DescribedLayer> {
        let seams = map.seams();
        let describe = |layer_info: &mut LayerInfo| {
            let layer = &map.layers()[layer_info.layer_index];
            self.processor
                .describe_capillaries(&layer.buffer, seams, layer_info)
        };

        if self.parallel {
            layer_infos.par_iter_mut().map(describe).collect()
        } else {
            layer_infos.iter_mut().map(describe).collect()
        }
    }

    /// Layer with the highest apex score sum among layers holding at least
    /// the minimal number of apexes
    pub fn select_best_layer(&self, layer_infos: &[LayerInfo]) -> Option<usize> {
        let mut best: Option<&LayerInfo> = None;
        for layer_info in layer_infos
            .iter()
            .filter(|layer_info| layer_info.capillary_apexes.len() >= self.min_found_capillaries)
        {
            if layer_info.sum_score > best.map_or(0.0, |best| best.sum_score) {
                best = Some(layer_info);
            }
        }
        let best = best.map(|layer_info| layer_info.layer_index);

        match best {
            Some(index) => info!("Best layer: {}", index + 1),
            None => warn!("Not enough capillaries found in all layers"),
        }

        best
    }
}

/// Layer with the highest positive sum of frame scores; the first one wins ties
pub fn select_best_described_layer(layer_infos: &[LayerInfo]) -> Option<usize> {
    let mut best: Option<&LayerInfo> = None;
    for layer_info in layer_infos {
        let best_sum = best.map_or(0.0, |best| best.sum_score);
        if layer_info.sum_score > best_sum {
            best = Some(layer_info);
        }
    }
    best.map(|layer_info| layer_info.layer_index)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capillary::ScoredCorner;
    use crate::pixel_buffer::PixelBuffer;
    use crate::units::Point3D;

    fn layer_with(apexes: usize, sum_score: f32, index: usize) -> LayerInfo {
        let mut layer_info = LayerInfo::new(index, index as f32);
        layer_info.capillary_apexes = vec![ScoredCorner::new(Point3D::default(), 1.0, 50); apexes];
        layer_info.sum_score = sum_score;
        layer_info
    }

    fn scanner(min_found_capillaries: usize) -> LayerScanner {
        LayerScanner::from_config(&Config {
            min_found_capillaries,
            ..Config::default()
        })
    }

    #[test]
    fn best_layer_needs_enough_apexes() {
        let layers = vec![layer_with(2, 90.0, 0), layer_with(3, 40.0, 1), layer_with(5, 60.0, 2)];
        assert_eq!(scanner(3).select_best_layer(&layers), Some(2));
        assert_eq!(scanner(1).select_best_layer(&layers), Some(0));
        assert_eq!(scanner(6).select_best_layer(&layers), None);
    }

    #[test]
    fn best_layer_needs_positive_score() {
        let layers = vec![layer_with(4, 0.0, 0), layer_with(4, -3.0, 1)];
        assert_eq!(scanner(3).select_best_layer(&layers), None);
    }

    #[test]
    fn described_best_layer_keeps_first_of_equal_sums() {
        let layers = vec![layer_with(0, 0.0, 0), layer_with(0, 7.5, 1), layer_with(0, 7.5, 2)];
        assert_eq!(select_best_described_layer(&layers), Some(1));
        assert_eq!(select_best_described_layer(&layers[..1]), None);
    }

    #[test]
    fn passes_keep_layer_order_in_parallel_and_sequential_modes() {
        let mut layer = PixelBuffer::filled(80, 80, 100);
        for row in 50..53 {
            for col in 55..58 {
                layer.set(row, col, 60);
            }
        }
        let layers = vec![
            Layer { z: 0.1, buffer: PixelBuffer::filled(80, 80, 100) },
            Layer { z: 0.2, buffer: layer },
        ];
        let map = LayerMap::new(layers, SeamSet::new(0), 0.0, 0.0);

        for parallel in [true, false] {
            let scanner = LayerScanner::from_config(&Config {
                use_parallel: parallel,
                gradient_threshold: 30,
                ..Config::default()
            });

            let mut layer_infos = scanner.detect_capillaries(&map);
            assert_eq!(layer_infos.len(), 2);
            assert!(layer_infos[0].capillary_apexes.is_empty());
            assert_eq!(layer_infos[1].capillary_apexes.len(), 1);
            assert_eq!(layer_infos[1].layer_index, 1);

            let described = scanner.describe_capillaries(&map, &mut layer_infos);
            assert_eq!(described.len(), 2);
            // A 3x3 dark spot cannot hold a frame
            assert!(layer_infos.iter().all(|layer_info| layer_info.capillaries.is_empty()));
            assert_eq!(select_best_described_layer(&layer_infos), None);
        }
    }
}
