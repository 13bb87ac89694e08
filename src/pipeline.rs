// src/pipeline.rs - End-to-end run over a stitched map: detection, description, reporting

use std::path::PathBuf;
use std::time::Instant;

use log::info;

use crate::capillary::LayerInfo;
use crate::config::Config;
use crate::diagnostics::{DiagnosticsSink, FileDiagnostics, NoopDiagnostics};
use crate::errors::{CapillaryMapError, Result};
use crate::layer_map::{copy_scan_positions, LayerMap};
use crate::layer_scanner::{select_best_described_layer, LayerScanner};
use crate::output::{write_actual_layers_frames, write_all_layers, write_layer_data, write_summary};

/// Switches of a single run
#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    /// Save intermediate images and records through the file diagnostics sink
    pub debug: bool,

    /// Save every stitched layer with its detected apexes marked
    pub save_stitched: bool,
}

/// Outcome of a run
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub layer_infos: Vec<LayerInfo>,

    /// Best layer by apex scores of the detection pass
    pub detection_best_layer: Option<usize>,

    /// Best layer by frame scores of the description pass
    pub best_layer: Option<usize>,
}

/// Everything a run needs: configuration, the stitched map and the
/// diagnostics receiver
pub struct PipelineContext {
    config: Config,
    map: LayerMap,
    sink: Box<dyn DiagnosticsSink>,
}

impl PipelineContext {
    pub fn new(config: Config, map: LayerMap, sink: Box<dyn DiagnosticsSink>) -> Self {
        Self { config, map, sink }
    }

    /// Build the map from the configured input folder and keep a copy of
    /// its scan positions with the reports
    pub fn from_config(config: Config, options: RunOptions) -> Result<Self> {
        config.validate_input()?;
        let map = LayerMap::build(&config)?;
        copy_scan_positions(&config)?;

        let sink: Box<dyn DiagnosticsSink> = if options.debug {
            Box::new(FileDiagnostics::new(&config.output_base_dir, config.units()))
        } else {
            Box::new(NoopDiagnostics)
        };

        Ok(Self::new(config, map, sink))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn map(&self) -> &LayerMap {
        &self.map
    }

    /// Run both passes over every layer and write the reports
    pub fn run(&self, options: RunOptions) -> Result<RunSummary> {
        if self.map.is_empty() {
            return Err(CapillaryMapError::NoLayers);
        }

        let start = Instant::now();
        let output_dir = PathBuf::from(&self.config.output_base_dir);
        let scanner = LayerScanner::from_config(&self.config);

        let units = self.config.units();

        // Step 1: Detect apex candidates on every layer
        let mut layer_infos = scanner.detect_capillaries(&self.map);
        for (layer, layer_info) in self.map.layers().iter().zip(&layer_infos) {
            self.sink.layer_detected(layer, layer_info);
        }
        write_all_layers(&layer_infos, &output_dir)?;

        let detection_best_layer = scanner.select_best_layer(&layer_infos);

        // Step 2: Keep the stitched layers with their apexes if requested
        if options.save_stitched {
            self.map.save_stitched(&output_dir, &layer_infos, &units, self.config.marker_corner_size)?;
        }

        // Step 3: Grow regions and fit frames
        info!("Description of capillaries started");
        let described = scanner.describe_capillaries(&self.map, &mut layer_infos);

        // Step 4: Per-layer reports
        let start_mm = (self.map.start_x_mm(), self.map.start_y_mm());
        for (layer_info, described_layer) in layer_infos.iter().zip(&described) {
            let layer = &self.map.layers()[layer_info.layer_index];
            self.sink.layer_described(layer, layer_info, described_layer);

            if !layer_info.capillaries.is_empty() {
                write_layer_data(layer_info, &units, start_mm, &output_dir)?;
            }
        }

        // Step 5: Summary over all layers
        write_actual_layers_frames(&layer_infos, &output_dir)?;

        let best_layer = select_best_described_layer(&layer_infos);
        match best_layer {
            Some(index) => info!("Best layer after description: {}", index + 1),
            None => info!("No layer holds a fitted frame"),
        }
        write_summary(best_layer, &output_dir)?;

        self.sink.run_finished(&layer_infos);

        info!("Run completed in {} ms", start.elapsed().as_millis());

        Ok(RunSummary {
            layer_infos,
            detection_best_layer,
            best_layer,
        })
    }
}
