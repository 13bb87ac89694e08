// src/diagnostics.rs - Optional dumps of intermediate layer images and records
//
// Output structure of the file sink:
//
//   {output}/Layer<N>/Original.bmp     stitched layer
//   {output}/Layer<N>/Corners.csv      ranked apex candidates
//   {output}/Layer<N>/Corners.png      layer with apexes circled
//   {output}/Layer<N>/Processed.bmp    excess-filtered layer
//   {output}/Layer<N>/Marked.bmp       filtered layer with grown regions
//   {output}/Layer<N>/Framed.bmp       layer with fitted frames
//   {output}/Capillaries/LayerInfos.json

use std::fs;
use std::path::{Path, PathBuf};

use bresenham::Bresenham;
use csv::Writer;
use image::{Rgb, RgbImage};
use imageproc::drawing::draw_hollow_circle_mut;
use log::warn;

use crate::capillary::LayerInfo;
use crate::capillary_processor::{DescribedLayer, FittedFrame};
use crate::errors::Result;
use crate::image_io::{ensure_folder, save_bmp};
use crate::layer_map::Layer;
use crate::pixel_buffer::{PixelBuffer, WHITE};
use crate::units::Units;

/// Radius of apex circles in the corners image
const APEX_MARKER_RADIUS: i32 = 12;

const APEX_MARKER_COLOR: Rgb<u8> = Rgb([255, 0, 0]);

/// Receiver of intermediate results. Implementations must never fail the run.
pub trait DiagnosticsSink: Send + Sync {
    /// Called after apex detection on a layer
    fn layer_detected(&self, _layer: &Layer, _layer_info: &LayerInfo) {}

    /// Called after capillary description on a layer
    fn layer_described(&self, _layer: &Layer, _layer_info: &LayerInfo, _described: &DescribedLayer) {}

    /// Called once with the final records of all layers
    fn run_finished(&self, _layer_infos: &[LayerInfo]) {}
}

/// Sink that discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopDiagnostics;

impl DiagnosticsSink for NoopDiagnostics {}

/// Sink writing images, CSV and JSON dumps under an output folder
#[derive(Debug, Clone)]
pub struct FileDiagnostics {
    output_dir: PathBuf,
    units: Units,
}

impl FileDiagnostics {
    pub fn new<P: AsRef<Path>>(output_dir: P, units: Units) -> Self {
        Self {
            output_dir: output_dir.as_ref().to_path_buf(),
            units,
        }
    }

    fn layer_dir(&self, layer_index: usize) -> Result<PathBuf> {
        let dir = self.output_dir.join(format!("Layer{}", layer_index + 1));
        ensure_folder(&dir)?;
        Ok(dir)
    }

    fn write_detected(&self, layer: &Layer, layer_info: &LayerInfo) -> Result<()> {
        let dir = self.layer_dir(layer_info.layer_index)?;
        save_bmp(&layer.buffer, dir.join("Original.bmp"))?;
        self.write_corners_csv(layer_info, &dir.join("Corners.csv"))?;
        self.draw_apexes(&layer.buffer, layer_info)
            .save(dir.join("Corners.png"))?;
        Ok(())
    }

    fn write_described(
        &self,
        layer: &Layer,
        layer_info: &LayerInfo,
        described: &DescribedLayer,
    ) -> Result<()> {
        let dir = self.layer_dir(layer_info.layer_index)?;
        save_bmp(&described.filtered, dir.join("Processed.bmp"))?;
        save_bmp(&described.processed, dir.join("Marked.bmp"))?;
        if !described.frames.is_empty() {
            save_bmp(&draw_frames(&layer.buffer, &described.frames), dir.join("Framed.bmp"))?;
        }
        Ok(())
    }

    fn write_layer_infos(&self, layer_infos: &[LayerInfo]) -> Result<()> {
        let dir = self.output_dir.join("Capillaries");
        ensure_folder(&dir)?;
        let json = serde_json::to_string_pretty(layer_infos)?;
        fs::write(dir.join("LayerInfos.json"), json)?;
        Ok(())
    }

    fn write_corners_csv(&self, layer_info: &LayerInfo, path: &Path) -> Result<()> {
        let mut writer = Writer::from_path(path)?;
        writer.write_record(["Num", "Row", "Col", "x", "y", "z", "Score", "Gray level"])?;

        for (index, corner) in layer_info.capillary_apexes.iter().enumerate() {
            let pos = self.units.to_pixel_pos(&corner.position);
            writer.write_record(&[
                (index + 1).to_string(),
                pos.row.to_string(),
                pos.col.to_string(),
                format!("{:.4}", corner.position.x),
                format!("{:.4}", corner.position.y),
                format!("{:.4}", corner.position.z),
                format!("{:.1}", corner.score),
                corner.gray_level.to_string(),
            ])?;
        }

        writer.flush()?;
        Ok(())
    }

    fn draw_apexes(&self, layer: &PixelBuffer, layer_info: &LayerInfo) -> RgbImage {
        let mut canvas = image::DynamicImage::ImageLuma8(layer.to_gray_image()).to_rgb8();
        for corner in &layer_info.capillary_apexes {
            let pos = self.units.to_pixel_pos(&corner.position);
            draw_hollow_circle_mut(
                &mut canvas,
                (pos.col as i32, pos.row as i32),
                APEX_MARKER_RADIUS,
                APEX_MARKER_COLOR,
            );
        }
        canvas
    }
}

impl DiagnosticsSink for FileDiagnostics {
    fn layer_detected(&self, layer: &Layer, layer_info: &LayerInfo) {
        if let Err(e) = self.write_detected(layer, layer_info) {
            warn!("Diagnostics: layer {} detection dump failed: {}", layer_info.layer_index + 1, e);
        }
    }

    fn layer_described(&self, layer: &Layer, layer_info: &LayerInfo, described: &DescribedLayer) {
        if let Err(e) = self.write_described(layer, layer_info, described) {
            warn!("Diagnostics: layer {} description dump failed: {}", layer_info.layer_index + 1, e);
        }
    }

    fn run_finished(&self, layer_infos: &[LayerInfo]) {
        if let Err(e) = self.write_layer_infos(layer_infos) {
            warn!("Diagnostics: layer info dump failed: {}", e);
        }
    }
}

/// Copy of `layer` with the outline of every frame drawn in white
pub fn draw_frames(layer: &PixelBuffer, frames: &[FittedFrame]) -> PixelBuffer {
    let mut framed = layer.clone();
    let rows = framed.rows() as isize;
    let cols = framed.cols() as isize;

    for frame in frames {
        for side in 0..4 {
            let start = frame.corners[side];
            let end = frame.corners[(side + 1) % 4];
            let line = Bresenham::new(
                (start.col as isize, start.row as isize),
                (end.col as isize, end.row as isize),
            );
            // Bresenham skips the end point, which starts the next side
            for (x, y) in line {
                if (0..cols).contains(&x) && (0..rows).contains(&y) {
                    framed.set(y as usize, x as usize, WHITE);
                }
            }
        }
    }

    framed
}
