// src/layer_map.rs - Stitched layer images and their seams

use std::cmp::Ordering;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use image::Luma;
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;
use log::info;
use rayon::prelude::*;
use serde::Deserialize;

use crate::capillary::{LayerInfo, ScoredCorner};
use crate::config::Config;
use crate::errors::{CapillaryMapError, Result};
use crate::image_io::{ensure_folder, load_gray_image, save_bmp};
use crate::pixel_buffer::PixelBuffer;
use crate::seams::{Axis, SeamSet};
use crate::units::{round_to_usize, PixelPos, Units};

const CORNER_MARKER_VALUE: u8 = 255;

/// Part of each tile copied into the stitched layer
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TileFrame {
    /// Frame offset as a fraction of the tile size, [x, y]
    pub margin_relative: [f32; 2],

    /// Frame size as a fraction of the tile size, [width, height]
    pub frame_relative: [f32; 2],

    /// Extra frame offset in pixels, [x, y]
    pub bias_pixels: [usize; 2],
}

impl TileFrame {
    /// Origin, rows and cols of the frame in a tile, clipped to the tile
    pub fn frame_in_tile(&self, tile_rows: usize, tile_cols: usize) -> (PixelPos, usize, usize) {
        let origin = PixelPos::new(
            (self.bias_pixels[1] + round_to_usize(self.margin_relative[1] * tile_rows as f32))
                .min(tile_rows),
            (self.bias_pixels[0] + round_to_usize(self.margin_relative[0] * tile_cols as f32))
                .min(tile_cols),
        );
        let rows = round_to_usize(self.frame_relative[1] * tile_rows as f32).min(tile_rows - origin.row);
        let cols = round_to_usize(self.frame_relative[0] * tile_cols as f32).min(tile_cols - origin.col);
        (origin, rows, cols)
    }
}

/// One row of the scan positions file, coordinates in mm
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ScanPosition {
    #[serde(rename = "File")]
    pub file: String,
    #[serde(rename = "X")]
    pub x: f32,
    #[serde(rename = "Y")]
    pub y: f32,
    #[serde(rename = "Z")]
    pub z: f32,
}

/// Full-slide image of one focal plane
#[derive(Debug, Clone)]
pub struct Layer {
    pub z: f32,
    pub buffer: PixelBuffer,
}

/// Stack of stitched layers sharing one seam set
#[derive(Debug, Clone)]
pub struct LayerMap {
    layers: Vec<Layer>,
    seams: SeamSet,
    start_x_mm: f32,
    start_y_mm: f32,
}

impl LayerMap {
    pub fn new(layers: Vec<Layer>, seams: SeamSet, start_x_mm: f32, start_y_mm: f32) -> Self {
        Self {
            layers,
            seams,
            start_x_mm,
            start_y_mm,
        }
    }

    /// Read the scan positions and tiles of the configured input folder and
    /// stitch them into layers
    pub fn build(config: &Config) -> Result<Self> {
        let start = Instant::now();
        let input = Path::new(&config.input_path);
        let positions = read_scan_positions(input.join(&config.scan_positions_file))?;
        info!("Read {} scan positions from {}", positions.len(), input.display());

        // Load tiles in parallel
        let tiles: Vec<PixelBuffer> = if config.use_parallel {
            positions
                .par_iter()
                .map(|position| load_gray_image(input.join(&position.file)))
                .collect::<Result<_>>()?
        } else {
            positions
                .iter()
                .map(|position| load_gray_image(input.join(&position.file)))
                .collect::<Result<_>>()?
        };

        let map = Self::stitch(&positions, &tiles, &config.tile_frame(), config.seam_radius())?;

        info!(
            "Map built in {} ms: {} layers of {}x{} pixels",
            start.elapsed().as_millis(),
            map.layers.len(),
            map.rows(),
            map.cols()
        );

        Ok(map)
    }

    /// Stitch tiles into layers. `tiles[i]` is the image of `positions[i]`.
    pub fn stitch(
        positions: &[ScanPosition],
        tiles: &[PixelBuffer],
        tile_frame: &TileFrame,
        seam_radius: usize,
    ) -> Result<Self> {
        if positions.is_empty() {
            return Err(CapillaryMapError::NoLayers);
        }
        if positions.len() != tiles.len() {
            return Err(CapillaryMapError::DataSizeMismatch {
                expected: format!("{} tiles", positions.len()),
                actual: format!("{} tiles", tiles.len()),
            });
        }

        let xs = unique_sorted(positions.iter().map(|position| position.x));
        let ys = unique_sorted(positions.iter().map(|position| position.y));
        let zs = unique_sorted(positions.iter().map(|position| position.z));

        // All frames must share the size of the first one
        let (_, frame_rows, frame_cols) = tile_frame.frame_in_tile(tiles[0].rows(), tiles[0].cols());
        let mut layers: Vec<Layer> = zs
            .iter()
            .map(|&z| Layer {
                z,
                buffer: PixelBuffer::new(ys.len() * frame_rows, xs.len() * frame_cols),
            })
            .collect();

        for (position, tile) in positions.iter().zip(tiles) {
            let (origin, rows, cols) = tile_frame.frame_in_tile(tile.rows(), tile.cols());
            if (rows, cols) != (frame_rows, frame_cols) {
                return Err(CapillaryMapError::DataSizeMismatch {
                    expected: format!("{}x{} frame", frame_rows, frame_cols),
                    actual: format!("{}x{} frame in {}", rows, cols, position.file),
                });
            }

            let row_index = index_of(&ys, position.y);
            let col_index = index_of(&xs, position.x);
            let layer_index = index_of(&zs, position.z);

            let frame = tile.crop(origin, rows, cols);
            layers[layer_index]
                .buffer
                .paste(&frame, PixelPos::new(row_index * frame_rows, col_index * frame_cols));
        }

        let seams = SeamSet::from_tile_grid(ys.len(), xs.len(), frame_rows, frame_cols, seam_radius);

        Ok(Self::new(layers, seams, xs[0], ys[0]))
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    pub fn layer(&self, index: usize) -> Option<&Layer> {
        self.layers.get(index)
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    pub fn rows(&self) -> usize {
        self.layers.first().map_or(0, |layer| layer.buffer.rows())
    }

    pub fn cols(&self) -> usize {
        self.layers.first().map_or(0, |layer| layer.buffer.cols())
    }

    pub fn seams(&self) -> &SeamSet {
        &self.seams
    }

    pub fn is_on_seam(&self, position: usize, axis: Axis) -> bool {
        self.seams.is_on_seam(position, axis)
    }

    /// X of the leftmost tile in mm
    pub fn start_x_mm(&self) -> f32 {
        self.start_x_mm
    }

    /// Y of the topmost tile in mm
    pub fn start_y_mm(&self) -> f32 {
        self.start_y_mm
    }

    /// Gray level at a map point given in mm relative to the map origin.
    /// Coordinates are truncated to whole pixels and the layer closest to
    /// `z_mm` is used.
    pub fn value_at(&self, units: &Units, x_mm: f32, y_mm: f32, z_mm: f32) -> Option<u8> {
        let col = truncate_to_pixel(x_mm * units.pixels_in_mm())?;
        let row = truncate_to_pixel(y_mm * units.pixels_in_mm())?;

        let layer = self
            .layers
            .iter()
            .min_by(|a, b| (a.z - z_mm).abs().total_cmp(&(b.z - z_mm).abs()))?;

        if row >= layer.buffer.rows() || col >= layer.buffer.cols() {
            return None;
        }
        Some(layer.buffer.get(row, col))
    }

    /// Save every layer as `<output>/Layer<N>/Stitched.bmp` with a hollow
    /// square of side `marker_size` around each detected apex
    pub fn save_stitched<P: AsRef<Path>>(
        &self,
        output_dir: P,
        layer_infos: &[LayerInfo],
        units: &Units,
        marker_size: u32,
    ) -> Result<()> {
        for (index, layer) in self.layers.iter().enumerate() {
            let folder = output_dir.as_ref().join(format!("Layer{}", index + 1));
            ensure_folder(&folder)?;

            let apexes = layer_infos
                .iter()
                .find(|info| info.layer_index == index)
                .map_or(&[][..], |info| info.capillary_apexes.as_slice());
            let marked = mark_corners(&layer.buffer, apexes, units, marker_size);
            save_bmp(&marked, folder.join("Stitched.bmp"))?;
        }
        Ok(())
    }
}

/// Copy of `layer` with a hollow square centred on every corner
fn mark_corners(layer: &PixelBuffer, corners: &[ScoredCorner], units: &Units, marker_size: u32) -> PixelBuffer {
    if corners.is_empty() || marker_size == 0 {
        return layer.clone();
    }

    let mut canvas = layer.to_gray_image();
    let half = (marker_size / 2) as i32;
    for corner in corners {
        let pos = units.to_pixel_pos(&corner.position);
        let rect = Rect::at(pos.col as i32 - half, pos.row as i32 - half).of_size(marker_size, marker_size);
        draw_hollow_rect_mut(&mut canvas, rect, Luma([CORNER_MARKER_VALUE]));
    }
    PixelBuffer::from_gray_image(&canvas)
}

fn truncate_to_pixel(pixels: f32) -> Option<usize> {
    if pixels.is_finite() && pixels >= 0.0 {
        Some(pixels as usize)
    } else {
        None
    }
}

/// Copy the scan positions file of the input folder next to the reports
pub fn copy_scan_positions(config: &Config) -> Result<PathBuf> {
    let source = Path::new(&config.input_path).join(&config.scan_positions_file);
    if !source.is_file() {
        return Err(CapillaryMapError::InvalidPath(source));
    }

    let output_dir = Path::new(&config.output_base_dir);
    ensure_folder(output_dir)?;
    let target = output_dir.join(&config.scan_positions_file);
    fs::copy(&source, &target)?;

    info!("Scan positions copied to {}", target.display());
    Ok(target)
}

/// Read the `File,X,Y,Z` scan positions file
pub fn read_scan_positions<P: AsRef<Path>>(path: P) -> Result<Vec<ScanPosition>> {
    let path = path.as_ref();
    if !path.is_file() {
        return Err(CapillaryMapError::InvalidPath(path.to_path_buf()));
    }

    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)?;

    let positions = reader
        .deserialize()
        .collect::<std::result::Result<Vec<ScanPosition>, csv::Error>>()
        .map_err(|e| CapillaryMapError::ScanPositions(format!("{}: {}", path.display(), e)))?;

    if positions.is_empty() {
        return Err(CapillaryMapError::ScanPositions(format!(
            "{} holds no positions",
            path.display()
        )));
    }

    Ok(positions)
}

/// Distinct values in ascending order
fn unique_sorted(values: impl Iterator<Item = f32>) -> Vec<f32> {
    let mut values: Vec<f32> = values.collect();
    values.sort_by(f32::total_cmp);
    values.dedup_by(|a, b| a.total_cmp(b) == Ordering::Equal);
    values
}

fn index_of(sorted: &[f32], value: f32) -> usize {
    sorted
        .binary_search_by(|entry| entry.total_cmp(&value))
        .unwrap_or_else(|insert_at| insert_at)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    fn full_frame() -> TileFrame {
        TileFrame {
            margin_relative: [0.0, 0.0],
            frame_relative: [1.0, 1.0],
            bias_pixels: [0, 0],
        }
    }

    fn position(file: &str, x: f32, y: f32, z: f32) -> ScanPosition {
        ScanPosition {
            file: file.to_string(),
            x,
            y,
            z,
        }
    }

    #[test]
    fn tiles_land_on_their_grid_cells() {
        let positions = vec![
            position("a", 1.5, 2.0, 0.1),
            position("b", 1.0, 2.0, 0.1),
            position("c", 1.0, 2.5, 0.1),
            position("d", 1.5, 2.5, 0.2),
        ];
        let tiles: Vec<PixelBuffer> = (1..=4).map(|value| PixelBuffer::filled(4, 6, value)).collect();

        let map = LayerMap::stitch(&positions, &tiles, &full_frame(), 1).unwrap();

        assert_eq!(map.len(), 2);
        assert_eq!((map.rows(), map.cols()), (8, 12));
        let first = &map.layers()[0].buffer;
        assert_eq!(first.get(0, 0), 2);
        assert_eq!(first.get(0, 6), 1);
        assert_eq!(first.get(4, 0), 3);
        // Missing tile stays background
        assert_eq!(first.get(4, 6), 0);
        assert_eq!(map.layers()[1].buffer.get(7, 11), 4);
        assert_approx_eq!(map.layers()[1].z, 0.2);

        assert_approx_eq!(map.start_x_mm(), 1.0);
        assert_approx_eq!(map.start_y_mm(), 2.0);
        assert!(map.is_on_seam(4, Axis::Row));
        assert!(map.is_on_seam(5, Axis::Col));
        assert!(!map.is_on_seam(2, Axis::Row));
    }

    #[test]
    fn frame_is_cut_from_tile_margin() {
        let frame = TileFrame {
            margin_relative: [0.25, 0.1],
            frame_relative: [0.5, 0.8],
            bias_pixels: [1, 0],
        };
        let (origin, rows, cols) = frame.frame_in_tile(10, 8);
        assert_eq!(origin, PixelPos::new(1, 3));
        assert_eq!((rows, cols), (8, 4));

        let mut tile = PixelBuffer::new(10, 8);
        tile.set(1, 3, 99);
        let map = LayerMap::stitch(&[position("a", 0.0, 0.0, 0.0)], &[tile], &frame, 0).unwrap();
        assert_eq!((map.rows(), map.cols()), (8, 4));
        assert_eq!(map.layers()[0].buffer.get(0, 0), 99);
        assert!(map.seams().is_empty());
    }

    #[test]
    fn unequal_frames_are_rejected() {
        let positions = vec![position("a", 0.0, 0.0, 0.0), position("b", 1.0, 0.0, 0.0)];
        let tiles = vec![PixelBuffer::new(4, 4), PixelBuffer::new(5, 4)];
        let result = LayerMap::stitch(&positions, &tiles, &full_frame(), 0);
        assert!(matches!(result, Err(CapillaryMapError::DataSizeMismatch { .. })));

        let result = LayerMap::stitch(&positions, &tiles[..1], &full_frame(), 0);
        assert!(matches!(result, Err(CapillaryMapError::DataSizeMismatch { .. })));
    }

    #[test]
    fn map_is_built_from_input_folder() {
        let dir = std::env::temp_dir().join(format!("capillary_map_layer_map_{}", std::process::id()));
        ensure_folder(&dir).unwrap();
        save_bmp(&PixelBuffer::filled(3, 5, 10), dir.join("t1.bmp")).unwrap();
        save_bmp(&PixelBuffer::filled(3, 5, 20), dir.join("t2.bmp")).unwrap();
        fs::write(dir.join("ScanPos.csv"), "File,X,Y,Z\nt1.bmp, 0.0, 0.0, 1.0\nt2.bmp, 0.5, 0.0, 1.0\n").unwrap();

        let config = Config {
            input_path: dir.to_string_lossy().into_owned(),
            seam_radius_px: Some(0),
            ..Config::default()
        };
        let map = LayerMap::build(&config).unwrap();

        assert_eq!((map.rows(), map.cols()), (3, 10));
        assert_eq!(map.layers()[0].buffer.get(1, 7), 20);
        assert!(map.is_on_seam(5, Axis::Col));

        let output = dir.join("out");
        map.save_stitched(&output, &[], &config.units(), 20).unwrap();
        assert!(output.join("Layer1").join("Stitched.bmp").is_file());

        let config = Config {
            output_base_dir: output.to_string_lossy().into_owned(),
            ..config
        };
        let copied = copy_scan_positions(&config).unwrap();
        assert_eq!(copied, output.join("ScanPos.csv"));
        assert_eq!(
            fs::read_to_string(&copied).unwrap(),
            fs::read_to_string(dir.join("ScanPos.csv")).unwrap()
        );

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn value_is_read_from_the_nearest_layer() {
        let mut low = PixelBuffer::filled(10, 20, 5);
        low.set(3, 7, 50);
        let mut high = PixelBuffer::filled(10, 20, 9);
        high.set(3, 7, 90);
        let layers = vec![Layer { z: 0.1, buffer: low }, Layer { z: 0.3, buffer: high }];
        let map = LayerMap::new(layers, SeamSet::new(0), 0.0, 0.0);
        let units = Units::new(10.0);

        // 0.79 mm is pixel 7.9, truncated to 7
        assert_eq!(map.value_at(&units, 0.79, 0.35, 0.15), Some(50));
        assert_eq!(map.value_at(&units, 0.79, 0.35, 0.25), Some(90));
        assert_eq!(map.value_at(&units, 0.0, 0.0, 5.0), Some(9));

        assert_eq!(map.value_at(&units, 2.0, 0.0, 0.1), None);
        assert_eq!(map.value_at(&units, -0.05, 0.0, 0.1), None);

        let empty = LayerMap::new(Vec::new(), SeamSet::new(0), 0.0, 0.0);
        assert_eq!(empty.value_at(&units, 0.0, 0.0, 0.0), None);
    }

    #[test]
    fn stitched_layers_mark_detected_apexes() {
        let dir = std::env::temp_dir().join(format!("capillary_map_marked_{}", std::process::id()));
        let layers = vec![
            Layer { z: 0.0, buffer: PixelBuffer::filled(40, 40, 100) },
            Layer { z: 0.1, buffer: PixelBuffer::filled(40, 40, 100) },
        ];
        let map = LayerMap::new(layers, SeamSet::new(0), 0.0, 0.0);
        let units = Units::new(10.0);

        let mut layer_info = LayerInfo::new(1, 0.1);
        layer_info
            .capillary_apexes
            .push(ScoredCorner::new(units.to_point(PixelPos::new(20, 20), 0.1), 5.0, 40));

        map.save_stitched(&dir, &[LayerInfo::new(0, 0.0), layer_info], &units, 10)
            .unwrap();

        let unmarked = load_gray_image(dir.join("Layer1").join("Stitched.bmp")).unwrap();
        assert_eq!(unmarked.count_value(CORNER_MARKER_VALUE), 0);

        let marked = load_gray_image(dir.join("Layer2").join("Stitched.bmp")).unwrap();
        assert_eq!(marked.get(15, 15), CORNER_MARKER_VALUE);
        assert_eq!(marked.get(24, 24), CORNER_MARKER_VALUE);
        assert_eq!(marked.get(15, 20), CORNER_MARKER_VALUE);
        assert_eq!(marked.get(20, 20), 100);
        assert_eq!(marked.count_value(CORNER_MARKER_VALUE), 36);

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn malformed_scan_positions_are_reported() {
        let dir = std::env::temp_dir().join(format!("capillary_map_scan_pos_{}", std::process::id()));
        ensure_folder(&dir).unwrap();
        let path = dir.join("ScanPos.csv");

        fs::write(&path, "File,X,Y,Z\nt1.bmp,zero,0.0,1.0\n").unwrap();
        assert!(matches!(read_scan_positions(&path), Err(CapillaryMapError::ScanPositions(_))));

        fs::write(&path, "File,X,Y,Z\n").unwrap();
        assert!(matches!(read_scan_positions(&path), Err(CapillaryMapError::ScanPositions(_))));

        fs::remove_dir_all(&dir).ok();
    }
}
