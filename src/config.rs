// src/config.rs - TOML configuration for capillary mapping

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::corner_detector::CornerParams;
use crate::capillary_processor::ProcessorParams;
use crate::errors::{CapillaryMapError, Result};
use crate::filters::PreFilter;
use crate::layer_map::TileFrame;
use crate::max_rectangle::FrameParams;
use crate::region_grower::RegionParams;
use crate::units::Units;

/// Inclusive gray-level interval
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
pub struct GrayLevelWindow {
    pub min: u8,
    pub max: u8,
}

impl GrayLevelWindow {
    pub fn new(min: u8, max: u8) -> Self {
        Self { min, max }
    }

    #[inline]
    pub fn contains(&self, value: u8) -> bool {
        self.min <= value && value <= self.max
    }
}

/// Configuration for capillary mapping
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    #[serde(default = "default_input_path")]
    pub input_path: String,

    #[serde(default = "default_output_base_dir")]
    pub output_base_dir: String,

    /// Scan positions file inside `input_path`
    #[serde(default = "default_scan_positions_file")]
    pub scan_positions_file: String,

    #[serde(default = "default_parallel")]
    pub use_parallel: bool,

    #[serde(default = "default_pixels_in_mm")]
    pub pixels_in_mm: f32,

    // Kernel sizes
    #[serde(default = "default_corner_kernel_size")]
    pub corner_kernel_size: usize,

    #[serde(default = "default_fine_smoothing_kernel_size")]
    pub fine_smoothing_kernel_size: usize,

    #[serde(default = "default_deep_smoothing_kernel_size")]
    pub deep_smoothing_kernel_size: usize,

    /// Smoothing applied to each layer before the excess filter
    #[serde(default)]
    pub pre_filter: PreFilter,

    // Corner detection
    #[serde(default = "default_gradient_threshold")]
    pub gradient_threshold: u8,

    #[serde(default = "default_min_corner_distance_px")]
    pub min_corner_distance_px: usize,

    /// Rows at the bottom of each layer skipped by corner detection
    #[serde(default)]
    pub cropped_rows: usize,

    // Frame fitting
    #[serde(default = "default_frame_width")]
    pub frame_width: usize,

    #[serde(default = "default_frame_height")]
    pub frame_height: usize,

    #[serde(default = "default_rectangle_score_threshold")]
    pub rectangle_score_threshold: f32,

    #[serde(default = "default_rectangle_angle_step_deg")]
    pub rectangle_angle_step_deg: usize,

    // Capillary selection
    #[serde(default = "default_min_pixels_in_capillary")]
    pub min_pixels_in_capillary: usize,

    #[serde(default = "default_max_apex_candidates")]
    pub max_apex_candidates: usize,

    #[serde(default = "default_described_capillaries")]
    pub described_capillaries: usize,

    #[serde(default = "default_surrounding_pixels")]
    pub surrounding_pixels: usize,

    #[serde(default = "default_min_found_capillaries")]
    pub min_found_capillaries: usize,

    // Stitching
    #[serde(default = "default_tile_margin_relative")]
    pub tile_margin_relative: [f32; 2],

    #[serde(default = "default_tile_frame_relative")]
    pub tile_frame_relative: [f32; 2],

    #[serde(default)]
    pub tile_bias_pixels: [usize; 2],

    /// Seam neighbourhood; half the deep smoothing kernel when absent
    #[serde(default)]
    pub seam_radius_px: Option<usize>,

    // Gray-level windows: raw images for corner acceptance, excess-filtered for region growth
    #[serde(default = "default_gray_level_original")]
    pub gray_level_original: GrayLevelWindow,

    #[serde(default = "default_gray_level_processed")]
    pub gray_level_processed: GrayLevelWindow,

    /// Side of the square drawn around each apex on saved stitched layers
    #[serde(default = "default_marker_corner_size")]
    pub marker_corner_size: u32,
}

/// Single `key=value` patch of a configuration, dotted keys reach nested tables
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigOverride {
    pub key: String,
    pub value: String,
}

impl FromStr for ConfigOverride {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let (key, value) = s
            .split_once('=')
            .ok_or_else(|| format!("expected KEY=VALUE, got '{}'", s))?;
        let key = key.trim();
        if key.is_empty() {
            return Err(format!("missing key in '{}'", s));
        }
        Ok(Self {
            key: key.to_string(),
            value: value.trim().to_string(),
        })
    }
}

fn default_input_path() -> String {
    "./input".to_string()
}

fn default_output_base_dir() -> String {
    "./output".to_string()
}

fn default_scan_positions_file() -> String {
    "ScanPos.csv".to_string()
}

fn default_parallel() -> bool {
    true
}

fn default_pixels_in_mm() -> f32 {
    2600.0
}

fn default_gray_level_original() -> GrayLevelWindow {
    GrayLevelWindow::new(30, 90)
}

fn default_gray_level_processed() -> GrayLevelWindow {
    GrayLevelWindow::new(0, 120)
}

fn default_corner_kernel_size() -> usize {
    3
}

fn default_fine_smoothing_kernel_size() -> usize {
    5
}

fn default_deep_smoothing_kernel_size() -> usize {
    51
}

fn default_gradient_threshold() -> u8 {
    40
}

fn default_min_corner_distance_px() -> usize {
    60
}

fn default_frame_width() -> usize {
    40
}

fn default_frame_height() -> usize {
    100
}

fn default_rectangle_score_threshold() -> f32 {
    0.9
}

fn default_rectangle_angle_step_deg() -> usize {
    10
}

fn default_min_pixels_in_capillary() -> usize {
    20
}

fn default_max_apex_candidates() -> usize {
    10
}

fn default_described_capillaries() -> usize {
    10
}

fn default_surrounding_pixels() -> usize {
    10
}

fn default_min_found_capillaries() -> usize {
    3
}

fn default_marker_corner_size() -> u32 {
    20
}

fn default_tile_margin_relative() -> [f32; 2] {
    [0.0, 0.0]
}

fn default_tile_frame_relative() -> [f32; 2] {
    [1.0, 1.0]
}

impl Default for Config {
    fn default() -> Self {
        Self {
            input_path: default_input_path(),
            output_base_dir: default_output_base_dir(),
            scan_positions_file: default_scan_positions_file(),
            use_parallel: default_parallel(),
            pixels_in_mm: default_pixels_in_mm(),
            gray_level_original: default_gray_level_original(),
            gray_level_processed: default_gray_level_processed(),
            corner_kernel_size: default_corner_kernel_size(),
            fine_smoothing_kernel_size: default_fine_smoothing_kernel_size(),
            deep_smoothing_kernel_size: default_deep_smoothing_kernel_size(),
            pre_filter: PreFilter::default(),
            gradient_threshold: default_gradient_threshold(),
            min_corner_distance_px: default_min_corner_distance_px(),
            cropped_rows: 0,
            frame_width: default_frame_width(),
            frame_height: default_frame_height(),
            rectangle_score_threshold: default_rectangle_score_threshold(),
            rectangle_angle_step_deg: default_rectangle_angle_step_deg(),
            min_pixels_in_capillary: default_min_pixels_in_capillary(),
            max_apex_candidates: default_max_apex_candidates(),
            described_capillaries: default_described_capillaries(),
            surrounding_pixels: default_surrounding_pixels(),
            min_found_capillaries: default_min_found_capillaries(),
            tile_margin_relative: default_tile_margin_relative(),
            tile_frame_relative: default_tile_frame_relative(),
            tile_bias_pixels: [0, 0],
            seam_radius_px: None,
            marker_corner_size: default_marker_corner_size(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            CapillaryMapError::Config(format!("Failed to read config file '{}': {}", path.display(), e))
        })?;

        toml::from_str(&content).map_err(|source| CapillaryMapError::ConfigLoad {
            source,
            path: path.to_path_buf(),
        })
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self).map_err(|e| {
            CapillaryMapError::Config(format!("Failed to serialize config: {}", e))
        })?;

        fs::write(path, content)?;

        Ok(())
    }

    /// Copy of the configuration with every override applied in order.
    /// Values are read as TOML and fall back to plain strings.
    pub fn with_overrides(&self, overrides: &[ConfigOverride]) -> Result<Self> {
        if overrides.is_empty() {
            return Ok(self.clone());
        }

        let mut value = toml::Value::try_from(self).map_err(|e| {
            CapillaryMapError::Config(format!("Failed to serialize config: {}", e))
        })?;
        for patch in overrides {
            set_value(&mut value, &patch.key, parse_override_value(&patch.value))?;
        }

        let config = value.try_into::<Config>().map_err(|e| {
            CapillaryMapError::Config(format!("Invalid config override: {}", e))
        })?;

        // Unknown keys are dropped by deserialization, so they are missing here
        let applied = toml::Value::try_from(&config).map_err(|e| {
            CapillaryMapError::Config(format!("Failed to serialize config: {}", e))
        })?;
        for patch in overrides {
            if lookup(&applied, &patch.key).is_none() {
                return Err(CapillaryMapError::Config(format!(
                    "Unknown config key '{}'",
                    patch.key
                )));
            }
        }

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if !(self.pixels_in_mm > 0.0) {
            return Err(CapillaryMapError::Config(
                "pixels_in_mm must be > 0.0".to_string(),
            ));
        }

        for (name, window) in [
            ("gray_level_original", self.gray_level_original),
            ("gray_level_processed", self.gray_level_processed),
        ] {
            if window.min > window.max {
                return Err(CapillaryMapError::Config(format!(
                    "{} min must not exceed max",
                    name
                )));
            }
        }

        for (name, size) in [
            ("corner_kernel_size", self.corner_kernel_size),
            ("fine_smoothing_kernel_size", self.fine_smoothing_kernel_size),
            ("deep_smoothing_kernel_size", self.deep_smoothing_kernel_size),
        ] {
            if size == 0 || size % 2 == 0 {
                return Err(CapillaryMapError::Config(format!(
                    "{} must be odd and > 0",
                    name
                )));
            }
        }

        if self.gradient_threshold == 0 {
            return Err(CapillaryMapError::Config(
                "gradient_threshold must be > 0".to_string(),
            ));
        }

        if self.frame_width == 0 || self.frame_height == 0 {
            return Err(CapillaryMapError::Config(
                "frame_width and frame_height must be > 0".to_string(),
            ));
        }

        if !(self.rectangle_score_threshold > 0.0 && self.rectangle_score_threshold <= 1.0) {
            return Err(CapillaryMapError::Config(
                "rectangle_score_threshold must be in (0.0, 1.0]".to_string(),
            ));
        }

        let step = self.rectangle_angle_step_deg;
        if step == 0 || step > 90 || 180 % step != 0 {
            return Err(CapillaryMapError::Config(
                "rectangle_angle_step_deg must divide 180 and be in 1..=90".to_string(),
            ));
        }

        if self.marker_corner_size == 0 {
            return Err(CapillaryMapError::Config(
                "marker_corner_size must be > 0".to_string(),
            ));
        }

        for value in self.tile_margin_relative.iter().chain(self.tile_frame_relative.iter()) {
            if !(0.0..=1.0).contains(value) {
                return Err(CapillaryMapError::Config(
                    "tile_margin_relative and tile_frame_relative must be within [0.0, 1.0]"
                        .to_string(),
                ));
            }
        }

        Ok(())
    }

    /// Check that the configured input folder exists
    pub fn validate_input(&self) -> Result<()> {
        let input_path = PathBuf::from(&self.input_path);
        if !input_path.is_dir() {
            return Err(CapillaryMapError::InvalidPath(input_path));
        }
        Ok(())
    }

    pub fn units(&self) -> Units {
        Units::new(self.pixels_in_mm)
    }

    pub fn seam_radius(&self) -> usize {
        self.seam_radius_px
            .unwrap_or(self.deep_smoothing_kernel_size / 2)
    }

    pub fn corner_params(&self) -> CornerParams {
        CornerParams {
            kernel_size: self.corner_kernel_size,
            gradient_threshold: self.gradient_threshold,
            min_distance_px: self.min_corner_distance_px,
            cropped_rows: self.cropped_rows,
            valid_gray_level: self.gray_level_original,
        }
    }

    pub fn region_params(&self) -> RegionParams {
        RegionParams {
            border_margin: self.deep_smoothing_kernel_size / 2,
            valid_gray_level: self.gray_level_processed,
        }
    }

    pub fn frame_params(&self) -> FrameParams {
        FrameParams {
            width: self.frame_width,
            height: self.frame_height,
            score_threshold: self.rectangle_score_threshold,
            angle_step_deg: self.rectangle_angle_step_deg,
        }
    }

    pub fn processor_params(&self) -> ProcessorParams {
        ProcessorParams {
            deep_kernel_size: self.deep_smoothing_kernel_size,
            fine_kernel_size: self.fine_smoothing_kernel_size,
            pre_filter: self.pre_filter,
            min_pixels_in_capillary: self.min_pixels_in_capillary,
            max_apex_candidates: self.max_apex_candidates,
            described_capillaries: self.described_capillaries,
            surrounding_pixels: self.surrounding_pixels,
            region: self.region_params(),
            frame: self.frame_params(),
        }
    }

    pub fn tile_frame(&self) -> TileFrame {
        TileFrame {
            margin_relative: self.tile_margin_relative,
            frame_relative: self.tile_frame_relative,
            bias_pixels: self.tile_bias_pixels,
        }
    }
}

fn parse_override_value(raw: &str) -> toml::Value {
    toml::from_str::<toml::Table>(&format!("value = {}", raw))
        .ok()
        .and_then(|mut table| table.remove("value"))
        .unwrap_or_else(|| toml::Value::String(raw.to_string()))
}

fn set_value(root: &mut toml::Value, key: &str, new_value: toml::Value) -> Result<()> {
    let mut parts: Vec<&str> = key.split('.').collect();
    let last = parts.pop().unwrap_or(key);

    let mut table = root
        .as_table_mut()
        .ok_or_else(|| CapillaryMapError::Config("Config is not a table".to_string()))?;
    for part in parts {
        table = table
            .entry(part)
            .or_insert_with(|| toml::Value::Table(toml::Table::new()))
            .as_table_mut()
            .ok_or_else(|| CapillaryMapError::Config(format!("'{}' in '{}' is not a table", part, key)))?;
    }
    table.insert(last.to_string(), new_value);
    Ok(())
}

fn lookup<'a>(root: &'a toml::Value, key: &str) -> Option<&'a toml::Value> {
    key.split('.').try_fold(root, |value, part| value.get(part))
}
