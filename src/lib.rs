// src/lib.rs - Library interface for capillary mapping

pub mod capillary;
pub mod capillary_processor;
pub mod config;
pub mod corner_detector;
pub mod diagnostics;
pub mod errors;
pub mod filters;
pub mod image_io;
pub mod layer_map;
pub mod layer_scanner;
pub mod max_rectangle;
pub mod output;
pub mod pipeline;
pub mod pixel_buffer;
pub mod region_grower;
pub mod seams;
pub mod units;

// Re-export commonly used types and functions
pub use errors::{CapillaryMapError, Result};
pub use config::{Config, ConfigOverride, GrayLevelWindow};
pub use pipeline::{PipelineContext, RunOptions, RunSummary};
pub use image_io::{load_gray_image, save_bmp};

// Re-export data model
pub use capillary::{CapillaryInfo, LayerInfo, Limits, ScoredCorner};
pub use pixel_buffer::PixelBuffer;
pub use units::{PixelPos, Point3D, Units};

// Re-export processing stages
pub use capillary_processor::{CandidateOutcome, CapillaryProcessor, DescribedLayer, FittedFrame};
pub use corner_detector::CornerDetector;
pub use diagnostics::{DiagnosticsSink, FileDiagnostics, NoopDiagnostics};
pub use layer_map::{Layer, LayerMap};
pub use layer_scanner::{select_best_described_layer, LayerScanner};
pub use max_rectangle::MaxRectangleFinder;
pub use region_grower::{CapillaryRegion, RegionGrower};
pub use seams::SeamSet;
