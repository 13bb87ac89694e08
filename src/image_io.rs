use std::fs;
use std::path::Path;
use image::ImageFormat;

use crate::errors::{CapillaryMapError, Result};
use crate::pixel_buffer::PixelBuffer;

/// Load a tile image of any supported format as 8-bit gray levels
pub fn load_gray_image<P: AsRef<Path>>(path: P) -> Result<PixelBuffer> {
    let path = path.as_ref();

    if !path.is_file() {
        return Err(CapillaryMapError::InvalidPath(path.to_path_buf()));
    }

    // Load the image
    let img = image::open(path)?;

    // Convert to luma
    Ok(PixelBuffer::from_gray_image(&img.to_luma8()))
}

/// Save a buffer as a BMP image
pub fn save_bmp<P: AsRef<Path>>(buffer: &PixelBuffer, path: P) -> Result<()> {
    buffer
        .to_gray_image()
        .save_with_format(path.as_ref(), ImageFormat::Bmp)?;

    Ok(())
}

/// Create a folder and its parents, reporting the folder on failure
pub fn ensure_folder<P: AsRef<Path>>(path: P) -> Result<()> {
    let path = path.as_ref();
    fs::create_dir_all(path).map_err(|source| CapillaryMapError::FolderCreation {
        path: path.to_path_buf(),
        source,
    })
}
