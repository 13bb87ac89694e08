// src/pixel_buffer.rs - Row-major byte grid shared between filter stages

use std::sync::Arc;

use image::GrayImage;

use crate::units::PixelPos;

/// Gray level used to mark foreground and already visited pixels
pub const WHITE: u8 = 255;

/// Gray level of background pixels
pub const BLACK: u8 = 0;

/// Fill value used by `clean`, recognisable in dumps as "never written"
pub const CLEAN_FILL: u8 = 0xCD;

/// Contiguous `rows * cols` byte grid addressed by (row, col).
///
/// Cloning is cheap: the storage is reference counted and only copied when a
/// shared buffer is written to, so a layer image can be handed to several
/// readers (BFS energy accumulation, rendering) without deep copies while each
/// writer still owns its pixels unambiguously.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelBuffer {
    rows: usize,
    cols: usize,
    data: Arc<Vec<u8>>,
}

impl PixelBuffer {
    /// Create a buffer filled with `BLACK`
    pub fn new(rows: usize, cols: usize) -> Self {
        Self::filled(rows, cols, BLACK)
    }

    /// Create a buffer filled with the given gray level
    pub fn filled(rows: usize, cols: usize, value: u8) -> Self {
        Self {
            rows,
            cols,
            data: Arc::new(vec![value; rows * cols]),
        }
    }

    /// Wrap existing row-major data; `None` if the length does not match
    pub fn from_vec(rows: usize, cols: usize, data: Vec<u8>) -> Option<Self> {
        if data.len() != rows * cols {
            return None;
        }
        Some(Self {
            rows,
            cols,
            data: Arc::new(data),
        })
    }

    #[inline]
    pub fn rows(&self) -> usize {
        self.rows
    }

    #[inline]
    pub fn cols(&self) -> usize {
        self.cols
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[inline]
    fn index(&self, row: usize, col: usize) -> usize {
        debug_assert!(
            row < self.rows && col < self.cols,
            "pixel ({}, {}) outside {}x{} buffer",
            row,
            col,
            self.rows,
            self.cols
        );
        self.cols * row + col
    }

    #[inline]
    pub fn get(&self, row: usize, col: usize) -> u8 {
        self.data[self.index(row, col)]
    }

    #[inline]
    pub fn get_at(&self, pos: PixelPos) -> u8 {
        self.get(pos.row, pos.col)
    }

    /// Write a pixel, un-sharing the storage first if another clone holds it
    #[inline]
    pub fn set(&mut self, row: usize, col: usize, value: u8) {
        let index = self.index(row, col);
        Arc::make_mut(&mut self.data)[index] = value;
    }

    #[inline]
    pub fn set_at(&mut self, pos: PixelPos, value: u8) {
        self.set(pos.row, pos.col, value);
    }

    /// Fill every pixel with the given value
    pub fn fill(&mut self, value: u8) {
        Arc::make_mut(&mut self.data).fill(value);
    }

    /// Fill with the `CLEAN_FILL` sentinel
    pub fn clean(&mut self) {
        self.fill(CLEAN_FILL);
    }

    /// Row-major view of all pixels
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Mutable row-major view; un-shares the storage if needed
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        Arc::make_mut(&mut self.data).as_mut_slice()
    }

    /// One row as a slice
    pub fn row(&self, row: usize) -> &[u8] {
        let start = self.index(row, 0);
        &self.data[start..start + self.cols]
    }

    /// True when both buffers point at the same storage
    pub fn shares_storage_with(&self, other: &PixelBuffer) -> bool {
        Arc::ptr_eq(&self.data, &other.data)
    }

    /// Copy a rectangular window starting at `origin` into a new buffer.
    /// The window is clipped to the buffer bounds.
    pub fn crop(&self, origin: PixelPos, rows: usize, cols: usize) -> PixelBuffer {
        let rows = rows.min(self.rows.saturating_sub(origin.row));
        let cols = cols.min(self.cols.saturating_sub(origin.col));
        let mut data = Vec::with_capacity(rows * cols);
        for row in origin.row..origin.row + rows {
            let start = self.cols * row + origin.col;
            data.extend_from_slice(&self.data[start..start + cols]);
        }
        PixelBuffer {
            rows,
            cols,
            data: Arc::new(data),
        }
    }

    /// Copy `src` into this buffer with its top-left corner at `origin`,
    /// clipping whatever falls outside
    pub fn paste(&mut self, src: &PixelBuffer, origin: PixelPos) {
        let rows = src.rows.min(self.rows.saturating_sub(origin.row));
        let cols = src.cols.min(self.cols.saturating_sub(origin.col));
        let self_cols = self.cols;
        let dst = Arc::make_mut(&mut self.data);
        for row in 0..rows {
            let dst_start = self_cols * (origin.row + row) + origin.col;
            dst[dst_start..dst_start + cols].copy_from_slice(&src.row(row)[..cols]);
        }
    }

    /// Number of pixels equal to `value`
    pub fn count_value(&self, value: u8) -> usize {
        self.data.iter().filter(|&&v| v == value).count()
    }

    /// Convert an 8-bit luma image into a buffer
    pub fn from_gray_image(image: &GrayImage) -> Self {
        let (width, height) = image.dimensions();
        Self {
            rows: height as usize,
            cols: width as usize,
            data: Arc::new(image.as_raw().clone()),
        }
    }

    /// Convert the buffer into an 8-bit luma image
    pub fn to_gray_image(&self) -> GrayImage {
        GrayImage::from_raw(self.cols as u32, self.rows as u32, self.data.to_vec())
            .unwrap_or_else(|| GrayImage::new(self.cols as u32, self.rows as u32))
    }
}
