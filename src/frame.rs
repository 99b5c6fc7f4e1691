use image::RgbaImage;

use crate::errors::{CamMeasureError, Result};

/// Value marking foreground pixels in an [`EdgeMap`]
pub const FOREGROUND: u8 = 255;

/// An owned RGBA camera frame in row-major order, 4 bytes per pixel.
///
/// Construction validates the buffer against the declared dimensions, so any
/// `FrameBuffer` handed to the pipeline is structurally sound.
#[derive(Debug, Clone)]
pub struct FrameBuffer {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl FrameBuffer {
    /// Create a frame from raw RGBA bytes
    pub fn new(width: u32, height: u32, pixels: Vec<u8>) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(CamMeasureError::InvalidInput(format!(
                "frame dimensions must be non-zero, got {}x{}",
                width, height
            )));
        }

        let expected = width as usize * height as usize * 4;
        if pixels.len() != expected {
            return Err(CamMeasureError::InvalidInput(format!(
                "pixel buffer holds {} bytes, expected {} for {}x{} RGBA",
                pixels.len(),
                expected,
                width,
                height
            )));
        }

        Ok(Self {
            width,
            height,
            pixels,
        })
    }

    /// Create a frame from a decoded RGBA image
    pub fn from_rgba_image(image: &RgbaImage) -> Result<Self> {
        Self::new(image.width(), image.height(), image.as_raw().clone())
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// RGBA bytes at (x, y)
    #[inline]
    pub fn rgba(&self, x: u32, y: u32) -> [u8; 4] {
        let i = (y as usize * self.width as usize + x as usize) * 4;
        [
            self.pixels[i],
            self.pixels[i + 1],
            self.pixels[i + 2],
            self.pixels[i + 3],
        ]
    }
}

/// Single-channel intensity buffer, one byte per pixel
#[derive(Debug, Clone)]
pub struct GrayscaleBuffer {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

impl GrayscaleBuffer {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            data: vec![0; width as usize * height as usize],
        }
    }

    pub fn from_raw(width: u32, height: u32, data: Vec<u8>) -> Self {
        debug_assert_eq!(data.len(), width as usize * height as usize);
        Self {
            width,
            height,
            data,
        }
    }

    #[inline]
    pub fn idx(&self, x: u32, y: u32) -> usize {
        y as usize * self.width as usize + x as usize
    }

    #[inline]
    pub fn get(&self, x: u32, y: u32) -> u8 {
        self.data[self.idx(x, y)]
    }

    #[inline]
    pub fn set(&mut self, x: u32, y: u32, value: u8) {
        let i = self.idx(x, y);
        self.data[i] = value;
    }
}

/// Binary mask over a frame; [`FOREGROUND`] marks edge or silhouette pixels.
///
/// The same buffer type carries Canny output, morphology results and the
/// final silhouette handed to segmentation.
#[derive(Debug, Clone)]
pub struct EdgeMap {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

impl EdgeMap {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            data: vec![0; width as usize * height as usize],
        }
    }

    #[inline]
    pub fn idx(&self, x: u32, y: u32) -> usize {
        y as usize * self.width as usize + x as usize
    }

    #[inline]
    pub fn is_set(&self, x: u32, y: u32) -> bool {
        self.data[self.idx(x, y)] != 0
    }

    #[inline]
    pub fn set(&mut self, x: u32, y: u32) {
        let i = self.idx(x, y);
        self.data[i] = FOREGROUND;
    }

    #[inline]
    pub fn clear(&mut self, x: u32, y: u32) {
        let i = self.idx(x, y);
        self.data[i] = 0;
    }

    /// Number of foreground pixels
    pub fn foreground_count(&self) -> usize {
        self.data.iter().filter(|v| **v != 0).count()
    }
}
