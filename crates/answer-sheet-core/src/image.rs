use serde::{Deserialize, Serialize};

/// Errors for pixel buffers that do not describe a usable image.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ImageError {
    #[error("image has no pixels (width={width}, height={height})")]
    EmptyImage { width: usize, height: usize },
    #[error("invalid pixel buffer length (expected {expected} bytes, got {got})")]
    InvalidBuffer { expected: usize, got: usize },
    #[error("unsupported channel count {0} (expected 1, 3 or 4)")]
    UnsupportedChannels(usize),
}

/// Memory layout of one pixel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PixelFormat {
    Gray8,
    Rgb8,
    Rgba8,
}

impl PixelFormat {
    #[inline]
    pub fn channels(self) -> usize {
        match self {
            PixelFormat::Gray8 => 1,
            PixelFormat::Rgb8 => 3,
            PixelFormat::Rgba8 => 4,
        }
    }

    pub fn from_channels(channels: usize) -> Result<Self, ImageError> {
        match channels {
            1 => Ok(PixelFormat::Gray8),
            3 => Ok(PixelFormat::Rgb8),
            4 => Ok(PixelFormat::Rgba8),
            n => Err(ImageError::UnsupportedChannels(n)),
        }
    }
}

/// Borrowed, decoded raster with 8-bit channels in row-major order.
#[derive(Clone, Copy, Debug)]
pub struct ImageView<'a> {
    pub width: usize,
    pub height: usize,
    pub format: PixelFormat,
    pub data: &'a [u8],
}

impl<'a> ImageView<'a> {
    /// Wrap a pixel buffer, checking its length against the dimensions.
    pub fn new(
        width: usize,
        height: usize,
        format: PixelFormat,
        data: &'a [u8],
    ) -> Result<Self, ImageError> {
        let view = Self {
            width,
            height,
            format,
            data,
        };
        view.validate()?;
        Ok(view)
    }

    /// Check that the view is non-empty and its buffer matches the dimensions.
    pub fn validate(&self) -> Result<(), ImageError> {
        if self.width == 0 || self.height == 0 {
            return Err(ImageError::EmptyImage {
                width: self.width,
                height: self.height,
            });
        }
        let expected = self
            .width
            .checked_mul(self.height)
            .and_then(|n| n.checked_mul(self.format.channels()))
            .ok_or(ImageError::EmptyImage {
                width: self.width,
                height: self.height,
            })?;
        if self.data.len() != expected {
            return Err(ImageError::InvalidBuffer {
                expected,
                got: self.data.len(),
            });
        }
        Ok(())
    }

    /// Average colour-channel intensity at `(x, y)`; alpha is ignored.
    ///
    /// Callers must keep `(x, y)` inside the image.
    #[inline]
    pub fn intensity(&self, x: usize, y: usize) -> u8 {
        let c = self.format.channels();
        let base = (y * self.width + x) * c;
        match self.format {
            PixelFormat::Gray8 => self.data[base],
            PixelFormat::Rgb8 | PixelFormat::Rgba8 => {
                let sum = self.data[base] as u16
                    + self.data[base + 1] as u16
                    + self.data[base + 2] as u16;
                (sum / 3) as u8
            }
        }
    }

    /// Collapse to a single intensity channel.
    pub fn to_gray(&self) -> GrayImage {
        if self.format == PixelFormat::Gray8 {
            return GrayImage {
                width: self.width,
                height: self.height,
                data: self.data.to_vec(),
            };
        }
        let mut data = Vec::with_capacity(self.width * self.height);
        for y in 0..self.height {
            for x in 0..self.width {
                data.push(self.intensity(x, y));
            }
        }
        GrayImage {
            width: self.width,
            height: self.height,
            data,
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct GrayImageView<'a> {
    pub width: usize,
    pub height: usize,
    pub data: &'a [u8], // row-major, len = w*h
}

impl GrayImageView<'_> {
    #[inline]
    pub fn get(&self, x: usize, y: usize) -> u8 {
        self.data[y * self.width + x]
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GrayImage {
    pub width: usize,
    pub height: usize,
    pub data: Vec<u8>,
}

impl GrayImage {
    /// Allocate an image filled with a single intensity.
    pub fn filled(width: usize, height: usize, value: u8) -> Self {
        Self {
            width,
            height,
            data: vec![value; width * height],
        }
    }

    pub fn view(&self) -> GrayImageView<'_> {
        GrayImageView {
            width: self.width,
            height: self.height,
            data: &self.data,
        }
    }

    pub fn as_image_view(&self) -> ImageView<'_> {
        ImageView {
            width: self.width,
            height: self.height,
            format: PixelFormat::Gray8,
            data: &self.data,
        }
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize) -> u8 {
        self.data[y * self.width + x]
    }

    /// Write a pixel; coordinates outside the image are ignored.
    #[inline]
    pub fn put(&mut self, x: i64, y: i64, value: u8) {
        if x < 0 || y < 0 || x >= self.width as i64 || y >= self.height as i64 {
            return;
        }
        let idx = y as usize * self.width + x as usize;
        self.data[idx] = value;
    }
}
