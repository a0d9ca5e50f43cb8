//! RGB frame type
//!
//! A [`Frame`] is an immutable HxWx3 8-bit image, row-major and contiguous.
//! Pixel data lives in a `bytes::Bytes`, so repeating a frame or handing a
//! copy to a reader only bumps a reference count; nobody can mutate the
//! buffer after construction.

use bytes::Bytes;

use crate::error::FrameError;

/// Number of channels in a normalized frame
pub const RGB_CHANNELS: usize = 3;

/// Host pixel data in one of the element types a pipeline may hand over
#[derive(Debug, Clone, Copy)]
pub enum PixelData<'a> {
    /// 8-bit values, used as-is
    U8(&'a [u8]),
    /// Floating point values; a buffer whose maximum is at most 1.0 is treated
    /// as normalized and scaled by 255
    F32(&'a [f32]),
}

impl<'a> PixelData<'a> {
    fn len(&self) -> usize {
        match self {
            PixelData::U8(data) => data.len(),
            PixelData::F32(data) => data.len(),
        }
    }

    fn head(self, len: usize) -> PixelData<'a> {
        match self {
            PixelData::U8(data) => PixelData::U8(&data[..len]),
            PixelData::F32(data) => PixelData::F32(&data[..len]),
        }
    }
}

/// An owned HxWx3 RGB frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    width: u32,
    height: u32,
    data: Bytes,
}

impl Frame {
    /// Create a frame from packed RGB bytes
    pub fn from_rgb(width: u32, height: u32, data: impl Into<Bytes>) -> Result<Self, FrameError> {
        let data = data.into();
        check_dimensions(width, height)?;

        let expected = pixel_count(width, height) * RGB_CHANNELS;
        if data.len() != expected {
            return Err(FrameError::LengthMismatch {
                expected,
                actual: data.len(),
            });
        }

        Ok(Self {
            width,
            height,
            data,
        })
    }

    /// Validate and normalize host pixel data into an RGB frame.
    ///
    /// Accepts 3 (RGB) or 4 (RGBA) channels; alpha is discarded. Values are
    /// clamped to 0..=255.
    pub fn from_pixels(
        width: u32,
        height: u32,
        channels: usize,
        pixels: PixelData<'_>,
    ) -> Result<Self, FrameError> {
        check_dimensions(width, height)?;
        if channels != 3 && channels != 4 {
            return Err(FrameError::UnsupportedChannels(channels));
        }

        let count = pixel_count(width, height);
        let expected = count * channels;
        if pixels.len() != expected {
            return Err(FrameError::LengthMismatch {
                expected,
                actual: pixels.len(),
            });
        }

        let mut out = Vec::with_capacity(count * RGB_CHANNELS);
        match pixels {
            PixelData::U8(data) => {
                if channels == RGB_CHANNELS {
                    out.extend_from_slice(data);
                } else {
                    for px in data.chunks_exact(channels) {
                        out.extend_from_slice(&px[..RGB_CHANNELS]);
                    }
                }
            }
            PixelData::F32(data) => {
                let max = data.iter().copied().fold(f32::MIN, f32::max);
                let scale = if max <= 1.0 { 255.0 } else { 1.0 };
                for px in data.chunks_exact(channels) {
                    for &value in &px[..RGB_CHANNELS] {
                        out.push(to_u8(value * scale));
                    }
                }
            }
        }

        Ok(Self {
            width,
            height,
            data: Bytes::from(out),
        })
    }

    /// Normalize a host tensor described by its `shape`.
    ///
    /// Rank 3 is read as CxHxW when the first dimension is 1 or 3, as HxWxC
    /// otherwise. Rank 4 has a leading batch dimension; only the first image
    /// is used. Values are then normalized as in [`Frame::from_pixels`].
    pub fn from_tensor(shape: &[usize], pixels: PixelData<'_>) -> Result<Self, FrameError> {
        let dims = match shape.len() {
            3 => shape,
            4 => &shape[1..],
            _ => return Err(FrameError::UnsupportedShape(shape.to_vec())),
        };

        let expected: usize = shape.iter().product();
        if pixels.len() != expected {
            return Err(FrameError::LengthMismatch {
                expected,
                actual: pixels.len(),
            });
        }
        let pixels = pixels.head(dims.iter().product());

        let planar = dims[0] == 1 || dims[0] == 3;
        let (height, width, channels) = match planar {
            true => (dims[1], dims[2], dims[0]),
            false => (dims[0], dims[1], dims[2]),
        };
        let to_u32 =
            |v: usize| u32::try_from(v).map_err(|_| FrameError::UnsupportedShape(shape.to_vec()));
        let (width, height) = (to_u32(width)?, to_u32(height)?);

        if !planar {
            return Self::from_pixels(width, height, channels, pixels);
        }
        let count = pixel_count(width, height);
        match pixels {
            PixelData::U8(data) => {
                let data = interleave(data, channels, count);
                Self::from_pixels(width, height, channels, PixelData::U8(&data))
            }
            PixelData::F32(data) => {
                let data = interleave(data, channels, count);
                Self::from_pixels(width, height, channels, PixelData::F32(&data))
            }
        }
    }

    /// A zero-filled frame
    pub fn blank(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            data: Bytes::from(vec![0u8; pixel_count(width, height) * RGB_CHANNELS]),
        }
    }

    /// Frame width in pixels
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Frame height in pixels
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Packed RGB bytes
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    /// Size of the pixel buffer in bytes
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the pixel buffer is empty (never true for a constructed frame)
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// RGB value at (x, y)
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 3]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let offset = (y as usize * self.width as usize + x as usize) * RGB_CHANNELS;
        let px = self.data.get(offset..offset + RGB_CHANNELS)?;
        Some([px[0], px[1], px[2]])
    }
}

fn check_dimensions(width: u32, height: u32) -> Result<(), FrameError> {
    if width == 0 || height == 0 {
        return Err(FrameError::EmptyDimensions { width, height });
    }
    Ok(())
}

fn pixel_count(width: u32, height: u32) -> usize {
    width as usize * height as usize
}

/// CxHxW planes to HxWxC pixels
fn interleave<T: Copy>(planes: &[T], channels: usize, count: usize) -> Vec<T> {
    let mut out = Vec::with_capacity(planes.len());
    for i in 0..count {
        out.extend((0..channels).map(|c| planes[c * count + i]));
    }
    out
}

fn to_u8(value: f32) -> u8 {
    if value.is_nan() {
        return 0;
    }
    value.clamp(0.0, 255.0) as u8
}
