use serde::{Deserialize, Serialize};

use super::format::{PixelFormat, VideoFormat};

/// Rational media timestamp: `value / timescale` seconds.
///
/// A zero timescale marks the invalid sentinel, used for samples whose
/// duration is unknown (e.g. synthesized from a raw pixel buffer).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MediaTime {
    pub value: i64,
    pub timescale: i32,
}

impl MediaTime {
    pub const INVALID: Self = Self {
        value: 0,
        timescale: 0,
    };

    pub const ZERO: Self = Self {
        value: 0,
        timescale: 1,
    };

    pub fn new(value: i64, timescale: i32) -> Self {
        Self { value, timescale }
    }

    pub fn is_valid(&self) -> bool {
        self.timescale != 0
    }

    pub fn as_secs_f64(&self) -> f64 {
        if self.is_valid() {
            self.value as f64 / f64::from(self.timescale)
        } else {
            0.0
        }
    }
}

/// A timestamped unit of encoded or raw media data.
///
/// Producers hand these to the recorder; the recorder never inspects the
/// payload, only the timing.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleBuffer {
    pub presentation_time: MediaTime,
    /// `MediaTime::INVALID` when unknown.
    pub duration: MediaTime,
    pub data: Vec<u8>,
}

impl SampleBuffer {
    pub fn new(presentation_time: MediaTime, duration: MediaTime, data: Vec<u8>) -> Self {
        Self {
            presentation_time,
            duration,
            data,
        }
    }

    /// Synthesize a video sample of invalid duration from a raw pixel
    /// buffer. Fails when the buffer does not match `format` or carries too
    /// little data for its declared geometry.
    pub fn from_pixel_buffer(
        pixel_buffer: &PixelBuffer,
        format: &VideoFormat,
        presentation_time: MediaTime,
    ) -> Result<Self, String> {
        if pixel_buffer.width != format.width || pixel_buffer.height != format.height {
            return Err(format!(
                "pixel buffer is {}x{}, video track expects {}x{}",
                pixel_buffer.width, pixel_buffer.height, format.width, format.height
            ));
        }
        if pixel_buffer.bytes_per_row < pixel_buffer.width * 4 {
            return Err(format!(
                "bytes per row {} too small for width {}",
                pixel_buffer.bytes_per_row, pixel_buffer.width
            ));
        }
        let required = pixel_buffer.bytes_per_row as usize * pixel_buffer.height as usize;
        if pixel_buffer.data.len() < required {
            return Err(format!(
                "pixel buffer holds {} bytes, geometry requires {}",
                pixel_buffer.data.len(),
                required
            ));
        }
        Ok(Self {
            presentation_time,
            duration: MediaTime::INVALID,
            data: pixel_buffer.data.clone(),
        })
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Raw 32-bit BGRA frame. Rows may be padded to `bytes_per_row`.
#[derive(Debug, Clone, PartialEq)]
pub struct PixelBuffer {
    pub width: u32,
    pub height: u32,
    pub bytes_per_row: u32,
    pub pixel_format: PixelFormat,
    pub data: Vec<u8>,
}

impl PixelBuffer {
    /// Allocate a zeroed frame with tightly packed rows.
    pub fn new(width: u32, height: u32) -> Self {
        let bytes_per_row = width * 4;
        Self {
            width,
            height,
            bytes_per_row,
            pixel_format: PixelFormat::Bgra32,
            data: vec![0; bytes_per_row as usize * height as usize],
        }
    }

    /// Wrap existing frame data. `data` must cover `bytes_per_row * height`
    /// bytes.
    pub fn from_data(width: u32, height: u32, bytes_per_row: u32, data: Vec<u8>) -> Result<Self, String> {
        if bytes_per_row < width * 4 {
            return Err(format!(
                "bytes per row {} too small for width {}",
                bytes_per_row, width
            ));
        }
        if data.len() < bytes_per_row as usize * height as usize {
            return Err(format!(
                "frame data holds {} bytes, geometry requires {}",
                data.len(),
                bytes_per_row as usize * height as usize
            ));
        }
        Ok(Self {
            width,
            height,
            bytes_per_row,
            pixel_format: PixelFormat::Bgra32,
            data,
        })
    }
}
