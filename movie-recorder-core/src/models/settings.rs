use serde::{Deserialize, Serialize};

use super::format::{AudioFormat, VideoFormat};

/// Video codec for encoder settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VideoCodec {
    H264,
}

/// Audio codec for encoder settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AudioCodec {
    Aac,
}

/// Frame area below which default bitrates assume streaming-grade output.
const SD_PIXEL_AREA: u64 = 640 * 480;

/// Encoder settings for a video track input.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VideoEncoderSettings {
    pub codec: VideoCodec,
    pub width: u32,
    pub height: u32,
    pub average_bit_rate: u64,
    pub expected_frame_rate: u32,
    pub max_key_frame_interval: u32,
}

impl VideoEncoderSettings {
    /// Default H.264 configuration for a source format.
    ///
    /// Lower-than-SD resolutions are assumed to be intended for streaming
    /// and get 4.05 bits per pixel; everything else gets 10.1.
    pub fn default_for(format: &VideoFormat) -> Self {
        let num_pixels = format.pixel_count();
        let bits_per_pixel: f64 = if num_pixels < SD_PIXEL_AREA { 4.05 } else { 10.1 };

        Self {
            codec: VideoCodec::H264,
            width: format.width,
            height: format.height,
            average_bit_rate: (num_pixels as f64 * bits_per_pixel) as u64,
            expected_frame_rate: 30,
            max_key_frame_interval: 30,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.width == 0 || self.height == 0 {
            return Err(format!("invalid dimensions {}x{}", self.width, self.height));
        }
        if self.average_bit_rate == 0 {
            return Err("average bit rate must be positive".into());
        }
        if self.expected_frame_rate == 0 {
            return Err("expected frame rate must be positive".into());
        }
        Ok(())
    }
}

/// Encoder settings for an audio track input.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AudioEncoderSettings {
    pub codec: AudioCodec,
    pub sample_rate: f64,
    pub channels: u16,
}

impl AudioEncoderSettings {
    /// Default AAC configuration, with rate and channel hints taken from
    /// the source format.
    pub fn default_for(format: &AudioFormat) -> Self {
        Self {
            codec: AudioCodec::Aac,
            sample_rate: format.sample_rate,
            channels: format.channels,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.sample_rate <= 0.0 {
            return Err("sample rate must be positive".into());
        }
        if self.channels == 0 {
            return Err("channel count must be positive".into());
        }
        Ok(())
    }
}
