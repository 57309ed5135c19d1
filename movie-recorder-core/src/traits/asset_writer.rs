use std::path::Path;

use crate::models::error::RecorderError;
use crate::models::format::{AudioFormat, VideoFormat, VideoTransform};
use crate::models::sample::{MediaTime, SampleBuffer};
use crate::models::settings::{AudioEncoderSettings, VideoEncoderSettings};

/// Completion callback for `AssetWriter::finish_writing`. Fires exactly
/// once, on whatever thread the engine finalizes from.
pub type FinishCompletion = Box<dyn FnOnce(Result<(), RecorderError>) + Send + 'static>;

/// Description of a video track input handed to the writer.
#[derive(Debug, Clone)]
pub struct VideoInputDescriptor {
    pub source_format: VideoFormat,
    pub settings: VideoEncoderSettings,
    /// Applied to the track's output geometry.
    pub transform: VideoTransform,
    /// Tolerate live, possibly irregular sample arrival rather than
    /// batch-like delivery.
    pub expects_realtime: bool,
}

/// Description of an audio track input handed to the writer.
#[derive(Debug, Clone)]
pub struct AudioInputDescriptor {
    pub source_format: AudioFormat,
    pub settings: AudioEncoderSettings,
    pub expects_realtime: bool,
}

/// Per-media-kind channel into the writer, accepting samples of one kind.
pub trait WriterInput: Send {
    /// Whether the input can take another sample right now. `false` is
    /// transient back-pressure, not a fault; callers drop the buffer.
    fn ready_for_more_media_data(&self) -> bool;

    /// Append one sample. An error is a writer fault and poisons the whole
    /// recording.
    fn append_sample(&mut self, sample: &SampleBuffer) -> Result<(), RecorderError>;
}

/// The underlying engine that encodes and multiplexes samples into a
/// container file.
///
/// The recorder funnels every call through one serial writing queue; an
/// implementation never sees concurrent appends, nor an append concurrent
/// with `finish_writing`.
pub trait AssetWriter: Send {
    fn can_apply_video_settings(&self, settings: &VideoEncoderSettings) -> bool;

    fn can_apply_audio_settings(&self, settings: &AudioEncoderSettings) -> bool;

    /// Create and attach the video track input. At most one per writer;
    /// only before `start_writing`.
    fn add_video_input(
        &mut self,
        descriptor: VideoInputDescriptor,
    ) -> Result<Box<dyn WriterInput>, RecorderError>;

    /// Create and attach the audio track input. At most one per writer;
    /// only before `start_writing`.
    fn add_audio_input(
        &mut self,
        descriptor: AudioInputDescriptor,
    ) -> Result<Box<dyn WriterInput>, RecorderError>;

    /// Open the output stream. No inputs may be added afterwards.
    fn start_writing(&mut self) -> Result<(), RecorderError>;

    /// Anchor the recording timeline. Called exactly once, with the
    /// presentation timestamp of the first appended sample.
    fn start_session(&mut self, start_time: MediaTime);

    /// Asynchronously finalize the container. `completion` fires exactly
    /// once; an inline invocation on the calling thread is allowed.
    fn finish_writing(&mut self, completion: FinishCompletion);
}

/// Factory opening writers bound to a target location.
pub trait WriterEngine: Send + Sync {
    /// Open a new writer at `url`. Implementations refuse to overwrite an
    /// existing file; the recorder removes stale targets first.
    fn create_writer(&self, url: &Path) -> Result<Box<dyn AssetWriter>, RecorderError>;
}
