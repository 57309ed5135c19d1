//! # movie-recorder-core
//!
//! Asynchronous movie-writing state machine.
//!
//! Serializes concurrent audio/video sample submissions into a container
//! file through an underlying asset-writing engine, coordinating start-up,
//! steady-state writing, and shutdown across threads. Engines implement the
//! `WriterEngine`/`AssetWriter` traits; `PacketFileEngine` is the built-in
//! framed-file sink.
//!
//! ## Architecture
//!
//! ```text
//! movie-recorder-core (this crate)
//! ├── traits/       ← WriterEngine, AssetWriter, WriterInput, MovieRecorderDelegate, CallbackQueue
//! ├── models/       ← RecorderError, RecorderStatus, formats, samples, encoder settings
//! ├── dispatch/     ← SerialQueue (single-worker writing queue)
//! ├── session/      ← MovieRecorder (state machine orchestrator)
//! ├── storage/      ← PacketFileEngine (framed packet-stream sink)
//! └── processing/   ← RosyRenderer (stateless per-pixel filter)
//! ```
//!
//! Producers append samples from capture threads without blocking; all
//! writer I/O funnels through one dedicated serial queue; delegate
//! notifications land on a client-chosen callback queue.

pub mod dispatch;
pub mod models;
pub mod processing;
pub mod session;
pub mod storage;
pub mod traits;

// Re-export key types at crate root for convenience.
pub use dispatch::serial_queue::SerialQueue;
pub use models::error::RecorderError;
pub use models::format::{AudioFormat, MediaKind, PixelFormat, VideoFormat, VideoTransform};
pub use models::sample::{MediaTime, PixelBuffer, SampleBuffer};
pub use models::settings::{AudioCodec, AudioEncoderSettings, VideoCodec, VideoEncoderSettings};
pub use models::state::RecorderStatus;
pub use processing::rosy::RosyRenderer;
pub use session::movie_recorder::MovieRecorder;
pub use storage::packet_writer::{PacketFileEngine, PacketFileSummary, PacketFileWriter};
pub use traits::asset_writer::{
    AssetWriter, AudioInputDescriptor, FinishCompletion, VideoInputDescriptor, WriterEngine,
    WriterInput,
};
pub use traits::callback_queue::{CallbackQueue, Task};
pub use traits::delegate::MovieRecorderDelegate;
