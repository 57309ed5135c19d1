use std::fs::{self, File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use sha2::{Digest, Sha256};

use crate::models::error::RecorderError;
use crate::models::format::MediaKind;
use crate::models::sample::{MediaTime, SampleBuffer};
use crate::models::settings::{AudioEncoderSettings, VideoEncoderSettings};
use crate::traits::asset_writer::{
    AssetWriter, AudioInputDescriptor, FinishCompletion, VideoInputDescriptor, WriterEngine,
    WriterInput,
};

/// Size of the packet-stream file header in bytes.
pub const HEADER_SIZE: usize = 32;

/// Size of the SHA-256 trailer appended on finalize.
pub const TRAILER_SIZE: usize = 32;

const MAGIC: &[u8; 4] = b"MRPK";
const VERSION: u16 = 1;

const FLAG_FINALIZED: u8 = 1 << 0;
const TRACK_VIDEO: u8 = 1 << 0;
const TRACK_AUDIO: u8 = 1 << 1;

/// Per-record header: kind byte, presentation time, payload length.
const RECORD_HEADER_SIZE: usize = 1 + 8 + 4 + 4;

/// Writing engine producing framed packet-stream files.
///
/// Not a general container format — one trivial sink that exercises the
/// recorder lifecycle end-to-end and leaves a verifiable artifact.
///
/// ## File format
///
/// ```text
/// Header (32 bytes):
/// [0-3]    "MRPK"
/// [4-5]    version (u16 LE)
/// [6]      flags (bit 0: finalized)
/// [7]      tracks (bit 0: video, bit 1: audio)
/// [8-15]   record count (u64 LE) — patched on finalize
/// [16-23]  session start value (i64 LE)
/// [24-27]  session start timescale (i32 LE, 0 = no session)
/// [28-31]  reserved
///
/// Records, repeated:
/// [0]      media kind (0 = video, 1 = audio)
/// [1-8]    presentation time value (i64 LE)
/// [9-12]   presentation time timescale (i32 LE)
/// [13-16]  payload length (u32 LE)
/// [17-..]  payload
///
/// Trailer (finalized files only):
/// SHA-256 digest of every preceding byte (32 bytes)
/// ```
///
/// A file whose finalized flag is clear was abandoned mid-recording.
#[derive(Debug, Default)]
pub struct PacketFileEngine;

impl PacketFileEngine {
    pub fn new() -> Self {
        Self
    }
}

impl WriterEngine for PacketFileEngine {
    fn create_writer(&self, url: &Path) -> Result<Box<dyn AssetWriter>, RecorderError> {
        Ok(Box::new(PacketFileWriter::create(url)?))
    }
}

/// Shared file-side state behind the writer and its inputs.
struct PacketSink {
    path: PathBuf,
    file: Option<File>,
    has_video: bool,
    has_audio: bool,
    records_written: u64,
    session_start: Option<MediaTime>,
    started_writing: bool,
    finalized: bool,
}

impl PacketSink {
    fn header(&self) -> [u8; HEADER_SIZE] {
        let mut header = [0u8; HEADER_SIZE];
        header[0..4].copy_from_slice(MAGIC);
        header[4..6].copy_from_slice(&VERSION.to_le_bytes());
        if self.finalized {
            header[6] |= FLAG_FINALIZED;
        }
        if self.has_video {
            header[7] |= TRACK_VIDEO;
        }
        if self.has_audio {
            header[7] |= TRACK_AUDIO;
        }
        header[8..16].copy_from_slice(&self.records_written.to_le_bytes());
        let session = self.session_start.unwrap_or(MediaTime::INVALID);
        header[16..24].copy_from_slice(&session.value.to_le_bytes());
        header[24..28].copy_from_slice(&session.timescale.to_le_bytes());
        header
    }

    fn write_record(&mut self, kind: MediaKind, sample: &SampleBuffer) -> Result<(), RecorderError> {
        if !self.started_writing {
            return Err(RecorderError::Writer("writing has not started".into()));
        }
        if self.finalized {
            return Err(RecorderError::Writer("file is already finalized".into()));
        }
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| RecorderError::Storage("packet file is closed".into()))?;

        let mut record = Vec::with_capacity(RECORD_HEADER_SIZE + sample.data.len());
        record.push(match kind {
            MediaKind::Video => 0u8,
            MediaKind::Audio => 1u8,
        });
        record.extend_from_slice(&sample.presentation_time.value.to_le_bytes());
        record.extend_from_slice(&sample.presentation_time.timescale.to_le_bytes());
        record.extend_from_slice(&(sample.data.len() as u32).to_le_bytes());
        record.extend_from_slice(&sample.data);

        file.write_all(&record)
            .map_err(|e| RecorderError::Storage(format!("record write failed: {e}")))?;
        self.records_written += 1;
        Ok(())
    }

    /// Patch the header, append the SHA-256 trailer, and close the file.
    /// Returns the hex digest of the finalized artifact.
    fn finalize(&mut self) -> Result<String, RecorderError> {
        if !self.started_writing {
            return Err(RecorderError::Writer("cannot finish before writing starts".into()));
        }
        if self.finalized {
            return Err(RecorderError::Writer("file is already finalized".into()));
        }
        let mut file = self
            .file
            .take()
            .ok_or_else(|| RecorderError::Storage("packet file is closed".into()))?;

        self.finalized = true;
        file.seek(SeekFrom::Start(0))
            .map_err(|e| RecorderError::Storage(e.to_string()))?;
        file.write_all(&self.header())
            .map_err(|e| RecorderError::Storage(e.to_string()))?;
        file.flush()
            .map_err(|e| RecorderError::Storage(e.to_string()))?;
        drop(file);

        let digest = {
            let data = fs::read(&self.path)
                .map_err(|e| RecorderError::Storage(format!("failed to read file for checksum: {e}")))?;
            Sha256::digest(&data)
        };

        let mut file = OpenOptions::new()
            .append(true)
            .open(&self.path)
            .map_err(|e| RecorderError::Storage(e.to_string()))?;
        file.write_all(&digest)
            .map_err(|e| RecorderError::Storage(e.to_string()))?;
        file.flush()
            .map_err(|e| RecorderError::Storage(e.to_string()))?;

        Ok(hex_encode(&digest))
    }
}

/// Concrete [`AssetWriter`] over a packet-stream file.
pub struct PacketFileWriter {
    sink: Arc<Mutex<PacketSink>>,
}

impl PacketFileWriter {
    /// Open a new packet file at `path`, refusing to overwrite an existing
    /// one, and write the placeholder header.
    pub fn create(path: &Path) -> Result<Self, RecorderError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .map_err(|e| RecorderError::Storage(format!("failed to create directory: {e}")))?;
            }
        }

        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .map_err(|e| RecorderError::Storage(format!("failed to create file: {e}")))?;

        let mut sink = PacketSink {
            path: path.to_path_buf(),
            file: None,
            has_video: false,
            has_audio: false,
            records_written: 0,
            session_start: None,
            started_writing: false,
            finalized: false,
        };
        file.write_all(&sink.header())
            .map_err(|e| RecorderError::Storage(format!("header write failed: {e}")))?;
        sink.file = Some(file);

        Ok(Self {
            sink: Arc::new(Mutex::new(sink)),
        })
    }
}

impl AssetWriter for PacketFileWriter {
    fn can_apply_video_settings(&self, settings: &VideoEncoderSettings) -> bool {
        settings.validate().is_ok()
    }

    fn can_apply_audio_settings(&self, settings: &AudioEncoderSettings) -> bool {
        settings.validate().is_ok()
    }

    fn add_video_input(
        &mut self,
        descriptor: VideoInputDescriptor,
    ) -> Result<Box<dyn WriterInput>, RecorderError> {
        descriptor
            .settings
            .validate()
            .map_err(RecorderError::CannotSetupInput)?;
        let mut sink = self.sink.lock();
        if sink.started_writing {
            return Err(RecorderError::CannotSetupInput(
                "cannot add inputs after writing starts".into(),
            ));
        }
        if sink.has_video {
            return Err(RecorderError::CannotSetupInput("video input already attached".into()));
        }
        sink.has_video = true;
        Ok(Box::new(PacketInput {
            kind: MediaKind::Video,
            sink: Arc::clone(&self.sink),
        }))
    }

    fn add_audio_input(
        &mut self,
        descriptor: AudioInputDescriptor,
    ) -> Result<Box<dyn WriterInput>, RecorderError> {
        descriptor
            .settings
            .validate()
            .map_err(RecorderError::CannotSetupInput)?;
        let mut sink = self.sink.lock();
        if sink.started_writing {
            return Err(RecorderError::CannotSetupInput(
                "cannot add inputs after writing starts".into(),
            ));
        }
        if sink.has_audio {
            return Err(RecorderError::CannotSetupInput("audio input already attached".into()));
        }
        sink.has_audio = true;
        Ok(Box::new(PacketInput {
            kind: MediaKind::Audio,
            sink: Arc::clone(&self.sink),
        }))
    }

    fn start_writing(&mut self) -> Result<(), RecorderError> {
        let mut sink = self.sink.lock();
        if !sink.has_video && !sink.has_audio {
            return Err(RecorderError::Writer("cannot start writing with no inputs".into()));
        }
        if sink.started_writing {
            return Err(RecorderError::Writer("writing already started".into()));
        }
        sink.started_writing = true;
        Ok(())
    }

    fn start_session(&mut self, start_time: MediaTime) {
        self.sink.lock().session_start = Some(start_time);
    }

    fn finish_writing(&mut self, completion: FinishCompletion) {
        // Finalizing a local file is quick, so it runs inline on the
        // writing queue; the completion contract is met all the same.
        let result = self.sink.lock().finalize();
        match result {
            Ok(digest) => {
                log::info!("finalized packet file (sha256 {digest})");
                completion(Ok(()));
            }
            Err(error) => completion(Err(error)),
        }
    }
}

/// Input half: appends records of one media kind into the shared sink.
struct PacketInput {
    kind: MediaKind,
    sink: Arc<Mutex<PacketSink>>,
}

impl WriterInput for PacketInput {
    fn ready_for_more_media_data(&self) -> bool {
        // A local file applies no back-pressure.
        true
    }

    fn append_sample(&mut self, sample: &SampleBuffer) -> Result<(), RecorderError> {
        self.sink.lock().write_record(self.kind, sample)
    }
}

/// Parsed view of a packet file, for validation and tests.
#[derive(Debug, Clone, PartialEq)]
pub struct PacketFileSummary {
    pub version: u16,
    pub finalized: bool,
    pub has_video: bool,
    pub has_audio: bool,
    pub record_count: u64,
    pub session_start: Option<MediaTime>,
    /// Hex SHA-256 from the trailer; present only for finalized files, and
    /// only after verification against the file contents.
    pub checksum: Option<String>,
}

/// Read and validate a packet file.
///
/// Walks every record and, for finalized files, checks the record count in
/// the header and the SHA-256 trailer against the actual contents.
pub fn read_summary(path: &Path) -> Result<PacketFileSummary, RecorderError> {
    let data = fs::read(path).map_err(|e| RecorderError::Storage(format!("failed to read file: {e}")))?;
    if data.len() < HEADER_SIZE {
        return Err(RecorderError::Storage("file too short for header".into()));
    }
    if &data[0..4] != MAGIC {
        return Err(RecorderError::Storage("bad magic".into()));
    }

    let version = u16::from_le_bytes([data[4], data[5]]);
    let finalized = data[6] & FLAG_FINALIZED != 0;
    let has_video = data[7] & TRACK_VIDEO != 0;
    let has_audio = data[7] & TRACK_AUDIO != 0;
    let header_count = u64::from_le_bytes(data[8..16].try_into().unwrap());
    let session = MediaTime::new(
        i64::from_le_bytes(data[16..24].try_into().unwrap()),
        i32::from_le_bytes(data[24..28].try_into().unwrap()),
    );

    let records_end = if finalized {
        if data.len() < HEADER_SIZE + TRAILER_SIZE {
            return Err(RecorderError::Storage("file too short for trailer".into()));
        }
        data.len() - TRAILER_SIZE
    } else {
        data.len()
    };

    let mut walked = 0u64;
    let mut offset = HEADER_SIZE;
    while offset < records_end {
        if records_end - offset < RECORD_HEADER_SIZE {
            return Err(RecorderError::Storage("truncated record header".into()));
        }
        let payload_len =
            u32::from_le_bytes(data[offset + 13..offset + 17].try_into().unwrap()) as usize;
        offset += RECORD_HEADER_SIZE + payload_len;
        if offset > records_end {
            return Err(RecorderError::Storage("truncated record payload".into()));
        }
        walked += 1;
    }

    let checksum = if finalized {
        if walked != header_count {
            return Err(RecorderError::Storage(format!(
                "header claims {header_count} records, file holds {walked}"
            )));
        }
        let digest = Sha256::digest(&data[..records_end]);
        if digest.as_slice() != &data[records_end..] {
            return Err(RecorderError::Storage("checksum mismatch".into()));
        }
        Some(hex_encode(&digest))
    } else {
        None
    };

    Ok(PacketFileSummary {
        version,
        finalized,
        has_video,
        has_audio,
        record_count: walked,
        session_start: session.is_valid().then_some(session),
        checksum,
    })
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}
