use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;

use parking_lot::Mutex;

use crate::dispatch::serial_queue::SerialQueue;
use crate::models::error::RecorderError;
use crate::models::format::{AudioFormat, MediaKind, VideoFormat, VideoTransform};
use crate::models::sample::{MediaTime, PixelBuffer, SampleBuffer};
use crate::models::settings::{AudioEncoderSettings, VideoEncoderSettings};
use crate::models::state::RecorderStatus;
use crate::traits::asset_writer::{
    AssetWriter, AudioInputDescriptor, FinishCompletion, VideoInputDescriptor, WriterEngine,
    WriterInput,
};
use crate::traits::callback_queue::CallbackQueue;
use crate::traits::delegate::MovieRecorderDelegate;

/// Configured video track, immutable once recording starts.
#[derive(Clone)]
struct VideoTrack {
    source_format: VideoFormat,
    transform: VideoTransform,
    settings: Option<VideoEncoderSettings>,
}

/// Configured audio track, immutable once recording starts.
#[derive(Clone)]
struct AudioTrack {
    source_format: AudioFormat,
    settings: Option<AudioEncoderSettings>,
}

#[derive(Clone)]
struct DelegateBinding {
    delegate: Arc<dyn MovieRecorderDelegate>,
    queue: Arc<dyn CallbackQueue>,
}

/// Notification owed to the delegate after a qualifying transition.
enum DelegateEvent {
    FinishedPreparing,
    Failed(RecorderError),
    FinishedRecording,
}

/// Mutable recorder state, guarded by the instance lock. The lock is held
/// only for inspection and transitions, never across writer I/O.
struct StateCell {
    status: RecorderStatus,
    error: Option<RecorderError>,
    video_track: Option<VideoTrack>,
    audio_track: Option<AudioTrack>,
    delegate: Option<DelegateBinding>,
}

/// Writer-side resources. From the end of preparation until teardown these
/// are touched only by jobs on the writing queue. The state lock is never
/// acquired while waiting on this one's holder, and transitions never touch
/// these inline; teardown is a queued job.
struct WriterResources {
    writer: Option<Box<dyn AssetWriter>>,
    video_input: Option<Box<dyn WriterInput>>,
    audio_input: Option<Box<dyn WriterInput>>,
    have_started_session: bool,
}

struct Shared {
    url: PathBuf,
    engine: Box<dyn WriterEngine>,
    state: Mutex<StateCell>,
    resources: Mutex<WriterResources>,
    writing_queue: SerialQueue,
}

/// Asynchronous movie-writing state machine.
///
/// Serializes concurrent audio/video sample submissions into a container
/// file through an [`AssetWriter`] engine:
///
/// ```text
/// Idle ── add tracks, set delegate
///   │  prepare_to_record()            (background worker)
///   ▼
/// PreparingToRecord ──► Recording ──► FinishingPart1 ──► FinishingPart2 ──► Finished
///        │                  │               │                  │
///        └──────────────────┴───────────────┴──────────────────┴──► Failed
/// ```
///
/// Producer threads call `append_*` without blocking; the actual writer I/O
/// runs on one dedicated serial queue, satisfying the engine's
/// single-writer-thread requirement. Transitions into `Recording`,
/// `Finished`, and `Failed` each notify the delegate exactly once on the
/// client-chosen callback queue. Both terminal states release the writer
/// after in-flight writes drain; `Failed` also deletes the partial output.
///
/// One recorder per output target; not reusable after reaching a terminal
/// state. Handles are cheap clones sharing the same machine.
#[derive(Clone)]
pub struct MovieRecorder {
    shared: Arc<Shared>,
}

impl MovieRecorder {
    /// Create a recorder targeting `url`, writing through `engine`.
    pub fn new(url: impl Into<PathBuf>, engine: Box<dyn WriterEngine>) -> Self {
        Self {
            shared: Arc::new(Shared {
                url: url.into(),
                engine,
                state: Mutex::new(StateCell {
                    status: RecorderStatus::Idle,
                    error: None,
                    video_track: None,
                    audio_track: None,
                    delegate: None,
                }),
                resources: Mutex::new(WriterResources {
                    writer: None,
                    video_input: None,
                    audio_input: None,
                    have_started_session: false,
                }),
                writing_queue: SerialQueue::new("movie-writing"),
            }),
        }
    }

    pub fn url(&self) -> &Path {
        &self.shared.url
    }

    pub fn status(&self) -> RecorderStatus {
        self.shared.state.lock().status
    }

    /// The error that drove the recorder to `Failed`, if any.
    pub fn error(&self) -> Option<RecorderError> {
        self.shared.state.lock().error.clone()
    }

    /// Configure the video track. Only while `Idle`, at most once.
    pub fn add_video_track(
        &self,
        source_format: VideoFormat,
        transform: VideoTransform,
        settings: Option<VideoEncoderSettings>,
    ) -> Result<(), RecorderError> {
        let mut cell = self.shared.state.lock();
        if !cell.status.is_idle() {
            return Err(RecorderError::TracksFrozen);
        }
        if cell.video_track.is_some() {
            return Err(RecorderError::DuplicateTrack(MediaKind::Video));
        }
        cell.video_track = Some(VideoTrack {
            source_format,
            transform,
            settings,
        });
        Ok(())
    }

    /// Configure the audio track. Only while `Idle`, at most once.
    pub fn add_audio_track(
        &self,
        source_format: AudioFormat,
        settings: Option<AudioEncoderSettings>,
    ) -> Result<(), RecorderError> {
        let mut cell = self.shared.state.lock();
        if !cell.status.is_idle() {
            return Err(RecorderError::TracksFrozen);
        }
        if cell.audio_track.is_some() {
            return Err(RecorderError::DuplicateTrack(MediaKind::Audio));
        }
        cell.audio_track = Some(AudioTrack {
            source_format,
            settings,
        });
        Ok(())
    }

    /// Register the delegate and the queue its notifications run on. Must
    /// be in place before a `finish_recording` completion is observable;
    /// recommended before `prepare_to_record`.
    pub fn set_delegate(
        &self,
        delegate: Arc<dyn MovieRecorderDelegate>,
        callback_queue: Arc<dyn CallbackQueue>,
    ) {
        self.shared.state.lock().delegate = Some(DelegateBinding {
            delegate,
            queue: callback_queue,
        });
    }

    /// Asynchronously open the writer, set up track inputs, and start
    /// writing; might take several hundred milliseconds. On completion the
    /// delegate sees either `on_finished_preparing` or `on_failed`.
    pub fn prepare_to_record(&self) -> Result<(), RecorderError> {
        let pending = {
            let mut cell = self.shared.state.lock();
            if !cell.status.is_idle() {
                return Err(RecorderError::AlreadyPrepared);
            }
            Shared::transition_locked(
                &self.shared,
                &mut cell,
                RecorderStatus::PreparingToRecord,
                None,
            )
        };
        Shared::notify(pending);

        let shared = Arc::clone(&self.shared);
        thread::Builder::new()
            .name("movie-prepare".into())
            .spawn(move || shared.prepare())
            .expect("failed to spawn prepare worker");
        Ok(())
    }

    /// Submit a video sample for writing.
    pub fn append_video_sample(&self, sample: SampleBuffer) -> Result<(), RecorderError> {
        self.append_sample(sample, MediaKind::Video)
    }

    /// Submit an audio sample for writing.
    pub fn append_audio_sample(&self, sample: SampleBuffer) -> Result<(), RecorderError> {
        self.append_sample(sample, MediaKind::Audio)
    }

    /// Synthesize a video sample of invalid duration from a raw pixel
    /// buffer and submit it.
    pub fn append_video_pixel_buffer(
        &self,
        pixel_buffer: &PixelBuffer,
        presentation_time: MediaTime,
    ) -> Result<(), RecorderError> {
        let format = {
            let cell = self.shared.state.lock();
            cell.video_track.as_ref().map(|track| track.source_format)
        };
        let Some(format) = format else {
            return Err(RecorderError::SampleSynthesisFailed(
                "no video track configured".into(),
            ));
        };
        let sample = SampleBuffer::from_pixel_buffer(pixel_buffer, &format, presentation_time)
            .map_err(RecorderError::SampleSynthesisFailed)?;
        self.append_sample(sample, MediaKind::Video)
    }

    /// Asynchronously drain in-flight appends and finalize the file; might
    /// take several hundred milliseconds. On completion the delegate sees
    /// either `on_finished_recording` or `on_failed`.
    ///
    /// Calling this after an asynchronous failure is a benign no-op; the
    /// failure has already been reported through the delegate.
    pub fn finish_recording(&self) -> Result<(), RecorderError> {
        let pending = {
            let mut cell = self.shared.state.lock();
            match cell.status {
                RecorderStatus::Idle
                | RecorderStatus::PreparingToRecord
                | RecorderStatus::FinishingPart1
                | RecorderStatus::FinishingPart2
                | RecorderStatus::Finished => return Err(RecorderError::NotRecording),
                RecorderStatus::Failed => {
                    // The machine can fail asynchronously out from under the
                    // client, so be lenient here.
                    log::info!("recording has failed, nothing to do");
                    return Ok(());
                }
                RecorderStatus::Recording => {
                    // Marking FinishingPart1 keeps any further append from
                    // being queued as a real write; appends already queued
                    // still execute before the finish job below.
                    Shared::transition_locked(
                        &self.shared,
                        &mut cell,
                        RecorderStatus::FinishingPart1,
                        None,
                    )
                }
            }
        };
        Shared::notify(pending);

        let shared = Arc::clone(&self.shared);
        self.shared
            .writing_queue
            .dispatch(move || shared.finish_writing());
        Ok(())
    }

    fn append_sample(&self, sample: SampleBuffer, kind: MediaKind) -> Result<(), RecorderError> {
        if sample.is_empty() {
            return Err(RecorderError::EmptySampleBuffer);
        }

        {
            let cell = self.shared.state.lock();
            if cell.status < RecorderStatus::Recording {
                return Err(RecorderError::NotReadyToRecord);
            }
            let has_track = match kind {
                MediaKind::Video => cell.video_track.is_some(),
                MediaKind::Audio => cell.audio_track.is_some(),
            };
            if !has_track {
                return Err(RecorderError::MissingTrack(kind));
            }
        }

        let shared = Arc::clone(&self.shared);
        self.shared
            .writing_queue
            .dispatch(move || shared.write_sample(sample, kind));
        Ok(())
    }
}

impl Shared {
    /// Central transition. Call with the state lock held. Schedules
    /// teardown for terminal states and returns the delegate notification
    /// owed for this transition; the caller dispatches it via [`notify`]
    /// once the lock is released.
    ///
    /// [`notify`]: Shared::notify
    #[must_use = "dispatch the pending notification after releasing the lock"]
    fn transition_locked(
        this: &Arc<Shared>,
        cell: &mut StateCell,
        new_status: RecorderStatus,
        error: Option<RecorderError>,
    ) -> Option<(DelegateBinding, DelegateEvent)> {
        if new_status == cell.status {
            return None;
        }
        log::debug!("movie recorder transition: {} -> {}", cell.status, new_status);

        let event = match new_status {
            RecorderStatus::Recording => Some(DelegateEvent::FinishedPreparing),
            RecorderStatus::Finished => Some(DelegateEvent::FinishedRecording),
            RecorderStatus::Failed => {
                let error = error
                    .unwrap_or_else(|| RecorderError::Writer("unknown writer failure".into()));
                log::error!("movie recorder error: {error}");
                cell.error = Some(error.clone());
                Some(DelegateEvent::Failed(error))
            }
            _ => None,
        };

        if new_status.is_terminal() {
            // Tear down only after in-flight writes have drained.
            let shared = Arc::clone(this);
            let delete_output = new_status == RecorderStatus::Failed;
            this.writing_queue
                .dispatch(move || shared.teardown_writer(delete_output));
        }

        cell.status = new_status;

        event.and_then(|event| cell.delegate.clone().map(|binding| (binding, event)))
    }

    /// Lock, transition, then dispatch the notification outside the lock.
    fn transition(this: &Arc<Shared>, new_status: RecorderStatus, error: Option<RecorderError>) {
        let pending = {
            let mut cell = this.state.lock();
            Self::transition_locked(this, &mut cell, new_status, error)
        };
        Self::notify(pending);
    }

    fn notify(pending: Option<(DelegateBinding, DelegateEvent)>) {
        let Some((binding, event)) = pending else {
            return;
        };
        let delegate = binding.delegate;
        binding.queue.dispatch(Box::new(move || match event {
            DelegateEvent::FinishedPreparing => delegate.on_finished_preparing(),
            DelegateEvent::Failed(error) => delegate.on_failed(&error),
            DelegateEvent::FinishedRecording => delegate.on_finished_recording(),
        }));
    }

    /// Prepare worker body: open the writer and either start recording or
    /// fail with the causing error.
    fn prepare(self: Arc<Self>) {
        match self.open_writer() {
            Ok(()) => Self::transition(&self, RecorderStatus::Recording, None),
            Err(error) => Self::transition(&self, RecorderStatus::Failed, Some(error)),
        }
    }

    /// Open the writer, resolve and validate track settings, attach
    /// real-time inputs, and start writing. Any failure short-circuits.
    fn open_writer(&self) -> Result<(), RecorderError> {
        let (video_track, audio_track) = {
            let cell = self.state.lock();
            (cell.video_track.clone(), cell.audio_track.clone())
        };

        // The writer will not write over an existing file.
        let _ = fs::remove_file(&self.url);

        let mut writer = self.engine.create_writer(&self.url)?;

        let mut video_input = None;
        if let Some(track) = video_track {
            let settings = track.settings.unwrap_or_else(|| {
                log::info!("no video settings provided, using default settings");
                VideoEncoderSettings::default_for(&track.source_format)
            });
            if !writer.can_apply_video_settings(&settings) {
                return Err(RecorderError::InvalidSettings(MediaKind::Video));
            }
            video_input = Some(writer.add_video_input(VideoInputDescriptor {
                source_format: track.source_format,
                settings,
                transform: track.transform,
                expects_realtime: true,
            })?);
        }

        let mut audio_input = None;
        if let Some(track) = audio_track {
            let settings = track.settings.unwrap_or_else(|| {
                log::info!("no audio settings provided, using default settings");
                AudioEncoderSettings::default_for(&track.source_format)
            });
            if !writer.can_apply_audio_settings(&settings) {
                return Err(RecorderError::InvalidSettings(MediaKind::Audio));
            }
            audio_input = Some(writer.add_audio_input(AudioInputDescriptor {
                source_format: track.source_format,
                settings,
                expects_realtime: true,
            })?);
        }

        writer.start_writing()?;

        let mut resources = self.resources.lock();
        resources.writer = Some(writer);
        resources.video_input = video_input;
        resources.audio_input = audio_input;
        resources.have_started_session = false;
        Ok(())
    }

    /// Writing-queue job: append one sample, starting the session on the
    /// first one that goes through.
    fn write_sample(self: Arc<Self>, sample: SampleBuffer, kind: MediaKind) {
        {
            let cell = self.state.lock();
            // Producers race benignly with asynchronous failure or finish;
            // anything past FinishingPart1 is dropped, not an error.
            if cell.status > RecorderStatus::FinishingPart1 {
                return;
            }
        }

        let failure = {
            let mut resources = self.resources.lock();
            let resources = &mut *resources;
            let Some(writer) = resources.writer.as_mut() else {
                return;
            };
            let input = match kind {
                MediaKind::Video => resources.video_input.as_mut(),
                MediaKind::Audio => resources.audio_input.as_mut(),
            };
            let Some(input) = input else {
                return;
            };

            if !input.ready_for_more_media_data() {
                log::warn!("{kind} input not ready for more media data, dropping buffer");
                None
            } else {
                if !resources.have_started_session {
                    // The session timeline is anchored to the first sample
                    // of either track, exactly once.
                    writer.start_session(sample.presentation_time);
                    resources.have_started_session = true;
                }
                input.append_sample(&sample).err()
            }
        };

        if let Some(error) = failure {
            Self::transition(&self, RecorderStatus::Failed, Some(error));
        }
    }

    /// Writing-queue job: run the writer's asynchronous finalize. Running
    /// here guarantees no append is concurrently in flight.
    fn finish_writing(self: Arc<Self>) {
        let pending = {
            let mut cell = self.state.lock();
            // An in-flight append may have failed while this job waited its
            // turn; in that case there is nothing left to do.
            if cell.status != RecorderStatus::FinishingPart1 {
                return;
            }
            Self::transition_locked(&self, &mut cell, RecorderStatus::FinishingPart2, None)
        };
        Self::notify(pending);

        let completion: FinishCompletion = {
            let shared = Arc::clone(&self);
            Box::new(move |result| match result {
                Ok(()) => Self::transition(&shared, RecorderStatus::Finished, None),
                Err(error) => Self::transition(&shared, RecorderStatus::Failed, Some(error)),
            })
        };

        // The writer leaves the resource cell while finalize runs, so an
        // inline completion fires with no recorder lock held. Teardown is a
        // later job on this queue and cannot race the put-back.
        let writer = self.resources.lock().writer.take();
        if let Some(mut writer) = writer {
            writer.finish_writing(completion);
            self.resources.lock().writer = Some(writer);
        }
    }

    /// Writing-queue job: release the writer and inputs exactly once; on
    /// failure also delete the partial output. Idempotent against repeated
    /// scheduling.
    fn teardown_writer(self: Arc<Self>, delete_output: bool) {
        {
            let mut resources = self.resources.lock();
            resources.writer.take();
            resources.video_input.take();
            resources.audio_input.take();
        }
        if delete_output {
            if let Err(error) = fs::remove_file(&self.url) {
                if error.kind() != std::io::ErrorKind::NotFound {
                    log::warn!(
                        "failed to delete partial output {}: {error}",
                        self.url.display()
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::{Duration, Instant};

    use super::*;
    use crate::models::format::PixelFormat;

    // --- scriptable mock engine ---

    #[derive(Debug, Clone, PartialEq)]
    enum WriterCall {
        AddVideoInput,
        AddAudioInput,
        StartWriting,
        StartSession(MediaTime),
        Append(MediaKind, MediaTime),
        FinishWriting,
    }

    #[derive(Default)]
    struct MockScript {
        fail_create: bool,
        reject_video_settings: bool,
        reject_video_input: bool,
        fail_start_writing: bool,
        fail_append: AtomicBool,
        fail_finish: bool,
        input_ready: AtomicBool,
        create_gate: Option<crossbeam_channel::Receiver<()>>,
    }

    impl MockScript {
        fn ready() -> Self {
            Self {
                input_ready: AtomicBool::new(true),
                ..Default::default()
            }
        }
    }

    #[derive(Default)]
    struct MockJournal {
        calls: Mutex<Vec<WriterCall>>,
    }

    impl MockJournal {
        fn record(&self, call: WriterCall) {
            self.calls.lock().push(call);
        }

        fn calls(&self) -> Vec<WriterCall> {
            self.calls.lock().clone()
        }
    }

    struct MockEngine {
        script: Arc<MockScript>,
        journal: Arc<MockJournal>,
    }

    impl WriterEngine for MockEngine {
        fn create_writer(&self, _url: &Path) -> Result<Box<dyn AssetWriter>, RecorderError> {
            if let Some(gate) = &self.script.create_gate {
                let _ = gate.recv();
            }
            if self.script.fail_create {
                return Err(RecorderError::Storage("create refused".into()));
            }
            Ok(Box::new(MockWriter {
                script: Arc::clone(&self.script),
                journal: Arc::clone(&self.journal),
            }))
        }
    }

    struct MockWriter {
        script: Arc<MockScript>,
        journal: Arc<MockJournal>,
    }

    impl AssetWriter for MockWriter {
        fn can_apply_video_settings(&self, _settings: &VideoEncoderSettings) -> bool {
            !self.script.reject_video_settings
        }

        fn can_apply_audio_settings(&self, _settings: &AudioEncoderSettings) -> bool {
            true
        }

        fn add_video_input(
            &mut self,
            _descriptor: VideoInputDescriptor,
        ) -> Result<Box<dyn WriterInput>, RecorderError> {
            if self.script.reject_video_input {
                return Err(RecorderError::CannotSetupInput("video input rejected".into()));
            }
            self.journal.record(WriterCall::AddVideoInput);
            Ok(Box::new(MockInput {
                kind: MediaKind::Video,
                script: Arc::clone(&self.script),
                journal: Arc::clone(&self.journal),
            }))
        }

        fn add_audio_input(
            &mut self,
            _descriptor: AudioInputDescriptor,
        ) -> Result<Box<dyn WriterInput>, RecorderError> {
            self.journal.record(WriterCall::AddAudioInput);
            Ok(Box::new(MockInput {
                kind: MediaKind::Audio,
                script: Arc::clone(&self.script),
                journal: Arc::clone(&self.journal),
            }))
        }

        fn start_writing(&mut self) -> Result<(), RecorderError> {
            if self.script.fail_start_writing {
                return Err(RecorderError::Writer("start writing refused".into()));
            }
            self.journal.record(WriterCall::StartWriting);
            Ok(())
        }

        fn start_session(&mut self, start_time: MediaTime) {
            self.journal.record(WriterCall::StartSession(start_time));
        }

        fn finish_writing(&mut self, completion: FinishCompletion) {
            self.journal.record(WriterCall::FinishWriting);
            if self.script.fail_finish {
                completion(Err(RecorderError::Writer("finalize fault".into())));
            } else {
                completion(Ok(()));
            }
        }
    }

    struct MockInput {
        kind: MediaKind,
        script: Arc<MockScript>,
        journal: Arc<MockJournal>,
    }

    impl WriterInput for MockInput {
        fn ready_for_more_media_data(&self) -> bool {
            self.script.input_ready.load(Ordering::SeqCst)
        }

        fn append_sample(&mut self, sample: &SampleBuffer) -> Result<(), RecorderError> {
            if self.script.fail_append.load(Ordering::SeqCst) {
                return Err(RecorderError::Writer("append fault".into()));
            }
            self.journal
                .record(WriterCall::Append(self.kind, sample.presentation_time));
            Ok(())
        }
    }

    // --- delegate + callback queue doubles ---

    #[derive(Default)]
    struct CountingDelegate {
        prepared: AtomicUsize,
        failed: AtomicUsize,
        finished: AtomicUsize,
        last_error: Mutex<Option<RecorderError>>,
    }

    impl MovieRecorderDelegate for CountingDelegate {
        fn on_finished_preparing(&self) {
            self.prepared.fetch_add(1, Ordering::SeqCst);
        }

        fn on_failed(&self, error: &RecorderError) {
            *self.last_error.lock() = Some(error.clone());
            self.failed.fetch_add(1, Ordering::SeqCst);
        }

        fn on_finished_recording(&self) {
            self.finished.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Runs tasks on the caller's stack. Fine for tests because the
    /// recorder dispatches with no locks held.
    struct InlineQueue;

    impl CallbackQueue for InlineQueue {
        fn dispatch(&self, task: crate::traits::callback_queue::Task) {
            task();
        }
    }

    // --- fixture ---

    struct Fixture {
        recorder: MovieRecorder,
        script: Arc<MockScript>,
        journal: Arc<MockJournal>,
        delegate: Arc<CountingDelegate>,
        url: PathBuf,
    }

    impl Fixture {
        fn with_script(name: &str, script: MockScript) -> Self {
            let script = Arc::new(script);
            let journal = Arc::new(MockJournal::default());
            let url = std::env::temp_dir().join(format!(
                "movie_recorder_test_{}_{name}.mrpk",
                std::process::id()
            ));
            let recorder = MovieRecorder::new(
                url.clone(),
                Box::new(MockEngine {
                    script: Arc::clone(&script),
                    journal: Arc::clone(&journal),
                }),
            );
            let delegate = Arc::new(CountingDelegate::default());
            recorder.set_delegate(Arc::clone(&delegate) as Arc<dyn MovieRecorderDelegate>, Arc::new(InlineQueue));
            Self {
                recorder,
                script,
                journal,
                delegate,
                url,
            }
        }

        fn new(name: &str) -> Self {
            Self::with_script(name, MockScript::ready())
        }

        /// Configure both tracks and drive the machine to `Recording`.
        fn start_recording(&self) {
            self.add_both_tracks();
            self.recorder.prepare_to_record().unwrap();
            self.wait_for(RecorderStatus::Recording);
        }

        fn add_both_tracks(&self) {
            self.recorder
                .add_video_track(VideoFormat::new(320, 240), VideoTransform::IDENTITY, None)
                .unwrap();
            self.recorder
                .add_audio_track(AudioFormat::new(44_100.0, 2), None)
                .unwrap();
        }

        fn wait_for(&self, status: RecorderStatus) {
            wait_for_status(&self.recorder, status);
        }

        fn drain_writing_queue(&self) {
            drain_writing_queue(&self.recorder);
        }
    }

    fn wait_for_status(recorder: &MovieRecorder, status: RecorderStatus) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while recorder.status() != status {
            assert!(
                Instant::now() < deadline,
                "timed out waiting for {status}, stuck at {}",
                recorder.status()
            );
            thread::sleep(Duration::from_millis(2));
        }
    }

    /// Block until every job submitted to the writing queue so far has run.
    fn drain_writing_queue(recorder: &MovieRecorder) {
        let (tx, rx) = crossbeam_channel::bounded(1);
        recorder.shared.writing_queue.dispatch(move || {
            let _ = tx.send(());
        });
        rx.recv_timeout(Duration::from_secs(5))
            .expect("writing queue stalled");
    }

    fn video_sample(value: i64) -> SampleBuffer {
        SampleBuffer::new(MediaTime::new(value, 600), MediaTime::new(20, 600), vec![0xAB; 64])
    }

    fn audio_sample(value: i64) -> SampleBuffer {
        SampleBuffer::new(MediaTime::new(value, 600), MediaTime::new(10, 600), vec![0xCD; 32])
    }

    // --- track configuration ---

    #[test]
    fn tracks_only_while_idle() {
        let fx = Fixture::new("tracks_only_idle");
        fx.start_recording();

        let err = fx
            .recorder
            .add_video_track(VideoFormat::new(640, 480), VideoTransform::IDENTITY, None)
            .unwrap_err();
        assert_eq!(err, RecorderError::TracksFrozen);
        assert!(err.is_usage());

        let err = fx
            .recorder
            .add_audio_track(AudioFormat::new(48_000.0, 1), None)
            .unwrap_err();
        assert_eq!(err, RecorderError::TracksFrozen);
    }

    #[test]
    fn duplicate_tracks_rejected() {
        let fx = Fixture::new("duplicate_tracks");
        fx.add_both_tracks();

        assert_eq!(
            fx.recorder
                .add_video_track(VideoFormat::new(640, 480), VideoTransform::IDENTITY, None)
                .unwrap_err(),
            RecorderError::DuplicateTrack(MediaKind::Video)
        );
        assert_eq!(
            fx.recorder
                .add_audio_track(AudioFormat::new(48_000.0, 1), None)
                .unwrap_err(),
            RecorderError::DuplicateTrack(MediaKind::Audio)
        );
    }

    // --- prepare ---

    #[test]
    fn prepare_reaches_recording_and_notifies_once() {
        let fx = Fixture::new("prepare_recording");
        fx.start_recording();

        assert_eq!(fx.delegate.prepared.load(Ordering::SeqCst), 1);
        assert_eq!(fx.delegate.failed.load(Ordering::SeqCst), 0);
        assert_eq!(fx.delegate.finished.load(Ordering::SeqCst), 0);
        assert_eq!(
            fx.journal.calls(),
            vec![
                WriterCall::AddVideoInput,
                WriterCall::AddAudioInput,
                WriterCall::StartWriting,
            ]
        );
    }

    #[test]
    fn prepare_twice_rejected() {
        let fx = Fixture::new("prepare_twice");
        fx.start_recording();

        assert_eq!(
            fx.recorder.prepare_to_record().unwrap_err(),
            RecorderError::AlreadyPrepared
        );
    }

    #[test]
    fn start_writing_fault_fails_and_deletes_target() {
        let fx = Fixture::with_script(
            "start_writing_fault",
            MockScript {
                fail_start_writing: true,
                ..MockScript::ready()
            },
        );
        // Simulate a partially created target that must not survive.
        fs::write(&fx.url, b"stale").unwrap();

        fx.add_both_tracks();
        fx.recorder.prepare_to_record().unwrap();
        fx.wait_for(RecorderStatus::Failed);
        fx.drain_writing_queue();

        assert_eq!(fx.delegate.failed.load(Ordering::SeqCst), 1);
        assert_eq!(fx.delegate.prepared.load(Ordering::SeqCst), 0);
        assert_eq!(
            fx.recorder.error(),
            Some(RecorderError::Writer("start writing refused".into()))
        );
        assert!(!fx.url.exists());
    }

    #[test]
    fn rejected_video_settings_fail_preparation() {
        let fx = Fixture::with_script(
            "rejected_settings",
            MockScript {
                reject_video_settings: true,
                ..MockScript::ready()
            },
        );
        fx.add_both_tracks();
        fx.recorder.prepare_to_record().unwrap();
        fx.wait_for(RecorderStatus::Failed);

        assert_eq!(
            fx.recorder.error(),
            Some(RecorderError::InvalidSettings(MediaKind::Video))
        );
        assert_eq!(fx.delegate.failed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn rejected_video_input_fails_preparation() {
        let fx = Fixture::with_script(
            "rejected_input",
            MockScript {
                reject_video_input: true,
                ..MockScript::ready()
            },
        );
        fx.add_both_tracks();
        fx.recorder.prepare_to_record().unwrap();
        fx.wait_for(RecorderStatus::Failed);

        assert!(matches!(
            fx.recorder.error(),
            Some(RecorderError::CannotSetupInput(_))
        ));
    }

    // --- appension ---

    #[test]
    fn append_before_prepare_is_usage_error() {
        let fx = Fixture::new("append_before_prepare");
        fx.add_both_tracks();

        let err = fx.recorder.append_video_sample(video_sample(0)).unwrap_err();
        assert_eq!(err, RecorderError::NotReadyToRecord);
        assert!(err.is_usage());
        assert_eq!(fx.recorder.status(), RecorderStatus::Idle);
    }

    #[test]
    fn append_without_track_is_usage_error() {
        let fx = Fixture::new("append_without_track");
        fx.recorder
            .add_video_track(VideoFormat::new(320, 240), VideoTransform::IDENTITY, None)
            .unwrap();
        fx.recorder.prepare_to_record().unwrap();
        fx.wait_for(RecorderStatus::Recording);

        assert_eq!(
            fx.recorder.append_audio_sample(audio_sample(0)).unwrap_err(),
            RecorderError::MissingTrack(MediaKind::Audio)
        );
    }

    #[test]
    fn empty_sample_is_usage_error() {
        let fx = Fixture::new("empty_sample");
        fx.start_recording();

        let empty = SampleBuffer::new(MediaTime::ZERO, MediaTime::INVALID, Vec::new());
        assert_eq!(
            fx.recorder.append_video_sample(empty).unwrap_err(),
            RecorderError::EmptySampleBuffer
        );
    }

    #[test]
    fn first_append_starts_session_exactly_once() {
        let fx = Fixture::new("session_start");
        fx.start_recording();

        fx.recorder.append_video_sample(video_sample(90)).unwrap();
        fx.recorder.append_audio_sample(audio_sample(95)).unwrap();
        fx.recorder.append_video_sample(video_sample(110)).unwrap();
        fx.drain_writing_queue();

        let calls = fx.journal.calls();
        let sessions: Vec<_> = calls
            .iter()
            .filter(|call| matches!(call, WriterCall::StartSession(_)))
            .collect();
        assert_eq!(sessions, vec![&WriterCall::StartSession(MediaTime::new(90, 600))]);

        // The session opens before any sample reaches an input.
        let session_at = calls
            .iter()
            .position(|call| matches!(call, WriterCall::StartSession(_)))
            .unwrap();
        let first_append = calls
            .iter()
            .position(|call| matches!(call, WriterCall::Append(..)))
            .unwrap();
        assert!(session_at < first_append);
    }

    #[test]
    fn appends_apply_in_submission_order() {
        let fx = Fixture::new("append_order");
        fx.start_recording();

        for i in 0..5 {
            fx.recorder.append_video_sample(video_sample(i * 20)).unwrap();
            fx.recorder.append_audio_sample(audio_sample(i * 20 + 1)).unwrap();
        }
        fx.drain_writing_queue();

        let appends: Vec<_> = fx
            .journal
            .calls()
            .into_iter()
            .filter_map(|call| match call {
                WriterCall::Append(kind, time) => Some((kind, time.value)),
                _ => None,
            })
            .collect();

        let mut expected = Vec::new();
        for i in 0..5 {
            expected.push((MediaKind::Video, i * 20));
            expected.push((MediaKind::Audio, i * 20 + 1));
        }
        assert_eq!(appends, expected);
    }

    #[test]
    fn concurrent_producers_keep_per_kind_order() {
        let fx = Fixture::new("concurrent_producers");
        fx.start_recording();

        let video = {
            let recorder = fx.recorder.clone();
            thread::spawn(move || {
                for i in 0..25 {
                    recorder.append_video_sample(video_sample(i)).unwrap();
                }
            })
        };
        let audio = {
            let recorder = fx.recorder.clone();
            thread::spawn(move || {
                for i in 0..25 {
                    recorder.append_audio_sample(audio_sample(i)).unwrap();
                }
            })
        };
        video.join().unwrap();
        audio.join().unwrap();
        fx.drain_writing_queue();

        let mut video_times = Vec::new();
        let mut audio_times = Vec::new();
        for call in fx.journal.calls() {
            match call {
                WriterCall::Append(MediaKind::Video, time) => video_times.push(time.value),
                WriterCall::Append(MediaKind::Audio, time) => audio_times.push(time.value),
                _ => {}
            }
        }
        assert_eq!(video_times, (0..25).collect::<Vec<_>>());
        assert_eq!(audio_times, (0..25).collect::<Vec<_>>());
    }

    #[test]
    fn unready_input_drops_buffer_without_failing() {
        let fx = Fixture::new("input_not_ready");
        fx.start_recording();

        fx.script.input_ready.store(false, Ordering::SeqCst);
        fx.recorder.append_video_sample(video_sample(0)).unwrap();
        fx.drain_writing_queue();

        assert_eq!(fx.recorder.status(), RecorderStatus::Recording);
        assert!(fx
            .journal
            .calls()
            .iter()
            .all(|call| !matches!(call, WriterCall::Append(..))));

        // A dropped buffer must not anchor the session timeline.
        assert!(fx
            .journal
            .calls()
            .iter()
            .all(|call| !matches!(call, WriterCall::StartSession(_))));

        fx.script.input_ready.store(true, Ordering::SeqCst);
        fx.recorder.append_video_sample(video_sample(40)).unwrap();
        fx.drain_writing_queue();

        assert_eq!(
            fx.journal
                .calls()
                .iter()
                .filter(|call| matches!(call, WriterCall::Append(..)))
                .count(),
            1
        );
    }

    #[test]
    fn append_fault_fails_once_and_drops_later_buffers() {
        let fx = Fixture::new("append_fault");
        fx.start_recording();

        fx.script.fail_append.store(true, Ordering::SeqCst);
        fx.recorder.append_video_sample(video_sample(0)).unwrap();
        fx.wait_for(RecorderStatus::Failed);

        assert_eq!(fx.delegate.failed.load(Ordering::SeqCst), 1);
        assert_eq!(
            fx.recorder.error(),
            Some(RecorderError::Writer("append fault".into()))
        );

        // Producers racing the failure see success; their buffers vanish.
        fx.script.fail_append.store(false, Ordering::SeqCst);
        fx.recorder.append_video_sample(video_sample(40)).unwrap();
        fx.drain_writing_queue();
        assert!(fx
            .journal
            .calls()
            .iter()
            .all(|call| !matches!(call, WriterCall::Append(..))));
        assert_eq!(fx.delegate.failed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn pixel_buffer_append_requires_video_track() {
        let fx = Fixture::new("pixel_no_track");
        let pixels = PixelBuffer::new(320, 240);

        assert!(matches!(
            fx.recorder
                .append_video_pixel_buffer(&pixels, MediaTime::ZERO)
                .unwrap_err(),
            RecorderError::SampleSynthesisFailed(_)
        ));
        assert_eq!(fx.recorder.status(), RecorderStatus::Idle);
    }

    #[test]
    fn pixel_buffer_append_synthesizes_sample() {
        let fx = Fixture::new("pixel_append");
        fx.start_recording();

        let pixels = PixelBuffer::new(320, 240);
        assert_eq!(pixels.pixel_format, PixelFormat::Bgra32);
        fx.recorder
            .append_video_pixel_buffer(&pixels, MediaTime::new(33, 600))
            .unwrap();
        fx.drain_writing_queue();

        assert!(fx
            .journal
            .calls()
            .contains(&WriterCall::Append(MediaKind::Video, MediaTime::new(33, 600))));
    }

    #[test]
    fn mismatched_pixel_buffer_is_rejected() {
        let fx = Fixture::new("pixel_mismatch");
        fx.start_recording();

        let pixels = PixelBuffer::new(640, 480);
        assert!(matches!(
            fx.recorder
                .append_video_pixel_buffer(&pixels, MediaTime::ZERO)
                .unwrap_err(),
            RecorderError::SampleSynthesisFailed(_)
        ));
    }

    // --- finish ---

    #[test]
    fn finish_completes_recording() {
        let fx = Fixture::new("finish_cycle");
        fx.start_recording();

        fx.recorder.append_video_sample(video_sample(0)).unwrap();
        fx.recorder.append_audio_sample(audio_sample(5)).unwrap();
        fx.recorder.finish_recording().unwrap();
        fx.wait_for(RecorderStatus::Finished);
        fx.drain_writing_queue();

        assert_eq!(fx.delegate.finished.load(Ordering::SeqCst), 1);
        assert_eq!(fx.delegate.failed.load(Ordering::SeqCst), 0);

        // Queued appends land before finalize.
        let calls = fx.journal.calls();
        let finish_at = calls
            .iter()
            .position(|call| matches!(call, WriterCall::FinishWriting))
            .unwrap();
        let append_count = calls[..finish_at]
            .iter()
            .filter(|call| matches!(call, WriterCall::Append(..)))
            .count();
        assert_eq!(append_count, 2);
        assert_eq!(finish_at, calls.len() - 1);
    }

    #[test]
    fn finish_before_prepare_is_usage_error() {
        let fx = Fixture::new("finish_idle");
        assert_eq!(
            fx.recorder.finish_recording().unwrap_err(),
            RecorderError::NotRecording
        );
    }

    #[test]
    fn finish_while_preparing_is_usage_error() {
        let (gate_tx, gate_rx) = crossbeam_channel::bounded(0);
        let fx = Fixture::with_script(
            "finish_while_preparing",
            MockScript {
                create_gate: Some(gate_rx),
                ..MockScript::ready()
            },
        );
        fx.add_both_tracks();
        fx.recorder.prepare_to_record().unwrap();
        assert_eq!(fx.recorder.status(), RecorderStatus::PreparingToRecord);

        assert_eq!(
            fx.recorder.finish_recording().unwrap_err(),
            RecorderError::NotRecording
        );

        gate_tx.send(()).unwrap();
        fx.wait_for(RecorderStatus::Recording);
    }

    #[test]
    fn finish_twice_is_usage_error() {
        let fx = Fixture::new("finish_twice");
        fx.start_recording();

        fx.recorder.finish_recording().unwrap();
        fx.wait_for(RecorderStatus::Finished);

        assert_eq!(
            fx.recorder.finish_recording().unwrap_err(),
            RecorderError::NotRecording
        );
        assert_eq!(fx.delegate.finished.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn finish_after_failure_is_benign_noop() {
        let fx = Fixture::new("finish_after_failure");
        fx.start_recording();

        fx.script.fail_append.store(true, Ordering::SeqCst);
        fx.recorder.append_video_sample(video_sample(0)).unwrap();
        fx.wait_for(RecorderStatus::Failed);

        assert!(fx.recorder.finish_recording().is_ok());
        assert_eq!(fx.recorder.status(), RecorderStatus::Failed);
        assert_eq!(fx.delegate.finished.load(Ordering::SeqCst), 0);
        assert_eq!(fx.delegate.failed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn finalize_fault_reports_failure() {
        let fx = Fixture::with_script(
            "finalize_fault",
            MockScript {
                fail_finish: true,
                ..MockScript::ready()
            },
        );
        fx.start_recording();
        fx.recorder.append_video_sample(video_sample(0)).unwrap();
        fx.recorder.finish_recording().unwrap();
        fx.wait_for(RecorderStatus::Failed);

        assert_eq!(fx.delegate.failed.load(Ordering::SeqCst), 1);
        assert_eq!(fx.delegate.finished.load(Ordering::SeqCst), 0);
        assert_eq!(
            fx.recorder.error(),
            Some(RecorderError::Writer("finalize fault".into()))
        );
    }

    // --- end to end against the packet-file engine ---

    #[test]
    fn packet_engine_finished_file_is_finalized() {
        use crate::storage::packet_writer::{self, PacketFileEngine};

        let url = std::env::temp_dir().join(format!(
            "movie_recorder_e2e_finished_{}.mrpk",
            std::process::id()
        ));
        fs::remove_file(&url).ok();

        let recorder = MovieRecorder::new(url.clone(), Box::new(PacketFileEngine::new()));
        let delegate = Arc::new(CountingDelegate::default());
        recorder.set_delegate(Arc::clone(&delegate) as Arc<dyn MovieRecorderDelegate>, Arc::new(InlineQueue));

        recorder
            .add_video_track(VideoFormat::new(320, 240), VideoTransform::IDENTITY, None)
            .unwrap();
        recorder
            .add_audio_track(AudioFormat::new(44_100.0, 2), None)
            .unwrap();
        recorder.prepare_to_record().unwrap();
        wait_for_status(&recorder, RecorderStatus::Recording);

        recorder.append_video_sample(video_sample(90)).unwrap();
        recorder.append_audio_sample(audio_sample(92)).unwrap();
        recorder
            .append_video_pixel_buffer(&PixelBuffer::new(320, 240), MediaTime::new(110, 600))
            .unwrap();
        recorder.finish_recording().unwrap();
        wait_for_status(&recorder, RecorderStatus::Finished);
        drain_writing_queue(&recorder);

        assert!(url.exists());
        let summary = packet_writer::read_summary(&url).unwrap();
        assert!(summary.finalized);
        assert!(summary.has_video);
        assert!(summary.has_audio);
        assert_eq!(summary.record_count, 3);
        assert_eq!(summary.session_start, Some(MediaTime::new(90, 600)));
        assert_eq!(delegate.finished.load(Ordering::SeqCst), 1);

        fs::remove_file(&url).ok();
    }

    #[test]
    fn packet_engine_failure_removes_target() {
        use crate::storage::packet_writer::PacketFileEngine;

        let url = std::env::temp_dir().join(format!(
            "movie_recorder_e2e_failed_{}.mrpk",
            std::process::id()
        ));
        fs::remove_file(&url).ok();

        let recorder = MovieRecorder::new(url.clone(), Box::new(PacketFileEngine::new()));
        let delegate = Arc::new(CountingDelegate::default());
        recorder.set_delegate(Arc::clone(&delegate) as Arc<dyn MovieRecorderDelegate>, Arc::new(InlineQueue));

        // Bitrate zero never validates, so preparation must fail.
        let mut settings = VideoEncoderSettings::default_for(&VideoFormat::new(320, 240));
        settings.average_bit_rate = 0;
        recorder
            .add_video_track(
                VideoFormat::new(320, 240),
                VideoTransform::IDENTITY,
                Some(settings),
            )
            .unwrap();
        recorder.prepare_to_record().unwrap();
        wait_for_status(&recorder, RecorderStatus::Failed);
        drain_writing_queue(&recorder);

        assert!(!url.exists());
        assert_eq!(
            recorder.error(),
            Some(RecorderError::InvalidSettings(MediaKind::Video))
        );
        assert_eq!(delegate.failed.load(Ordering::SeqCst), 1);
        assert_eq!(delegate.prepared.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn appends_after_finish_are_dropped_silently() {
        let fx = Fixture::new("append_after_finish");
        fx.start_recording();
        fx.recorder.append_video_sample(video_sample(0)).unwrap();
        fx.recorder.finish_recording().unwrap();
        fx.wait_for(RecorderStatus::Finished);

        assert!(fx.recorder.append_video_sample(video_sample(40)).is_ok());
        fx.drain_writing_queue();

        let appended: Vec<_> = fx
            .journal
            .calls()
            .into_iter()
            .filter(|call| matches!(call, WriterCall::Append(..)))
            .collect();
        assert_eq!(
            appended,
            vec![WriterCall::Append(MediaKind::Video, MediaTime::new(0, 600))]
        );
    }
}
