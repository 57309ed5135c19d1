use thiserror::Error;

use super::format::MediaKind;

/// Errors raised by the movie recorder and its writing engine.
///
/// Two classes share this enum. Usage errors are synchronous contract
/// violations (calling out of lifecycle order, duplicate tracks) returned to
/// the offending call. Operational errors come from the underlying writer,
/// drive the state machine to `Failed`, and are delivered exactly once via
/// the delegate. `is_usage` tells them apart.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RecorderError {
    #[error("cannot add tracks while not idle")]
    TracksFrozen,

    #[error("cannot add more than one {0} track")]
    DuplicateTrack(MediaKind),

    #[error("already prepared, cannot prepare again")]
    AlreadyPrepared,

    #[error("not ready to record yet")]
    NotReadyToRecord,

    #[error("no {0} track was added")]
    MissingTrack(MediaKind),

    #[error("empty sample buffer")]
    EmptySampleBuffer,

    #[error("sample buffer create failed: {0}")]
    SampleSynthesisFailed(String),

    #[error("not recording")]
    NotRecording,

    #[error("invalid output settings for {0} track")]
    InvalidSettings(MediaKind),

    #[error("cannot set up asset writer input: {0}")]
    CannotSetupInput(String),

    #[error("writer error: {0}")]
    Writer(String),

    #[error("storage error: {0}")]
    Storage(String),
}

impl RecorderError {
    /// Whether this error is a client-side contract violation rather than a
    /// fault of the underlying writer.
    pub fn is_usage(&self) -> bool {
        matches!(
            self,
            Self::TracksFrozen
                | Self::DuplicateTrack(_)
                | Self::AlreadyPrepared
                | Self::NotReadyToRecord
                | Self::MissingTrack(_)
                | Self::EmptySampleBuffer
                | Self::SampleSynthesisFailed(_)
                | Self::NotRecording
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usage_errors_are_classified() {
        assert!(RecorderError::TracksFrozen.is_usage());
        assert!(RecorderError::DuplicateTrack(MediaKind::Video).is_usage());
        assert!(RecorderError::NotReadyToRecord.is_usage());
        assert!(RecorderError::NotRecording.is_usage());
    }

    #[test]
    fn writer_faults_are_operational() {
        assert!(!RecorderError::Writer("append failed".into()).is_usage());
        assert!(!RecorderError::InvalidSettings(MediaKind::Audio).is_usage());
        assert!(!RecorderError::CannotSetupInput("rejected".into()).is_usage());
        assert!(!RecorderError::Storage("disk full".into()).is_usage());
    }
}
