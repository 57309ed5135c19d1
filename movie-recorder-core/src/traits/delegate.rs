use crate::models::error::RecorderError;

/// Event delegate for movie recorder notifications.
///
/// Exactly one notification is delivered per transition into `Recording`,
/// `Finished`, or `Failed`. Callbacks run on the queue registered with
/// `set_delegate`, never from under the recorder's lock and never on the
/// writing queue.
pub trait MovieRecorderDelegate: Send + Sync {
    /// The recorder finished preparing and is now recording.
    fn on_finished_preparing(&self);

    /// The recorder hit an unrecoverable fault. The partial output has been
    /// scheduled for deletion; the only recovery is a new recorder.
    fn on_failed(&self, error: &RecorderError);

    /// The recorder finalized the target file.
    fn on_finished_recording(&self);
}
