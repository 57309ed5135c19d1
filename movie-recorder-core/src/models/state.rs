use std::fmt;

/// Movie recorder state machine.
///
/// ```text
/// idle → preparing-to-record → recording → finishing-1 → finishing-2 → finished
///                ↓                 ↓             ↓             ↓
///              failed ←────────────┴─────────────┴─────────────┘
/// ```
///
/// `FinishingPart1` waits for in-flight buffers on the writing queue;
/// `FinishingPart2` covers the writer's asynchronous finalize. `Finished`
/// and `Failed` are terminal; a recorder is not reusable past either.
///
/// Discriminant order is load-bearing: the machine compares statuses with
/// `<`/`>` to gate appends, so variants must stay in lifecycle order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RecorderStatus {
    Idle,
    PreparingToRecord,
    Recording,
    FinishingPart1,
    FinishingPart2,
    Finished,
    Failed,
}

impl RecorderStatus {
    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }

    pub fn is_recording(&self) -> bool {
        matches!(self, Self::Recording)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished | Self::Failed)
    }

    /// Whether appended samples may still reach the writer. Anything later
    /// drops buffers silently; anything earlier rejects the call.
    pub fn accepts_samples(&self) -> bool {
        matches!(self, Self::Recording | Self::FinishingPart1)
    }
}

impl fmt::Display for RecorderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "Idle",
            Self::PreparingToRecord => "PreparingToRecord",
            Self::Recording => "Recording",
            Self::FinishingPart1 => "FinishingPart1",
            Self::FinishingPart2 => "FinishingPart2",
            Self::Finished => "Finished",
            Self::Failed => "Failed",
        };
        f.write_str(name)
    }
}
