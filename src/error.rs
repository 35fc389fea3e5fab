//! Typed pipeline failures.
//!
//! Library functions return [`anyhow::Result`]; the conditions a caller may
//! want to branch on are raised as a [`PipelineError`] and stay reachable via
//! `err.downcast_ref::<PipelineError>()`.
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum PipelineError {
    /// The recording contains no streams at all.
    #[error("recording contains no streams")]
    NoStreams,

    /// Automatic selection found no stream whose type equals the marker.
    #[error("no stream with type '{marker}' found ({available} stream(s) inspected)")]
    NoSignalStream { marker: String, available: usize },

    /// A stream / component index outside `0..len`, or an unparsable index.
    /// Recoverable: interactive callers re-prompt.
    #[error("selection '{input}' is out of range (valid: 0..{len})")]
    SelectionOutOfRange { input: String, len: usize },

    /// A channel name that does not exist in the current roster.
    #[error("channel '{0}' not found in the channel roster")]
    UnknownChannel(String),

    #[error("requested {requested} components but only {channels} channels are available")]
    InvalidComponentCount { requested: usize, channels: usize },

    #[error("cannot interpolate {bads:?}: no good neighbouring channels with positions")]
    NoGoodNeighbours { bads: Vec<String> },

    #[error("channel '{0}' has no spatial position; apply a montage that contains it")]
    MissingPosition(String),

    #[error("interpolation left non-finite samples in {0:?}")]
    NonFiniteAfterInterpolation(Vec<String>),

    #[error("decomposition method '{method}' is not available in this build; use '{alternative}' instead")]
    MethodUnavailable { method: String, alternative: String },

    #[error("unknown montage '{0}' (known: standard_1020, standard_1005)")]
    UnknownMontage(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The prompt source ended before the edit loop was confirmed.
    #[error("input closed before '{0}' was answered")]
    PromptClosed(String),

    #[error("malformed container: {0}")]
    MalformedContainer(String),
}

impl PipelineError {
    /// Selection errors are recovered in-loop; everything else aborts the stage.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            PipelineError::SelectionOutOfRange { .. } | PipelineError::UnknownChannel(_)
        )
    }
}
