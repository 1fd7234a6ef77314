use thiserror::Error;

use crate::state::VoiceInputState;

/// All errors produced by parley-core.
#[derive(Debug, Error)]
pub enum ParleyError {
    #[error("engine is not attached")]
    NotAttached,

    #[error("engine is already attached")]
    AlreadyAttached,

    #[error("capture engine is not available; attach before listening")]
    CaptureUnavailable,

    #[error("capture attempt already active (state: {state})")]
    CaptureBusy { state: VoiceInputState },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, ParleyError>;
