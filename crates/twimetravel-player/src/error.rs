//! Error types for playback operations.

use thiserror::Error;
use twimetravel_types::RateError;

use crate::feed::FeedError;

/// Errors surfaced by the scheduler and controller.
#[derive(Error, Debug)]
pub enum PlaybackError {
    /// Rate was zero, negative or not a number. Nothing was scheduled and
    /// the previous run is untouched.
    #[error("invalid rate: {0}")]
    InvalidRate(#[from] RateError),

    /// The scheduler was created outside a tokio runtime.
    #[error("no tokio runtime available to drive playback timers")]
    NoRuntime,

    /// The input feed failed; the scheduler was not invoked.
    #[error("feed error: {0}")]
    Feed(#[from] FeedError),
}

pub type PlaybackResult<T> = Result<T, PlaybackError>;
