//! # twimetravel-player
//!
//! Replays a historical sequence of posts "as it happened", compressed or
//! stretched by a rate factor.
//!
//! - [`PlaybackScheduler`] owns the timers: one per item, fired at
//!   `offset / rate`, appended to an ordered output, cancellable as a whole.
//! - [`FlowBus`] carries [`PlaybackFlow`] notifications so renderers know when
//!   the output changed.
//! - [`FeedSource`] implementations supply the items.
//! - [`PlaybackController`] ties a feed to a scheduler the way a play form does.

pub mod config;
pub mod controller;
pub mod error;
pub mod feed;
pub mod flows;
pub mod scheduler;

pub use config::{ConfigError, FeedConfig, PlayerConfig};
pub use controller::{PlayRequest, PlaybackController, Submission};
pub use error::{PlaybackError, PlaybackResult};
pub use feed::{FeedError, FeedQuery, FeedSource, JsonFileFeed, TimelineFeed, validate_items};
pub use flows::{
    FlowBus, FlowMessage, HasSubject, PlaybackFlow, SharedPlaybackBus, SubjectPattern, Subscription,
    shared_playback_bus,
};
pub use scheduler::{PlaybackScheduler, PlaybackState, Reveal, RunInfo, TimerHandle};

pub use twimetravel_types as types;
