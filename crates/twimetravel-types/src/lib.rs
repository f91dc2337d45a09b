//! Shared playback types for twimetravel.
//!
//! A leaf crate with **no internal twimetravel dependencies**: the records a
//! feed produces, the validated rate a player consumes, and the Twitter time
//! arithmetic that links the two.
//!
//! # Key Types
//!
//! |-------------------------|-------------------------------------------------|
//! | Type                    | Purpose                                         |
//! |-------------------------|-------------------------------------------------|
//! | [`PlaybackItem`]        | One post to reveal (id + offset in seconds)     |
//! | [`ItemId`]              | Opaque post identifier                          |
//! | [`Rate`]                | Validated playback speed multiplier (> 0)       |
//! | [`RunId`]               | Which schedule run (epoch) a reveal belongs to  |
//! | [`FeedEntry`]           | Wire record emitted by the feed endpoint        |
//! | [`Snowflake`]           | Twitter status id, time-ordered                 |
//! | [`SecondsSinceUnixEpoch`] | Wall-clock second                             |
//! | [`Interval`]            | Closed time range                               |
//! | [`IntervalStore`]       | Points plus the ranges they are complete for    |
//! |-------------------------|-------------------------------------------------|

pub mod ids;
pub mod interval;
pub mod item;
pub mod time;

pub use ids::{ItemId, RunId};
pub use item::{FeedEntry, MAX_DELAY, PlaybackItem, Rate, RateError};
pub use interval::{Interval, IntervalConflict, IntervalSet, IntervalStore};
pub use time::{SecondsSinceUnixEpoch, Snowflake, TWEPOCH_MILLIS};
