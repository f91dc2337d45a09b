//! Input feeds: where playback items come from.
//!
//! A [`FeedSource`] answers "what did `who` post between `from` and `until`?"
//! with items whose offsets are seconds since `from`. The scheduler never
//! talks to a feed directly; the [`PlaybackController`](crate::PlaybackController)
//! fetches first and only resets the scheduler on success.
//!
//! Two sources ship here:
//! - [`JsonFileFeed`] reads the feed endpoint's JSON array from disk.
//! - [`TimelineFeed`] keeps tweet ids per user in memory, window by window,
//!   and derives offsets from the timestamp embedded in each snowflake.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::RwLock;
use thiserror::Error;

use twimetravel_types::{
    FeedEntry, Interval, IntervalConflict, IntervalStore, PlaybackItem, SecondsSinceUnixEpoch,
    Snowflake,
};

/// Errors from acquiring playback items. Never retried automatically.
#[derive(Error, Debug)]
pub enum FeedError {
    #[error("failed to read feed {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed feed payload: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("no timeline known for {0}")]
    UnknownUser(String),

    #[error("item {id} has invalid offset {offset}")]
    InvalidOffset { id: String, offset: f64 },

    #[error("interval starts at {from} but ends at {until}")]
    InvalidInterval {
        from: SecondsSinceUnixEpoch,
        until: SecondsSinceUnixEpoch,
    },

    #[error("timeline of {who} is not loaded for {}", ranges(.missing))]
    Uncovered {
        who: String,
        missing: Vec<Interval<Snowflake>>,
    },

    #[error("timeline of {who} for {window} disagrees with what is already loaded")]
    Conflict {
        who: String,
        window: Interval<Snowflake>,
        #[source]
        source: IntervalConflict,
    },
}

fn ranges(intervals: &[Interval<Snowflake>]) -> String {
    intervals
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Who and when to replay.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FeedQuery {
    pub who: String,
    pub from: SecondsSinceUnixEpoch,
    pub until: SecondsSinceUnixEpoch,
}

impl FeedQuery {
    pub fn new(who: impl Into<String>, from: u64, until: u64) -> Self {
        Self {
            who: who.into(),
            from: SecondsSinceUnixEpoch(from),
            until: SecondsSinceUnixEpoch(until),
        }
    }

    /// Reject windows that end before they start.
    pub fn validate(&self) -> Result<(), FeedError> {
        if self.from > self.until {
            return Err(FeedError::InvalidInterval {
                from: self.from,
                until: self.until,
            });
        }
        Ok(())
    }

    /// The query window as a snowflake id range.
    pub fn interval(&self) -> Interval<Snowflake> {
        Interval(self.from, self.until).into()
    }
}

/// A source of playback items.
#[async_trait]
pub trait FeedSource: Send + Sync {
    /// Fetch items for `query`, ordered by original post time.
    async fn fetch(&self, query: &FeedQuery) -> Result<Vec<PlaybackItem>, FeedError>;
}

/// Reject items the scheduler cannot place on a timeline.
pub fn validate_items(items: &[PlaybackItem]) -> Result<(), FeedError> {
    match items.iter().find(|item| !item.has_valid_offset()) {
        Some(item) => Err(FeedError::InvalidOffset {
            id: item.id.to_string(),
            offset: item.offset_seconds,
        }),
        None => Ok(()),
    }
}

// ============================================================================
// JsonFileFeed
// ============================================================================

/// Serves a recorded feed response from disk.
///
/// The file holds a JSON array of `{"id", "seconds_since_start"}` records,
/// already relative to the window it was recorded for; the query only
/// labels the request.
#[derive(Clone, Debug)]
pub struct JsonFileFeed {
    path: PathBuf,
}

impl JsonFileFeed {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Decode a feed payload.
    pub fn parse(bytes: &[u8]) -> Result<Vec<PlaybackItem>, FeedError> {
        let entries: Vec<FeedEntry> = serde_json::from_slice(bytes)?;
        Ok(entries.into_iter().map(PlaybackItem::from).collect())
    }
}

#[async_trait]
impl FeedSource for JsonFileFeed {
    async fn fetch(&self, query: &FeedQuery) -> Result<Vec<PlaybackItem>, FeedError> {
        let bytes = tokio::fs::read(&self.path)
            .await
            .map_err(|source| FeedError::Io {
                path: self.path.clone(),
                source,
            })?;
        let items = Self::parse(&bytes)?;
        tracing::debug!(
            path = %self.path.display(),
            who = %query.who,
            items = items.len(),
            "loaded feed file"
        );
        Ok(items)
    }
}

// ============================================================================
// TimelineFeed
// ============================================================================

/// In-memory tweet ids per user, loaded window by window.
///
/// A query is only answered once its whole window has been loaded. Asking
/// for a range that was never loaded fails with [`FeedError::Uncovered`]
/// instead of returning whatever part happens to be known.
#[derive(Debug, Default)]
pub struct TimelineFeed {
    timelines: RwLock<HashMap<String, IntervalStore<Snowflake>>>,
}

impl TimelineFeed {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `ids` are every tweet `user` posted within `window`.
    ///
    /// Loading a window that overlaps an earlier one is fine as long as both
    /// agree on the tweets in the overlap.
    pub fn insert(
        &self,
        user: impl Into<String>,
        window: Interval<Snowflake>,
        ids: impl IntoIterator<Item = Snowflake>,
    ) -> Result<(), FeedError> {
        let user = user.into();
        let mut timelines = self.timelines.write();
        let store = timelines.entry(user.clone()).or_default();
        store.insert(window, ids).map_err(|source| {
            tracing::warn!(who = %user, %window, "conflicting timeline load rejected");
            FeedError::Conflict {
                who: user,
                window,
                source,
            }
        })
    }

    /// Tweets of `user` inside `query`, oldest first, with offsets in seconds since `from`.
    fn window(&self, query: &FeedQuery) -> Result<Vec<PlaybackItem>, FeedError> {
        query.validate()?;
        let timelines = self.timelines.read();
        let store = timelines
            .get(&query.who)
            .ok_or_else(|| FeedError::UnknownUser(query.who.clone()))?;

        let interval = query.interval();
        let ids = store.get(&interval).ok_or_else(|| FeedError::Uncovered {
            who: query.who.clone(),
            missing: store.missing(&interval).iter().copied().collect(),
        })?;

        Ok(ids
            .into_iter()
            .map(|id| {
                let posted: SecondsSinceUnixEpoch = id.into();
                PlaybackItem::new(id, posted.0.saturating_sub(query.from.0) as f64)
            })
            .collect())
    }
}

#[async_trait]
impl FeedSource for TimelineFeed {
    async fn fetch(&self, query: &FeedQuery) -> Result<Vec<PlaybackItem>, FeedError> {
        let items = self.window(query)?;
        tracing::debug!(who = %query.who, items = items.len(), "timeline window");
        Ok(items)
    }
}
