//! Play requests: fetch a window from a feed, then restart playback with it.

use std::sync::Arc;

use twimetravel_types::{PlaybackItem, Rate, RunId};

use crate::error::PlaybackResult;
use crate::feed::{FeedQuery, FeedSource, validate_items};
use crate::flows::{PlaybackFlow, Subscription};
use crate::scheduler::PlaybackScheduler;

/// A submitted play form: whose posts, which window, how fast.
#[derive(Clone, Debug, PartialEq)]
pub struct PlayRequest {
    pub query: FeedQuery,
    pub rate: f64,
}

impl PlayRequest {
    pub fn new(who: impl Into<String>, from: u64, until: u64, rate: f64) -> Self {
        Self {
            query: FeedQuery::new(who, from, until),
            rate,
        }
    }
}

/// Outcome of an accepted request.
#[derive(Clone, Debug, PartialEq)]
pub struct Submission {
    /// `None` when the window held no posts.
    pub run: Option<RunId>,
    pub items: usize,
    pub rate: Rate,
}

/// Glue between a feed and a scheduler.
///
/// Each [`submit`](Self::submit) supersedes the previous one. A request that
/// fails, for a bad rate or a feed error, leaves the current playback alone.
pub struct PlaybackController {
    feed: Arc<dyn FeedSource>,
    scheduler: PlaybackScheduler,
}

impl PlaybackController {
    pub fn new(feed: Arc<dyn FeedSource>, scheduler: PlaybackScheduler) -> Self {
        Self { feed, scheduler }
    }

    pub fn scheduler(&self) -> &PlaybackScheduler {
        &self.scheduler
    }

    /// Subscribe to the scheduler's notifications.
    pub fn subscribe(&self, pattern: &str) -> Subscription<PlaybackFlow> {
        self.scheduler.bus().subscribe(pattern)
    }

    /// Fetch `request`'s window and restart playback with it.
    pub async fn submit(&self, request: &PlayRequest) -> PlaybackResult<Submission> {
        let rate = Rate::new(request.rate)?;
        request.query.validate()?;

        let items = self.feed.fetch(&request.query).await.inspect_err(|e| {
            tracing::warn!(who = %request.query.who, error = %e, "feed fetch failed");
        })?;
        validate_items(&items)?;

        self.play(&items, rate)
    }

    /// Restart playback with items the caller already has.
    pub fn play(&self, items: &[PlaybackItem], rate: Rate) -> PlaybackResult<Submission> {
        let run = self.scheduler.reset(items, rate.get())?;
        Ok(Submission {
            run,
            items: items.len(),
            rate,
        })
    }

    /// Cancel playback for good.
    pub fn dispose(&self) {
        self.scheduler.dispose();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PlaybackError;
    use crate::feed::{FeedError, TimelineFeed};
    use crate::flows::shared_playback_bus;
    use std::time::Duration;
    use twimetravel_types::Snowflake;

    const FROM: u64 = 1518465600;
    const UNTIL: u64 = 1518469200;

    fn controller() -> PlaybackController {
        let feed = TimelineFeed::new();
        feed.insert(
            "harrisimo",
            FeedQuery::new("harrisimo", FROM, UNTIL).interval(),
            [963143061558743040, 963143736631869440].map(Snowflake),
        )
        .unwrap();
        let scheduler = PlaybackScheduler::current(shared_playback_bus(64)).unwrap();
        PlaybackController::new(Arc::new(feed), scheduler)
    }

    #[tokio::test(start_paused = true)]
    async fn test_submit_schedules_window() {
        let controller = controller();
        let submission = controller
            .submit(&PlayRequest::new("harrisimo", FROM, UNTIL, 60.0))
            .await
            .unwrap();
        assert_eq!(submission.items, 2);
        assert!(submission.run.is_some());

        // Offsets 574s and 735s at 60x: 9.57s and 12.25s.
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(controller.scheduler().output(), vec!["963143061558743040"]);
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(controller.scheduler().output().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_submit_keeps_current_playback() {
        let controller = controller();
        controller
            .submit(&PlayRequest::new("harrisimo", FROM, UNTIL, 60.0))
            .await
            .unwrap();
        let run = controller.scheduler().current_run().map(|r| r.id);

        let err = controller
            .submit(&PlayRequest::new("nobody", FROM, UNTIL, 60.0))
            .await
            .unwrap_err();
        assert!(matches!(err, PlaybackError::Feed(FeedError::UnknownUser(_))));

        let err = controller
            .submit(&PlayRequest::new("harrisimo", UNTIL, UNTIL + 3600, 60.0))
            .await
            .unwrap_err();
        assert!(matches!(err, PlaybackError::Feed(FeedError::Uncovered { .. })));

        let err = controller
            .submit(&PlayRequest::new("harrisimo", FROM, UNTIL, 0.0))
            .await
            .unwrap_err();
        assert!(matches!(err, PlaybackError::InvalidRate(_)));

        assert_eq!(controller.scheduler().current_run().map(|r| r.id), run);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_window_clears_output() {
        let controller = controller();
        controller
            .play(&[PlaybackItem::new("a", 0.0)], Rate::default())
            .unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(controller.scheduler().output(), vec!["a"]);

        let submission = controller
            .submit(&PlayRequest::new("harrisimo", FROM, FROM + 60, 1.0))
            .await
            .unwrap();
        assert_eq!(submission.run, None);
        assert!(controller.scheduler().output().is_empty());
    }
}
