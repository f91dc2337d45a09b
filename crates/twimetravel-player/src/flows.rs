//! Playback notifications.
//!
//! The scheduler publishes a [`PlaybackFlow`] whenever its observable state
//! changes, so a renderer knows when to re-read
//! [`PlaybackScheduler::output`](crate::PlaybackScheduler::output).
//!
//! Subscribers pick events with dot-separated subject patterns:
//!
//! | pattern              | matches                                    |
//! |----------------------|--------------------------------------------|
//! | `playback.revealed`  | that subject only                          |
//! | `playback.*`         | one token after `playback.`                |
//! | `playback.>`         | one or more tokens after `playback.`       |
//!
//! ```ignore
//! let bus = shared_playback_bus(1024);
//! let mut sub = bus.subscribe("playback.revealed");
//! while let Some(msg) = sub.recv().await {
//!     if let PlaybackFlow::Revealed { id, .. } = msg.payload {
//!         println!("{id}");
//!     }
//! }
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};
use tokio::time::Instant;

use twimetravel_types::{ItemId, Rate, RunId};

// ============================================================================
// Subject patterns
// ============================================================================

#[derive(Clone, Debug, PartialEq, Eq)]
enum Token {
    Literal(String),
    /// `*`
    One,
    /// `>`, only meaningful in last position.
    Rest,
}

/// A parsed subscription pattern.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubjectPattern {
    raw: String,
    tokens: Vec<Token>,
}

impl SubjectPattern {
    pub fn new(pattern: &str) -> Self {
        let tokens = pattern
            .split('.')
            .map(|token| match token {
                "*" => Token::One,
                ">" => Token::Rest,
                literal => Token::Literal(literal.to_string()),
            })
            .collect();
        Self {
            raw: pattern.to_string(),
            tokens,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn matches(&self, subject: &str) -> bool {
        let mut subject = subject.split('.');
        let last = self.tokens.len().saturating_sub(1);

        for (i, token) in self.tokens.iter().enumerate() {
            match (token, subject.next()) {
                (_, None) => return false,
                (Token::Rest, Some(_)) => return i == last,
                (Token::One, Some(_)) => {}
                (Token::Literal(want), Some(got)) if want == got => {}
                (Token::Literal(_), Some(_)) => return false,
            }
        }
        subject.next().is_none()
    }
}

// ============================================================================
// Messages
// ============================================================================

/// Payloads routed by subject.
pub trait HasSubject {
    fn subject(&self) -> &'static str;
}

/// One published event.
#[derive(Clone, Debug)]
pub struct FlowMessage<T> {
    pub subject: &'static str,
    pub payload: T,
    /// Position in the bus's publish order, starting at 0.
    pub seq: u64,
    pub published_at: Instant,
}

/// State changes of a [`PlaybackScheduler`](crate::PlaybackScheduler).
///
/// Every variant carries the run it belongs to. Once a run's `Cancelled`
/// has been published, no further event for that run follows.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum PlaybackFlow {
    /// A run armed its timers.
    Started {
        run: RunId,
        /// Number of timers armed.
        items: usize,
        rate: Rate,
    },

    /// A timer fired and its item was appended to the output.
    Revealed {
        run: RunId,
        id: ItemId,
        /// Position of the item in the run's input list.
        index: usize,
        /// Time since the run started.
        elapsed: Duration,
    },

    /// A run was torn down before all of its timers fired.
    Cancelled {
        run: RunId,
        /// Timers that were still pending.
        pending: usize,
    },

    /// The last timer of a run fired.
    Finished {
        run: RunId,
        /// Items revealed by this run.
        revealed: usize,
    },
}

impl PlaybackFlow {
    pub fn run(&self) -> RunId {
        match self {
            PlaybackFlow::Started { run, .. }
            | PlaybackFlow::Revealed { run, .. }
            | PlaybackFlow::Cancelled { run, .. }
            | PlaybackFlow::Finished { run, .. } => *run,
        }
    }
}

impl HasSubject for PlaybackFlow {
    fn subject(&self) -> &'static str {
        match self {
            PlaybackFlow::Started { .. } => "playback.started",
            PlaybackFlow::Revealed { .. } => "playback.revealed",
            PlaybackFlow::Cancelled { .. } => "playback.cancelled",
            PlaybackFlow::Finished { .. } => "playback.finished",
        }
    }
}

// ============================================================================
// FlowBus
// ============================================================================

/// Typed broadcast bus. Cloning shares the channel.
#[derive(Clone)]
pub struct FlowBus<T> {
    tx: broadcast::Sender<FlowMessage<T>>,
    next_seq: Arc<AtomicU64>,
    capacity: usize,
}

impl<T: Clone + HasSubject> FlowBus<T> {
    /// Panics if `capacity` is zero, like the underlying broadcast channel.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self {
            tx,
            next_seq: Arc::new(AtomicU64::new(0)),
            capacity,
        }
    }

    /// Messages a subscriber may fall behind by before it starts losing them.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Deliver `payload` to current subscribers. Returns how many there were.
    pub fn publish(&self, payload: T) -> usize {
        let msg = FlowMessage {
            subject: payload.subject(),
            payload,
            seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
            published_at: Instant::now(),
        };
        // Err only means nobody is listening.
        self.tx.send(msg).unwrap_or(0)
    }

    /// Receive messages published from now on whose subject matches `pattern`.
    pub fn subscribe(&self, pattern: &str) -> Subscription<T> {
        Subscription {
            pattern: SubjectPattern::new(pattern),
            rx: self.tx.subscribe(),
            lagged: 0,
        }
    }
}

impl<T> std::fmt::Debug for FlowBus<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlowBus")
            .field("capacity", &self.capacity)
            .field("subscribers", &self.tx.receiver_count())
            .finish()
    }
}

/// The bus a scheduler publishes to, shared with its renderers.
pub type SharedPlaybackBus = Arc<FlowBus<PlaybackFlow>>;

pub fn shared_playback_bus(capacity: usize) -> SharedPlaybackBus {
    Arc::new(FlowBus::new(capacity))
}

// ============================================================================
// Subscription
// ============================================================================

/// Receiving end of a [`FlowBus`], filtered by a [`SubjectPattern`].
///
/// A subscriber that falls more than `capacity` messages behind loses the
/// oldest ones; it logs a warning and carries on with what is left.
pub struct Subscription<T> {
    pattern: SubjectPattern,
    rx: broadcast::Receiver<FlowMessage<T>>,
    lagged: u64,
}

impl<T: Clone> Subscription<T> {
    pub fn pattern(&self) -> &str {
        self.pattern.as_str()
    }

    /// Messages dropped so far because this subscriber fell behind.
    pub fn lagged(&self) -> u64 {
        self.lagged
    }

    /// Next matching message. `None` once every sender is gone.
    pub async fn recv(&mut self) -> Option<FlowMessage<T>> {
        loop {
            match self.rx.recv().await {
                Ok(msg) if self.pattern.matches(msg.subject) => return Some(msg),
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => self.note_lag(skipped),
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Next matching message already queued, if any.
    pub fn try_recv(&mut self) -> Option<FlowMessage<T>> {
        loop {
            match self.rx.try_recv() {
                Ok(msg) if self.pattern.matches(msg.subject) => return Some(msg),
                Ok(_) => {}
                Err(TryRecvError::Lagged(skipped)) => self.note_lag(skipped),
                Err(TryRecvError::Empty | TryRecvError::Closed) => return None,
            }
        }
    }

    fn note_lag(&mut self, skipped: u64) {
        self.lagged += skipped;
        tracing::warn!(
            pattern = %self.pattern.as_str(),
            skipped,
            total = self.lagged,
            "playback subscriber fell behind, messages dropped"
        );
    }
}

impl<T> std::fmt::Debug for Subscription<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("pattern", &self.pattern.as_str())
            .field("lagged", &self.lagged)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn revealed(run: RunId, id: &str) -> PlaybackFlow {
        PlaybackFlow::Revealed {
            run,
            id: id.into(),
            index: 0,
            elapsed: Duration::ZERO,
        }
    }

    fn matches(pattern: &str, subject: &str) -> bool {
        SubjectPattern::new(pattern).matches(subject)
    }

    #[test]
    fn test_literal_patterns() {
        assert!(matches("playback.revealed", "playback.revealed"));
        assert!(!matches("playback.revealed", "playback.cancelled"));
        assert!(!matches("playback.revealed", "playback.revealed.extra"));
        assert!(!matches("playback.revealed.extra", "playback.revealed"));
    }

    #[test]
    fn test_wildcard_patterns() {
        assert!(matches("playback.*", "playback.started"));
        assert!(!matches("playback.*", "playback.a.b"));
        assert!(!matches("playback.*", "playback"));
        assert!(matches("playback.>", "playback.a.b"));
        assert!(!matches("playback.>", "playback"));
        assert!(matches("*.finished", "playback.finished"));
        assert!(!matches("feed.>", "playback.started"));
        // `>` anywhere but the end never matches.
        assert!(!matches("playback.>.x", "playback.a.x"));
    }

    #[test]
    fn test_flow_subjects_and_run() {
        let run = RunId::new();
        let flows = [
            PlaybackFlow::Started {
                run,
                items: 3,
                rate: Rate::default(),
            },
            revealed(run, "a"),
            PlaybackFlow::Cancelled { run, pending: 1 },
            PlaybackFlow::Finished { run, revealed: 3 },
        ];
        let subjects: Vec<&str> = flows.iter().map(|f| f.subject()).collect();
        assert_eq!(
            subjects,
            ["playback.started", "playback.revealed", "playback.cancelled", "playback.finished"]
        );
        assert!(flows.iter().all(|f| f.run() == run));
    }

    #[test]
    fn test_publish_without_subscribers() {
        let bus = shared_playback_bus(8);
        assert_eq!(bus.capacity(), 8);
        assert_eq!(bus.subscriber_count(), 0);
        let delivered = bus.publish(PlaybackFlow::Cancelled {
            run: RunId::new(),
            pending: 0,
        });
        assert_eq!(delivered, 0);
    }

    #[tokio::test]
    async fn test_subscription_filters_and_sequences() {
        let bus = shared_playback_bus(16);
        let mut reveals = bus.subscribe("playback.revealed");
        let mut all = bus.subscribe("playback.>");
        assert_eq!(bus.subscriber_count(), 2);
        let run = RunId::new();

        bus.publish(PlaybackFlow::Started {
            run,
            items: 1,
            rate: Rate::default(),
        });
        bus.publish(revealed(run, "a"));

        let msg = reveals.recv().await.expect("reveal");
        assert_eq!((msg.subject, msg.seq), ("playback.revealed", 1));
        assert!(reveals.try_recv().is_none());

        let seqs: Vec<u64> = std::iter::from_fn(|| all.try_recv()).map(|m| m.seq).collect();
        assert_eq!(seqs, vec![0, 1]);
    }

    #[tokio::test]
    async fn test_lagging_subscriber_keeps_newest() {
        let bus = shared_playback_bus(2);
        let mut sub = bus.subscribe("playback.>");
        let run = RunId::new();
        for id in ["a", "b", "c", "d", "e"] {
            bus.publish(revealed(run, id));
        }

        let first = sub.recv().await.expect("message after lag");
        assert_eq!(sub.lagged(), 3);
        assert!(matches!(first.payload, PlaybackFlow::Revealed { ref id, .. } if *id == "d"));
        assert!(sub.try_recv().is_some());
        assert!(sub.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_recv_ends_when_bus_dropped() {
        let bus = shared_playback_bus(4);
        let mut sub = bus.subscribe("playback.>");
        drop(bus);
        assert!(sub.recv().await.is_none());
    }
}
