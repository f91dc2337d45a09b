//! Playback items and the rate that scales them.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ids::ItemId;

/// Ceiling on any computed delay, so `Instant + delay` cannot overflow.
///
/// Roughly 30 years; a timer this far out never fires in practice.
pub const MAX_DELAY: Duration = Duration::from_secs(86_400 * 365 * 30);

/// One historical post to reveal during a replay.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PlaybackItem {
    /// Post to reveal.
    pub id: ItemId,
    /// Seconds since the start of the recorded window.
    pub offset_seconds: f64,
}

impl PlaybackItem {
    pub fn new(id: impl Into<ItemId>, offset_seconds: f64) -> Self {
        Self {
            id: id.into(),
            offset_seconds,
        }
    }

    /// Wall-clock delay before this item is revealed at `rate`.
    ///
    /// Out-of-contract offsets (negative, NaN, infinite) reveal immediately
    /// rather than panic; validation belongs to the feed layer.
    pub fn delay(&self, rate: Rate) -> Duration {
        if !self.offset_seconds.is_finite() || self.offset_seconds <= 0.0 {
            return Duration::ZERO;
        }
        let secs = self.offset_seconds / rate.get();
        Duration::try_from_secs_f64(secs)
            .map(|d| d.min(MAX_DELAY))
            .unwrap_or(MAX_DELAY)
    }

    /// True when the offset is inside the scheduler's contract.
    pub fn has_valid_offset(&self) -> bool {
        self.offset_seconds.is_finite() && self.offset_seconds >= 0.0
    }
}

// ── Rate ────────────────────────────────────────────────────────────────────

/// Why a rate was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum RateError {
    #[error("rate must be greater than zero, got {0}")]
    NotPositive(f64),
    #[error("rate must be a finite number, got {0}")]
    NotFinite(f64),
}

/// Playback speed multiplier. `2.0` replays twice as fast as it happened.
///
/// Always finite and strictly positive, so dividing by it is safe.
#[derive(Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "f64", into = "f64")]
pub struct Rate(f64);

impl Rate {
    /// Real time.
    pub const REALTIME: Rate = Rate(1.0);

    pub fn new(rate: f64) -> Result<Self, RateError> {
        if rate.is_nan() || rate.is_infinite() {
            return Err(RateError::NotFinite(rate));
        }
        if rate <= 0.0 {
            return Err(RateError::NotPositive(rate));
        }
        Ok(Self(rate))
    }

    pub fn get(self) -> f64 {
        self.0
    }
}

impl Default for Rate {
    fn default() -> Self {
        Self::REALTIME
    }
}

impl TryFrom<f64> for Rate {
    type Error = RateError;

    fn try_from(rate: f64) -> Result<Self, Self::Error> {
        Rate::new(rate)
    }
}

impl From<Rate> for f64 {
    fn from(rate: Rate) -> f64 {
        rate.0
    }
}

impl fmt::Display for Rate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x", self.0)
    }
}

impl fmt::Debug for Rate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Rate({})", self.0)
    }
}

// ── Wire format ─────────────────────────────────────────────────────────────

/// One record of the feed endpoint's JSON array.
///
/// ```json
/// [{"id": "963143061558743040", "seconds_since_start": 574}]
/// ```
#[derive(Clone, Debug, Eq, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct FeedEntry {
    pub id: String,
    pub seconds_since_start: u64,
}

impl From<FeedEntry> for PlaybackItem {
    fn from(entry: FeedEntry) -> Self {
        PlaybackItem::new(entry.id, entry.seconds_since_start as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rate(r: f64) -> Rate {
        Rate::new(r).unwrap()
    }

    #[test]
    fn test_rate_rejects_non_positive() {
        assert_eq!(Rate::new(0.0), Err(RateError::NotPositive(0.0)));
        assert_eq!(Rate::new(-2.0), Err(RateError::NotPositive(-2.0)));
        assert!(matches!(Rate::new(f64::NAN), Err(RateError::NotFinite(_))));
        assert!(matches!(Rate::new(f64::INFINITY), Err(RateError::NotFinite(_))));
        assert_eq!(Rate::new(0.5).unwrap().get(), 0.5);
    }

    #[test]
    fn test_rate_deserialize_validates() {
        let ok: Rate = serde_json::from_str("60.0").unwrap();
        assert_eq!(ok.get(), 60.0);
        assert!(serde_json::from_str::<Rate>("0").is_err());
        assert!(serde_json::from_str::<Rate>("-1.5").is_err());
    }

    #[test]
    fn test_delay_divides_by_rate() {
        let item = PlaybackItem::new("b", 2.0);
        assert_eq!(item.delay(rate(2.0)), Duration::from_secs(1));
        assert_eq!(item.delay(rate(1.0)), Duration::from_secs(2));
        assert_eq!(item.delay(rate(0.5)), Duration::from_secs(4));
        assert_eq!(PlaybackItem::new("c", 1.0).delay(rate(4.0)), Duration::from_millis(250));
    }

    #[test]
    fn test_delay_out_of_contract_offsets_are_immediate() {
        let r = Rate::default();
        assert_eq!(PlaybackItem::new("a", -3.0).delay(r), Duration::ZERO);
        assert_eq!(PlaybackItem::new("a", f64::NAN).delay(r), Duration::ZERO);
        assert_eq!(PlaybackItem::new("a", f64::INFINITY).delay(r), Duration::ZERO);
        assert!(!PlaybackItem::new("a", -3.0).has_valid_offset());
        assert!(PlaybackItem::new("a", 0.0).has_valid_offset());
    }

    #[test]
    fn test_delay_is_capped() {
        let item = PlaybackItem::new("far", 1e300);
        assert_eq!(item.delay(rate(1e-300)), MAX_DELAY);
        assert_eq!(PlaybackItem::new("far", 1e12).delay(rate(1.0)), MAX_DELAY);
    }

    #[test]
    fn test_feed_entry_wire_format() {
        let json = r#"[{"id":"963143061558743040","seconds_since_start":574}]"#;
        let entries: Vec<FeedEntry> = serde_json::from_str(json).unwrap();
        let item: PlaybackItem = entries[0].clone().into();
        assert_eq!(item.id, "963143061558743040");
        assert_eq!(item.offset_seconds, 574.0);
    }
}
