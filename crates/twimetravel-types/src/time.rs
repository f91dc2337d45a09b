//! Twitter time arithmetic.
//!
//! Status ids are snowflakes: the top 42 bits are milliseconds since the
//! Twitter epoch. That lets a time window be expressed as an id range and a
//! tweet's posting second be recovered from its id alone.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Milliseconds between the Unix epoch and the Twitter snowflake epoch.
pub const TWEPOCH_MILLIS: u64 = 1288834974657;

const TIMESTAMP_SHIFT: u32 = 22;

/// A wall-clock second.
#[derive(Copy, Clone, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SecondsSinceUnixEpoch(pub u64);

impl fmt::Display for SecondsSinceUnixEpoch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A Twitter status id.
#[derive(Copy, Clone, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Snowflake(pub u64);

impl fmt::Display for Snowflake {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<SecondsSinceUnixEpoch> for Snowflake {
    /// The smallest snowflake minted during that second. Seconds before the
    /// Twitter epoch saturate to zero.
    fn from(secs: SecondsSinceUnixEpoch) -> Snowflake {
        let millis = secs.0.saturating_mul(1000).saturating_sub(TWEPOCH_MILLIS);
        Snowflake(millis << TIMESTAMP_SHIFT)
    }
}

impl From<Snowflake> for SecondsSinceUnixEpoch {
    fn from(id: Snowflake) -> SecondsSinceUnixEpoch {
        SecondsSinceUnixEpoch(((id.0 >> TIMESTAMP_SHIFT) + TWEPOCH_MILLIS) / 1000)
    }
}
