use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Logical clock issued by a [`WatchService`](super::WatchService).
///
/// Opaque to consumers: hand it back to `subscribe` as a cursor. Clocks from
/// the same service are totally ordered; the epoch distinguishes services so
/// a clock from a previous process is never mistaken for a current one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Clock {
    epoch: u64,
    tick: u64,
}

impl Clock {
    pub(crate) fn new(epoch: u64, tick: u64) -> Self {
        Self { epoch, tick }
    }

    pub(crate) fn epoch(&self) -> u64 {
        self.epoch
    }
}

impl fmt::Display for Clock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "c:{}:{}", self.epoch, self.tick)
    }
}

impl FromStr for Clock {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || format!("Invalid clock: {}", s);

        let rest = s.strip_prefix("c:").ok_or_else(invalid)?;
        let (epoch, tick) = rest.split_once(':').ok_or_else(invalid)?;
        Ok(Self {
            epoch: epoch.parse().map_err(|_| invalid())?,
            tick: tick.parse().map_err(|_| invalid())?,
        })
    }
}

impl Serialize for Clock {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Clock {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}
