//! Channel identifiers

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// A named logical topic multiplexed over the shared connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Notifications,
    Messages,
    Updates,
    Alerts,
    Analytics,
    Events,
}

impl Channel {
    /// Every channel, in declaration order
    pub const ALL: [Channel; 6] = [
        Channel::Notifications,
        Channel::Messages,
        Channel::Updates,
        Channel::Alerts,
        Channel::Analytics,
        Channel::Events,
    ];

    /// Wire name of the channel
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Notifications => "notifications",
            Channel::Messages => "messages",
            Channel::Updates => "updates",
            Channel::Alerts => "alerts",
            Channel::Analytics => "analytics",
            Channel::Events => "events",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when parsing a name outside the channel set
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Unknown channel: {0}")]
pub struct UnknownChannel(pub String);

impl FromStr for Channel {
    type Err = UnknownChannel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Channel::ALL
            .iter()
            .copied()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| UnknownChannel(s.to_string()))
    }
}
