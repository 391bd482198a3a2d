use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Discord user id (snowflake).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct UserId(pub u64);

/// Discord channel id (snowflake). Guild channels, categories and DM channels share this space.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ChannelId(pub u64);

/// Discord message id (snowflake).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct MessageId(pub u64);

/// A stable reference to a posted message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MessageRef {
    pub channel_id: ChannelId,
    pub message_id: MessageId,
}

/// Discord epoch (2015-01-01T00:00:00Z) in unix milliseconds.
const DISCORD_EPOCH_MS: i64 = 1_420_070_400_000;

impl UserId {
    /// Account creation time, encoded in the top 42 bits of the snowflake.
    pub fn created_at(&self) -> DateTime<Utc> {
        let ms = (self.0 >> 22) as i64 + DISCORD_EPOCH_MS;
        DateTime::from_timestamp_millis(ms).unwrap_or_default()
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// File attached to a message. Forwarded by URL; the bytes never pass through us.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Attachment {
    pub filename: String,
    pub url: String,
}

/// Who someone is, as the platform presents them.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Identity {
    pub id: UserId,
    /// Unique handle (`name` on Discord).
    pub username: String,
    /// Global display name when set, otherwise the username.
    pub display_name: String,
    /// `name#1234` for legacy accounts, plain `name` for migrated ones.
    pub tag: String,
}

impl Identity {
    pub fn mention(&self) -> String {
        format!("<@{}>", self.id.0)
    }
}

/// A guild member as seen by the join handler and the suspicious-account sweep.
#[derive(Clone, Debug)]
pub struct Member {
    pub identity: Identity,
    pub account_created_at: DateTime<Utc>,
    pub is_bot: bool,
}
