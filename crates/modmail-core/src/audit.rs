use std::{
    fs::OpenOptions,
    io::Write,
    path::{Path, PathBuf},
};

use chrono::Utc;
use serde::Serialize;

use crate::{
    domain::{ChannelId, UserId},
    errors::Error,
    Result,
};

const AUDIT_MAX_TEXT: usize = 500;

#[derive(Clone, Debug, Serialize)]
pub struct AuditEvent {
    pub timestamp: String,
    pub event: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub participant_id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actor_id: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suspicious: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AuditEvent {
    fn base(event: &str) -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339(),
            event: event.to_string(),
            participant_id: None,
            channel_id: None,
            actor_id: None,
            content: None,
            suspicious: None,
            error: None,
        }
    }

    pub fn ticket_opened(participant: UserId, channel: ChannelId) -> Self {
        Self {
            participant_id: Some(participant.0),
            channel_id: Some(channel.0),
            ..Self::base("ticket_opened")
        }
    }

    /// `actor` is `None` when the channel was deleted out of band.
    pub fn ticket_closed(participant: UserId, channel: ChannelId, actor: Option<UserId>) -> Self {
        Self {
            participant_id: Some(participant.0),
            channel_id: Some(channel.0),
            actor_id: actor.map(|a| a.0),
            ..Self::base("ticket_closed")
        }
    }

    pub fn staff_reply(participant: UserId, channel: ChannelId, actor: UserId, text: &str) -> Self {
        Self {
            participant_id: Some(participant.0),
            channel_id: Some(channel.0),
            actor_id: Some(actor.0),
            content: Some(text.to_string()),
            ..Self::base("staff_reply")
        }
    }

    pub fn reply_failed(participant: UserId, channel: ChannelId, error: &str) -> Self {
        Self {
            participant_id: Some(participant.0),
            channel_id: Some(channel.0),
            error: Some(error.to_string()),
            ..Self::base("reply_failed")
        }
    }

    pub fn direct_message(target: UserId, actor: UserId, text: &str) -> Self {
        Self {
            participant_id: Some(target.0),
            actor_id: Some(actor.0),
            content: Some(text.to_string()),
            ..Self::base("direct_message")
        }
    }

    pub fn member_joined(member: UserId, suspicious: bool) -> Self {
        Self {
            participant_id: Some(member.0),
            suspicious: Some(suspicious),
            ..Self::base("member_joined")
        }
    }
}

/// Append-only audit trail of ticket lifecycle and staff actions.
///
/// Disabled (no path) is a valid state: every record call becomes a no-op.
#[derive(Clone, Debug, Default)]
pub struct AuditLogger {
    path: Option<PathBuf>,
    json: bool,
}

impl AuditLogger {
    pub fn new(path: Option<PathBuf>, json: bool) -> Self {
        Self { path, json }
    }

    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Best-effort write; failures are logged.
    pub fn record(&self, event: AuditEvent) {
        if let Err(e) = self.write(event) {
            tracing::warn!("audit write failed: {e}");
        }
    }

    pub fn write(&self, mut event: AuditEvent) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        if let Some(s) = &event.content {
            event.content = Some(truncate_text(s, AUDIT_MAX_TEXT));
        }

        let mut file = OpenOptions::new().create(true).append(true).open(path)?;

        if self.json {
            let line = serde_json::to_string(&event)?;
            writeln!(file, "{line}")?;
            return Ok(());
        }

        // Plain text format for readability.
        let mut out = String::new();
        out.push('\n');
        out.push_str(&"=".repeat(60));

        let value = serde_json::to_value(&event)?;
        let Some(obj) = value.as_object() else {
            return Err(Error::External(
                "audit event is not a JSON object".to_string(),
            ));
        };
        for (k, v) in obj {
            out.push('\n');
            out.push_str(k);
            out.push_str(": ");
            match v {
                serde_json::Value::String(s) => out.push_str(s),
                other => out.push_str(&other.to_string()),
            }
        }
        out.push('\n');

        file.write_all(out.as_bytes())?;
        Ok(())
    }
}

pub fn truncate_text(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        return s.to_string();
    }
    let mut out = s.chars().take(max_len).collect::<String>();
    out.push_str("...");
    out
}
