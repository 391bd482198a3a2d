//! Notification sink: structured notices delivered to the fixed log channel.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::{
    domain::{ChannelId, Identity, Member, UserId},
    messaging::port::PlatformPort,
    risk::RiskAssessment,
};

pub const COLOR_OK: u32 = 0x2ecc71;
pub const COLOR_WARN: u32 = 0xff9900;
pub const COLOR_INFO: u32 = 0x3498db;
pub const COLOR_CLOSED: u32 = 0x95a5a6;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Urgency {
    Normal,
    /// Delivered with an `@here` ping.
    Urgent,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NoticeField {
    pub name: String,
    pub value: String,
}

/// Platform-neutral embed.
#[derive(Clone, Debug, PartialEq)]
pub struct Notice {
    pub title: String,
    pub description: Option<String>,
    pub color: u32,
    pub fields: Vec<NoticeField>,
    pub timestamp: DateTime<Utc>,
}

impl Notice {
    pub fn new(title: impl Into<String>, color: u32) -> Self {
        Self {
            title: title.into(),
            description: None,
            color,
            fields: Vec::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn description(mut self, text: impl Into<String>) -> Self {
        self.description = Some(text.into());
        self
    }

    pub fn field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.push(NoticeField {
            name: name.into(),
            value: value.into(),
        });
        self
    }

    pub fn member_joined(identity: &Identity, risk: &RiskAssessment) -> Self {
        Notice::new("Member Joined", risk_color(risk))
            .field("User", identity.tag.clone())
            .field("Account Age", format_age(risk.age_days))
    }

    pub fn suspicious_check(identity: &Identity, risk: &RiskAssessment) -> Self {
        let verdict = if risk.suspicious {
            "Suspicious"
        } else {
            "Looks fine"
        };
        Notice::new("Suspicious Check", risk_color(risk))
            .field("User", identity.tag.clone())
            .field("Account Age", format_age(risk.age_days))
            .field("Verdict", verdict)
    }

    /// Summary of a guild-wide sweep. `flagged` pairs each member with their assessment.
    pub fn suspicious_sweep(scanned: usize, flagged: &[(Member, RiskAssessment)]) -> Self {
        let color = if flagged.is_empty() {
            COLOR_OK
        } else {
            COLOR_WARN
        };
        let mut notice = Notice::new("Suspicious Check: All Members", color)
            .field("Scanned", scanned.to_string())
            .field("Flagged", flagged.len().to_string());
        if !flagged.is_empty() {
            let lines = flagged
                .iter()
                .map(|(m, r)| format!("{} ({})", m.identity.tag, format_age(r.age_days)))
                .collect::<Vec<_>>();
            notice = notice.description(truncate_lines(&lines, 4000));
        }
        notice
    }

    pub fn ticket_opened(identity: &Identity, channel: ChannelId) -> Self {
        Notice::new("Ticket Opened", COLOR_INFO)
            .field("User", identity.tag.clone())
            .field("Channel", format!("<#{}>", channel.0))
    }

    pub fn ticket_closed(participant: UserId, channel: ChannelId) -> Self {
        Notice::new("Ticket Closed", COLOR_CLOSED)
            .field("User", format!("<@{}>", participant.0))
            .field("Channel", format!("#{}", channel.0))
    }
}

fn risk_color(risk: &RiskAssessment) -> u32 {
    if risk.suspicious {
        COLOR_WARN
    } else {
        COLOR_OK
    }
}

pub fn format_age(age_days: f64) -> String {
    format!("{age_days:.1} days")
}

// Embed descriptions cap at 4096 chars; cut at a line boundary.
fn truncate_lines(lines: &[String], max_len: usize) -> String {
    let mut out = String::new();
    for (idx, line) in lines.iter().enumerate() {
        let extra = line.len() + 1;
        if out.len() + extra > max_len {
            out.push_str(&format!("… and {} more", lines.len() - idx));
            break;
        }
        out.push_str(line);
        out.push('\n');
    }
    out.trim_end().to_string()
}

/// Delivers notices to the log channel. Never fails: delivery errors are logged and dropped.
#[derive(Clone)]
pub struct NotificationSink {
    platform: Arc<dyn PlatformPort>,
    channel: ChannelId,
}

impl NotificationSink {
    pub fn new(platform: Arc<dyn PlatformPort>, channel: ChannelId) -> Self {
        Self { platform, channel }
    }

    pub async fn notify(&self, notice: Notice, urgency: Urgency) {
        let ping = urgency == Urgency::Urgent;
        if let Err(e) = self.platform.send_notice(self.channel, &notice, ping).await {
            tracing::warn!(title = %notice.title, "failed to send log notice: {e}");
        }
    }
}
