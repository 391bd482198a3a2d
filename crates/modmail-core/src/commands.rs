//! Administrative (slash) commands.
//!
//! The platform adapter turns a raw interaction into a name plus [`CommandArg`]s;
//! [`AdminCommand::parse`] types it and [`CommandDispatcher`] runs it against the relay
//! router and the risk classifier.

use std::sync::Arc;

use chrono::Utc;

use crate::{
    audit::{AuditEvent, AuditLogger},
    domain::{ChannelId, Member, UserId},
    messaging::port::PlatformPort,
    notify::{Notice, NotificationSink, Urgency},
    relay::{RelayOutcome, RelayRouter},
    risk::{RiskAssessment, RiskClassifier},
    Result,
};

pub const CMD_DM: &str = "dm";
pub const CMD_SUSPICIOUS: &str = "suspicious_test";
pub const CMD_REPLY: &str = "reply";
pub const CMD_CLOSE: &str = "close";

pub const SUB_USER: &str = "user";
pub const SUB_ALL: &str = "all";

pub const OPT_USER: &str = "user";
pub const OPT_MESSAGE: &str = "message";
pub const OPT_TARGET: &str = "target";
pub const OPT_TEXT: &str = "text";

pub const REPLY_NO_PERMISSION: &str = "No permission";
pub const REPLY_TICKET_CLOSED: &str = "Ticket closed";

/// One resolved command option.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CommandArg {
    User(UserId),
    Text(String),
    Subcommand(String, Vec<(String, CommandArg)>),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SuspiciousTarget {
    User(UserId),
    All,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AdminCommand {
    DirectMessage { user: UserId, message: String },
    SuspiciousCheck(SuspiciousTarget),
    Reply { text: String },
    Close,
}

impl AdminCommand {
    pub fn parse(name: &str, args: &[(String, CommandArg)]) -> std::result::Result<Self, String> {
        match name {
            CMD_DM => Ok(AdminCommand::DirectMessage {
                user: user_arg(args, OPT_USER)?,
                message: text_arg(args, OPT_MESSAGE)?,
            }),
            CMD_SUSPICIOUS => match args.first() {
                Some((_, CommandArg::Subcommand(sub, sub_args))) if sub == SUB_USER => Ok(
                    AdminCommand::SuspiciousCheck(SuspiciousTarget::User(user_arg(
                        sub_args, OPT_TARGET,
                    )?)),
                ),
                Some((_, CommandArg::Subcommand(sub, _))) if sub == SUB_ALL => {
                    Ok(AdminCommand::SuspiciousCheck(SuspiciousTarget::All))
                }
                _ => Err(format!("/{CMD_SUSPICIOUS} needs a `user` or `all` subcommand")),
            },
            CMD_REPLY => Ok(AdminCommand::Reply {
                text: text_arg(args, OPT_TEXT)?,
            }),
            CMD_CLOSE => Ok(AdminCommand::Close),
            other => Err(format!("unknown command: /{other}")),
        }
    }

    /// Commands only moderators (manage-messages) may run.
    pub fn requires_elevation(&self) -> bool {
        matches!(
            self,
            AdminCommand::DirectMessage { .. } | AdminCommand::SuspiciousCheck(_)
        )
    }

    /// Whether the response should be visible only to the invoker.
    pub fn ephemeral(&self) -> bool {
        !matches!(self, AdminCommand::Reply { .. })
    }
}

fn user_arg(args: &[(String, CommandArg)], name: &str) -> std::result::Result<UserId, String> {
    args.iter()
        .find_map(|(n, a)| match a {
            CommandArg::User(u) if n == name => Some(*u),
            _ => None,
        })
        .ok_or_else(|| format!("missing `{name}` option"))
}

fn text_arg(args: &[(String, CommandArg)], name: &str) -> std::result::Result<String, String> {
    args.iter()
        .find_map(|(n, a)| match a {
            CommandArg::Text(t) if n == name => Some(t.clone()),
            _ => None,
        })
        .ok_or_else(|| format!("missing `{name}` option"))
}

/// Invoker's rights as reported by the platform.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct InvokerPermissions {
    pub manage_messages: bool,
}

#[derive(Clone, Debug)]
pub struct CommandInvocation {
    pub command: AdminCommand,
    pub invoker: UserId,
    /// Channel the command was run in.
    pub channel_id: ChannelId,
    pub permissions: InvokerPermissions,
}

/// What the invoker sees.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommandReply {
    pub content: String,
    pub ephemeral: bool,
}

pub struct CommandDispatcher {
    platform: Arc<dyn PlatformPort>,
    relay: Arc<RelayRouter>,
    classifier: RiskClassifier,
    sink: NotificationSink,
    audit: AuditLogger,
}

impl CommandDispatcher {
    pub fn new(
        platform: Arc<dyn PlatformPort>,
        relay: Arc<RelayRouter>,
        classifier: RiskClassifier,
        sink: NotificationSink,
        audit: AuditLogger,
    ) -> Self {
        Self {
            platform,
            relay,
            classifier,
            sink,
            audit,
        }
    }

    /// Run a command and produce the reply shown to the invoker. Never fails: errors are
    /// logged and turned into a short reply.
    pub async fn execute(&self, inv: &CommandInvocation) -> CommandReply {
        if inv.command.requires_elevation() && !inv.permissions.manage_messages {
            tracing::info!(invoker = %inv.invoker, command = ?inv.command, "permission denied");
            return CommandReply {
                content: REPLY_NO_PERMISSION.to_string(),
                ephemeral: true,
            };
        }
        CommandReply {
            content: self.run(inv).await,
            ephemeral: inv.command.ephemeral(),
        }
    }

    async fn run(&self, inv: &CommandInvocation) -> String {
        match &inv.command {
            AdminCommand::DirectMessage { user, message } => {
                self.direct_message(inv.invoker, *user, message).await
            }
            AdminCommand::SuspiciousCheck(SuspiciousTarget::User(user)) => {
                match self.check_user(*user).await {
                    Ok(s) => s,
                    Err(e) => {
                        tracing::warn!(user = %user, "suspicious check failed: {e}");
                        "Could not look up that user".to_string()
                    }
                }
            }
            AdminCommand::SuspiciousCheck(SuspiciousTarget::All) => match self.check_all().await {
                Ok(s) => s,
                Err(e) => {
                    tracing::warn!("suspicious sweep failed: {e}");
                    "Could not list members".to_string()
                }
            },
            AdminCommand::Reply { text } => self.reply(inv, text).await,
            AdminCommand::Close => self.close(inv).await,
        }
    }

    async fn direct_message(&self, invoker: UserId, user: UserId, message: &str) -> String {
        match self.platform.send_direct_message(user, message, &[]).await {
            Ok(_) => {
                self.audit
                    .record(AuditEvent::direct_message(user, invoker, message));
                "Sent".to_string()
            }
            Err(e) => {
                tracing::warn!(user = %user, "direct message failed: {e}");
                "DM failed".to_string()
            }
        }
    }

    async fn check_user(&self, user: UserId) -> Result<String> {
        let identity = self.platform.fetch_identity(user).await?;
        let risk = self.classifier.assess(user.created_at(), Utc::now());

        self.sink
            .notify(Notice::suspicious_check(&identity, &risk), risk.urgency())
            .await;

        let verdict = if risk.suspicious {
            "suspicious"
        } else {
            "not suspicious"
        };
        Ok(format!(
            "{}: account is {:.1} days old ({verdict})",
            identity.tag, risk.age_days
        ))
    }

    async fn check_all(&self) -> Result<String> {
        let members = self.platform.list_members().await?;
        let now = Utc::now();

        let humans: Vec<Member> = members.into_iter().filter(|m| !m.is_bot).collect();
        let flagged: Vec<(Member, RiskAssessment)> = humans
            .iter()
            .map(|m| (m.clone(), self.classifier.assess(m.account_created_at, now)))
            .filter(|(_, risk)| risk.suspicious)
            .collect();

        let urgency = if flagged.is_empty() {
            Urgency::Normal
        } else {
            Urgency::Urgent
        };
        self.sink
            .notify(Notice::suspicious_sweep(humans.len(), &flagged), urgency)
            .await;

        Ok(format!(
            "Checked {} members, {} suspicious",
            humans.len(),
            flagged.len()
        ))
    }

    async fn reply(&self, inv: &CommandInvocation, text: &str) -> String {
        if self.relay.registry().lookup_participant(inv.channel_id).is_none() {
            return "This channel is not an open ticket".to_string();
        }
        match self
            .relay
            .reply(inv.channel_id, inv.invoker, text, &[], None)
            .await
        {
            Ok(RelayOutcome::Replied { .. }) => format!("**Reply sent:** {}", text.trim()),
            Ok(RelayOutcome::ReplyUndelivered { .. }) => "Reply not delivered".to_string(),
            Ok(_) => "Nothing to send".to_string(),
            Err(e) => {
                tracing::error!(channel = %inv.channel_id, "reply command failed: {e}");
                "Reply failed".to_string()
            }
        }
    }

    async fn close(&self, inv: &CommandInvocation) -> String {
        match self.relay.close(inv.channel_id, inv.invoker).await {
            Ok(RelayOutcome::Closed { .. }) => REPLY_TICKET_CLOSED.to_string(),
            Ok(_) => "This channel is not an open ticket".to_string(),
            Err(e) => {
                tracing::error!(channel = %inv.channel_id, "close command failed: {e}");
                "Close failed".to_string()
            }
        }
    }
}
