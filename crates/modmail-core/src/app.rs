//! Top-level wiring: one `Bot` owns the registry, the relay router and the command
//! dispatcher, and routes every inbound event to the right handler.

use std::sync::Arc;

use chrono::Utc;

use crate::{
    audit::{AuditEvent, AuditLogger},
    commands::{CommandDispatcher, CommandInvocation, CommandReply},
    config::Config,
    domain::Member,
    messaging::{port::PlatformPort, types::InboundEvent},
    notify::{Notice, NotificationSink},
    registry::TicketRegistry,
    relay::{RelayOutcome, RelayRouter},
    risk::{RiskAssessment, RiskClassifier},
    Result,
};

pub fn welcome_message(member: &Member) -> String {
    format!("Welcome {} 👋", member.identity.mention())
}

pub struct Bot {
    platform: Arc<dyn PlatformPort>,
    relay: Arc<RelayRouter>,
    commands: CommandDispatcher,
    classifier: RiskClassifier,
    sink: NotificationSink,
    audit: AuditLogger,
    welcome_channel_name: String,
}

impl Bot {
    pub fn new(cfg: &Config, platform: Arc<dyn PlatformPort>) -> Self {
        let sink = NotificationSink::new(platform.clone(), cfg.log_channel_id);
        let audit = AuditLogger::new(cfg.audit_log_path.clone(), cfg.audit_log_json);
        let classifier = RiskClassifier::new(cfg.suspicious_age_days);

        let relay = Arc::new(RelayRouter::new(
            TicketRegistry::new(),
            platform.clone(),
            sink.clone(),
            audit.clone(),
            cfg.relay.clone(),
        ));
        let commands = CommandDispatcher::new(
            platform.clone(),
            relay.clone(),
            classifier,
            sink.clone(),
            audit.clone(),
        );

        Self {
            platform,
            relay,
            commands,
            classifier,
            sink,
            audit,
            welcome_channel_name: cfg.welcome_channel_name.clone(),
        }
    }

    pub fn relay(&self) -> &RelayRouter {
        &self.relay
    }

    /// Handle one inbound event. Failures are logged and swallowed.
    ///
    /// Admin commands return the reply the invoker should see; every other event
    /// returns `None`.
    pub async fn dispatch(&self, event: InboundEvent) -> Option<CommandReply> {
        let result = match event {
            InboundEvent::ParticipantJoined(member) => self.handle_join(&member).await.map(|_| ()),
            InboundEvent::PrivateMessage(msg) => {
                self.relay.handle_private_message(&msg).await.map(|out| {
                    tracing::debug!(participant = %msg.author.id(), outcome = ?out, "private message")
                })
            }
            InboundEvent::ChannelMessage(msg) => {
                self.relay.handle_channel_message(&msg).await.map(|out| {
                    if out != RelayOutcome::Ignored {
                        tracing::debug!(channel = %msg.channel_id, outcome = ?out, "staff command");
                    }
                })
            }
            InboundEvent::ChannelDeleted { channel_id } => {
                self.relay.handle_channel_deleted(channel_id).await;
                Ok(())
            }
            InboundEvent::AdminCommand(inv) => {
                let reply = self.commands.execute(&inv).await;
                tracing::debug!(invoker = %inv.invoker, reply = %reply.content, "admin command");
                return Some(reply);
            }
        };

        if let Err(e) = result {
            tracing::error!("event handler failed: {e}");
        }
        None
    }

    async fn handle_join(&self, member: &Member) -> Result<RiskAssessment> {
        let risk = self.classifier.assess(member.account_created_at, Utc::now());
        tracing::info!(
            member = %member.identity.id,
            age_days = risk.age_days,
            suspicious = risk.suspicious,
            "member joined"
        );

        self.sink
            .notify(Notice::member_joined(&member.identity, &risk), risk.urgency())
            .await;
        self.audit
            .record(AuditEvent::member_joined(member.identity.id, risk.suspicious));

        match self
            .platform
            .find_text_channel(&self.welcome_channel_name)
            .await?
        {
            Some(channel) => {
                self.platform
                    .send_message(channel, &welcome_message(member), &[])
                    .await?;
            }
            None => {
                tracing::debug!(name = %self.welcome_channel_name, "no welcome channel; skipping greeting")
            }
        }
        Ok(risk)
    }
}
