//! Ticket relay: participant DMs ↔ staff-side relay channels.
//!
//! Per participant the lifecycle is Unopened → Open → Closed, where Closed behaves exactly
//! like Unopened (the next DM opens a fresh ticket in a fresh channel).
//!
//! Inbound DMs are serialized per participant through [`ParticipantLocks`] and the registry
//! slot is reserved before any network call, so two first-contact messages arriving
//! back to back produce one channel, not two.

use std::{collections::HashMap, sync::Arc};

use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::{
    audit::{AuditEvent, AuditLogger},
    config::RelaySettings,
    domain::{Attachment, ChannelId, Identity, MessageRef, UserId},
    errors::Error,
    messaging::{
        port::PlatformPort,
        types::{ChannelMessage, PrivateMessage},
    },
    notify::{Notice, NotificationSink, Urgency},
    registry::TicketRegistry,
    Result,
};

pub const ACK_CONNECTED: &str = "✅ Connected to support";
pub const REACT_DELIVERED: &str = "✅";

const MAX_CHANNEL_NAME: usize = 100;
const PRUNE_LOCKS_ABOVE: usize = 1024;

/// What a relay operation did. Returned so callers (and tests) can observe the transition.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RelayOutcome {
    Ignored,
    /// A new ticket was opened and the message forwarded into it.
    Opened { channel: ChannelId },
    Forwarded { channel: ChannelId },
    Closed {
        participant: UserId,
        channel: ChannelId,
    },
    Replied { participant: UserId },
    /// The reply could not reach the participant; staff were told in the channel.
    ReplyUndelivered { participant: UserId },
}

/// Staff control command found in a relay channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StaffCommand<'a> {
    Close,
    Reply(&'a str),
}

/// Parse a relay-channel message.
///
/// Prefixes match case-insensitively and must be followed by whitespace or the end of the
/// message, so `!r` does not fire on `!rules`.
pub fn parse_staff_command<'a>(content: &'a str, settings: &RelaySettings) -> Option<StaffCommand<'a>> {
    let content = content.trim_start();
    if strip_command(content, &settings.close_command).is_some() {
        return Some(StaffCommand::Close);
    }
    strip_command(content, &settings.reply_command).map(|rest| StaffCommand::Reply(rest.trim()))
}

fn strip_command<'a>(content: &'a str, prefix: &str) -> Option<&'a str> {
    let head = content.get(..prefix.len())?;
    if !head.eq_ignore_ascii_case(prefix) {
        return None;
    }
    let rest = &content[prefix.len()..];
    match rest.chars().next() {
        None => Some(rest),
        Some(c) if c.is_whitespace() => Some(rest),
        Some(_) => None,
    }
}

/// Discord channel name for a participant's relay channel: lowercase, `[a-z0-9_-]`,
/// runs of anything else collapsed to one `-`.
pub fn relay_channel_name(prefix: &str, username: &str) -> String {
    let raw = format!("{prefix}-{username}").to_lowercase();
    let mut out = String::with_capacity(raw.len());
    let mut last_dash = false;
    for c in raw.chars() {
        if c.is_ascii_alphanumeric() || c == '_' {
            out.push(c);
            last_dash = false;
        } else if !last_dash {
            out.push('-');
            last_dash = true;
        }
    }
    let name: String = out
        .trim_matches('-')
        .chars()
        .take(MAX_CHANNEL_NAME)
        .collect();
    let name = name.trim_end_matches('-');
    if name.is_empty() {
        "ticket".to_string()
    } else {
        name.to_string()
    }
}

/// What lands in the relay channel for a participant message.
pub fn format_forward(author: &Identity, content: &str) -> String {
    let content = content.trim();
    if content.is_empty() {
        format!("{}:", author.tag)
    } else {
        format!("{}: {content}", author.tag)
    }
}

fn announcement(author: &Identity) -> String {
    format!(
        "@here New ticket from **{}** ({} · `{}`)",
        author.tag,
        author.mention(),
        author.id
    )
}

fn undelivered_notice(participant: UserId, err: &Error) -> String {
    let reason = match err {
        Error::Delivery(_) => "they are not accepting direct messages".to_string(),
        Error::NotFound(_) => "their account could not be found".to_string(),
        other => other.to_string(),
    };
    format!("⚠️ Reply not delivered to <@{}>: {reason}", participant.0)
}

/// Per-participant async locks. Inbound DMs from one participant run one at a time;
/// different participants never wait on each other.
#[derive(Default)]
pub struct ParticipantLocks {
    inner: Mutex<HashMap<UserId, Arc<Mutex<()>>>>,
}

impl ParticipantLocks {
    pub async fn lock(&self, participant: UserId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().await;
            if map.len() > PRUNE_LOCKS_ABOVE {
                map.retain(|_, l| Arc::strong_count(l) > 1);
            }
            map.entry(participant)
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }
}

pub struct RelayRouter {
    registry: TicketRegistry,
    locks: ParticipantLocks,
    platform: Arc<dyn PlatformPort>,
    sink: NotificationSink,
    audit: AuditLogger,
    settings: RelaySettings,
}

impl RelayRouter {
    pub fn new(
        registry: TicketRegistry,
        platform: Arc<dyn PlatformPort>,
        sink: NotificationSink,
        audit: AuditLogger,
        settings: RelaySettings,
    ) -> Self {
        Self {
            registry,
            locks: ParticipantLocks::default(),
            platform,
            sink,
            audit,
            settings,
        }
    }

    pub fn registry(&self) -> &TicketRegistry {
        &self.registry
    }

    pub fn settings(&self) -> &RelaySettings {
        &self.settings
    }

    /// A participant wrote to the bot in private.
    pub async fn handle_private_message(&self, msg: &PrivateMessage) -> Result<RelayOutcome> {
        if msg.author.is_bot {
            return Ok(RelayOutcome::Ignored);
        }
        let author = &msg.author.identity;
        let _guard = self.locks.lock(author.id).await;

        let (channel, opened) = match self.registry.lookup_channel(author.id) {
            Some(channel) => (channel, false),
            None => (self.open_ticket(author).await?, true),
        };

        match self.forward(channel, msg).await {
            Ok(()) if opened => Ok(RelayOutcome::Opened { channel }),
            Ok(()) => Ok(RelayOutcome::Forwarded { channel }),
            Err(e) if e.is_not_found() => {
                // Relay channel vanished without a delete event reaching us.
                tracing::warn!(
                    participant = %author.id,
                    channel = %channel,
                    "relay channel is gone; opening a fresh ticket"
                );
                self.registry.remove_channel(channel);
                let channel = self.open_ticket(author).await?;
                self.forward(channel, msg).await?;
                Ok(RelayOutcome::Opened { channel })
            }
            Err(e) => Err(e),
        }
    }

    /// A message was posted in some guild channel. Only staff commands inside a relay
    /// channel do anything.
    pub async fn handle_channel_message(&self, msg: &ChannelMessage) -> Result<RelayOutcome> {
        if msg.is_automated() {
            return Ok(RelayOutcome::Ignored);
        }
        let Some(cmd) = parse_staff_command(&msg.content, &self.settings) else {
            return Ok(RelayOutcome::Ignored);
        };
        match cmd {
            StaffCommand::Close => self.close(msg.channel_id, msg.author.id()).await,
            StaffCommand::Reply(text) => {
                self.reply(
                    msg.channel_id,
                    msg.author.id(),
                    text,
                    &msg.attachments,
                    Some(msg.message),
                )
                .await
            }
        }
    }

    /// Close the ticket carried by `channel`. Unknown channels are a no-op.
    pub async fn close(&self, channel: ChannelId, actor: UserId) -> Result<RelayOutcome> {
        let Some(participant) = self.registry.lookup_participant(channel) else {
            return Ok(RelayOutcome::Ignored);
        };

        self.registry.remove(participant);
        match self.platform.delete_channel(channel).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }

        tracing::info!(participant = %participant, channel = %channel, actor = %actor, "ticket closed");
        self.audit
            .record(AuditEvent::ticket_closed(participant, channel, Some(actor)));
        self.sink
            .notify(Notice::ticket_closed(participant, channel), Urgency::Normal)
            .await;

        Ok(RelayOutcome::Closed {
            participant,
            channel,
        })
    }

    /// Send staff text from `channel` to the ticket's participant.
    ///
    /// `staff_message` is reacted to on success; slash-command replies have none.
    pub async fn reply(
        &self,
        channel: ChannelId,
        actor: UserId,
        text: &str,
        attachments: &[Attachment],
        staff_message: Option<MessageRef>,
    ) -> Result<RelayOutcome> {
        let Some(participant) = self.registry.lookup_participant(channel) else {
            return Ok(RelayOutcome::Ignored);
        };
        let text = text.trim();
        if text.is_empty() && attachments.is_empty() {
            return Ok(RelayOutcome::Ignored);
        }

        match self
            .platform
            .send_direct_message(participant, text, attachments)
            .await
        {
            Ok(_) => {
                if let Some(m) = staff_message {
                    if let Err(e) = self.platform.react(m, REACT_DELIVERED).await {
                        tracing::warn!(channel = %channel, "failed to react to staff reply: {e}");
                    }
                }
                self.audit
                    .record(AuditEvent::staff_reply(participant, channel, actor, text));
                Ok(RelayOutcome::Replied { participant })
            }
            Err(e) => {
                tracing::warn!(participant = %participant, channel = %channel, "staff reply not delivered: {e}");
                let notice = undelivered_notice(participant, &e);
                if let Err(e2) = self.platform.send_message(channel, &notice, &[]).await {
                    tracing::warn!(channel = %channel, "failed to post delivery notice: {e2}");
                }
                self.audit.record(AuditEvent::reply_failed(
                    participant,
                    channel,
                    &e.to_string(),
                ));
                Ok(RelayOutcome::ReplyUndelivered { participant })
            }
        }
    }

    /// A channel was deleted on the platform. Drops the ticket it carried, if any.
    pub async fn handle_channel_deleted(&self, channel: ChannelId) -> RelayOutcome {
        let Some(participant) = self.registry.remove_channel(channel) else {
            return RelayOutcome::Ignored;
        };
        tracing::info!(participant = %participant, channel = %channel, "relay channel deleted out of band");
        self.audit
            .record(AuditEvent::ticket_closed(participant, channel, None));
        self.sink
            .notify(Notice::ticket_closed(participant, channel), Urgency::Normal)
            .await;
        RelayOutcome::Closed {
            participant,
            channel,
        }
    }

    async fn open_ticket(&self, author: &Identity) -> Result<ChannelId> {
        // Dropped on any early return below, which releases the slot.
        let reservation = self.registry.reserve(author.id)?;

        let name = relay_channel_name(&self.settings.channel_prefix, &author.username);
        let channel = self
            .platform
            .create_relay_channel(&name, self.settings.ticket_category_id)
            .await?;

        if let Err(e) = reservation.commit(channel) {
            if let Err(e2) = self.platform.delete_channel(channel).await {
                tracing::warn!(channel = %channel, "failed to remove orphaned relay channel: {e2}");
            }
            return Err(e.into());
        }
        tracing::info!(participant = %author.id, channel = %channel, "ticket opened");

        if let Err(e) = self
            .platform
            .send_message(channel, &announcement(author), &[])
            .await
        {
            tracing::warn!(channel = %channel, "failed to announce ticket: {e}");
        }
        if let Err(e) = self
            .platform
            .send_direct_message(author.id, ACK_CONNECTED, &[])
            .await
        {
            tracing::warn!(participant = %author.id, "failed to acknowledge ticket: {e}");
        }

        self.audit
            .record(AuditEvent::ticket_opened(author.id, channel));
        self.sink
            .notify(Notice::ticket_opened(author, channel), Urgency::Normal)
            .await;

        Ok(channel)
    }

    async fn forward(&self, channel: ChannelId, msg: &PrivateMessage) -> Result<()> {
        let text = format_forward(&msg.author.identity, &msg.content);
        self.platform
            .send_message(channel, &text, &msg.attachments)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        domain::MessageId,
        messaging::types::Author,
        registry::TicketState,
        testing::{identity, FakePlatform, BOT_USER, GUILD_CATEGORY, LOG_CHANNEL},
    };
    use std::time::Duration;

    const STAFF: UserId = UserId(42);

    fn router(platform: &Arc<FakePlatform>) -> RelayRouter {
        RelayRouter::new(
            TicketRegistry::new(),
            platform.clone(),
            NotificationSink::new(platform.clone(), LOG_CHANNEL),
            AuditLogger::disabled(),
            RelaySettings::new(GUILD_CATEGORY),
        )
    }

    fn dm(user: u64, name: &str, text: &str) -> PrivateMessage {
        PrivateMessage {
            author: Author {
                identity: identity(user, name),
                is_bot: false,
            },
            content: text.to_string(),
            attachments: vec![],
            message: MessageRef {
                channel_id: ChannelId(user + 500_000),
                message_id: MessageId(1),
            },
        }
    }

    fn staff_says(channel: ChannelId, text: &str) -> ChannelMessage {
        ChannelMessage {
            channel_id: channel,
            author: Author {
                identity: identity(STAFF.0, "staffer"),
                is_bot: false,
            },
            content: text.to_string(),
            attachments: vec![],
            message: MessageRef {
                channel_id: channel,
                message_id: MessageId(77),
            },
            is_self: false,
        }
    }

    #[test]
    fn parses_commands_case_insensitively() {
        let s = RelaySettings::new(GUILD_CATEGORY);
        assert_eq!(parse_staff_command("!close", &s), Some(StaffCommand::Close));
        assert_eq!(parse_staff_command("!CLOSE now", &s), Some(StaffCommand::Close));
        assert_eq!(
            parse_staff_command("!r  we can help  ", &s),
            Some(StaffCommand::Reply("we can help"))
        );
        assert_eq!(
            parse_staff_command("!R hi", &s),
            Some(StaffCommand::Reply("hi"))
        );
        assert_eq!(parse_staff_command("!r", &s), Some(StaffCommand::Reply("")));
    }

    #[test]
    fn ignores_lookalike_commands() {
        let s = RelaySettings::new(GUILD_CATEGORY);
        assert_eq!(parse_staff_command("!rules", &s), None);
        assert_eq!(parse_staff_command("!closed", &s), None);
        assert_eq!(parse_staff_command("please !close", &s), None);
        assert_eq!(parse_staff_command("just chatting", &s), None);
        assert_eq!(parse_staff_command("", &s), None);
        assert_eq!(parse_staff_command("é", &s), None);
    }

    #[test]
    fn channel_names_follow_discord_rules() {
        assert_eq!(relay_channel_name("ticket", "U1"), "ticket-u1");
        assert_eq!(relay_channel_name("ticket", "john.doe"), "ticket-john-doe");
        assert_eq!(relay_channel_name("ticket", "Ünïcode  !!"), "ticket-n-code");
        assert_eq!(relay_channel_name("", "!!!"), "ticket");
        assert_eq!(relay_channel_name("ticket", &"a".repeat(300)).len(), 100);
    }

    #[tokio::test]
    async fn first_message_opens_ticket_and_forwards() {
        let platform = Arc::new(FakePlatform::new());
        let r = router(&platform);

        let out = r.handle_private_message(&dm(7, "alice", "help")).await.unwrap();
        let RelayOutcome::Opened { channel } = out else {
            panic!("expected Opened, got {out:?}");
        };

        assert_eq!(platform.created(), vec![(channel, "ticket-alice".to_string(), GUILD_CATEGORY)]);
        assert_eq!(r.registry().lookup_channel(UserId(7)), Some(channel));

        let in_channel = platform.sent_to(channel);
        assert_eq!(in_channel.len(), 2);
        assert!(in_channel[0].starts_with("@here"));
        assert_eq!(in_channel[1], "alice: help");
        assert_eq!(platform.dms_to(UserId(7)), vec![ACK_CONNECTED.to_string()]);

        let notices = platform.notices();
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].1.title, "Ticket Opened");
    }

    #[tokio::test]
    async fn open_ticket_forwards_exactly_once() {
        let platform = Arc::new(FakePlatform::new());
        let r = router(&platform);
        let RelayOutcome::Opened { channel } =
            r.handle_private_message(&dm(7, "alice", "first")).await.unwrap()
        else {
            panic!("expected a new ticket");
        };
        let before = platform.sent_to(channel).len();

        let mut msg = dm(7, "alice", "second");
        msg.attachments.push(Attachment {
            filename: "log.txt".to_string(),
            url: "https://cdn.example/log.txt".to_string(),
        });
        let out = r.handle_private_message(&msg).await.unwrap();

        assert_eq!(out, RelayOutcome::Forwarded { channel });
        assert_eq!(platform.created().len(), 1);
        let sent = platform.sent.lock().unwrap().clone();
        let forwarded: Vec<_> = sent.iter().skip(before).collect();
        assert_eq!(forwarded.len(), 1);
        assert_eq!(forwarded[0].1, "alice: second");
        assert_eq!(forwarded[0].2.len(), 1);
    }

    #[tokio::test]
    async fn bot_dms_are_ignored() {
        let platform = Arc::new(FakePlatform::new());
        let r = router(&platform);
        let mut msg = dm(BOT_USER.0, "modmail", "✅ Connected to support");
        msg.author.is_bot = true;

        assert_eq!(r.handle_private_message(&msg).await.unwrap(), RelayOutcome::Ignored);
        assert!(platform.created().is_empty());
    }

    #[tokio::test]
    async fn concurrent_first_contact_opens_one_ticket() {
        let platform = Arc::new(FakePlatform::new());
        platform.slow_channel_creation(Duration::from_millis(50));
        let r = router(&platform);

        let (m1, m2) = (dm(7, "alice", "one"), dm(7, "alice", "two"));
        let (a, b) = tokio::join!(
            r.handle_private_message(&m1),
            r.handle_private_message(&m2),
        );
        let (a, b) = (a.unwrap(), b.unwrap());

        assert_eq!(platform.created().len(), 1);
        assert_eq!(r.registry().len(), 1);
        let channel = r.registry().lookup_channel(UserId(7)).unwrap();
        assert_eq!(a, RelayOutcome::Opened { channel });
        assert_eq!(b, RelayOutcome::Forwarded { channel });

        let forwarded: Vec<_> = platform
            .sent_to(channel)
            .into_iter()
            .filter(|m| m.starts_with("alice:"))
            .collect();
        assert_eq!(forwarded, vec!["alice: one", "alice: two"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_first_contact_across_threads() {
        let platform = Arc::new(FakePlatform::new());
        platform.slow_channel_creation(Duration::from_millis(20));
        let r = Arc::new(router(&platform));

        let mut handles = Vec::new();
        for i in 0..8 {
            for user in [7u64, 8u64] {
                let r = r.clone();
                handles.push(tokio::spawn(async move {
                    r.handle_private_message(&dm(user, &format!("user{user}"), &format!("m{i}")))
                        .await
                }));
            }
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }

        assert_eq!(platform.created().len(), 2);
        assert_eq!(r.registry().len(), 2);
        let c7 = r.registry().lookup_channel(UserId(7)).unwrap();
        let c8 = r.registry().lookup_channel(UserId(8)).unwrap();
        assert_ne!(c7, c8);
        assert_eq!(
            platform.sent_to(c7).iter().filter(|m| m.starts_with("user7:")).count(),
            8
        );
    }

    #[tokio::test]
    async fn close_removes_ticket_and_channel() {
        let platform = Arc::new(FakePlatform::new());
        let r = router(&platform);
        let RelayOutcome::Opened { channel } =
            r.handle_private_message(&dm(7, "alice", "hi")).await.unwrap()
        else {
            panic!("expected a new ticket");
        };

        let out = r.handle_channel_message(&staff_says(channel, "!close")).await.unwrap();

        assert_eq!(
            out,
            RelayOutcome::Closed {
                participant: UserId(7),
                channel
            }
        );
        assert!(r.registry().is_empty());
        assert_eq!(platform.deleted(), vec![channel]);
    }

    #[tokio::test]
    async fn close_is_idempotent_and_ignores_foreign_channels() {
        let platform = Arc::new(FakePlatform::new());
        let r = router(&platform);

        assert_eq!(
            r.close(ChannelId(12345), STAFF).await.unwrap(),
            RelayOutcome::Ignored
        );

        let RelayOutcome::Opened { channel } =
            r.handle_private_message(&dm(7, "alice", "hi")).await.unwrap()
        else {
            panic!("expected a new ticket");
        };
        r.close(channel, STAFF).await.unwrap();
        assert_eq!(r.close(channel, STAFF).await.unwrap(), RelayOutcome::Ignored);
        assert_eq!(platform.deleted(), vec![channel]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_reopen_after_close_opens_one_ticket() {
        let platform = Arc::new(FakePlatform::new());
        platform.slow_channel_creation(Duration::from_millis(20));
        let r = Arc::new(router(&platform));
        let RelayOutcome::Opened { channel: first } =
            r.handle_private_message(&dm(7, "alice", "hi")).await.unwrap()
        else {
            panic!("expected a new ticket");
        };
        r.close(first, STAFF).await.unwrap();

        let mut handles = Vec::new();
        for i in 0..6 {
            let r = r.clone();
            handles.push(tokio::spawn(async move {
                r.handle_private_message(&dm(7, "alice", &format!("again {i}")))
                    .await
            }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }

        assert_eq!(platform.created().len(), 2);
        assert_eq!(r.registry().len(), 1);
        let second = r.registry().lookup_channel(UserId(7)).unwrap();
        assert_ne!(first, second);
    }

    #[tokio::test]
    async fn close_tolerates_channel_already_gone() {
        let platform = Arc::new(FakePlatform::new());
        let r = router(&platform);
        let RelayOutcome::Opened { channel } =
            r.handle_private_message(&dm(7, "alice", "hi")).await.unwrap()
        else {
            panic!("expected a new ticket");
        };
        platform.delete_out_of_band(channel);

        assert_eq!(
            r.close(channel, STAFF).await.unwrap(),
            RelayOutcome::Closed {
                participant: UserId(7),
                channel
            }
        );
        assert!(r.registry().is_empty());
    }

    #[tokio::test]
    async fn close_surfaces_other_delete_failures() {
        let platform = Arc::new(FakePlatform::new());
        let r = router(&platform);
        let RelayOutcome::Opened { channel } =
            r.handle_private_message(&dm(7, "alice", "hi")).await.unwrap()
        else {
            panic!("expected a new ticket");
        };
        platform.fail_deletes_with(|| Error::Permission("missing permissions".to_string()));

        let err = r.close(channel, STAFF).await.unwrap_err();
        assert!(matches!(err, Error::Permission(_)));
        // The ticket is gone even though the channel stays behind.
        assert!(r.registry().is_empty());
    }

    #[tokio::test]
    async fn long_dm_is_forwarded_in_one_send() {
        let platform = Arc::new(FakePlatform::new());
        let r = router(&platform);
        let RelayOutcome::Opened { channel } =
            r.handle_private_message(&dm(7, "alice", "hi")).await.unwrap()
        else {
            panic!("expected a new ticket");
        };
        let before = platform.sent_to(channel).len();

        let long = "x".repeat(3900);
        r.handle_private_message(&dm(7, "alice", &long)).await.unwrap();

        let sent = platform.sent_to(channel);
        assert_eq!(sent.len(), before + 1);
        assert_eq!(sent.last().unwrap(), &format!("alice: {long}"));
    }

    #[tokio::test]
    async fn reopen_after_close_uses_fresh_channel() {
        let platform = Arc::new(FakePlatform::new());
        let r = router(&platform);
        let RelayOutcome::Opened { channel: first } =
            r.handle_private_message(&dm(7, "alice", "hi")).await.unwrap()
        else {
            panic!("expected a new ticket");
        };
        r.close(first, STAFF).await.unwrap();

        let out = r.handle_private_message(&dm(7, "alice", "me again")).await.unwrap();
        let RelayOutcome::Opened { channel: second } = out else {
            panic!("expected a second ticket, got {out:?}");
        };
        assert_ne!(first, second);
        assert_eq!(r.registry().lookup_channel(UserId(7)), Some(second));
        assert_eq!(r.registry().lookup_participant(first), None);
    }

    #[tokio::test]
    async fn reply_reaches_participant_and_reacts() {
        let platform = Arc::new(FakePlatform::new());
        let r = router(&platform);
        let RelayOutcome::Opened { channel } =
            r.handle_private_message(&dm(7, "alice", "hi")).await.unwrap()
        else {
            panic!("expected a new ticket");
        };

        let msg = staff_says(channel, "!r   we can help ");
        let out = r.handle_channel_message(&msg).await.unwrap();

        assert_eq!(out, RelayOutcome::Replied { participant: UserId(7) });
        assert_eq!(platform.dms_to(UserId(7)).last().unwrap(), "we can help");
        assert_eq!(
            platform.reactions(),
            vec![(msg.message, REACT_DELIVERED.to_string())]
        );
    }

    #[tokio::test]
    async fn undeliverable_reply_is_reported_in_channel() {
        let platform = Arc::new(FakePlatform::new());
        let r = router(&platform);
        let RelayOutcome::Opened { channel } =
            r.handle_private_message(&dm(7, "alice", "hi")).await.unwrap()
        else {
            panic!("expected a new ticket");
        };
        platform.close_inbox(UserId(7));

        let out = r
            .handle_channel_message(&staff_says(channel, "!r hello?"))
            .await
            .unwrap();

        assert_eq!(out, RelayOutcome::ReplyUndelivered { participant: UserId(7) });
        let last = platform.sent_to(channel).pop().unwrap();
        assert!(last.starts_with("⚠️ Reply not delivered"));
        assert!(platform.reactions().is_empty());
        assert_eq!(r.registry().lookup_channel(UserId(7)), Some(channel));
    }

    #[tokio::test]
    async fn chatter_and_bot_posts_in_relay_channel_are_not_forwarded() {
        let platform = Arc::new(FakePlatform::new());
        let r = router(&platform);
        let RelayOutcome::Opened { channel } =
            r.handle_private_message(&dm(7, "alice", "hi")).await.unwrap()
        else {
            panic!("expected a new ticket");
        };
        let dms_before = platform.dms_to(UserId(7)).len();

        let chatter = staff_says(channel, "anyone know this user?");
        assert_eq!(r.handle_channel_message(&chatter).await.unwrap(), RelayOutcome::Ignored);

        let mut own = staff_says(channel, "!r echo");
        own.is_self = true;
        assert_eq!(r.handle_channel_message(&own).await.unwrap(), RelayOutcome::Ignored);

        let empty = staff_says(channel, "!r   ");
        assert_eq!(r.handle_channel_message(&empty).await.unwrap(), RelayOutcome::Ignored);

        assert_eq!(platform.dms_to(UserId(7)).len(), dms_before);
    }

    #[tokio::test]
    async fn commands_outside_relay_channels_do_nothing() {
        let platform = Arc::new(FakePlatform::new());
        let r = router(&platform);

        let out = r
            .handle_channel_message(&staff_says(ChannelId(5), "!r hi"))
            .await
            .unwrap();
        assert_eq!(out, RelayOutcome::Ignored);
        let out = r
            .handle_channel_message(&staff_says(ChannelId(5), "!close"))
            .await
            .unwrap();
        assert_eq!(out, RelayOutcome::Ignored);
        assert!(platform.deleted().is_empty());
    }

    #[tokio::test]
    async fn failed_provisioning_releases_the_slot() {
        let platform = Arc::new(FakePlatform::new());
        platform.remove_category(GUILD_CATEGORY);
        let r = router(&platform);

        let err = r
            .handle_private_message(&dm(7, "alice", "hi"))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(r.registry().state(UserId(7)), None);
        assert!(platform.dms_to(UserId(7)).is_empty());
    }

    #[tokio::test]
    async fn stale_channel_is_replaced_on_next_message() {
        let platform = Arc::new(FakePlatform::new());
        let r = router(&platform);
        let RelayOutcome::Opened { channel: first } =
            r.handle_private_message(&dm(7, "alice", "hi")).await.unwrap()
        else {
            panic!("expected a new ticket");
        };
        platform.delete_out_of_band(first);

        let out = r.handle_private_message(&dm(7, "alice", "still there?")).await.unwrap();
        let RelayOutcome::Opened { channel: second } = out else {
            panic!("expected a replacement ticket, got {out:?}");
        };
        assert_ne!(first, second);
        assert_eq!(r.registry().lookup_participant(first), None);
        assert_eq!(platform.sent_to(second).last().unwrap(), "alice: still there?");
    }

    #[tokio::test]
    async fn channel_delete_event_drops_mapping() {
        let platform = Arc::new(FakePlatform::new());
        let r = router(&platform);
        let RelayOutcome::Opened { channel } =
            r.handle_private_message(&dm(7, "alice", "hi")).await.unwrap()
        else {
            panic!("expected a new ticket");
        };

        assert_eq!(
            r.handle_channel_deleted(channel).await,
            RelayOutcome::Closed {
                participant: UserId(7),
                channel
            }
        );
        assert_eq!(r.registry().state(UserId(7)), None);
        assert_eq!(r.handle_channel_deleted(channel).await, RelayOutcome::Ignored);
    }

    #[tokio::test]
    async fn support_conversation_end_to_end() {
        let platform = Arc::new(FakePlatform::new());
        let r = router(&platform);

        let out = r.handle_private_message(&dm(101, "U1", "help")).await.unwrap();
        let RelayOutcome::Opened { channel } = out else {
            panic!("expected Opened, got {out:?}");
        };
        assert_eq!(platform.created()[0].1, "ticket-u1");
        assert!(matches!(
            r.registry().state(UserId(101)),
            Some(TicketState::Open { channel_id, .. }) if channel_id == channel
        ));
        assert!(platform.sent_to(channel).contains(&"U1: help".to_string()));

        r.handle_channel_message(&staff_says(channel, "!r we can help"))
            .await
            .unwrap();
        assert_eq!(platform.dms_to(UserId(101)).last().unwrap(), "we can help");

        r.handle_channel_message(&staff_says(channel, "!close"))
            .await
            .unwrap();
        assert_eq!(r.registry().state(UserId(101)), None);
        assert_eq!(platform.deleted(), vec![channel]);
    }
}
