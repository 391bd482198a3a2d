//! Discord adapter (serenity).
//!
//! This crate implements the `modmail-core` PlatformPort over the Discord HTTP API and
//! feeds gateway events into `modmail_core::app::Bot`.

use std::sync::Arc;

use async_trait::async_trait;

use serenity::{
    builder::{CreateChannel, CreateEmbed, CreateMessage},
    http::{Http, HttpError},
    model::{
        channel::{ChannelType, ReactionType},
        id::{
            ChannelId as DcChannelId, GuildId, MessageId as DcMessageId, UserId as DcUserId,
        },
        user::User,
        Timestamp,
    },
};

pub mod commands;
pub mod handler;

pub use handler::run;

use modmail_core::{
    domain::{Attachment, ChannelId, Identity, Member, MessageId, MessageRef, UserId},
    errors::Error,
    messaging::port::PlatformPort,
    notify::Notice,
    Result,
};

/// Discord's hard limit on message content.
pub const MAX_MESSAGE_LEN: usize = 2000;
const MEMBER_PAGE: u64 = 1000;

// JSON error codes from the Discord API reference.
const UNKNOWN_CHANNEL: isize = 10003;
const UNKNOWN_MESSAGE: isize = 10008;
const UNKNOWN_USER: isize = 10013;
const MISSING_ACCESS: isize = 50001;
const CANNOT_MESSAGE_USER: isize = 50007;
const MISSING_PERMISSIONS: isize = 50013;

#[derive(Clone)]
pub struct DiscordPlatform {
    http: Arc<Http>,
    guild_id: GuildId,
}

impl DiscordPlatform {
    pub fn new(http: Arc<Http>, guild_id: GuildId) -> Self {
        Self { http, guild_id }
    }

    fn dc_channel(channel: ChannelId) -> DcChannelId {
        DcChannelId::new(channel.0)
    }

    fn dc_user(user: UserId) -> DcUserId {
        DcUserId::new(user.0)
    }

    fn map_err(e: serenity::Error) -> Error {
        match &e {
            serenity::Error::Http(http) => map_http_err(http),
            _ => Error::External(format!("discord error: {e}")),
        }
    }

    async fn send_chunks(
        &self,
        channel: DcChannelId,
        content: &str,
        attachments: &[Attachment],
    ) -> Result<MessageRef> {
        let text = with_attachment_links(content, attachments);
        let mut first = None;
        for chunk in split_message(&text, MAX_MESSAGE_LEN) {
            let msg = channel
                .send_message(&self.http, CreateMessage::new().content(chunk))
                .await
                .map_err(Self::map_err)?;
            first.get_or_insert(MessageRef {
                channel_id: ChannelId(msg.channel_id.get()),
                message_id: MessageId(msg.id.get()),
            });
        }
        first.ok_or_else(|| Error::External("refusing to send an empty message".to_string()))
    }
}

fn map_http_err(e: &HttpError) -> Error {
    match e {
        HttpError::UnsuccessfulRequest(resp) => {
            error_for_code(resp.error.code, &resp.error.message)
        }
        other => Error::External(format!("discord http error: {other}")),
    }
}

/// Map a Discord JSON error code onto the core error kinds handlers branch on.
pub fn error_for_code(code: isize, message: &str) -> Error {
    let detail = format!("{message} (code {code})");
    match code {
        UNKNOWN_CHANNEL | UNKNOWN_MESSAGE | UNKNOWN_USER => Error::NotFound(detail),
        CANNOT_MESSAGE_USER => Error::Delivery(detail),
        MISSING_ACCESS | MISSING_PERMISSIONS => Error::Permission(detail),
        _ => Error::External(format!("discord api error: {detail}")),
    }
}

/// Attachments are forwarded by URL, one per line after the text.
pub fn with_attachment_links(content: &str, attachments: &[Attachment]) -> String {
    let mut out = content.to_string();
    for a in attachments {
        if !out.is_empty() {
            out.push('\n');
        }
        out.push_str(&a.url);
    }
    out
}

/// Split text into chunks of at most `max` chars, preferring line boundaries.
pub fn split_message(text: &str, max: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0usize;

    for line in text.split_inclusive('\n') {
        let line_len = line.chars().count();
        if current_len + line_len <= max {
            current.push_str(line);
            current_len += line_len;
            continue;
        }
        if !current.is_empty() {
            chunks.push(std::mem::take(&mut current));
            current_len = 0;
        }
        if line_len <= max {
            current.push_str(line);
            current_len = line_len;
            continue;
        }
        // A single line longer than the limit: hard split.
        let chars: Vec<char> = line.chars().collect();
        for piece in chars.chunks(max) {
            chunks.push(piece.iter().collect());
        }
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks.retain(|c| !c.trim().is_empty());
    chunks
}

pub fn identity_of(user: &User) -> Identity {
    Identity {
        id: UserId(user.id.get()),
        username: user.name.clone(),
        display_name: user.global_name.clone().unwrap_or_else(|| user.name.clone()),
        tag: user.tag(),
    }
}

pub fn member_of(user: &User) -> Member {
    let id = UserId(user.id.get());
    Member {
        identity: identity_of(user),
        account_created_at: id.created_at(),
        is_bot: user.bot,
    }
}

fn embed_of(notice: &Notice) -> CreateEmbed {
    let mut embed = CreateEmbed::new()
        .title(notice.title.clone())
        .color(notice.color);
    if let Some(d) = &notice.description {
        embed = embed.description(d.clone());
    }
    for f in &notice.fields {
        embed = embed.field(f.name.clone(), f.value.clone(), true);
    }
    if let Ok(ts) = Timestamp::from_unix_timestamp(notice.timestamp.timestamp()) {
        embed = embed.timestamp(ts);
    }
    embed
}

#[async_trait]
impl PlatformPort for DiscordPlatform {
    async fn create_relay_channel(&self, name: &str, parent: ChannelId) -> Result<ChannelId> {
        let builder = CreateChannel::new(name)
            .kind(ChannelType::Text)
            .category(Self::dc_channel(parent));
        let channel = self
            .guild_id
            .create_channel(&self.http, builder)
            .await
            .map_err(Self::map_err)?;
        Ok(ChannelId(channel.id.get()))
    }

    async fn delete_channel(&self, channel: ChannelId) -> Result<()> {
        Self::dc_channel(channel)
            .delete(&self.http)
            .await
            .map_err(Self::map_err)?;
        Ok(())
    }

    async fn send_message(
        &self,
        channel: ChannelId,
        content: &str,
        attachments: &[Attachment],
    ) -> Result<MessageRef> {
        self.send_chunks(Self::dc_channel(channel), content, attachments)
            .await
    }

    async fn send_direct_message(
        &self,
        user: UserId,
        content: &str,
        attachments: &[Attachment],
    ) -> Result<MessageRef> {
        let dm = Self::dc_user(user)
            .create_dm_channel(&self.http)
            .await
            .map_err(Self::map_err)?;
        self.send_chunks(dm.id, content, attachments).await
    }

    async fn react(&self, message: MessageRef, symbol: &str) -> Result<()> {
        Self::dc_channel(message.channel_id)
            .create_reaction(
                &self.http,
                DcMessageId::new(message.message_id.0),
                ReactionType::Unicode(symbol.to_string()),
            )
            .await
            .map_err(Self::map_err)
    }

    async fn fetch_identity(&self, user: UserId) -> Result<Identity> {
        let user = Self::dc_user(user)
            .to_user(&self.http)
            .await
            .map_err(Self::map_err)?;
        Ok(identity_of(&user))
    }

    async fn send_notice(
        &self,
        channel: ChannelId,
        notice: &Notice,
        ping: bool,
    ) -> Result<MessageRef> {
        let mut builder = CreateMessage::new().embed(embed_of(notice));
        if ping {
            builder = builder.content("@here");
        }
        let msg = Self::dc_channel(channel)
            .send_message(&self.http, builder)
            .await
            .map_err(Self::map_err)?;
        Ok(MessageRef {
            channel_id: channel,
            message_id: MessageId(msg.id.get()),
        })
    }

    async fn find_text_channel(&self, name: &str) -> Result<Option<ChannelId>> {
        let channels = self
            .guild_id
            .channels(&self.http)
            .await
            .map_err(Self::map_err)?;
        Ok(channels
            .values()
            .find(|c| c.kind == ChannelType::Text && c.name == name)
            .map(|c| ChannelId(c.id.get())))
    }

    async fn list_members(&self) -> Result<Vec<Member>> {
        let mut out = Vec::new();
        let mut after = None;
        loop {
            let page = self
                .guild_id
                .members(&self.http, Some(MEMBER_PAGE), after)
                .await
                .map_err(Self::map_err)?;
            let Some(last) = page.last() else {
                break;
            };
            after = Some(last.user.id);
            let full = page.len() as u64 == MEMBER_PAGE;
            out.extend(page.iter().map(|m| member_of(&m.user)));
            if !full {
                break;
            }
        }
        Ok(out)
    }
}
