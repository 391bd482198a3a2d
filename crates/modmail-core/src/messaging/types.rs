use crate::{
    commands::CommandInvocation,
    domain::{Attachment, ChannelId, Identity, Member, MessageRef, UserId},
};

/// Platform-neutral inbound event.
///
/// Discord-specific fields stay in the Discord adapter.
#[derive(Clone, Debug)]
pub enum InboundEvent {
    ParticipantJoined(Member),
    PrivateMessage(PrivateMessage),
    ChannelMessage(ChannelMessage),
    ChannelDeleted { channel_id: ChannelId },
    AdminCommand(CommandInvocation),
}

#[derive(Clone, Debug)]
pub struct Author {
    pub identity: Identity,
    /// Any automated identity (ours or another bot's).
    pub is_bot: bool,
}

impl Author {
    pub fn id(&self) -> UserId {
        self.identity.id
    }
}

/// A private message sent to the bot.
#[derive(Clone, Debug)]
pub struct PrivateMessage {
    pub author: Author,
    pub content: String,
    pub attachments: Vec<Attachment>,
    pub message: MessageRef,
}

/// A message posted in a guild channel.
#[derive(Clone, Debug)]
pub struct ChannelMessage {
    pub channel_id: ChannelId,
    pub author: Author,
    pub content: String,
    pub attachments: Vec<Attachment>,
    pub message: MessageRef,
    /// Authored by the bot itself.
    pub is_self: bool,
}

impl ChannelMessage {
    pub fn is_automated(&self) -> bool {
        self.is_self || self.author.is_bot
    }
}
