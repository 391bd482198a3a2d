//! In-memory `PlatformPort` shared by the unit tests.

use std::{
    collections::{HashMap, HashSet},
    sync::{
        atomic::{AtomicU64, Ordering},
        Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
    domain::{Attachment, ChannelId, Identity, Member, MessageId, MessageRef, UserId},
    messaging::port::PlatformPort,
    notify::Notice,
    Error, Result,
};

pub const GUILD_CATEGORY: ChannelId = ChannelId(900);
pub const LOG_CHANNEL: ChannelId = ChannelId(901);
pub const BOT_USER: UserId = UserId(1);

pub fn identity(id: u64, username: &str) -> Identity {
    Identity {
        id: UserId(id),
        username: username.to_string(),
        display_name: username.to_string(),
        tag: username.to_string(),
    }
}

pub fn member(id: u64, username: &str, created_at: DateTime<Utc>) -> Member {
    Member {
        identity: identity(id, username),
        account_created_at: created_at,
        is_bot: false,
    }
}

#[derive(Default)]
pub struct FakePlatform {
    next_id: AtomicU64,
    create_delay: Mutex<Option<Duration>>,

    pub created: Mutex<Vec<(ChannelId, String, ChannelId)>>,
    pub deleted: Mutex<Vec<ChannelId>>,
    pub sent: Mutex<Vec<(ChannelId, String, Vec<Attachment>)>>,
    pub dms: Mutex<Vec<(UserId, String, Vec<Attachment>)>>,
    pub reactions: Mutex<Vec<(MessageRef, String)>>,
    notices: Mutex<Vec<(ChannelId, Notice, bool)>>,

    identities: Mutex<HashMap<UserId, Identity>>,
    members: Mutex<Vec<Member>>,
    text_channels: Mutex<HashMap<String, ChannelId>>,
    closed_inboxes: Mutex<HashSet<UserId>>,
    missing_categories: Mutex<HashSet<ChannelId>>,
    notice_failure: Mutex<Option<fn() -> Error>>,
    delete_failure: Mutex<Option<fn() -> Error>>,
}

impl FakePlatform {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1000),
            ..Default::default()
        }
    }

    fn alloc(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Make `create_relay_channel` suspend for `d` before answering.
    pub fn slow_channel_creation(&self, d: Duration) {
        *self.create_delay.lock().unwrap() = Some(d);
    }

    pub fn add_identity(&self, identity: Identity) {
        self.identities
            .lock()
            .unwrap()
            .insert(identity.id, identity);
    }

    pub fn add_member(&self, member: Member) {
        self.add_identity(member.identity.clone());
        self.members.lock().unwrap().push(member);
    }

    pub fn add_text_channel(&self, name: &str, id: ChannelId) {
        self.text_channels
            .lock()
            .unwrap()
            .insert(name.to_string(), id);
    }

    pub fn close_inbox(&self, user: UserId) {
        self.closed_inboxes.lock().unwrap().insert(user);
    }

    pub fn remove_category(&self, category: ChannelId) {
        self.missing_categories.lock().unwrap().insert(category);
    }

    /// Delete a channel behind the bot's back.
    pub fn delete_out_of_band(&self, channel: ChannelId) {
        self.deleted.lock().unwrap().push(channel);
    }

    pub fn fail_notices_with(&self, f: fn() -> Error) {
        *self.notice_failure.lock().unwrap() = Some(f);
    }

    pub fn fail_deletes_with(&self, f: fn() -> Error) {
        *self.delete_failure.lock().unwrap() = Some(f);
    }

    pub fn created(&self) -> Vec<(ChannelId, String, ChannelId)> {
        self.created.lock().unwrap().clone()
    }

    pub fn sent_to(&self, channel: ChannelId) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|(c, _, _)| *c == channel)
            .map(|(_, text, _)| text.clone())
            .collect()
    }

    pub fn dms_to(&self, user: UserId) -> Vec<String> {
        self.dms
            .lock()
            .unwrap()
            .iter()
            .filter(|(u, _, _)| *u == user)
            .map(|(_, text, _)| text.clone())
            .collect()
    }

    pub fn deleted(&self) -> Vec<ChannelId> {
        self.deleted.lock().unwrap().clone()
    }

    pub fn reactions(&self) -> Vec<(MessageRef, String)> {
        self.reactions.lock().unwrap().clone()
    }

    pub fn notices(&self) -> Vec<(ChannelId, Notice, bool)> {
        self.notices.lock().unwrap().clone()
    }

    fn is_deleted(&self, channel: ChannelId) -> bool {
        self.deleted.lock().unwrap().contains(&channel)
    }
}

#[async_trait]
impl PlatformPort for FakePlatform {
    async fn create_relay_channel(&self, name: &str, parent: ChannelId) -> Result<ChannelId> {
        let delay = *self.create_delay.lock().unwrap();
        if let Some(d) = delay {
            tokio::time::sleep(d).await;
        }
        if self.missing_categories.lock().unwrap().contains(&parent) {
            return Err(Error::NotFound(format!("category {parent}")));
        }
        let id = ChannelId(self.alloc());
        self.created
            .lock()
            .unwrap()
            .push((id, name.to_string(), parent));
        Ok(id)
    }

    async fn delete_channel(&self, channel: ChannelId) -> Result<()> {
        let failure = *self.delete_failure.lock().unwrap();
        if let Some(f) = failure {
            return Err(f());
        }
        if self.is_deleted(channel) {
            return Err(Error::NotFound(format!("channel {channel}")));
        }
        self.deleted.lock().unwrap().push(channel);
        Ok(())
    }

    async fn send_message(
        &self,
        channel: ChannelId,
        content: &str,
        attachments: &[Attachment],
    ) -> Result<MessageRef> {
        if self.is_deleted(channel) {
            return Err(Error::NotFound(format!("channel {channel}")));
        }
        self.sent
            .lock()
            .unwrap()
            .push((channel, content.to_string(), attachments.to_vec()));
        Ok(MessageRef {
            channel_id: channel,
            message_id: MessageId(self.alloc()),
        })
    }

    async fn send_direct_message(
        &self,
        user: UserId,
        content: &str,
        attachments: &[Attachment],
    ) -> Result<MessageRef> {
        if self.closed_inboxes.lock().unwrap().contains(&user) {
            return Err(Error::Delivery(format!("cannot send messages to user {user}")));
        }
        self.dms
            .lock()
            .unwrap()
            .push((user, content.to_string(), attachments.to_vec()));
        Ok(MessageRef {
            channel_id: ChannelId(user.0 + 500_000),
            message_id: MessageId(self.alloc()),
        })
    }

    async fn react(&self, message: MessageRef, symbol: &str) -> Result<()> {
        self.reactions
            .lock()
            .unwrap()
            .push((message, symbol.to_string()));
        Ok(())
    }

    async fn fetch_identity(&self, user: UserId) -> Result<Identity> {
        Ok(self
            .identities
            .lock()
            .unwrap()
            .get(&user)
            .cloned()
            .unwrap_or_else(|| identity(user.0, &format!("user{}", user.0))))
    }

    async fn send_notice(
        &self,
        channel: ChannelId,
        notice: &Notice,
        ping: bool,
    ) -> Result<MessageRef> {
        let failure = *self.notice_failure.lock().unwrap();
        if let Some(f) = failure {
            return Err(f());
        }
        self.notices
            .lock()
            .unwrap()
            .push((channel, notice.clone(), ping));
        Ok(MessageRef {
            channel_id: channel,
            message_id: MessageId(self.alloc()),
        })
    }

    async fn find_text_channel(&self, name: &str) -> Result<Option<ChannelId>> {
        Ok(self.text_channels.lock().unwrap().get(name).copied())
    }

    async fn list_members(&self) -> Result<Vec<Member>> {
        Ok(self.members.lock().unwrap().clone())
    }
}
