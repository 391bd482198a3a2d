use async_trait::async_trait;

use crate::{
    domain::{Attachment, ChannelId, Identity, Member, MessageRef, UserId},
    notify::Notice,
    Result,
};

/// Outbound half of the platform.
///
/// Discord is the only implementation; everything in `modmail-core` talks to the platform
/// through this trait so the relay can be driven without a network in tests.
#[async_trait]
pub trait PlatformPort: Send + Sync {
    /// Create a text channel under `parent` (a category).
    async fn create_relay_channel(&self, name: &str, parent: ChannelId) -> Result<ChannelId>;

    async fn delete_channel(&self, channel: ChannelId) -> Result<()>;

    async fn send_message(
        &self,
        channel: ChannelId,
        content: &str,
        attachments: &[Attachment],
    ) -> Result<MessageRef>;

    /// Message a user in private. Fails with `Error::Delivery` when their inbox is closed.
    async fn send_direct_message(
        &self,
        user: UserId,
        content: &str,
        attachments: &[Attachment],
    ) -> Result<MessageRef>;

    async fn react(&self, message: MessageRef, symbol: &str) -> Result<()>;

    async fn fetch_identity(&self, user: UserId) -> Result<Identity>;

    /// Post a structured notice (embed). `ping` adds an `@here` mention.
    async fn send_notice(&self, channel: ChannelId, notice: &Notice, ping: bool)
        -> Result<MessageRef>;

    /// Find a guild text channel by exact name.
    async fn find_text_channel(&self, name: &str) -> Result<Option<ChannelId>>;

    async fn list_members(&self) -> Result<Vec<Member>>;
}
