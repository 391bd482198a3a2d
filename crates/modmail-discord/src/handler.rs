use std::sync::Arc;

use serenity::{
    all::{
        Context, CreateInteractionResponse, CreateInteractionResponseMessage,
        EditInteractionResponse, EventHandler, GatewayIntents, GuildChannel, GuildId, Interaction,
        Message, Ready,
    },
    async_trait,
    http::Http,
    Client,
};

use modmail_core::{
    app::Bot,
    commands::{AdminCommand, CommandReply, REPLY_TICKET_CLOSED},
    config::Config,
    domain::{Attachment, ChannelId, MessageId, MessageRef},
    messaging::{
        port::PlatformPort,
        types::{Author, ChannelMessage, InboundEvent, PrivateMessage},
    },
};

use crate::{commands, identity_of, member_of, DiscordPlatform};

pub struct Handler {
    bot: Arc<Bot>,
    guild_id: GuildId,
    register_commands: bool,
}

impl Handler {
    pub fn new(bot: Arc<Bot>, guild_id: GuildId, register_commands: bool) -> Self {
        Self {
            bot,
            guild_id,
            register_commands,
        }
    }

    fn inbound_message(&self, ctx: &Context, msg: &Message) -> Option<InboundEvent> {
        let author = Author {
            identity: identity_of(&msg.author),
            is_bot: msg.author.bot,
        };
        let attachments = msg
            .attachments
            .iter()
            .map(|a| Attachment {
                filename: a.filename.clone(),
                url: a.url.clone(),
            })
            .collect();
        let message = MessageRef {
            channel_id: ChannelId(msg.channel_id.get()),
            message_id: MessageId(msg.id.get()),
        };

        match msg.guild_id {
            None => Some(InboundEvent::PrivateMessage(PrivateMessage {
                author,
                content: msg.content.clone(),
                attachments,
                message,
            })),
            Some(g) if g == self.guild_id => Some(InboundEvent::ChannelMessage(ChannelMessage {
                channel_id: message.channel_id,
                is_self: msg.author.id == ctx.cache.current_user().id,
                author,
                content: msg.content.clone(),
                attachments,
                message,
            })),
            Some(_) => None,
        }
    }
}

#[async_trait]
impl EventHandler for Handler {
    async fn ready(&self, ctx: Context, ready: Ready) {
        tracing::info!(user = %ready.user.name, guild = %self.guild_id, "connected to Discord");
        if !self.register_commands {
            return;
        }
        match self
            .guild_id
            .set_commands(&ctx.http, commands::definitions())
            .await
        {
            Ok(cmds) => tracing::info!(count = cmds.len(), "registered slash commands"),
            Err(e) => tracing::error!("failed to register slash commands: {e}"),
        }
    }

    async fn message(&self, ctx: Context, msg: Message) {
        if let Some(event) = self.inbound_message(&ctx, &msg) {
            self.bot.dispatch(event).await;
        }
    }

    async fn guild_member_addition(&self, _ctx: Context, new_member: serenity::all::Member) {
        if new_member.guild_id != self.guild_id {
            return;
        }
        self.bot
            .dispatch(InboundEvent::ParticipantJoined(member_of(&new_member.user)))
            .await;
    }

    async fn channel_delete(
        &self,
        _ctx: Context,
        channel: GuildChannel,
        _messages: Option<Vec<Message>>,
    ) {
        self.bot
            .dispatch(InboundEvent::ChannelDeleted {
                channel_id: ChannelId(channel.id.get()),
            })
            .await;
    }

    async fn interaction_create(&self, ctx: Context, interaction: Interaction) {
        let Interaction::Command(cmd) = interaction else {
            return;
        };

        let inv = match commands::invocation_of(&cmd) {
            Ok(inv) => inv,
            Err(reason) => {
                let response = CreateInteractionResponse::Message(
                    CreateInteractionResponseMessage::new()
                        .content(reason)
                        .ephemeral(true),
                );
                if let Err(e) = cmd.create_response(&ctx.http, response).await {
                    tracing::warn!("failed to answer interaction: {e}");
                }
                return;
            }
        };

        // Channel creation and member sweeps can outlast the 3s interaction window.
        let deferred = if inv.command.ephemeral() {
            cmd.defer_ephemeral(&ctx.http).await
        } else {
            cmd.defer(&ctx.http).await
        };
        if let Err(e) = deferred {
            tracing::warn!("failed to defer interaction: {e}");
            return;
        }

        let Some(reply) = self
            .bot
            .dispatch(InboundEvent::AdminCommand(inv.clone()))
            .await
        else {
            return;
        };
        let channel_gone = response_channel_gone(&inv.command, &reply);
        if let Err(e) = cmd
            .edit_response(&ctx.http, EditInteractionResponse::new().content(reply.content))
            .await
        {
            if channel_gone {
                tracing::debug!("close response dropped with its channel: {e}");
            } else {
                tracing::warn!("failed to send command response: {e}");
            }
        }
    }
}

/// A successful `/close` deletes the channel its deferred response lives in.
fn response_channel_gone(command: &AdminCommand, reply: &CommandReply) -> bool {
    matches!(command, AdminCommand::Close) && reply.content == REPLY_TICKET_CLOSED
}

/// Connect to the gateway and serve events until the client stops.
pub async fn run(cfg: Config) -> anyhow::Result<()> {
    let intents = GatewayIntents::GUILDS
        | GatewayIntents::GUILD_MEMBERS
        | GatewayIntents::GUILD_MESSAGES
        | GatewayIntents::MESSAGE_CONTENT
        | GatewayIntents::DIRECT_MESSAGES;

    let guild_id = GuildId::new(cfg.guild_id);
    let http = Arc::new(Http::new(&cfg.discord_token));
    let platform: Arc<dyn PlatformPort> = Arc::new(DiscordPlatform::new(http, guild_id));
    let bot = Arc::new(Bot::new(&cfg, platform));

    tracing::info!(
        guild = cfg.guild_id,
        log_channel = %cfg.log_channel_id,
        category = %cfg.ticket_category_id,
        threshold_days = cfg.suspicious_age_days,
        "starting modmail"
    );

    let handler = Handler::new(bot, guild_id, cfg.register_commands);
    let mut client = Client::builder(&cfg.discord_token, intents)
        .event_handler(handler)
        .await?;
    client.start().await?;
    Ok(())
}
