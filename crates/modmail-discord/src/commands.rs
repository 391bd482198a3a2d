//! Slash-command registration and interaction parsing.

use serenity::{
    builder::{CreateCommand, CreateCommandOption},
    model::{
        application::{CommandInteraction, CommandOptionType, ResolvedOption, ResolvedValue},
        permissions::Permissions,
    },
};

use modmail_core::{
    commands::{
        AdminCommand, CommandArg, CommandInvocation, InvokerPermissions, CMD_CLOSE, CMD_DM,
        CMD_REPLY, CMD_SUSPICIOUS, OPT_MESSAGE, OPT_TARGET, OPT_TEXT, OPT_USER, SUB_ALL,
        SUB_USER,
    },
    domain::{ChannelId, UserId},
};

/// Guild command set registered on ready.
pub fn definitions() -> Vec<CreateCommand> {
    vec![
        CreateCommand::new(CMD_DM)
            .description("Send a direct message to a member")
            .default_member_permissions(Permissions::MANAGE_MESSAGES)
            .add_option(
                CreateCommandOption::new(CommandOptionType::User, OPT_USER, "Recipient")
                    .required(true),
            )
            .add_option(
                CreateCommandOption::new(CommandOptionType::String, OPT_MESSAGE, "Message text")
                    .required(true),
            ),
        CreateCommand::new(CMD_SUSPICIOUS)
            .description("Check accounts for suspiciously young age")
            .default_member_permissions(Permissions::MANAGE_MESSAGES)
            .add_option(
                CreateCommandOption::new(CommandOptionType::SubCommand, SUB_USER, "Check one user")
                    .add_sub_option(
                        CreateCommandOption::new(CommandOptionType::User, OPT_TARGET, "User to check")
                            .required(true),
                    ),
            )
            .add_option(CreateCommandOption::new(
                CommandOptionType::SubCommand,
                SUB_ALL,
                "Check every member",
            )),
        CreateCommand::new(CMD_REPLY)
            .description("Reply to the participant of this ticket")
            .add_option(
                CreateCommandOption::new(CommandOptionType::String, OPT_TEXT, "Reply text")
                    .required(true),
            ),
        CreateCommand::new(CMD_CLOSE).description("Close this ticket"),
    ]
}

fn args_of(options: &[ResolvedOption<'_>]) -> Vec<(String, CommandArg)> {
    options
        .iter()
        .filter_map(|o| {
            let arg = match &o.value {
                ResolvedValue::User(user, _) => CommandArg::User(UserId(user.id.get())),
                ResolvedValue::String(s) => CommandArg::Text(s.to_string()),
                ResolvedValue::SubCommand(inner) => {
                    CommandArg::Subcommand(o.name.to_string(), args_of(inner))
                }
                _ => return None,
            };
            Some((o.name.to_string(), arg))
        })
        .collect()
}

/// Turn a raw interaction into a typed invocation, or a message explaining why not.
pub fn invocation_of(cmd: &CommandInteraction) -> Result<CommandInvocation, String> {
    let args = args_of(&cmd.data.options());
    let command = AdminCommand::parse(&cmd.data.name, &args)?;

    let manage_messages = cmd
        .member
        .as_ref()
        .and_then(|m| m.permissions)
        .map(|p| p.manage_messages())
        .unwrap_or(false);

    Ok(CommandInvocation {
        command,
        invoker: UserId(cmd.user.id.get()),
        channel_id: ChannelId(cmd.channel_id.get()),
        permissions: InvokerPermissions { manage_messages },
    })
}
