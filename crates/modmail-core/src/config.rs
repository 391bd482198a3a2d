use std::{
    env, fs,
    path::{Path, PathBuf},
};

use crate::{domain::ChannelId, errors::Error, Result};

/// Typed configuration, read from the environment (with `.env` support).
#[derive(Clone, Debug)]
pub struct Config {
    // Discord
    pub discord_token: String,
    pub guild_id: u64,
    pub register_commands: bool,

    // Fixed destinations
    pub log_channel_id: ChannelId,
    pub ticket_category_id: ChannelId,
    pub welcome_channel_name: String,

    // Risk classifier
    pub suspicious_age_days: f64,

    // Relay
    pub relay: RelaySettings,

    // Audit
    pub audit_log_path: Option<PathBuf>,
    pub audit_log_json: bool,
}

/// Knobs for the relay router. Split out so the router can be built without a full `Config`.
#[derive(Clone, Debug)]
pub struct RelaySettings {
    pub ticket_category_id: ChannelId,
    pub channel_prefix: String,
    pub close_command: String,
    pub reply_command: String,
}

impl RelaySettings {
    pub fn new(ticket_category_id: ChannelId) -> Self {
        Self {
            ticket_category_id,
            channel_prefix: DEFAULT_CHANNEL_PREFIX.to_string(),
            close_command: DEFAULT_CLOSE_COMMAND.to_string(),
            reply_command: DEFAULT_REPLY_COMMAND.to_string(),
        }
    }
}

pub const DEFAULT_SUSPICIOUS_AGE_DAYS: f64 = 7.0;
pub const DEFAULT_WELCOME_CHANNEL: &str = "welcome";
pub const DEFAULT_CHANNEL_PREFIX: &str = "ticket";
pub const DEFAULT_CLOSE_COMMAND: &str = "!close";
pub const DEFAULT_REPLY_COMMAND: &str = "!r";

impl Config {
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));
        Self::from_vars(|key| env::var(key).ok())
    }

    /// Build from an arbitrary variable source (the process env in production, a map in tests).
    pub fn from_vars(var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| var(key).and_then(non_empty);

        // Required
        let discord_token = get("DISCORD_TOKEN").ok_or_else(|| {
            Error::Config("DISCORD_TOKEN environment variable is required".to_string())
        })?;
        let guild_id = required_id(&get, "GUILD_ID")?;
        let log_channel_id = ChannelId(required_id(&get, "LOG_CHANNEL_ID")?);
        let ticket_category_id = ChannelId(required_id(&get, "MODMAIL_CATEGORY_ID")?);

        let welcome_channel_name =
            get("WELCOME_CHANNEL_NAME").unwrap_or_else(|| DEFAULT_WELCOME_CHANNEL.to_string());

        let suspicious_age_days = match get("SUSPICIOUS_AGE_DAYS") {
            None => DEFAULT_SUSPICIOUS_AGE_DAYS,
            Some(raw) => match raw.trim().parse::<f64>() {
                Ok(v) if v.is_finite() && v >= 0.0 => v,
                _ => {
                    return Err(Error::Config(format!(
                        "SUSPICIOUS_AGE_DAYS must be a non-negative number, got {raw:?}"
                    )))
                }
            },
        };

        let relay = RelaySettings {
            ticket_category_id,
            channel_prefix: get("TICKET_CHANNEL_PREFIX")
                .unwrap_or_else(|| DEFAULT_CHANNEL_PREFIX.to_string()),
            close_command: command_prefix(&get, "CLOSE_COMMAND", DEFAULT_CLOSE_COMMAND),
            reply_command: command_prefix(&get, "REPLY_COMMAND", DEFAULT_REPLY_COMMAND),
        };
        if relay.close_command.eq_ignore_ascii_case(&relay.reply_command) {
            return Err(Error::Config(
                "CLOSE_COMMAND and REPLY_COMMAND must differ".to_string(),
            ));
        }

        let register_commands = get("REGISTER_COMMANDS")
            .map(|s| parse_bool(&s))
            .unwrap_or(true);

        let audit_log_path = get("AUDIT_LOG_PATH").map(PathBuf::from);
        let audit_log_json = get("AUDIT_LOG_JSON")
            .map(|s| parse_bool(&s))
            .unwrap_or(false);

        Ok(Self {
            discord_token,
            guild_id,
            register_commands,
            log_channel_id,
            ticket_category_id,
            welcome_channel_name,
            suspicious_age_days,
            relay,
            audit_log_path,
            audit_log_json,
        })
    }
}

fn required_id(get: &impl Fn(&str) -> Option<String>, key: &str) -> Result<u64> {
    let raw = get(key)
        .ok_or_else(|| Error::Config(format!("{key} environment variable is required")))?;
    match raw.trim().parse::<u64>() {
        Ok(0) | Err(_) => Err(Error::Config(format!(
            "{key} must be a Discord snowflake id, got {raw:?}"
        ))),
        Ok(id) => Ok(id),
    }
}

fn command_prefix(get: &impl Fn(&str) -> Option<String>, key: &str, default: &str) -> String {
    get(key)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty() && !s.contains(char::is_whitespace))
        .unwrap_or_else(|| default.to_string())
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((k, v)) = line.split_once('=') else {
            continue;
        };

        let key = k.trim();
        if key.is_empty() {
            continue;
        }
        if env::var_os(key).is_some() {
            continue; // do not override existing env
        }

        let mut val = v.trim().to_string();
        // Strip optional surrounding quotes.
        if val.len() >= 2
            && ((val.starts_with('"') && val.ends_with('"'))
                || (val.starts_with('\'') && val.ends_with('\'')))
        {
            val = val[1..val.len() - 1].to_string();
        }

        env::set_var(key, val);
    }
}

fn parse_bool(s: &str) -> bool {
    matches!(
        s.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}
