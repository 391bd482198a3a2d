use crate::registry::RegistryError;

/// Core error type.
///
/// Adapter crates map their platform errors into this type so handlers can tell a
/// missing channel (abandon quietly) from a closed DM inbox (tell staff) from anything else.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    /// Channel, category, user or message no longer exists.
    #[error("not found: {0}")]
    NotFound(String),

    /// The participant cannot be messaged (DMs disabled, blocked, left the guild).
    #[error("delivery failed: {0}")]
    Delivery(String),

    #[error("permission denied: {0}")]
    Permission(String),

    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("external error: {0}")]
    External(String),
}

impl Error {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
