use modmail_core::config::Config;

#[tokio::main]
async fn main() -> Result<(), modmail_core::Error> {
    modmail_core::logging::init("modmail")?;

    let cfg = Config::load()?;
    if let Some(path) = &cfg.audit_log_path {
        tracing::info!(path = %path.display(), json = cfg.audit_log_json, "audit log enabled");
    }

    modmail_discord::run(cfg)
        .await
        .map_err(|e| modmail_core::Error::External(format!("discord client failed: {e}")))?;

    Ok(())
}
