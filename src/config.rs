//! `config.json` loading (spec.md §6.3). A single required-keys config file; any missing
//! required key is a fatal startup error, mirroring the reference architecture's guild-config
//! loading in `guild.rs` (`GuildManager::new`), which treats a missing/malformed config file as
//! fatal via `.context(...)` propagated out of `main`.

use anyhow::{Context as _, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(rename = "DISCORD_TOKEN")]
    pub discord_token: String,
    #[serde(rename = "EVENTS_FILE")]
    pub events_file: String,
    #[serde(rename = "RESPONSES_FILE")]
    pub responses_file: String,
    /// Legacy sibling waitlist file, merged in during migration (spec.md §4.1) and otherwise
    /// unused going forward.
    #[serde(rename = "WAITLIST_FILE")]
    pub waitlist_file: String,
    #[serde(rename = "GUILDS")]
    pub guilds: Vec<u64>,
}

impl Config {
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Config = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        Ok(config)
    }
}
