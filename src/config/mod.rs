//! Configuration loading and management.
//!
//! Loads leadflow configuration from `./leadflow.toml` (or
//! `$LEADFLOW_CONFIG_PATH`). Environment variables override file values;
//! file values override defaults.
//!
//! Precedence: env vars > config file > defaults.
//!
//! Provider secrets (verify tokens, access tokens) have no defaults. They are
//! supplied through the file or `LEADFLOW_<CHANNEL>_*` variables only.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::leads::Channel;

// ── Default reply copy ──────────────────────────────────────────

/// Default reply to a first inbound message.
pub const DEFAULT_AUTO_REPLY: &str =
    "Thanks for reaching out! We've received your message and will get back to you soon.";

/// Default WhatsApp reply to a first inbound message.
pub const DEFAULT_WHATSAPP_AUTO_REPLY: &str =
    "Thank you for contacting us! We've received your message and will get back to you soon.";

/// Default welcome message for a new follower.
pub const DEFAULT_FOLLOW_REPLY: &str =
    "Hey! Thanks for following us! Feel free to send us a message if you have any questions!";

/// Default reply to a comment.
pub const DEFAULT_COMMENT_REPLY: &str = "Thanks for your comment! We appreciate your engagement!";

/// Default reply to a story/post mention.
pub const DEFAULT_MENTION_REPLY: &str =
    "Wow! Thanks so much for mentioning us! We really appreciate it!";

// ── Top-level config ────────────────────────────────────────────

/// Top-level leadflow configuration loaded from TOML.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// HTTP server and logging settings.
    pub server: ServerConfig,
    /// Lead database settings.
    pub storage: StorageConfig,
    /// Bounded timeouts for blocking I/O.
    pub timeouts: TimeoutsConfig,
    /// Broadcast pacing.
    pub broadcast: BroadcastConfig,
    /// Webhook delivery log.
    pub delivery_log: DeliveryLogConfig,
    /// Per-channel settings.
    pub channels: ChannelsConfig,
}

impl Config {
    /// Load configuration with precedence: env vars > TOML file > defaults.
    ///
    /// `explicit_path` (from the CLI) wins over `$LEADFLOW_CONFIG_PATH`.
    /// If the file does not exist, defaults are used.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
        let path = match explicit_path {
            Some(p) => p.to_path_buf(),
            None => Self::config_path_with(|key| std::env::var(key).ok()),
        };
        let mut config = Self::load_from_file(&path)?;
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Load from a TOML file only, no env overrides.
    fn load_from_file(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(contents) => {
                tracing::info!(path = %path.display(), "loading config from file");
                Self::from_toml(&contents)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "no config file found, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(anyhow::anyhow!(
                "failed to read config file {}: {e}",
                path.display()
            )),
        }
    }

    /// Resolve the config path using a custom env resolver.
    fn config_path_with(env: impl Fn(&str) -> Option<String>) -> PathBuf {
        env("LEADFLOW_CONFIG_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("leadflow.toml"))
    }

    /// Apply environment variable overrides (env > config > defaults).
    ///
    /// Takes a resolver function so tests never mutate the process env.
    pub fn apply_overrides(&mut self, env: impl Fn(&str) -> Option<String>) {
        // Server.
        if let Some(v) = env("LEADFLOW_BIND") {
            self.server.bind = v;
        }
        if let Some(v) = env("LEADFLOW_LOG_LEVEL") {
            self.server.log_level = v;
        }
        if let Some(v) = env("LEADFLOW_LOGS_DIR") {
            self.server.logs_dir = Some(PathBuf::from(v));
        }

        // Storage.
        if let Some(v) = env("LEADFLOW_DATABASE_PATH") {
            self.storage.database_path = v;
        }
        if let Some(v) = env("LEADFLOW_BROADCAST_DELAY_MS") {
            match v.parse() {
                Ok(n) => self.broadcast.delay_ms = n,
                Err(_) => tracing::warn!(
                    var = "LEADFLOW_BROADCAST_DELAY_MS",
                    value = %v,
                    "ignoring invalid env override"
                ),
            }
        }

        // Channels.
        for channel in Channel::ALL {
            let prefix = format!("LEADFLOW_{}", channel.as_str().to_uppercase());
            let section = self.channels.get_mut(channel);
            if let Some(v) = env(&format!("{prefix}_VERIFY_TOKEN")) {
                section.verify_token = Some(v);
            }
            if let Some(v) = env(&format!("{prefix}_ACCESS_TOKEN")) {
                section.access_token = Some(v);
            }
            if let Some(v) = env(&format!("{prefix}_ACCOUNT_ID")) {
                section.account_id = Some(v);
            }
            if let Some(v) = env(&format!("{prefix}_AUTO_REPLY")) {
                section.auto_reply = Some(v);
            }
        }
    }

    /// Parse a TOML string into config.
    ///
    /// # Errors
    ///
    /// Returns an error on malformed TOML or unknown value types.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: Config = toml::from_str(toml_str).context("failed to parse config TOML")?;
        Ok(config)
    }

    /// Settings for `channel` with built-in defaults resolved.
    pub fn channel(&self, channel: Channel) -> ResolvedChannel {
        ResolvedChannel::resolve(channel, self.channels.get(channel))
    }

    /// Sanity problems worth reporting from `check-config`. Empty means fine.
    pub fn warnings(&self) -> Vec<String> {
        let mut out = Vec::new();
        for channel in Channel::ALL {
            let resolved = self.channel(channel);
            if !resolved.enabled {
                continue;
            }
            if channel.uses_graph_webhooks() {
                if resolved.verify_token.is_none() {
                    out.push(format!(
                        "{channel}: no verify_token, webhook verification will always fail"
                    ));
                }
                if resolved.access_token.is_none() || resolved.account_id.is_none() {
                    out.push(format!(
                        "{channel}: access_token/account_id missing, replies disabled"
                    ));
                }
                if let Err(e) = url::Url::parse(&resolved.api_base) {
                    out.push(format!(
                        "{channel}: api_base {:?} is not a valid URL ({e})",
                        resolved.api_base
                    ));
                }
            }
        }
        if self.delivery_log.enabled && self.delivery_log.capacity == 0 {
            out.push("delivery_log: capacity is 0, nothing will be retained".to_owned());
        }
        out
    }
}

// ── Server config ───────────────────────────────────────────────

/// HTTP server settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Socket address to bind.
    pub bind: String,
    /// Default tracing filter when `RUST_LOG` is unset.
    pub log_level: String,
    /// Directory for JSON log files. `None` logs to stderr only.
    pub logs_dir: Option<PathBuf>,
    /// Largest webhook delivery body read; bigger ones are acknowledged and
    /// discarded.
    pub webhook_body_limit_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:5000".to_string(),
            log_level: "info".to_string(),
            logs_dir: None,
            webhook_body_limit_bytes: crate::server::DEFAULT_WEBHOOK_BODY_LIMIT,
        }
    }
}

// ── Storage config ──────────────────────────────────────────────

/// Lead database settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite database file.
    pub database_path: String,
    /// Pool size.
    pub max_connections: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: "leadflow.db".to_string(),
            max_connections: 5,
        }
    }
}

// ── Timeouts ────────────────────────────────────────────────────

/// Upper bounds for each kind of blocking call, in seconds.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TimeoutsConfig {
    /// Lead store lookups and upserts.
    pub store_secs: u64,
    /// Ghost-event content lookups.
    pub lookup_secs: u64,
    /// Outbound sends.
    pub send_secs: u64,
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            store_secs: 5,
            lookup_secs: 10,
            send_secs: 10,
        }
    }
}

impl TimeoutsConfig {
    /// Store timeout as a [`Duration`].
    pub fn store(&self) -> Duration {
        Duration::from_secs(self.store_secs)
    }

    /// Lookup timeout as a [`Duration`].
    pub fn lookup(&self) -> Duration {
        Duration::from_secs(self.lookup_secs)
    }

    /// Send timeout as a [`Duration`].
    pub fn send(&self) -> Duration {
        Duration::from_secs(self.send_secs)
    }
}

// ── Broadcast config ────────────────────────────────────────────

/// Broadcast pacing.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BroadcastConfig {
    /// Fixed delay between consecutive sends, in milliseconds.
    pub delay_ms: u64,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self { delay_ms: 1000 }
    }
}

// ── Delivery log config ─────────────────────────────────────────

/// Bounded webhook delivery log.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DeliveryLogConfig {
    /// Whether deliveries are recorded at all.
    pub enabled: bool,
    /// Rows retained.
    pub capacity: u32,
}

impl Default for DeliveryLogConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            capacity: 100,
        }
    }
}

// ── Channel config ──────────────────────────────────────────────

/// `[channels.*]` sections.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ChannelsConfig {
    /// Instagram.
    pub instagram: ChannelConfig,
    /// Facebook Messenger.
    pub facebook: ChannelConfig,
    /// WhatsApp Cloud API.
    pub whatsapp: ChannelConfig,
    /// Inbound email.
    pub email: ChannelConfig,
    /// Website contact form.
    pub website: ChannelConfig,
}

impl ChannelsConfig {
    /// Section for `channel`.
    pub fn get(&self, channel: Channel) -> &ChannelConfig {
        match channel {
            Channel::Instagram => &self.instagram,
            Channel::Facebook => &self.facebook,
            Channel::Whatsapp => &self.whatsapp,
            Channel::Email => &self.email,
            Channel::Website => &self.website,
        }
    }

    fn get_mut(&mut self, channel: Channel) -> &mut ChannelConfig {
        match channel {
            Channel::Instagram => &mut self.instagram,
            Channel::Facebook => &mut self.facebook,
            Channel::Whatsapp => &mut self.whatsapp,
            Channel::Email => &mut self.email,
            Channel::Website => &mut self.website,
        }
    }
}

/// Raw per-channel section as written in TOML.
///
/// Every field is optional; [`ResolvedChannel`] fills in defaults.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Whether the channel accepts deliveries.
    pub enabled: bool,
    /// Secret compared during the subscription handshake.
    pub verify_token: Option<String>,
    /// Provider API token used for sends and lookups.
    pub access_token: Option<String>,
    /// Business account id (IG user id, FB page id, WA phone number id).
    pub account_id: Option<String>,
    /// Provider API base URL.
    pub api_base: Option<String>,
    /// Prefix for bare national phone numbers (WhatsApp).
    pub default_country_code: Option<String>,
    /// Reply to a first message. Empty string disables it.
    pub auto_reply: Option<String>,
    /// Reply to a new follower. Empty string disables it.
    pub follow_reply: Option<String>,
    /// Reply to a comment. Empty string disables it.
    pub comment_reply: Option<String>,
    /// Reply to a mention. Empty string disables it.
    pub mention_reply: Option<String>,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            verify_token: None,
            access_token: None,
            account_id: None,
            api_base: None,
            default_country_code: None,
            auto_reply: None,
            follow_reply: None,
            comment_reply: None,
            mention_reply: None,
        }
    }
}

impl std::fmt::Debug for ChannelConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelConfig")
            .field("enabled", &self.enabled)
            .field(
                "verify_token",
                &self.verify_token.as_ref().map(|_| "__REDACTED__"),
            )
            .field(
                "access_token",
                &self.access_token.as_ref().map(|_| "__REDACTED__"),
            )
            .field("account_id", &self.account_id)
            .field("api_base", &self.api_base)
            .field("default_country_code", &self.default_country_code)
            .finish_non_exhaustive()
    }
}

/// Per-channel settings with defaults applied.
#[derive(Clone, PartialEq)]
pub struct ResolvedChannel {
    /// Channel these settings belong to.
    pub channel: Channel,
    /// Whether the channel accepts deliveries.
    pub enabled: bool,
    /// Handshake secret. `None` rejects every verification.
    pub verify_token: Option<String>,
    /// Provider API token.
    pub access_token: Option<String>,
    /// Business account id.
    pub account_id: Option<String>,
    /// Provider API base URL.
    pub api_base: String,
    /// Prefix for bare 10-digit phone numbers.
    pub default_country_code: Option<String>,
    /// Reply to a first message.
    pub auto_reply: Option<String>,
    /// Reply to a new follower.
    pub follow_reply: Option<String>,
    /// Reply to a comment.
    pub comment_reply: Option<String>,
    /// Reply to a mention.
    pub mention_reply: Option<String>,
}

impl std::fmt::Debug for ResolvedChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedChannel")
            .field("channel", &self.channel)
            .field("enabled", &self.enabled)
            .field(
                "verify_token",
                &self.verify_token.as_ref().map(|_| "__REDACTED__"),
            )
            .field(
                "access_token",
                &self.access_token.as_ref().map(|_| "__REDACTED__"),
            )
            .field("account_id", &self.account_id)
            .field("api_base", &self.api_base)
            .finish_non_exhaustive()
    }
}

/// `Some(text)` unless the configured value is blank; falls back to `default`.
fn reply_text(configured: Option<&String>, default: Option<&str>) -> Option<String> {
    match configured {
        Some(text) if text.trim().is_empty() => None,
        Some(text) => Some(text.clone()),
        None => default.map(str::to_owned),
    }
}

fn non_blank(value: Option<&String>) -> Option<String> {
    value
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .map(str::to_owned)
}

impl ResolvedChannel {
    fn resolve(channel: Channel, raw: &ChannelConfig) -> Self {
        let default_api_base = match channel {
            Channel::Instagram => "https://graph.instagram.com/v21.0",
            Channel::Facebook | Channel::Whatsapp => "https://graph.facebook.com/v21.0",
            Channel::Email | Channel::Website => "",
        };
        let (auto, follow, comment, mention) = match channel {
            Channel::Instagram | Channel::Facebook => (
                Some(DEFAULT_AUTO_REPLY),
                Some(DEFAULT_FOLLOW_REPLY),
                Some(DEFAULT_COMMENT_REPLY),
                Some(DEFAULT_MENTION_REPLY),
            ),
            Channel::Whatsapp => (Some(DEFAULT_WHATSAPP_AUTO_REPLY), None, None, None),
            Channel::Email | Channel::Website => (None, None, None, None),
        };
        Self {
            channel,
            enabled: raw.enabled,
            verify_token: non_blank(raw.verify_token.as_ref()),
            access_token: non_blank(raw.access_token.as_ref()),
            account_id: non_blank(raw.account_id.as_ref()),
            api_base: non_blank(raw.api_base.as_ref())
                .unwrap_or_else(|| default_api_base.to_owned())
                .trim_end_matches('/')
                .to_owned(),
            default_country_code: non_blank(raw.default_country_code.as_ref()),
            auto_reply: reply_text(raw.auto_reply.as_ref(), auto),
            follow_reply: reply_text(raw.follow_reply.as_ref(), follow),
            comment_reply: reply_text(raw.comment_reply.as_ref(), comment),
            mention_reply: reply_text(raw.mention_reply.as_ref(), mention),
        }
    }

    /// Whether an outbound sender can be built for this channel.
    pub fn can_send(&self) -> bool {
        self.channel.uses_graph_webhooks()
            && self.access_token.is_some()
            && self.account_id.is_some()
            && !self.api_base.is_empty()
    }
}

// ── Tests ───────────────────────────────────────────────────────
