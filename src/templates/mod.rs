//! Staff-managed message templates.
//!
//! A [`Template`] is reusable outbound copy tagged with a [`TemplateCategory`]
//! and the [`TemplatePlatform`] it is meant for. Staff sends and broadcasts
//! may reference a template instead of inline text. Variables are stored for
//! the editing UI only; the text is sent as written.

pub mod store;

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::leads::Channel;

/// What a template is used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateCategory {
    /// First contact.
    Greeting,
    /// Follow-up after an earlier exchange.
    FollowUp,
    /// Offers and announcements.
    Promotional,
    /// Appointment or payment reminders.
    Reminder,
    /// Customer support answers.
    Support,
}

impl TemplateCategory {
    /// Returns the string representation stored in SQLite.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Greeting => "greeting",
            Self::FollowUp => "follow_up",
            Self::Promotional => "promotional",
            Self::Reminder => "reminder",
            Self::Support => "support",
        }
    }

    /// Parse from a SQLite text value or query parameter.
    ///
    /// # Errors
    ///
    /// Returns an error if the value is not a recognised category.
    pub fn parse(s: &str) -> Result<Self, TemplateError> {
        match s.trim().to_ascii_lowercase().as_str() {
            "greeting" => Ok(Self::Greeting),
            "follow_up" | "follow-up" | "followup" => Ok(Self::FollowUp),
            "promotional" => Ok(Self::Promotional),
            "reminder" => Ok(Self::Reminder),
            "support" => Ok(Self::Support),
            _ => Err(TemplateError::InvalidEnum {
                field: "category",
                value: s.to_owned(),
            }),
        }
    }
}

/// Channel a template targets, or every channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TemplatePlatform {
    /// Usable on any channel.
    #[default]
    All,
    /// Instagram only.
    Instagram,
    /// Facebook Messenger only.
    Facebook,
    /// WhatsApp only.
    Whatsapp,
    /// Email only.
    Email,
    /// Website only.
    Website,
}

impl TemplatePlatform {
    /// Returns the string representation stored in SQLite.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::All => "all",
            Self::Instagram => "instagram",
            Self::Facebook => "facebook",
            Self::Whatsapp => "whatsapp",
            Self::Email => "email",
            Self::Website => "website",
        }
    }

    /// Parse from a SQLite text value or query parameter.
    ///
    /// # Errors
    ///
    /// Returns an error if the value is neither `all` nor a channel name.
    pub fn parse(s: &str) -> Result<Self, TemplateError> {
        if s.trim().eq_ignore_ascii_case("all") {
            return Ok(Self::All);
        }
        Channel::parse(s)
            .map(Self::from)
            .map_err(|_| TemplateError::InvalidEnum {
                field: "platform",
                value: s.to_owned(),
            })
    }

    /// Whether a template for this platform may be sent on `channel`.
    pub fn covers(&self, channel: Channel) -> bool {
        *self == Self::All || *self == Self::from(channel)
    }
}

impl From<Channel> for TemplatePlatform {
    fn from(channel: Channel) -> Self {
        match channel {
            Channel::Instagram => Self::Instagram,
            Channel::Facebook => Self::Facebook,
            Channel::Whatsapp => Self::Whatsapp,
            Channel::Email => Self::Email,
            Channel::Website => Self::Website,
        }
    }
}

impl fmt::Display for TemplatePlatform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A named slot in the template text, e.g. `{{name}}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateVariable {
    /// Variable name.
    pub name: String,
    /// Literal marker in the text.
    pub placeholder: String,
    /// Value used when none is given.
    #[serde(default)]
    pub default_value: Option<String>,
}

/// A persisted template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Template {
    /// Stable record id (UUID v4).
    pub id: String,
    /// Unique display name.
    pub name: String,
    /// Use category.
    pub category: TemplateCategory,
    /// Email subject line.
    pub subject: Option<String>,
    /// Message text.
    pub message: String,
    /// Target channel.
    pub platform: TemplatePlatform,
    /// Variable slots.
    pub variables: Vec<TemplateVariable>,
    /// Inactive templates cannot be sent.
    pub is_active: bool,
    /// Row creation time.
    pub created_at: DateTime<Utc>,
    /// Last modification time.
    pub updated_at: DateTime<Utc>,
}

impl Template {
    /// The text to send, if the template is active.
    ///
    /// # Errors
    ///
    /// Returns [`TemplateError::Unusable`] if the template is inactive.
    pub fn active_text(&self) -> Result<&str, TemplateError> {
        if !self.is_active {
            return Err(TemplateError::Unusable(format!(
                "template {:?} is inactive",
                self.name
            )));
        }
        Ok(&self.message)
    }

    /// The text to send on `channel`.
    ///
    /// # Errors
    ///
    /// Returns [`TemplateError::Unusable`] if the template is inactive or
    /// targets another channel.
    pub fn text_for(&self, channel: Channel) -> Result<&str, TemplateError> {
        let text = self.active_text()?;
        if !self.platform.covers(channel) {
            return Err(TemplateError::Unusable(format!(
                "template {:?} is for {}, not {channel}",
                self.name, self.platform
            )));
        }
        Ok(text)
    }
}

/// Errors from the template store.
#[derive(Debug, thiserror::Error)]
pub enum TemplateError {
    /// Database operation failed.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// No template with the given id exists.
    #[error("template not found: {0}")]
    NotFound(String),

    /// Another template already has this name.
    #[error("template name already in use: {0}")]
    Duplicate(String),

    /// An invalid enum value was read or supplied.
    #[error("invalid {field} value: {value:?}")]
    InvalidEnum {
        /// Which field contained the bad value.
        field: &'static str,
        /// The unexpected value.
        value: String,
    },

    /// A stored timestamp could not be parsed.
    #[error("invalid timestamp {0:?}")]
    InvalidTimestamp(String),

    /// The variables column could not be encoded or decoded.
    #[error("json column error: {0}")]
    Json(#[from] serde_json::Error),

    /// The supplied data does not form a valid template.
    #[error("invalid template: {0}")]
    Invalid(String),

    /// The template exists but cannot be sent here.
    #[error("{0}")]
    Unusable(String),
}
