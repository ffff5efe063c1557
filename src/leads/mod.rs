//! Lead records: the single normalized contact row every channel feeds into.
//!
//! A [`Lead`] is keyed by its [`Identity`], the `(channel, channel_user_id)`
//! pair. Channels without a stable provider id (web forms, inbound email) fall
//! back to the lowercased email address or the digits of the phone number.
//!
//! Persistence lives in [`store`]; this module holds the domain types and the
//! small pure rules (placeholder names, qualification seeding, identity
//! anchors) that the pipeline and the store share.

pub mod store;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::LazyLock;

use chrono::{DateTime, SecondsFormat, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Enumerations
// ---------------------------------------------------------------------------

/// An external messaging provider a lead can arrive through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    /// Instagram direct messages, follows, comments and mentions.
    Instagram,
    /// Facebook Messenger.
    Facebook,
    /// WhatsApp Cloud API.
    Whatsapp,
    /// Inbound email.
    Email,
    /// Website contact form.
    Website,
}

impl Channel {
    /// Every channel, in a stable order.
    pub const ALL: [Channel; 5] = [
        Self::Instagram,
        Self::Facebook,
        Self::Whatsapp,
        Self::Email,
        Self::Website,
    ];

    /// Returns the string representation stored in SQLite and used in URLs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Instagram => "instagram",
            Self::Facebook => "facebook",
            Self::Whatsapp => "whatsapp",
            Self::Email => "email",
            Self::Website => "website",
        }
    }

    /// Human-facing label, used to build placeholder names.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Instagram => "Instagram",
            Self::Facebook => "Facebook",
            Self::Whatsapp => "WhatsApp",
            Self::Email => "Email",
            Self::Website => "Website",
        }
    }

    /// Whether the provider uses the subscribe/verify-token/challenge
    /// handshake and the `entry[]` envelope.
    pub fn uses_graph_webhooks(&self) -> bool {
        matches!(self, Self::Instagram | Self::Facebook | Self::Whatsapp)
    }

    /// Parse from a SQLite text value or URL path segment.
    ///
    /// # Errors
    ///
    /// Returns an error if the value is not a recognised channel.
    pub fn parse(s: &str) -> Result<Self, LeadError> {
        match s.trim().to_ascii_lowercase().as_str() {
            "instagram" => Ok(Self::Instagram),
            "facebook" | "messenger" => Ok(Self::Facebook),
            "whatsapp" => Ok(Self::Whatsapp),
            "email" => Ok(Self::Email),
            "website" | "web" | "form" => Ok(Self::Website),
            _ => Err(LeadError::InvalidEnum {
                field: "channel",
                value: s.to_owned(),
            }),
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What kind of interaction an inbound event represents.
///
/// Stored on the lead as `interaction_type` (the kind of its first event).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    /// A direct message.
    Message,
    /// The user started following the business account.
    Follow,
    /// A comment on one of the business account's posts.
    Comment,
    /// The user mentioned the business account in a story or post.
    Mention,
}

impl EventKind {
    /// Returns the string representation stored in SQLite.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Message => "message",
            Self::Follow => "follow",
            Self::Comment => "comment",
            Self::Mention => "mention",
        }
    }

    /// Parse from a SQLite text value.
    ///
    /// # Errors
    ///
    /// Returns an error if the value is not a recognised kind.
    pub fn parse(s: &str) -> Result<Self, LeadError> {
        match s {
            "message" => Ok(Self::Message),
            "follow" => Ok(Self::Follow),
            "comment" => Ok(Self::Comment),
            "mention" => Ok(Self::Mention),
            other => Err(LeadError::InvalidEnum {
                field: "interaction_type",
                value: other.to_owned(),
            }),
        }
    }

    /// Qualification assigned to a lead created by an event of this kind.
    ///
    /// An unsolicited mention is the strongest signal, a plain inbound message
    /// the weakest.
    pub fn seed_qualification(&self) -> Qualification {
        match self {
            Self::Mention => Qualification::Hot,
            Self::Follow | Self::Comment => Qualification::Warm,
            Self::Message => Qualification::Cold,
        }
    }
}

/// Pipeline status of a lead.
///
/// Channels historically used slightly different vocabularies; [`parse`]
/// collapses them onto this canonical set.
///
/// [`parse`]: LeadStatus::parse
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LeadStatus {
    /// Not yet contacted by staff.
    New,
    /// Staff (or a broadcast) has reached out.
    Contacted,
    /// Marked as a qualified / follow-up prospect.
    Qualified,
    /// Became a customer.
    Converted,
    /// Closed or lost.
    Closed,
}

impl LeadStatus {
    /// Every status, in pipeline order.
    pub const ALL: [LeadStatus; 5] = [
        Self::New,
        Self::Contacted,
        Self::Qualified,
        Self::Converted,
        Self::Closed,
    ];

    /// Returns the string representation stored in SQLite.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Contacted => "contacted",
            Self::Qualified => "qualified",
            Self::Converted => "converted",
            Self::Closed => "closed",
        }
    }

    /// Parse a status, accepting the per-channel aliases.
    ///
    /// # Errors
    ///
    /// Returns an error if the value is not a recognised status.
    pub fn parse(s: &str) -> Result<Self, LeadError> {
        match s.trim().to_ascii_lowercase().as_str() {
            "new" => Ok(Self::New),
            "contacted" => Ok(Self::Contacted),
            "qualified" | "follow-up" | "follow_up" | "followup" => Ok(Self::Qualified),
            "converted" => Ok(Self::Converted),
            "closed" | "lost" => Ok(Self::Closed),
            _ => Err(LeadError::InvalidEnum {
                field: "status",
                value: s.to_owned(),
            }),
        }
    }
}

/// Coarse lead temperature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Qualification {
    /// Strong intent.
    Hot,
    /// Some engagement.
    Warm,
    /// No signal beyond first contact.
    Cold,
}

impl Qualification {
    /// Every qualification tier, hottest first.
    pub const ALL: [Qualification; 3] = [Self::Hot, Self::Warm, Self::Cold];

    /// Returns the string representation stored in SQLite.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hot => "hot",
            Self::Warm => "warm",
            Self::Cold => "cold",
        }
    }

    /// Parse from a SQLite text value.
    ///
    /// # Errors
    ///
    /// Returns an error if the value is not a recognised tier.
    pub fn parse(s: &str) -> Result<Self, LeadError> {
        match s.trim().to_ascii_lowercase().as_str() {
            "hot" => Ok(Self::Hot),
            "warm" => Ok(Self::Warm),
            "cold" => Ok(Self::Cold),
            _ => Err(LeadError::InvalidEnum {
                field: "qualification",
                value: s.to_owned(),
            }),
        }
    }
}

/// Which automated reply a marker flag guards.
///
/// Each kind has its own durable "already sent" column; the transition
/// `unset -> sent` happens only after the provider confirms delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplyKind {
    /// Reply to an inbound direct message (`auto_reply_sent`).
    AutoReply,
    /// Welcome message to a new follower.
    Welcome,
    /// Thank-you for a comment.
    CommentReply,
    /// Thank-you for a mention.
    MentionReply,
}

impl ReplyKind {
    /// The reply kind triggered by an event of the given kind.
    pub fn for_event(kind: EventKind) -> Self {
        match kind {
            EventKind::Message => Self::AutoReply,
            EventKind::Follow => Self::Welcome,
            EventKind::Comment => Self::CommentReply,
            EventKind::Mention => Self::MentionReply,
        }
    }

    /// Column holding the marker for this reply kind.
    pub(crate) fn column(&self) -> &'static str {
        match self {
            Self::AutoReply => "auto_reply_sent",
            Self::Welcome => "welcome_sent",
            Self::CommentReply => "comment_reply_sent",
            Self::MentionReply => "mention_reply_sent",
        }
    }
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// Natural key of a lead.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity {
    /// Channel the lead arrived through.
    pub channel: Channel,
    /// Provider-specific user id (or email/phone fallback).
    pub channel_user_id: String,
}

impl Identity {
    /// Build an identity, rejecting blank user ids.
    pub fn new(channel: Channel, channel_user_id: &str) -> Option<Self> {
        let trimmed = channel_user_id.trim();
        if trimmed.is_empty() {
            return None;
        }
        Some(Self {
            channel,
            channel_user_id: trimmed.to_owned(),
        })
    }

    /// Identity for channels without a stable provider id: email first,
    /// then phone.
    pub fn from_contact(channel: Channel, email: Option<&str>, phone: Option<&str>) -> Option<Self> {
        if let Some(email) = email.and_then(normalize_email) {
            return Some(Self {
                channel,
                channel_user_id: email,
            });
        }
        phone.and_then(normalize_phone).map(|phone| Self {
            channel,
            channel_user_id: phone,
        })
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.channel, self.channel_user_id)
    }
}

/// One entry in a lead's append-only audit log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    /// Note body.
    pub text: String,
    /// When the note was appended.
    pub created_at: DateTime<Utc>,
    /// Staff member that wrote it; `None` for pipeline notes.
    pub created_by: Option<String>,
}

/// A persisted lead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lead {
    /// Stable record id (UUID v4).
    pub id: String,
    /// Channel the lead arrived through.
    pub channel: Channel,
    /// Provider user id or email/phone fallback.
    pub channel_user_id: String,
    /// Best known display name.
    pub display_name: String,
    /// Whether `display_name` is still a generated placeholder.
    pub name_is_placeholder: bool,
    /// Email address, if known.
    pub email: Option<String>,
    /// Phone number, if known.
    pub phone: Option<String>,
    /// Most recent inbound text.
    pub message: Option<String>,
    /// Pipeline status.
    pub status: LeadStatus,
    /// Lead temperature.
    pub qualification: Qualification,
    /// Kind of the event that created the lead.
    pub interaction_type: EventKind,
    /// Number of normalized events applied to this lead.
    pub interaction_count: u64,
    /// Latest event timestamp seen.
    pub last_interaction_at: Option<DateTime<Utc>>,
    /// Follows the business account.
    pub is_follower: bool,
    /// Has commented on a post.
    pub has_commented: bool,
    /// Has mentioned the business account.
    pub has_mentioned: bool,
    /// Message auto-reply delivered.
    pub auto_reply_sent: bool,
    /// Follower welcome delivered.
    pub welcome_sent: bool,
    /// Comment thank-you delivered.
    pub comment_reply_sent: bool,
    /// Mention thank-you delivered.
    pub mention_reply_sent: bool,
    /// Provider-specific extras, namespaced by the adapter that wrote them.
    pub metadata: BTreeMap<String, serde_json::Value>,
    /// Free-form staff tags.
    pub tags: Vec<String>,
    /// Append-only notes, oldest first.
    pub notes: Vec<Note>,
    /// Last outbound contact by staff or broadcast.
    pub last_contacted_at: Option<DateTime<Utc>>,
    /// Row creation time.
    pub created_at: DateTime<Utc>,
    /// Last modification time.
    pub updated_at: DateTime<Utc>,
}

impl Lead {
    /// The lead's natural key.
    pub fn identity(&self) -> Identity {
        Identity {
            channel: self.channel,
            channel_user_id: self.channel_user_id.clone(),
        }
    }

    /// Whether the reply of the given kind has already been delivered.
    pub fn reply_sent(&self, kind: ReplyKind) -> bool {
        match kind {
            ReplyKind::AutoReply => self.auto_reply_sent,
            ReplyKind::Welcome => self.welcome_sent,
            ReplyKind::CommentReply => self.comment_reply_sent,
            ReplyKind::MentionReply => self.mention_reply_sent,
        }
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors from the lead store.
#[derive(Debug, thiserror::Error)]
pub enum LeadError {
    /// Database operation failed.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// No lead with the given id exists.
    #[error("lead not found: {0}")]
    NotFound(String),

    /// A lead for this identity already exists.
    #[error("lead already exists for {0}")]
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

    /// A JSON column could not be encoded or decoded.
    #[error("json column error: {0}")]
    Json(#[from] serde_json::Error),

    /// The supplied data does not form a valid lead.
    #[error("invalid lead: {0}")]
    Invalid(String),
}

// ---------------------------------------------------------------------------
// Pure helpers
// ---------------------------------------------------------------------------

/// Placeholder display name for a lead whose sender name is unknown.
pub fn placeholder_name(channel: Channel) -> String {
    format!("{} User", channel.label())
}

/// "<Channel> User" optionally followed by an id, e.g. "Instagram User 123".
///
/// Only channel words count, so real names ending in "User" are kept.
static PLACEHOLDER_PATTERN: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^(?:instagram|facebook|messenger|whatsapp|email|website|web|form|channel[a-z0-9_-]*)\s+user(?:\s+\S+)?$",
    )
    .ok()
});

/// Whether a display name is a generic placeholder rather than a real name.
pub fn is_placeholder_name(name: &str) -> bool {
    let trimmed = name.trim();
    trimmed.is_empty()
        || trimmed.eq_ignore_ascii_case("unknown")
        || PLACEHOLDER_PATTERN
            .as_ref()
            .is_some_and(|re| re.is_match(trimmed))
}

/// Lowercase and trim an email address; `None` if it is not plausibly one.
pub fn normalize_email(raw: &str) -> Option<String> {
    let email = raw.trim().to_lowercase();
    let (local, domain) = email.split_once('@')?;
    if local.is_empty() || domain.is_empty() || email.contains(char::is_whitespace) {
        return None;
    }
    Some(email)
}

/// Reduce a phone number to its digits; `None` if fewer than five remain.
pub fn normalize_phone(raw: &str) -> Option<String> {
    let digits: String = raw.chars().filter(char::is_ascii_digit).collect();
    (digits.len() >= 5).then_some(digits)
}

/// Canonical timestamp text stored in SQLite.
///
/// Fixed-width UTC with millisecond precision, so lexicographic order matches
/// chronological order inside SQL comparisons.
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parse a timestamp written by [`format_timestamp`].
///
/// # Errors
///
/// Returns [`LeadError::InvalidTimestamp`] if the text is not RFC 3339.
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, LeadError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|_| LeadError::InvalidTimestamp(raw.to_owned()))
}
