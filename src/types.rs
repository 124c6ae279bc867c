//! Core types for Discord Purge

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Main error type for Discord Purge
#[derive(Error, Debug)]
pub enum Error {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Bad status code {status} for {endpoint}")]
    BadRequest { status: StatusCode, endpoint: String },

    #[error("Bad status code {0}, is your token correct?")]
    Unauthorized(StatusCode),

    #[error("Server error {status} for {endpoint}")]
    ServerError { status: StatusCode, endpoint: String },

    #[error("Status code {status} is unhandled ({endpoint})")]
    UnhandledStatus { status: StatusCode, endpoint: String },

    #[error("Server returned no content for {0}")]
    MissingBody(String),

    #[error("Invalid ID: {0:?}")]
    InvalidId(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("{context}: {source}")]
    Context {
        context: String,
        #[source]
        source: Box<Error>,
    },

    #[error("Run cancelled")]
    Cancelled,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Innermost error, skipping any context wrappers
    pub fn root(&self) -> &Error {
        match self {
            Error::Context { source, .. } => source.root(),
            other => other,
        }
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Annotate an error with the operation that was being attempted
pub trait ResultExt<T> {
    fn context(self, context: impl Into<String>) -> Result<T>;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| Error::Context {
            context: context.into(),
            source: Box::new(e),
        })
    }
}

/// Discord object ID
///
/// Snowflakes travel as decimal strings. Only non-empty ASCII digit strings are
/// accepted, so an ID can always be spliced into a request path as-is.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Snowflake(String);

impl Snowflake {
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(Error::InvalidId(s.to_string()));
        }
        Ok(Self(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Snowflake {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<Snowflake> for String {
    fn from(value: Snowflake) -> Self {
        value.0
    }
}

impl fmt::Display for Snowflake {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The authenticated account
#[derive(Debug, Clone, Deserialize)]
pub struct Me {
    pub id: Snowflake,
}

/// Channel type discriminator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(from = "u32")]
pub enum ChannelKind {
    /// One-to-one direct message
    Private,
    /// Group direct message
    Group,
    Other(u32),
}

impl From<u32> for ChannelKind {
    fn from(value: u32) -> Self {
        match value {
            1 => ChannelKind::Private,
            3 => ChannelKind::Group,
            other => ChannelKind::Other(other),
        }
    }
}

/// A counterpart user
#[derive(Debug, Clone, Deserialize)]
pub struct Recipient {
    pub id: Snowflake,

    #[serde(default)]
    pub username: String,
}

/// A DM, group DM or guild channel
#[derive(Debug, Clone, Deserialize)]
pub struct Channel {
    pub id: Snowflake,

    #[serde(rename = "type")]
    pub kind: ChannelKind,

    #[serde(default)]
    pub recipients: Vec<Recipient>,

    #[serde(default)]
    pub name: Option<String>,
}

impl Channel {
    /// The only recipient of a one-to-one DM, if this is one
    pub fn sole_recipient(&self) -> Option<&Recipient> {
        match (self.kind, self.recipients.as_slice()) {
            (ChannelKind::Private, [only]) => Some(only),
            _ => None,
        }
    }

    /// Human-readable label for log lines
    pub fn label(&self) -> String {
        if let Some(name) = self.name.as_deref().filter(|n| !n.is_empty()) {
            return format!("{} ('{}')", self.id, name);
        }
        let names: Vec<&str> = self
            .recipients
            .iter()
            .map(|r| r.username.as_str())
            .filter(|n| !n.is_empty())
            .collect();
        if names.is_empty() {
            self.id.to_string()
        } else {
            format!("{} ({})", self.id, names.join(", "))
        }
    }
}

/// Friend or contact entry
#[derive(Debug, Clone, Deserialize)]
pub struct Relationship {
    pub id: Snowflake,

    #[serde(rename = "type", default)]
    pub kind: u32,

    #[serde(rename = "user")]
    pub recipient: Recipient,
}

/// A server the account is a member of
#[derive(Debug, Clone, Deserialize)]
pub struct Guild {
    pub id: Snowflake,

    #[serde(default)]
    pub name: String,
}

/// Message type of plain text messages, the only deletable kind
pub const DELETABLE_MESSAGE_TYPE: u32 = 0;

/// One message inside a search context group
#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub id: Snowflake,

    pub channel_id: Snowflake,

    /// Whether this message matched the search filter
    #[serde(default)]
    pub hit: bool,

    #[serde(rename = "type", default)]
    pub kind: u32,
}

impl Message {
    pub fn is_deletable(&self) -> bool {
        self.kind == DELETABLE_MESSAGE_TYPE
    }
}

/// One page of search results
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MessagePage {
    /// Total number of matches, informational only
    #[serde(default)]
    pub total_results: u64,

    /// Windows of messages, each surrounding at most one hit
    #[serde(rename = "messages", default)]
    pub context_groups: Vec<Vec<Message>>,
}

impl MessagePage {
    pub fn is_empty(&self) -> bool {
        self.context_groups.is_empty()
    }

    /// The hit of each context group, in page order; groups without one are passed over
    pub fn hits(&self) -> impl Iterator<Item = &Message> {
        self.context_groups
            .iter()
            .filter_map(|group| group.iter().find(|msg| msg.hit))
    }

    pub fn first_hit(&self) -> Option<&Message> {
        self.hits().next()
    }
}

/// Server-directed wait returned alongside 429 and 202 responses
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BackoffDirective {
    /// Milliseconds to wait before retrying
    #[serde(default)]
    pub retry_after: Option<f64>,
}

impl BackoffDirective {
    /// Requested delay, with negative or non-finite values clamped to zero
    pub fn delay(&self) -> Duration {
        match self.retry_after {
            Some(ms) if ms.is_finite() && ms > 0.0 => Duration::from_millis(ms.ceil() as u64),
            _ => Duration::ZERO,
        }
    }
}

/// Running totals for one run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunCounters {
    /// Messages deleted (or that would have been, in a dry run)
    pub deleted: u64,

    /// Requests that reached the network, retries included
    pub requests: u64,
}
