//! Chat data models
//!
//! Defines the sender identity, the immutable [`Message`] value and its
//! persisted wire shape, [`MessageRecord`].

use crate::chat::validation::{validate_length, validate_non_empty, ValidationError};
use crate::error::AppError;
use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Maximum message length in characters
pub const MAX_TEXT_LENGTH: usize = 1000;

/// Number of retries a failed message is allowed
pub const MAX_RETRIES: u32 = 3;

/// Largest message ID, 2^53 - 1
///
/// Keeps every ID exactly representable as a JSON number in any reader.
pub const MAX_MESSAGE_ID: u64 = (1 << 53) - 1;

/// Check message text and return it trimmed
///
/// The length limit applies to the text as given, before trimming.
pub fn validate_text(text: &str) -> Result<String, ValidationError> {
    validate_length(text, MAX_TEXT_LENGTH, "Message text")?;
    validate_non_empty(text, "Message text")
}

/// Identity of a message author
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct UserInfo {
    /// Display name
    pub name: String,
    /// Stable user identifier
    pub id: String,
}

impl UserInfo {
    /// Create a new identity
    pub fn new(name: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id: id.into(),
        }
    }

    /// Whether an identity has been chosen for this session
    pub fn is_set(&self) -> bool {
        !self.id.is_empty()
    }
}

/// A single chat message
///
/// Messages never change after construction. Status changes are expressed
/// by building a new message, see [`Message::with_retry_increment`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    id: u64,
    text: String,
    author: UserInfo,
    delivered: bool,
    timestamp: DateTime<Utc>,
    retry_count: u32,
}

/// Serialized form of a [`Message`]
///
/// Field names match the persisted history layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRecord {
    /// Message ID
    pub id: u64,
    /// Message text
    pub text: String,
    /// Author identity at send time
    pub user_info: UserInfo,
    /// Delivery status
    pub status: bool,
    /// ISO-8601 creation time
    pub timestamp: String,
    /// Retry attempts already made
    pub retry_count: u32,
}

impl Message {
    /// Create a message, validating its text
    ///
    /// The text is trimmed. Fails with [`AppError::Validation`] if the text is
    /// blank or longer than [`MAX_TEXT_LENGTH`] characters, or if `id` is not
    /// in `1..=MAX_MESSAGE_ID`. A missing `timestamp` defaults to now.
    pub fn new(
        id: u64,
        text: &str,
        author: UserInfo,
        delivered: bool,
        timestamp: Option<DateTime<Utc>>,
        retry_count: u32,
    ) -> Result<Self, AppError> {
        if !(1..=MAX_MESSAGE_ID).contains(&id) {
            return Err(AppError::Validation(format!(
                "Message ID must be between 1 and {}",
                MAX_MESSAGE_ID
            )));
        }
        let text = validate_text(text)?;

        Ok(Self {
            id,
            text,
            author,
            delivered,
            timestamp: timestamp.unwrap_or_else(Utc::now),
            retry_count,
        })
    }

    /// Create a delivered, never-retried message stamped with the current time
    pub fn create(id: u64, text: &str, author: UserInfo) -> Result<Self, AppError> {
        Self::new(id, text, author, true, None, 0)
    }

    /// Message ID
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Trimmed message text
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Author identity at send time
    pub fn author(&self) -> &UserInfo {
        &self.author
    }

    /// Whether the message was accepted by the send path
    pub fn delivered(&self) -> bool {
        self.delivered
    }

    /// Creation time
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Retry attempts already made
    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    /// Whether `user_id` authored this message
    pub fn is_own_message(&self, user_id: &str) -> bool {
        self.author.id == user_id
    }

    /// Whether the send failed
    pub fn is_failed(&self) -> bool {
        !self.delivered
    }

    /// Whether the message may be retried
    pub fn can_retry(&self) -> bool {
        self.is_failed() && self.retry_count < MAX_RETRIES
    }

    /// Copy of this message with one more retry recorded
    pub fn with_retry_increment(&self) -> Self {
        Self {
            retry_count: self.retry_count.saturating_add(1),
            ..self.clone()
        }
    }

    /// Convert to the persisted wire shape
    pub fn to_record(&self) -> MessageRecord {
        MessageRecord {
            id: self.id,
            text: self.text.clone(),
            user_info: self.author.clone(),
            status: self.delivered,
            timestamp: self.timestamp.to_rfc3339_opts(SecondsFormat::AutoSi, true),
            retry_count: self.retry_count,
        }
    }

    /// Convert to a JSON value in the persisted wire shape
    pub fn to_json(&self) -> Value {
        // MessageRecord only holds strings, integers and bools
        serde_json::to_value(self.to_record()).unwrap_or(Value::Null)
    }

    /// Rebuild a message from loosely-typed JSON
    ///
    /// Coerces what it can: numeric strings for the ID, numbers and booleans
    /// for the text, truthiness for the status. Missing authors default to an
    /// empty identity, missing timestamps to now and a missing retry count to
    /// zero. Returns `None` when the input is not an object, the ID is not a
    /// positive integer, or the text would be invalid.
    pub fn from_json(value: &Value) -> Option<Self> {
        let obj = value.as_object()?;

        let id = coerce_id(obj.get("id")?)?;
        let text = coerce_text(obj.get("text"))?;
        let author = match obj.get("userInfo") {
            Some(Value::Object(info)) => UserInfo {
                name: coerce_string(info.get("name")),
                id: coerce_string(info.get("id")),
            },
            _ => UserInfo::default(),
        };
        let delivered = is_truthy(obj.get("status"));
        let timestamp = obj.get("timestamp").and_then(coerce_timestamp);
        let retry_count = obj
            .get("retryCount")
            .and_then(coerce_count)
            .unwrap_or(0);

        Self::new(id, &text, author, delivered, timestamp, retry_count).ok()
    }
}

impl From<&Message> for MessageRecord {
    fn from(message: &Message) -> Self {
        message.to_record()
    }
}

fn coerce_id(value: &Value) -> Option<u64> {
    let id = match value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().and_then(integral_f64))?,
        Value::String(s) => {
            let s = s.trim();
            s.parse::<u64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().and_then(integral_f64))?
        }
        _ => return None,
    };
    (1..=MAX_MESSAGE_ID).contains(&id).then_some(id)
}

fn integral_f64(f: f64) -> Option<u64> {
    (f.is_finite() && f >= 0.0 && f.fract() == 0.0 && f <= u64::MAX as f64).then_some(f as u64)
}

/// Falsy values (`0`, `false`) count as missing text
fn coerce_text(value: Option<&Value>) -> Option<String> {
    match value {
        Some(Value::String(s)) => Some(s.clone()),
        Some(Value::Number(n)) if n.as_f64() != Some(0.0) => Some(n.to_string()),
        Some(Value::Bool(true)) => Some("true".to_string()),
        _ => None,
    }
}

/// Falsy values become the empty string
fn coerce_string(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) if n.as_f64() != Some(0.0) => n.to_string(),
        Some(Value::Bool(true)) => "true".to_string(),
        _ => String::new(),
    }
}

fn is_truthy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Array(_)) | Some(Value::Object(_)) => true,
    }
}

/// Accepts RFC 3339 strings and epoch milliseconds
fn coerce_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s.trim())
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        Value::Number(n) => n
            .as_i64()
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
        _ => None,
    }
}

fn saturate_u32(n: u64) -> u32 {
    u32::try_from(n).unwrap_or(u32::MAX)
}

fn coerce_count(value: &Value) -> Option<u32> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().and_then(integral_f64))
            .map(saturate_u32),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<u64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().and_then(integral_f64))
                .map(saturate_u32)
        }
        _ => None,
    }
}
