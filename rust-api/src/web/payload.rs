//! Inbound webhook payload parsing and validation.

use chrono::DateTime;
use serde::Deserialize;
use thiserror::Error;

use crate::store::NewMessage;

/// Maximum length of `text`, in characters.
pub const MAX_TEXT_CHARS: usize = 4096;

/// Maximum number of digits in an MSISDN (E.164).
const MAX_MSISDN_DIGITS: usize = 15;

/// Webhook JSON body.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookPayload {
    pub message_id: String,
    #[serde(alias = "from")]
    pub from_msisdn: String,
    #[serde(default, alias = "to")]
    pub to_msisdn: Option<String>,
    pub ts: String,
    pub text: String,
}

/// A payload that failed parsing or validation.
///
/// `message_id` is kept when it could be read, so the failure can still be
/// correlated in logs.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("{reason}")]
pub struct ValidationError {
    pub message_id: Option<String>,
    pub reason: String,
}

impl WebhookPayload {
    /// Parse and validate a raw request body into an insertable message.
    pub fn parse(raw_body: &[u8]) -> Result<NewMessage, ValidationError> {
        let value: serde_json::Value =
            serde_json::from_slice(raw_body).map_err(|e| ValidationError {
                message_id: None,
                reason: format!("invalid json: {}", e),
            })?;

        let message_id = value
            .get("message_id")
            .and_then(|v| v.as_str())
            .map(str::to_string);

        let fail = |reason: String| ValidationError {
            message_id: message_id.clone(),
            reason,
        };

        let payload: WebhookPayload = serde_json::from_value(value).map_err(|e| fail(e.to_string()))?;
        payload.validate().map_err(fail)
    }

    fn validate(self) -> Result<NewMessage, String> {
        if self.message_id.trim().is_empty() {
            return Err("message_id must not be empty".to_string());
        }

        if !is_valid_msisdn(&self.from_msisdn) {
            return Err("from_msisdn must be '+' followed by up to 15 digits".to_string());
        }

        if let Some(to) = &self.to_msisdn {
            if !is_valid_msisdn(to) {
                return Err("to_msisdn must be '+' followed by up to 15 digits".to_string());
            }
        }

        let ts_unix_ms = parse_utc_ts(&self.ts)?;

        if self.text.chars().count() > MAX_TEXT_CHARS {
            return Err(format!("text must be at most {} characters", MAX_TEXT_CHARS));
        }

        Ok(NewMessage {
            message_id: self.message_id,
            from_msisdn: self.from_msisdn,
            to_msisdn: self.to_msisdn,
            ts: self.ts,
            ts_unix_ms,
            text: self.text,
        })
    }
}

/// `+` followed by 1-15 digits, the first non-zero.
pub fn is_valid_msisdn(raw: &str) -> bool {
    let Some(digits) = raw.strip_prefix('+') else {
        return false;
    };

    !digits.is_empty()
        && digits.len() <= MAX_MSISDN_DIGITS
        && !digits.starts_with('0')
        && digits.bytes().all(|b| b.is_ascii_digit())
}

/// Parse an RFC 3339 UTC timestamp (`Z` suffix) into Unix milliseconds.
fn parse_utc_ts(ts: &str) -> Result<i64, String> {
    if !ts.ends_with('Z') {
        return Err("ts must be a UTC timestamp ending with Z".to_string());
    }

    DateTime::parse_from_rfc3339(ts)
        .map(|dt| dt.timestamp_millis())
        .map_err(|_| "ts must be an RFC 3339 timestamp".to_string())
}
