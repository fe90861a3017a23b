//! Errors raised at the cloud API boundary.

use serde::Deserialize;
use thiserror::Error;

/// Errors raised while talking to the provider.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum CloudError {
    /// Raised when the request never produced an HTTP response.
    #[error("transport failure: {message}")]
    Transport {
        /// Message returned by the HTTP client.
        message: String,
    },
    /// Raised when a successful response body cannot be decoded.
    #[error("failed to decode {resource} response: {message}")]
    Decode {
        /// Resource being decoded.
        resource: String,
        /// Decoder error message.
        message: String,
    },
    /// Raised when the provider answers with a non-success status.
    #[error("request failed with status {status}: {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// First provider message, or the raw body when it is not an
        /// error envelope.
        message: String,
    },
    /// Raised when a successful response carries no body.
    #[error("response with status {status} carried no body")]
    MissingBody {
        /// HTTP status code.
        status: u16,
    },
    /// Raised when a mutating call does not return a `Location` header.
    #[error("response with status {status} carried no request location")]
    MissingLocation {
        /// HTTP status code.
        status: u16,
    },
}

impl CloudError {
    /// Builds an [`CloudError::Api`] from a raw response message, surfacing
    /// the first message of the provider error envelope when present.
    #[must_use]
    pub fn from_response(status: u16, raw: &str) -> Self {
        Self::Api {
            status,
            message: api_message(raw),
        }
    }
}

/// Error envelope returned by the provider on failed requests.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RestError {
    /// HTTP status repeated in the body.
    #[serde(default)]
    pub http_status: Option<u16>,
    /// Individual error entries.
    #[serde(default)]
    pub messages: Vec<RestMessage>,
}

/// Single entry of a [`RestError`].
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RestMessage {
    /// Provider error code, for example `[VDC-5-1913]`.
    #[serde(default)]
    pub error_code: Option<String>,
    /// Human-readable message.
    #[serde(default)]
    pub message: String,
}

/// Extracts the operator-facing message from a raw error body.
///
/// The first non-empty entry of a `{"messages": [...]}` envelope wins. Any
/// body that does not decode to that shape is returned trimmed, as-is.
#[must_use]
pub fn api_message(raw: &str) -> String {
    serde_json::from_str::<RestError>(raw)
        .ok()
        .and_then(|envelope| {
            envelope
                .messages
                .into_iter()
                .map(|entry| entry.message)
                .find(|message| !message.trim().is_empty())
        })
        .unwrap_or_else(|| raw.trim().to_owned())
}
