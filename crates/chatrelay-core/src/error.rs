use thiserror::Error;

/// Maximum number of characters of an upstream body kept in an error.
pub const BODY_EXCERPT_LIMIT: usize = 512;

/// Top-level error type for the relay.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Upstream error: {0}")]
    Upstream(#[from] UpstreamError),
}

/// Failures talking to the generative-AI provider.
#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("Upstream returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("Upstream opened a stream with no body")]
    EmptyBody,

    #[error("Upstream request failed: {0}")]
    Transport(String),

    #[error("Invalid upstream response: {0}")]
    InvalidResponse(String),

    /// A candidate object in the stream failed to parse. Recovered locally.
    #[error("Malformed fragment ({reason}): {excerpt}")]
    MalformedFragment { excerpt: String, reason: String },

    #[error("Response blocked by content safety filters ({reason})")]
    SafetyBlocked { reason: String },

    #[error("Upstream returned no usable text")]
    EmptyCandidate,
}

impl UpstreamError {
    /// Build an HTTP error, truncating the body to [`BODY_EXCERPT_LIMIT`] chars.
    pub fn http(status: u16, body: &str) -> Self {
        UpstreamError::Http {
            status,
            body: excerpt(body, BODY_EXCERPT_LIMIT),
        }
    }

    /// Message suitable for showing to an end user.
    pub fn user_message(&self) -> String {
        match self {
            UpstreamError::SafetyBlocked { .. } => {
                "The response was blocked by the provider's content safety filters.".into()
            }
            UpstreamError::EmptyCandidate => "The model returned an empty response.".into(),
            other => other.to_string(),
        }
    }
}

/// Truncate `text` to at most `limit` chars on a char boundary.
pub fn excerpt(text: &str, limit: usize) -> String {
    match text.char_indices().nth(limit) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

pub type Result<T> = std::result::Result<T, RelayError>;
