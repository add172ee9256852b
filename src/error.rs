//! Error types for the forecasting agent.
//!
//! The taxonomy follows the run-time behavior of the pipeline: transient
//! network failures are retried, rate limits carry a `Retry-After` hint,
//! credit exhaustion carries a parsed reset time so long-running loops can
//! sleep through it, and tool failures never escape the tool layer (they are
//! converted to error envelopes before the model sees them).

use chrono::{DateTime, Duration, Local, NaiveTime};
use regex::Regex;
use std::sync::OnceLock;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the crate
#[derive(Error, Debug)]
pub enum Error {
    /// HTTP request error
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Filesystem error (notes, history, logs)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid configuration (missing credential, bad knob value)
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// API error reported by an upstream service
    #[error("API error: {0}")]
    Api(String),

    /// Rate limited by an upstream service (HTTP 429)
    #[error("Rate limited{}", retry_after.map(|s| format!(", retry after {s}s")).unwrap_or_default())]
    RateLimited {
        /// Seconds from the `Retry-After` header, when the service sent one
        retry_after: Option<u64>,
    },

    /// Model credits exhausted; `reset_time` is parsed from the provider's
    /// error message when it matches the known pattern
    #[error("Credits exhausted: {message}")]
    CreditExhausted {
        message: String,
        reset_time: Option<DateTime<Local>>,
    },

    /// Streaming error in the model session
    #[error("Streaming error: {0}")]
    Stream(String),

    /// Tool execution error (converted to an error envelope at the registry)
    #[error("Tool error: {0}")]
    Tool(String),

    /// Invalid input (tool argument validation, builder misuse)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Forecast validation error (percentiles, CDF shape)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Submission rejected by the platform
    #[error("Submission failed ({status}): {reason}")]
    Submission { status: u16, reason: String },

    /// Sandbox failure (Docker missing, container creation failed)
    #[error("Sandbox error: {0}")]
    Sandbox(String),

    /// Timeout error
    #[error("Request timeout")]
    Timeout,

    /// Other errors
    #[error("Error: {0}")]
    Other(String),
}

impl Error {
    /// Create a new config error
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// Create a new API error
    pub fn api(msg: impl Into<String>) -> Self {
        Error::Api(msg.into())
    }

    /// Create a new stream error
    pub fn stream(msg: impl Into<String>) -> Self {
        Error::Stream(msg.into())
    }

    /// Create a new tool error
    pub fn tool(msg: impl Into<String>) -> Self {
        Error::Tool(msg.into())
    }

    /// Create a new invalid input error
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Error::InvalidInput(msg.into())
    }

    /// Create a new validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Error::Validation(msg.into())
    }

    /// Create a new sandbox error
    pub fn sandbox(msg: impl Into<String>) -> Self {
        Error::Sandbox(msg.into())
    }

    /// Create a new other error
    pub fn other(msg: impl Into<String>) -> Self {
        Error::Other(msg.into())
    }

    /// Create a timeout error
    pub fn timeout() -> Self {
        Error::Timeout
    }

    /// Create a submission error
    pub fn submission(status: u16, reason: impl Into<String>) -> Self {
        Error::Submission {
            status,
            reason: reason.into(),
        }
    }
}

fn credit_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)resets?\s+(\d{1,2})(?::(\d{2}))?\s*(am|pm)?\s*\(([^)]+)\)")
            .expect("credit reset pattern is valid")
    })
}

/// Parse a credit-exhaustion message from the model provider.
///
/// Expected shapes:
/// - `"out of extra usage · resets 6pm (Europe/Paris)"`
/// - `"out of usage · resets 2:30pm (America/New_York)"`
///
/// Returns `None` when the message is not a credit-exhaustion message at
/// all. When the message matches but the reset clause cannot be parsed, the
/// error is still returned with `reset_time: None`.
///
/// The reset instant is computed against the local clock: the named wall
/// time today, pushed to tomorrow if it already passed. This keeps the reset
/// within the next 24 hours, which is what the sleep-until-reset loop needs.
pub fn parse_credit_exhausted(message: &str) -> Option<Error> {
    let lower = message.to_lowercase();
    if !lower.contains("out of extra usage") && !lower.contains("out of usage") {
        return None;
    }

    let reset_time = credit_regex().captures(message).and_then(|caps| {
        let mut hour: u32 = caps.get(1)?.as_str().parse().ok()?;
        let minute: u32 = caps
            .get(2)
            .map(|m| m.as_str().parse().unwrap_or(0))
            .unwrap_or(0);
        if let Some(am_pm) = caps.get(3) {
            match am_pm.as_str().to_lowercase().as_str() {
                "pm" if hour != 12 => hour += 12,
                "am" if hour == 12 => hour = 0,
                _ => {}
            }
        }
        let wall = NaiveTime::from_hms_opt(hour, minute, 0)?;
        let now = Local::now();
        let mut reset = now
            .date_naive()
            .and_time(wall)
            .and_local_timezone(Local)
            .single()?;
        if reset <= now {
            reset += Duration::days(1);
        }
        Some(reset)
    });

    Some(Error::CreditExhausted {
        message: message.to_string(),
        reset_time,
    })
}
