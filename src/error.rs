use regex::Regex;
use std::io;
use std::sync::OnceLock;
use thiserror::Error;

/// Gateway and service-unavailable class statuses retried by default.
pub const RETRIABLE_STATUS_CODES: [u16; 4] = [502, 503, 504, 512];

pub const TOO_MANY_REQUESTS: u16 = 429;

/// Codes recognised inside untyped error text. 429 is included so rate
/// limiting stays visible; whether it is retried is up to the policy.
pub const EMBEDDED_STATUS_CODES: [u16; 5] = [502, 503, 504, 512, TOO_MANY_REQUESTS];

/// Recognised kinds of transient remote failure.
///
/// Every error crossing the remote-call boundary is normalised into one of
/// these (or none, meaning fatal) before the retry layer sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransientKind {
    Timeout,
    Connection,
    Protocol,
    RateLimited,
    ServiceUnavailable(u16),
}

impl std::fmt::Display for TransientKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransientKind::Timeout => write!(f, "timeout"),
            TransientKind::Connection => write!(f, "connection"),
            TransientKind::Protocol => write!(f, "protocol"),
            TransientKind::RateLimited => write!(f, "rate limited"),
            TransientKind::ServiceUnavailable(code) => write!(f, "service unavailable ({code})"),
        }
    }
}

/// Errors that may be transient expose the kind they would be retried as.
///
/// Returning `None` means the error is fatal regardless of retry policy.
pub trait Classify {
    fn transient_kind(&self) -> Option<TransientKind>;
}

/// Error raised by calls against the remote service
#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Failed to decode response: {0}")]
    Decode(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl RemoteError {
    pub fn status(status: u16, body: impl Into<String>) -> Self {
        RemoteError::Status {
            status,
            body: body.into(),
        }
    }

    /// Normalise an untyped error message.
    ///
    /// Some client errors only carry the upstream status inside their text,
    /// e.g. `"Unknown error: (503) upstream"` or `"429 Too Many Requests"`. A
    /// gateway or rate-limit code that stands alone (not part of a longer
    /// number) turns the message into a `Status` error; anything else stays
    /// `Unknown` and is fatal.
    pub fn from_message(message: impl Into<String>) -> Self {
        let message = message.into();
        match embedded_status_code(&message, &EMBEDDED_STATUS_CODES) {
            Some(status) => RemoteError::Status {
                status,
                body: message,
            },
            None => RemoteError::Unknown(message),
        }
    }

    pub fn status_code(&self) -> Option<u16> {
        match self {
            RemoteError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status_code() == Some(404)
    }
}

impl Classify for RemoteError {
    fn transient_kind(&self) -> Option<TransientKind> {
        match self {
            RemoteError::Status { status, .. } if *status == TOO_MANY_REQUESTS => {
                Some(TransientKind::RateLimited)
            }
            RemoteError::Status { status, .. } if *status >= 500 => {
                Some(TransientKind::ServiceUnavailable(*status))
            }
            RemoteError::Timeout(_) => Some(TransientKind::Timeout),
            RemoteError::Connection(_) => Some(TransientKind::Connection),
            RemoteError::Protocol(_) => Some(TransientKind::Protocol),
            RemoteError::Status { .. }
            | RemoteError::Decode(_)
            | RemoteError::InvalidRequest(_)
            | RemoteError::Unknown(_) => None,
        }
    }
}

impl Classify for io::Error {
    fn transient_kind(&self) -> Option<TransientKind> {
        match self.kind() {
            io::ErrorKind::TimedOut => Some(TransientKind::Timeout),
            io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected => Some(TransientKind::Connection),
            io::ErrorKind::UnexpectedEof | io::ErrorKind::BrokenPipe => {
                Some(TransientKind::Protocol)
            }
            _ => None,
        }
    }
}

impl From<reqwest::Error> for RemoteError {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            return RemoteError::Status {
                status: status.as_u16(),
                body: err.to_string(),
            };
        }

        // is_connect must be checked before is_request, connect failures are
        // request-kind errors too.
        if err.is_timeout() {
            RemoteError::Timeout(err.to_string())
        } else if err.is_connect() {
            RemoteError::Connection(err.to_string())
        } else if err.is_decode() {
            RemoteError::Decode(err.to_string())
        } else if err.is_body() || err.is_request() {
            RemoteError::Protocol(err.to_string())
        } else if err.is_builder() {
            RemoteError::InvalidRequest(err.to_string())
        } else {
            RemoteError::from_message(err.to_string())
        }
    }
}

impl From<serde_json::Error> for RemoteError {
    fn from(err: serde_json::Error) -> Self {
        RemoteError::Decode(err.to_string())
    }
}

fn three_digit_numbers() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?:^|\D)(\d{3})(?:\D|$)").expect("static pattern"))
}

/// First standalone three-digit number in `message` that belongs to `codes`.
pub fn embedded_status_code(message: &str, codes: &[u16]) -> Option<u16> {
    // Matches consume one delimiter on each side, so "503 504" needs the
    // second number to be found from a fresh search position.
    let pattern = three_digit_numbers();
    let mut start = 0;
    while let Some(captures) = pattern.captures_at(message, start) {
        let number = captures.get(1)?;
        if let Ok(code) = number.as_str().parse::<u16>() {
            if codes.contains(&code) {
                return Some(code);
            }
        }
        start = number.end();
    }
    None
}
