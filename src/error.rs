use std::fmt;

/// Configuration, transport-build, and fatal-process errors.
#[derive(Debug)]
pub enum RelayClientError {
    Config(String),
    Transport(String),
    Credential(String),
    Internal(String),
}

impl fmt::Display for RelayClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelayClientError::Config(msg) => write!(f, "config error: {msg}"),
            RelayClientError::Transport(msg) => write!(f, "transport error: {msg}"),
            RelayClientError::Credential(msg) => write!(f, "credential error: {msg}"),
            RelayClientError::Internal(msg) => write!(f, "internal error: {msg}"),
        }
    }
}

impl std::error::Error for RelayClientError {}

/// Outcomes of a single `GET /server/request` poll attempt. `Timeout` is
/// the expected steady state, not a failure — the worker loop
/// branches on this directly rather than treating it as `Err`.
#[derive(Debug)]
pub enum PollError {
    /// The long-poll elapsed with no request queued; poll again immediately.
    Timeout,
    /// The relay rejected this server name (HTTP 403).
    Forbidden,
    /// The relay connection could not be established.
    ConnectionRefused(String),
    /// Any other non-2xx/non-403 response or I/O failure; retryable.
    Transient { status: Option<u16>, body: String },
    /// A 2xx response whose body did not parse as a relayed request.
    Malformed(String),
}

impl fmt::Display for PollError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PollError::Timeout => write!(f, "poll timed out"),
            PollError::Forbidden => write!(f, "server name rejected by relay"),
            PollError::ConnectionRefused(msg) => write!(f, "relay connection refused: {msg}"),
            PollError::Transient { status, body } => {
                write!(f, "transient poll error (status {status:?}): {body}")
            }
            PollError::Malformed(msg) => write!(f, "malformed relay response: {msg}"),
        }
    }
}

impl std::error::Error for PollError {}
