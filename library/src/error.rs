use thiserror::Error;

/// Local media could not be obtained.
#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum MediaError {
    /// The user refused access to camera or microphone.
    #[error("access to local media was denied")]
    Denied,
    /// No usable capture device.
    #[error("local media is unavailable: {0}")]
    Unavailable(String),
}

/// The session engine rejected a description or a candidate.
#[derive(Debug, Clone, Eq, PartialEq, Error)]
#[error("{operation} failed: {reason}")]
pub struct NegotiationError {
    /// Engine operation that failed, e.g. `set_remote_description`
    pub operation: &'static str,
    /// Engine supplied reason
    pub reason: String,
}

impl NegotiationError {
    pub fn new(operation: &'static str, reason: impl Into<String>) -> Self {
        Self {
            operation,
            reason: reason.into(),
        }
    }
}

/// Failure of an operation on an established bus connection.
#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum BusError {
    /// The connection task is gone, nothing can be sent anymore.
    #[error("bus connection is closed")]
    Closed,
    /// Payload could not be carried by this transport.
    #[error("payload is not valid UTF-8")]
    InvalidPayload,
}

/// Bus connection could not be established.
#[derive(Debug, Error)]
#[error("failed to connect to bus at {url}: {reason}")]
pub struct ConnectError {
    pub url: String,
    pub reason: String,
}

/// Everything that can go wrong while driving a call.
///
/// None of these is fatal, every one of them leaves the call in a state from which
/// a new call can be started.
#[derive(Debug, Error)]
pub enum Error {
    #[error("media acquisition failed: {0}")]
    MediaAcquisition(#[from] MediaError),
    #[error("negotiation failed: {0}")]
    Negotiation(#[from] NegotiationError),
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),
    #[error(transparent)]
    Bus(#[from] BusError),
    #[error(transparent)]
    Connect(#[from] ConnectError),
    #[error("invalid configuration: {0}")]
    Config(#[from] envy::Error),
    #[error("call agent has shut down")]
    AgentGone,
}

pub type Result<T> = std::result::Result<T, Error>;
