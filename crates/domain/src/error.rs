/// Shared error type used across all topicnode crates.
///
/// The first four variants are the failure kinds a master node interaction
/// can produce; the rest cover local conditions.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Connect/send failure at the transport primitive level.
    #[error("transport: {0}")]
    Transport(String),

    /// The reply envelope carried an `error` field.
    #[error("protocol: {0}")]
    Protocol(String),

    /// A bounded wait or retry budget was exhausted.
    #[error("timeout: {0}")]
    Timeout(String),

    /// Malformed topic, pattern, or profile.
    #[error("validation: {0}")]
    Validation(String),

    #[error("not connected")]
    NotConnected,

    #[error("cancelled")]
    Cancelled,

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("config: {0}")]
    Config(String),
}

impl Error {
    /// Whether this error originated on the master node side.
    pub fn is_protocol(&self) -> bool {
        matches!(self, Error::Protocol(_))
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
