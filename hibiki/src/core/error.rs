use thiserror::Error;

/// Boxed source error of the underlying transport.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result alias used across the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

// ---------------------------------------------

#[derive(Debug, Error)]
/// Error when applying a functional option.
pub enum OptionError {
    /// Queue group name is empty.
    #[error("queue group name must not be empty")]
    EmptyQueue,

    /// Queue group name contains whitespace.
    #[error("queue group name {0:?} must not contain whitespace")]
    InvalidQueue(String),

    /// A zero timeout can never succeed.
    #[error("timeout must be greater than zero")]
    ZeroTimeout,

    /// A subject passed as option is invalid.
    #[error(transparent)]
    Subject(#[from] SubjectError),

    /// A service needs something to answer requests with.
    #[error("service needs a handler or an HTTP handler")]
    MissingHandler,

    /// Rejected by a custom option.
    #[error("invalid option: {0}")]
    Invalid(String),
}

// ---------------------------------------------

#[derive(Debug, Error, PartialEq, Eq)]
/// Error when a subject is not a valid NATS subject.
pub enum SubjectError {
    /// The subject is empty.
    #[error("subject must not be empty")]
    Empty,

    /// The subject contains whitespace.
    #[error("subject {0:?} must not contain whitespace")]
    Whitespace(String),

    /// The subject has an empty token, like `foo..bar` or `.foo`.
    #[error("subject {0:?} contains an empty token")]
    EmptyToken(String),

    /// Wildcards are not allowed when publishing.
    #[error("subject {0:?} contains a wildcard and cannot be published to")]
    Wildcard(String),

    /// `>` can only be the last token.
    #[error("subject {0:?} uses '>' before the last token")]
    MisplacedRecursiveWildcard(String),
}

// ---------------------------------------------

#[derive(Debug, Error)]
/// Error when turning a value into bytes.
pub enum EncodeError {
    /// JSON serialization failed.
    #[error("failed to encode JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// Compression failed.
    #[error("failed to compress payload: {0}")]
    Compress(#[from] std::io::Error),

    /// Protobuf serialization failed.
    #[cfg(feature = "protobuf")]
    #[error("failed to encode protobuf: {0}")]
    Protobuf(#[from] prost::EncodeError),
}

#[derive(Debug, Error)]
/// Error when turning bytes back into a value.
pub enum DecodeError {
    /// JSON deserialization failed.
    #[error("failed to decode JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// Decompression failed.
    #[error("failed to decompress payload: {0}")]
    Decompress(#[from] std::io::Error),

    /// Input is not valid base64.
    #[error("failed to decode base64: {0}")]
    Base64(#[from] base64::DecodeError),

    /// Protobuf deserialization failed.
    #[cfg(feature = "protobuf")]
    #[error("failed to decode protobuf: {0}")]
    Protobuf(#[from] prost::DecodeError),
}

// ---------------------------------------------

#[derive(Debug, Error)]
/// All possible errors in hibiki.
pub enum Error {
    /// Could not connect to the server.
    #[error("failed to connect: {0}")]
    Connect(#[from] async_nats::ConnectError),

    /// An option could not be applied. Nothing was sent.
    #[error("invalid option: {0}")]
    Option(#[from] OptionError),

    /// Invalid subject.
    #[error("invalid subject: {0}")]
    Subject(#[from] SubjectError),

    /// Payload could not be encoded.
    #[error(transparent)]
    Encode(#[from] EncodeError),

    /// Payload could not be decoded.
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// The transport rejected a publish.
    #[error("failed to publish message: {0}")]
    Publish(#[source] BoxError),

    /// The transport rejected a subscription.
    #[error("failed to subscribe: {0}")]
    Subscribe(#[source] BoxError),

    /// The transport failed a request for a reason other than timeout.
    #[error("request failed: {0}")]
    Request(#[source] BoxError),

    /// Pending messages could not be flushed.
    #[error("failed to flush: {0}")]
    Flush(#[source] BoxError),

    /// A subscription or the connection could not be drained.
    #[error("failed to drain: {0}")]
    Drain(#[source] BoxError),

    /// No reply arrived in time.
    #[error("request timed out")]
    TimedOut,

    /// Nobody is subscribed to the request subject.
    #[error("no responders available for request")]
    NoResponders,

    /// The cancellation token fired before the reply arrived.
    #[error("request cancelled")]
    Cancelled,

    /// The connection has been closed.
    #[error("connection closed")]
    Closed,

    /// A reply was required but the message has no reply subject.
    #[error("unexpected null reply subject")]
    MissingReplySubject,

    /// The responder answered with a service error.
    #[error("service error {code}: {description}")]
    Service {
        /// Error code, usually an HTTP status code.
        code: u16,
        /// Human readable description.
        description: String,
    },

    /// A message could not be mapped to or from HTTP.
    #[error("invalid HTTP mapping: {0}")]
    Http(#[from] http::Error),
}

impl Error {
    /// Create a new [Error] from any type that can be converted to [Error].
    pub fn new<T: Into<Self>>(err: T) -> Self {
        err.into()
    }

    /// Whether retrying the same call later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::TimedOut | Error::NoResponders)
    }
}
