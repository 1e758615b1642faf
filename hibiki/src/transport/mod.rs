use crate::error::Result;
use async_nats::{HeaderMap, Message, Subject};
use bytes::Bytes;
use futures::Stream;
use std::time::Duration;

mod memory;
mod nats;

pub use memory::MemoryTransport;
pub use nats::NatsTransport;

/// Receiving end of a transport subscription.
///
/// Dropping it unsubscribes.
#[async_trait::async_trait]
pub trait MessageSource: Stream<Item = Message> + Send + Unpin {
    /// Stop receiving new messages.
    ///
    /// Messages already received are still yielded, then the stream ends.
    async fn drain(&mut self) -> Result<()>;
}

/// Messages received by a subscription.
pub type MessageStream = Box<dyn MessageSource>;

/// A message about to be published.
#[derive(Debug, Clone)]
pub struct OutboundMessage {
    /// Subject to publish to. Must not contain wildcards.
    pub subject: Subject,
    /// Where the receiver should send its reply.
    pub reply: Option<Subject>,
    /// Message headers.
    pub headers: Option<HeaderMap>,
    /// Message body.
    pub payload: Bytes,
}

impl OutboundMessage {
    /// A message with only a subject and a payload.
    pub fn new(subject: impl Into<Subject>, payload: Bytes) -> Self {
        Self {
            subject: subject.into(),
            reply: None,
            headers: None,
            payload,
        }
    }

    /// Set the reply subject.
    pub fn reply(mut self, reply: impl Into<Subject>) -> Self {
        self.reply = Some(reply.into());
        self
    }

    /// Set the headers.
    pub fn headers(mut self, headers: Option<HeaderMap>) -> Self {
        self.headers = headers;
        self
    }
}

/// The operations the high level API needs from a pub/sub client.
#[async_trait::async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Publish a message.
    async fn publish(&self, message: OutboundMessage) -> Result<()>;

    /// Subscribe to a subject, optionally as a member of a queue group.
    async fn subscribe(&self, subject: Subject, queue: Option<String>) -> Result<MessageStream>;

    /// Publish `message` and wait at most `timeout` for a single reply.
    ///
    /// The reply subject of `message` is replaced by a fresh inbox.
    async fn request(&self, message: OutboundMessage, timeout: Duration) -> Result<Message>;

    /// A unique subject suitable for receiving replies.
    fn new_inbox(&self) -> String;

    /// Wait until everything published so far has been handed to the server.
    async fn flush(&self) -> Result<()>;

    /// Drain every subscription and release the connection.
    ///
    /// Subscription streams end once their buffered messages are consumed.
    async fn close(&self) -> Result<()>;
}
