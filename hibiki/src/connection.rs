use crate::config::{ConnectConfig, DEFAULT_REQUEST_TIMEOUT};
use crate::core::payload::IntoPayload;
use crate::core::subject::{validate_publish_subject, validate_subscribe_subject};
use crate::error::{Error, OptionError, Result};
use crate::options::{ReqOption, ReqOptions, SubOption, SubOptions};
use crate::subscription::Subscription;
use crate::transport::{MemoryTransport, NatsTransport, OutboundMessage, Transport};
use async_nats::{HeaderMap, Message, Subject};
use std::fmt::{Debug, Formatter};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, error, info};

/// A connection to the messaging system.
///
/// Cheap to clone, clones share the same underlying client.
///
/// ```rust,no_run
/// # use hibiki::{Formatted, ReqOption, SubOption};
/// # use std::time::Duration;
/// # async fn example() -> hibiki::Result<()> {
/// let nc = hibiki::connect("demo.nats.io").await?;
///
/// nc.publish("natsv2.foo", "Hello World!").await?;
/// nc.publish("natsv2.foo", 22).await?;
/// nc.publish("natsv2.foo", hibiki::encoding::json(&[1, 2, 3])?).await?;
///
/// let _queued = nc.subscribe("foo", [SubOption::queue("bar")]).await?;
/// let reply = nc
///     .request("service", "2+2", [ReqOption::timeout(Duration::from_secs(2))])
///     .await?;
/// # let _ = reply;
/// nc.close().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Connection {
    transport: Arc<dyn Transport>,
    closed: Arc<AtomicBool>,
    request_timeout: Duration,
}

/// Connect to a NATS server with default settings.
pub async fn connect(url: impl Into<String>) -> Result<Connection> {
    connect_with(ConnectConfig::new(url)).await
}

/// Connect to a NATS server.
pub async fn connect_with(config: ConnectConfig) -> Result<Connection> {
    config.validate()?;
    let client = config
        .to_connect_options()
        .connect(config.url.as_str())
        .await
        .map_err(|err| {
            error!(url = %config.url, error = %err, "could not connect");
            Error::Connect(err)
        })?;
    info!(url = %config.url, "connected");
    Connection::new(NatsTransport::new(client)).with_request_timeout(config.request_timeout)
}

impl Connection {
    /// Build a connection on top of any [Transport].
    pub fn new<T: Transport>(transport: T) -> Self {
        Self::from_shared(Arc::new(transport))
    }

    /// Build a connection on top of a shared [Transport].
    pub fn from_shared(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            closed: Arc::new(AtomicBool::new(false)),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// A connection to a fresh in-process broker.
    pub fn memory() -> Self {
        Self::new(MemoryTransport::new())
    }

    /// Change the default request timeout. Zero is rejected like
    /// [ReqOption::timeout] rejects it.
    ///
    /// Only affects this handle and the clones made from it afterwards.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Result<Self> {
        if timeout.is_zero() {
            return Err(OptionError::ZeroTimeout.into());
        }
        self.request_timeout = timeout;
        Ok(self)
    }

    /// The default request timeout.
    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// The transport below this connection.
    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Whether [Connection::close] has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub(crate) fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(Error::Closed);
        }
        Ok(())
    }

    /// A fresh subject for receiving replies.
    pub fn new_inbox(&self) -> String {
        self.transport.new_inbox()
    }

    pub(crate) async fn send(&self, message: OutboundMessage) -> Result<()> {
        self.ensure_open()?;
        validate_publish_subject(message.subject.as_str())?;
        debug!(
            subject = %message.subject,
            bytes = message.payload.len(),
            "publishing message"
        );
        self.transport.publish(message).await
    }

    /// Publish a message.
    ///
    /// Bytes are sent as is, strings as UTF-8, numbers as text. See
    /// [IntoPayload] for everything else.
    pub async fn publish(&self, subject: &str, payload: impl IntoPayload) -> Result<()> {
        let payload = payload.into_payload()?;
        self.send(OutboundMessage::new(subject, payload)).await
    }

    /// Publish a message with headers.
    pub async fn publish_with_headers(
        &self,
        subject: &str,
        headers: HeaderMap,
        payload: impl IntoPayload,
    ) -> Result<()> {
        let payload = payload.into_payload()?;
        self.send(OutboundMessage::new(subject, payload).headers(Some(headers)))
            .await
    }

    /// Publish a message the receiver should answer on `reply`.
    pub async fn publish_with_reply(
        &self,
        subject: &str,
        reply: &str,
        payload: impl IntoPayload,
    ) -> Result<()> {
        let payload = payload.into_payload()?;
        self.send(OutboundMessage::new(subject, payload).reply(reply))
            .await
    }

    /// Subscribe to a subject.
    ///
    /// ```rust
    /// # use hibiki::{Connection, SubOption};
    /// # use futures::StreamExt;
    /// # #[tokio::main(flavor = "current_thread")]
    /// # async fn main() -> hibiki::Result<()> {
    /// let nc = Connection::memory();
    /// let mut sub = nc.subscribe("foo", []).await?;
    /// nc.publish("foo", "hi").await?;
    /// assert_eq!(sub.next().await.unwrap().payload, "hi");
    /// # Ok(())
    /// # }
    /// ```
    pub async fn subscribe<I>(&self, subject: &str, options: I) -> Result<Subscription>
    where
        I: IntoIterator<Item = SubOption>,
    {
        let options = SubOptions::from_options(options)?;
        self.ensure_open()?;
        validate_subscribe_subject(subject)?;

        let stream = self
            .transport
            .subscribe(Subject::from(subject), options.queue.clone())
            .await?;
        debug!(subject, queue = ?options.queue, "subscribed");

        Ok(match options.handler {
            Some(handler) => {
                Subscription::spawn(subject.to_owned(), options.queue, stream, handler)
            }
            None => Subscription::from_stream(subject.to_owned(), options.queue, stream),
        })
    }

    /// Send a request and wait for the first reply.
    ///
    /// Fails with [Error::TimedOut] after the timeout (the connection
    /// default unless [ReqOption::timeout] is given) and with
    /// [Error::Cancelled] once a [ReqOption::cancel_on] token fires.
    pub async fn request<I>(
        &self,
        subject: &str,
        payload: impl IntoPayload,
        options: I,
    ) -> Result<Message>
    where
        I: IntoIterator<Item = ReqOption>,
    {
        let options = ReqOptions::from_options(options)?;
        self.ensure_open()?;
        validate_publish_subject(subject)?;
        let payload = payload.into_payload()?;

        let timeout = options.timeout.unwrap_or(self.request_timeout);
        debug!(subject, ?timeout, "sending request");
        let message = OutboundMessage::new(subject, payload).headers(options.headers);
        let request = self.transport.request(message, timeout);

        match options.cancel {
            Some(token) => {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => Err(Error::Cancelled),
                    reply = request => reply,
                }
            }
            None => request.await,
        }
    }

    /// Wait until everything published so far reached the server.
    pub async fn flush(&self) -> Result<()> {
        self.ensure_open()?;
        self.transport.flush().await
    }

    /// Close the connection. Closing twice is fine.
    ///
    /// Every subscription is drained: its stream yields what it already
    /// received and then ends. Every clone sharing this handle sees the
    /// connection as closed.
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        info!("closing connection");
        self.transport.close().await
    }
}

impl Debug for Connection {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("request_timeout", &self.request_timeout)
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use tokio_util::sync::CancellationToken;

    async fn echo(nc: &Connection, subject: &str) -> Subscription {
        let responder = nc.clone();
        nc.subscribe(
            subject,
            [SubOption::handler(move |msg: Message| {
                let responder = responder.clone();
                async move {
                    if let Some(reply) = msg.reply {
                        let _ = responder.publish(reply.as_str(), msg.payload).await;
                    }
                }
            })],
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn publish_coerces_payloads() {
        let nc = Connection::memory();
        let mut sub = nc.subscribe("natsv2.foo", []).await.unwrap();

        nc.publish("natsv2.foo", "Hello World!").await.unwrap();
        nc.publish("natsv2.foo", 22).await.unwrap();
        nc.publish("natsv2.foo", crate::Formatted(("derek", 22))).await.unwrap();
        nc.publish("natsv2.foo", vec![0u8, 255]).await.unwrap();

        assert_eq!(sub.next().await.unwrap().payload, "Hello World!");
        assert_eq!(sub.next().await.unwrap().payload, "22");
        assert_eq!(sub.next().await.unwrap().payload, r#"("derek", 22)"#);
        assert_eq!(sub.next().await.unwrap().payload, &[0u8, 255][..]);
    }

    #[tokio::test]
    async fn handler_receives_messages_in_order() {
        let nc = Connection::memory();
        let (sender, mut received) = tokio::sync::mpsc::unbounded_channel();
        let sub = nc
            .subscribe(
                "foo",
                [SubOption::handler(move |msg: Message| {
                    let sender = sender.clone();
                    async move {
                        let _ = sender.send(msg.payload);
                    }
                })],
            )
            .await
            .unwrap();
        assert!(sub.has_handler());

        for n in 0..5 {
            nc.publish("foo", n).await.unwrap();
        }
        let mut seen = Vec::new();
        for _ in 0..5 {
            seen.push(received.recv().await.unwrap());
        }
        assert_eq!(seen, ["0", "1", "2", "3", "4"]);

        sub.close().await;
        nc.publish("foo", "late").await.unwrap();
        assert!(received.recv().await.is_none());
    }

    #[tokio::test]
    async fn request_round_trip_and_timeout() {
        let nc = Connection::memory();
        let _echo = echo(&nc, "service").await;

        let reply = nc.request("service", "2+2", []).await.unwrap();
        assert_eq!(reply.payload, "2+2");

        let _silent = nc.subscribe("silent", []).await.unwrap();
        let err = nc
            .request("silent", "2+2", [ReqOption::timeout(Duration::from_millis(20))])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::TimedOut));
    }

    #[tokio::test]
    async fn default_timeout_comes_from_connection() {
        let nc = Connection::memory()
            .with_request_timeout(Duration::from_millis(20))
            .unwrap();
        let _silent = nc.subscribe("silent", []).await.unwrap();
        let err = nc.request("silent", "", []).await.unwrap_err();
        assert!(matches!(err, Error::TimedOut));
    }

    #[test]
    fn zero_default_timeout_is_rejected() {
        let err = Connection::memory()
            .with_request_timeout(Duration::ZERO)
            .unwrap_err();
        assert!(matches!(err, Error::Option(OptionError::ZeroTimeout)));
    }

    #[tokio::test]
    async fn zero_timeout_in_config_fails_before_connecting() {
        let config = ConnectConfig::new("nats://127.0.0.1:1").with_request_timeout(Duration::ZERO);
        let err = connect_with(config).await.unwrap_err();
        assert!(matches!(err, Error::Option(OptionError::ZeroTimeout)));
    }

    #[tokio::test]
    async fn cancelled_request_stops_waiting() {
        let nc = Connection::memory();
        let _silent = nc.subscribe("service", []).await.unwrap();

        let token = CancellationToken::new();
        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            canceller.cancel();
        });
        let err = nc
            .request(
                "service",
                "2+2",
                [
                    ReqOption::timeout(Duration::from_secs(30)),
                    ReqOption::cancel_on(token),
                ],
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled));
    }

    #[tokio::test]
    async fn invalid_options_fail_before_sending() {
        let nc = Connection::memory();
        let mut watcher = nc.subscribe("service", []).await.unwrap();

        let err = nc
            .request("service", "2+2", [ReqOption::timeout(Duration::ZERO)])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Option(OptionError::ZeroTimeout)));

        let err = nc
            .subscribe("foo", [SubOption::queue("")])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Option(OptionError::EmptyQueue)));

        nc.publish("service", "marker").await.unwrap();
        assert_eq!(watcher.next().await.unwrap().payload, "marker");
    }

    #[tokio::test]
    async fn closed_connection_rejects_calls() {
        let nc = Connection::memory();
        let clone = nc.clone();
        nc.close().await.unwrap();
        nc.close().await.unwrap();

        assert!(clone.is_closed());
        assert!(matches!(clone.publish("foo", "x").await, Err(Error::Closed)));
        assert!(matches!(clone.subscribe("foo", []).await, Err(Error::Closed)));
        assert!(matches!(clone.request("foo", "x", []).await, Err(Error::Closed)));
    }

    #[tokio::test]
    async fn close_ends_live_subscriptions() {
        let nc = Connection::memory();
        let mut stream = nc.subscribe("foo", []).await.unwrap();
        let (sender, mut received) = tokio::sync::mpsc::unbounded_channel();
        let handled = nc
            .subscribe(
                "foo",
                [SubOption::handler(move |msg: Message| {
                    let sender = sender.clone();
                    async move {
                        let _ = sender.send(msg.payload);
                    }
                })],
            )
            .await
            .unwrap();
        nc.publish("foo", "before").await.unwrap();
        nc.close().await.unwrap();

        assert_eq!(stream.next().await.unwrap().payload, "before");
        assert!(stream.next().await.is_none());
        assert_eq!(received.recv().await.unwrap(), "before");
        // the handler task ends with its stream and drops the sender
        assert!(received.recv().await.is_none());
        handled.close().await;
    }

    #[tokio::test]
    async fn queue_subscribers_share_the_load() {
        let nc = Connection::memory();
        let mut a = nc.subscribe("foo", [SubOption::queue("bar")]).await.unwrap();
        let mut b = nc.subscribe("foo", [SubOption::queue("bar")]).await.unwrap();
        assert_eq!(a.queue(), Some("bar"));

        nc.publish("foo", "one").await.unwrap();
        nc.publish("foo", "two").await.unwrap();
        assert_eq!(a.next().await.unwrap().payload, "one");
        assert_eq!(b.next().await.unwrap().payload, "two");
    }
}
