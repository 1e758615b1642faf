use crate::error::{Error, Result};
use crate::transport::{MessageSource, MessageStream, OutboundMessage, Transport};
use async_nats::client::{Request, RequestErrorKind};
use async_nats::{Client, Message, Subject, Subscriber};
use std::time::Duration;
use tracing::debug;

/// [Transport] backed by an `async-nats` client.
#[derive(Debug, Clone)]
pub struct NatsTransport {
    client: Client,
}

impl NatsTransport {
    /// Wrap a connected client.
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// The underlying client, for everything this crate does not cover.
    pub fn client(&self) -> &Client {
        &self.client
    }
}

impl From<Client> for NatsTransport {
    fn from(client: Client) -> Self {
        Self::new(client)
    }
}

#[async_trait::async_trait]
impl Transport for NatsTransport {
    async fn publish(&self, message: OutboundMessage) -> Result<()> {
        let OutboundMessage {
            subject,
            reply,
            headers,
            payload,
        } = message;
        let published = match (reply, headers) {
            (None, None) => self.client.publish(subject, payload).await,
            (None, Some(headers)) => {
                self.client
                    .publish_with_headers(subject, headers, payload)
                    .await
            }
            (Some(reply), None) => self.client.publish_with_reply(subject, reply, payload).await,
            (Some(reply), Some(headers)) => {
                self.client
                    .publish_with_reply_and_headers(subject, reply, headers, payload)
                    .await
            }
        };
        published.map_err(|err| Error::Publish(Box::new(err)))
    }

    async fn subscribe(&self, subject: Subject, queue: Option<String>) -> Result<MessageStream> {
        let subscriber = match queue {
            Some(queue) => self.client.queue_subscribe(subject, queue).await,
            None => self.client.subscribe(subject).await,
        }
        .map_err(|err| Error::Subscribe(Box::new(err)))?;
        Ok(Box::new(subscriber))
    }

    async fn request(&self, message: OutboundMessage, timeout: Duration) -> Result<Message> {
        let mut request = Request::new()
            .payload(message.payload)
            .timeout(Some(timeout));
        if let Some(headers) = message.headers {
            request = request.headers(headers);
        }
        self.client
            .send_request(message.subject, request)
            .await
            .map_err(|err| match err.kind() {
                RequestErrorKind::TimedOut => Error::TimedOut,
                RequestErrorKind::NoResponders => Error::NoResponders,
                _ => Error::Request(Box::new(err)),
            })
    }

    fn new_inbox(&self) -> String {
        self.client.new_inbox()
    }

    async fn flush(&self) -> Result<()> {
        self.client
            .flush()
            .await
            .map_err(|err| Error::Flush(Box::new(err)))
    }

    async fn close(&self) -> Result<()> {
        debug!("draining NATS client");
        self.client
            .drain()
            .await
            .map_err(|err| Error::Drain(Box::new(err)))
    }
}

#[async_trait::async_trait]
impl MessageSource for Subscriber {
    async fn drain(&mut self) -> Result<()> {
        Subscriber::drain(self)
            .await
            .map_err(|err| Error::Drain(Box::new(err)))
    }
}

