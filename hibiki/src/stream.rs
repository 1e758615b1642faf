use crate::connection::Connection;
use crate::core::payload::IntoPayload;
use crate::encoding::{Codec, Encoding};
use crate::error::Result;
use crate::options::{ReqOption, SubOption};
use crate::service::service_error;
use crate::subscription::Subscription;
use crate::transport::OutboundMessage;
use async_nats::{HeaderMap, Message};
use bytes::Bytes;
use serde::Serialize;
use serde::de::DeserializeOwned;

/// Header naming the serialization of the payload.
pub const CONTENT_TYPE_HEADER: &str = "Content-Type";

/// Header listing the codecs applied to the payload, in order.
pub const CONTENT_ENCODING_HEADER: &str = "Content-Encoding";

/// Content type of serialized values.
pub const JSON_CONTENT_TYPE: &str = "application/json";

/// A subject bound to an encoding.
///
/// Values are serialized to JSON and then run through the codec chain,
/// receivers undo the chain and parse the JSON.
///
/// ```rust
/// # use hibiki::Connection;
/// # use hibiki::encoding::{Base64, Gzip};
/// # use futures::StreamExt;
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> hibiki::Result<()> {
/// let nc = Connection::memory();
/// let stream = nc.stream("foo").then(Gzip).then(Base64);
///
/// let mut sub = stream.subscribe([]).await?;
/// stream.publish(&[1, 2, 3]).await?;
///
/// let message = sub.next().await.unwrap();
/// let numbers: Vec<i32> = stream.decode(&message)?;
/// assert_eq!(numbers, [1, 2, 3]);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Stream {
    connection: Connection,
    subject: String,
    encoding: Encoding,
}

impl Stream {
    /// Subject of the stream.
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Codec chain of the stream.
    pub fn encoding(&self) -> &Encoding {
        &self.encoding
    }

    /// Append a codec to the chain.
    pub fn then<C: Codec>(mut self, codec: C) -> Self {
        self.encoding = self.encoding.then(codec);
        self
    }

    /// Replace the whole chain.
    pub fn with_encoding(mut self, encoding: Encoding) -> Self {
        self.encoding = encoding;
        self
    }

    fn headers(&self, content_type: Option<&str>) -> Option<HeaderMap> {
        let content_encoding = self.encoding.content_encoding();
        if content_type.is_none() && content_encoding.is_none() {
            return None;
        }
        let mut headers = HeaderMap::new();
        if let Some(content_type) = content_type {
            headers.insert(CONTENT_TYPE_HEADER, content_type);
        }
        if let Some(content_encoding) = content_encoding {
            headers.insert(CONTENT_ENCODING_HEADER, content_encoding.as_str());
        }
        Some(headers)
    }

    /// Serialize `value`, encode it and publish it.
    pub async fn publish<T: Serialize + ?Sized>(&self, value: &T) -> Result<()> {
        let payload = self.encoding.encode(crate::encoding::json(value)?)?;
        let message = OutboundMessage::new(self.subject.as_str(), payload)
            .headers(self.headers(Some(JSON_CONTENT_TYPE)));
        self.connection.send(message).await
    }

    /// Encode raw bytes and publish them. No serialization happens.
    pub async fn publish_bytes(&self, payload: impl IntoPayload) -> Result<()> {
        let payload = self.encoding.encode(payload.into_payload()?)?;
        let message =
            OutboundMessage::new(self.subject.as_str(), payload).headers(self.headers(None));
        self.connection.send(message).await
    }

    /// Subscribe to the stream subject. Use [Stream::decode] on the messages.
    pub async fn subscribe<I>(&self, options: I) -> Result<Subscription>
    where
        I: IntoIterator<Item = SubOption>,
    {
        self.connection.subscribe(&self.subject, options).await
    }

    /// Undo the codec chain.
    pub fn decode_bytes(&self, message: &Message) -> Result<Bytes> {
        Ok(self.encoding.decode(message.payload.clone())?)
    }

    /// Undo the codec chain and parse the JSON value.
    pub fn decode<T: DeserializeOwned>(&self, message: &Message) -> Result<T> {
        let bytes = self.decode_bytes(message)?;
        Ok(crate::encoding::from_json(&bytes)?)
    }

    /// Send `value` as a request and decode the reply with the same chain.
    ///
    /// A reply carrying service error headers fails with
    /// [Error::Service](crate::Error::Service).
    pub async fn request<Req, Resp, I>(&self, value: &Req, options: I) -> Result<Resp>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
        I: IntoIterator<Item = ReqOption>,
    {
        let payload = self.encoding.encode(crate::encoding::json(value)?)?;
        let content_encoding = self.encoding.content_encoding();
        // added to the headers given by the caller
        let content_headers = ReqOption::custom(move |options| {
            let headers = options.headers.get_or_insert_with(HeaderMap::new);
            headers.insert(CONTENT_TYPE_HEADER, JSON_CONTENT_TYPE);
            if let Some(content_encoding) = content_encoding {
                headers.insert(CONTENT_ENCODING_HEADER, content_encoding.as_str());
            }
            Ok(())
        });
        let reply = self
            .connection
            .request(&self.subject, payload, options.into_iter().chain(Some(content_headers)))
            .await?;
        if let Some(err) = service_error(&reply) {
            return Err(err);
        }
        self.decode(&reply)
    }
}

impl Connection {
    /// A [Stream] on `subject`, with no codec yet.
    pub fn stream(&self, subject: impl Into<String>) -> Stream {
        Stream {
            connection: self.clone(),
            subject: subject.into(),
            encoding: Encoding::new(),
        }
    }
}
