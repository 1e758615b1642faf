use crate::connection::Connection;
use crate::core::payload::IntoPayload;
use crate::core::subject::validate_publish_subject;
use crate::error::{Error, Result};
use crate::options::{ReqOption, ReqOptions};
use crate::service::service_error;
use crate::subscription::Subscription;
use crate::transport::OutboundMessage;
use async_nats::{HeaderMap, Message, StatusCode};
use bytes::{Bytes, BytesMut};
use futures::stream::BoxStream;
use futures::{StreamExt, TryStreamExt};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Header numbering the chunks of a streamed reply, starting at zero.
pub const SEQ_HEADER: &str = "Hibiki-Seq";

/// Chunks of a streamed reply. Ends after the terminator or the first error.
pub type ReplyStream = BoxStream<'static, Result<Message>>;

/// Position of a chunk in its streamed reply.
pub fn chunk_seq(message: &Message) -> Option<u64> {
    message
        .headers
        .as_ref()?
        .get(SEQ_HEADER)?
        .as_str()
        .parse()
        .ok()
}

fn is_terminator(message: &Message) -> bool {
    message.payload.is_empty() && chunk_seq(message).is_none()
}

struct Pending {
    replies: Subscription,
    cancel: CancellationToken,
    timeout: Duration,
}

impl Pending {
    async fn next(&mut self) -> Result<Option<Message>> {
        let next = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(Error::Cancelled),
            next = tokio::time::timeout(self.timeout, self.replies.next()) => next,
        };
        let message = match next {
            Ok(Some(message)) => message,
            Ok(None) => return Err(Error::Closed),
            Err(_) => return Err(Error::TimedOut),
        };
        if message.status == Some(StatusCode::NO_RESPONDERS) {
            return Err(Error::NoResponders);
        }
        if let Some(err) = service_error(&message) {
            return Err(err);
        }
        if is_terminator(&message) {
            return Ok(None);
        }
        Ok(Some(message))
    }
}

impl Connection {
    /// Answer `reply` with several chunks followed by the terminator.
    ///
    /// Empty chunks are skipped, an empty message is the terminator.
    pub async fn respond_stream<I>(&self, reply: &str, chunks: I) -> Result<()>
    where
        I: IntoIterator,
        I::Item: IntoPayload,
    {
        let mut seq: u64 = 0;
        for chunk in chunks {
            let payload = chunk.into_payload()?;
            if payload.is_empty() {
                continue;
            }
            let mut headers = HeaderMap::new();
            headers.insert(SEQ_HEADER, seq.to_string().as_str());
            self.send(OutboundMessage::new(reply, payload).headers(Some(headers)))
                .await?;
            seq += 1;
        }
        self.send(OutboundMessage::new(reply, Bytes::new())).await?;
        debug!(reply, chunks = seq, "streamed reply sent");
        Ok(())
    }

    /// Send a request answered by [Connection::respond_stream].
    ///
    /// The timeout bounds the wait for each chunk, not the whole reply.
    ///
    /// ```rust
    /// # use hibiki::{Connection, SubOption};
    /// # use async_nats::Message;
    /// # use futures::TryStreamExt;
    /// # #[tokio::main(flavor = "current_thread")]
    /// # async fn main() -> hibiki::Result<()> {
    /// let nc = Connection::memory();
    /// let responder = nc.clone();
    /// let _sub = nc.subscribe("numbers", [SubOption::handler(move |msg: Message| {
    ///     let responder = responder.clone();
    ///     async move {
    ///         if let Some(reply) = msg.reply {
    ///             let _ = responder.respond_stream(reply.as_str(), ["1", "2", "3"]).await;
    ///         }
    ///     }
    /// })]).await?;
    ///
    /// let chunks: Vec<_> = nc.request_stream("numbers", "", []).await?.try_collect().await?;
    /// assert_eq!(chunks.len(), 3);
    /// # Ok(())
    /// # }
    /// ```
    pub async fn request_stream<I>(
        &self,
        subject: &str,
        payload: impl IntoPayload,
        options: I,
    ) -> Result<ReplyStream>
    where
        I: IntoIterator<Item = ReqOption>,
    {
        let options = ReqOptions::from_options(options)?;
        self.ensure_open()?;
        validate_publish_subject(subject)?;
        let payload = payload.into_payload()?;

        let inbox = self.new_inbox();
        let replies = self.subscribe(&inbox, []).await?;
        self.send(
            OutboundMessage::new(subject, payload)
                .reply(inbox.as_str())
                .headers(options.headers),
        )
        .await?;

        let pending = Pending {
            replies,
            cancel: options.cancel.unwrap_or_default(),
            timeout: options.timeout.unwrap_or(self.request_timeout()),
        };
        let stream = futures::stream::unfold(Some(pending), |pending| async move {
            let mut pending = pending?;
            match pending.next().await {
                Ok(Some(message)) => Some((Ok(message), Some(pending))),
                Ok(None) => None,
                Err(err) => Some((Err(err), None)),
            }
        });
        Ok(stream.boxed())
    }

    /// Send a request answered by [Connection::respond_stream] and join the
    /// chunks.
    pub async fn request_chunked<I>(
        &self,
        subject: &str,
        payload: impl IntoPayload,
        options: I,
    ) -> Result<Bytes>
    where
        I: IntoIterator<Item = ReqOption>,
    {
        let joined = self
            .request_stream(subject, payload, options)
            .await?
            .try_fold(BytesMut::new(), |mut joined, chunk| async move {
                joined.extend_from_slice(&chunk.payload);
                Ok(joined)
            })
            .await?;
        Ok(joined.freeze())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::{ServiceOption, SubOption};

    async fn chunker(
        nc: &Connection,
        subject: &str,
        chunks: &'static [&'static str],
    ) -> Subscription {
        let responder = nc.clone();
        nc.subscribe(
            subject,
            [SubOption::handler(move |msg: Message| {
                let responder = responder.clone();
                async move {
                    if let Some(reply) = msg.reply {
                        let chunks: Vec<Bytes> = chunks.iter().map(|c| Bytes::from_static(c.as_bytes())).collect();
                        let _ = responder.respond_stream(reply.as_str(), chunks).await;
                    }
                }
            })],
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn chunks_arrive_in_order_until_terminator() {
        let nc = Connection::memory();
        let _sub = chunker(&nc, "files.read", &["a", "", "b", "c"]).await;

        let chunks: Vec<Message> = nc
            .request_stream("files.read", "report.txt", [])
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        let payloads: Vec<_> = chunks.iter().map(|c| c.payload.clone()).collect();
        assert_eq!(payloads, ["a", "b", "c"]);
        let seqs: Vec<_> = chunks.iter().map(chunk_seq).collect();
        assert_eq!(seqs, [Some(0), Some(1), Some(2)]);
    }

    #[tokio::test]
    async fn chunked_request_joins_payloads() {
        let nc = Connection::memory();
        let _sub = chunker(&nc, "files.read", &["Hello ", "World", "!"]).await;
        let body = nc.request_chunked("files.read", "", []).await.unwrap();
        assert_eq!(body, "Hello World!");
    }

    #[tokio::test]
    async fn empty_reply_is_just_the_terminator() {
        let nc = Connection::memory();
        let _sub = chunker(&nc, "files.read", &[]).await;
        let body = nc.request_chunked("files.read", "", []).await.unwrap();
        assert!(body.is_empty());
    }

    #[tokio::test]
    async fn idle_timeout_applies_per_chunk() {
        let nc = Connection::memory();
        let responder = nc.clone();
        let _sub = nc
            .subscribe(
                "slow",
                [SubOption::handler(move |msg: Message| {
                    let responder = responder.clone();
                    async move {
                        if let Some(reply) = msg.reply {
                            // one chunk, never terminated
                            let _ = responder.publish(reply.as_str(), "first").await;
                        }
                    }
                })],
            )
            .await
            .unwrap();

        let mut chunks = nc
            .request_stream("slow", "", [ReqOption::timeout(Duration::from_millis(30))])
            .await
            .unwrap();
        assert_eq!(chunks.next().await.unwrap().unwrap().payload, "first");
        assert!(matches!(chunks.next().await, Some(Err(Error::TimedOut))));
        assert!(chunks.next().await.is_none());
    }

    #[tokio::test]
    async fn nobody_listening_fails_with_no_responders() {
        let nc = Connection::memory();
        let mut chunks = nc
            .request_stream("nobody.home", "", [ReqOption::timeout(Duration::from_secs(30))])
            .await
            .unwrap();

        let first = tokio::time::timeout(Duration::from_secs(1), chunks.next())
            .await
            .unwrap();
        assert!(matches!(first, Some(Err(Error::NoResponders))));
        assert!(chunks.next().await.is_none());
    }

    #[tokio::test]
    async fn cancellation_ends_the_stream() {
        let nc = Connection::memory();
        let _silent = nc.subscribe("slow", []).await.unwrap();
        let token = CancellationToken::new();

        let mut chunks = nc
            .request_stream(
                "slow",
                "",
                [
                    ReqOption::timeout(Duration::from_secs(30)),
                    ReqOption::cancel_on(token.clone()),
                ],
            )
            .await
            .unwrap();
        token.cancel();
        assert!(matches!(chunks.next().await, Some(Err(Error::Cancelled))));
        assert!(chunks.next().await.is_none());
    }

    #[tokio::test]
    async fn service_errors_end_the_stream() {
        let nc = Connection::memory();
        let _svc = nc
            .service(
                "files.read",
                "1.0.0",
                [ServiceOption::handler(|_msg: Message| async move {
                    Err::<Bytes, _>(anyhow::anyhow!("no such file"))
                })],
            )
            .await
            .unwrap();

        let err = nc.request_chunked("files.read", "", []).await.unwrap_err();
        assert!(matches!(err, Error::Service { code: 500, .. }));
    }
}
