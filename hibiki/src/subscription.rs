use crate::error::Result;
use crate::transport::{MessageSource, MessageStream};
use async_nats::Message;
use futures::future::BoxFuture;
use futures::{Stream, StreamExt};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Callback for every message of a subscription.
///
/// Implemented for any `Fn(Message) -> impl Future<Output = ()>`.
pub trait MessageHandler: Send + Sync + 'static {
    /// Handle one message.
    fn handle(&self, message: Message) -> BoxFuture<'static, ()>;
}

impl<F, Fut> MessageHandler for F
where
    F: Fn(Message) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    fn handle(&self, message: Message) -> BoxFuture<'static, ()> {
        Box::pin(self(message))
    }
}

enum Delivery {
    Stream(MessageStream),
    Handler {
        cancel: CancellationToken,
        task: JoinHandle<()>,
    },
    Closed,
}

/// An active subscription.
///
/// Without a handler it is a [Stream] of messages. With a handler the
/// messages are handed to it one at a time, in arrival order, on a
/// background task.
///
/// Dropping the subscription unsubscribes. [Subscription::close] does the
/// same and also waits for the handler to finish its current message.
pub struct Subscription {
    subject: String,
    queue: Option<String>,
    delivery: Delivery,
}

impl Subscription {
    pub(crate) fn from_stream(
        subject: String,
        queue: Option<String>,
        stream: MessageStream,
    ) -> Self {
        Self {
            subject,
            queue,
            delivery: Delivery::Stream(stream),
        }
    }

    pub(crate) fn spawn(
        subject: String,
        queue: Option<String>,
        mut stream: MessageStream,
        handler: Arc<dyn MessageHandler>,
    ) -> Self {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let task_subject = subject.clone();
        let task = tokio::spawn(async move {
            loop {
                let message = tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    message = stream.next() => message,
                };
                match message {
                    Some(message) => handler.handle(message).await,
                    None => break,
                }
            }
            debug!(subject = %task_subject, "subscription handler stopped");
        });
        Self {
            subject,
            queue,
            delivery: Delivery::Handler { cancel, task },
        }
    }

    /// Subject this subscription listens on.
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Queue group, if any.
    pub fn queue(&self) -> Option<&str> {
        self.queue.as_deref()
    }

    /// Whether messages are delivered to a handler.
    pub fn has_handler(&self) -> bool {
        matches!(self.delivery, Delivery::Handler { .. })
    }

    /// Stop taking new messages but keep yielding the ones already received.
    ///
    /// Handler subscriptions are left alone.
    pub(crate) async fn drain(&mut self) -> Result<()> {
        if let Delivery::Stream(stream) = &mut self.delivery {
            stream.drain().await?;
            debug!(subject = %self.subject, "subscription draining");
        }
        Ok(())
    }

    /// Stop receiving messages.
    ///
    /// With a handler, the message being handled right now is finished first.
    pub async fn close(mut self) {
        match std::mem::replace(&mut self.delivery, Delivery::Closed) {
            Delivery::Handler { cancel, task } => {
                cancel.cancel();
                if let Err(err) = task.await {
                    warn!(subject = %self.subject, error = %err, "subscription handler failed");
                }
            }
            Delivery::Stream(stream) => drop(stream),
            Delivery::Closed => {}
        }
        debug!(subject = %self.subject, "subscription closed");
    }
}

impl Stream for Subscription {
    type Item = Message;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match &mut self.get_mut().delivery {
            Delivery::Stream(stream) => stream.poll_next_unpin(cx),
            // messages go to the handler, never to the caller
            Delivery::Handler { .. } | Delivery::Closed => Poll::Ready(None),
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Delivery::Handler { cancel, .. } = &self.delivery {
            cancel.cancel();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("subject", &self.subject)
            .field("queue", &self.queue)
            .field("handler", &self.has_handler())
            .finish()
    }
}
