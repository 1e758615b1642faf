use crate::core::subject::{SubjectMatcher, validate_publish_subject};
use crate::error::{Error, Result};
use crate::transport::{MessageSource, MessageStream, OutboundMessage, Transport};
use async_nats::{Message, StatusCode, Subject};
use futures::StreamExt;
use futures::channel::mpsc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::trace;

struct MemorySubscriber {
    matcher: SubjectMatcher,
    queue: Option<String>,
    sender: mpsc::UnboundedSender<Message>,
}

#[derive(Default)]
struct State {
    subscribers: Vec<MemorySubscriber>,
    /// next member to serve, per queue group
    round_robin: HashMap<String, usize>,
}

struct Inner {
    state: Mutex<State>,
    inbox_prefix: String,
    next_inbox: AtomicU64,
    closed: AtomicBool,
}

/// In-process [Transport].
///
/// Delivery follows NATS core rules:
///
/// - subjects match with `*` and `>` wildcards;
/// - every plain subscriber gets a copy of a message;
/// - each queue group gets one copy, handed to its members in turn;
/// - a message with a reply subject nobody listens to is answered with a
///   no responders status, a request fails with [Error::NoResponders].
///
/// Clones share the same broker. Dropping a subscription stream unregisters it.
#[derive(Clone)]
pub struct MemoryTransport {
    inner: Arc<Inner>,
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTransport {
    /// Create an empty broker.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State::default()),
                inbox_prefix: format!("_INBOX.{:016x}", rand::random::<u64>()),
                next_inbox: AtomicU64::new(0),
                closed: AtomicBool::new(false),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        // a panic while holding the lock cannot leave the registry half updated
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(Error::Closed);
        }
        Ok(())
    }

    /// Number of live subscriptions.
    pub fn subscription_count(&self) -> usize {
        let mut state = self.state();
        state.subscribers.retain(|sub| !sub.sender.is_closed());
        state.subscribers.len()
    }

    /// Hand `message` to every interested subscriber, returns how many got it.
    fn deliver(&self, message: OutboundMessage) -> Result<usize> {
        self.ensure_open()?;
        validate_publish_subject(message.subject.as_str())?;

        let length = message.payload.len();
        let message = Message {
            subject: message.subject,
            reply: message.reply,
            payload: message.payload,
            headers: message.headers,
            status: None,
            description: None,
            length,
        };

        let mut state = self.state();
        state.subscribers.retain(|sub| !sub.sender.is_closed());
        let delivered = state.route(&message);
        trace!(subject = %message.subject, delivered, "memory transport delivered message");

        if delivered == 0 {
            if let Some(reply) = message.reply {
                let status = Message {
                    subject: reply,
                    reply: None,
                    payload: Default::default(),
                    headers: None,
                    status: Some(StatusCode::NO_RESPONDERS),
                    description: None,
                    length: 0,
                };
                state.route(&status);
            }
        }
        Ok(delivered)
    }
}

impl State {
    fn route(&mut self, message: &Message) -> usize {
        let State {
            subscribers,
            round_robin,
        } = self;

        let mut delivered = 0;
        let mut groups: HashMap<&str, Vec<&MemorySubscriber>> = HashMap::new();
        for sub in subscribers.iter() {
            if !sub.matcher.matches_str(message.subject.as_str()) {
                continue;
            }
            match &sub.queue {
                Some(queue) => groups.entry(queue.as_str()).or_default().push(sub),
                None => {
                    if sub.sender.unbounded_send(message.clone()).is_ok() {
                        delivered += 1;
                    }
                }
            }
        }
        for (queue, members) in groups {
            let next = round_robin.entry(queue.to_owned()).or_insert(0);
            let member = members[*next % members.len()];
            *next = next.wrapping_add(1);
            if member.sender.unbounded_send(message.clone()).is_ok() {
                delivered += 1;
            }
        }
        delivered
    }
}

#[async_trait::async_trait]
impl MessageSource for mpsc::UnboundedReceiver<Message> {
    async fn drain(&mut self) -> Result<()> {
        // senders see the channel as closed, buffered messages stay readable
        self.close();
        Ok(())
    }
}

#[async_trait::async_trait]
impl Transport for MemoryTransport {
    async fn publish(&self, message: OutboundMessage) -> Result<()> {
        self.deliver(message).map(|_| ())
    }

    async fn subscribe(&self, subject: Subject, queue: Option<String>) -> Result<MessageStream> {
        self.ensure_open()?;
        let matcher = SubjectMatcher::parse(subject.as_str())?;
        let (sender, receiver) = mpsc::unbounded();
        self.state().subscribers.push(MemorySubscriber {
            matcher,
            queue,
            sender,
        });
        Ok(Box::new(receiver))
    }

    async fn request(&self, message: OutboundMessage, timeout: Duration) -> Result<Message> {
        let inbox = Subject::from(self.new_inbox());
        let mut replies = self.subscribe(inbox.clone(), None).await?;
        if self.deliver(message.reply(inbox))? == 0 {
            return Err(Error::NoResponders);
        }
        match tokio::time::timeout(timeout, replies.next()).await {
            Ok(Some(reply)) => Ok(reply),
            Ok(None) => Err(Error::Closed),
            Err(_) => Err(Error::TimedOut),
        }
    }

    fn new_inbox(&self) -> String {
        let id = self.inner.next_inbox.fetch_add(1, Ordering::Relaxed);
        format!("{}.{}", self.inner.inbox_prefix, id)
    }

    async fn flush(&self) -> Result<()> {
        self.ensure_open()
    }

    async fn close(&self) -> Result<()> {
        self.inner.closed.store(true, Ordering::Release);
        // dropping the senders ends every subscription stream
        self.state().subscribers.clear();
        Ok(())
    }
}
