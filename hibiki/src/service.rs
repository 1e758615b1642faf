use crate::connection::Connection;
use crate::error::{Error, OptionError, Result};
use crate::http::{self, HttpHandler};
use crate::options::{ServiceOption, ServiceOptions, SubOption, validate_queue};
use crate::subscription::Subscription;
use crate::transport::OutboundMessage;
use async_nats::{HeaderMap, Message};
use bytes::Bytes;
use futures::StreamExt;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::fmt::{Debug, Formatter};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use time::OffsetDateTime;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Header carrying the description of a failed request.
pub const SERVICE_ERROR_HEADER: &str = "Nats-Service-Error";

/// Header carrying the error code of a failed request.
pub const SERVICE_ERROR_CODE_HEADER: &str = "Nats-Service-Error-Code";

/// Code sent when a handler returns an error.
pub const HANDLER_ERROR_CODE: u16 = 500;

/// Business logic of a service.
///
/// Implemented for any `Fn(Message) -> impl Future<Output = anyhow::Result<Bytes>>`.
/// The returned bytes are the reply. An error is answered with an empty
/// payload and the service error headers.
pub trait RequestHandler: Send + Sync + 'static {
    /// Answer one request.
    fn call(&self, message: Message) -> BoxFuture<'static, anyhow::Result<Bytes>>;
}

impl<F, Fut> RequestHandler for F
where
    F: Fn(Message) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Bytes>> + Send + 'static,
{
    fn call(&self, message: Message) -> BoxFuture<'static, anyhow::Result<Bytes>> {
        Box::pin(self(message))
    }
}

/// What answers requests on the service subject.
#[derive(Clone)]
pub enum Endpoint {
    /// A plain request handler.
    Request(Arc<dyn RequestHandler>),
    /// An HTTP handler, see [crate::http].
    Http(Arc<dyn HttpHandler>),
}

impl Debug for Endpoint {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Endpoint::Request(_) => f.write_str("Endpoint::Request"),
            Endpoint::Http(_) => f.write_str("Endpoint::Http"),
        }
    }
}

/// Request counters of one instance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceStats {
    /// Requests received on the service subject.
    pub requests: u64,
    /// Requests that failed.
    pub errors: u64,
}

/// What an instance reports on its discovery subject.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceInfo {
    /// Service name.
    pub name: String,
    /// Service version.
    pub version: String,
    /// Unique per instance.
    pub id: String,
    /// Set by [Service::discover].
    pub description: String,
    /// Subject requests are answered on.
    pub subject: String,
    /// Queue group of the service subject.
    pub queue_group: String,
    /// When the instance started, RFC 3339 on the wire.
    #[serde(with = "time::serde::rfc3339")]
    pub started: OffsetDateTime,
    /// Counters at the time of the answer.
    pub stats: ServiceStats,
}

/// What an instance reports on its health subject.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Health {
    /// Always `ok` while the instance answers.
    pub status: String,
    /// Service name.
    pub name: String,
    /// Instance id.
    pub id: String,
}

#[derive(Default)]
struct Counters {
    requests: AtomicU64,
    errors: AtomicU64,
}

struct Shared {
    name: String,
    version: String,
    id: String,
    queue_group: String,
    started: OffsetDateTime,
    description: Mutex<String>,
    counters: Counters,
}

impl Shared {
    fn description(&self) -> MutexGuard<'_, String> {
        self.description.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn stats(&self) -> ServiceStats {
        ServiceStats {
            requests: self.counters.requests.load(Ordering::Relaxed),
            errors: self.counters.errors.load(Ordering::Relaxed),
        }
    }

    fn info(&self) -> ServiceInfo {
        ServiceInfo {
            name: self.name.clone(),
            version: self.version.clone(),
            id: self.id.clone(),
            description: self.description().clone(),
            subject: self.name.clone(),
            queue_group: self.queue_group.clone(),
            started: self.started,
            stats: self.stats(),
        }
    }

    fn health(&self) -> Health {
        Health {
            status: "ok".to_owned(),
            name: self.name.clone(),
            id: self.id.clone(),
        }
    }
}

/// Headers marking a reply as a service error.
pub fn service_error_headers(code: u16, description: &str) -> HeaderMap {
    // header values are single line
    let description = description.replace(['\r', '\n'], " ");
    let mut headers = HeaderMap::new();
    headers.insert(SERVICE_ERROR_HEADER, description.as_str());
    headers.insert(SERVICE_ERROR_CODE_HEADER, code.to_string().as_str());
    headers
}

/// The service error carried by a reply, if any.
pub fn service_error(message: &Message) -> Option<Error> {
    let headers = message.headers.as_ref()?;
    let description = headers.get(SERVICE_ERROR_HEADER)?.as_str().to_owned();
    let code = headers
        .get(SERVICE_ERROR_CODE_HEADER)
        .and_then(|code| code.as_str().parse().ok())
        .unwrap_or(HANDLER_ERROR_CODE);
    Some(Error::Service { code, description })
}

async fn respond(
    connection: &Connection,
    shared: &Shared,
    handler: &dyn RequestHandler,
    message: Message,
) -> Result<()> {
    let Some(reply) = message.reply.clone() else {
        return Err(Error::MissingReplySubject);
    };
    let answer = match handler.call(message).await {
        Ok(payload) => OutboundMessage::new(reply, payload),
        Err(err) => {
            let description = format!("{err:#}");
            warn!(service = %shared.name, error = %description, "handler failed");
            let headers = service_error_headers(HANDLER_ERROR_CODE, &description);
            // counted once, whether or not the error reply goes out
            shared.counters.errors.fetch_add(1, Ordering::Relaxed);
            if let Err(err) = connection
                .send(OutboundMessage::new(reply, Bytes::new()).headers(Some(headers)))
                .await
            {
                warn!(service = %shared.name, error = %err, "could not send error reply");
            }
            return Ok(());
        }
    };
    connection.send(answer).await
}

async fn serve(connection: &Connection, shared: &Shared, endpoint: &Endpoint, message: Message) {
    shared.counters.requests.fetch_add(1, Ordering::Relaxed);
    let subject = message.subject.clone();
    let served = match endpoint {
        Endpoint::Request(handler) => respond(connection, shared, handler.as_ref(), message).await,
        Endpoint::Http(handler) => http::serve(connection, handler.as_ref(), message).await,
    };
    if let Err(err) = served {
        shared.counters.errors.fetch_add(1, Ordering::Relaxed);
        warn!(service = %shared.name, %subject, error = %err, "dropping request");
    }
}

async fn reply_json<T: Serialize>(connection: &Connection, message: &Message, value: &T) {
    let Some(reply) = message.reply.clone() else {
        debug!(subject = %message.subject, "control request without reply subject");
        return;
    };
    let sent = match crate::encoding::json(value) {
        Ok(payload) => connection.send(OutboundMessage::new(reply, payload)).await,
        Err(err) => Err(err.into()),
    };
    if let Err(err) = sent {
        warn!(subject = %message.subject, error = %err, "could not answer control request");
    }
}

/// A running service instance.
///
/// Dropping it drains every endpoint in the background, [Service::shutdown]
/// also waits for them.
///
/// ```rust
/// # use hibiki::{Connection, ServiceOption};
/// # use async_nats::Message;
/// # use bytes::Bytes;
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> hibiki::Result<()> {
/// let nc = Connection::memory();
/// let svc = nc
///     .service("my.service", "1.0.0", [ServiceOption::handler(|msg: Message| async move {
///         Ok::<_, anyhow::Error>(Bytes::from(format!("got {} bytes", msg.payload.len())))
///     })])
///     .await?;
/// svc.discover("services.my.service", "counts bytes").await?
///     .health("my.service.healthz").await?;
///
/// let reply = nc.request("my.service", "1234", []).await?;
/// assert_eq!(reply.payload, "got 4 bytes");
/// svc.shutdown().await?;
/// # Ok(())
/// # }
/// ```
pub struct Service {
    connection: Connection,
    shared: Arc<Shared>,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Service {
    fn tasks(&self) -> MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Feed every message of `subscription` to `serve`.
    ///
    /// On shutdown the subscription is drained: messages already received
    /// are still served, then the task ends.
    fn spawn<F, Fut>(&self, mut subscription: Subscription, serve: F)
    where
        F: Fn(Message) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let cancel = self.cancel.clone();
        let task = tokio::spawn(async move {
            let mut draining = false;
            loop {
                let message = if draining {
                    subscription.next().await
                } else {
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => {
                            draining = true;
                            if let Err(err) = subscription.drain().await {
                                let subject = subscription.subject();
                                warn!(subject, error = %err, "drain failed");
                                break;
                            }
                            continue;
                        }
                        message = subscription.next() => message,
                    }
                };
                match message {
                    Some(message) => serve(message).await,
                    None => break,
                }
            }
            subscription.close().await;
        });
        self.tasks().push(task);
    }

    /// Service name, also the subject it answers on.
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Service version.
    pub fn version(&self) -> &str {
        &self.shared.version
    }

    /// Unique id of this instance.
    pub fn id(&self) -> &str {
        &self.shared.id
    }

    /// Queue group of the service subject.
    pub fn queue_group(&self) -> &str {
        &self.shared.queue_group
    }

    /// What this instance reports on discovery.
    pub fn info(&self) -> ServiceInfo {
        self.shared.info()
    }

    /// Request counters of this instance.
    pub fn stats(&self) -> ServiceStats {
        self.shared.stats()
    }

    /// Answer discovery requests on `subject` with [ServiceInfo] as JSON.
    pub async fn discover(
        &self,
        subject: &str,
        description: impl Into<String>,
    ) -> Result<&Self> {
        *self.shared.description() = description.into();
        let subscription = self.connection.subscribe(subject, []).await?;
        let connection = self.connection.clone();
        let shared = self.shared.clone();
        self.spawn(subscription, move |message| {
            let connection = connection.clone();
            let shared = shared.clone();
            async move { reply_json(&connection, &message, &shared.info()).await }
        });
        debug!(service = %self.shared.name, subject, "discovery endpoint added");
        Ok(self)
    }

    /// Answer health checks on `subject` with [Health] as JSON.
    pub async fn health(&self, subject: &str) -> Result<&Self> {
        let subscription = self.connection.subscribe(subject, []).await?;
        let connection = self.connection.clone();
        let shared = self.shared.clone();
        self.spawn(subscription, move |message| {
            let connection = connection.clone();
            let shared = shared.clone();
            async move { reply_json(&connection, &message, &shared.health()).await }
        });
        debug!(service = %self.shared.name, subject, "health endpoint added");
        Ok(self)
    }

    /// Stop taking requests on every subject, answer the ones already
    /// received and flush the replies.
    pub async fn shutdown(self) -> Result<()> {
        self.cancel.cancel();
        let tasks = std::mem::take(&mut *self.tasks());
        for task in tasks {
            if let Err(err) = task.await {
                warn!(service = %self.shared.name, error = %err, "service task failed");
            }
        }
        if !self.connection.is_closed() {
            self.connection.flush().await?;
        }
        info!(service = %self.shared.name, id = %self.shared.id, "service stopped");
        Ok(())
    }
}

impl Drop for Service {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl Debug for Service {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Service")
            .field("name", &self.shared.name)
            .field("version", &self.shared.version)
            .field("id", &self.shared.id)
            .field("queue_group", &self.shared.queue_group)
            .finish()
    }
}

impl Connection {
    /// Start a service instance answering requests on `name`.
    ///
    /// Instances of the same `version` form a queue group, unless
    /// [ServiceOption::queue] picks another one. A handler is required.
    pub async fn service<I>(&self, name: &str, version: &str, options: I) -> Result<Service>
    where
        I: IntoIterator<Item = ServiceOption>,
    {
        let options = ServiceOptions::from_options(options)?;
        let endpoint = options.endpoint.ok_or(OptionError::MissingHandler)?;
        let queue_group = match options.queue {
            Some(queue) => queue,
            None => {
                validate_queue(version)?;
                version.to_owned()
            }
        };
        self.ensure_open()?;

        let subscription = self
            .subscribe(name, [SubOption::queue(queue_group.clone())])
            .await?;

        let shared = Arc::new(Shared {
            name: name.to_owned(),
            version: version.to_owned(),
            id: format!("{:016x}", rand::random::<u64>()),
            queue_group,
            started: OffsetDateTime::now_utc(),
            description: Mutex::new(String::new()),
            counters: Counters::default(),
        });
        let service = Service {
            connection: self.clone(),
            shared: shared.clone(),
            cancel: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        };

        let connection = self.clone();
        service.spawn(subscription, move |message| {
            let connection = connection.clone();
            let shared = shared.clone();
            let endpoint = endpoint.clone();
            async move { serve(&connection, &shared, &endpoint, message).await }
        });

        if let Some(discover) = options.discover {
            service.discover(&discover.subject, discover.description).await?;
        }
        if let Some(health) = options.health {
            service.health(&health).await?;
        }

        info!(
            service = %service.shared.name,
            version = %service.shared.version,
            id = %service.shared.id,
            "service started"
        );
        Ok(service)
    }
}
