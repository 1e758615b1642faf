use crate::connection::Connection;
use crate::error::{Error, Result};
use crate::options::{ReqOption, SubOption};
use crate::subscription::Subscription;
use crate::transport::OutboundMessage;
use async_nats::{HeaderMap, Message};
use bytes::Bytes;
use futures::future::BoxFuture;
use http::{Method, StatusCode};
use std::future::Future;
use std::sync::Arc;
use tracing::warn;

/// Header carrying the HTTP method.
pub const HTTP_METHOD_HEADER: &str = "Http-Method";

/// Header carrying the HTTP path.
pub const HTTP_PATH_HEADER: &str = "Http-Path";

/// Header carrying the HTTP status of a reply.
pub const HTTP_STATUS_HEADER: &str = "Http-Status";

/// A handler written against the `http` crate types.
///
/// Implemented for any `Fn(http::Request<Bytes>) -> impl Future<Output = http::Response<Bytes>>`.
pub trait HttpHandler: Send + Sync + 'static {
    /// Answer one request.
    fn call(&self, request: http::Request<Bytes>) -> BoxFuture<'static, http::Response<Bytes>>;
}

impl<F, Fut> HttpHandler for F
where
    F: Fn(http::Request<Bytes>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = http::Response<Bytes>> + Send + 'static,
{
    fn call(&self, request: http::Request<Bytes>) -> BoxFuture<'static, http::Response<Bytes>> {
        Box::pin(self(request))
    }
}

fn path_from_subject(subject: &str) -> String {
    format!("/{}", subject.replace('.', "/"))
}

fn copy_http_headers(from: &http::HeaderMap, to: &mut HeaderMap) {
    for (name, value) in from {
        match value.to_str() {
            Ok(value) => to.append(name.as_str(), value),
            Err(_) => warn!(header = %name, "skipping header that is not visible ASCII"),
        }
    }
}

/// Build the [http::Request] a message stands for.
pub fn request_from_message(message: &Message) -> Result<http::Request<Bytes>> {
    let mut method = Method::POST;
    let mut path = path_from_subject(message.subject.as_str());
    let mut builder = http::Request::builder();

    if let Some(headers) = &message.headers {
        for (name, values) in headers.iter() {
            let name = name.to_string();
            if name.eq_ignore_ascii_case(HTTP_METHOD_HEADER) {
                if let Some(value) = values.first() {
                    method = Method::from_bytes(value.as_str().as_bytes())
                        .map_err(http::Error::from)?;
                }
            } else if name.eq_ignore_ascii_case(HTTP_PATH_HEADER) {
                if let Some(value) = values.first() {
                    path = value.as_str().to_owned();
                }
            } else {
                for value in values {
                    builder = builder.header(name.as_str(), value.as_str());
                }
            }
        }
    }

    Ok(builder
        .method(method)
        .uri(path)
        .body(message.payload.clone())?)
}

/// Split an [http::Response] into reply headers and payload.
pub fn response_into_reply(response: http::Response<Bytes>) -> (HeaderMap, Bytes) {
    let (parts, body) = response.into_parts();
    let mut headers = HeaderMap::new();
    headers.insert(HTTP_STATUS_HEADER, parts.status.as_str());
    copy_http_headers(&parts.headers, &mut headers);
    (headers, body)
}

/// Split an [http::Request] into request headers and payload.
///
/// The path is only sent when it is not `/`, so the receiver derives it
/// from the subject.
pub fn request_into_message(request: http::Request<Bytes>) -> (HeaderMap, Bytes) {
    let (parts, body) = request.into_parts();
    let mut headers = HeaderMap::new();
    headers.insert(HTTP_METHOD_HEADER, parts.method.as_str());
    // a bare "/" leaves the path to the subject
    if let Some(path) = parts.uri.path_and_query().filter(|path| path.as_str() != "/") {
        headers.insert(HTTP_PATH_HEADER, path.as_str());
    }
    copy_http_headers(&parts.headers, &mut headers);
    (headers, body)
}

/// Rebuild the [http::Response] carried by a reply.
pub fn response_from_message(message: &Message) -> Result<http::Response<Bytes>> {
    let mut status = StatusCode::OK;
    let mut builder = http::Response::builder();

    if let Some(headers) = &message.headers {
        for (name, values) in headers.iter() {
            let name = name.to_string();
            if name.eq_ignore_ascii_case(HTTP_STATUS_HEADER) {
                if let Some(value) = values.first() {
                    status = StatusCode::from_bytes(value.as_str().as_bytes())
                        .map_err(http::Error::from)?;
                }
            } else {
                for value in values {
                    builder = builder.header(name.as_str(), value.as_str());
                }
            }
        }
    }

    Ok(builder.status(status).body(message.payload.clone())?)
}

fn bad_request(err: &Error) -> http::Response<Bytes> {
    let mut response = http::Response::new(Bytes::from(err.to_string()));
    *response.status_mut() = StatusCode::BAD_REQUEST;
    response
}

/// Answer one message with `handler`.
pub(crate) async fn serve(
    connection: &Connection,
    handler: &dyn HttpHandler,
    message: Message,
) -> Result<()> {
    let Some(reply) = message.reply.clone() else {
        return Err(Error::MissingReplySubject);
    };
    let response = match request_from_message(&message) {
        Ok(request) => handler.call(request).await,
        Err(err) => bad_request(&err),
    };
    let (headers, body) = response_into_reply(response);
    connection
        .send(OutboundMessage::new(reply, body).headers(Some(headers)))
        .await
}

impl Connection {
    /// Answer requests on `subject` with an HTTP handler.
    ///
    /// ```rust
    /// # use hibiki::Connection;
    /// # use bytes::Bytes;
    /// # #[tokio::main(flavor = "current_thread")]
    /// # async fn main() -> hibiki::Result<()> {
    /// let nc = Connection::memory();
    /// let _sub = nc.handle("foo", |req: http::Request<Bytes>| async move {
    ///     let greeting = format!("Hello from NATS for {:?}!\n", req.uri().path());
    ///     http::Response::new(Bytes::from(greeting))
    /// }).await?;
    ///
    /// let response = nc.http_request("foo", http::Request::new(Bytes::new()), []).await?;
    /// assert_eq!(response.body(), "Hello from NATS for \"/foo\"!\n");
    /// # Ok(())
    /// # }
    /// ```
    pub async fn handle<H: HttpHandler>(&self, subject: &str, handler: H) -> Result<Subscription> {
        let handler: Arc<dyn HttpHandler> = Arc::new(handler);
        let connection = self.clone();
        self.subscribe(
            subject,
            [SubOption::handler(move |message: Message| {
                let connection = connection.clone();
                let handler = handler.clone();
                async move {
                    let subject = message.subject.clone();
                    if let Err(err) = serve(&connection, handler.as_ref(), message).await {
                        warn!(%subject, error = %err, "dropping HTTP request");
                    }
                }
            })],
        )
        .await
    }

    /// Send an HTTP request over NATS and wait for the HTTP response.
    ///
    /// The request URI only contributes its path and query, the subject
    /// decides who answers. Without a path the receiver sees the subject
    /// as path.
    pub async fn http_request<I>(
        &self,
        subject: &str,
        request: http::Request<Bytes>,
        options: I,
    ) -> Result<http::Response<Bytes>>
    where
        I: IntoIterator<Item = ReqOption>,
    {
        let (headers, body) = request_into_message(request);
        let options = options
            .into_iter()
            .chain(std::iter::once(ReqOption::headers(headers)));
        let reply = self.request(subject, body, options).await?;
        response_from_message(&reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_nats::Subject;
    use futures::StreamExt;

    fn message(subject: &str, headers: Option<HeaderMap>, payload: &'static str) -> Message {
        Message {
            subject: Subject::from(subject),
            reply: Some(Subject::from("_INBOX.test")),
            payload: Bytes::from_static(payload.as_bytes()),
            headers,
            status: None,
            description: None,
            length: payload.len(),
        }
    }

    #[test]
    fn subject_becomes_path_and_post_is_default() {
        let request = request_from_message(&message("orders.create", None, "{}")).unwrap();
        assert_eq!(request.method(), Method::POST);
        assert_eq!(request.uri().path(), "/orders/create");
        assert_eq!(request.body(), "{}");
    }

    #[test]
    fn method_path_and_headers_come_from_message() {
        let mut headers = HeaderMap::new();
        headers.insert(HTTP_METHOD_HEADER, "GET");
        headers.insert(HTTP_PATH_HEADER, "/orders/42?expand=items");
        headers.insert("Accept", "application/json");
        let request = request_from_message(&message("orders.get", Some(headers), "")).unwrap();

        assert_eq!(request.method(), Method::GET);
        assert_eq!(request.uri().path(), "/orders/42");
        assert_eq!(request.uri().query(), Some("expand=items"));
        assert_eq!(request.headers()["accept"], "application/json");
        assert!(request.headers().get(HTTP_METHOD_HEADER).is_none());
    }

    #[test]
    fn invalid_method_is_an_error() {
        let mut headers = HeaderMap::new();
        headers.insert(HTTP_METHOD_HEADER, "NOT A METHOD");
        assert!(matches!(
            request_from_message(&message("orders", Some(headers), "")),
            Err(Error::Http(_))
        ));
    }

    #[test]
    fn response_round_trips_through_reply() {
        let response = http::Response::builder()
            .status(StatusCode::CREATED)
            .header("NATS-X", "yes")
            .body(Bytes::from_static(b"created"))
            .unwrap();
        let (headers, body) = response_into_reply(response);

        let mut reply = message("_INBOX.test", Some(headers), "");
        reply.payload = body;
        let response = response_from_message(&reply).unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(response.headers()["nats-x"], "yes");
        assert_eq!(response.body(), "created");
    }

    #[tokio::test]
    async fn handle_serves_http_requests() {
        let nc = Connection::memory();
        let _sub = nc
            .handle("foo", |req: http::Request<Bytes>| async move {
                http::Response::builder()
                    .status(StatusCode::ACCEPTED)
                    .header("NATS-X", "yes")
                    .body(Bytes::from(format!("{} {}", req.method(), req.uri().path())))
                    .unwrap_or_default()
            })
            .await
            .unwrap();

        let request = http::Request::builder()
            .method(Method::PUT)
            .uri("/custom/path")
            .body(Bytes::new())
            .unwrap();
        let response = nc.http_request("foo", request, []).await.unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert_eq!(response.headers()["nats-x"], "yes");
        assert_eq!(response.body(), "PUT /custom/path");
    }

    #[tokio::test]
    async fn plain_requests_reach_http_handlers() {
        let nc = Connection::memory();
        let _sub = nc
            .handle("greeter.hello", |req: http::Request<Bytes>| async move {
                http::Response::new(req.into_body())
            })
            .await
            .unwrap();

        let reply = nc.request("greeter.hello", "ping", []).await.unwrap();
        assert_eq!(reply.payload, "ping");
        let status = reply.headers.as_ref().and_then(|h| h.get(HTTP_STATUS_HEADER));
        assert_eq!(status.map(|v| v.as_str()), Some("200"));
    }

    #[tokio::test]
    async fn messages_without_reply_subject_are_dropped() {
        let nc = Connection::memory();
        let handler =
            |req: http::Request<Bytes>| async move { http::Response::new(req.into_body()) };

        let mut orphan = message("greeter.hello", None, "ping");
        orphan.reply = None;
        assert!(matches!(
            serve(&nc, &handler, orphan).await,
            Err(Error::MissingReplySubject)
        ));

        let _sub = nc.handle("greeter.hello", handler).await.unwrap();
        let mut watcher = nc.subscribe("_INBOX.>", []).await.unwrap();
        nc.publish("greeter.hello", "nobody asked").await.unwrap();
        let reply = nc.request("greeter.hello", "ping", []).await.unwrap();
        assert_eq!(reply.payload, "ping");

        // the only reply seen on any inbox is the one for the request
        let seen = watcher.next().await.unwrap();
        assert_eq!(seen.payload, "ping");
    }
}
