#![deny(rustdoc::broken_intra_doc_links)]
#![warn(missing_docs)]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::panic))]
#![doc = include_str!("../README.md")]

extern crate self as hibiki;

/// Core of Hibiki.
///
/// Errors, subjects and payload coercion.
pub mod core;

/// Connecting to the server.
pub mod config;

mod connection;

/// Serialization and byte codecs.
pub mod encoding;

/// HTTP compatibility.
///
/// Lets `http` based handlers answer NATS requests. The method comes from the
/// `Http-Method` header (`POST` when missing), the path from `Http-Path` or
/// from the subject (`orders.create` becomes `/orders/create`). Responses go
/// back with their status in `Http-Status`.
pub mod http;

/// Functional options.
///
/// Options are applied in order, so the last one setting a field wins. The
/// first failing option aborts parsing and its error is returned as is.
pub mod options;

/// Queue-grouped services.
///
/// Every instance joins the queue group named after the version, so each
/// request is answered by one instance of that version. Discovery and health
/// endpoints are answered by every instance.
pub mod service;

mod stream;

/// Replies made of several messages.
///
/// Chunks are numbered in the `Hibiki-Seq` header and followed by an empty
/// terminator message.
pub mod streamed;

mod subscription;

/// The seam between the high level API and the pub/sub client.
///
/// [NatsTransport](transport::NatsTransport) forwards to `async-nats`,
/// [MemoryTransport](transport::MemoryTransport) is an in-process broker with
/// the same delivery rules.
pub mod transport;

#[cfg(test)]
mod tests;

pub use crate::core::error;
pub use crate::core::error::{Error, Result};
pub use crate::core::payload::{Formatted, IntoPayload};
pub use crate::core::subject::{SubjectMatcher, SubjectPath};

pub use crate::config::ConnectConfig;
pub use crate::connection::{Connection, connect, connect_with};
pub use crate::options::{
    ReqOption, ReqOptions, ServiceOption, ServiceOptions, SubOption, SubOptions,
};
pub use crate::service::{Service, ServiceInfo, ServiceStats};
pub use crate::stream::{
    CONTENT_ENCODING_HEADER, CONTENT_TYPE_HEADER, JSON_CONTENT_TYPE, Stream,
};
pub use crate::subscription::{MessageHandler, Subscription};

pub use async_nats::{HeaderMap, Message};
pub use bytes;
pub use compact_str;
pub use futures;
pub use tracing;

/// Implement [IntoPayload] by `serde_json` for a type implementing `serde::Serialize`.
pub use hibiki_macros::JsonPayload;

/// Implement [IntoPayload] by the `Debug` representation.
pub use hibiki_macros::DebugPayload;

/// reexports of essentials
pub mod prelude {
    pub use crate::connection::{Connection, connect, connect_with};
    pub use crate::core::error::Error;
    pub use crate::core::payload::{Formatted, IntoPayload};
    pub use crate::http::HttpHandler;
    pub use crate::options::{ReqOption, ServiceOption, SubOption};
    pub use crate::service::RequestHandler;
    pub use crate::subscription::MessageHandler;
}
