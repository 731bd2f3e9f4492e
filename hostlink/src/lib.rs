//! # hostlink
//!
//! Correlated request/response messaging for a sandboxed embedded
//! application (a "widget") talking to its hosting container over a shared,
//! one-way, untyped broadcast channel.
//!
//! The channel delivers every message to every listener with no inherent
//! request/response pairing and no addressing beyond a shared namespace.
//! This crate supplies the missing correlation layer:
//!
//! - [`WidgetTransport`] assigns unique correlation ids to outgoing
//!   requests, resolves the matching future when a reply arrives, and
//!   enforces a fixed per-request timeout.
//! - [`ChannelAdapter`] wraps the underlying broadcast primitive
//!   ([`Channel`]) independent of any message schema.
//! - [`EventDispatcher`] routes inbound traffic that correlates to nothing
//!   (host-initiated requests, notifications) to a single application
//!   handler.
//!
//! ## Concurrency model
//!
//! Strictly single-threaded and event-driven: everything runs on a tokio
//! current-thread runtime inside a `LocalSet`, concurrency is interleaved
//! suspended futures, and shared state is `Rc`/`RefCell` with no locks.
//!
//! ## What this crate does not do
//!
//! No delivery guarantee, no channel encryption or authentication (the peer
//! identity is an unauthenticated convention learned from the first inbound
//! message), no persistence of pending requests, and no caller-initiated
//! cancellation: a pending request ends by reply, by timeout, or by
//! transport teardown.
//!
//! ## Example
//!
//! ```rust,ignore
//! use hostlink::{LocalChannel, WidgetTransport};
//! use serde_json::json;
//!
//! let transport = WidgetTransport::new(LocalChannel::new(16));
//! transport.set_unsolicited_handler(|envelope| {
//!     // capability negotiation, host-initiated traffic, ...
//! });
//!
//! let reply = transport.request("ping", json!({"n": 1})).await?;
//! ```

#![deny(missing_docs)]

pub mod channel;
pub mod correlation;
pub mod dispatch;
pub mod envelope;
pub mod error;
pub mod transport;

pub use channel::{Channel, ChannelAdapter, LocalChannel};
pub use correlation::{
    PendingRequest, RequestIdFactory, RequestOutcome, TransportConfig, DEFAULT_REQUEST_TIMEOUT,
};
pub use dispatch::EventDispatcher;
pub use envelope::{ChannelRole, CorrelationId, Envelope};
pub use error::TransportError;
pub use transport::WidgetTransport;
