//! Error types for the hostlink transport.
//!
//! Only two conditions are ever surfaced to a caller: a request that ran out
//! of time, and a request that was still outstanding when the transport was
//! torn down. Everything else the channel can throw at us (replies for
//! unknown correlation ids, malformed messages, panicking application
//! handlers) is tolerated at the classification boundary and logged, because
//! no caller is waiting on those outcomes.

use thiserror::Error;

/// Errors delivered to the caller of [`WidgetTransport::request`].
///
/// No variant here is fatal to the process; the worst case is a single
/// rejected request.
///
/// [`WidgetTransport::request`]: crate::transport::WidgetTransport::request
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// No matching reply arrived within the timeout window.
    #[error("request timed out waiting for a reply")]
    Timeout,

    /// The transport was closed (or dropped) while the request was
    /// outstanding, or `request` was called on an already-closed transport.
    #[error("transport closed with request outstanding")]
    Abandoned,
}
