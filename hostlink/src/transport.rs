//! The correlation transport.
//!
//! `WidgetTransport` is the piece with real protocol character: it mints
//! correlation ids for outgoing requests, tracks pending entries, classifies
//! every inbound channel message as "reply to one of my requests" or
//! "unsolicited event", settles the matching oneshot when a reply arrives,
//! and enforces a fixed timeout so no request is stuck forever.
//!
//! # Message flow
//!
//! ```text
//! Request:
//!   1. Mint correlation id (timestamp + sequence)
//!   2. Insert PendingRequest into the pending map
//!   3. Spawn the single-shot timeout task
//!   4. Broadcast the request envelope
//!   5. Await the oneshot receiver
//!
//! Inbound:
//!   a. Decode defensively, learn peerIdentity on first sight
//!   b. Reply role + known correlation id  -> remove entry, settle with payload
//!   c. Reply role + unknown id            -> warn, drop
//!   d. Own outbound-request echo          -> debug, drop
//!   e. Everything else                    -> EventDispatcher
//! ```
//!
//! # Concurrency
//!
//! Single-threaded cooperative model on a tokio current-thread runtime: the
//! pending map is plain `RefCell` state, mutations never interleave
//! mid-execution, and all waiting is expressed as suspended futures. A port
//! to a multi-threaded runtime must add mutual exclusion around the pending
//! map.

use crate::channel::{Channel, ChannelAdapter};
use crate::correlation::{PendingRequest, RequestIdFactory, TransportConfig};
use crate::dispatch::EventDispatcher;
use crate::envelope::{ChannelRole, CorrelationId, Envelope};
use crate::error::TransportError;
use serde_json::Value;
use std::cell::{Cell, OnceCell, RefCell};
use std::collections::HashMap;
use std::rc::{Rc, Weak};
use tokio::sync::oneshot;

/// Correlation transport for one embedded application instance.
///
/// Owns the channel adapter, the pending-request map and the unsolicited
/// event dispatcher. Construction wires the inbound classifier into the
/// adapter, so a transport starts receiving as soon as it exists.
///
/// # Example
///
/// ```rust,ignore
/// let transport = WidgetTransport::new(channel);
/// transport.set_unsolicited_handler(|envelope| {
///     // capability negotiation, host-initiated traffic, ...
/// });
///
/// let outcome = transport.request("ping", json!({"n": 1})).await?;
/// ```
///
/// # Panics
///
/// Construction spawns the receive pump via [`tokio::task::spawn_local`] and
/// therefore panics outside a `LocalSet`.
pub struct WidgetTransport<C: Channel + 'static> {
    adapter: ChannelAdapter<C>,
    shared: Rc<TransportShared>,
    ids: RequestIdFactory,
    config: TransportConfig,
}

/// Inbound-path state, shared between the transport, the adapter callback
/// and the per-request timeout tasks.
struct TransportShared {
    /// Pending requests keyed by correlation id. The only mutable shared
    /// state of the transport.
    pending: RefCell<HashMap<CorrelationId, PendingRequest>>,

    /// Identity of this embedded instance, learned from the first inbound
    /// envelope that carries one. Write-once, never authenticated.
    peer_identity: OnceCell<String>,

    /// Sink for inbound traffic that correlates to nothing.
    dispatcher: EventDispatcher,

    /// Set by `close`; refuses new requests afterwards.
    closed: Cell<bool>,
}

impl<C: Channel + 'static> WidgetTransport<C> {
    /// Create a transport with the default configuration (10 s timeout).
    pub fn new(channel: C) -> Self {
        Self::with_config(channel, TransportConfig::default())
    }

    /// Create a transport with an explicit configuration.
    pub fn with_config(channel: C, config: TransportConfig) -> Self {
        let shared = Rc::new(TransportShared {
            pending: RefCell::new(HashMap::new()),
            peer_identity: OnceCell::new(),
            dispatcher: EventDispatcher::new(),
            closed: Cell::new(false),
        });

        let adapter = ChannelAdapter::new(channel);
        let inbound = Rc::clone(&shared);
        adapter.on_receive(move |message| inbound.on_inbound(message));

        Self {
            adapter,
            shared,
            ids: RequestIdFactory::new(),
            config,
        }
    }

    /// Send a request and wait for its reply.
    ///
    /// Mints a fresh correlation id, broadcasts the request envelope and
    /// suspends until one of: a correlating reply arrives (yielding its
    /// payload), the timeout window elapses ([`TransportError::Timeout`]),
    /// or the transport is torn down ([`TransportError::Abandoned`]).
    ///
    /// Concurrent requests are independent; replies may arrive in any order
    /// and settle only their own entry.
    pub async fn request(&self, action: &str, data: Value) -> Result<Value, TransportError> {
        if self.shared.closed.get() {
            return Err(TransportError::Abandoned);
        }

        let correlation_id = self.ids.next();
        let envelope = Envelope::request(
            action,
            data,
            correlation_id.clone(),
            self.shared.peer_identity.get().cloned(),
        );

        let (tx, rx) = oneshot::channel();
        self.shared
            .pending
            .borrow_mut()
            .insert(correlation_id.clone(), PendingRequest::new(envelope.clone(), tx));
        self.spawn_timeout(correlation_id.clone());

        tracing::debug!(correlation_id = %correlation_id, action, "broadcasting request");
        self.adapter.broadcast(envelope.to_value());

        match rx.await {
            Ok(outcome) => outcome,
            // Sender dropped without settling: the transport went away.
            Err(_) => Err(TransportError::Abandoned),
        }
    }

    /// Send a reply to a previously received request envelope.
    ///
    /// Used by the side answering a request, not by the requester. The reply
    /// carries the original's correlation id and peer identity with `data`
    /// attached as the response payload.
    pub fn reply(&self, original: &Envelope, data: Value) {
        let reply = Envelope::reply_to(original, data);
        tracing::debug!(correlation_id = ?reply.correlation_id, "broadcasting reply");
        self.adapter.broadcast(reply.to_value());
    }

    /// Register the handler for unsolicited inbound envelopes.
    ///
    /// Replaces any previous handler. Invocation is synchronous on the
    /// receive path; panics in the handler are contained by the dispatcher.
    pub fn set_unsolicited_handler(&self, handler: impl Fn(Envelope) + 'static) {
        self.shared.dispatcher.set_handler(handler);
    }

    /// Tear the transport down.
    ///
    /// Every outstanding request is settled with
    /// [`TransportError::Abandoned`]; later `request` calls fail immediately
    /// with the same error. Idempotent.
    pub fn close(&self) {
        if self.shared.closed.replace(true) {
            return;
        }
        tracing::debug!(
            outstanding = self.shared.pending.borrow().len(),
            "closing transport"
        );
        self.shared.abandon_all();
    }

    /// Number of requests currently awaiting a reply.
    pub fn pending_count(&self) -> usize {
        self.shared.pending.borrow().len()
    }

    /// The peer identity learned so far, if any.
    pub fn peer_identity(&self) -> Option<String> {
        self.shared.peer_identity.get().cloned()
    }

    /// One single-shot deferred expiry check per request. The task holds
    /// only a weak reference, so it neither keeps a dropped transport alive
    /// nor fires into one; settling an already-removed entry is a no-op.
    fn spawn_timeout(&self, correlation_id: CorrelationId) {
        let shared: Weak<TransportShared> = Rc::downgrade(&self.shared);
        let timeout = self.config.request_timeout;
        tokio::task::spawn_local(async move {
            tokio::time::sleep(timeout).await;
            if let Some(shared) = shared.upgrade() {
                shared.expire(&correlation_id);
            }
        });
    }
}

impl<C: Channel + 'static> Drop for WidgetTransport<C> {
    fn drop(&mut self) {
        // Anything still pending (e.g. held by a detached task) resolves to
        // Abandoned rather than hanging forever.
        self.shared.abandon_all();
    }
}

impl TransportShared {
    /// Classify one inbound channel message.
    fn on_inbound(&self, message: Value) {
        let envelope = Envelope::from_value(message);

        if let Some(peer) = envelope.peer_identity.as_deref().filter(|p| !p.is_empty()) {
            if self.peer_identity.set(peer.to_owned()).is_ok() {
                tracing::debug!(peer_identity = peer, "learned peer identity");
            }
        }

        match &envelope.role {
            ChannelRole::Reply => self.resolve_reply(envelope),
            ChannelRole::OutboundRequest if self.is_own_echo(&envelope) => {
                tracing::debug!(
                    correlation_id = ?envelope.correlation_id,
                    "ignoring echo of own outbound request"
                );
            }
            _ => self.dispatcher.dispatch(envelope),
        }
    }

    /// Settle the pending entry a reply envelope correlates to, if any.
    fn resolve_reply(&self, envelope: Envelope) {
        let Some(correlation_id) = envelope.correlation_id.clone() else {
            tracing::warn!("reply without correlation id, dropping");
            return;
        };

        let entry = self.pending.borrow_mut().remove(&correlation_id);
        match entry {
            Some(entry) => {
                tracing::debug!(
                    correlation_id = %correlation_id,
                    elapsed_ms = entry.elapsed().as_millis() as u64,
                    "resolving pending request"
                );
                entry.complete(Ok(envelope.response.unwrap_or(Value::Null)));
            }
            None => {
                // Late reply, duplicate, or some other party's traffic.
                tracing::warn!(
                    correlation_id = %correlation_id,
                    "reply for unknown correlation id, dropping"
                );
            }
        }
    }

    /// The channel echoes our own broadcasts back at us; an outbound-request
    /// envelope whose correlation id sits in our pending map is such an echo.
    /// Foreign outbound requests fall through to the dispatcher, which is how
    /// the answering side of a request sees it.
    fn is_own_echo(&self, envelope: &Envelope) -> bool {
        envelope
            .correlation_id
            .as_ref()
            .is_some_and(|id| self.pending.borrow().contains_key(id))
    }

    fn abandon_all(&self) {
        let drained: Vec<_> = self.pending.borrow_mut().drain().collect();
        for (correlation_id, entry) in drained {
            tracing::debug!(correlation_id = %correlation_id, "abandoning pending request");
            entry.on_abandoned();
        }
    }

    fn expire(&self, correlation_id: &CorrelationId) {
        if let Some(entry) = self.pending.borrow_mut().remove(correlation_id) {
            tracing::warn!(
                correlation_id = %correlation_id,
                elapsed_ms = entry.elapsed().as_millis() as u64,
                "request timed out"
            );
            entry.on_timeout();
        }
    }
}
