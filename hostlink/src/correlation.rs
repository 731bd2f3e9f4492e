//! Pending-request state for request-response correlation.
//!
//! A [`PendingRequest`] is the single-settlement slot behind one in-flight
//! request: it owns the oneshot sender the caller is waiting on and
//! guarantees that exactly one outcome (reply payload, timeout, abandonment)
//! ever reaches that caller. [`RequestIdFactory`] mints the correlation ids
//! and [`TransportConfig`] carries the timeout window.

use crate::envelope::{CorrelationId, Envelope};
use crate::error::TransportError;
use serde_json::Value;
use std::cell::Cell;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::sync::oneshot;

/// Outcome delivered through a pending request's oneshot channel.
pub type RequestOutcome = Result<Value, TransportError>;

/// State of one outstanding request awaiting a reply or timeout.
///
/// # Lifecycle
///
/// 1. Created when the request is broadcast.
/// 2. Stored in the transport's pending map, keyed by correlation id.
/// 3. Settled exactly once: by a correlating reply, by the timeout task, or
///    by transport teardown.
/// 4. Removed from the pending map at settlement time.
///
/// Settlement is idempotent; a late reply racing the timeout task finds
/// either an empty map slot or a consumed sender and becomes a no-op.
///
/// Single-threaded design: uses `Cell` rather than atomics, matching the
/// cooperative scheduling model of the whole transport. A port to a
/// multi-threaded runtime must replace this with proper synchronization.
pub struct PendingRequest {
    /// The request envelope as it was broadcast, kept for diagnostics.
    envelope: Envelope,

    /// Oneshot sender for the outcome; consumed on settlement.
    sender: Cell<Option<oneshot::Sender<RequestOutcome>>>,

    /// When the request was created; drives the timeout window.
    created_at: Instant,

    /// Settlement guard, set by the first `complete` call.
    completed: Cell<bool>,
}

impl PendingRequest {
    /// Track a freshly broadcast request.
    pub fn new(envelope: Envelope, sender: oneshot::Sender<RequestOutcome>) -> Self {
        Self {
            envelope,
            sender: Cell::new(Some(sender)),
            created_at: Instant::now(),
            completed: Cell::new(false),
        }
    }

    /// The original request envelope.
    pub fn envelope(&self) -> &Envelope {
        &self.envelope
    }

    /// Time since the request was created.
    pub fn elapsed(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Whether this request has already been settled.
    pub fn is_completed(&self) -> bool {
        self.completed.get()
    }

    /// Settle the request with the given outcome.
    ///
    /// Idempotent: only the first call delivers anything; later calls are
    /// no-ops. A send failure only means the caller stopped waiting.
    pub fn complete(&self, outcome: RequestOutcome) {
        if self.completed.replace(true) {
            return;
        }

        match self.sender.take() {
            Some(sender) => {
                if sender.send(outcome).is_err() {
                    tracing::warn!(
                        correlation_id = ?self.envelope.correlation_id,
                        "request outcome dropped, caller no longer waiting"
                    );
                }
            }
            None => {
                tracing::warn!(
                    correlation_id = ?self.envelope.correlation_id,
                    "pending request sender already consumed"
                );
            }
        }
    }

    /// Settle with [`TransportError::Timeout`].
    pub fn on_timeout(&self) {
        self.complete(Err(TransportError::Timeout));
    }

    /// Settle with [`TransportError::Abandoned`] (transport teardown).
    pub fn on_abandoned(&self) {
        self.complete(Err(TransportError::Abandoned));
    }
}

/// Factory for correlation ids.
///
/// Ids combine the current epoch-millisecond timestamp with a monotonically
/// increasing sequence number. The sequence number is the uniqueness source;
/// the timestamp is only there to make ids legible in logs. Rapid-fire
/// requests inside the same millisecond therefore still get distinct ids.
#[derive(Debug)]
pub struct RequestIdFactory {
    seq: Cell<u64>,
}

impl RequestIdFactory {
    /// Create a factory starting at sequence 0.
    pub fn new() -> Self {
        Self { seq: Cell::new(0) }
    }

    /// Mint the next correlation id.
    pub fn next(&self) -> CorrelationId {
        let seq = self.seq.get();
        self.seq.set(seq + 1);
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_millis())
            .unwrap_or(0);
        CorrelationId::new(format!("req-{millis}-{seq}"))
    }
}

impl Default for RequestIdFactory {
    fn default() -> Self {
        Self::new()
    }
}

/// Default timeout window for a pending request.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Shared configuration for the transport.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Fixed window a request may stay pending before it times out.
    pub request_timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

impl TransportConfig {
    /// Configuration with a custom request timeout.
    pub fn with_timeout(request_timeout: Duration) -> Self {
        Self { request_timeout }
    }
}
