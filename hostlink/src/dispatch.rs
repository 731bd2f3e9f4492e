//! Routing of unsolicited inbound envelopes to the application.
//!
//! Anything the transport cannot correlate to a pending request lands here.
//! The dispatcher holds at most one handler and shields the channel's
//! receive path from it: a panicking handler is caught and logged so that
//! one bad event never breaks future message delivery.

use crate::envelope::Envelope;
use std::cell::RefCell;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;

type UnsolicitedHandler = Rc<dyn Fn(Envelope)>;

/// Dispatcher for unsolicited inbound envelopes.
///
/// Holds at most one registered handler; registering a new one replaces the
/// previous. Dispatch is synchronous and happens on the channel's receive
/// path, so handlers should stay cheap.
#[derive(Default)]
pub struct EventDispatcher {
    handler: RefCell<Option<UnsolicitedHandler>>,
}

impl EventDispatcher {
    /// Create a dispatcher with no handler registered.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the handler, replacing any previous registration.
    pub fn set_handler(&self, handler: impl Fn(Envelope) + 'static) {
        *self.handler.borrow_mut() = Some(Rc::new(handler));
    }

    /// Whether a handler is currently registered.
    pub fn has_handler(&self) -> bool {
        self.handler.borrow().is_some()
    }

    /// Invoke the current handler with the envelope.
    ///
    /// With no handler registered the envelope is dropped with a diagnostic
    /// log. A panic in the handler is caught and logged; it never propagates
    /// into the caller.
    pub fn dispatch(&self, envelope: Envelope) {
        // Clone out of the slot so the handler may replace itself.
        let handler = self.handler.borrow().clone();
        let Some(handler) = handler else {
            tracing::debug!(
                action = ?envelope.action,
                "unsolicited envelope dropped, no handler registered"
            );
            return;
        };

        if panic::catch_unwind(AssertUnwindSafe(|| handler(envelope))).is_err() {
            tracing::error!("unsolicited handler panicked, envelope abandoned");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(action: &str) -> Envelope {
        Envelope::from_value(json!({"channel-role": "event", "action": action}))
    }

    #[test]
    fn test_dispatch_without_handler_is_a_noop() {
        let dispatcher = EventDispatcher::new();
        assert!(!dispatcher.has_handler());

        dispatcher.dispatch(event("capabilities"));
    }

    #[test]
    fn test_dispatch_invokes_handler() {
        let dispatcher = EventDispatcher::new();
        let seen = Rc::new(RefCell::new(Vec::new()));

        let sink = Rc::clone(&seen);
        dispatcher.set_handler(move |envelope| {
            sink.borrow_mut().push(envelope.action.clone());
        });

        dispatcher.dispatch(event("capabilities"));
        dispatcher.dispatch(event("notify_capabilities"));

        assert_eq!(
            *seen.borrow(),
            vec![
                Some("capabilities".to_owned()),
                Some("notify_capabilities".to_owned())
            ]
        );
    }

    #[test]
    fn test_set_handler_replaces_previous() {
        let dispatcher = EventDispatcher::new();
        let first = Rc::new(RefCell::new(0_u32));
        let second = Rc::new(RefCell::new(0_u32));

        let counter = Rc::clone(&first);
        dispatcher.set_handler(move |_| *counter.borrow_mut() += 1);
        dispatcher.dispatch(event("a"));

        let counter = Rc::clone(&second);
        dispatcher.set_handler(move |_| *counter.borrow_mut() += 1);
        dispatcher.dispatch(event("b"));

        assert_eq!(*first.borrow(), 1);
        assert_eq!(*second.borrow(), 1);
    }

    #[test]
    fn test_panicking_handler_is_contained() {
        let dispatcher = EventDispatcher::new();
        let delivered = Rc::new(RefCell::new(0_u32));

        dispatcher.set_handler(|_| panic!("application bug"));
        // Must not propagate.
        dispatcher.dispatch(event("boom"));

        // Delivery keeps working afterwards.
        let counter = Rc::clone(&delivered);
        dispatcher.set_handler(move |_| *counter.borrow_mut() += 1);
        dispatcher.dispatch(event("after"));

        assert_eq!(*delivered.borrow(), 1);
    }
}
