//! The broadcast channel primitive and its adapter.
//!
//! The host environment gives us exactly two capabilities: broadcast a raw
//! message to every listener, and receive every broadcast message, including
//! the ones this instance sent itself. [`Channel`] models that contract;
//! [`LocalChannel`] is the in-process implementation used by tests and the
//! examples. [`ChannelAdapter`] sits on top and turns the pull-style
//! `next_message` stream into the single receive callback the transport
//! wires its classifier into.

use async_trait::async_trait;
use serde_json::Value;
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use tokio::sync::broadcast;

/// The untyped broadcast messaging primitive.
///
/// Implementations carry raw JSON values: no request/response pairing, no
/// addressing, no delivery guarantee. Delivery order of `next_message` must
/// match broadcast order as seen by the underlying primitive.
#[async_trait(?Send)]
pub trait Channel {
    /// Broadcast a message to every listener.
    ///
    /// Fire-and-forget: no delivery confirmation, and no error when nobody
    /// is listening.
    fn broadcast(&self, message: Value);

    /// Wait for the next inbound message, in delivery order.
    ///
    /// Returns `None` once the channel is closed for good.
    async fn next_message(&self) -> Option<Value>;
}

/// In-process broadcast channel over [`tokio::sync::broadcast`].
///
/// Every endpoint created via [`endpoint`](LocalChannel::endpoint) receives
/// every broadcast message, including its own, which mirrors how the real
/// host channel behaves and is what the transport's echo classification is
/// tested against.
pub struct LocalChannel {
    sender: broadcast::Sender<Value>,
    receiver: RefCell<broadcast::Receiver<Value>>,
}

impl LocalChannel {
    /// Create a new channel with the given buffer capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, receiver) = broadcast::channel(capacity);
        Self {
            sender,
            receiver: RefCell::new(receiver),
        }
    }

    /// Create another endpoint on the same channel.
    ///
    /// The new endpoint sees every message broadcast from this point on.
    pub fn endpoint(&self) -> Self {
        Self {
            sender: self.sender.clone(),
            receiver: RefCell::new(self.sender.subscribe()),
        }
    }
}

#[async_trait(?Send)]
impl Channel for LocalChannel {
    fn broadcast(&self, message: Value) {
        // A send error only means nobody is subscribed right now.
        let _ = self.sender.send(message);
    }

    // Single consumer per endpoint: the receiver borrow is held across the
    // await, so `next_message` must not be called concurrently on one
    // endpoint. The adapter's pump is the only caller.
    async fn next_message(&self) -> Option<Value> {
        loop {
            match self.receiver.borrow_mut().recv().await {
                Ok(message) => return Some(message),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "local channel receiver lagged, messages lost");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

type ReceiveCallback = Rc<dyn Fn(Value)>;

/// Adapter between the raw channel and the transport's inbound path.
///
/// Holds at most one receive callback; registering a new one replaces the
/// previous. The first registration spawns the pump task that forwards each
/// inbound message, in delivery order, to whatever callback is current at
/// that moment. The adapter never looks inside the messages it moves.
///
/// Single-threaded by construction (`Rc`, no locks); lives on a tokio
/// current-thread runtime inside a `LocalSet`.
pub struct ChannelAdapter<C: Channel + 'static> {
    channel: Rc<C>,
    callback: Rc<RefCell<Option<ReceiveCallback>>>,
    pump_started: Cell<bool>,
    pump: Cell<Option<tokio::task::JoinHandle<()>>>,
}

impl<C: Channel + 'static> ChannelAdapter<C> {
    /// Wrap a channel. No task is spawned until a callback is registered.
    pub fn new(channel: C) -> Self {
        Self {
            channel: Rc::new(channel),
            callback: Rc::new(RefCell::new(None)),
            pump_started: Cell::new(false),
            pump: Cell::new(None),
        }
    }

    /// Broadcast a message through the underlying channel.
    pub fn broadcast(&self, message: Value) {
        self.channel.broadcast(message);
    }

    /// Register the receive callback, replacing any previous registration.
    ///
    /// # Panics
    ///
    /// The first registration spawns the pump via
    /// [`tokio::task::spawn_local`] and therefore panics when called outside
    /// a `LocalSet`.
    pub fn on_receive(&self, callback: impl Fn(Value) + 'static) {
        *self.callback.borrow_mut() = Some(Rc::new(callback));
        self.ensure_pump();
    }

    fn ensure_pump(&self) {
        if self.pump_started.get() {
            return;
        }
        self.pump_started.set(true);

        let channel = Rc::clone(&self.channel);
        let slot = Rc::clone(&self.callback);
        let handle = tokio::task::spawn_local(async move {
            while let Some(message) = channel.next_message().await {
                // Clone out of the slot so the callback may re-register
                // itself without hitting a borrow conflict.
                let callback = slot.borrow().clone();
                match callback {
                    Some(callback) => callback(message),
                    None => {
                        tracing::debug!("inbound message dropped, no receive callback registered");
                    }
                }
            }
            tracing::debug!("channel closed, receive pump exiting");
        });
        self.pump.set(Some(handle));
    }
}

impl<C: Channel + 'static> Drop for ChannelAdapter<C> {
    fn drop(&mut self) {
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::future::Future;

    /// Run an async test on a current-thread runtime that supports spawn_local.
    fn run_local_test<F: Future<Output = ()> + 'static>(f: F) {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("build local runtime");
        tokio::task::LocalSet::new().block_on(&rt, f);
    }

    #[test]
    fn test_endpoint_receives_own_broadcast() {
        run_local_test(async {
            let channel = LocalChannel::new(8);
            channel.broadcast(json!({"n": 1}));

            let received = channel.next_message().await;
            assert_eq!(received, Some(json!({"n": 1})));
        });
    }

    #[test]
    fn test_every_endpoint_sees_every_message() {
        run_local_test(async {
            let a = LocalChannel::new(8);
            let b = a.endpoint();

            a.broadcast(json!("from a"));
            b.broadcast(json!("from b"));

            assert_eq!(a.next_message().await, Some(json!("from a")));
            assert_eq!(a.next_message().await, Some(json!("from b")));
            assert_eq!(b.next_message().await, Some(json!("from a")));
            assert_eq!(b.next_message().await, Some(json!("from b")));
        });
    }

    #[test]
    fn test_adapter_forwards_in_delivery_order() {
        run_local_test(async {
            let channel = LocalChannel::new(8);
            let sender = channel.endpoint();
            let adapter = ChannelAdapter::new(channel);

            let seen = Rc::new(RefCell::new(Vec::new()));
            let sink = Rc::clone(&seen);
            adapter.on_receive(move |message| sink.borrow_mut().push(message));

            sender.broadcast(json!(1));
            sender.broadcast(json!(2));
            sender.broadcast(json!(3));
            tokio::task::yield_now().await;

            assert_eq!(*seen.borrow(), vec![json!(1), json!(2), json!(3)]);
        });
    }

    #[test]
    fn test_reregistration_replaces_callback() {
        run_local_test(async {
            let channel = LocalChannel::new(8);
            let sender = channel.endpoint();
            let adapter = ChannelAdapter::new(channel);

            let first = Rc::new(RefCell::new(Vec::new()));
            let second = Rc::new(RefCell::new(Vec::new()));

            let sink = Rc::clone(&first);
            adapter.on_receive(move |message| sink.borrow_mut().push(message));
            sender.broadcast(json!("one"));
            tokio::task::yield_now().await;

            let sink = Rc::clone(&second);
            adapter.on_receive(move |message| sink.borrow_mut().push(message));
            sender.broadcast(json!("two"));
            tokio::task::yield_now().await;

            assert_eq!(*first.borrow(), vec![json!("one")]);
            assert_eq!(*second.borrow(), vec![json!("two")]);
        });
    }
}
