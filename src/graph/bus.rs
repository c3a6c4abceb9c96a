//! Asynchronous message channel from nodes to the application.
//!
//! ```text
//!  streaming threads ──post──▶ ┌──────────────┐          ┌─────────────┐
//!  control thread   ──post──▶  │ bounded chan │──recv──▶ │ dispatch    │──▶ callback slot
//!                              └──────────────┘          │ thread      │──▶ subscribers
//!                                                        └─────────────┘
//! ```
//!
//! Each pipeline owns exactly one dispatch thread.  Messages are delivered
//! in post order, first to the single callback slot and then to every live
//! subscriber.  A slow subscriber loses messages instead of stalling the bus.

use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender, TrySendError};

use super::state::State;
use super::value::Structure;
use super::lock;

/// Capacity of the bus channel.  Posting blocks when full.
pub const BUS_CAPACITY: usize = 256;

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// Notification posted by a node or by the application.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// A sink received end-of-stream.
    Eos { source: String },
    Error {
        source: String,
        code: i32,
        description: String,
    },
    Warning { source: String, description: String },
    StateChanged {
        source: String,
        old: State,
        new: State,
    },
    /// Node-specific payload, e.g. recognition hypotheses.
    Element { source: String, structure: Structure },
    /// Application-defined payload.
    Application(Structure),
}

impl Message {
    /// Name of the node that posted the message.  Application messages have
    /// no source.
    pub fn source(&self) -> Option<&str> {
        match self {
            Message::Eos { source }
            | Message::Error { source, .. }
            | Message::Warning { source, .. }
            | Message::StateChanged { source, .. }
            | Message::Element { source, .. } => Some(source),
            Message::Application(_) => None,
        }
    }

    pub fn is_eos(&self) -> bool {
        matches!(self, Message::Eos { .. })
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Message::Error { .. })
    }
}

// ---------------------------------------------------------------------------
// Bus
// ---------------------------------------------------------------------------

/// Posting side of a pipeline bus.  Cheap to clone; may be moved to any
/// thread.
#[derive(Debug, Clone)]
pub struct Bus {
    tx: Sender<Message>,
}

impl Bus {
    /// Post a message.  Blocks while the bus is full; returns `false` once
    /// the owning pipeline is gone.
    pub fn post(&self, message: Message) -> bool {
        self.tx.send(message).is_ok()
    }
}

// ---------------------------------------------------------------------------
// BusHub
// ---------------------------------------------------------------------------

pub(crate) type BusCallback = Box<dyn FnMut(&Message) + Send>;

/// Receiving side: the callback slot plus fan-out subscribers.
#[derive(Default)]
pub(crate) struct BusHub {
    callback: Mutex<Option<BusCallback>>,
    subscribers: Mutex<Vec<Sender<Message>>>,
}

impl BusHub {
    /// Replace the callback.  Waits for an in-flight invocation to finish,
    /// so the old callback is never running once this returns.
    pub(crate) fn set_callback(&self, callback: Option<BusCallback>) {
        *lock(&self.callback) = callback;
    }

    pub(crate) fn subscribe(&self, capacity: usize) -> Receiver<Message> {
        let (tx, rx) = crossbeam_channel::bounded(capacity.max(1));
        lock(&self.subscribers).push(tx);
        rx
    }

    fn dispatch(&self, message: &Message) {
        if let Some(callback) = lock(&self.callback).as_mut() {
            callback(message);
        }

        lock(&self.subscribers).retain(|tx| match tx.try_send(message.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                log::warn!("bus: subscriber queue full, dropping {message:?}");
                true
            }
            Err(TrySendError::Disconnected(_)) => false,
        });
    }
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

/// The bus channel and its running dispatch thread.
pub(crate) struct Dispatcher {
    bus: Bus,
    shutdown: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl Dispatcher {
    /// Create the bus channel and start the dispatch thread.
    ///
    /// When the thread cannot be started the failure is logged and the
    /// returned dispatcher is not running: its bus refuses every post.
    pub(crate) fn spawn(owner: &str, hub: Arc<BusHub>) -> Self {
        let (tx, rx) = crossbeam_channel::bounded::<Message>(BUS_CAPACITY);
        let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded::<()>(0);
        let owner_name = owner.to_owned();

        let spawned = thread::Builder::new()
            .name(format!("{owner}:bus"))
            .spawn(move || {
                log::debug!("bus: dispatch thread for {owner_name} started");
                loop {
                    crossbeam_channel::select! {
                        recv(rx) -> msg => match msg {
                            Ok(message) => hub.dispatch(&message),
                            Err(_) => break,
                        },
                        recv(shutdown_rx) -> _ => break,
                    }
                }
                // Deliver whatever was posted before shutdown.
                for message in rx.try_iter() {
                    hub.dispatch(&message);
                }
                log::debug!("bus: dispatch thread for {owner_name} stopped");
            });
        let handle = match spawned {
            Ok(handle) => Some(handle),
            Err(err) => {
                log::error!("bus: could not start dispatch thread for {owner}: {err}");
                None
            }
        };

        Self {
            bus: Bus { tx },
            shutdown: Some(shutdown_tx),
            handle,
        }
    }

    /// A dispatcher whose bus has no receiving end.
    #[cfg(test)]
    pub(crate) fn unstarted() -> Self {
        let (tx, _) = crossbeam_channel::bounded::<Message>(BUS_CAPACITY);
        Self {
            bus: Bus { tx },
            shutdown: None,
            handle: None,
        }
    }

    pub(crate) fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    pub(crate) fn bus(&self) -> Bus {
        self.bus.clone()
    }

    /// Stop the dispatch thread and wait for it to exit.
    pub(crate) fn shutdown(&mut self) {
        drop(self.shutdown.take());
        if let Some(handle) = self.handle.take() {
            if handle.thread().id() == thread::current().id() {
                return;
            }
            if handle.join().is_err() {
                log::error!("bus: dispatch thread panicked");
            }
        }
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn eos(source: &str) -> Message {
        Message::Eos {
            source: source.into(),
        }
    }

    #[test]
    fn callback_sees_messages_in_post_order() {
        let hub = Arc::new(BusHub::default());
        let (seen_tx, seen_rx) = crossbeam_channel::unbounded();
        hub.set_callback(Some(Box::new(move |m: &Message| {
            let _ = seen_tx.send(m.source().map(str::to_owned));
        })));

        let dispatcher = Dispatcher::spawn("test", Arc::clone(&hub));
        let bus = dispatcher.bus();
        for name in ["a", "b", "c"] {
            assert!(bus.post(eos(name)));
        }

        let got: Vec<_> = (0..3)
            .map(|_| seen_rx.recv_timeout(Duration::from_secs(2)).unwrap())
            .collect();
        assert_eq!(got, vec![Some("a".into()), Some("b".into()), Some("c".into())]);
    }

    #[test]
    fn subscribers_receive_copies() {
        let hub = Arc::new(BusHub::default());
        let first = hub.subscribe(8);
        let second = hub.subscribe(8);
        let dispatcher = Dispatcher::spawn("test", Arc::clone(&hub));

        dispatcher.bus().post(eos("sink"));

        let timeout = Duration::from_secs(2);
        assert!(first.recv_timeout(timeout).unwrap().is_eos());
        assert!(second.recv_timeout(timeout).unwrap().is_eos());
    }

    #[test]
    fn dropped_subscriber_is_pruned() {
        let hub = Arc::new(BusHub::default());
        drop(hub.subscribe(1));
        hub.dispatch(&eos("x"));
        assert!(lock(&hub.subscribers).is_empty());
    }

    #[test]
    fn post_after_shutdown_fails() {
        let hub = Arc::new(BusHub::default());
        let mut dispatcher = Dispatcher::spawn("test", hub);
        let bus = dispatcher.bus();
        dispatcher.shutdown();
        drop(dispatcher);
        assert!(!bus.post(eos("late")));
    }

    #[test]
    fn unstarted_dispatcher_refuses_posts() {
        let dispatcher = Dispatcher::unstarted();
        assert!(!dispatcher.is_running());
        assert!(!dispatcher.bus().post(eos("x")));
    }

    #[test]
    fn second_callback_replaces_the_first() {
        let hub = Arc::new(BusHub::default());
        let (tx, rx) = crossbeam_channel::unbounded();
        let first = tx.clone();
        hub.set_callback(Some(Box::new(move |_: &Message| {
            let _ = first.send("first");
        })));
        hub.set_callback(Some(Box::new(move |_: &Message| {
            let _ = tx.send("second");
        })));

        let dispatcher = Dispatcher::spawn("test", Arc::clone(&hub));
        assert!(dispatcher.bus().post(eos("a")));
        assert!(dispatcher.bus().post(eos("b")));

        let timeout = Duration::from_secs(2);
        assert_eq!(rx.recv_timeout(timeout), Ok("second"));
        assert_eq!(rx.recv_timeout(timeout), Ok("second"));
        drop(dispatcher);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn bus_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Bus>();
        assert_send_sync::<Message>();
    }
}
