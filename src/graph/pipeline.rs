//! Top-level container node with its own message bus.

use std::ops::Deref;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crossbeam_channel::Receiver;

use super::bus::{Bus, BusHub, Dispatcher, Message};
use super::element::{Element, ElementInner};
use super::state::State;

/// A bin that owns a bus and one dispatch thread.
///
/// `Pipeline` dereferences to [`Element`], so lifecycle, event and naming
/// operations are the same as on any node.  Dropping a pipeline drives it
/// to `Null`, then stops and joins the dispatch thread.
pub struct Pipeline {
    element: Element,
    hub: Arc<BusHub>,
    dispatcher: Dispatcher,
}

impl Pipeline {
    /// Create an empty pipeline with a generated name.
    pub fn new() -> Self {
        static COUNTER: AtomicUsize = AtomicUsize::new(0);
        let n = COUNTER.fetch_add(1, Ordering::Relaxed);
        Self::with_name(&format!("pipeline{n}"))
    }

    /// Create an empty pipeline.
    ///
    /// If its dispatch thread cannot be started the pipeline is an invalid
    /// handle that refuses every operation.
    pub fn with_name(name: &str) -> Self {
        let hub = Arc::new(BusHub::default());
        let dispatcher = Dispatcher::spawn(name, Arc::clone(&hub));
        Self::assemble(name, hub, dispatcher)
    }

    fn assemble(name: &str, hub: Arc<BusHub>, dispatcher: Dispatcher) -> Self {
        let element = if dispatcher.is_running() {
            log::debug!("pipeline: created {name}");
            Element::from_inner(ElementInner::new_bin(name.to_owned(), dispatcher.bus()))
        } else {
            log::error!("pipeline: {name} has no bus thread");
            Element::invalid()
        };
        Self {
            element,
            hub,
            dispatcher,
        }
    }

    /// Add a node.  Fails for invalid handles, duplicate names, and nodes
    /// that already belong to a pipeline.
    pub fn add(&self, element: &Element) -> bool {
        match &self.element.inner {
            Some(inner) => inner.add_child(element),
            None => false,
        }
    }

    /// The child named `name`, or an invalid handle.
    pub fn by_name(&self, name: &str) -> Element {
        self.element
            .inner
            .as_ref()
            .map_or_else(Element::invalid, |inner| inner.child_by_name(name))
    }

    pub fn children(&self) -> Vec<Element> {
        self.element
            .inner
            .as_ref()
            .map_or_else(Vec::new, |inner| inner.children())
    }

    /// Install the bus callback, replacing any previous one.
    ///
    /// The callback runs on the dispatch thread.  It must not block on
    /// operations that themselves wait for bus messages.
    pub fn set_bus_callback<F>(&self, callback: F)
    where
        F: FnMut(&Message) + Send + 'static,
    {
        self.hub.set_callback(Some(Box::new(callback)));
    }

    /// Remove the bus callback.  Returns once no invocation is running.
    pub fn clear_bus_callback(&self) {
        self.hub.set_callback(None);
    }

    /// Receive a copy of every bus message.  A full queue drops messages
    /// for this subscriber only; dropping the receiver unsubscribes.
    pub fn subscribe(&self, capacity: usize) -> Receiver<Message> {
        self.hub.subscribe(capacity)
    }

    /// Posting handle for this pipeline's bus.
    pub fn bus(&self) -> Bus {
        self.dispatcher.bus()
    }

    /// Post an application message.
    pub fn post(&self, message: Message) -> bool {
        self.dispatcher.bus().post(message)
    }
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl Deref for Pipeline {
    type Target = Element;

    fn deref(&self) -> &Element {
        &self.element
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("name", &self.element.name())
            .field("children", &self.children().len())
            .finish()
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        if self.element.state() != State::Null && !self.element.set_state(State::Null, false) {
            log::error!(
                "pipeline: {} could not be shut down cleanly",
                self.element.name()
            );
        }
        self.dispatcher.shutdown();
        log::debug!("pipeline: {} released", self.element.name());
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Event, Structure};
    use std::time::Duration;

    #[test]
    fn add_rejects_duplicates_and_invalid_handles() {
        let pipeline = Pipeline::new();
        let sink = Element::make_named("fakesink", "sink");
        assert!(pipeline.add(&sink));
        assert!(!pipeline.add(&sink));
        assert!(!pipeline.add(&Element::make_named("fakesink", "sink")));
        assert!(!pipeline.add(&Element::invalid()));
        assert_eq!(pipeline.children().len(), 1);
    }

    #[test]
    fn element_belongs_to_one_pipeline() {
        let first = Pipeline::new();
        let second = Pipeline::new();
        let sink = Element::make("fakesink");
        assert!(first.add(&sink));
        assert!(!second.add(&sink));
    }

    #[test]
    fn by_name_finds_children() {
        let pipeline = Pipeline::new();
        let sink = Element::make_named("fakesink", "out");
        pipeline.add(&sink);
        assert!(pipeline.by_name("out").ptr_eq(&sink));
        assert!(!pipeline.by_name("missing").is_valid());
    }

    #[test]
    fn application_messages_reach_the_callback() {
        let pipeline = Pipeline::new();
        let (tx, rx) = crossbeam_channel::unbounded();
        pipeline.set_bus_callback(move |m| {
            if let Message::Application(s) = m {
                let _ = tx.send(s.name().to_owned());
            }
        });
        assert!(pipeline.post(Message::Application(Structure::new("hello"))));
        assert_eq!(
            rx.recv_timeout(Duration::from_secs(2)).as_deref(),
            Ok("hello")
        );
    }

    #[test]
    fn state_changes_are_posted() {
        let pipeline = Pipeline::new();
        pipeline.add(&Element::make("fakesink"));
        let messages = pipeline.subscribe(32);
        assert!(pipeline.set_state(State::Ready, false));

        let name = pipeline.name().to_owned();
        let mut saw_pipeline_change = false;
        while let Ok(m) = messages.recv_timeout(Duration::from_secs(2)) {
            if let Message::StateChanged { source, old, new } = m {
                if source == name {
                    assert_eq!((old, new), (State::Null, State::Ready));
                    saw_pipeline_change = true;
                    break;
                }
            }
        }
        assert!(saw_pipeline_change);
    }

    #[test]
    fn eos_to_pipeline_without_sources_is_refused() {
        let pipeline = Pipeline::new();
        pipeline.add(&Element::make("fakesink"));
        assert!(!pipeline.send_event(Event::Eos));
    }

    #[test]
    fn pipeline_without_bus_thread_is_invalid() {
        let pipeline = Pipeline::assemble(
            "orphan",
            Arc::new(BusHub::default()),
            Dispatcher::unstarted(),
        );
        assert!(!pipeline.is_valid());
        assert!(!pipeline.add(&Element::make("fakesink")));
        assert!(!pipeline.set_state(State::Ready, false));
        assert!(!pipeline.post(Message::Application(Structure::new("hello"))));
    }

    #[test]
    fn drop_returns_children_to_null() {
        let sink = Element::make("fakesink");
        {
            let pipeline = Pipeline::new();
            pipeline.add(&sink);
            assert!(pipeline.set_state(State::Playing, false));
            assert_eq!(sink.state(), State::Playing);
        }
        assert_eq!(sink.state(), State::Null);
    }
}
