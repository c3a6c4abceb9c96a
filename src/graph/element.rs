//! Processing nodes.
//!
//! An [`Element`] is a move-only handle to a node.  Leaf nodes wrap an
//! [`ElementImpl`] (a source, filter, or sink); container nodes ("bins")
//! hold child elements and drive their lifecycle as a unit.
//!
//! # Streaming model
//!
//! ```text
//!  source thread:  create() ──push──▶ filter.chain() ──push──▶ sink.chain()
//!                      ▲
//!                      └── queued events (EOS …) are pushed between buffers
//! ```
//!
//! Every source node owns one streaming thread while `Playing`.  Downstream
//! nodes run on the thread of the source that feeds them.
//!
//! # State changes
//!
//! Transitions run on a short-lived worker thread per request and walk every
//! intermediate state.  A synchronous request waits for the worker up to
//! [`STATE_CHANGE_TIMEOUT`]; a node that hangs leaves the caller with
//! `false` instead of blocking it.  A bin moves its children sink-first on
//! the way up and source-first on the way down, so data never reaches a node
//! that is not ready for it.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::RecvTimeoutError;
use thiserror::Error;

use super::buffer::{Buffer, Caps, Event, FlowError, FlowResult};
use super::bus::{Bus, Message};
use super::pad::{Pad, PadDirection, PadInner};
use super::registry;
use super::state::{State, StateChangeError, StateTransition, STATE_CHANGE_TIMEOUT};
use super::value::{FromValue, Structure, Value};
use super::{error_code, lock};

/// How long an asynchronous request waits for an immediate refusal before
/// reporting it as accepted.
const ASYNC_ACCEPT_WINDOW: Duration = Duration::from_millis(200);

// ---------------------------------------------------------------------------
// PropertyError
// ---------------------------------------------------------------------------

/// Errors returned by property access.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum PropertyError {
    #[error("invalid element handle")]
    InvalidHandle,

    #[error("no property named '{0}'")]
    Unknown(String),

    #[error("property '{property}' expects {expected}, got {got}")]
    TypeMismatch {
        property: String,
        expected: &'static str,
        got: String,
    },

    #[error("property '{property}' cannot be changed in state {state}")]
    WrongState { property: String, state: State },

    #[error("property '{0}' is read-only")]
    ReadOnly(String),

    #[error("property '{0}' is not set")]
    NotSet(String),
}

impl PropertyError {
    pub fn type_mismatch(property: &str, expected: &'static str, value: &Value) -> Self {
        PropertyError::TypeMismatch {
            property: property.to_owned(),
            expected,
            got: format!("{value:?}"),
        }
    }
}

// ---------------------------------------------------------------------------
// ElementImpl
// ---------------------------------------------------------------------------

/// Behaviour of a leaf node.
///
/// Which pads a node exposes follows from [`src_caps`](Self::src_caps) and
/// [`sink_caps`](Self::sink_caps): a node with only a source pad is a
/// *source* and gets a streaming thread that repeatedly calls
/// [`create`](Self::create).
pub trait ElementImpl: Send + 'static {
    fn src_caps(&self) -> Option<Caps> {
        None
    }

    fn sink_caps(&self) -> Option<Caps> {
        None
    }

    /// Set a property.  `state` is the node's current lifecycle state.
    fn set_property(&mut self, name: &str, value: &Value, state: State)
        -> Result<(), PropertyError>;

    fn property(&self, name: &str) -> Result<Value, PropertyError>;

    /// Perform one adjacent lifecycle step.
    fn change_state(
        &mut self,
        _ctx: &ElementContext<'_>,
        _transition: StateTransition,
    ) -> Result<(), StateChangeError> {
        Ok(())
    }

    /// Produce the next buffer (sources only).
    ///
    /// `Ok(None)` means nothing is available yet; `Err(FlowError::Eos)` ends
    /// the stream.
    fn create(&mut self, _ctx: &ElementContext<'_>) -> FlowResult<Option<Buffer>> {
        Err(FlowError::NotSupported)
    }

    /// Consume a buffer arriving at the sink pad.
    fn chain(&mut self, ctx: &ElementContext<'_>, buffer: Buffer) -> FlowResult {
        ctx.push(buffer)
    }

    /// Handle an event arriving at the sink pad.
    fn event(&mut self, ctx: &ElementContext<'_>, event: Event) -> bool {
        ctx.push_event(event)
    }
}

// ---------------------------------------------------------------------------
// ElementContext
// ---------------------------------------------------------------------------

/// What a node may do to its surroundings while handling a call.
pub struct ElementContext<'a> {
    element: &'a Arc<ElementInner>,
}

impl<'a> ElementContext<'a> {
    fn new(element: &'a Arc<ElementInner>) -> Self {
        Self { element }
    }

    pub fn name(&self) -> &str {
        &self.element.name
    }

    /// Push a buffer out of the source pad.
    pub fn push(&self, buffer: Buffer) -> FlowResult {
        match &self.element.src {
            Some(pad) => pad.push(buffer),
            None => Err(FlowError::NotLinked),
        }
    }

    /// Push an event out of the source pad.
    pub fn push_event(&self, event: Event) -> bool {
        match &self.element.src {
            Some(pad) => pad.push_event(event),
            None => false,
        }
    }

    /// Post to the owning pipeline's bus.  No-op outside a pipeline.
    pub fn post(&self, message: Message) -> bool {
        self.element.post(message)
    }

    pub fn post_error(&self, code: i32, description: impl Into<String>) {
        self.element.post(Message::Error {
            source: self.element.name.clone(),
            code,
            description: description.into(),
        });
    }

    pub fn post_warning(&self, description: impl Into<String>) {
        self.element.post(Message::Warning {
            source: self.element.name.clone(),
            description: description.into(),
        });
    }

    pub fn post_eos(&self) {
        self.element.post(Message::Eos {
            source: self.element.name.clone(),
        });
    }

    pub fn post_element(&self, structure: Structure) {
        self.element.post(Message::Element {
            source: self.element.name.clone(),
            structure,
        });
    }

    /// `true` while the node is shutting down; long waits should give up.
    pub fn is_flushing(&self) -> bool {
        self.element.flushing.load(Ordering::Acquire)
    }
}

// ---------------------------------------------------------------------------
// StateCell
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default)]
struct StateSnapshot {
    current: State,
    pending: Option<State>,
}

#[derive(Default)]
struct StateCell {
    snapshot: Mutex<StateSnapshot>,
    changed: Condvar,
}

impl StateCell {
    fn current(&self) -> State {
        lock(&self.snapshot).current
    }

    fn begin(&self, target: State) {
        lock(&self.snapshot).pending = Some(target);
    }

    fn commit(&self, state: State) {
        lock(&self.snapshot).current = state;
        self.changed.notify_all();
    }

    fn finish(&self) {
        lock(&self.snapshot).pending = None;
        self.changed.notify_all();
    }

    /// Wait (bounded) until no transition is in progress.
    fn settled(&self, bound: Duration) -> StateSnapshot {
        let guard = lock(&self.snapshot);
        let (guard, _) = self
            .changed
            .wait_timeout_while(guard, bound, |s| s.pending.is_some())
            .unwrap_or_else(PoisonError::into_inner);
        *guard
    }
}

// ---------------------------------------------------------------------------
// StreamingTask
// ---------------------------------------------------------------------------

struct StreamingTask {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl StreamingTask {
    fn stop(self) {
        self.stop.store(true, Ordering::Release);
        if self.handle.thread().id() == thread::current().id() {
            return;
        }
        if self.handle.join().is_err() {
            log::error!("element: streaming thread panicked");
        }
    }
}

fn run_source(element: std::sync::Weak<ElementInner>, stop: Arc<AtomicBool>) {
    loop {
        if stop.load(Ordering::Acquire) {
            break;
        }
        let Some(element) = element.upgrade() else {
            break;
        };
        if !element.source_iteration() {
            break;
        }
    }
}

// ---------------------------------------------------------------------------
// ElementInner
// ---------------------------------------------------------------------------

pub(crate) enum ElementKind {
    Leaf(Mutex<Box<dyn ElementImpl>>),
    Bin(Mutex<Vec<Element>>),
}

pub(crate) struct ElementInner {
    name: String,
    factory: String,
    kind: ElementKind,
    src: Option<Arc<PadInner>>,
    sink: Option<Arc<PadInner>>,
    state: StateCell,
    transition: Mutex<()>,
    bus: Mutex<Option<Bus>>,
    in_bin: AtomicBool,
    flushing: AtomicBool,
    task: Mutex<Option<StreamingTask>>,
    pending_events: Mutex<VecDeque<Event>>,
}

impl ElementInner {
    fn new_leaf(factory: &str, name: String, imp: Box<dyn ElementImpl>) -> Arc<Self> {
        let src_caps = imp.src_caps();
        let sink_caps = imp.sink_caps();
        Arc::new_cyclic(|weak| {
            let mut inner = Self::bare(factory, name, ElementKind::Leaf(Mutex::new(imp)));
            inner.src = src_caps
                .map(|caps| PadInner::new("src", PadDirection::Src, caps, weak.clone()));
            inner.sink = sink_caps
                .map(|caps| PadInner::new("sink", PadDirection::Sink, caps, weak.clone()));
            inner
        })
    }

    pub(crate) fn new_bin(name: String, bus: Bus) -> Arc<Self> {
        let inner = Self::bare("pipeline", name, ElementKind::Bin(Mutex::new(Vec::new())));
        *lock(&inner.bus) = Some(bus);
        Arc::new(inner)
    }

    fn bare(factory: &str, name: String, kind: ElementKind) -> Self {
        ElementInner {
            name,
            factory: factory.to_owned(),
            kind,
            src: None,
            sink: None,
            state: StateCell::default(),
            transition: Mutex::new(()),
            bus: Mutex::new(None),
            in_bin: AtomicBool::new(false),
            flushing: AtomicBool::new(false),
            task: Mutex::new(None),
            pending_events: Mutex::new(VecDeque::new()),
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    fn is_source(&self) -> bool {
        matches!(self.kind, ElementKind::Leaf(_)) && self.src.is_some() && self.sink.is_none()
    }

    fn post(&self, message: Message) -> bool {
        let bus = lock(&self.bus).clone();
        bus.is_some_and(|bus| bus.post(message))
    }

    /// Number of links between this node and the most downstream node.
    fn downstream_depth(&self) -> usize {
        let mut depth = 0;
        let mut pad = self.src.clone();
        while let Some(src) = pad {
            let Some(next) = src.peer().and_then(|peer| peer.parent()) else {
                break;
            };
            depth += 1;
            if depth > 64 {
                break;
            }
            pad = next.src.clone();
        }
        depth
    }

    // ---- data flow ---------------------------------------------------------

    pub(crate) fn chain(self: &Arc<Self>, buffer: Buffer) -> FlowResult {
        if self.flushing.load(Ordering::Acquire) || self.state.current() < State::Paused {
            return Err(FlowError::Flushing);
        }
        match &self.kind {
            ElementKind::Leaf(imp) => lock(imp).chain(&ElementContext::new(self), buffer),
            ElementKind::Bin(_) => Err(FlowError::NotSupported),
        }
    }

    pub(crate) fn handle_event(self: &Arc<Self>, event: Event) -> bool {
        if self.flushing.load(Ordering::Acquire) || self.state.current() < State::Paused {
            return false;
        }
        match &self.kind {
            ElementKind::Leaf(imp) => lock(imp).event(&ElementContext::new(self), event),
            ElementKind::Bin(_) => false,
        }
    }

    fn send_event(self: &Arc<Self>, event: Event) -> bool {
        match &self.kind {
            ElementKind::Bin(children) => {
                let sources: Vec<Arc<ElementInner>> = lock(children)
                    .iter()
                    .filter_map(|c| c.inner.clone())
                    .filter(|c| c.is_source())
                    .collect();
                if sources.is_empty() {
                    return false;
                }
                sources
                    .iter()
                    .fold(true, |ok, source| source.send_event(event.clone()) && ok)
            }
            ElementKind::Leaf(_) if self.is_source() => {
                if self.has_running_task() {
                    lock(&self.pending_events).push_back(event);
                    true
                } else {
                    false
                }
            }
            ElementKind::Leaf(_) => self.handle_event(event),
        }
    }

    /// One round of the source loop.  Returns `false` when the loop is done.
    fn source_iteration(self: &Arc<Self>) -> bool {
        let ctx = ElementContext::new(self);

        let queued = lock(&self.pending_events).pop_front();
        if let Some(event) = queued {
            let is_eos = matches!(event, Event::Eos);
            let name = event.name().to_owned();
            if !ctx.push_event(event) {
                log::debug!("element: {}: downstream did not handle {name}", self.name);
            }
            return !is_eos;
        }

        let ElementKind::Leaf(imp) = &self.kind else {
            return false;
        };
        let produced = lock(imp).create(&ctx);
        let outcome = match produced {
            Ok(Some(buffer)) => ctx.push(buffer),
            Ok(None) => Ok(()),
            Err(err) => Err(err),
        };

        match outcome {
            Ok(()) => true,
            Err(FlowError::Eos) => {
                log::debug!("element: {}: end of stream", self.name);
                ctx.push_event(Event::Eos);
                false
            }
            Err(FlowError::Flushing) => false,
            Err(err) => {
                log::warn!("element: {}: streaming stopped: {err}", self.name);
                ctx.post_error(
                    error_code::STREAM,
                    format!("internal data stream error, reason: {err}"),
                );
                false
            }
        }
    }

    // ---- streaming thread --------------------------------------------------

    fn has_running_task(&self) -> bool {
        lock(&self.task)
            .as_ref()
            .is_some_and(|task| !task.handle.is_finished())
    }

    fn start_task(self: &Arc<Self>) -> Result<(), StateChangeError> {
        let mut slot = lock(&self.task);
        if slot.is_some() {
            return Ok(());
        }
        lock(&self.pending_events).clear();

        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);
        let weak = Arc::downgrade(self);
        let handle = thread::Builder::new()
            .name(format!("{}:src", self.name))
            .spawn(move || run_source(weak, flag))
            .map_err(|e| StateChangeError::Thread(e.to_string()))?;

        *slot = Some(StreamingTask { stop, handle });
        Ok(())
    }

    fn stop_task(&self) {
        let task = lock(&self.task).take();
        if let Some(task) = task {
            task.stop();
        }
    }

    // ---- lifecycle ---------------------------------------------------------

    pub(crate) fn change_state(self: &Arc<Self>, target: State) -> Result<(), StateChangeError> {
        let _serial = lock(&self.transition);
        let mut current = self.state.current();
        if current == target {
            return Ok(());
        }

        self.state.begin(target);
        let mut result = Ok(());
        while current != target {
            let next = current.step_toward(target);
            let Some(transition) = StateTransition::between(current, next) else {
                break;
            };
            if let Err(err) = self.perform(transition) {
                log::warn!("element: {} refused {transition}: {err}", self.name);
                if matches!(self.kind, ElementKind::Leaf(_)) {
                    self.post(Message::Error {
                        source: self.name.clone(),
                        code: err.code(),
                        description: err.to_string(),
                    });
                }
                result = Err(err);
                break;
            }
            self.state.commit(next);
            log::trace!("element: {} {transition}", self.name);
            self.post(Message::StateChanged {
                source: self.name.clone(),
                old: current,
                new: next,
            });
            current = next;
        }
        self.state.finish();
        result
    }

    fn perform(self: &Arc<Self>, transition: StateTransition) -> Result<(), StateChangeError> {
        match &self.kind {
            ElementKind::Leaf(imp) => {
                match transition {
                    StateTransition::PlayingToPaused => {
                        self.flushing.store(true, Ordering::Release);
                        self.stop_task();
                    }
                    StateTransition::PausedToPlaying => {
                        self.flushing.store(false, Ordering::Release);
                    }
                    _ => {}
                }
                lock(imp).change_state(&ElementContext::new(self), transition)?;
                if transition == StateTransition::PausedToPlaying && self.is_source() {
                    self.start_task()?;
                }
                Ok(())
            }
            ElementKind::Bin(children) => {
                let mut ordered: Vec<Arc<ElementInner>> = lock(children)
                    .iter()
                    .filter_map(|c| c.inner.clone())
                    .collect();
                ordered.sort_by_key(|c| c.downstream_depth());
                if !transition.is_upward() {
                    ordered.reverse();
                }
                if transition == StateTransition::PlayingToPaused {
                    for child in &ordered {
                        child.flushing.store(true, Ordering::Release);
                    }
                }

                let target = transition.to_state();
                for (done, child) in ordered.iter().enumerate() {
                    if let Err(err) = child.change_state(target) {
                        // Put already-moved children back where the bin is.
                        for moved in &ordered[..done] {
                            let _ = moved.change_state(transition.from_state());
                        }
                        return Err(err);
                    }
                }
                Ok(())
            }
        }
    }

    // ---- bin membership ----------------------------------------------------

    pub(crate) fn add_child(&self, child: &Element) -> bool {
        let ElementKind::Bin(children) = &self.kind else {
            return false;
        };
        let Some(inner) = &child.inner else {
            return false;
        };
        let mut children = lock(children);
        if children.iter().any(|c| c.name() == inner.name) {
            log::warn!("pipeline: {} already has a node named {}", self.name, inner.name);
            return false;
        }
        if inner.in_bin.swap(true, Ordering::AcqRel) {
            log::warn!("pipeline: {} already belongs to a pipeline", inner.name);
            return false;
        }
        *lock(&inner.bus) = lock(&self.bus).clone();
        children.push(child.share());
        true
    }

    pub(crate) fn child_by_name(&self, name: &str) -> Element {
        match &self.kind {
            ElementKind::Bin(children) => lock(children)
                .iter()
                .find(|c| c.name() == name)
                .map(Element::share)
                .unwrap_or_default(),
            ElementKind::Leaf(_) => Element::invalid(),
        }
    }

    pub(crate) fn children(&self) -> Vec<Element> {
        match &self.kind {
            ElementKind::Bin(children) => lock(children).iter().map(Element::share).collect(),
            ElementKind::Leaf(_) => Vec::new(),
        }
    }
}

impl Drop for ElementInner {
    fn drop(&mut self) {
        let task = self
            .task
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            task.stop();
        }
    }
}

// ---------------------------------------------------------------------------
// Element
// ---------------------------------------------------------------------------

/// Handle to a processing node.
///
/// Handles are move-only; [`Element::share`] creates an additional
/// reference to the same node.  An invalid handle (unknown factory, failed
/// lookup) is a legal value that refuses every operation.
pub struct Element {
    pub(crate) inner: Option<Arc<ElementInner>>,
}

impl Element {
    /// Create a node from a registered factory with an auto-generated name.
    ///
    /// Returns an invalid handle for an unknown factory.
    pub fn make(factory: &str) -> Element {
        Self::make_named(factory, &registry::unique_name(factory))
    }

    /// Create a node from a registered factory with an explicit name.
    pub fn make_named(factory: &str, name: &str) -> Element {
        match registry::construct(factory) {
            Some(imp) => Element {
                inner: Some(ElementInner::new_leaf(factory, name.to_owned(), imp)),
            },
            None => {
                log::warn!("element: no factory named '{factory}'");
                Element::invalid()
            }
        }
    }

    /// Wrap a caller-supplied implementation.
    pub fn from_impl(factory: &str, name: &str, imp: impl ElementImpl) -> Element {
        Element {
            inner: Some(ElementInner::new_leaf(factory, name.to_owned(), Box::new(imp))),
        }
    }

    pub(crate) fn from_inner(inner: Arc<ElementInner>) -> Element {
        Element { inner: Some(inner) }
    }

    pub fn invalid() -> Element {
        Element { inner: None }
    }

    pub fn is_valid(&self) -> bool {
        self.inner.is_some()
    }

    /// A second handle to the same node.
    pub fn share(&self) -> Element {
        Element {
            inner: self.inner.clone(),
        }
    }

    pub fn ptr_eq(&self, other: &Element) -> bool {
        match (&self.inner, &other.inner) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Node name; empty for an invalid handle.
    pub fn name(&self) -> &str {
        self.inner.as_ref().map_or("", |e| e.name.as_str())
    }

    pub fn factory_name(&self) -> &str {
        self.inner.as_ref().map_or("", |e| e.factory.as_str())
    }

    pub fn src_pad(&self) -> Pad {
        Pad::from_inner(self.inner.as_ref().and_then(|e| e.src.clone()))
    }

    pub fn sink_pad(&self) -> Pad {
        Pad::from_inner(self.inner.as_ref().and_then(|e| e.sink.clone()))
    }

    /// Link this node's source pad to `downstream`'s sink pad.
    pub fn link(&self, downstream: &Element) -> bool {
        self.src_pad().link(&downstream.sink_pad())
    }

    // ---- properties --------------------------------------------------------

    /// # Errors
    ///
    /// Unknown name, wrong value type, a value the node rejects in its
    /// current state, or an invalid handle.
    pub fn set_property(&self, name: &str, value: impl Into<Value>) -> Result<(), PropertyError> {
        let inner = self.inner.as_ref().ok_or(PropertyError::InvalidHandle)?;
        if name == "name" {
            return Err(PropertyError::ReadOnly(name.to_owned()));
        }
        let value = value.into();
        match &inner.kind {
            ElementKind::Leaf(imp) => {
                let state = inner.state.current();
                lock(imp).set_property(name, &value, state)
            }
            ElementKind::Bin(_) => Err(PropertyError::Unknown(name.to_owned())),
        }
    }

    /// Read a property and convert it to `T`.
    pub fn property<T: FromValue>(&self, name: &str) -> Result<T, PropertyError> {
        let inner = self.inner.as_ref().ok_or(PropertyError::InvalidHandle)?;
        let value = match (&inner.kind, name) {
            (_, "name") => Value::Str(inner.name.clone()),
            (ElementKind::Leaf(imp), _) => lock(imp).property(name)?,
            (ElementKind::Bin(_), _) => return Err(PropertyError::Unknown(name.to_owned())),
        };
        let got = format!("{value:?}");
        T::from_value(value).ok_or_else(|| PropertyError::TypeMismatch {
            property: name.to_owned(),
            expected: std::any::type_name::<T>(),
            got,
        })
    }

    // ---- lifecycle ---------------------------------------------------------

    /// Move the node (and, for a bin, all children) to `target`.
    ///
    /// The transition runs on a worker thread.  With `async_ == false` the
    /// call waits up to [`STATE_CHANGE_TIMEOUT`] and reports whether
    /// `target` was confirmed reached.  With `async_ == true` it reports
    /// whether the request was accepted: a refusal that arrives within a
    /// short window yields `false`, a transition still running after it
    /// yields `true`.  Requesting the current state succeeds without side
    /// effects.
    pub fn set_state(&self, target: State, async_: bool) -> bool {
        let Some(inner) = &self.inner else {
            return false;
        };
        let (done_tx, done_rx) = crossbeam_channel::bounded(1);
        let worker = Arc::clone(inner);
        let spawned = thread::Builder::new()
            .name(format!("{}:state", inner.name))
            .spawn(move || {
                let _ = done_tx.send(worker.change_state(target));
            });
        if let Err(err) = spawned {
            log::error!("element: {} could not start a transition: {err}", inner.name);
            return false;
        }

        let bound = if async_ {
            ASYNC_ACCEPT_WINDOW
        } else {
            STATE_CHANGE_TIMEOUT
        };
        match done_rx.recv_timeout(bound) {
            Ok(Ok(())) => async_ || inner.state.current() == target,
            Ok(Err(err)) => {
                log::warn!("element: {} could not reach {target}: {err}", inner.name);
                false
            }
            Err(RecvTimeoutError::Timeout) if async_ => true,
            Err(RecvTimeoutError::Timeout) => {
                log::warn!(
                    "element: {} did not reach {target} within {bound:?}",
                    inner.name
                );
                false
            }
            Err(RecvTimeoutError::Disconnected) => {
                log::error!("element: {} transition worker panicked", inner.name);
                false
            }
        }
    }

    /// Current state, waiting up to the state-change bound for a transition
    /// in progress on another thread.
    pub fn state(&self) -> State {
        self.inner
            .as_ref()
            .map_or(State::Null, |e| e.state.settled(STATE_CHANGE_TIMEOUT).current)
    }

    /// State being moved to, if a transition is still in progress after the
    /// bounded wait.
    pub fn pending_state(&self) -> Option<State> {
        self.inner
            .as_ref()
            .and_then(|e| e.state.settled(STATE_CHANGE_TIMEOUT).pending)
    }

    pub fn is_in_state(&self, state: State) -> bool {
        self.is_valid() && self.state() == state
    }

    // ---- events ------------------------------------------------------------

    /// Inject an event.
    ///
    /// A running source queues it for its streaming thread (returns `true`);
    /// a source that is not streaming refuses it.  Other nodes handle it as
    /// if it arrived at their sink pad.  A bin forwards it to every source.
    pub fn send_event(&self, event: Event) -> bool {
        self.inner.as_ref().is_some_and(|e| e.send_event(event))
    }
}

impl Default for Element {
    fn default() -> Self {
        Self::invalid()
    }
}

impl fmt::Debug for Element {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.inner {
            Some(e) => f
                .debug_struct("Element")
                .field("name", &e.name)
                .field("factory", &e.factory)
                .field("state", &e.state.current())
                .finish(),
            None => f.write_str("Element(invalid)"),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Pipeline, ProbeInfo, ProbeReturn};
    use std::time::Instant;

    /// A sink that records what reaches it.
    struct Recorder {
        log: Arc<Mutex<Vec<String>>>,
    }

    impl ElementImpl for Recorder {
        fn sink_caps(&self) -> Option<Caps> {
            Some(Caps::Any)
        }

        fn set_property(&mut self, name: &str, _: &Value, _: State) -> Result<(), PropertyError> {
            Err(PropertyError::Unknown(name.into()))
        }

        fn property(&self, name: &str) -> Result<Value, PropertyError> {
            Err(PropertyError::Unknown(name.into()))
        }

        fn change_state(
            &mut self,
            _: &ElementContext<'_>,
            transition: StateTransition,
        ) -> Result<(), StateChangeError> {
            lock(&self.log).push(format!("state {transition}"));
            Ok(())
        }

        fn chain(&mut self, _: &ElementContext<'_>, buffer: Buffer) -> FlowResult {
            lock(&self.log).push(format!("buffer {}", buffer.size()));
            Ok(())
        }

        fn event(&mut self, ctx: &ElementContext<'_>, event: Event) -> bool {
            lock(&self.log).push(format!("event {}", event.name()));
            if event == Event::Eos {
                ctx.post_eos();
            }
            true
        }
    }

    fn recorder(name: &str) -> (Element, Arc<Mutex<Vec<String>>>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let element = Element::from_impl(
            "recorder",
            name,
            Recorder {
                log: Arc::clone(&log),
            },
        );
        (element, log)
    }

    fn wait_until(bound: Duration, mut done: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + bound;
        while Instant::now() < deadline {
            if done() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        done()
    }

    #[test]
    fn unknown_factory_yields_invalid_handle() {
        let element = Element::make("no-such-node");
        assert!(!element.is_valid());
        assert!(!element.set_state(State::Playing, false));
        assert!(!element.send_event(Event::Eos));
        assert_eq!(
            element.set_property("x", 1_i64),
            Err(PropertyError::InvalidHandle)
        );
    }

    #[test]
    fn share_refers_to_the_same_node() {
        let element = Element::make("fakesink");
        let other = element.share();
        assert!(element.ptr_eq(&other));
        assert_eq!(element.name(), other.name());
    }

    #[test]
    fn generated_names_are_distinct() {
        let a = Element::make("fakesink");
        let b = Element::make("fakesink");
        assert_ne!(a.name(), b.name());
        assert!(a.name().starts_with("fakesink"));
    }

    #[test]
    fn name_property_is_read_only() {
        let element = Element::make_named("fakesink", "out");
        assert_eq!(element.property::<String>("name").as_deref(), Ok("out"));
        assert!(matches!(
            element.set_property("name", "other"),
            Err(PropertyError::ReadOnly(_))
        ));
    }

    #[test]
    fn property_type_mismatch_is_reported() {
        let element = Element::make("audiotestsrc");
        assert!(matches!(
            element.set_property("freq", "loud"),
            Err(PropertyError::TypeMismatch { .. })
        ));
        assert!(matches!(
            element.set_property("bogus", 1_i64),
            Err(PropertyError::Unknown(_))
        ));
    }

    #[test]
    fn state_steps_through_intermediates() {
        let (element, log) = recorder("rec");
        assert!(element.set_state(State::Playing, false));
        assert_eq!(element.state(), State::Playing);
        assert!(element.set_state(State::Null, false));
        assert_eq!(
            *lock(&log),
            vec![
                "state NULL -> READY",
                "state READY -> PAUSED",
                "state PAUSED -> PLAYING",
                "state PLAYING -> PAUSED",
                "state PAUSED -> READY",
                "state READY -> NULL",
            ]
        );
    }

    #[test]
    fn requesting_current_state_is_a_no_op() {
        let (element, log) = recorder("rec");
        assert!(element.set_state(State::Null, false));
        assert!(lock(&log).is_empty());
    }

    #[test]
    fn source_streams_to_sink_and_ends_with_eos() {
        let pipeline = Pipeline::new();
        let src = Element::make("audiotestsrc");
        src.set_property("num-buffers", 3_i64).unwrap();
        src.set_property("samples-per-buffer", 100_u32).unwrap();
        let (sink, log) = recorder("rec");
        assert!(pipeline.add(&src));
        assert!(pipeline.add(&sink));
        assert!(src.link(&sink));

        let messages = pipeline.subscribe(64);
        assert!(pipeline.set_state(State::Playing, false));

        let eos = wait_until(Duration::from_secs(5), || {
            messages.try_iter().any(|m| m.is_eos())
        });
        assert!(eos);
        let seen = lock(&log).clone();
        let buffers = seen.iter().filter(|l| l.starts_with("buffer")).count();
        assert_eq!(buffers, 3);
        assert_eq!(seen.last().map(String::as_str), Some("event eos"));
        assert!(pipeline.set_state(State::Null, false));
    }

    #[test]
    fn idle_source_refuses_events() {
        let src = Element::make("audiotestsrc");
        assert!(!src.send_event(Event::Eos));
    }

    #[test]
    fn probe_can_drop_events() {
        let pipeline = Pipeline::new();
        let src = Element::make("audiotestsrc");
        src.set_property("is-live", true).unwrap();
        let (sink, log) = recorder("rec");
        pipeline.add(&src);
        pipeline.add(&sink);
        src.link(&sink);

        src.src_pad().set_probe(|info| match info {
            ProbeInfo::Event(Event::Eos) => ProbeReturn::Drop,
            _ => ProbeReturn::Pass,
        });

        assert!(pipeline.set_state(State::Playing, false));
        assert!(src.send_event(Event::Eos));
        thread::sleep(Duration::from_millis(200));
        assert!(!lock(&log).iter().any(|l| l == "event eos"));
        assert!(pipeline.set_state(State::Null, false));
    }

    #[test]
    fn removing_probe_lets_items_through() {
        let pipeline = Pipeline::new();
        let src = Element::make("audiotestsrc");
        src.set_property("num-buffers", 2_i64).unwrap();
        let (sink, log) = recorder("rec");
        pipeline.add(&src);
        pipeline.add(&sink);
        src.link(&sink);

        src.src_pad().set_probe(|_| ProbeReturn::Remove);
        let messages = pipeline.subscribe(64);
        assert!(pipeline.set_state(State::Playing, false));
        assert!(wait_until(Duration::from_secs(5), || {
            messages.try_iter().any(|m| m.is_eos())
        }));
        let buffers = lock(&log).iter().filter(|l| l.starts_with("buffer")).count();
        assert_eq!(buffers, 2);
        pipeline.set_state(State::Null, false);
    }

    /// A sink whose `NullToReady` step takes `delay`.
    struct Sluggish {
        delay: Duration,
    }

    impl ElementImpl for Sluggish {
        fn sink_caps(&self) -> Option<Caps> {
            Some(Caps::Any)
        }

        fn set_property(&mut self, name: &str, _: &Value, _: State) -> Result<(), PropertyError> {
            Err(PropertyError::Unknown(name.into()))
        }

        fn property(&self, name: &str) -> Result<Value, PropertyError> {
            Err(PropertyError::Unknown(name.into()))
        }

        fn change_state(
            &mut self,
            _: &ElementContext<'_>,
            transition: StateTransition,
        ) -> Result<(), StateChangeError> {
            if transition == StateTransition::NullToReady {
                thread::sleep(self.delay);
            }
            Ok(())
        }
    }

    #[test]
    fn blocking_state_change_gives_up_after_the_bound() {
        let element = Element::from_impl(
            "sluggish",
            "slow",
            Sluggish {
                delay: STATE_CHANGE_TIMEOUT + Duration::from_secs(2),
            },
        );
        let started = Instant::now();
        assert!(!element.set_state(State::Ready, false));
        let elapsed = started.elapsed();
        assert!(elapsed >= STATE_CHANGE_TIMEOUT);
        assert!(elapsed < STATE_CHANGE_TIMEOUT + Duration::from_secs(1));
    }

    #[test]
    fn async_state_change_returns_before_arrival() {
        let element = Element::from_impl(
            "sluggish",
            "slow",
            Sluggish {
                delay: Duration::from_secs(1),
            },
        );
        let started = Instant::now();
        assert!(element.set_state(State::Ready, true));
        assert!(started.elapsed() < Duration::from_millis(900));
        // `state()` waits for the transition in flight.
        assert_eq!(element.state(), State::Ready);
    }

    #[test]
    fn async_request_reports_immediate_refusal() {
        let pipeline = Pipeline::new();
        let src = Element::make("filesrc");
        src.set_property("location", "/no/such/file.wav").unwrap();
        pipeline.add(&src);
        pipeline.add(&Element::make("fakesink"));
        assert!(!pipeline.set_state(State::Playing, true));
    }

    #[test]
    fn element_handle_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Element>();
        assert_send_sync::<Pad>();
    }
}
