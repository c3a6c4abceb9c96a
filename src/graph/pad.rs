//! Connection points ("pads") through which nodes exchange buffers and
//! events.
//!
//! Every leaf node has at most one source pad (output) and one sink pad
//! (input).  Linking pairs a source pad with exactly one sink pad whose caps
//! intersect.  A probe installed on a pad sees every buffer and event that
//! passes through it and may drop the item or uninstall itself.

use std::fmt;
use std::sync::{Arc, Mutex, Weak};

use super::buffer::{Buffer, Caps, Event, FlowError, FlowResult};
use super::element::ElementInner;
use super::lock;

// ---------------------------------------------------------------------------
// Probes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PadDirection {
    Src,
    Sink,
}

/// Item observed by a probe.
#[derive(Debug)]
pub enum ProbeInfo<'a> {
    Buffer(&'a Buffer),
    Event(&'a Event),
}

/// What a probe wants done with the item it observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeReturn {
    /// Let the item through.
    Pass,
    /// Swallow the item.
    Drop,
    /// Let the item through and uninstall the probe.
    Remove,
}

pub(crate) type ProbeFn = Box<dyn FnMut(&ProbeInfo<'_>) -> ProbeReturn + Send>;

// ---------------------------------------------------------------------------
// PadInner
// ---------------------------------------------------------------------------

pub(crate) struct PadInner {
    name: String,
    direction: PadDirection,
    caps: Caps,
    parent: Weak<ElementInner>,
    peer: Mutex<Weak<PadInner>>,
    probe: Mutex<Option<ProbeFn>>,
}

impl PadInner {
    pub(crate) fn new(
        name: &str,
        direction: PadDirection,
        caps: Caps,
        parent: Weak<ElementInner>,
    ) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_owned(),
            direction,
            caps,
            parent,
            peer: Mutex::new(Weak::new()),
            probe: Mutex::new(None),
        })
    }

    pub(crate) fn peer(&self) -> Option<Arc<PadInner>> {
        lock(&self.peer).upgrade()
    }

    pub(crate) fn parent(&self) -> Option<Arc<ElementInner>> {
        self.parent.upgrade()
    }

    /// Run the installed probe.  `true` means the item may continue.
    fn probe(&self, info: ProbeInfo<'_>) -> bool {
        let mut slot = lock(&self.probe);
        let Some(probe) = slot.as_mut() else {
            return true;
        };
        match probe(&info) {
            ProbeReturn::Pass => true,
            ProbeReturn::Drop => false,
            ProbeReturn::Remove => {
                *slot = None;
                true
            }
        }
    }

    /// Deliver a buffer through this source pad to the linked peer.
    pub(crate) fn push(&self, buffer: Buffer) -> FlowResult {
        if !self.probe(ProbeInfo::Buffer(&buffer)) {
            return Ok(());
        }
        let element = self
            .peer()
            .and_then(|peer| peer.parent())
            .ok_or(FlowError::NotLinked)?;
        element.chain(buffer)
    }

    /// Deliver an event through this source pad to the linked peer.
    pub(crate) fn push_event(&self, event: Event) -> bool {
        if !self.probe(ProbeInfo::Event(&event)) {
            return true;
        }
        match self.peer().and_then(|peer| peer.parent()) {
            Some(element) => element.handle_event(event),
            None => false,
        }
    }
}

// ---------------------------------------------------------------------------
// Pad
// ---------------------------------------------------------------------------

/// Handle to a connection point.
///
/// Handles are move-only; use [`Pad::share`] for an additional reference.
/// An invalid handle (see [`Pad::invalid`]) refuses every operation.
pub struct Pad {
    inner: Option<Arc<PadInner>>,
}

impl Pad {
    pub(crate) fn from_inner(inner: Option<Arc<PadInner>>) -> Self {
        Self { inner }
    }

    /// A handle that refers to nothing.
    pub fn invalid() -> Self {
        Self { inner: None }
    }

    pub fn is_valid(&self) -> bool {
        self.inner.is_some()
    }

    /// A second handle to the same pad.
    pub fn share(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }

    pub fn name(&self) -> &str {
        self.inner.as_ref().map_or("", |p| p.name.as_str())
    }

    pub fn direction(&self) -> Option<PadDirection> {
        self.inner.as_ref().map(|p| p.direction)
    }

    pub fn caps(&self) -> Option<Caps> {
        self.inner.as_ref().map(|p| p.caps)
    }

    /// Name of the node that owns this pad.
    pub fn parent_name(&self) -> Option<String> {
        self.inner
            .as_ref()
            .and_then(|p| p.parent())
            .map(|e| e.name().to_owned())
    }

    pub fn is_linked(&self) -> bool {
        self.inner.as_ref().is_some_and(|p| p.peer().is_some())
    }

    /// The pad this one is linked to, or an invalid handle.
    pub fn peer(&self) -> Pad {
        Pad::from_inner(self.inner.as_ref().and_then(|p| p.peer()))
    }

    /// Link this source pad to `sink`.
    ///
    /// Fails (leaving both pads untouched) when either handle is invalid,
    /// the directions are wrong, either pad is already linked, both pads
    /// belong to the same node, or the caps do not intersect.
    pub fn link(&self, sink: &Pad) -> bool {
        let (Some(src), Some(dst)) = (&self.inner, &sink.inner) else {
            return false;
        };
        if src.direction != PadDirection::Src || dst.direction != PadDirection::Sink {
            log::debug!("pad: link refused, wrong directions");
            return false;
        }
        if src.parent.ptr_eq(&dst.parent) {
            log::debug!("pad: link refused, both pads belong to the same node");
            return false;
        }
        if !src.caps.can_intersect(&dst.caps) {
            log::debug!(
                "pad: link refused, caps {:?} and {:?} do not intersect",
                src.caps,
                dst.caps
            );
            return false;
        }

        // Source before sink keeps the lock order fixed.
        let mut src_peer = lock(&src.peer);
        let mut dst_peer = lock(&dst.peer);
        if src_peer.upgrade().is_some() || dst_peer.upgrade().is_some() {
            log::debug!("pad: link refused, pad already linked");
            return false;
        }
        *src_peer = Arc::downgrade(dst);
        *dst_peer = Arc::downgrade(src);
        true
    }

    /// Undo a link between this pad and `other`.  Returns `false` when the
    /// two are not linked to each other.
    pub fn unlink(&self, other: &Pad) -> bool {
        let (Some(a), Some(b)) = (&self.inner, &other.inner) else {
            return false;
        };
        if a.direction == b.direction {
            return false;
        }
        let (src, dst) = match a.direction {
            PadDirection::Src => (a, b),
            PadDirection::Sink => (b, a),
        };
        let mut src_peer = lock(&src.peer);
        let mut dst_peer = lock(&dst.peer);
        let linked = src_peer.upgrade().is_some_and(|p| Arc::ptr_eq(&p, dst))
            && dst_peer.upgrade().is_some_and(|p| Arc::ptr_eq(&p, src));
        if linked {
            *src_peer = Weak::new();
            *dst_peer = Weak::new();
        }
        linked
    }

    /// Install `probe`, replacing any previous one.  A running probe call
    /// finishes before the replacement takes effect.
    pub fn set_probe<F>(&self, probe: F) -> bool
    where
        F: FnMut(&ProbeInfo<'_>) -> ProbeReturn + Send + 'static,
    {
        match &self.inner {
            Some(pad) => {
                *lock(&pad.probe) = Some(Box::new(probe));
                true
            }
            None => false,
        }
    }

    pub fn remove_probe(&self) {
        if let Some(pad) = &self.inner {
            *lock(&pad.probe) = None;
        }
    }

    /// Inject an event at this pad.
    ///
    /// On a sink pad the owning node handles it as if it came from upstream.
    /// On a source pad it is pushed downstream to the peer.
    pub fn send_event(&self, event: Event) -> bool {
        let Some(pad) = &self.inner else {
            return false;
        };
        match pad.direction {
            PadDirection::Sink => pad
                .parent()
                .is_some_and(|element| element.handle_event(event)),
            PadDirection::Src => pad.push_event(event),
        }
    }

    /// `true` when both handles refer to the same pad.
    pub fn ptr_eq(&self, other: &Pad) -> bool {
        match (&self.inner, &other.inner) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl Default for Pad {
    fn default() -> Self {
        Self::invalid()
    }
}

impl fmt::Debug for Pad {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.inner {
            Some(pad) => f
                .debug_struct("Pad")
                .field("name", &pad.name)
                .field("direction", &pad.direction)
                .field("caps", &pad.caps)
                .field("linked", &pad.peer().is_some())
                .finish(),
            None => f.write_str("Pad(invalid)"),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Element;

    #[test]
    fn link_pairs_compatible_pads() {
        let src = Element::make("audiotestsrc");
        let sink = Element::make("fakesink");
        let (out, input) = (src.src_pad(), sink.sink_pad());

        assert!(out.link(&input));
        assert!(out.peer().ptr_eq(&input));
        assert!(input.peer().ptr_eq(&out));
        assert_eq!(input.parent_name().as_deref(), Some(sink.name()));
    }

    #[test]
    fn link_with_invalid_pad_leaves_both_unlinked() {
        let src = Element::make("audiotestsrc");
        let out = src.src_pad();
        assert!(!out.link(&Pad::invalid()));
        assert!(!Pad::invalid().link(&out));
        assert!(!out.is_linked());
    }

    #[test]
    fn link_refuses_wrong_direction_and_relinking() {
        let src = Element::make("audiotestsrc");
        let a = Element::make("fakesink");
        let b = Element::make("fakesink");

        assert!(!a.sink_pad().link(&src.src_pad()));
        assert!(src.src_pad().link(&a.sink_pad()));
        assert!(!src.src_pad().link(&b.sink_pad()));
        assert!(!b.sink_pad().is_linked());
    }

    #[test]
    fn link_refuses_incompatible_caps() {
        let file = Element::make("filesrc");
        let convert = Element::make("audioconvert");
        assert!(!file.src_pad().link(&convert.sink_pad()));
        assert!(!file.src_pad().is_linked());
    }

    #[test]
    fn unlink_only_undoes_an_existing_link() {
        let src = Element::make("audiotestsrc");
        let sink = Element::make("fakesink");
        let other = Element::make("fakesink");
        assert!(src.link(&sink));

        assert!(!src.src_pad().unlink(&other.sink_pad()));
        assert!(sink.sink_pad().unlink(&src.src_pad()));
        assert!(!src.src_pad().is_linked());
        assert!(!sink.sink_pad().is_linked());
    }

    #[test]
    fn second_probe_replaces_the_first() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let src = Element::make("audiotestsrc");
        let sink = Element::make("fakesink");
        assert!(src.link(&sink));
        let out = src.src_pad();

        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&first);
        assert!(out.set_probe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            ProbeReturn::Drop
        }));
        let counter = Arc::clone(&second);
        assert!(out.set_probe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            ProbeReturn::Pass
        }));

        // Passed through to a sink that is not running, so not handled.
        assert!(!out.send_event(crate::graph::Event::Eos));
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn invalid_pad_refuses_everything() {
        let pad = Pad::invalid();
        assert!(!pad.is_valid());
        assert!(!pad.set_probe(|_| ProbeReturn::Pass));
        assert!(!pad.send_event(crate::graph::Event::Eos));
        assert_eq!(pad.name(), "");
        assert!(!pad.peer().is_valid());
    }
}
