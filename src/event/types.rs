//! Identifiers and the event envelope delivered to handlers

use std::fmt;
use std::num::NonZeroU64;

/// Identity of a handler registered with an event loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandlerId(pub(crate) u64);

impl fmt::Display for HandlerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "handler#{}", self.0)
    }
}

/// Identity of a scheduled timer.
///
/// Unique and increasing for the lifetime of one loop. Zero is never
/// handed out, so `Option<TimerId>` stands in for "no timer".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(NonZeroU64);

impl TimerId {
    pub(crate) fn new(raw: NonZeroU64) -> Self {
        Self(raw)
    }

    /// Raw numeric value
    pub fn get(self) -> u64 {
        self.0.get()
    }
}

impl fmt::Display for TimerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "timer#{}", self.0)
    }
}

/// Identity of an I/O pipeline, carried by its completion notifications
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PipelineId(pub(crate) u64);

impl fmt::Display for PipelineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pipeline#{}", self.0)
    }
}

/// Everything a handler can receive from its loop.
///
/// `E` is the application's own closed set of event variants; the loop adds
/// its timer and I/O notifications around it so a handler matches all of
/// them in one place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event<E> {
    /// A timer owned by this handler fired
    Timer(TimerId),
    /// A pipeline this handler waits on has a buffer available again
    IoReady(PipelineId),
    /// An application event
    User(E),
}

impl<E> Event<E> {
    /// The application payload, if this is a user event
    pub fn as_user(&self) -> Option<&E> {
        match self {
            Event::User(event) => Some(event),
            _ => None,
        }
    }
}

/// Callback target driven by an event loop.
///
/// The loop calls [`EventHandler::on_event`] on its own thread, never
/// concurrently with another callback of the same loop.
pub trait EventHandler<E>: Send + 'static {
    /// Handle one event
    fn on_event(&mut self, event: Event<E>);
}

impl<E, F> EventHandler<E> for F
where
    F: FnMut(Event<E>) + Send + 'static,
{
    fn on_event(&mut self, event: Event<E>) {
        self(event)
    }
}
