//! Single-threaded event dispatch loop
//!
//! One thread per [`EventLoop`] drains a FIFO of pending events and a set of
//! timers, invoking handler callbacks one at a time. The loop lock only
//! guards bookkeeping; callbacks always run with it released so they can post
//! events, add timers or remove handlers without deadlocking.
//!
//! Payloads and handler objects are never dropped while the loop lock is
//! held: their destructors may stop pipelines or remove other handlers, both
//! of which need the lock.

use super::handler::{Handler, HandlerRef};
use super::timer::TimerRegistry;
use super::types::{Event, EventHandler, HandlerId, TimerId};
use crate::config::LoopConfig;
use crate::error::Result;
use crate::sync::{Condition, Mutex, MutexGuard};
use parking_lot::Condvar;
use std::collections::{HashMap, VecDeque};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

/// A registered handler as the loop sees it
pub(crate) struct HandlerSlot<E> {
    id: HandlerId,
    removing: AtomicBool,
    /// Events the loop had already picked when removal began
    skipped: AtomicUsize,
    target: Mutex<Box<dyn EventHandler<E>>>,
}

impl<E: 'static> HandlerSlot<E> {
    fn dispatch(&self, event: Event<E>) {
        // A remover may have claimed the slot after the loop picked the event
        if self.removing.load(Ordering::Acquire) {
            tracing::trace!("Skipping event for {}, removal in progress", self.id);
            self.skipped.fetch_add(1, Ordering::AcqRel);
            return;
        }
        let mut target = self.target.lock();
        target.on_event(event);
    }
}

/// An event waiting for delivery
struct PendingEvent<E> {
    handler: HandlerId,
    event: Event<E>,
}

struct LoopState<E> {
    queue: VecDeque<PendingEvent<E>>,
    timers: TimerRegistry,
    handlers: HashMap<HandlerId, Arc<HandlerSlot<E>>>,
    /// Handler whose callback is running right now
    active: Option<HandlerId>,
    quit: bool,
    next_handler_id: u64,
}

/// State shared between the loop thread and every handler address
pub(crate) struct LoopShared<E> {
    state: Mutex<LoopState<E>>,
    wakeup: Condition,
    /// Notified whenever a callback returns
    idle: Condvar,
    thread_id: OnceLock<ThreadId>,
}

impl<E: Send + 'static> LoopShared<E> {
    fn new(config: &LoopConfig) -> Self {
        Self {
            state: Mutex::new(LoopState {
                queue: VecDeque::new(),
                timers: TimerRegistry::new(config.clock_skew_threshold()),
                handlers: HashMap::new(),
                active: None,
                quit: false,
                next_handler_id: 0,
            }),
            wakeup: Condition::new(),
            idle: Condvar::new(),
            thread_id: OnceLock::new(),
        }
    }

    pub(crate) fn is_loop_thread(&self) -> bool {
        self.thread_id.get() == Some(&thread::current().id())
    }

    fn register(&self, target: Box<dyn EventHandler<E>>, id: HandlerId) {
        let slot = Arc::new(HandlerSlot {
            id,
            removing: AtomicBool::new(false),
            skipped: AtomicUsize::new(0),
            target: Mutex::new(target),
        });
        self.state.lock().handlers.insert(id, slot);
    }

    fn allocate_id(&self) -> HandlerId {
        let mut state = self.state.lock();
        state.next_handler_id += 1;
        HandlerId(state.next_handler_id)
    }

    /// Queue an event. Dropped (returning false) if the handler is gone or
    /// the loop is shutting down.
    pub(crate) fn post(&self, handler: HandlerId, event: Event<E>) -> bool {
        let mut state = self.state.lock();
        if state.quit || !state.handlers.contains_key(&handler) {
            drop(state);
            drop(event);
            return false;
        }

        state.queue.push_back(PendingEvent { handler, event });
        self.wakeup.signal(&state);
        true
    }

    pub(crate) fn add_timer(
        &self,
        handler: HandlerId,
        interval: Duration,
        one_shot: bool,
    ) -> Option<TimerId> {
        let mut state = self.state.lock();
        if state.quit || !state.handlers.contains_key(&handler) {
            return None;
        }

        let id = state
            .timers
            .add(handler, interval, one_shot, Instant::now());
        // The new deadline may be earlier than the one the loop sleeps on
        self.wakeup.signal(&state);
        Some(id)
    }

    pub(crate) fn stop_timer(&self, id: TimerId) -> bool {
        self.state.lock().timers.stop(id)
    }

    pub(crate) fn stop_add_timer(
        &self,
        handler: HandlerId,
        old: Option<TimerId>,
        interval: Duration,
        one_shot: bool,
    ) -> Option<TimerId> {
        let mut state = self.state.lock();
        if let Some(old) = old {
            state.timers.stop(old);
        }
        if state.quit || !state.handlers.contains_key(&handler) {
            return None;
        }

        let id = state
            .timers
            .add(handler, interval, one_shot, Instant::now());
        self.wakeup.signal(&state);
        Some(id)
    }

    /// Drop queued events for `handler` that match `predicate`
    pub(crate) fn filter_events<F>(&self, handler: HandlerId, mut predicate: F) -> usize
    where
        F: FnMut(&Event<E>) -> bool,
    {
        let mut state = self.state.lock();
        let queue = std::mem::take(&mut state.queue);
        let (dropped, kept): (VecDeque<_>, VecDeque<_>) = queue
            .into_iter()
            .partition(|p| p.handler == handler && predicate(&p.event));
        state.queue = kept;
        drop(state);

        dropped.len()
    }

    /// The removal protocol.
    ///
    /// Marks the handler removing, purges its queued events and timers, then
    /// waits until none of its callbacks is running. Called on the loop
    /// thread (from inside a callback) the wait is skipped: the running
    /// callback is the caller itself. Returns how many accepted events will
    /// never be delivered: those purged from the queue plus any the loop had
    /// already picked.
    pub(crate) fn remove_handler(&self, handler: HandlerId) -> usize {
        let mut state = self.state.lock();

        let slot = state.handlers.remove(&handler);
        if let Some(slot) = &slot {
            slot.removing.store(true, Ordering::Release);
        }

        let queue = std::mem::take(&mut state.queue);
        let (purged, kept): (VecDeque<_>, VecDeque<_>) =
            queue.into_iter().partition(|p| p.handler == handler);
        state.queue = kept;
        let timers = state.timers.remove_handler(handler);

        if !self.is_loop_thread() {
            while state.active == Some(handler) {
                self.idle.wait(&mut state);
            }
        }
        drop(state);

        let skipped = slot
            .as_ref()
            .map_or(0, |slot| slot.skipped.load(Ordering::Acquire));
        let purged_count = purged.len() + skipped;
        if slot.is_some() {
            tracing::debug!(
                "Removed {} ({} queued events, {} timers purged)",
                handler,
                purged_count,
                timers
            );
        }
        drop(purged);
        drop(slot);
        purged_count
    }

    fn request_quit(&self) {
        let mut state = self.state.lock();
        state.quit = true;
        self.wakeup.signal(&state);
    }

    fn run(&self) {
        let _ = self.thread_id.set(thread::current().id());
        tracing::debug!("Event loop started");

        let mut state = self.state.lock();
        while !state.quit {
            match state.timers.next_wait(Instant::now()) {
                Some(wait) => {
                    self.wakeup.wait_for(&mut state, wait);
                }
                None => self.wakeup.wait(&mut state),
            }
            if state.quit {
                break;
            }

            if !self.fire_timer(&mut state) {
                self.deliver_event(&mut state);
            }

            if !state.queue.is_empty() || state.quit {
                self.wakeup.signal(&state);
            }
        }

        let queue = std::mem::take(&mut state.queue);
        let handlers = std::mem::take(&mut state.handlers);
        state.timers.clear();
        drop(state);

        tracing::debug!(
            "Event loop stopped ({} undelivered events, {} handlers still registered)",
            queue.len(),
            handlers.len()
        );
        drop(queue);
        drop(handlers);
    }

    fn fire_timer(&self, state: &mut MutexGuard<'_, LoopState<E>>) -> bool {
        match state.timers.fire_due(Instant::now()) {
            Some((timer, handler)) => {
                self.dispatch(state, handler, Event::Timer(timer));
                true
            }
            None => false,
        }
    }

    fn deliver_event(&self, state: &mut MutexGuard<'_, LoopState<E>>) -> bool {
        match state.queue.pop_front() {
            Some(pending) => {
                self.dispatch(state, pending.handler, pending.event);
                true
            }
            None => false,
        }
    }

    fn dispatch(&self, state: &mut MutexGuard<'_, LoopState<E>>, handler: HandlerId, event: Event<E>) {
        let Some(slot) = state.handlers.get(&handler).cloned() else {
            // Removal purges queue and timers under the same lock
            tracing::warn!("Dropping event for unregistered {}", handler);
            MutexGuard::unlocked(state, move || drop(event));
            return;
        };

        state.active = Some(handler);
        MutexGuard::unlocked(state, move || {
            if catch_unwind(AssertUnwindSafe(|| slot.dispatch(event))).is_err() {
                tracing::error!("Callback of {} panicked", handler);
            }
            drop(slot);
        });
        state.active = None;
        self.idle.notify_all();
    }

    pub(crate) fn is_registered(&self, handler: HandlerId) -> bool {
        self.state.lock().handlers.contains_key(&handler)
    }

    fn pending_events(&self) -> usize {
        self.state.lock().queue.len()
    }

    fn pending_timers(&self) -> usize {
        self.state.lock().timers.len()
    }
}

/// An event loop and the thread that runs it.
///
/// Dropping the loop stops the thread; events still queued at that point are
/// discarded and handlers still registered are dropped on the loop thread.
pub struct EventLoop<E: Send + 'static> {
    shared: Arc<LoopShared<E>>,
    thread: Option<JoinHandle<()>>,
}

impl<E: Send + 'static> EventLoop<E> {
    /// Start a loop with default settings
    pub fn new() -> Result<Self> {
        Self::with_config(&LoopConfig::default())
    }

    /// Start a loop thread with the given settings
    pub fn with_config(config: &LoopConfig) -> Result<Self> {
        let shared = Arc::new(LoopShared::new(config));

        let thread = {
            let shared = Arc::clone(&shared);
            thread::Builder::new()
                .name(config.thread_name.clone())
                .spawn(move || shared.run())?
        };

        Ok(Self {
            shared,
            thread: Some(thread),
        })
    }

    /// Register a handler.
    ///
    /// `build` receives the handler's own address so it can keep it for
    /// sending events to itself and scheduling timers. The returned
    /// [`Handler`] owns the registration and removes it when dropped.
    pub fn add_handler<H, F>(&self, build: F) -> Handler<E>
    where
        H: EventHandler<E>,
        F: FnOnce(HandlerRef<E>) -> H,
    {
        let id = self.shared.allocate_id();
        let address = HandlerRef::new(Arc::clone(&self.shared), id);
        let target = build(address.clone());
        self.shared.register(Box::new(target), id);

        tracing::debug!("Registered {}", id);
        Handler::new(address)
    }

    /// Whether the calling thread is this loop's thread
    pub fn is_loop_thread(&self) -> bool {
        self.shared.is_loop_thread()
    }

    /// Number of events waiting for delivery
    pub fn pending_events(&self) -> usize {
        self.shared.pending_events()
    }

    /// Number of scheduled timers
    pub fn pending_timers(&self) -> usize {
        self.shared.pending_timers()
    }

    /// Stop the loop and join its thread.
    ///
    /// From inside a callback the loop is only asked to quit; it exits once
    /// the callback returns.
    pub fn stop(&mut self) {
        self.shared.request_quit();

        if self.shared.is_loop_thread() {
            return;
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::error!("Event loop thread panicked");
            }
        }
    }
}

impl<E: Send + 'static> Drop for EventLoop<E> {
    fn drop(&mut self) {
        self.stop();
    }
}
