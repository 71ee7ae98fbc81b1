//! Handler addresses and registrations

use super::event_loop::LoopShared;
use super::types::{Event, HandlerId, TimerId};
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;
use std::time::Duration;

/// Address of a registered handler.
///
/// Cheap to clone and usable from any thread. Everything sent through an
/// address after its handler was removed is dropped.
pub struct HandlerRef<E: Send + 'static> {
    shared: Arc<LoopShared<E>>,
    id: HandlerId,
}

impl<E: Send + 'static> HandlerRef<E> {
    pub(crate) fn new(shared: Arc<LoopShared<E>>, id: HandlerId) -> Self {
        Self { shared, id }
    }

    /// The handler's identity
    pub fn id(&self) -> HandlerId {
        self.id
    }

    /// Queue an application event. Returns false if it was dropped.
    pub fn send(&self, event: E) -> bool {
        self.post(Event::User(event))
    }

    pub(crate) fn post(&self, event: Event<E>) -> bool {
        self.shared.post(self.id, event)
    }

    /// Schedule a timer for this handler.
    ///
    /// The first expiry is `interval` from now. Repeating timers are
    /// rescheduled `interval` after each firing. Returns `None` if the
    /// handler is no longer registered.
    pub fn add_timer(&self, interval: Duration, one_shot: bool) -> Option<TimerId> {
        self.shared.add_timer(self.id, interval, one_shot)
    }

    /// Cancel a timer; false if it no longer exists
    pub fn stop_timer(&self, id: TimerId) -> bool {
        self.shared.stop_timer(id)
    }

    /// Cancel `old` (if any) and schedule a replacement in one step
    pub fn stop_add_timer(
        &self,
        old: Option<TimerId>,
        interval: Duration,
        one_shot: bool,
    ) -> Option<TimerId> {
        self.shared.stop_add_timer(self.id, old, interval, one_shot)
    }

    /// Drop this handler's queued events matching `predicate`, returning how many went
    pub fn filter_events<F>(&self, predicate: F) -> usize
    where
        F: FnMut(&Event<E>) -> bool,
    {
        self.shared.filter_events(self.id, predicate)
    }

    /// Whether the handler is still registered with a running loop
    pub fn is_registered(&self) -> bool {
        self.shared.is_registered(self.id)
    }
}

impl<E: Send + 'static> Clone for HandlerRef<E> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            id: self.id,
        }
    }
}

impl<E: Send + 'static> fmt::Debug for HandlerRef<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRef").field("id", &self.id).finish()
    }
}

/// Owning registration of a handler.
///
/// Removes the handler when dropped. Removal blocks until no callback of the
/// handler is running, unless it happens on the loop thread itself.
pub struct Handler<E: Send + 'static> {
    address: HandlerRef<E>,
}

impl<E: Send + 'static> Handler<E> {
    pub(crate) fn new(address: HandlerRef<E>) -> Self {
        Self { address }
    }

    /// A clone of the handler's address
    pub fn address(&self) -> HandlerRef<E> {
        self.address.clone()
    }

    /// Unregister now.
    ///
    /// On return no queued event or timer of this handler remains and no
    /// callback for it is running (or will run). Calling it again is a no-op.
    pub fn remove(&self) {
        self.address.shared.remove_handler(self.address.id);
    }

    /// Whether [`Handler::remove`] ran or the loop stopped
    pub fn is_removed(&self) -> bool {
        !self.address.is_registered()
    }
}

impl<E: Send + 'static> Deref for Handler<E> {
    type Target = HandlerRef<E>;

    fn deref(&self) -> &HandlerRef<E> {
        &self.address
    }
}

impl<E: Send + 'static> Drop for Handler<E> {
    fn drop(&mut self) {
        self.remove();
    }
}

impl<E: Send + 'static> fmt::Debug for Handler<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handler")
            .field("id", &self.address.id)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventLoop;
    use crossbeam::channel::unbounded;

    #[test]
    fn test_address_outlives_registration() {
        let event_loop: EventLoop<u32> = EventLoop::new().unwrap();
        let (tx, rx) = unbounded();

        let handler = event_loop.add_handler(move |_| {
            move |event: Event<u32>| {
                let _ = tx.send(event);
            }
        });
        let address = handler.address();
        assert!(address.send(7));
        assert_eq!(
            rx.recv_timeout(Duration::from_secs(5)).unwrap(),
            Event::User(7)
        );

        drop(handler);
        assert!(!address.is_registered());
        assert!(!address.send(8));
        assert!(address.add_timer(Duration::from_millis(1), true).is_none());
    }

    #[test]
    fn test_handler_sends_to_itself() {
        let event_loop: EventLoop<u32> = EventLoop::new().unwrap();
        let (tx, rx) = unbounded();

        // Counts down by re-posting to its own address
        let handler = event_loop.add_handler(move |me: HandlerRef<u32>| {
            move |event: Event<u32>| {
                if let Event::User(n) = event {
                    let _ = tx.send(n);
                    if n > 0 {
                        me.send(n - 1);
                    }
                }
            }
        });
        handler.send(3);

        let seen: Vec<u32> = (0..4)
            .map(|_| rx.recv_timeout(Duration::from_secs(5)).unwrap())
            .collect();
        assert_eq!(seen, vec![3, 2, 1, 0]);
    }

    #[test]
    fn test_ids_differ() {
        let event_loop: EventLoop<()> = EventLoop::new().unwrap();
        let a = event_loop.add_handler(|_| |_: Event<()>| {});
        let b = event_loop.add_handler(|_| |_: Event<()>| {});
        assert_ne!(a.id(), b.id());
        assert_eq!(a.address().id(), a.id());
    }
}
