//! Explicit registry of related handlers

use super::handler::HandlerRef;
use super::types::HandlerId;
use crate::sync::Mutex;

/// A set of handler addresses that can be messaged together.
///
/// Membership is explicit: nothing joins a group unless its owner adds it,
/// and members removed from their loop simply stop receiving broadcasts.
pub struct HandlerGroup<E: Send + 'static> {
    members: Mutex<Vec<HandlerRef<E>>>,
}

impl<E: Send + 'static> Default for HandlerGroup<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Send + 'static> HandlerGroup<E> {
    /// Create an empty group
    pub fn new() -> Self {
        Self {
            members: Mutex::new(Vec::new()),
        }
    }

    /// Add a member. Returns false if it already belongs to the group.
    pub fn join(&self, member: HandlerRef<E>) -> bool {
        let mut members = self.members.lock();
        if members.iter().any(|m| m.id() == member.id()) {
            return false;
        }
        members.push(member);
        true
    }

    /// Remove a member by id
    pub fn leave(&self, id: HandlerId) -> bool {
        let mut members = self.members.lock();
        let before = members.len();
        members.retain(|m| m.id() != id);
        members.len() != before
    }

    /// Number of members, including ones no longer registered
    pub fn len(&self) -> usize {
        self.members.lock().len()
    }

    /// Whether the group has no members
    pub fn is_empty(&self) -> bool {
        self.members.lock().is_empty()
    }

    /// Drop members whose handlers are gone, returning how many were pruned
    pub fn prune(&self) -> usize {
        let mut members = self.members.lock();
        let before = members.len();
        members.retain(|m| m.is_registered());
        before - members.len()
    }

    /// Send a copy of `event` to every member except `except`.
    ///
    /// Returns the number of members that accepted the event.
    pub fn broadcast(&self, event: E, except: Option<HandlerId>) -> usize
    where
        E: Clone,
    {
        // Snapshot so a member's loop is never entered while the group is locked
        let targets: Vec<HandlerRef<E>> = self
            .members
            .lock()
            .iter()
            .filter(|m| Some(m.id()) != except)
            .cloned()
            .collect();

        targets
            .iter()
            .filter(|target| target.send(event.clone()))
            .count()
    }
}
