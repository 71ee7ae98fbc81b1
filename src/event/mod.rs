//! Event dispatch
//!
//! A single loop thread serializes every handler callback. Other threads talk
//! to handlers only by posting events or scheduling timers through a
//! [`HandlerRef`].

mod event_loop;
mod group;
mod handler;
mod timer;
mod types;

pub use event_loop::EventLoop;
pub use group::HandlerGroup;
pub use handler::{Handler, HandlerRef};
pub use types::{Event, EventHandler, HandlerId, PipelineId, TimerId};
