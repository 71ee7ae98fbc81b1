//! # transfer-engine - event loop and double-buffered file transfer core
//!
//! The engine runs every piece of protocol logic on one event loop thread and
//! pushes blocking file I/O onto pooled workers. The two sides exchange
//! fixed-size buffers through a bounded ring, so neither ever waits on the
//! other's I/O.
//!
//! ## Features
//!
//! - **Single-threaded dispatch**: per-source FIFO events and one-shot or
//!   repeating timers, with callbacks never running concurrently
//! - **Safe handler removal**: once `remove` returns, no callback of the
//!   handler runs again, even with other threads still posting
//! - **Asynchronous I/O pipeline**: read-ahead and write-behind over a ring of
//!   slots with backpressure instead of unbounded buffering
//! - **Text mode**: streaming conversion between host line endings and CRLF
//!
//! ## Quick Start
//!
//! ```no_run
//! use transfer_engine::config::{PipelineConfig, PoolConfig};
//! use transfer_engine::core::{LocalTransfer, TransferOptions, WorkerPool};
//! use transfer_engine::event::EventLoop;
//! use std::path::Path;
//!
//! let event_loop = EventLoop::new().unwrap();
//! let pool = WorkerPool::new(&PoolConfig::default()).unwrap();
//!
//! let (handler, done) = LocalTransfer::start(
//!     &event_loop,
//!     &pool,
//!     Path::new("/source.bin"),
//!     Path::new("/destination.bin"),
//!     &TransferOptions::default(),
//!     &PipelineConfig::default(),
//!     None,
//! )
//! .unwrap();
//!
//! let summary = done.recv().unwrap().unwrap();
//! handler.remove();
//! println!("Copied {} bytes", summary.bytes_written);
//! ```
//!
//! ## Writing a handler
//!
//! ```no_run
//! use transfer_engine::event::{Event, EventLoop};
//! use std::time::Duration;
//!
//! let event_loop: EventLoop<String> = EventLoop::new().unwrap();
//! let handler = event_loop.add_handler(|_me| {
//!     |event: Event<String>| match event {
//!         Event::User(text) => println!("got {}", text),
//!         Event::Timer(id) => println!("{} fired", id),
//!         Event::IoReady(_) => {}
//!     }
//! });
//!
//! handler.send("hello".to_string());
//! handler.add_timer(Duration::from_millis(10), true);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod core;
pub mod error;
pub mod event;
pub mod io;
pub mod progress;
pub mod sync;

// Re-export commonly used types
pub use config::{EngineConfig, PipelineConfig};
pub use core::{LocalTransfer, WorkerPool};
pub use error::{EngineError, Result};
pub use event::{Event, EventLoop, Handler, HandlerRef};
pub use io::{Pipeline, ReadStatus, WriteStatus};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prelude module for convenient imports
pub mod prelude {
    //! Convenient re-exports for common usage
    //!
    //! ```no_run
    //! use transfer_engine::prelude::*;
    //! ```

    pub use crate::config::{EngineConfig, LoopConfig, PipelineConfig, PoolConfig};
    pub use crate::core::{LocalTransfer, TransferEvent, TransferOptions, WorkerPool};
    pub use crate::error::{EngineError, Result};
    pub use crate::event::{Event, EventHandler, EventLoop, Handler, HandlerGroup, HandlerRef};
    pub use crate::io::{Direction, Pipeline, ReadStatus, TransferFile, WriteStatus};
    pub use crate::progress::TransferProgress;
}
