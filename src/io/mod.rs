//! File I/O off the event loop thread
//!
//! - `file`: the file abstraction pipeline workers read and write
//! - `newline`: text-mode line ending conversion
//! - `pipeline`: the bounded double-buffered ring

mod file;
mod newline;
mod pipeline;

pub use file::{create_preallocated, TransferFile};
pub use newline::{conversion_needed, host_uses_crlf, LineEndings};
pub use pipeline::{Direction, Pipeline, ReadStatus, WriteStatus};
