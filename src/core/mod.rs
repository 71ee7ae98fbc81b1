//! Engine core
//!
//! The worker pool that runs pipeline I/O and the transfer handler that ties
//! pipelines to the event loop.

mod pool;
mod transfer;

pub use pool::{TaskHandle, WorkerPool};
pub use transfer::{LocalTransfer, TransferEvent, TransferOptions, TransferSummary};
