//! Progress reporting
//!
//! Terminal progress bar and summaries for transfers.

mod reporter;

pub use reporter::*;
