//! Configuration module for the transfer engine
//!
//! Provides CLI arguments, config files, and runtime settings.

mod settings;

pub use settings::*;
