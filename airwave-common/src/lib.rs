//! # Airwave Common Library
//!
//! Shared code for the Airwave player and anything observing it:
//! - Error type
//! - TOML configuration loading
//! - Player event types and the broadcast event bus

pub mod config;
pub mod error;
pub mod events;

pub use error::{Error, Result};
pub use events::{EventBus, PlayerEvent};
