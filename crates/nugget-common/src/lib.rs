//! Shared domain types for the nugget build engine.
//!
//! This crate carries no IO and no async code: it is the vocabulary the
//! engine, its transports and its tests agree on.
//!
//! - [`models`]: tasks, agents, sessions, retry history and deploy units
//! - [`events`]: the tagged outbound event stream

pub mod events;
pub mod models;

pub use events::BuildEvent;
pub use models::*;
