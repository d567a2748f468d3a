//! Download orchestration and live progress for an in-player extension.
//!
//! The engine hands acquisition to a local backend service, follows one job
//! at a time, paints per-row progress onto the player's own track list and
//! can record what is playing when the backend could not fetch some items.

pub mod action;
pub mod backend;
pub mod bridge;
pub mod capture;
pub mod core;
pub mod error;
pub mod events;
pub mod host;
pub mod http;
pub mod link;
pub mod overlay;
pub mod poller;
pub mod resolver;
pub mod subscribers;

pub use crate::core::Engine;
pub use crate::error::{EngineError, Result};
