//! Shared types, error taxonomy and daemon-root layout for keel.
//!
//! This crate has no knowledge of namespaces, cgroups, or networking — it is
//! the thin common vocabulary the engine, API server and CLI all link
//! against.

pub mod constants;
pub mod errors;
pub mod events;
pub mod layout;

pub use errors::{EngineError, EngineResult, ErrorCode};
pub use events::{Event, EventTarget};
pub use layout::{ContainerLayout, DaemonLayout};
