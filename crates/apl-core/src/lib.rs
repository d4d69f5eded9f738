#![forbid(unsafe_code)]

//! Core: action graph, fake-clock timers, outbound events, data binding and
//! media resource tracking for the APL command engine.
//!
//! Nothing in this crate knows about commands or components; `apl-runtime`
//! builds the sequencer and command semantics on top of these primitives.

pub mod action;
pub mod context;
pub mod evaluator;
pub mod event;
pub mod headers;
pub mod logging;
pub mod media;
pub mod timers;

// Re-export tracing macros at crate root for ergonomic use.
#[cfg(feature = "tracing")]
pub use logging::{debug, trace, warn};
