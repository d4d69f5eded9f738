#![forbid(unsafe_code)]

//! APL command runtime.
//!
//! Loads a document into a component tree and runs its commands: the
//! sequencer and its try/catch/finally semantics, delays on the fake clock,
//! host round-trips through [`ActionRef`](apl_core::action::ActionRef)s,
//! focus, paging, media and speech.
//!
//! # Key Components
//!
//! - [`RootContext`] - the loaded document and the host API
//! - [`RootConfig`] - host configuration
//! - [`FocusManager`] - keyboard focus state machine
//! - [`CommandRegistry`] - built-in and extension command lookup
//! - [`RootSimulator`] - deterministic test driver
//!
//! # How it fits in the system
//! `apl-core` supplies the action graph, timers, event queue and media
//! tracking. This crate owns everything that knows about documents,
//! components and commands.

mod builder;
pub mod command;
pub mod component;
pub mod config;
pub mod document;
mod exec;
pub mod focus;
pub mod media_player;
pub mod root;
pub mod sequencer;
pub mod session;
pub mod simulator;

pub use command::{CommandKind, CommandRecord, CommandRegistry, CommandType, ExtensionCommandDefinition};
pub use component::{Component, ComponentKind, ComponentStates, ComponentTree};
pub use config::{ConfigError, ConfigResult, ExperimentalFeatures, RootConfig};
pub use document::{Document, DocumentError, DocumentResult};
pub use focus::{FocusChange, FocusManager};
pub use media_player::{AudioTrack, MediaPlayer, MediaPlayerFactory};
pub use root::RootContext;
pub use sequencer::MAIN_SEQUENCER;
pub use session::{ConsoleMessage, LogLevel, Session};
pub use simulator::RootSimulator;
