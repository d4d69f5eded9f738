#![forbid(unsafe_code)]

//! Deterministic root simulator for testing.
//!
//! `RootSimulator` loads a document with command recording on, then lets a
//! test press components, run commands, move the fake clock and inspect the
//! outbound events, console messages and executed commands.
//!
//! # Example
//!
//! ```
//! use apl_runtime::simulator::RootSimulator;
//! use serde_json::json;
//!
//! let mut sim = RootSimulator::load(r#"{
//!     "type": "APL",
//!     "mainTemplate": { "item": { "type": "TouchWrapper", "id": "go",
//!         "onPress": { "type": "SendEvent", "delay": 100, "arguments": [1] } } }
//! }"#).unwrap();
//! sim.press("go");
//! sim.advance_time(50);
//! assert_eq!(sim.command_count("SendEvent"), 0);
//! sim.advance_time(50);
//! assert!(sim.check_send_event(&json!([1])));
//! ```

use std::time::Duration;

use apl_core::action::ActionRef;
use apl_core::event::{Event, EventProperty, EventType};
use serde_json::Value;

use crate::command::CommandRecord;
use crate::config::RootConfig;
use crate::document::DocumentResult;
use crate::root::RootContext;

/// Test driver around a [`RootContext`].
#[derive(Debug)]
pub struct RootSimulator {
    root: RootContext,
    /// Every command executed so far.
    commands: Vec<CommandRecord>,
}

impl RootSimulator {
    /// Load `document` with no data and the default configuration.
    pub fn load(document: &str) -> DocumentResult<Self> {
        Self::load_with(document, Value::Null, RootConfig::new())
    }

    /// Load `document` with `data` and `config`; command recording is forced on.
    pub fn load_with(document: &str, data: Value, config: RootConfig) -> DocumentResult<Self> {
        let root = RootContext::new(document, data, config.record_commands(true))?;
        Ok(Self {
            root,
            commands: Vec::new(),
        })
    }

    pub fn root(&self) -> &RootContext {
        &self.root
    }

    pub fn root_mut(&mut self) -> &mut RootContext {
        &mut self.root
    }

    /// Press the component with `id`. Unknown ids return an empty reference.
    pub fn press(&mut self, id: &str) -> ActionRef {
        match self.root.find_component_by_id(id) {
            Some(uid) => self.root.press(uid),
            None => ActionRef::empty(),
        }
    }

    /// Run `commands` in normal mode.
    pub fn execute(&mut self, commands: &Value) -> ActionRef {
        self.root.execute_commands(commands, false)
    }

    /// Run `commands` in fast mode.
    pub fn execute_fast(&mut self, commands: &Value) -> ActionRef {
        self.root.execute_commands(commands, true)
    }

    /// Advance the fake clock by `millis`.
    pub fn advance_time(&mut self, millis: u64) {
        self.root.advance_time(Duration::from_millis(millis));
    }

    pub fn advance_to_end(&mut self) {
        self.root.advance_to_end();
    }

    pub fn now(&self) -> Duration {
        self.root.current_time()
    }

    pub fn has_event(&mut self) -> bool {
        self.root.has_event()
    }

    /// Pop the next event, if any.
    pub fn next_event(&mut self) -> Option<Event> {
        self.root.has_event().then(|| self.root.pop_event())
    }

    /// Take every pending event.
    pub fn drain_events(&mut self) -> Vec<Event> {
        let mut out = Vec::new();
        while let Some(event) = self.next_event() {
            out.push(event);
        }
        out
    }

    /// Pop the next event and check it is a SendEvent carrying `arguments`.
    pub fn check_send_event(&mut self, arguments: &Value) -> bool {
        self.next_event().is_some_and(|event| {
            event.kind() == EventType::SendEvent
                && event.value(EventProperty::Arguments) == Some(arguments)
        })
    }

    /// Executed commands, oldest first.
    pub fn command_log(&mut self) -> &[CommandRecord] {
        self.commands.extend(self.root.take_command_log());
        &self.commands
    }

    /// How many times a command named `name` executed.
    pub fn command_count(&mut self, name: &str) -> usize {
        self.command_log().iter().filter(|r| r.name == name).count()
    }

    pub fn clear_command_log(&mut self) {
        self.root.take_command_log();
        self.commands.clear();
    }

    /// True if any console message contains `needle`.
    pub fn console_contains(&self, needle: &str) -> bool {
        self.root
            .console_messages()
            .iter()
            .any(|m| m.text.contains(needle))
    }

    /// Take the console messages as plain text.
    pub fn take_console(&mut self) -> Vec<String> {
        self.root
            .take_console_messages()
            .into_iter()
            .map(|m| m.text)
            .collect()
    }
}
