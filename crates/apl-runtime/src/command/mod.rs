#![forbid(unsafe_code)]

//! Command type table.
//!
//! Built-in commands form a closed set ([`CommandType`]). Each type declares
//! its required properties, whether it acts on a target component, and
//! whether it may run in fast mode. Hosts extend the set with
//! [`ExtensionCommandDefinition`]s, and documents with macros; both are
//! resolved through the [`CommandRegistry`].

mod registry;

use std::time::Duration;

use serde_json::Value;

pub use registry::{CommandKind, CommandRegistry};

/// How a command finds the component it acts on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetRule {
    /// The command never touches a component.
    Untargeted,
    /// `componentId`, falling back to the handler's base component. Required.
    Targeted,
}

macro_rules! command_table {
    ($($variant:ident => $text:literal, target: $target:ident, fast: $fast:literal, required: [$($req:literal),*];)+) => {
        /// Built-in command types.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum CommandType {
            $($variant),+
        }

        impl CommandType {
            pub const ALL: &'static [CommandType] = &[$(CommandType::$variant),+];

            /// Canonical name, as written in documents.
            pub const fn name(self) -> &'static str {
                match self {
                    $(CommandType::$variant => $text),+
                }
            }

            /// Properties the command cannot run without.
            pub const fn required_properties(self) -> &'static [&'static str] {
                match self {
                    $(CommandType::$variant => &[$($req),*]),+
                }
            }

            pub const fn target_rule(self) -> TargetRule {
                match self {
                    $(CommandType::$variant => TargetRule::$target),+
                }
            }

            /// False for commands that need a real host round-trip.
            ///
            /// ControlMedia is allowed here; only its `play` sub-command is
            /// refused, which depends on the command's properties.
            pub const fn allowed_in_fast_mode(self) -> bool {
                match self {
                    $(CommandType::$variant => $fast),+
                }
            }
        }
    };
}

command_table! {
    AutoPage => "AutoPage", target: Targeted, fast: true, required: [];
    ClearFocus => "ClearFocus", target: Untargeted, fast: true, required: [];
    ControlMedia => "ControlMedia", target: Targeted, fast: true, required: ["command"];
    Finish => "Finish", target: Untargeted, fast: true, required: [];
    Idle => "Idle", target: Untargeted, fast: true, required: [];
    InsertItem => "InsertItem", target: Targeted, fast: true, required: [];
    Log => "Log", target: Untargeted, fast: true, required: [];
    OpenUrl => "OpenURL", target: Untargeted, fast: false, required: ["source"];
    Parallel => "Parallel", target: Untargeted, fast: true, required: ["commands"];
    PlayMedia => "PlayMedia", target: Targeted, fast: false, required: ["source"];
    Reinflate => "Reinflate", target: Untargeted, fast: false, required: [];
    RemoveItem => "RemoveItem", target: Targeted, fast: true, required: [];
    Select => "Select", target: Untargeted, fast: true, required: ["commands"];
    SendEvent => "SendEvent", target: Untargeted, fast: false, required: [];
    Sequential => "Sequential", target: Untargeted, fast: true, required: ["commands"];
    SetFocus => "SetFocus", target: Targeted, fast: true, required: [];
    SetPage => "SetPage", target: Targeted, fast: true, required: ["value"];
    SetState => "SetState", target: Targeted, fast: true, required: ["state", "value"];
    SetValue => "SetValue", target: Targeted, fast: true, required: ["property", "value"];
    SpeakItem => "SpeakItem", target: Targeted, fast: false, required: [];
}

/// One property accepted by an extension command.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtensionProperty {
    pub name: String,
    pub default: Value,
    pub required: bool,
}

/// A host-defined command, delivered to the host as an `Extension` event.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtensionCommandDefinition {
    uri: String,
    name: String,
    allow_fast_mode: bool,
    require_resolution: bool,
    properties: Vec<ExtensionProperty>,
}

impl ExtensionCommandDefinition {
    pub fn new(uri: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            name: name.into(),
            allow_fast_mode: false,
            require_resolution: false,
            properties: Vec::new(),
        }
    }

    #[must_use]
    pub fn allow_fast_mode(mut self, allow: bool) -> Self {
        self.allow_fast_mode = allow;
        self
    }

    /// Attach an ActionRef the host must resolve (normal mode only).
    #[must_use]
    pub fn require_resolution(mut self, require: bool) -> Self {
        self.require_resolution = require;
        self
    }

    #[must_use]
    pub fn property(mut self, name: impl Into<String>, default: Value, required: bool) -> Self {
        self.properties.push(ExtensionProperty {
            name: name.into(),
            default,
            required,
        });
        self
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn allows_fast_mode(&self) -> bool {
        self.allow_fast_mode
    }

    pub fn requires_resolution(&self) -> bool {
        self.require_resolution
    }

    pub fn properties(&self) -> &[ExtensionProperty] {
        &self.properties
    }
}

/// One executed command, kept when command recording is on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandRecord {
    pub name: String,
    pub fast: bool,
    /// Fake-clock time at which the command ran.
    pub time: Duration,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_is_consistent() {
        assert_eq!(CommandType::ALL.len(), 20);
        assert_eq!(CommandType::OpenUrl.name(), "OpenURL");
        assert_eq!(CommandType::SetValue.required_properties(), ["property", "value"]);
        assert_eq!(CommandType::Sequential.target_rule(), TargetRule::Untargeted);
        assert!(!CommandType::SendEvent.allowed_in_fast_mode());
        assert!(CommandType::ControlMedia.allowed_in_fast_mode());
    }

    #[test]
    fn extension_builder() {
        let def = ExtensionCommandDefinition::new("aplext:test", "Ping")
            .allow_fast_mode(true)
            .property("count", Value::from(1), false)
            .property("target", Value::Null, true);
        assert_eq!(def.uri(), "aplext:test");
        assert!(def.allows_fast_mode());
        assert!(!def.requires_resolution());
        assert_eq!(def.properties().len(), 2);
        assert!(def.properties()[1].required);
    }
}
