#![forbid(unsafe_code)]

//! Name to command lookup.
//!
//! Built-in and extension names are matched case-insensitively. Document
//! macros are not registered here: they are looked up case-sensitively in
//! the document only after the registry misses.

use std::collections::HashMap;
use std::rc::Rc;

use super::{CommandType, ExtensionCommandDefinition};

/// What a command name resolved to.
#[derive(Debug, Clone)]
pub enum CommandKind {
    Builtin(CommandType),
    Extension(Rc<ExtensionCommandDefinition>),
}

#[derive(Debug, Clone)]
pub struct CommandRegistry {
    by_name: HashMap<String, CommandKind>,
}

impl Default for CommandRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl CommandRegistry {
    /// A registry holding every built-in command.
    pub fn with_builtins() -> Self {
        let by_name = CommandType::ALL
            .iter()
            .map(|t| (t.name().to_ascii_lowercase(), CommandKind::Builtin(*t)))
            .collect();
        Self { by_name }
    }

    /// Register an extension command, `uri:name` qualified and by bare name.
    ///
    /// A bare name never shadows a built-in.
    pub fn register_extension(&mut self, definition: ExtensionCommandDefinition) {
        let definition = Rc::new(definition);
        let qualified = format!("{}:{}", definition.uri(), definition.name()).to_ascii_lowercase();
        self.by_name
            .insert(qualified, CommandKind::Extension(Rc::clone(&definition)));
        let bare = definition.name().to_ascii_lowercase();
        if !matches!(self.by_name.get(&bare), Some(CommandKind::Builtin(_))) {
            self.by_name.insert(bare, CommandKind::Extension(definition));
        }
    }

    pub fn lookup(&self, name: &str) -> Option<&CommandKind> {
        self.by_name.get(&name.to_ascii_lowercase())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtins_are_case_insensitive() {
        let registry = CommandRegistry::with_builtins();
        assert!(matches!(
            registry.lookup("sendevent"),
            Some(CommandKind::Builtin(CommandType::SendEvent))
        ));
        assert!(matches!(
            registry.lookup("OPENURL"),
            Some(CommandKind::Builtin(CommandType::OpenUrl))
        ));
        assert!(registry.lookup("Launch").is_none());
    }

    #[test]
    fn extensions_never_shadow_builtins() {
        let mut registry = CommandRegistry::with_builtins();
        registry.register_extension(ExtensionCommandDefinition::new("aplext:x", "Idle"));
        registry.register_extension(ExtensionCommandDefinition::new("aplext:x", "Ping"));
        assert!(matches!(
            registry.lookup("Idle"),
            Some(CommandKind::Builtin(CommandType::Idle))
        ));
        assert!(matches!(registry.lookup("aplext:x:Idle"), Some(CommandKind::Extension(_))));
        assert!(matches!(registry.lookup("ping"), Some(CommandKind::Extension(_))));
    }
}
