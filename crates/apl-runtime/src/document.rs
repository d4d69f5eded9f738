#![forbid(unsafe_code)]

//! Document parsing and the macro table.
//!
//! Only the parts of a document the command engine needs are modelled: the
//! main template (its parameters and top-level item) and the `commands`
//! section of user-defined macros.

use std::collections::HashMap;
use std::fmt;

use serde_json::Value;

/// Failure to load a document.
#[derive(Debug)]
pub enum DocumentError {
    Json(serde_json::Error),
    MissingMainTemplate,
    /// The main template did not inflate to a component.
    NoComponent,
    InvalidMacro(String),
}

impl fmt::Display for DocumentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DocumentError::Json(e) => write!(f, "invalid document JSON: {e}"),
            DocumentError::MissingMainTemplate => write!(f, "document has no mainTemplate"),
            DocumentError::NoComponent => write!(f, "mainTemplate did not inflate a component"),
            DocumentError::InvalidMacro(name) => write!(f, "invalid command macro '{name}'"),
        }
    }
}

impl std::error::Error for DocumentError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DocumentError::Json(e) => Some(e),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for DocumentError {
    fn from(e: serde_json::Error) -> Self {
        DocumentError::Json(e)
    }
}

pub type DocumentResult<T> = Result<T, DocumentError>;

/// One macro parameter and its default value.
#[derive(Debug, Clone, PartialEq)]
pub struct MacroParameter {
    pub name: String,
    pub default: Value,
}

/// A user-defined command from the document's `commands` section.
#[derive(Debug, Clone, PartialEq)]
pub struct MacroDefinition {
    pub name: String,
    pub parameters: Vec<MacroParameter>,
    /// Body: one command or an array of commands.
    pub commands: Value,
}

/// A parsed document.
#[derive(Debug, Clone)]
pub struct Document {
    parameters: Vec<String>,
    main_template: Value,
    macros: HashMap<String, MacroDefinition>,
}

impl Document {
    /// Parse document text.
    pub fn from_json_str(text: &str) -> DocumentResult<Self> {
        let json: Value = serde_json::from_str(text)?;
        Self::parse(&json)
    }

    /// Parse an already-decoded document.
    pub fn parse(json: &Value) -> DocumentResult<Self> {
        let main_template = json
            .get("mainTemplate")
            .filter(|t| t.is_object())
            .ok_or(DocumentError::MissingMainTemplate)?
            .clone();

        let parameters = match main_template.get("parameters") {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_owned)
                .collect(),
            Some(Value::String(name)) => vec![name.clone()],
            _ => Vec::new(),
        };

        let mut macros = HashMap::new();
        if let Some(Value::Object(section)) = json.get("commands") {
            for (name, body) in section {
                macros.insert(name.clone(), parse_macro(name, body)?);
            }
        }

        Ok(Self {
            parameters,
            main_template,
            macros,
        })
    }

    /// Main template parameter names; the first binds the host data.
    pub fn parameters(&self) -> &[String] {
        &self.parameters
    }

    pub fn main_template(&self) -> &Value {
        &self.main_template
    }

    /// Look up a macro by its exact (case-sensitive) name.
    pub fn macro_named(&self, name: &str) -> Option<&MacroDefinition> {
        self.macros.get(name)
    }

    pub fn macro_count(&self) -> usize {
        self.macros.len()
    }
}

fn parse_macro(name: &str, body: &Value) -> DocumentResult<MacroDefinition> {
    let invalid = || DocumentError::InvalidMacro(name.to_owned());
    let Value::Object(body) = body else {
        return Err(invalid());
    };
    let commands = body.get("commands").cloned().ok_or_else(invalid)?;
    if !(commands.is_array() || commands.is_object()) {
        return Err(invalid());
    }
    let mut parameters = Vec::new();
    if let Some(list) = body.get("parameters") {
        let Value::Array(list) = list else {
            return Err(invalid());
        };
        for entry in list {
            let parameter = match entry {
                Value::String(p) => MacroParameter {
                    name: p.clone(),
                    default: Value::Null,
                },
                Value::Object(p) => MacroParameter {
                    name: p
                        .get("name")
                        .and_then(Value::as_str)
                        .ok_or_else(invalid)?
                        .to_owned(),
                    default: p.get("default").cloned().unwrap_or(Value::Null),
                },
                _ => return Err(invalid()),
            };
            parameters.push(parameter);
        }
    }
    Ok(MacroDefinition {
        name: name.to_owned(),
        parameters,
        commands,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_parameters_and_macros() {
        let doc = Document::parse(&json!({
            "type": "APL",
            "mainTemplate": {"parameters": ["payload"], "item": {"type": "Text"}},
            "commands": {
                "Greet": {
                    "parameters": ["who", {"name": "punct", "default": "!"}],
                    "commands": [{"type": "SendEvent", "arguments": ["${who}${punct}"]}]
                }
            }
        }))
        .expect("valid document");
        assert_eq!(doc.parameters(), ["payload".to_owned()]);
        let greet = doc.macro_named("Greet").expect("macro");
        assert_eq!(greet.parameters[1].default, json!("!"));
        assert!(doc.macro_named("greet").is_none());
    }

    #[test]
    fn missing_main_template_is_an_error() {
        let err = Document::parse(&json!({"type": "APL"})).unwrap_err();
        assert!(matches!(err, DocumentError::MissingMainTemplate));
    }

    #[test]
    fn macro_without_commands_is_invalid() {
        let err = Document::parse(&json!({
            "mainTemplate": {"item": {"type": "Text"}},
            "commands": {"Broken": {"parameters": []}}
        }))
        .unwrap_err();
        assert_eq!(err.to_string(), "invalid command macro 'Broken'");
    }

    #[test]
    fn bad_json_is_reported() {
        assert!(matches!(
            Document::from_json_str("{not json").unwrap_err(),
            DocumentError::Json(_)
        ));
    }
}
