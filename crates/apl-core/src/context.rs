#![forbid(unsafe_code)]

//! Scoped data-binding context.
//!
//! A [`DataContext`] is an immutable chain of binding frames. Layering a new
//! frame never mutates the parent, so a context captured by a pending command
//! keeps seeing exactly the bindings it was created with, even after the
//! handler that created it has returned.
//!
//! Cloning is cheap (one `Rc` bump).

use std::fmt;
use std::rc::Rc;

use serde_json::{Map, Value};

struct Frame {
    bindings: Map<String, Value>,
    parent: Option<Rc<Frame>>,
}

/// An immutable, shareable scope of name to value bindings.
#[derive(Clone, Default)]
pub struct DataContext {
    top: Option<Rc<Frame>>,
}

impl DataContext {
    /// Create an empty context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Layer a single binding on top of this context.
    #[must_use]
    pub fn with(&self, name: impl Into<String>, value: Value) -> Self {
        let mut bindings = Map::new();
        bindings.insert(name.into(), value);
        self.extend(bindings)
    }

    /// Layer a frame of bindings on top of this context.
    #[must_use]
    pub fn extend(&self, bindings: Map<String, Value>) -> Self {
        Self {
            top: Some(Rc::new(Frame {
                bindings,
                parent: self.top.clone(),
            })),
        }
    }

    /// Look up `name`, innermost frame first.
    pub fn lookup(&self, name: &str) -> Option<&Value> {
        let mut frame = self.top.as_deref();
        while let Some(f) = frame {
            if let Some(value) = f.bindings.get(name) {
                return Some(value);
            }
            frame = f.parent.as_deref();
        }
        None
    }

    /// True if `name` is bound in any frame.
    pub fn contains(&self, name: &str) -> bool {
        self.lookup(name).is_some()
    }

    /// Number of frames in the chain.
    pub fn depth(&self) -> usize {
        let mut depth = 0;
        let mut frame = self.top.as_deref();
        while let Some(f) = frame {
            depth += 1;
            frame = f.parent.as_deref();
        }
        depth
    }
}

impl fmt::Debug for DataContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names = Vec::new();
        let mut frame = self.top.as_deref();
        while let Some(fr) = frame {
            names.extend(fr.bindings.keys().map(String::as_str));
            frame = fr.parent.as_deref();
        }
        f.debug_struct("DataContext")
            .field("depth", &self.depth())
            .field("names", &names)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn inner_binding_shadows_outer() {
        let outer = DataContext::new().with("x", json!(1));
        let inner = outer.with("x", json!(2));
        assert_eq!(inner.lookup("x"), Some(&json!(2)));
        assert_eq!(outer.lookup("x"), Some(&json!(1)));
        assert_eq!(inner.depth(), 2);
    }

    #[test]
    fn missing_name_is_none() {
        let ctx = DataContext::new().with("a", Value::Null);
        assert!(ctx.contains("a"));
        assert!(!ctx.contains("b"));
        assert_eq!(DataContext::new().depth(), 0);
    }
}
