#![forbid(unsafe_code)]

//! Outbound events and the FIFO queue that carries them to the host.
//!
//! An [`Event`] is the only channel from the engine to the host renderer.
//! Events come in two flavours:
//!
//! - **asynchronous**: no [`ActionRef`]; the host just observes it.
//! - **synchronous**: carries an [`ActionRef`] the host must eventually
//!   resolve, or the command that issued it stays pending forever.
//!
//! # Wire Shape
//!
//! [`Event::serialize`] produces `{"type": <name>, "properties": {...}}` plus
//! a `"component"` uid when the event targets one. Type and property names go
//! through bidirectional name tables ([`EventType::name`] /
//! [`EventType::from_name`], and the same for [`EventProperty`]).

use std::collections::{BTreeMap, VecDeque};
use std::fmt;

use serde_json::{Map, Value};

use crate::action::ActionRef;

/// Stable unique identifier of a component. Rendered as `:N`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ComponentId(pub u64);

impl fmt::Display for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, ":{}", self.0)
    }
}

impl ComponentId {
    /// Parse the `:N` form.
    pub fn parse(text: &str) -> Option<Self> {
        text.strip_prefix(':')?.parse().ok().map(ComponentId)
    }
}

macro_rules! name_table {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            /// Every variant, in declaration order.
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            /// Wire name.
            pub const fn name(self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }

            /// Reverse lookup of [`Self::name`].
            pub fn from_name(text: &str) -> Option<Self> {
                match text {
                    $($text => Some($name::$variant),)+
                    _ => None,
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.name())
            }
        }
    };
}

name_table! {
    /// Kind of an outbound event.
    EventType {
        ControlMedia => "ControlMedia",
        Extension => "Extension",
        Finish => "Finish",
        Focus => "Focus",
        MediaRequest => "MediaRequest",
        OpenUrl => "OpenURL",
        PlayMedia => "PlayMedia",
        Reinflate => "Reinflate",
        SendEvent => "SendEvent",
        Speak => "Speak",
    }
}

name_table! {
    /// Property key carried by an event.
    EventProperty {
        Align => "align",
        Arguments => "arguments",
        AudioTrack => "audioTrack",
        Command => "command",
        Components => "components",
        ExtensionUri => "extensionURI",
        Flags => "flags",
        Headers => "headers",
        HighlightMode => "highlightMode",
        MediaType => "mediaType",
        Name => "name",
        Reason => "reason",
        Source => "source",
        Value => "value",
    }
}

/// An outbound, host-observed notification.
#[derive(Clone)]
pub struct Event {
    kind: EventType,
    properties: BTreeMap<EventProperty, Value>,
    component: Option<ComponentId>,
    action: ActionRef,
}

impl Event {
    /// Create an event with no properties, component or action.
    pub fn new(kind: EventType) -> Self {
        Self {
            kind,
            properties: BTreeMap::new(),
            component: None,
            action: ActionRef::empty(),
        }
    }

    /// Set a property.
    #[must_use]
    pub fn with(mut self, key: EventProperty, value: Value) -> Self {
        self.properties.insert(key, value);
        self
    }

    /// Attach the component the event refers to.
    #[must_use]
    pub fn with_component(mut self, component: Option<ComponentId>) -> Self {
        self.component = component;
        self
    }

    /// Attach the action the host must resolve.
    #[must_use]
    pub fn with_action(mut self, action: ActionRef) -> Self {
        self.action = action;
        self
    }

    pub fn kind(&self) -> EventType {
        self.kind
    }

    pub fn value(&self, key: EventProperty) -> Option<&Value> {
        self.properties.get(&key)
    }

    pub fn properties(&self) -> &BTreeMap<EventProperty, Value> {
        &self.properties
    }

    pub fn component(&self) -> Option<ComponentId> {
        self.component
    }

    /// Action handle; empty for asynchronous events.
    pub fn action_ref(&self) -> &ActionRef {
        &self.action
    }

    /// True if the host must resolve [`Self::action_ref`].
    pub fn is_synchronous(&self) -> bool {
        !self.action.is_empty()
    }

    /// Approximate equality used by tests: type, properties and component.
    /// The action handle is ignored.
    pub fn matches(&self, other: &Event) -> bool {
        self.kind == other.kind
            && self.properties == other.properties
            && self.component == other.component
    }

    /// Host wire representation.
    pub fn serialize(&self) -> Value {
        let properties: Map<String, Value> = self
            .properties
            .iter()
            .map(|(k, v)| (k.name().to_owned(), v.clone()))
            .collect();
        let mut out = Map::new();
        out.insert("type".into(), Value::String(self.kind.name().to_owned()));
        out.insert("properties".into(), Value::Object(properties));
        if let Some(component) = self.component {
            out.insert("component".into(), Value::String(component.to_string()));
        }
        Value::Object(out)
    }
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event")
            .field("kind", &self.kind)
            .field("properties", &self.properties)
            .field("component", &self.component)
            .field("action", &self.action)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// EventQueue
// ---------------------------------------------------------------------------

/// Strict FIFO of outbound events (the event manager).
///
/// No reordering or coalescing: every pushed event is observed exactly once,
/// in push order.
#[derive(Debug, Default)]
pub struct EventQueue {
    queue: VecDeque<Event>,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, event: Event) {
        crate::trace!(kind = event.kind().name(), "event queued");
        self.queue.push_back(event);
    }

    /// Oldest event.
    ///
    /// # Panics
    ///
    /// Panics if the queue is empty. Check [`Self::is_empty`] first.
    pub fn front(&self) -> &Event {
        self.queue.front().expect("EventQueue::front on an empty queue")
    }

    /// Remove and return the oldest event.
    ///
    /// # Panics
    ///
    /// Panics if the queue is empty. Check [`Self::is_empty`] first.
    pub fn pop(&mut self) -> Event {
        self.queue.pop_front().expect("EventQueue::pop on an empty queue")
    }

    /// Remove the oldest event if there is one.
    pub fn try_pop(&mut self) -> Option<Event> {
        self.queue.pop_front()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Discard every pending event.
    pub fn clear(&mut self) {
        self.queue.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn name_tables_round_trip() {
        for kind in EventType::ALL {
            assert_eq!(EventType::from_name(kind.name()), Some(*kind));
        }
        for key in EventProperty::ALL {
            assert_eq!(EventProperty::from_name(key.name()), Some(*key));
        }
        assert_eq!(EventType::from_name("openurl"), None);
    }

    #[test]
    fn queue_is_fifo() {
        let mut queue = EventQueue::new();
        assert!(queue.is_empty());
        queue.push(Event::new(EventType::Finish).with(EventProperty::Reason, json!("exit")));
        queue.push(Event::new(EventType::Focus));
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.pop().kind(), EventType::Finish);
        assert_eq!(queue.front().kind(), EventType::Focus);
        assert_eq!(queue.pop().kind(), EventType::Focus);
        assert!(queue.is_empty());
        assert!(queue.try_pop().is_none());
    }

    #[test]
    #[should_panic(expected = "empty queue")]
    fn pop_on_empty_queue_panics() {
        EventQueue::new().pop();
    }

    #[test]
    fn serialize_uses_wire_names() {
        let event = Event::new(EventType::OpenUrl)
            .with(EventProperty::Source, json!("http://x"))
            .with_component(Some(ComponentId(7)));
        assert_eq!(
            event.serialize(),
            json!({"type": "OpenURL", "properties": {"source": "http://x"}, "component": ":7"})
        );
        assert!(!event.is_synchronous());
        assert_eq!(ComponentId::parse(":7"), Some(ComponentId(7)));
    }
}
