#![forbid(unsafe_code)]

//! Component arena.
//!
//! Components live in a [`ComponentTree`] keyed by [`ComponentId`]. Parents
//! own children by id and children point back at their parent by id, so a
//! command holding a target id across a suspension point simply looks it up
//! again when it resumes; a removed target is a `None`, never a dangling
//! reference.

use std::collections::HashMap;
use std::fmt;

use apl_core::action::ActionId;
use apl_core::context::DataContext;
use apl_core::event::ComponentId;
use apl_core::media::{MediaObjectPtr, MediaState};
use bitflags::bitflags;
use serde_json::{Map, Value, json};

use crate::media_player::MediaPlayer;

bitflags! {
    /// Boolean component states settable by SetState.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ComponentStates: u8 {
        const CHECKED = 1 << 0;
        const DISABLED = 1 << 1;
        const FOCUSED = 1 << 2;
        const PRESSED = 1 << 3;
        const KARAOKE = 1 << 4;
    }
}

impl ComponentStates {
    /// Parse a state name as used by SetState.
    pub fn from_state_name(name: &str) -> Option<Self> {
        match name {
            "checked" => Some(Self::CHECKED),
            "disabled" => Some(Self::DISABLED),
            "focused" => Some(Self::FOCUSED),
            "pressed" => Some(Self::PRESSED),
            "karaoke" => Some(Self::KARAOKE),
            _ => None,
        }
    }
}

/// How many children a component kind accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildPolicy {
    None,
    Single,
    Multiple,
}

/// Closed set of component types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComponentKind {
    Container,
    EditText,
    Frame,
    Image,
    Pager,
    Sequence,
    Text,
    TouchWrapper,
    VectorGraphic,
    Video,
}

impl ComponentKind {
    pub const fn name(self) -> &'static str {
        match self {
            ComponentKind::Container => "Container",
            ComponentKind::EditText => "EditText",
            ComponentKind::Frame => "Frame",
            ComponentKind::Image => "Image",
            ComponentKind::Pager => "Pager",
            ComponentKind::Sequence => "Sequence",
            ComponentKind::Text => "Text",
            ComponentKind::TouchWrapper => "TouchWrapper",
            ComponentKind::VectorGraphic => "VectorGraphic",
            ComponentKind::Video => "Video",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "Container" => Some(ComponentKind::Container),
            "EditText" => Some(ComponentKind::EditText),
            "Frame" => Some(ComponentKind::Frame),
            "Image" => Some(ComponentKind::Image),
            "Pager" => Some(ComponentKind::Pager),
            "Sequence" => Some(ComponentKind::Sequence),
            "Text" => Some(ComponentKind::Text),
            "TouchWrapper" => Some(ComponentKind::TouchWrapper),
            "VectorGraphic" => Some(ComponentKind::VectorGraphic),
            "Video" => Some(ComponentKind::Video),
            _ => None,
        }
    }

    pub const fn child_policy(self) -> ChildPolicy {
        match self {
            ComponentKind::Container | ComponentKind::Pager | ComponentKind::Sequence => {
                ChildPolicy::Multiple
            }
            ComponentKind::Frame | ComponentKind::TouchWrapper => ChildPolicy::Single,
            _ => ChildPolicy::None,
        }
    }

    /// Kinds that can take keyboard focus.
    pub const fn is_focusable(self) -> bool {
        matches!(
            self,
            ComponentKind::TouchWrapper
                | ComponentKind::Pager
                | ComponentKind::Sequence
                | ComponentKind::EditText
        )
    }

    /// Properties SetValue may change at runtime, besides the common ones.
    fn settable(self) -> &'static [&'static str] {
        match self {
            ComponentKind::Text => &["text", "color"],
            ComponentKind::EditText => &["text", "color", "hint"],
            ComponentKind::Image => &["source", "overlayColor", "align", "scale"],
            ComponentKind::VectorGraphic => &["source", "align", "scale"],
            ComponentKind::Video => &["source", "audioTrack"],
            ComponentKind::Frame => &["backgroundColor", "borderColor", "borderWidth"],
            _ => &[],
        }
    }
}

const COMMON_SETTABLE: &[&str] = &[
    "opacity",
    "display",
    "accessibilityLabel",
    "speech",
    "width",
    "height",
];

/// One inflated component.
pub struct Component {
    pub(crate) uid: ComponentId,
    pub(crate) id: Option<String>,
    pub(crate) kind: ComponentKind,
    pub(crate) props: Map<String, Value>,
    pub(crate) handlers: Map<String, Value>,
    pub(crate) context: DataContext,
    pub(crate) parent: Option<ComponentId>,
    pub(crate) children: Vec<ComponentId>,
    pub(crate) states: ComponentStates,
    pub(crate) inherit_parent_state: bool,
    pub(crate) data_driven: bool,
    pub(crate) media: Vec<MediaObjectPtr>,
    pub(crate) media_state: MediaState,
    pub(crate) player: Option<Box<dyn MediaPlayer>>,
    pub(crate) current_page: usize,
    pub(crate) page_action: Option<ActionId>,
    pub(crate) speech_action: Option<ActionId>,
}

impl fmt::Debug for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Component")
            .field("uid", &self.uid)
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("states", &self.states)
            .field("children", &self.children)
            .finish_non_exhaustive()
    }
}

impl Component {
    pub(crate) fn new(uid: ComponentId, kind: ComponentKind, context: DataContext) -> Self {
        Self {
            uid,
            id: None,
            kind,
            props: Map::new(),
            handlers: Map::new(),
            context,
            parent: None,
            children: Vec::new(),
            states: ComponentStates::empty(),
            inherit_parent_state: false,
            data_driven: false,
            media: Vec::new(),
            media_state: MediaState::Pending,
            player: None,
            current_page: 0,
            page_action: None,
            speech_action: None,
        }
    }

    pub fn uid(&self) -> ComponentId {
        self.uid
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn kind(&self) -> ComponentKind {
        self.kind
    }

    /// Evaluated property value.
    pub fn prop(&self, name: &str) -> Option<&Value> {
        self.props.get(name)
    }

    /// Raw (unevaluated) handler commands, e.g. `onPress`.
    pub fn handler(&self, name: &str) -> Option<&Value> {
        self.handlers.get(name)
    }

    pub fn states(&self) -> ComponentStates {
        self.states
    }

    pub fn has_state(&self, state: ComponentStates) -> bool {
        self.states.contains(state)
    }

    pub fn parent(&self) -> Option<ComponentId> {
        self.parent
    }

    pub fn children(&self) -> &[ComponentId] {
        &self.children
    }

    pub fn inherits_parent_state(&self) -> bool {
        self.inherit_parent_state
    }

    /// True if children come from `data` inflation.
    pub fn is_data_driven(&self) -> bool {
        self.data_driven
    }

    pub fn current_page(&self) -> usize {
        self.current_page
    }

    pub fn media_objects(&self) -> &[MediaObjectPtr] {
        &self.media
    }

    /// Aggregate state: Error if any object failed, Ready if all are ready.
    pub fn aggregate_media_state(&self) -> MediaState {
        if self.media.iter().any(|m| m.state() == MediaState::Error) {
            MediaState::Error
        } else if !self.media.is_empty() && self.media.iter().all(|m| m.state() == MediaState::Ready)
        {
            MediaState::Ready
        } else {
            MediaState::Pending
        }
    }

    pub fn player(&self) -> Option<&dyn MediaPlayer> {
        self.player.as_deref()
    }

    /// Pending page-turn action, if a transition is running.
    pub fn page_action(&self) -> Option<ActionId> {
        self.page_action
    }

    pub(crate) fn can_set(&self, property: &str) -> bool {
        COMMON_SETTABLE.contains(&property) || self.kind.settable().contains(&property)
    }

    /// Number of media sources (for ControlMedia `setTrack` bounds).
    pub fn source_count(&self) -> usize {
        match self.props.get("source") {
            Some(Value::Array(items)) => items.len(),
            Some(Value::Null) | None => 0,
            Some(_) => 1,
        }
    }

    /// Kind-specific value reported in `event.source.value`.
    pub fn value(&self) -> Value {
        match self.kind {
            ComponentKind::TouchWrapper => Value::Bool(self.has_state(ComponentStates::CHECKED)),
            ComponentKind::Pager => json!(self.current_page),
            ComponentKind::Text | ComponentKind::EditText => {
                self.props.get("text").cloned().unwrap_or(Value::Null)
            }
            ComponentKind::Image | ComponentKind::VectorGraphic | ComponentKind::Video => {
                self.props.get("source").cloned().unwrap_or(Value::Null)
            }
            _ => Value::Null,
        }
    }

    /// Snapshot bound as `event.target` and used in SendEvent `components`.
    pub fn snapshot(&self) -> Value {
        let mut map = self.props.clone();
        map.entry("opacity").or_insert(json!(1));
        map.insert("id".into(), self.id.clone().map_or(Value::Null, Value::String));
        map.insert("uid".into(), Value::String(self.uid.to_string()));
        map.insert("type".into(), Value::String(self.kind.name().to_owned()));
        self.insert_states(&mut map);
        map.insert("value".into(), self.value());
        if self.kind == ComponentKind::Pager {
            map.insert("page".into(), json!(self.current_page));
        }
        Value::Object(map)
    }

    /// `event.source` for a handler running on this component.
    pub fn source_map(&self, handler: &str) -> Value {
        let mut map = Map::new();
        map.insert("source".into(), Value::String(self.kind.name().to_owned()));
        map.insert("type".into(), Value::String(self.kind.name().to_owned()));
        map.insert("handler".into(), Value::String(handler.to_owned()));
        map.insert("id".into(), self.id.clone().map_or(Value::Null, Value::String));
        map.insert("uid".into(), Value::String(self.uid.to_string()));
        self.insert_states(&mut map);
        map.insert("value".into(), self.value());
        Value::Object(map)
    }

    fn insert_states(&self, map: &mut Map<String, Value>) {
        for (name, state) in [
            ("checked", ComponentStates::CHECKED),
            ("disabled", ComponentStates::DISABLED),
            ("focused", ComponentStates::FOCUSED),
            ("pressed", ComponentStates::PRESSED),
        ] {
            map.insert(name.into(), Value::Bool(self.has_state(state)));
        }
    }
}

// ---------------------------------------------------------------------------
// Tree
// ---------------------------------------------------------------------------

/// Arena of live components.
#[derive(Debug, Default)]
pub struct ComponentTree {
    nodes: HashMap<ComponentId, Component>,
    root: Option<ComponentId>,
    next_uid: u64,
}

impl ComponentTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn alloc_uid(&mut self) -> ComponentId {
        self.next_uid += 1;
        ComponentId(self.next_uid)
    }

    pub(crate) fn insert(&mut self, component: Component) {
        self.nodes.insert(component.uid, component);
    }

    pub(crate) fn set_root(&mut self, uid: ComponentId) {
        self.root = Some(uid);
    }

    pub fn root(&self) -> Option<ComponentId> {
        self.root
    }

    pub fn get(&self, uid: ComponentId) -> Option<&Component> {
        self.nodes.get(&uid)
    }

    pub(crate) fn get_mut(&mut self, uid: ComponentId) -> Option<&mut Component> {
        self.nodes.get_mut(&uid)
    }

    pub fn contains(&self, uid: ComponentId) -> bool {
        self.nodes.contains_key(&uid)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// First component with `id`, in document (depth-first) order.
    pub fn find_by_id(&self, id: &str) -> Option<ComponentId> {
        self.root
            .and_then(|root| self.descendants(root).into_iter().find(|uid| {
                self.nodes.get(uid).and_then(Component::id) == Some(id)
            }))
    }

    /// Resolve a `componentId` value: an `id` first, then a `:N` uid.
    pub fn resolve(&self, text: &str) -> Option<ComponentId> {
        self.find_by_id(text)
            .or_else(|| ComponentId::parse(text).filter(|uid| self.contains(*uid)))
    }

    /// `uid` and everything below it, pre-order.
    pub fn descendants(&self, uid: ComponentId) -> Vec<ComponentId> {
        let mut out = Vec::new();
        let mut stack = vec![uid];
        while let Some(next) = stack.pop() {
            let Some(node) = self.nodes.get(&next) else {
                continue;
            };
            out.push(next);
            stack.extend(node.children.iter().rev().copied());
        }
        out
    }

    /// True if `ancestor` is `uid` or one of its ancestors.
    pub fn is_within(&self, uid: ComponentId, ancestor: ComponentId) -> bool {
        let mut cursor = Some(uid);
        while let Some(current) = cursor {
            if current == ancestor {
                return true;
            }
            cursor = self.nodes.get(&current).and_then(Component::parent);
        }
        false
    }

    /// True if InsertItem may add a child to `uid`.
    pub fn can_insert_child(&self, uid: ComponentId) -> bool {
        let Some(node) = self.nodes.get(&uid) else {
            return false;
        };
        if node.data_driven {
            return false;
        }
        match node.kind.child_policy() {
            ChildPolicy::Multiple => true,
            ChildPolicy::Single => node.children.is_empty(),
            ChildPolicy::None => false,
        }
    }

    /// Keyboard-focus eligibility.
    pub fn is_focusable(&self, uid: ComponentId) -> bool {
        self.nodes.get(&uid).is_some_and(|c| {
            c.kind.is_focusable()
                && !c.inherit_parent_state
                && !c.has_state(ComponentStates::DISABLED)
        })
    }

    /// Detach `uid` from its parent and drop it with its subtree.
    ///
    /// Returns the removed components, pre-order.
    pub(crate) fn remove_subtree(&mut self, uid: ComponentId) -> Vec<Component> {
        let order = self.descendants(uid);
        if let Some(parent) = self.nodes.get(&uid).and_then(Component::parent) {
            if let Some(parent) = self.nodes.get_mut(&parent) {
                parent.children.retain(|c| *c != uid);
            }
        }
        if self.root == Some(uid) {
            self.root = None;
        }
        order
            .into_iter()
            .filter_map(|id| self.nodes.remove(&id))
            .collect()
    }
}
