#![forbid(unsafe_code)]

//! Inflation of component JSON into the [`ComponentTree`].
//!
//! Properties are evaluated once, against the data context the component is
//! inflated in; handler properties (`onPress`, `onLoad`, ...) are kept raw
//! and evaluated when they run. A component whose `when` is false, or whose
//! `type` is unknown, inflates to nothing.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use apl_core::context::DataContext;
use apl_core::evaluator::{Evaluator, as_i64, display_string, truthy};
use apl_core::event::ComponentId;
use apl_core::media::{MediaManager, MediaState, MediaType};
use serde_json::{Map, Value, json};

use crate::component::{ChildPolicy, Component, ComponentKind, ComponentStates, ComponentTree};
use crate::media_player::MediaPlayerFactory;
use crate::session::Session;

/// Components whose media objects changed state, posted by media callbacks.
pub(crate) type MediaNotices = Rc<RefCell<Vec<ComponentId>>>;

const STRUCTURAL_KEYS: &[&str] = &[
    "type", "when", "bind", "item", "items", "data", "firstItem", "lastItem", "id",
];

/// True for handler property names such as `onPress`.
pub(crate) fn is_handler_key(key: &str) -> bool {
    key.strip_prefix("on")
        .and_then(|rest| rest.chars().next())
        .is_some_and(char::is_uppercase)
}

/// Normalise `item`/`items` (a single object or an array) into a list.
pub(crate) fn item_list(value: Option<&Value>) -> Vec<Value> {
    match value {
        Some(Value::Array(items)) => items.clone(),
        Some(Value::Null) | None => Vec::new(),
        Some(other) => vec![other.clone()],
    }
}

/// Borrowed view of the root state needed while inflating.
pub(crate) struct Builder<'a> {
    pub tree: &'a mut ComponentTree,
    pub evaluator: &'a dyn Evaluator,
    pub media: &'a dyn MediaManager,
    pub players: Option<&'a dyn MediaPlayerFactory>,
    pub notices: &'a MediaNotices,
    pub session: &'a mut Session,
}

impl Builder<'_> {
    /// Inflate the first entry of `items` that produces a component.
    pub fn inflate_first(
        &mut self,
        items: &[Value],
        ctx: &DataContext,
        parent: Option<ComponentId>,
    ) -> Option<ComponentId> {
        items.iter().find_map(|item| self.inflate(item, ctx, parent))
    }

    /// Inflate one component (and its children) under `parent`.
    ///
    /// The caller links the returned uid into the parent's child list.
    pub fn inflate(
        &mut self,
        item: &Value,
        ctx: &DataContext,
        parent: Option<ComponentId>,
    ) -> Option<ComponentId> {
        let Value::Object(map) = item else {
            return None;
        };
        if let Some(when) = map.get("when") {
            if !truthy(&self.evaluator.evaluate(when, ctx)) {
                return None;
            }
        }
        let ctx = self.bind(map.get("bind"), ctx);
        let type_name = map
            .get("type")
            .map(|t| display_string(&self.evaluator.evaluate(t, &ctx)))?;
        let Some(kind) = ComponentKind::from_name(&type_name) else {
            self.session
                .warn(format!("Unable to inflate component of type '{type_name}'"));
            return None;
        };

        let uid = self.tree.alloc_uid();
        let mut component = Component::new(uid, kind, ctx.clone());
        component.parent = parent;
        if let Some(id) = map.get("id") {
            let id = display_string(&self.evaluator.evaluate(id, &ctx));
            component.id = (!id.is_empty()).then_some(id);
        }
        for (key, value) in map {
            if STRUCTURAL_KEYS.contains(&key.as_str()) {
                continue;
            }
            if is_handler_key(key) {
                component.handlers.insert(key.clone(), value.clone());
            } else {
                component
                    .props
                    .insert(key.clone(), self.evaluator.evaluate_recursive(value, &ctx));
            }
        }
        apply_initial_states(&mut component);
        self.tree.insert(component);

        self.inflate_children(uid, kind, map, &ctx);

        if kind == ComponentKind::Pager {
            self.settle_initial_page(uid);
        }
        if let Some(component) = self.tree.get_mut(uid) {
            request_media(component, self.media, self.notices);
            if kind == ComponentKind::Video {
                component.player = self.players.map(|factory| factory.create_player(uid));
            }
        }
        tracing::trace!(uid = %uid, kind = kind.name(), "inflated component");
        Some(uid)
    }

    fn bind(&self, bind: Option<&Value>, ctx: &DataContext) -> DataContext {
        let Some(Value::Array(entries)) = bind else {
            return ctx.clone();
        };
        let mut scope = ctx.clone();
        for entry in entries {
            let Some(name) = entry.get("name").and_then(Value::as_str) else {
                continue;
            };
            let value = entry
                .get("value")
                .map(|v| self.evaluator.evaluate_recursive(v, &scope))
                .unwrap_or(Value::Null);
            scope = scope.with(name, value);
        }
        scope
    }

    fn inflate_children(
        &mut self,
        uid: ComponentId,
        kind: ComponentKind,
        map: &Map<String, Value>,
        ctx: &DataContext,
    ) {
        let policy = kind.child_policy();
        if policy == ChildPolicy::None {
            return;
        }
        let items = item_list(map.get("items").or_else(|| map.get("item")));

        if policy == ChildPolicy::Single {
            if let Some(child) = self.inflate_first(&items, ctx, Some(uid)) {
                self.link(uid, child);
            }
            return;
        }

        if let Some(first) = map.get("firstItem") {
            if let Some(child) = self.inflate_first(&item_list(Some(first)), ctx, Some(uid)) {
                self.link(uid, child);
            }
        }
        match map.get("data").map(|d| self.evaluator.evaluate_recursive(d, ctx)) {
            Some(data) if !data.is_null() => {
                let elements = match data {
                    Value::Array(elements) => elements,
                    other => vec![other],
                };
                if let Some(component) = self.tree.get_mut(uid) {
                    component.data_driven = true;
                }
                let length = elements.len();
                for (index, element) in elements.into_iter().enumerate() {
                    let mut frame = Map::new();
                    frame.insert("data".into(), element);
                    frame.insert("index".into(), json!(index));
                    frame.insert("length".into(), json!(length));
                    let scope = ctx.extend(frame);
                    if let Some(child) = self.inflate_first(&items, &scope, Some(uid)) {
                        self.link(uid, child);
                    }
                }
            }
            _ => {
                for item in &items {
                    if let Some(child) = self.inflate(item, ctx, Some(uid)) {
                        self.link(uid, child);
                    }
                }
            }
        }
        if let Some(last) = map.get("lastItem") {
            if let Some(child) = self.inflate_first(&item_list(Some(last)), ctx, Some(uid)) {
                self.link(uid, child);
            }
        }
    }

    fn link(&mut self, parent: ComponentId, child: ComponentId) {
        if let Some(parent) = self.tree.get_mut(parent) {
            parent.children.push(child);
        }
    }

    fn settle_initial_page(&mut self, uid: ComponentId) {
        let Some(pager) = self.tree.get_mut(uid) else {
            return;
        };
        let count = pager.children.len();
        let initial = pager.props.get("initialPage").and_then(as_i64).unwrap_or(0);
        pager.current_page = if count == 0 {
            0
        } else {
            usize::try_from(initial.max(0)).map_or(count - 1, |p| p.min(count - 1))
        };
    }
}

fn apply_initial_states(component: &mut Component) {
    for (name, state) in [
        ("checked", ComponentStates::CHECKED),
        ("disabled", ComponentStates::DISABLED),
    ] {
        if component.props.get(name).is_some_and(truthy) {
            component.states |= state;
        }
    }
    component.inherit_parent_state = component
        .props
        .get("inheritParentState")
        .is_some_and(truthy);
}

/// One media source: URL plus request headers.
fn sources(value: Option<&Value>) -> Vec<(String, Vec<String>)> {
    fn one(value: &Value) -> Option<(String, Vec<String>)> {
        match value {
            Value::String(url) if !url.is_empty() => Some((url.clone(), Vec::new())),
            Value::Object(map) => {
                let url = map.get("url").and_then(Value::as_str)?.to_owned();
                let headers = map
                    .get("headers")
                    .and_then(Value::as_array)
                    .map(|h| h.iter().filter_map(Value::as_str).map(str::to_owned).collect())
                    .unwrap_or_default();
                Some((url, headers))
            }
            _ => None,
        }
    }
    match value {
        Some(Value::Array(items)) => items.iter().filter_map(one).collect(),
        Some(other) => one(other).into_iter().collect(),
        None => Vec::new(),
    }
}

/// (Re)request the media a component displays, replacing its old handles.
///
/// Images load the last source, or every source when `filters` is set;
/// vector graphics load their source only when it is a URL. Each object
/// reports its completion through `notices`.
pub(crate) fn request_media(component: &mut Component, media: &dyn MediaManager, notices: &MediaNotices) {
    let kind = match component.kind {
        ComponentKind::Image => MediaType::Image,
        ComponentKind::VectorGraphic => MediaType::VectorGraphic,
        _ => return,
    };
    component.media.clear();
    component.media_state = MediaState::Pending;

    let mut wanted = sources(component.props.get("source"));
    match kind {
        MediaType::Image => {
            let filtered = component
                .props
                .get("filters")
                .and_then(Value::as_array)
                .is_some_and(|f| !f.is_empty());
            if !filtered && wanted.len() > 1 {
                wanted = wanted.split_off(wanted.len() - 1);
            }
        }
        _ => wanted.retain(|(url, _)| url.contains("://")),
    }

    let uid = component.uid;
    for (url, headers) in wanted {
        let object = media.request(&url, kind, &headers);
        let inbox: Weak<RefCell<Vec<ComponentId>>> = Rc::downgrade(notices);
        object.add_callback(move |_| {
            if let Some(inbox) = inbox.upgrade() {
                inbox.borrow_mut().push(uid);
            }
        });
        component.media.push(object);
    }
    if !component.media.is_empty() {
        // Objects shared with earlier requests may already be settled.
        notices.borrow_mut().push(uid);
    }
}
