#![forbid(unsafe_code)]

//! Commands that act on the host, the component tree or focus.

use apl_core::action::ActionId;
use apl_core::context::DataContext;
use apl_core::evaluator::{as_i64, display_string, truthy};
use apl_core::event::{ComponentId, Event, EventProperty, EventType};
use serde_json::{Map, Value, json};

use super::{Invocation, Scope, Step, Task};
use crate::builder::{item_list, request_media};
use crate::command::ExtensionCommandDefinition;
use crate::component::{ComponentKind, ComponentStates};
use crate::config::ExperimentalFeatures;
use crate::focus::FocusChange;
use crate::root::RootContext;
use crate::session::LogLevel;

/// OpenURL waiting on the host, then on its `onFail` commands.
pub(crate) struct OpenUrlTask {
    on_fail: Value,
    scope: Scope,
    failed: bool,
}

impl RootContext {
    // -- Host events --------------------------------------------------------

    pub(super) fn send_event(&mut self, inv: &Invocation<'_>) -> Option<ActionId> {
        let arguments = match self.prop(inv, "arguments") {
            Some(Value::Array(items)) => Value::Array(items),
            Some(Value::Null) | None => Value::Array(Vec::new()),
            Some(other) => Value::Array(vec![other]),
        };
        let mut components = Map::new();
        for id in item_list(self.prop(inv, "components").as_ref()) {
            let id = display_string(&id);
            if let Some(component) = self.tree.resolve(&id).and_then(|uid| self.tree.get(uid)) {
                components.insert(id, component.value());
            }
        }
        let mut flags = self.config.send_event_flags().clone();
        if let Some(Value::Object(explicit)) = self.prop(inv, "flags") {
            flags.extend(explicit);
        }
        self.events.push(
            Event::new(EventType::SendEvent)
                .with(EventProperty::Arguments, arguments)
                .with(EventProperty::Source, Self::event_source(&inv.ctx))
                .with(EventProperty::Components, Value::Object(components))
                .with(EventProperty::Flags, Value::Object(flags)),
        );
        None
    }

    pub(super) fn finish(&mut self, inv: &Invocation<'_>) -> Option<ActionId> {
        let reason = self
            .prop(inv, "reason")
            .map(|r| display_string(&r))
            .unwrap_or_else(|| "exit".to_owned());
        if reason != "exit" && reason != "back" {
            self.session.warn("Invalid enumerated property for 'reason'");
            return None;
        }
        self.events
            .push(Event::new(EventType::Finish).with(EventProperty::Reason, Value::String(reason)));
        None
    }

    pub(super) fn reinflate(&mut self) -> Option<ActionId> {
        let (action, handle) = self.graph.make_host();
        self.events
            .push(Event::new(EventType::Reinflate).with_action(handle));
        Some(action)
    }

    pub(super) fn log(&mut self, inv: &Invocation<'_>) -> Option<ActionId> {
        let level = match self.prop(inv, "level") {
            Some(level) => match LogLevel::from_name(&display_string(&level)) {
                Some(level) => level,
                None => {
                    self.session.warn("Invalid enumerated property for 'level'");
                    return None;
                }
            },
            None => LogLevel::Info,
        };
        let mut text = self
            .prop(inv, "message")
            .map(|m| display_string(&m))
            .unwrap_or_default();
        if let Some(Value::Array(arguments)) = self.prop(inv, "arguments") {
            if !arguments.is_empty() {
                text.push(' ');
                text.push_str(&Value::Array(arguments).to_string());
            }
        }
        self.session.log(level, text);
        None
    }

    pub(super) fn push_extension_event(
        &mut self,
        definition: &ExtensionCommandDefinition,
        values: Map<String, Value>,
        ctx: &DataContext,
        fast: bool,
    ) -> Option<ActionId> {
        let event = Event::new(EventType::Extension)
            .with(EventProperty::ExtensionUri, Value::String(definition.uri().to_owned()))
            .with(EventProperty::Name, Value::String(definition.name().to_owned()))
            .with(EventProperty::Source, Self::event_source(ctx))
            .with(EventProperty::Value, Value::Object(values));
        if definition.requires_resolution() && !fast {
            let (action, handle) = self.graph.make_host();
            self.events.push(event.with_action(handle));
            Some(action)
        } else {
            self.events.push(event);
            None
        }
    }

    // -- OpenURL ------------------------------------------------------------

    pub(super) fn open_url(&mut self, inv: &Invocation<'_>) -> Option<ActionId> {
        let source = self
            .prop(inv, "source")
            .map(|s| display_string(&s))
            .unwrap_or_default();
        let on_fail = inv.map.get("onFail").cloned().unwrap_or(Value::Null);
        let scope = inv.scope.with_ctx(inv.ctx.clone());
        if !self.config.is_open_url_allowed() {
            tracing::debug!(url = %source, "OpenURL refused by configuration");
            return self.run_open_url_fail(&on_fail, &scope, 405);
        }
        let (host, handle) = self.graph.make_host();
        self.events.push(
            Event::new(EventType::OpenUrl)
                .with(EventProperty::Source, Value::String(source))
                .with_action(handle),
        );
        let task = OpenUrlTask {
            on_fail,
            scope,
            failed: false,
        };
        Some(self.spawn(Task::OpenUrl(task), host))
    }

    pub(super) fn resume_open_url(&mut self, task: &mut OpenUrlTask, argument: Option<i64>) -> Step {
        if task.failed {
            return Step::Done;
        }
        let code = argument.unwrap_or(0);
        if code == 0 {
            return Step::Done;
        }
        task.failed = true;
        let (on_fail, scope) = (task.on_fail.clone(), task.scope.clone());
        Step::from_action(self.run_open_url_fail(&on_fail, &scope, code))
    }

    fn run_open_url_fail(&mut self, on_fail: &Value, scope: &Scope, code: i64) -> Option<ActionId> {
        if on_fail.is_null() {
            return None;
        }
        let source = json!({
            "source": "OpenURL",
            "type": "OpenURL",
            "handler": "Fail",
            "value": code
        });
        let ctx = scope.ctx.with("event", json!({ "source": source }));
        self.run_command(on_fail, &scope.with_ctx(ctx), false)
    }

    // -- Component state ----------------------------------------------------

    pub(super) fn set_value(&mut self, inv: &Invocation<'_>) -> Option<ActionId> {
        let target = inv.target?;
        let property = self
            .prop(inv, "property")
            .map(|p| display_string(&p))
            .unwrap_or_default();
        let value = self.prop(inv, "value").unwrap_or(Value::Null);
        if property == "checked" || property == "disabled" {
            if let Some(state) = ComponentStates::from_state_name(&property) {
                self.set_component_state(target, state, truthy(&value));
            }
            return None;
        }
        let Some(component) = self.tree.get_mut(target) else {
            return None;
        };
        if !component.can_set(&property) {
            let kind = component.kind().name();
            self.session
                .warn(format!("Unable to set property '{property}' on {kind}"));
            return None;
        }
        component.props.insert(property.clone(), value);
        if property == "source" {
            request_media(component, &*self.media, &self.media_notices);
        }
        None
    }

    pub(super) fn set_state(&mut self, inv: &Invocation<'_>) -> Option<ActionId> {
        let target = inv.target?;
        let name = self
            .prop(inv, "state")
            .map(|s| display_string(&s))
            .unwrap_or_default();
        let Some(state) = ComponentStates::from_state_name(&name) else {
            self.session.warn("Invalid enumerated property for 'state'");
            return None;
        };
        let on = self.prop(inv, "value").is_some_and(|v| truthy(&v));
        self.set_component_state(target, state, on);
        None
    }

    fn set_component_state(&mut self, target: ComponentId, state: ComponentStates, on: bool) {
        if state == ComponentStates::FOCUSED {
            if on {
                self.focus_component(target);
            } else if self.focus.focused() == Some(target) {
                self.clear_focus();
            }
            return;
        }
        if let Some(component) = self.tree.get_mut(target) {
            component.states.set(state, on);
        }
        if state == ComponentStates::DISABLED && on && self.focus.focused() == Some(target) {
            self.clear_focus();
        }
    }

    // -- Focus --------------------------------------------------------------

    pub(super) fn set_focus_command(&mut self, inv: &Invocation<'_>) -> Option<ActionId> {
        self.focus_component(inv.target?);
        None
    }

    pub(super) fn clear_focus_command(&mut self) -> Option<ActionId> {
        self.clear_focus();
        None
    }

    fn focus_events(&self) -> bool {
        self.config.features().contains(ExperimentalFeatures::FOCUS_EVENTS)
    }

    pub(crate) fn focus_component(&mut self, target: ComponentId) {
        let notify = self.focus_events();
        let change = self
            .focus
            .set_focus(&mut self.tree, &mut self.events, target, notify);
        self.run_focus_handlers(change);
    }

    pub(crate) fn clear_focus(&mut self) {
        let notify = self.focus_events();
        let change = self.focus.clear_focus(&mut self.tree, &mut self.events, notify);
        self.run_focus_handlers(change);
    }

    fn run_focus_handlers(&mut self, change: FocusChange) {
        if let Some(blurred) = change.blurred {
            self.run_handler(blurred, "onBlur", "Blur", true, None);
        }
        if let Some(focused) = change.focused {
            self.run_handler(focused, "onFocus", "Focus", true, None);
        }
    }

    // -- Tree mutation ------------------------------------------------------

    pub(super) fn insert_item(&mut self, inv: &Invocation<'_>) -> Option<ActionId> {
        let target = inv.target?;
        if !self.tree.can_insert_child(target) {
            let label = self.label(target);
            self.session
                .warn(format!("Could not insert child into '{label}'"));
            return None;
        }
        let items = item_list(inv.map.get("items").or_else(|| inv.map.get("item")));
        let Some(child) = self.builder().inflate_first(&items, &inv.ctx, Some(target)) else {
            self.session.warn("Could not inflate item to be inserted");
            return None;
        };

        let at = self
            .prop(inv, "at")
            .and_then(|v| as_i64(&v))
            .unwrap_or(i64::MAX);
        let parent = self.tree.get_mut(target)?;
        let count = parent.children.len();
        let index = insertion_index(at, count);
        parent.children.insert(index, child);
        if parent.kind == ComponentKind::Pager && count > 0 && index <= parent.current_page {
            parent.current_page += 1;
        }
        tracing::debug!(parent = %target, child = %child, index, "inserted component");
        None
    }

    pub(super) fn remove_item(&mut self, inv: &Invocation<'_>) -> Option<ActionId> {
        let target = inv.target?;
        let parent = self.tree.get(target).and_then(|c| c.parent());
        let removable = parent
            .and_then(|p| self.tree.get(p))
            .is_some_and(|p| !p.is_data_driven());
        let (Some(parent), true) = (parent, removable) else {
            let label = self.label(target);
            self.session
                .warn(format!("Component '{label}' cannot be removed"));
            return None;
        };

        // Blur runs while the focused component is still in the tree.
        if self.focus.focused().is_some_and(|focused| self.tree.is_within(focused, target)) {
            self.clear_focus();
        }

        let index = self
            .tree
            .get(parent)
            .and_then(|p| p.children().iter().position(|c| *c == target));
        for mut removed in self.tree.remove_subtree(target) {
            if let Some(player) = removed.player.as_mut() {
                player.halt();
                player.release();
            }
            if let Some(action) = removed.speech_action.take() {
                self.graph.terminate(action);
            }
            if let Some(action) = removed.page_action.take() {
                self.graph.terminate(action);
            }
            // Media handles are dropped with the component.
        }

        if let (Some(pager), Some(index)) = (self.tree.get_mut(parent), index) {
            if pager.kind == ComponentKind::Pager {
                let count = pager.children.len();
                if index < pager.current_page {
                    pager.current_page -= 1;
                }
                pager.current_page = pager.current_page.min(count.saturating_sub(1));
            }
        }
        tracing::debug!(component = %target, "removed component");
        None
    }
}

/// Child index for InsertItem's `at`: negative counts from the end, and
/// anything out of range clamps to `[0, count]`.
pub(crate) fn insertion_index(at: i64, count: usize) -> usize {
    let count_i = i64::try_from(count).unwrap_or(i64::MAX);
    let index = if at < 0 {
        count_i.saturating_add(at).max(0)
    } else {
        at.min(count_i)
    };
    usize::try_from(index).unwrap_or(count)
}
