#![forbid(unsafe_code)]

//! Keyboard focus state machine.
//!
//! The manager remembers at most one focused component by id. Changes are
//! reported as a [`FocusChange`] so the caller can run the `onBlur` and
//! `onFocus` handlers once the manager has finished mutating state.
//!
//! # Invariants
//!
//! 1. At most one component carries the FOCUSED state.
//! 2. Focusing the already-focused component changes nothing.
//! 3. A component that is not focusable, is disabled, or inherits its parent's
//!    state is never focused.

use apl_core::event::{ComponentId, Event, EventQueue, EventType};

use crate::component::{ComponentStates, ComponentTree};

/// What a focus operation changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FocusChange {
    pub blurred: Option<ComponentId>,
    pub focused: Option<ComponentId>,
}

impl FocusChange {
    pub fn is_empty(&self) -> bool {
        self.blurred.is_none() && self.focused.is_none()
    }
}

#[derive(Debug, Default)]
pub struct FocusManager {
    focused: Option<ComponentId>,
}

impl FocusManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Currently focused component.
    pub fn focused(&self) -> Option<ComponentId> {
        self.focused
    }

    /// Move focus to `target`.
    ///
    /// With `notify`, a `Focus` event naming the new component is pushed.
    pub fn set_focus(
        &mut self,
        tree: &mut ComponentTree,
        events: &mut EventQueue,
        target: ComponentId,
        notify: bool,
    ) -> FocusChange {
        if self.focused == Some(target) || !tree.is_focusable(target) {
            return FocusChange::default();
        }
        let blurred = self.focused.take();
        if let Some(old) = blurred.and_then(|uid| tree.get_mut(uid)) {
            old.states.remove(ComponentStates::FOCUSED);
        }
        if let Some(new) = tree.get_mut(target) {
            new.states.insert(ComponentStates::FOCUSED);
        }
        self.focused = Some(target);
        tracing::debug!(focused = %target, "focus changed");
        if notify {
            events.push(Event::new(EventType::Focus).with_component(Some(target)));
        }
        FocusChange {
            blurred,
            focused: Some(target),
        }
    }

    /// Drop focus from whatever holds it.
    ///
    /// With `notify`, a `Focus` event with no component is pushed even when
    /// nothing was focused.
    pub fn clear_focus(
        &mut self,
        tree: &mut ComponentTree,
        events: &mut EventQueue,
        notify: bool,
    ) -> FocusChange {
        let blurred = self.focused.take();
        if let Some(old) = blurred.and_then(|uid| tree.get_mut(uid)) {
            old.states.remove(ComponentStates::FOCUSED);
        }
        if blurred.is_some() {
            tracing::debug!("focus cleared");
        }
        if notify {
            events.push(Event::new(EventType::Focus).with_component(None));
        }
        FocusChange {
            blurred,
            focused: None,
        }
    }

    /// Clear focus only if `component` holds it.
    pub fn release_focus(
        &mut self,
        tree: &mut ComponentTree,
        events: &mut EventQueue,
        component: ComponentId,
        notify: bool,
    ) -> FocusChange {
        if self.focused != Some(component) {
            return FocusChange::default();
        }
        self.clear_focus(tree, events, notify)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::{Component, ComponentKind};
    use apl_core::context::DataContext;

    fn tree_with(kinds: &[ComponentKind]) -> (ComponentTree, Vec<ComponentId>) {
        let mut tree = ComponentTree::new();
        let ids = kinds
            .iter()
            .map(|kind| {
                let uid = tree.alloc_uid();
                tree.insert(Component::new(uid, *kind, DataContext::new()));
                uid
            })
            .collect();
        (tree, ids)
    }

    #[test]
    fn focus_moves_and_notifies() {
        let (mut tree, ids) = tree_with(&[ComponentKind::TouchWrapper, ComponentKind::Pager]);
        let mut events = EventQueue::new();
        let mut focus = FocusManager::new();

        let change = focus.set_focus(&mut tree, &mut events, ids[0], true);
        assert_eq!(change.focused, Some(ids[0]));
        let change = focus.set_focus(&mut tree, &mut events, ids[1], true);
        assert_eq!(change, FocusChange { blurred: Some(ids[0]), focused: Some(ids[1]) });
        assert!(!tree.get(ids[0]).expect("a").has_state(ComponentStates::FOCUSED));
        assert!(tree.get(ids[1]).expect("b").has_state(ComponentStates::FOCUSED));
        assert_eq!(events.len(), 2);
        assert_eq!(events.pop().component(), Some(ids[0]));
    }

    #[test]
    fn refocusing_is_a_no_op() {
        let (mut tree, ids) = tree_with(&[ComponentKind::TouchWrapper]);
        let mut events = EventQueue::new();
        let mut focus = FocusManager::new();
        focus.set_focus(&mut tree, &mut events, ids[0], true);
        assert!(focus.set_focus(&mut tree, &mut events, ids[0], true).is_empty());
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn refuses_unfocusable_targets() {
        let (mut tree, ids) = tree_with(&[ComponentKind::Text, ComponentKind::TouchWrapper]);
        tree.get_mut(ids[1]).expect("touch").inherit_parent_state = true;
        let mut events = EventQueue::new();
        let mut focus = FocusManager::new();
        assert!(focus.set_focus(&mut tree, &mut events, ids[0], true).is_empty());
        assert!(focus.set_focus(&mut tree, &mut events, ids[1], true).is_empty());
        assert!(events.is_empty());
        assert_eq!(focus.focused(), None);
    }

    #[test]
    fn release_only_clears_current_holder() {
        let (mut tree, ids) = tree_with(&[ComponentKind::TouchWrapper, ComponentKind::EditText]);
        let mut events = EventQueue::new();
        let mut focus = FocusManager::new();
        focus.set_focus(&mut tree, &mut events, ids[1], false);
        assert!(focus.release_focus(&mut tree, &mut events, ids[0], true).is_empty());
        assert_eq!(focus.focused(), Some(ids[1]));

        let change = focus.release_focus(&mut tree, &mut events, ids[1], true);
        assert_eq!(change.blurred, Some(ids[1]));
        assert_eq!(focus.focused(), None);
        let event = events.pop();
        assert_eq!(event.kind(), EventType::Focus);
        assert_eq!(event.component(), None);
    }
}
