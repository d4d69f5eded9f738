#![forbid(unsafe_code)]

//! Pager navigation: SetPage and AutoPage.
//!
//! A page turn is a timed transition; the pager's current page changes when
//! the transition completes, and `onPageChanged` then runs in fast mode.
//! A newer turn on the same pager terminates the one in flight.

use std::time::Duration;

use apl_core::action::ActionId;
use apl_core::evaluator::{as_i64, display_string};
use apl_core::event::ComponentId;
use serde_json::json;

use super::{Invocation, Step, Task};
use crate::component::ComponentKind;
use crate::root::RootContext;

pub(crate) struct PageTurnTask {
    pager: ComponentId,
    page: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Turn,
    Pause,
}

pub(crate) struct AutoPageTask {
    pager: ComponentId,
    remaining: i64,
    delay: Duration,
    stage: Stage,
}

/// Target page of a SetPage request, or `None` when nothing should move.
pub(crate) fn page_target(current: usize, count: usize, relative: bool, value: i64, wrap: bool) -> Option<usize> {
    if count < 2 {
        return None;
    }
    let count_i = i64::try_from(count).ok()?;
    let current_i = i64::try_from(current).ok()?;
    let target = if relative {
        if value == 0 {
            return None;
        }
        let raw = current_i.saturating_add(value);
        if wrap {
            raw.rem_euclid(count_i)
        } else if (0..count_i).contains(&raw) {
            raw
        } else {
            return None;
        }
    } else {
        let raw = if value < 0 { value.saturating_add(count_i) } else { value };
        raw.clamp(0, count_i - 1)
    };
    let target = usize::try_from(target).ok()?;
    (target != current).then_some(target)
}

fn millis(value: i64) -> Duration {
    Duration::from_millis(value.max(0).unsigned_abs())
}

impl RootContext {
    fn pager_target(&mut self, inv: &Invocation<'_>) -> Option<ComponentId> {
        let target = inv.target?;
        if self.tree.get(target).map(|c| c.kind()) == Some(ComponentKind::Pager) {
            return Some(target);
        }
        let label = self.label(target);
        self.session
            .warn(format!("{} target '{label}' is not a Pager", inv.kind.name()));
        None
    }

    pub(super) fn set_page(&mut self, inv: &Invocation<'_>) -> Option<ActionId> {
        let pager = self.pager_target(inv)?;
        let relative = match self.prop(inv, "position").map(|p| display_string(&p)).as_deref() {
            None | Some("absolute") => false,
            Some("relative") => true,
            Some(_) => {
                self.session.warn("Invalid enumerated property for 'position'");
                return None;
            }
        };
        let value = self.prop(inv, "value").and_then(|v| as_i64(&v)).unwrap_or(0);
        let duration = self
            .prop(inv, "transitionDuration")
            .and_then(|v| as_i64(&v))
            .map_or_else(|| self.config.transition_duration(), millis);

        let component = self.tree.get(pager)?;
        let wrap = component
            .prop("navigation")
            .is_some_and(|n| display_string(n) == "wrap");
        let page = page_target(
            component.current_page(),
            component.children().len(),
            relative,
            value,
            wrap,
        )?;
        self.begin_page_turn(pager, page, duration, inv.fast)
    }

    pub(super) fn auto_page(&mut self, inv: &Invocation<'_>) -> Option<ActionId> {
        let pager = self.pager_target(inv)?;
        let count = self
            .prop(inv, "count")
            .and_then(|v| as_i64(&v))
            .unwrap_or(i64::MAX);
        if count <= 0 {
            return None;
        }
        let delay = self
            .prop(inv, "duration")
            .and_then(|v| as_i64(&v))
            .map_or(Duration::ZERO, millis);

        if inv.fast {
            let component = self.tree.get(pager)?;
            let last = component.children().len().saturating_sub(1);
            let current = component.current_page();
            let steps = usize::try_from(count).unwrap_or(usize::MAX);
            let page = current.saturating_add(steps).min(last);
            if page != current {
                self.begin_page_turn(pager, page, Duration::ZERO, true);
            }
            return None;
        }

        let mut task = AutoPageTask {
            pager,
            remaining: count,
            delay,
            stage: Stage::Turn,
        };
        match self.resume_auto_page(&mut task) {
            Step::Done | Step::Stopped => None,
            Step::Wait(child) => Some(self.spawn(Task::AutoPage(task), child)),
        }
    }

    /// Start moving `pager` to `page`; returns the transition action, if any.
    pub(crate) fn begin_page_turn(
        &mut self,
        pager: ComponentId,
        page: usize,
        duration: Duration,
        fast: bool,
    ) -> Option<ActionId> {
        let previous = self.tree.get_mut(pager)?.page_action.take();
        if let Some(previous) = previous {
            self.graph.terminate(previous);
        }
        if fast || duration.is_zero() {
            self.change_page(pager, page);
            return None;
        }
        let timer = self.graph.make_timer(duration);
        let own = self.spawn(Task::PageTurn(PageTurnTask { pager, page }), timer);
        if let Some(component) = self.tree.get_mut(pager) {
            component.page_action = Some(own);
        }
        tracing::debug!(pager = %pager, page, duration_ms = duration.as_millis() as u64, "page turn started");
        Some(own)
    }

    fn change_page(&mut self, pager: ComponentId, page: usize) {
        let Some(component) = self.tree.get_mut(pager) else {
            return;
        };
        if page >= component.children.len() || page == component.current_page {
            return;
        }
        component.current_page = page;
        tracing::debug!(pager = %pager, page, "page changed");
        self.run_handler(pager, "onPageChanged", "Page", true, Some(json!(page)));
    }

    pub(super) fn finish_page_turn(&mut self, task: &mut PageTurnTask, own: ActionId) -> Step {
        if let Some(component) = self.tree.get_mut(task.pager) {
            if component.page_action == Some(own) {
                component.page_action = None;
            }
        }
        self.change_page(task.pager, task.page);
        Step::Done
    }

    pub(super) fn abort_page_turn(&mut self, task: &PageTurnTask, own: ActionId) {
        if let Some(component) = self.tree.get_mut(task.pager) {
            if component.page_action == Some(own) {
                component.page_action = None;
            }
        }
    }

    pub(super) fn resume_auto_page(&mut self, task: &mut AutoPageTask) -> Step {
        loop {
            let Some(component) = self.tree.get(task.pager) else {
                return Step::Done;
            };
            let current = component.current_page();
            let last = component.children().len().saturating_sub(1);
            if task.remaining <= 0 || current >= last {
                return Step::Done;
            }
            match task.stage {
                Stage::Turn => {
                    task.remaining -= 1;
                    task.stage = Stage::Pause;
                    let duration = self.config.transition_duration();
                    if let Some(turn) = self.begin_page_turn(task.pager, current + 1, duration, false) {
                        return Step::Wait(turn);
                    }
                }
                Stage::Pause => {
                    task.stage = Stage::Turn;
                    if !task.delay.is_zero() {
                        return Step::Wait(self.graph.make_timer(task.delay));
                    }
                }
            }
        }
    }
}
