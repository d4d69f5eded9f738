#![forbid(unsafe_code)]

//! Control-flow commands: delays, Sequential, Parallel, Select and macros.
//!
//! # Sequential
//!
//! A sequence steps through its `commands` (expanded once per `data`
//! element), repeats them `repeatCount` more times, then runs `finally`.
//! When the sequence is terminated:
//!
//! - during the try phase: the running step is terminated, then `catch` and
//!   all of `finally` run in fast mode;
//! - during the finally phase: the running finally step is terminated and
//!   only the steps after it run, in fast mode.

use apl_core::action::ActionId;
use apl_core::context::DataContext;
use apl_core::evaluator::{as_i64, truthy};
use serde_json::{Map, Value, json};

use super::{Invocation, Scope, Step, Task};
use crate::builder::item_list;
use crate::document::MacroDefinition;
use crate::root::RootContext;

/// A command waiting out its `delay`.
pub(crate) struct DelayTask {
    command: Value,
    scope: Scope,
    started: bool,
}

impl DelayTask {
    pub fn new(command: Value, scope: Scope) -> Self {
        Self {
            command,
            scope,
            started: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Try,
    Finally,
}

pub(crate) struct SequenceTask {
    steps: Vec<(Value, DataContext)>,
    catch: Vec<Value>,
    finally: Vec<Value>,
    scope: Scope,
    fast: bool,
    repeats_left: u64,
    index: usize,
    phase: Phase,
}

impl SequenceTask {
    /// A plain list of commands, as for an array command or a macro body.
    pub fn implicit(commands: &[Value], scope: &Scope, fast: bool) -> Self {
        Self {
            steps: commands
                .iter()
                .map(|c| (c.clone(), scope.ctx.clone()))
                .collect(),
            catch: Vec::new(),
            finally: Vec::new(),
            scope: scope.clone(),
            fast,
            repeats_left: 0,
            index: 0,
            phase: Phase::Try,
        }
    }
}

/// Pair every command with a context per `data` element, or with `ctx`
/// itself when there is no data.
fn expand(commands: &[Value], data: Option<Value>, ctx: &DataContext) -> Vec<(Value, DataContext)> {
    let elements = match data {
        Some(Value::Array(elements)) => elements,
        Some(Value::Null) | None => {
            return commands.iter().map(|c| (c.clone(), ctx.clone())).collect();
        }
        Some(other) => vec![other],
    };
    let length = elements.len();
    let mut out = Vec::with_capacity(length * commands.len());
    for (index, element) in elements.into_iter().enumerate() {
        let mut frame = Map::new();
        frame.insert("data".into(), element);
        frame.insert("index".into(), json!(index));
        frame.insert("length".into(), json!(length));
        let scope = ctx.extend(frame);
        out.extend(commands.iter().map(|c| (c.clone(), scope.clone())));
    }
    out
}

impl RootContext {
    pub(super) fn resume_delay(&mut self, task: &mut DelayTask) -> Step {
        if task.started {
            return Step::Done;
        }
        task.started = true;
        Step::from_action(self.execute_now(&task.command, &task.scope, false))
    }

    // -- Sequential ---------------------------------------------------------

    pub(super) fn sequential(&mut self, inv: &Invocation<'_>) -> Option<ActionId> {
        let commands = item_list(inv.map.get("commands"));
        let data = self.prop(inv, "data");
        let repeat = self
            .prop(inv, "repeatCount")
            .and_then(|v| as_i64(&v))
            .unwrap_or(0)
            .max(0);
        let task = SequenceTask {
            steps: expand(&commands, data, &inv.ctx),
            catch: item_list(inv.map.get("catch")),
            finally: item_list(inv.map.get("finally")),
            scope: inv.scope.with_ctx(inv.ctx.clone()),
            fast: inv.fast,
            repeats_left: repeat.unsigned_abs(),
            index: 0,
            phase: Phase::Try,
        };
        self.start_sequence(task)
    }

    pub(super) fn start_sequence(&mut self, mut task: SequenceTask) -> Option<ActionId> {
        match self.resume_sequence(&mut task, None) {
            Step::Done | Step::Stopped => None,
            Step::Wait(child) => Some(self.spawn(Task::Sequence(task), child)),
        }
    }

    /// Run steps until one has to be waited on, or the sequence is over.
    ///
    /// Stops as soon as `own` is no longer pending, e.g. after a step took
    /// over the sequencer this sequence runs on.
    pub(super) fn resume_sequence(&mut self, task: &mut SequenceTask, own: Option<ActionId>) -> Step {
        loop {
            if own.is_some_and(|own| !self.graph.is_pending(own)) {
                return Step::Stopped;
            }
            match task.phase {
                Phase::Try => {
                    if let Some((command, ctx)) = task.steps.get(task.index).cloned() {
                        task.index += 1;
                        let scope = task.scope.with_ctx(ctx);
                        if let Some(child) = self.run_command(&command, &scope, task.fast) {
                            return Step::Wait(child);
                        }
                    } else if task.repeats_left > 0 && !task.steps.is_empty() {
                        task.repeats_left -= 1;
                        task.index = 0;
                    } else {
                        task.phase = Phase::Finally;
                        task.index = 0;
                    }
                }
                Phase::Finally => {
                    let Some(command) = task.finally.get(task.index).cloned() else {
                        return Step::Done;
                    };
                    task.index += 1;
                    let scope = task.scope.clone();
                    if let Some(child) = self.run_command(&command, &scope, task.fast) {
                        return Step::Wait(child);
                    }
                }
            }
        }
    }

    pub(super) fn abort_sequence(&mut self, task: SequenceTask) {
        let cleanup: Vec<Value> = match task.phase {
            Phase::Try => task.catch.iter().chain(task.finally.iter()).cloned().collect(),
            // The finally step that was running has been terminated with the
            // sequence; only the steps after it still run.
            Phase::Finally => task.finally.get(task.index..).unwrap_or_default().to_vec(),
        };
        for command in &cleanup {
            self.run_command(command, &task.scope, true);
        }
    }

    // -- Parallel -----------------------------------------------------------

    pub(super) fn parallel(&mut self, inv: &Invocation<'_>) -> Option<ActionId> {
        let commands = item_list(inv.map.get("commands"));
        let data = self.prop(inv, "data");
        let mut pending = Vec::new();
        for (command, ctx) in expand(&commands, data, &inv.ctx) {
            let scope = inv.scope.with_ctx(ctx);
            if let Some(child) = self.run_command(&command, &scope, inv.fast) {
                pending.push(child);
            }
        }
        self.graph.make_all(&pending)
    }

    // -- Select -------------------------------------------------------------

    pub(super) fn select(&mut self, inv: &Invocation<'_>) -> Option<ActionId> {
        let commands = item_list(inv.map.get("commands"));
        let data = self.prop(inv, "data");
        let chosen = expand(&commands, data, &inv.ctx)
            .into_iter()
            .find(|(command, ctx)| {
                command
                    .get("when")
                    .is_none_or(|when| truthy(&self.evaluator.evaluate(when, ctx)))
            });
        match chosen {
            Some((command, ctx)) => self.run_command(&command, &inv.scope.with_ctx(ctx), inv.fast),
            None => {
                let otherwise = item_list(inv.map.get("otherwise"));
                if otherwise.is_empty() {
                    return None;
                }
                let scope = inv.scope.with_ctx(inv.ctx.clone());
                self.start_sequence(SequenceTask::implicit(&otherwise, &scope, inv.fast))
            }
        }
    }

    // -- Macros -------------------------------------------------------------

    pub(super) fn invoke_macro(
        &mut self,
        definition: &MacroDefinition,
        map: &Map<String, Value>,
        scope: &Scope,
        fast: bool,
    ) -> Option<ActionId> {
        if scope.macro_depth >= self.config.macro_depth_limit() {
            self.session.warn(format!(
                "Command '{}' exceeds the maximum macro depth of {}",
                definition.name,
                self.config.macro_depth_limit()
            ));
            return None;
        }
        let mut bindings = Map::new();
        for parameter in &definition.parameters {
            let value = match map.get(&parameter.name) {
                // Commands passed as arguments are inflated where they are used.
                Some(raw @ (Value::Object(_) | Value::Array(_))) => raw.clone(),
                Some(raw) => self.evaluator.evaluate(raw, &scope.ctx),
                None => parameter.default.clone(),
            };
            bindings.insert(parameter.name.clone(), value);
        }
        tracing::trace!(command = %definition.name, depth = scope.macro_depth, "invoking macro");
        let mut body_scope = scope.with_ctx(scope.ctx.extend(bindings));
        body_scope.macro_depth += 1;
        let body = item_list(Some(&definition.commands));
        self.start_sequence(SequenceTask::implicit(&body, &body_scope, fast))
    }
}
