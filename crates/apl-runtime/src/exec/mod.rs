#![forbid(unsafe_code)]

//! Command execution.
//!
//! A command runs in one of two modes. In normal mode it may suspend on a
//! timer or a host round-trip and hands back the [`ActionId`] it is waiting
//! on. In fast mode nothing is awaited: delays are skipped, commands that
//! need the host are refused with a console message, and whatever is still
//! pending runs on unattended.
//!
//! Multi-step commands (delays, Sequential bodies, OpenURL with `onFail`,
//! page turns, speech) are *tasks*. A task owns one pending action (its
//! result) and waits on at most one child action at a time. Continuations
//! are [`Waiter`] values registered on the action graph; the root's pump
//! drains the resulting notifications and resumes the task.
//!
//! # Resumption
//!
//! While a task is being resumed it is taken out of the arena. Any
//! notification addressed to it in the meantime (for example because a step
//! preempted the sequencer the task itself runs on) is deferred until the
//! task is back in the arena.

mod builtin;
mod flow;
mod media;
mod page;

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use apl_core::action::{ActionId, Notification, Outcome};
use apl_core::context::DataContext;
use apl_core::evaluator::{as_i64, display_string, truthy};
use apl_core::event::ComponentId;
use serde_json::{Map, Value, json};

use crate::command::{CommandKind, CommandRecord, CommandType, ExtensionCommandDefinition, TargetRule};
use crate::component::Component;
use crate::root::RootContext;

pub(crate) use flow::{DelayTask, SequenceTask};
pub(crate) use builtin::OpenUrlTask;
pub(crate) use media::SpeakTask;
pub(crate) use page::{AutoPageTask, PageTurnTask};

/// Where a command runs: its data, base component and sequencer.
#[derive(Debug, Clone)]
pub(crate) struct Scope {
    pub ctx: DataContext,
    /// Component whose handler started the chain; default command target.
    pub base: Option<ComponentId>,
    /// Sequencer named by the command that started the chain. Handler
    /// chains run on MAIN without naming it.
    pub sequencer: Option<String>,
    pub macro_depth: usize,
}

impl Scope {
    pub fn new(ctx: DataContext, base: Option<ComponentId>) -> Self {
        Self {
            ctx,
            base,
            sequencer: None,
            macro_depth: 0,
        }
    }

    #[must_use]
    pub fn with_ctx(&self, ctx: DataContext) -> Self {
        Self {
            ctx,
            ..self.clone()
        }
    }

    #[must_use]
    pub fn on_sequencer(&self, name: &str) -> Self {
        Self {
            sequencer: Some(name.to_owned()),
            ..self.clone()
        }
    }
}

/// Continuation registered on the action graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Waiter {
    Task(TaskId),
    /// Frees the named sequencer slot when its chain settles.
    Sequencer(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct TaskId(u64);

pub(crate) enum Task {
    Delay(DelayTask),
    Sequence(SequenceTask),
    OpenUrl(OpenUrlTask),
    PageTurn(PageTurnTask),
    AutoPage(AutoPageTask),
    Speak(SpeakTask),
}

pub(crate) struct TaskSlot {
    /// The task's own result action.
    own: ActionId,
    /// Child action the task is waiting on.
    current: Option<ActionId>,
    task: Task,
}

/// What a task does after a step.
pub(crate) enum Step {
    Wait(ActionId),
    Done,
    /// A step terminated the task's own action.
    Stopped,
}

impl Step {
    fn from_action(action: Option<ActionId>) -> Self {
        action.map_or(Step::Done, Step::Wait)
    }
}

/// Arena of suspended tasks.
#[derive(Default)]
pub(crate) struct TaskArena {
    slots: HashMap<TaskId, TaskSlot>,
    active: HashSet<TaskId>,
    next_id: u64,
}

impl TaskArena {
    fn alloc(&mut self) -> TaskId {
        self.next_id += 1;
        TaskId(self.next_id)
    }

    /// Take a task out for resumption; it counts as active until restored or finished.
    fn take(&mut self, id: TaskId) -> Option<TaskSlot> {
        let slot = self.slots.remove(&id)?;
        self.active.insert(id);
        Some(slot)
    }

    fn restore(&mut self, id: TaskId, slot: TaskSlot) {
        self.active.remove(&id);
        self.slots.insert(id, slot);
    }

    fn finish(&mut self, id: TaskId) {
        self.active.remove(&id);
    }

    fn is_active(&self, id: TaskId) -> bool {
        self.active.contains(&id)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }
}

/// A built-in command with its evaluated context and resolved target.
pub(crate) struct Invocation<'a> {
    pub kind: CommandType,
    pub map: &'a Map<String, Value>,
    pub scope: &'a Scope,
    /// Scope data plus `event.target`.
    pub ctx: DataContext,
    pub target: Option<ComponentId>,
    pub fast: bool,
}

enum Resolved {
    Command(CommandKind),
    Macro,
}

/// `event.source` for commands that did not come from a component handler.
fn document_source() -> Value {
    json!({
        "source": "Document",
        "type": "Document",
        "handler": "",
        "id": null,
        "uid": null,
        "value": null
    })
}

impl RootContext {
    // -- Entry points -------------------------------------------------------

    /// Run one command (or an array of commands) and return the action to
    /// wait on, or `None` if it already completed.
    ///
    /// Fast mode never returns an action.
    pub(crate) fn run_command(&mut self, command: &Value, scope: &Scope, fast: bool) -> Option<ActionId> {
        // An action that already settled counts as completed.
        let action = self
            .start_command(command, scope, fast)
            .filter(|id| self.graph.is_pending(*id));
        if fast {
            if let Some(id) = action {
                tracing::trace!(action = %id, "fast mode leaves action unattended");
            }
            return None;
        }
        action
    }

    /// Run `command` on the sequencer `name`, preempting its current chain.
    ///
    /// This may be the chain that is asking; it is terminated like any other.
    pub(crate) fn execute_on_sequencer(&mut self, command: &Value, scope: &Scope, name: &str) -> Option<ActionId> {
        if let Some(old) = self.sequencer.take(name) {
            tracing::debug!(sequencer = name, action = %old, "preempting running chain");
            self.graph.terminate(old);
            // The old chain's catch/finally lists run before the new chain starts.
            self.pump_actions();
        }
        let action = self.run_command(command, scope, false)?;
        self.sequencer.insert(name, action);
        self.graph.then(action, Waiter::Sequencer(name.to_owned()));
        self.graph.on_terminate(action, Waiter::Sequencer(name.to_owned()));
        Some(action)
    }

    /// Run the handler `property` (e.g. `onPress`) of a component.
    ///
    /// Normal-mode handlers run on the main sequencer.
    pub(crate) fn run_handler(
        &mut self,
        uid: ComponentId,
        property: &str,
        handler: &str,
        fast: bool,
        value: Option<Value>,
    ) -> Option<ActionId> {
        let component = self.tree.get(uid)?;
        let commands = component.handler(property)?.clone();
        let mut source = component.source_map(handler);
        if let (Some(value), Value::Object(map)) = (value, &mut source) {
            map.insert("value".into(), value);
        }
        let ctx = component.context.with("event", json!({ "source": source }));
        let scope = Scope::new(ctx, Some(uid));
        if fast {
            self.run_command(&commands, &scope, true)
        } else {
            self.execute_on_sequencer(&commands, &scope, crate::sequencer::MAIN_SEQUENCER)
        }
    }

    // -- Dispatch -----------------------------------------------------------

    fn start_command(&mut self, command: &Value, scope: &Scope, fast: bool) -> Option<ActionId> {
        let map = match command {
            Value::Object(map) => map,
            Value::Array(items) => {
                return self.start_sequence(SequenceTask::implicit(items, scope, fast));
            }
            Value::String(_) => {
                // Commands passed through bindings (e.g. macro arguments).
                return match self.evaluator.evaluate(command, &scope.ctx) {
                    resolved @ (Value::Object(_) | Value::Array(_)) => {
                        self.start_command(&resolved, scope, fast)
                    }
                    _ => {
                        self.session.warn(format!("Unable to interpret command {command}"));
                        None
                    }
                };
            }
            _ => {
                self.session.warn(format!("Unable to interpret command {command}"));
                return None;
            }
        };

        let (name, resolved) = self.resolve_type(map, scope)?;

        if let Some(when) = map.get("when") {
            if !truthy(&self.evaluator.evaluate(when, &scope.ctx)) {
                return None;
            }
        }

        if let Some(sequencer) = map
            .get("sequencer")
            .map(|s| display_string(&self.evaluator.evaluate(s, &scope.ctx)))
            .filter(|s| !s.is_empty())
        {
            if scope.sequencer.as_deref() != Some(sequencer.as_str()) {
                self.execute_on_sequencer(command, &scope.on_sequencer(&sequencer), &sequencer);
                return None;
            }
        }

        let delay = map
            .get("delay")
            .and_then(|d| as_i64(&self.evaluator.evaluate(d, &scope.ctx)))
            .unwrap_or(0)
            .max(0);
        if delay > 0 && !fast {
            let timer = self.graph.make_timer(Duration::from_millis(delay.unsigned_abs()));
            let task = DelayTask::new(command.clone(), scope.clone());
            return Some(self.spawn(Task::Delay(task), timer));
        }

        self.execute_resolved(map, &name, resolved, scope, fast)
    }

    fn resolve_type(&mut self, map: &Map<String, Value>, scope: &Scope) -> Option<(String, Resolved)> {
        let name = map
            .get("type")
            .map(|t| display_string(&self.evaluator.evaluate(t, &scope.ctx)))
            .unwrap_or_default();
        if name.is_empty() {
            self.session.warn("Command is missing a type");
            return None;
        }
        if let Some(kind) = self.registry.lookup(&name) {
            return Some((name, Resolved::Command(kind.clone())));
        }
        if self.document.macro_named(&name).is_some() {
            return Some((name, Resolved::Macro));
        }
        self.session.warn(format!("Unable to find command '{name}'"));
        None
    }

    /// Execute a command whose `when`, `sequencer` and `delay` were already handled.
    pub(crate) fn execute_now(&mut self, command: &Value, scope: &Scope, fast: bool) -> Option<ActionId> {
        let Value::Object(map) = command else {
            return self.start_command(command, scope, fast);
        };
        let (name, resolved) = self.resolve_type(map, scope)?;
        self.execute_resolved(map, &name, resolved, scope, fast)
    }

    fn execute_resolved(
        &mut self,
        map: &Map<String, Value>,
        name: &str,
        resolved: Resolved,
        scope: &Scope,
        fast: bool,
    ) -> Option<ActionId> {
        match resolved {
            Resolved::Command(CommandKind::Builtin(kind)) => self.execute_builtin(kind, map, scope, fast),
            Resolved::Command(CommandKind::Extension(definition)) => {
                self.execute_extension(&definition, map, scope, fast)
            }
            Resolved::Macro => {
                let definition = self.document.macro_named(name)?.clone();
                self.invoke_macro(&definition, map, scope, fast)
            }
        }
    }

    fn execute_builtin(
        &mut self,
        kind: CommandType,
        map: &Map<String, Value>,
        scope: &Scope,
        fast: bool,
    ) -> Option<ActionId> {
        if fast && !kind.allowed_in_fast_mode() {
            self.session
                .warn(format!("Ignoring {} command in fast mode", kind.name()));
            return None;
        }
        if let Some(missing) = kind
            .required_properties()
            .iter()
            .find(|p| !map.contains_key(**p))
        {
            self.session.warn(format!(
                "Missing required property '{missing}' for {}",
                kind.name()
            ));
            return None;
        }
        let target = match kind.target_rule() {
            TargetRule::Untargeted => None,
            TargetRule::Targeted => {
                let Some(target) = self.resolve_target(map, scope) else {
                    self.session.warn(format!(
                        "Illegal command {} - need to specify a target componentId",
                        kind.name()
                    ));
                    return None;
                };
                Some(target)
            }
        };

        self.record(kind.name(), fast);
        tracing::trace!(command = kind.name(), fast, "executing command");

        let inv = Invocation {
            kind,
            map,
            scope,
            ctx: self.target_context(scope, target),
            target,
            fast,
        };
        match kind {
            CommandType::AutoPage => self.auto_page(&inv),
            CommandType::ClearFocus => self.clear_focus_command(),
            CommandType::ControlMedia => self.control_media(&inv),
            CommandType::Finish => self.finish(&inv),
            CommandType::Idle => None,
            CommandType::InsertItem => self.insert_item(&inv),
            CommandType::Log => self.log(&inv),
            CommandType::OpenUrl => self.open_url(&inv),
            CommandType::Parallel => self.parallel(&inv),
            CommandType::PlayMedia => self.play_media(&inv),
            CommandType::Reinflate => self.reinflate(),
            CommandType::RemoveItem => self.remove_item(&inv),
            CommandType::Select => self.select(&inv),
            CommandType::SendEvent => self.send_event(&inv),
            CommandType::Sequential => self.sequential(&inv),
            CommandType::SetFocus => self.set_focus_command(&inv),
            CommandType::SetPage => self.set_page(&inv),
            CommandType::SetState => self.set_state(&inv),
            CommandType::SetValue => self.set_value(&inv),
            CommandType::SpeakItem => self.speak_item(&inv),
        }
    }

    fn execute_extension(
        &mut self,
        definition: &ExtensionCommandDefinition,
        map: &Map<String, Value>,
        scope: &Scope,
        fast: bool,
    ) -> Option<ActionId> {
        if fast && !definition.allows_fast_mode() {
            self.session
                .warn(format!("Ignoring {} command in fast mode", definition.name()));
            return None;
        }
        let mut values = Map::new();
        for property in definition.properties() {
            let value = match map.get(&property.name) {
                Some(raw) => self.evaluator.evaluate_recursive(raw, &scope.ctx),
                None if property.required => {
                    self.session.warn(format!(
                        "Missing required property '{}' for {}",
                        property.name,
                        definition.name()
                    ));
                    return None;
                }
                None => property.default.clone(),
            };
            values.insert(property.name.clone(), value);
        }
        self.record(definition.name(), fast);
        self.push_extension_event(definition, values, &scope.ctx, fast)
    }

    // -- Helpers ------------------------------------------------------------

    /// Evaluate property `name` of a command in its context.
    pub(crate) fn prop(&self, inv: &Invocation<'_>, name: &str) -> Option<Value> {
        inv.map
            .get(name)
            .map(|raw| self.evaluator.evaluate_recursive(raw, &inv.ctx))
    }

    fn resolve_target(&self, map: &Map<String, Value>, scope: &Scope) -> Option<ComponentId> {
        match map.get("componentId") {
            Some(raw) => {
                let text = display_string(&self.evaluator.evaluate(raw, &scope.ctx));
                if text.is_empty() {
                    scope.base.filter(|b| self.tree.contains(*b))
                } else {
                    self.tree.resolve(&text)
                }
            }
            None => scope.base.filter(|b| self.tree.contains(*b)),
        }
    }

    /// The scope context with `event.target` bound to `target`'s snapshot.
    fn target_context(&self, scope: &Scope, target: Option<ComponentId>) -> DataContext {
        let Some(snapshot) = target.and_then(|t| self.tree.get(t)).map(Component::snapshot) else {
            return scope.ctx.clone();
        };
        let mut event = match scope.ctx.lookup("event") {
            Some(Value::Object(map)) => map.clone(),
            _ => Map::new(),
        };
        event.insert("target".into(), snapshot);
        scope.ctx.with("event", Value::Object(event))
    }

    /// `event.source` visible in `ctx`, or the document source.
    pub(crate) fn event_source(ctx: &DataContext) -> Value {
        ctx.lookup("event")
            .and_then(|event| event.get("source"))
            .cloned()
            .unwrap_or_else(document_source)
    }

    /// Human-readable component name for console messages.
    pub(crate) fn label(&self, uid: ComponentId) -> String {
        self.tree
            .get(uid)
            .and_then(Component::id)
            .map_or_else(|| uid.to_string(), str::to_owned)
    }

    fn record(&mut self, name: &str, fast: bool) {
        if self.config.is_recording_commands() {
            self.command_log.push(CommandRecord {
                name: name.to_owned(),
                fast,
                time: self.graph.now(),
            });
        }
    }

    // -- Tasks --------------------------------------------------------------

    /// Park `task` in the arena, waiting on `first`; returns its own action.
    pub(crate) fn spawn(&mut self, task: Task, first: ActionId) -> ActionId {
        let id = self.tasks.alloc();
        let own = self.graph.make_pending();
        self.graph.on_terminate(own, Waiter::Task(id));
        let mut slot = TaskSlot {
            own,
            current: None,
            task,
        };
        self.watch(id, &mut slot, first);
        self.tasks.restore(id, slot);
        own
    }

    /// Children are pending when watched; one that settles first still
    /// notifies the task.
    fn watch(&mut self, id: TaskId, slot: &mut TaskSlot, child: ActionId) {
        slot.current = Some(child);
        self.graph.then(child, Waiter::Task(id));
        self.graph.on_terminate(child, Waiter::Task(id));
    }

    /// Drain action notifications until none are left.
    ///
    /// Returns true if any notification was dispatched.
    pub(crate) fn pump_actions(&mut self) -> bool {
        let mut progressed = false;
        let mut deferred = Vec::new();
        loop {
            self.backlog.extend(self.graph.drain_notifications());
            let Some(note) = self.backlog.pop_front() else {
                break;
            };
            if let Waiter::Task(id) = note.waiter {
                if self.tasks.is_active(id) {
                    deferred.push(note);
                    continue;
                }
            }
            progressed = true;
            self.dispatch(note);
        }
        for note in deferred.into_iter().rev() {
            self.backlog.push_front(note);
        }
        progressed
    }

    fn dispatch(&mut self, note: Notification<Waiter>) {
        let id = match note.waiter {
            Waiter::Sequencer(name) => {
                self.sequencer.release(&name, note.action);
                return;
            }
            Waiter::Task(id) => id,
        };
        let Some(mut slot) = self.tasks.take(id) else {
            return;
        };
        if note.action == slot.own {
            // Only termination is observed on the task's own action.
            self.task_terminated(slot);
            self.tasks.finish(id);
            return;
        }
        let keep = if slot.current == Some(note.action) {
            slot.current = None;
            match note.outcome {
                Outcome::Resolved(argument) => self.resume(id, &mut slot, argument),
                Outcome::Terminated => {
                    // A child terminated from outside ends the whole task.
                    self.graph.terminate(slot.own);
                    true
                }
            }
        } else {
            true
        };
        if keep {
            self.tasks.restore(id, slot);
        } else {
            self.tasks.finish(id);
        }
    }

    fn resume(&mut self, id: TaskId, slot: &mut TaskSlot, argument: Option<i64>) -> bool {
        let own = slot.own;
        let step = match &mut slot.task {
            Task::Delay(task) => self.resume_delay(task),
            Task::Sequence(task) => self.resume_sequence(task, Some(own)),
            Task::OpenUrl(task) => self.resume_open_url(task, argument),
            Task::PageTurn(task) => self.finish_page_turn(task, own),
            Task::AutoPage(task) => self.resume_auto_page(task),
            Task::Speak(task) => self.finish_speech(task, own),
        };
        match step {
            Step::Wait(child) => {
                self.watch(id, slot, child);
                true
            }
            Step::Done => {
                self.graph.resolve(own);
                false
            }
            // The pending termination notice cleans up.
            Step::Stopped => true,
        }
    }

    fn task_terminated(&mut self, slot: TaskSlot) {
        if let Some(child) = slot.current {
            self.graph.terminate(child);
            // Nested chains clean up before this one does.
            self.pump_actions();
        }
        match slot.task {
            Task::Sequence(task) => self.abort_sequence(task),
            Task::PageTurn(task) => self.abort_page_turn(&task, slot.own),
            Task::Speak(task) => self.abort_speech(&task, slot.own),
            Task::Delay(_) | Task::OpenUrl(_) | Task::AutoPage(_) => {}
        }
    }
}
