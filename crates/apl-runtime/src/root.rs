#![forbid(unsafe_code)]

//! The document root: owns every piece of engine state and is the host API.
//!
//! A [`RootContext`] is built from a document and host data. The host then
//! feeds it input ([`press`](RootContext::press),
//! [`execute_commands`](RootContext::execute_commands)), time
//! ([`update_time`](RootContext::update_time)) and media completions, and
//! drains outbound [`Event`]s.
//!
//! # Pumping
//!
//! Host signals on [`ActionRef`]s, action notifications and media
//! completions are queued, not handled inline. Every mutating call ends by
//! pumping these queues until they are all quiet, then flushes new media
//! URLs as a `MediaRequest` event.
//!
//! # Example
//!
//! ```
//! use apl_runtime::config::RootConfig;
//! use apl_runtime::root::RootContext;
//! use apl_core::event::EventType;
//! use serde_json::json;
//!
//! let doc = r#"{
//!     "type": "APL",
//!     "mainTemplate": {
//!         "parameters": ["payload"],
//!         "item": { "type": "TouchWrapper", "id": "button",
//!                   "onPress": { "type": "SendEvent", "arguments": ["${payload.name}"] } }
//!     }
//! }"#;
//! let mut root = RootContext::new(doc, json!({ "name": "go" }), RootConfig::new()).unwrap();
//! let button = root.find_component_by_id("button").unwrap();
//! root.press(button);
//! let event = root.pop_event();
//! assert_eq!(event.kind(), EventType::SendEvent);
//! ```

use std::collections::VecDeque;
use std::rc::Rc;
use std::time::Duration;

use apl_core::action::{ActionGraph, ActionId, ActionRef, Notification};
use apl_core::context::DataContext;
use apl_core::evaluator::{DefaultEvaluator, Evaluator};
use apl_core::event::{ComponentId, Event, EventQueue};
use apl_core::media::{CoreMediaManager, MediaManager, MediaState};
use serde_json::Value;

use crate::builder::{Builder, MediaNotices, item_list};
use crate::command::{CommandRecord, CommandRegistry};
use crate::component::{Component, ComponentStates, ComponentTree};
use crate::config::{ExperimentalFeatures, RootConfig};
use crate::document::{Document, DocumentError, DocumentResult};
use crate::exec::{Scope, TaskArena, Waiter};
use crate::focus::FocusManager;
use crate::media_player::MediaPlayerFactory;
use crate::sequencer::{MAIN_SEQUENCER, Sequencer};
use crate::session::{ConsoleMessage, Session};

/// Engine state for one loaded document.
pub struct RootContext {
    pub(crate) config: RootConfig,
    pub(crate) document: Document,
    pub(crate) evaluator: Box<dyn Evaluator>,
    pub(crate) registry: CommandRegistry,
    pub(crate) tree: ComponentTree,
    pub(crate) graph: ActionGraph<Waiter>,
    pub(crate) events: EventQueue,
    pub(crate) focus: FocusManager,
    pub(crate) media: Rc<dyn MediaManager>,
    pub(crate) players: Option<Rc<dyn MediaPlayerFactory>>,
    pub(crate) media_notices: MediaNotices,
    pub(crate) sequencer: Sequencer,
    pub(crate) tasks: TaskArena,
    pub(crate) backlog: VecDeque<Notification<Waiter>>,
    pub(crate) session: Session,
    pub(crate) command_log: Vec<CommandRecord>,
    root_ctx: DataContext,
}

impl std::fmt::Debug for RootContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RootContext")
            .field("components", &self.tree.len())
            .field("pending_actions", &self.graph.pending_count())
            .field("events", &self.events.len())
            .field("now", &self.graph.now())
            .finish_non_exhaustive()
    }
}

impl RootContext {
    // -- Construction -------------------------------------------------------

    /// Parse `document`, bind `data` to its first parameter and inflate it.
    pub fn new(document: &str, data: Value, config: RootConfig) -> DocumentResult<Self> {
        Self::from_document(Document::from_json_str(document)?, data, config)
    }

    /// Inflate an already-parsed document.
    pub fn from_document(document: Document, data: Value, config: RootConfig) -> DocumentResult<Self> {
        let media = config
            .media()
            .cloned()
            .unwrap_or_else(|| Rc::new(CoreMediaManager::new(config.header_rules().to_vec())));
        let players = config.player_factory().cloned();
        let mut registry = CommandRegistry::with_builtins();
        for definition in config.extensions() {
            registry.register_extension(definition.clone());
        }
        let mut root_ctx = DataContext::new();
        if let Some(name) = document.parameters().first() {
            root_ctx = root_ctx.with(name.clone(), data);
        }

        let mut root = Self {
            config,
            document,
            evaluator: Box::new(DefaultEvaluator),
            registry,
            tree: ComponentTree::new(),
            graph: ActionGraph::new(),
            events: EventQueue::new(),
            focus: FocusManager::new(),
            media,
            players,
            media_notices: MediaNotices::default(),
            sequencer: Sequencer::default(),
            tasks: TaskArena::default(),
            backlog: VecDeque::new(),
            session: Session::new(),
            command_log: Vec::new(),
            root_ctx,
        };

        let template = root.document.main_template();
        let items = item_list(template.get("items").or_else(|| template.get("item")));
        let ctx = root.root_ctx.clone();
        let top = root.builder().inflate_first(&items, &ctx, None);
        let Some(top) = top else {
            return Err(DocumentError::NoComponent);
        };
        root.tree.set_root(top);
        tracing::debug!(components = root.tree.len(), "document inflated");
        root.pump();
        Ok(root)
    }

    pub(crate) fn builder(&mut self) -> Builder<'_> {
        Builder {
            tree: &mut self.tree,
            evaluator: &*self.evaluator,
            media: &*self.media,
            players: self.players.as_deref(),
            notices: &self.media_notices,
            session: &mut self.session,
        }
    }

    // -- Pump ---------------------------------------------------------------

    /// Flush all zero-delay work until nothing is left.
    pub(crate) fn pump(&mut self) {
        loop {
            let mut progressed = self.graph.apply_host_signals() > 0;
            progressed |= self.pump_actions();
            progressed |= self.pump_media_notices();
            if !progressed {
                break;
            }
        }
        if self
            .config
            .features()
            .contains(ExperimentalFeatures::MEDIA_REQUEST_EVENTS)
        {
            self.media.process_media_requests(&mut self.events);
        }
    }

    /// Run `onLoad` / `onFail` for components whose media state settled.
    fn pump_media_notices(&mut self) -> bool {
        let mut notices = std::mem::take(&mut *self.media_notices.borrow_mut());
        if notices.is_empty() {
            return false;
        }
        notices.dedup();
        for uid in notices {
            let Some(component) = self.tree.get_mut(uid) else {
                continue;
            };
            let state = component.aggregate_media_state();
            if state == component.media_state {
                continue;
            }
            component.media_state = state;
            match state {
                MediaState::Ready => {
                    self.run_handler(uid, "onLoad", "Load", true, None);
                }
                MediaState::Error => {
                    self.run_handler(uid, "onFail", "Fail", true, None);
                }
                MediaState::Pending => {}
            }
        }
        true
    }

    // -- Events -------------------------------------------------------------

    pub fn has_event(&mut self) -> bool {
        self.pump();
        !self.events.is_empty()
    }

    /// Take the oldest outbound event.
    ///
    /// # Panics
    ///
    /// Panics if no event is pending; check [`has_event`](Self::has_event) first.
    pub fn pop_event(&mut self) -> Event {
        self.pump();
        self.events.pop()
    }

    // -- Time ---------------------------------------------------------------

    pub fn current_time(&self) -> Duration {
        self.graph.now()
    }

    /// Move the clock to `time`, firing every timer due on the way in
    /// deadline order.
    pub fn update_time(&mut self, time: Duration) {
        self.pump();
        while let Some(deadline) = self.graph.next_deadline().filter(|d| *d <= time) {
            let now = self.graph.now();
            self.graph.advance_to(deadline.max(now));
            self.graph.fire_due();
            self.pump();
        }
        if time > self.graph.now() {
            self.graph.advance_to(time);
        }
        self.pump();
    }

    pub fn advance_time(&mut self, delta: Duration) {
        let target = self.graph.now().saturating_add(delta);
        self.update_time(target);
    }

    /// Fire timers until none are left.
    pub fn advance_to_end(&mut self) {
        while let Some(deadline) = self.graph.next_deadline() {
            self.update_time(deadline);
        }
    }

    /// Time until the next timer fires.
    pub fn next_timeout(&self) -> Option<Duration> {
        self.graph
            .next_deadline()
            .map(|deadline| deadline.saturating_sub(self.graph.now()))
    }

    // -- Commands -----------------------------------------------------------

    /// Run host-supplied commands against the top component.
    ///
    /// Normal-mode commands run on the main sequencer. The returned
    /// reference is empty when they already completed.
    pub fn execute_commands(&mut self, commands: &Value, fast: bool) -> ActionRef {
        let scope = Scope::new(self.root_ctx.clone(), self.tree.root());
        let action = if fast {
            self.run_command(commands, &scope, true)
        } else {
            self.execute_on_sequencer(commands, &scope, MAIN_SEQUENCER)
        };
        let handle = self.action_handle(action);
        self.pump();
        handle
    }

    /// Terminate every running command chain, then every action still
    /// pending, such as host actions started in fast mode.
    ///
    /// Chains run their `catch` and `finally` lists in fast mode first.
    pub fn cancel_execution(&mut self) {
        for action in self.sequencer.drain() {
            self.graph.terminate(action);
        }
        self.pump();
        let stray = self.graph.terminate_all();
        if stray > 0 {
            tracing::debug!(count = stray, "terminated actions outside any sequencer");
            self.pump();
        }
    }

    /// Terminate the chain running on `name`, if any.
    pub fn terminate_sequencer(&mut self, name: &str) {
        if let Some(action) = self.sequencer.take(name) {
            tracing::debug!(sequencer = name, action = %action, "terminating sequencer");
            self.graph.terminate(action);
        }
        self.pump();
    }

    pub fn is_sequencer_running(&self, name: &str) -> bool {
        self.sequencer
            .get(name)
            .is_some_and(|action| self.graph.is_pending(action))
    }

    /// Simulate a press on `uid`: runs its `onPress` handler.
    ///
    /// Disabled components ignore presses.
    pub fn press(&mut self, uid: ComponentId) -> ActionRef {
        let enabled = self
            .tree
            .get(uid)
            .is_some_and(|c| !c.has_state(ComponentStates::DISABLED));
        if !enabled {
            return ActionRef::empty();
        }
        let action = self.run_handler(uid, "onPress", "Press", false, None);
        let handle = self.action_handle(action);
        self.pump();
        handle
    }

    // -- Components ---------------------------------------------------------

    pub fn find_component_by_id(&self, id: &str) -> Option<ComponentId> {
        self.tree.find_by_id(id)
    }

    pub fn component(&self, uid: ComponentId) -> Option<&Component> {
        self.tree.get(uid)
    }

    pub fn top_component(&self) -> Option<ComponentId> {
        self.tree.root()
    }

    pub fn focused_component(&self) -> Option<ComponentId> {
        self.focus.focused()
    }

    pub fn tree(&self) -> &ComponentTree {
        &self.tree
    }

    // -- Media --------------------------------------------------------------

    /// Host report that `url` finished loading or failed.
    pub fn media_load_complete(&mut self, url: &str, ready: bool, error_code: i32, error_reason: &str) {
        self.media
            .media_load_complete(url, ready, error_code, error_reason);
        self.pump();
    }

    pub fn media_manager(&self) -> &Rc<dyn MediaManager> {
        &self.media
    }

    // -- Introspection ------------------------------------------------------

    pub fn console_messages(&self) -> &[ConsoleMessage] {
        self.session.messages()
    }

    pub fn take_console_messages(&mut self) -> Vec<ConsoleMessage> {
        self.session.take()
    }

    /// Executed commands, when [`RootConfig::record_commands`] is on.
    pub fn take_command_log(&mut self) -> Vec<CommandRecord> {
        std::mem::take(&mut self.command_log)
    }

    pub fn pending_actions(&self) -> usize {
        self.graph.pending_count()
    }

    pub fn timer_count(&self) -> usize {
        self.graph.timer_count()
    }

    pub fn config(&self) -> &RootConfig {
        &self.config
    }

    /// Evaluate `value` against the document's root data.
    pub fn evaluate(&self, value: &Value) -> Value {
        self.evaluator.evaluate_recursive(value, &self.root_ctx)
    }

    /// Suspended multi-step commands.
    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    fn action_handle(&self, action: Option<ActionId>) -> ActionRef {
        action.map_or_else(ActionRef::empty, |id| self.graph.action_ref(id))
    }
}
