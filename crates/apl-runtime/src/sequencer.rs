#![forbid(unsafe_code)]

//! Named sequencer slots.
//!
//! At most one command chain runs under a given sequencer name. The slot map
//! only remembers which action currently occupies each name; preemption,
//! waiting and cleanup are driven by the root (see `exec`).

use std::collections::BTreeMap;

use apl_core::action::ActionId;

/// Sequencer used by handlers and `execute_commands`.
pub const MAIN_SEQUENCER: &str = "MAIN";

#[derive(Debug, Default)]
pub(crate) struct Sequencer {
    running: BTreeMap<String, ActionId>,
}

impl Sequencer {
    pub fn get(&self, name: &str) -> Option<ActionId> {
        self.running.get(name).copied()
    }

    /// Remove and return the chain running under `name`.
    pub fn take(&mut self, name: &str) -> Option<ActionId> {
        self.running.remove(name)
    }

    pub fn insert(&mut self, name: &str, action: ActionId) {
        self.running.insert(name.to_owned(), action);
    }

    /// Free `name` if it is still occupied by `action`.
    ///
    /// A chain that was preempted finishes after its successor took the
    /// slot; it must not evict the successor.
    pub fn release(&mut self, name: &str, action: ActionId) {
        if self.running.get(name) == Some(&action) {
            self.running.remove(name);
        }
    }

    /// Empty every slot, returning the chains that occupied them.
    pub fn drain(&mut self) -> Vec<ActionId> {
        std::mem::take(&mut self.running).into_values().collect()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.running.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use apl_core::action::ActionGraph;

    #[test]
    fn stale_release_keeps_successor() {
        let mut graph: ActionGraph<()> = ActionGraph::new();
        let old = graph.make_pending();
        let new = graph.make_pending();
        let mut sequencer = Sequencer::default();
        sequencer.insert("S", old);
        sequencer.insert("S", new);
        sequencer.release("S", old);
        assert_eq!(sequencer.get("S"), Some(new));
        sequencer.release("S", new);
        assert_eq!(sequencer.get("S"), None);
    }

    #[test]
    fn drain_empties_every_slot() {
        let mut graph: ActionGraph<()> = ActionGraph::new();
        let mut sequencer = Sequencer::default();
        sequencer.insert(MAIN_SEQUENCER, graph.make_pending());
        sequencer.insert("other", graph.make_pending());
        assert_eq!(sequencer.names().collect::<Vec<_>>(), vec![MAIN_SEQUENCER, "other"]);
        assert_eq!(sequencer.drain().len(), 2);
        assert_eq!(sequencer.names().count(), 0);
    }
}
