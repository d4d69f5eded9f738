//! Pager navigation with SetPage and AutoPage.

use std::time::Duration;

use apl_runtime::simulator::RootSimulator;
use apl_runtime::{MAIN_SEQUENCER, RootConfig};
use serde_json::{Value, json};

fn pager_doc(navigation: &str) -> String {
    json!({
        "type": "APL",
        "mainTemplate": {
            "parameters": ["payload"],
            "item": {
                "type": "Pager",
                "id": "pager",
                "navigation": navigation,
                "onPageChanged": { "type": "Log", "message": "page ${event.source.value}" },
                "items": [
                    { "type": "Text", "text": "zero" },
                    { "type": "Text", "text": "one" },
                    { "type": "Text", "text": "two" }
                ]
            }
        }
    })
    .to_string()
}

fn pager(navigation: &str) -> RootSimulator {
    RootSimulator::load(&pager_doc(navigation)).expect("document loads")
}

fn current_page(sim: &RootSimulator) -> usize {
    let uid = sim.root().find_component_by_id("pager").expect("pager");
    sim.root().component(uid).expect("pager").current_page()
}

#[test]
fn set_page_changes_after_the_transition() {
    let mut sim = pager("normal");
    let action = sim.execute(&json!({ "type": "SetPage", "componentId": "pager", "value": 2 }));
    assert!(action.is_pending());
    assert_eq!(current_page(&sim), 0);

    sim.advance_time(499);
    assert_eq!(current_page(&sim), 0);
    sim.advance_time(1);
    assert_eq!(current_page(&sim), 2);
    assert_eq!(sim.take_console(), vec!["page 2"]);
    assert!(action.is_resolved());
}

#[test]
fn relative_moves_stop_at_the_edges_unless_wrapping() {
    let mut sim = pager("normal");
    sim.execute(&json!({
        "type": "SetPage",
        "componentId": "pager",
        "position": "relative",
        "value": -1
    }));
    assert!(!sim.root().is_sequencer_running(MAIN_SEQUENCER));
    sim.advance_to_end();
    assert_eq!(current_page(&sim), 0);

    let mut sim = pager("wrap");
    sim.execute(&json!({
        "type": "SetPage",
        "componentId": "pager",
        "position": "relative",
        "value": -1
    }));
    sim.advance_to_end();
    assert_eq!(current_page(&sim), 2);
}

#[test]
fn immediate_turns() {
    let mut sim = pager("normal");
    sim.execute(&json!({
        "type": "SetPage",
        "componentId": "pager",
        "value": 1,
        "transitionDuration": 0
    }));
    assert_eq!(current_page(&sim), 1);

    sim.execute_fast(&json!({ "type": "SetPage", "componentId": "pager", "value": -1 }));
    assert_eq!(current_page(&sim), 2);
    assert_eq!(sim.take_console(), vec!["page 1", "page 2"]);
}

#[test]
fn set_page_validation() {
    let mut sim = pager("normal");
    sim.execute(&json!([
        { "type": "SetPage", "componentId": "pager", "position": "sideways", "value": 1 },
        { "type": "SetPage", "componentId": "pager" }
    ]));
    assert_eq!(
        sim.take_console(),
        vec![
            "Invalid enumerated property for 'position'",
            "Missing required property 'value' for SetPage",
        ]
    );
    assert_eq!(current_page(&sim), 0);
}

#[test]
fn auto_page_walks_forward_with_pauses() {
    let config = RootConfig::new().page_transition_duration(Duration::ZERO);
    let mut sim = RootSimulator::load_with(&pager_doc("normal"), Value::Null, config)
        .expect("document loads");
    let action = sim.execute(&json!({ "type": "AutoPage", "componentId": "pager", "duration": 100 }));
    assert_eq!(current_page(&sim), 1);
    assert!(action.is_pending());

    sim.advance_time(100);
    assert_eq!(current_page(&sim), 2);
    assert_eq!(sim.take_console(), vec!["page 1", "page 2"]);
    // The last page ends the command without a trailing pause.
    assert!(action.is_resolved());
}

#[test]
fn auto_page_honours_count() {
    let mut sim = pager("normal");
    sim.execute(&json!({ "type": "AutoPage", "componentId": "pager", "count": 1 }));
    sim.advance_to_end();
    assert_eq!(current_page(&sim), 1);
    assert!(!sim.root().is_sequencer_running(MAIN_SEQUENCER));
}

#[test]
fn fast_auto_page_jumps() {
    let mut sim = pager("normal");
    sim.execute_fast(&json!({ "type": "AutoPage", "componentId": "pager", "count": 5 }));
    assert_eq!(current_page(&sim), 2);
    assert_eq!(sim.take_console(), vec!["page 2"]);
}

#[test]
fn cancelled_turn_leaves_the_page_alone() {
    let mut sim = pager("normal");
    sim.execute(&json!({ "type": "SetPage", "componentId": "pager", "value": 1 }));
    sim.root_mut().cancel_execution();
    sim.advance_to_end();
    assert_eq!(current_page(&sim), 0);
    assert!(sim.take_console().is_empty());
}

#[test]
fn removing_the_pager_ends_its_turn() {
    let mut sim = RootSimulator::load(
        &json!({
            "type": "APL",
            "mainTemplate": {
                "item": {
                    "type": "Container",
                    "items": [{
                        "type": "Pager",
                        "id": "pager",
                        "items": [{ "type": "Text" }, { "type": "Text" }]
                    }]
                }
            }
        })
        .to_string(),
    )
    .expect("document loads");
    let action = sim.execute(&json!({ "type": "SetPage", "componentId": "pager", "value": 1 }));
    sim.execute_fast(&json!({ "type": "RemoveItem", "componentId": "pager" }));
    assert!(action.is_terminated());
    assert!(!sim.root().is_sequencer_running(MAIN_SEQUENCER));
}
