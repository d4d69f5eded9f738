//! User-defined commands from the document's `commands` section.

use apl_runtime::RootConfig;
use apl_runtime::simulator::RootSimulator;
use serde_json::{Value, json};

fn load(commands: Value, on_press: Value, config: RootConfig) -> RootSimulator {
    let doc = json!({
        "type": "APL",
        "commands": commands,
        "mainTemplate": {
            "item": { "type": "TouchWrapper", "id": "button", "onPress": on_press }
        }
    });
    RootSimulator::load_with(&doc.to_string(), Value::Null, config).expect("document loads")
}

#[test]
fn parameters_fall_back_to_defaults() {
    let mut sim = load(
        json!({
            "Greet": {
                "parameters": [{ "name": "who", "default": "bob" }, "punct"],
                "commands": { "type": "Log", "message": "${who}${punct}" }
            }
        }),
        json!([
            { "type": "Greet", "punct": "!" },
            { "type": "Greet", "who": "ann", "punct": "?" }
        ]),
        RootConfig::new(),
    );
    sim.press("button");
    assert_eq!(sim.take_console(), vec!["bob!", "ann?"]);
}

#[test]
fn commands_can_be_passed_as_arguments() {
    let mut sim = load(
        json!({
            "Twice": {
                "parameters": ["action"],
                "commands": ["${action}", "${action}"]
            }
        }),
        json!({ "type": "Twice", "action": { "type": "Log", "message": "tick" } }),
        RootConfig::new(),
    );
    sim.press("button");
    assert_eq!(sim.take_console(), vec!["tick", "tick"]);
}

#[test]
fn macros_keep_sequential_timing() {
    let mut sim = load(
        json!({
            "Later": {
                "parameters": ["message"],
                "commands": [
                    { "type": "Idle", "delay": 100 },
                    { "type": "Log", "message": "${message}" }
                ]
            }
        }),
        json!([{ "type": "Later", "message": "late" }, { "type": "Log", "message": "after" }]),
        RootConfig::new(),
    );
    sim.press("button");
    assert!(sim.take_console().is_empty());
    sim.advance_time(100);
    assert_eq!(sim.take_console(), vec!["late", "after"]);
}

#[test]
fn runaway_recursion_stops_at_the_depth_limit() {
    let mut sim = load(
        json!({
            "Loop": {
                "commands": [
                    { "type": "Log", "message": "again" },
                    { "type": "Loop" }
                ]
            }
        }),
        json!({ "type": "Loop" }),
        RootConfig::new().max_macro_depth(3),
    );
    sim.press("button");
    let console = sim.take_console();
    assert_eq!(&console[..3], ["again", "again", "again"]);
    assert_eq!(console[3], "Command 'Loop' exceeds the maximum macro depth of 3");
    assert_eq!(console.len(), 4);
}

#[test]
fn macro_names_are_case_sensitive() {
    let mut sim = load(
        json!({ "Greet": { "commands": { "type": "Log", "message": "hi" } } }),
        json!({ "type": "greet" }),
        RootConfig::new(),
    );
    sim.press("button");
    assert_eq!(sim.take_console(), vec!["Unable to find command 'greet'"]);
}
