//! Commands that talk to the host: SendEvent, OpenURL, Finish, Reinflate,
//! Log and extension commands.

use apl_core::event::{EventProperty, EventType};
use apl_runtime::session::LogLevel;
use apl_runtime::simulator::RootSimulator;
use apl_runtime::{ExtensionCommandDefinition, MAIN_SEQUENCER, RootConfig};
use serde_json::{Map, Value, json};

fn doc(item: Value) -> String {
    json!({
        "type": "APL",
        "mainTemplate": { "parameters": ["payload"], "item": item }
    })
    .to_string()
}

fn load(on_press: Value, config: RootConfig) -> RootSimulator {
    let item = json!({
        "type": "Container",
        "items": [
            { "type": "TouchWrapper", "id": "button", "onPress": on_press },
            { "type": "Text", "id": "label", "text": "hello" }
        ]
    });
    RootSimulator::load_with(&doc(item), Value::Null, config).expect("document loads")
}

#[test]
fn send_event_carries_source_components_and_flags() {
    let mut defaults = Map::new();
    defaults.insert("interaction".into(), json!(true));
    defaults.insert("sticky".into(), json!(false));
    let config = RootConfig::new().default_send_event_flags(defaults);
    let mut sim = load(
        json!({
            "type": "SendEvent",
            "arguments": ["${event.source.handler}"],
            "components": ["label"],
            "flags": { "sticky": true }
        }),
        config,
    );
    sim.press("button");

    let event = sim.next_event().expect("send event");
    assert_eq!(event.kind(), EventType::SendEvent);
    assert_eq!(event.value(EventProperty::Arguments), Some(&json!(["Press"])));
    assert_eq!(
        event.value(EventProperty::Components),
        Some(&json!({ "label": "hello" }))
    );
    assert_eq!(
        event.value(EventProperty::Flags),
        Some(&json!({ "interaction": true, "sticky": true }))
    );
    let source = event.value(EventProperty::Source).expect("source");
    assert_eq!(source["type"], json!("TouchWrapper"));
    assert_eq!(source["id"], json!("button"));
    assert!(!event.is_synchronous());
}

#[test]
fn host_commands_without_a_handler_use_the_document_source() {
    let mut sim = load(Value::Null, RootConfig::new());
    sim.execute(&json!({ "type": "SendEvent", "arguments": "solo" }));
    let event = sim.next_event().expect("send event");
    assert_eq!(event.value(EventProperty::Arguments), Some(&json!(["solo"])));
    assert_eq!(event.value(EventProperty::Source).expect("source")["source"], json!("Document"));
}

#[test]
fn open_url_success_resolves_without_on_fail() {
    let mut sim = load(
        json!({
            "type": "OpenURL",
            "source": "https://example.com",
            "onFail": { "type": "Log", "message": "failed ${event.source.value}" }
        }),
        RootConfig::new().allow_open_url(true),
    );
    let action = sim.press("button");
    let event = sim.next_event().expect("open url event");
    assert_eq!(event.kind(), EventType::OpenUrl);
    assert_eq!(event.value(EventProperty::Source), Some(&json!("https://example.com")));
    assert!(action.is_pending());

    event.action_ref().resolve_with(0);
    assert!(!sim.has_event());
    assert!(action.is_resolved());
    assert!(sim.take_console().is_empty());
    assert!(!sim.root().is_sequencer_running(MAIN_SEQUENCER));
}

#[test]
fn open_url_failure_runs_on_fail_with_the_code() {
    let mut sim = load(
        json!({
            "type": "OpenURL",
            "source": "https://example.com",
            "onFail": { "type": "Log", "message": "failed ${event.source.value} in ${event.source.handler}" }
        }),
        RootConfig::new().allow_open_url(true),
    );
    let action = sim.press("button");
    let event = sim.next_event().expect("open url event");
    event.action_ref().resolve_with(404);
    assert!(!sim.has_event());
    assert_eq!(sim.take_console(), vec!["failed 404 in Fail"]);
    assert!(action.is_resolved());
}

#[test]
fn disallowed_open_url_fails_with_405() {
    let mut sim = load(
        json!({
            "type": "OpenURL",
            "source": "https://example.com",
            "onFail": { "type": "Log", "message": "code ${event.source.value}" }
        }),
        RootConfig::new(),
    );
    sim.press("button");
    assert!(!sim.has_event());
    assert_eq!(sim.take_console(), vec!["code 405"]);
}

#[test]
fn finish_validates_its_reason() {
    let mut sim = load(
        json!([
            { "type": "Finish", "reason": "back" },
            { "type": "Finish", "reason": "later" },
            { "type": "Finish" }
        ]),
        RootConfig::new(),
    );
    sim.press("button");
    let reasons: Vec<Value> = sim
        .drain_events()
        .iter()
        .map(|e| e.value(EventProperty::Reason).cloned().unwrap_or(Value::Null))
        .collect();
    assert_eq!(reasons, vec![json!("back"), json!("exit")]);
    assert_eq!(sim.take_console(), vec!["Invalid enumerated property for 'reason'"]);
}

#[test]
fn reinflate_waits_for_the_host() {
    let mut sim = load(json!({ "type": "Reinflate" }), RootConfig::new());
    sim.press("button");
    let event = sim.next_event().expect("reinflate");
    assert_eq!(event.kind(), EventType::Reinflate);
    assert!(sim.root().is_sequencer_running(MAIN_SEQUENCER));
    event.action_ref().resolve();
    assert!(!sim.has_event());
    assert!(!sim.root().is_sequencer_running(MAIN_SEQUENCER));
}

#[test]
fn log_levels_and_arguments() {
    let mut sim = load(
        json!([
            { "type": "Log", "level": "error", "message": "boom", "arguments": [1, "two"] },
            { "type": "Log", "level": "loud", "message": "ignored" }
        ]),
        RootConfig::new(),
    );
    sim.press("button");
    let messages = sim.root_mut().take_console_messages();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].level, LogLevel::Error);
    assert_eq!(messages[0].text, r#"boom [1,"two"]"#);
    assert_eq!(messages[1].level, LogLevel::Warn);
    assert_eq!(messages[1].text, "Invalid enumerated property for 'level'");
}

fn hello_extension() -> ExtensionCommandDefinition {
    ExtensionCommandDefinition::new("aplext:hello:10", "Hello")
        .require_resolution(true)
        .property("greeting", json!("hi"), false)
        .property("who", Value::Null, true)
}

#[test]
fn extension_command_emits_event_with_properties() {
    let config = RootConfig::new().extension_command(hello_extension());
    let mut sim = load(
        json!({ "type": "aplext:hello:10:Hello", "who": "${event.source.id}" }),
        config,
    );
    sim.press("button");
    let event = sim.next_event().expect("extension event");
    assert_eq!(event.kind(), EventType::Extension);
    assert_eq!(event.value(EventProperty::ExtensionUri), Some(&json!("aplext:hello:10")));
    assert_eq!(event.value(EventProperty::Name), Some(&json!("Hello")));
    assert_eq!(
        event.value(EventProperty::Value),
        Some(&json!({ "greeting": "hi", "who": "button" }))
    );
    assert!(event.is_synchronous());
    assert!(sim.root().is_sequencer_running(MAIN_SEQUENCER));
    event.action_ref().resolve();
    assert!(!sim.has_event());
    assert!(!sim.root().is_sequencer_running(MAIN_SEQUENCER));
}

#[test]
fn extension_command_checks_required_properties_and_fast_mode() {
    let config = RootConfig::new().extension_command(hello_extension());
    let mut sim = load(Value::Null, config);
    sim.execute(&json!({ "type": "Hello" }));
    sim.execute_fast(&json!({ "type": "Hello", "who": "x" }));
    assert!(!sim.has_event());
    assert_eq!(
        sim.take_console(),
        vec![
            "Missing required property 'who' for Hello",
            "Ignoring Hello command in fast mode",
        ]
    );
}

#[test]
fn fast_extension_without_resolution_is_fire_and_forget() {
    let definition = ExtensionCommandDefinition::new("aplext:ping", "Ping").allow_fast_mode(true);
    let mut sim = load(Value::Null, RootConfig::new().extension_command(definition));
    let action = sim.execute_fast(&json!({ "type": "Ping" }));
    assert!(action.is_empty());
    let event = sim.next_event().expect("extension event");
    assert!(!event.is_synchronous());
}
