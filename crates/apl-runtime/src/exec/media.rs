#![forbid(unsafe_code)]

//! Video control and speech.

use apl_core::action::ActionId;
use apl_core::evaluator::{as_i64, display_string};
use apl_core::event::{ComponentId, Event, EventProperty, EventType};
use serde_json::{Value, json};

use super::{Invocation, Step, Task};
use crate::component::{ComponentKind, ComponentStates};
use crate::media_player::{AudioTrack, MediaPlayer};
use crate::root::RootContext;

const MEDIA_COMMANDS: [&str; 7] = ["play", "pause", "next", "previous", "rewind", "seek", "setTrack"];

/// Karaoke playback of a component's `speech`.
pub(crate) struct SpeakTask {
    target: ComponentId,
}

fn mirror(player: &mut dyn MediaPlayer, command: &str, value: i64) {
    match command {
        "play" => player.play(),
        "pause" => player.pause(),
        "next" => player.next(),
        "previous" => player.previous(),
        "rewind" => player.rewind(),
        "seek" => player.seek(value),
        "setTrack" => player.set_track_index(usize::try_from(value).unwrap_or(0)),
        _ => {}
    }
}

impl RootContext {
    /// Common checks for commands that drive a video player.
    fn video_target(&mut self, inv: &Invocation<'_>) -> Option<ComponentId> {
        let target = inv.target?;
        if self.config.is_video_disallowed() {
            self.session
                .warn(format!("{} disallowed by configuration", inv.kind.name()));
            return None;
        }
        if self.tree.get(target).map(|c| c.kind()) != Some(ComponentKind::Video) {
            let label = self.label(target);
            self.session.warn(format!(
                "{} target '{label}' is not a Video component",
                inv.kind.name()
            ));
            return None;
        }
        Some(target)
    }

    pub(super) fn control_media(&mut self, inv: &Invocation<'_>) -> Option<ActionId> {
        let command = self
            .prop(inv, "command")
            .map(|c| display_string(&c))
            .unwrap_or_default();
        if !MEDIA_COMMANDS.contains(&command.as_str()) {
            self.session.warn("Invalid enumerated property for 'command'");
            return None;
        }
        if inv.fast && command == "play" {
            self.session
                .warn("Ignoring ControlMedia play command in fast mode");
            return None;
        }
        let target = self.video_target(inv)?;
        let value = self.prop(inv, "value").and_then(|v| as_i64(&v)).unwrap_or(0);
        if command == "setTrack" {
            let count = self.tree.get(target).map_or(0, |c| c.source_count());
            if usize::try_from(value).map_or(true, |index| index >= count) {
                self.session
                    .warn(format!("ControlMedia setTrack index {value} is out of range"));
                return None;
            }
        }

        if let Some(player) = self.tree.get_mut(target).and_then(|c| c.player.as_deref_mut()) {
            mirror(player, &command, value);
        }
        tracing::debug!(component = %target, command = %command, value, "control media");
        let (action, handle) = self.graph.make_host();
        self.events.push(
            Event::new(EventType::ControlMedia)
                .with(EventProperty::Command, Value::String(command))
                .with(EventProperty::Value, json!(value))
                .with_component(Some(target))
                .with_action(handle),
        );
        Some(action)
    }

    pub(super) fn play_media(&mut self, inv: &Invocation<'_>) -> Option<ActionId> {
        let track = match self.prop(inv, "audioTrack") {
            Some(name) => match AudioTrack::from_name(&display_string(&name)) {
                Some(track) => track,
                None => {
                    self.session.warn("Invalid enumerated property for 'audioTrack'");
                    return None;
                }
            },
            None => AudioTrack::Foreground,
        };
        let target = self.video_target(inv)?;
        let source = self.prop(inv, "source").unwrap_or(Value::Null);

        let component = self.tree.get_mut(target)?;
        component.props.insert("source".into(), source.clone());
        if let Some(player) = component.player.as_deref_mut() {
            player.set_audio_track(track);
            player.set_track_index(0);
            player.play();
        }
        tracing::debug!(component = %target, track = track.name(), "play media");
        let (action, handle) = self.graph.make_host();
        self.events.push(
            Event::new(EventType::PlayMedia)
                .with(EventProperty::Source, source)
                .with(EventProperty::AudioTrack, Value::String(track.name().to_owned()))
                .with_component(Some(target))
                .with_action(handle),
        );
        Some(action)
    }

    // -- Speech -------------------------------------------------------------

    pub(super) fn speak_item(&mut self, inv: &Invocation<'_>) -> Option<ActionId> {
        let target = inv.target?;
        let Some(speech) = self
            .tree
            .get(target)
            .and_then(|c| c.prop("speech"))
            .filter(|s| !s.is_null())
            .cloned()
        else {
            let label = self.label(target);
            self.session
                .warn(format!("SpeakItem target '{label}' has no speech"));
            return None;
        };
        let highlight = self
            .prop(inv, "highlightMode")
            .map_or_else(|| "line".to_owned(), |h| display_string(&h));
        if highlight != "line" && highlight != "block" {
            self.session
                .warn("Invalid enumerated property for 'highlightMode'");
            return None;
        }
        let align = self
            .prop(inv, "align")
            .map_or_else(|| "visible".to_owned(), |a| display_string(&a));

        let previous = self.tree.get_mut(target)?.speech_action.take();
        if let Some(previous) = previous {
            self.graph.terminate(previous);
        }

        let (host, handle) = self.graph.make_host();
        self.events.push(
            Event::new(EventType::Speak)
                .with(EventProperty::Source, speech)
                .with(EventProperty::HighlightMode, Value::String(highlight))
                .with(EventProperty::Align, Value::String(align))
                .with_component(Some(target))
                .with_action(handle),
        );
        let own = self.spawn(Task::Speak(SpeakTask { target }), host);
        if let Some(component) = self.tree.get_mut(target) {
            component.states.insert(ComponentStates::KARAOKE);
            component.speech_action = Some(own);
        }
        Some(own)
    }

    pub(super) fn finish_speech(&mut self, task: &mut SpeakTask, own: ActionId) -> Step {
        self.end_speech(task.target, own);
        Step::Done
    }

    pub(super) fn abort_speech(&mut self, task: &SpeakTask, own: ActionId) {
        self.end_speech(task.target, own);
    }

    fn end_speech(&mut self, target: ComponentId, own: ActionId) {
        let Some(component) = self.tree.get_mut(target) else {
            return;
        };
        // A newer SpeakItem owns the karaoke state now.
        if component.speech_action != Some(own) {
            return;
        }
        component.speech_action = None;
        component.states.remove(ComponentStates::KARAOKE);
    }
}
