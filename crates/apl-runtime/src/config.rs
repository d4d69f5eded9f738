#![forbid(unsafe_code)]

//! Root configuration.
//!
//! [`RootConfig`] is a plain builder: every setter consumes and returns the
//! config. The serialisable subset can also be loaded from a JSON file with
//! [`RootConfig::from_json_str`] / [`RootConfig::from_path`]; host-provided
//! collaborators (media manager, player factory, extension commands) can
//! only be set in code.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use apl_runtime::config::{ExperimentalFeatures, RootConfig};
//!
//! let config = RootConfig::new()
//!     .allow_open_url(true)
//!     .page_transition_duration(Duration::from_millis(250))
//!     .experimental_features(ExperimentalFeatures::MEDIA_REQUEST_EVENTS);
//! assert!(config.is_open_url_allowed());
//! ```

use std::fmt;
use std::path::Path;
use std::rc::Rc;
use std::time::Duration;

use apl_core::headers::HeaderRule;
use apl_core::media::MediaManager;
use bitflags::bitflags;
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::command::ExtensionCommandDefinition;
use crate::media_player::MediaPlayerFactory;

/// Default duration of a page transition.
pub const DEFAULT_PAGE_TRANSITION: Duration = Duration::from_millis(500);

/// Default limit on nested macro invocations.
pub const DEFAULT_MAX_MACRO_DEPTH: usize = 32;

bitflags! {
    /// Optional behaviours that change which events the engine emits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ExperimentalFeatures: u32 {
        /// The focus manager pushes `Focus` events.
        const FOCUS_EVENTS = 1 << 0;
        /// The media manager pushes `MediaRequest` events.
        const MEDIA_REQUEST_EVENTS = 1 << 1;
    }
}

impl Default for ExperimentalFeatures {
    fn default() -> Self {
        Self::all()
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Failure to load a configuration file.
#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(serde_json::Error),
    /// A header rule whose pattern is empty or not a valid regex.
    InvalidHeaderRule(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "failed to read config: {e}"),
            ConfigError::Parse(e) => write!(f, "failed to parse config: {e}"),
            ConfigError::InvalidHeaderRule(reason) => write!(f, "invalid header rule: {reason}"),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io(e) => Some(e),
            ConfigError::Parse(e) => Some(e),
            ConfigError::InvalidHeaderRule(_) => None,
        }
    }
}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(e: serde_json::Error) -> Self {
        ConfigError::Parse(e)
    }
}

pub type ConfigResult<T> = Result<T, ConfigError>;

// ---------------------------------------------------------------------------
// RootConfig
// ---------------------------------------------------------------------------

/// Configuration of one [`RootContext`](crate::root::RootContext).
#[derive(Clone)]
pub struct RootConfig {
    allow_open_url: bool,
    disallow_video: bool,
    header_filters: Vec<HeaderRule>,
    default_send_event_flags: Map<String, Value>,
    page_transition_duration: Duration,
    experimental: ExperimentalFeatures,
    record_commands: bool,
    max_macro_depth: usize,
    media_manager: Option<Rc<dyn MediaManager>>,
    media_player_factory: Option<Rc<dyn MediaPlayerFactory>>,
    extension_commands: Vec<ExtensionCommandDefinition>,
}

impl Default for RootConfig {
    fn default() -> Self {
        Self {
            allow_open_url: false,
            disallow_video: false,
            header_filters: Vec::new(),
            default_send_event_flags: Map::new(),
            page_transition_duration: DEFAULT_PAGE_TRANSITION,
            experimental: ExperimentalFeatures::default(),
            record_commands: false,
            max_macro_depth: DEFAULT_MAX_MACRO_DEPTH,
            media_manager: None,
            media_player_factory: None,
            extension_commands: Vec::new(),
        }
    }
}

impl fmt::Debug for RootConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RootConfig")
            .field("allow_open_url", &self.allow_open_url)
            .field("disallow_video", &self.disallow_video)
            .field("header_filters", &self.header_filters)
            .field("default_send_event_flags", &self.default_send_event_flags)
            .field("page_transition_duration", &self.page_transition_duration)
            .field("experimental", &self.experimental)
            .field("record_commands", &self.record_commands)
            .field("max_macro_depth", &self.max_macro_depth)
            .field("media_manager", &self.media_manager.is_some())
            .field("media_player_factory", &self.media_player_factory.is_some())
            .field("extension_commands", &self.extension_commands.len())
            .finish()
    }
}

impl RootConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Permit OpenURL to reach the host. When off, OpenURL fails with 405.
    #[must_use]
    pub fn allow_open_url(mut self, allow: bool) -> Self {
        self.allow_open_url = allow;
        self
    }

    /// Refuse ControlMedia and PlayMedia.
    #[must_use]
    pub fn disallow_video(mut self, disallow: bool) -> Self {
        self.disallow_video = disallow;
        self
    }

    /// Ordered header rules applied to media requests.
    ///
    /// Only used when the default media manager is created by the root.
    #[must_use]
    pub fn header_filters(mut self, rules: Vec<HeaderRule>) -> Self {
        self.header_filters = rules;
        self
    }

    /// Flags merged under every SendEvent's own `flags`.
    #[must_use]
    pub fn default_send_event_flags(mut self, flags: Map<String, Value>) -> Self {
        self.default_send_event_flags = flags;
        self
    }

    #[must_use]
    pub fn page_transition_duration(mut self, duration: Duration) -> Self {
        self.page_transition_duration = duration;
        self
    }

    #[must_use]
    pub fn experimental_features(mut self, features: ExperimentalFeatures) -> Self {
        self.experimental = features;
        self
    }

    /// Keep a log of executed commands, drained with
    /// [`RootContext::take_command_log`](crate::root::RootContext::take_command_log).
    #[must_use]
    pub fn record_commands(mut self, record: bool) -> Self {
        self.record_commands = record;
        self
    }

    #[must_use]
    pub fn max_macro_depth(mut self, depth: usize) -> Self {
        self.max_macro_depth = depth;
        self
    }

    #[must_use]
    pub fn media_manager(mut self, manager: Rc<dyn MediaManager>) -> Self {
        self.media_manager = Some(manager);
        self
    }

    #[must_use]
    pub fn media_player_factory(mut self, factory: Rc<dyn MediaPlayerFactory>) -> Self {
        self.media_player_factory = Some(factory);
        self
    }

    /// Register an extension command.
    #[must_use]
    pub fn extension_command(mut self, definition: ExtensionCommandDefinition) -> Self {
        self.extension_commands.push(definition);
        self
    }

    // -- Getters ------------------------------------------------------------

    pub fn is_open_url_allowed(&self) -> bool {
        self.allow_open_url
    }

    pub fn is_video_disallowed(&self) -> bool {
        self.disallow_video
    }

    pub fn header_rules(&self) -> &[HeaderRule] {
        &self.header_filters
    }

    pub fn send_event_flags(&self) -> &Map<String, Value> {
        &self.default_send_event_flags
    }

    pub fn transition_duration(&self) -> Duration {
        self.page_transition_duration
    }

    pub fn features(&self) -> ExperimentalFeatures {
        self.experimental
    }

    pub fn is_recording_commands(&self) -> bool {
        self.record_commands
    }

    pub fn macro_depth_limit(&self) -> usize {
        self.max_macro_depth
    }

    pub fn media(&self) -> Option<&Rc<dyn MediaManager>> {
        self.media_manager.as_ref()
    }

    pub fn player_factory(&self) -> Option<&Rc<dyn MediaPlayerFactory>> {
        self.media_player_factory.as_ref()
    }

    pub fn extensions(&self) -> &[ExtensionCommandDefinition] {
        &self.extension_commands
    }

    // -- File loading -------------------------------------------------------

    /// Parse the serialisable subset of the configuration from JSON.
    ///
    /// Omitted keys keep their defaults; unknown keys are rejected.
    pub fn from_json_str(text: &str) -> ConfigResult<Self> {
        let file: ConfigFile = serde_json::from_str(text)?;
        file.into_config()
    }

    /// Read and parse a JSON configuration file.
    pub fn from_path(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct ConfigFile {
    allow_open_url: Option<bool>,
    disallow_video: Option<bool>,
    header_filters: Option<Vec<HeaderFilterEntry>>,
    default_send_event_flags: Option<Map<String, Value>>,
    page_transition_duration_ms: Option<u64>,
    max_macro_depth: Option<usize>,
    record_commands: Option<bool>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct HeaderFilterEntry {
    pattern: String,
    allow: bool,
}

impl ConfigFile {
    fn into_config(self) -> ConfigResult<RootConfig> {
        let mut config = RootConfig::default();
        if let Some(allow) = self.allow_open_url {
            config.allow_open_url = allow;
        }
        if let Some(disallow) = self.disallow_video {
            config.disallow_video = disallow;
        }
        if let Some(entries) = self.header_filters {
            config.header_filters = entries
                .into_iter()
                .enumerate()
                .map(|(index, entry)| {
                    HeaderRule::new(entry.pattern, entry.allow)
                        .map_err(|e| ConfigError::InvalidHeaderRule(format!("rule {index}: {e}")))
                })
                .collect::<ConfigResult<_>>()?;
        }
        if let Some(flags) = self.default_send_event_flags {
            config.default_send_event_flags = flags;
        }
        if let Some(ms) = self.page_transition_duration_ms {
            config.page_transition_duration = Duration::from_millis(ms);
        }
        if let Some(depth) = self.max_macro_depth {
            config.max_macro_depth = depth;
        }
        if let Some(record) = self.record_commands {
            config.record_commands = record;
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = RootConfig::default();
        assert!(!config.is_open_url_allowed());
        assert!(!config.is_video_disallowed());
        assert_eq!(config.transition_duration(), DEFAULT_PAGE_TRANSITION);
        assert_eq!(config.features(), ExperimentalFeatures::all());
        assert_eq!(config.macro_depth_limit(), DEFAULT_MAX_MACRO_DEPTH);
    }

    #[test]
    fn json_overrides_only_given_keys() {
        let config = RootConfig::from_json_str(
            r#"{"allowOpenUrl": true, "pageTransitionDurationMs": 100,
                "headerFilters": [{"pattern": "x-.*", "allow": false}]}"#,
        )
        .expect("valid config");
        assert!(config.is_open_url_allowed());
        assert_eq!(config.transition_duration(), Duration::from_millis(100));
        assert_eq!(config.header_rules(), [HeaderRule::deny("x-.*").expect("valid pattern")]);
        assert!(!config.is_recording_commands());
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = RootConfig::from_json_str(r#"{"allowOpenURL": true}"#).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn empty_header_pattern_is_rejected() {
        let err = RootConfig::from_json_str(r#"{"headerFilters": [{"pattern": " ", "allow": true}]}"#)
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidHeaderRule(_)));
        assert!(err.to_string().contains("rule 0"));
    }

    #[test]
    fn malformed_header_regex_is_rejected() {
        let err = RootConfig::from_json_str(
            r#"{"headerFilters": [{"pattern": "ok", "allow": true}, {"pattern": "(x-", "allow": false}]}"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidHeaderRule(_)));
        assert!(err.to_string().contains("rule 1"));
    }
}
