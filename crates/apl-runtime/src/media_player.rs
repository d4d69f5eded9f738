#![forbid(unsafe_code)]

//! Media player collaborator seam.
//!
//! Video components get a [`MediaPlayer`] from the host's
//! [`MediaPlayerFactory`] when they are inflated. ControlMedia and PlayMedia
//! mirror their effect onto the player, and removing a component halts and
//! releases it.

use apl_core::event::ComponentId;

/// Audio routing requested by PlayMedia.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioTrack {
    Foreground,
    Background,
    None,
}

impl AudioTrack {
    /// Parse an `audioTrack` value; `mute` is an alias of `none`.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "foreground" => Some(AudioTrack::Foreground),
            "background" => Some(AudioTrack::Background),
            "none" | "mute" => Some(AudioTrack::None),
            _ => None,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            AudioTrack::Foreground => "foreground",
            AudioTrack::Background => "background",
            AudioTrack::None => "none",
        }
    }
}

/// Host media player bound to one video component.
pub trait MediaPlayer {
    fn play(&mut self);
    fn pause(&mut self);
    fn next(&mut self);
    fn previous(&mut self);
    fn rewind(&mut self);
    /// Seek relative to the current position, in milliseconds.
    fn seek(&mut self, offset: i64);
    /// Seek to an absolute position, in milliseconds.
    fn seek_to(&mut self, position: i64);
    fn set_track_index(&mut self, index: usize);
    fn set_audio_track(&mut self, track: AudioTrack);
    fn set_mute(&mut self, mute: bool);
    /// Stop playback immediately; the player stays usable.
    fn halt(&mut self);
    /// Release every resource; the player is not used afterwards.
    fn release(&mut self);
}

/// Creates players for video components.
pub trait MediaPlayerFactory {
    fn create_player(&self, component: ComponentId) -> Box<dyn MediaPlayer>;
}
