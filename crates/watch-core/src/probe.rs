//! The player probe: how the engine sees and drives the local video.
//!
//! Locating the player, the video and a showing advertisement is left to
//! implementations of [`PlayerProbe`]. The engine never assumes a strategy.
//! [`SimulatedPlayer`] is a headless implementation that records every
//! mutation and emits the events a real player would.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tokio::sync::mpsc;
use watch_protocol::VideoState;

/// A playback mutation rejected by the player.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{action} rejected: {reason}")]
pub struct PlaybackError {
    /// What was attempted.
    pub action: PlaybackAction,
    /// Why the player refused.
    pub reason: String,
}

impl PlaybackError {
    /// Create a new playback error.
    #[must_use]
    pub fn new(action: PlaybackAction, reason: impl Into<String>) -> Self {
        Self {
            action,
            reason: reason.into(),
        }
    }
}

/// A mutation the engine can apply to the video.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackAction {
    /// Change position.
    Seek,
    /// Pause playback.
    Pause,
    /// Resume playback.
    Resume,
}

impl fmt::Display for PlaybackAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlaybackAction::Seek => write!(f, "Seek"),
            PlaybackAction::Pause => write!(f, "Pause"),
            PlaybackAction::Resume => write!(f, "Play"),
        }
    }
}

/// A local playback event, whether caused by the user or by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackEvent {
    /// Playback started.
    Play,
    /// Playback paused.
    Pause,
    /// A seek completed.
    Seeked,
}

/// Handle to the video element.
pub trait VideoElement {
    /// Current position in seconds.
    fn position(&self) -> f64;

    /// Whether playback is paused.
    fn is_paused(&self) -> bool;

    /// Whether enough metadata is loaded to read and set the position.
    fn is_ready(&self) -> bool;

    /// Move to `position` seconds.
    fn seek_to(&mut self, position: f64) -> Result<(), PlaybackError>;

    /// Pause playback.
    fn pause(&mut self) -> Result<(), PlaybackError>;

    /// Resume playback. Players may refuse, e.g. without user activation.
    fn resume(&mut self) -> Result<(), PlaybackError>;

    /// Snapshot of position and pause state.
    fn state(&self) -> VideoState {
        VideoState::new(self.position(), self.is_paused())
    }
}

/// Finds the player and reports whether an advertisement is showing.
pub trait PlayerProbe {
    /// The video handle this probe hands out.
    type Video: VideoElement;

    /// Whether the player container is present.
    fn locate_player(&mut self) -> bool;

    /// Find the video inside the player.
    fn locate_video(&mut self) -> Option<Self::Video>;

    /// Whether an advertisement is currently showing.
    fn is_ad_showing(&mut self) -> bool;
}

/// A mutation recorded by [`SimulatedPlayer`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PlayerCommand {
    /// `seek_to` was called.
    Seek(f64),
    /// `pause` was called.
    Pause,
    /// `resume` was called.
    Resume,
}

#[derive(Debug)]
struct PlayerModel {
    player_present: bool,
    video_present: bool,
    ready: bool,
    position: f64,
    paused: bool,
    ad_showing: bool,
    reject_seeks: bool,
    reject_resumes: bool,
    commands: Vec<PlayerCommand>,
    events: Option<mpsc::UnboundedSender<PlaybackEvent>>,
}

impl PlayerModel {
    fn emit(&self, event: PlaybackEvent) {
        if let Some(events) = &self.events {
            let _ = events.send(event);
        }
    }
}

/// Headless player used in simulations and tests.
///
/// Clones share the same player. Mutations through the video handle emit the
/// events a browser video would, so engine-caused changes show up as local
/// events exactly like user actions do.
#[derive(Debug, Clone)]
pub struct SimulatedPlayer {
    model: Arc<Mutex<PlayerModel>>,
}

impl Default for SimulatedPlayer {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedPlayer {
    /// A ready, paused video at position 0.
    #[must_use]
    pub fn new() -> Self {
        Self {
            model: Arc::new(Mutex::new(PlayerModel {
                player_present: true,
                video_present: true,
                ready: true,
                position: 0.0,
                paused: true,
                ad_showing: false,
                reject_seeks: false,
                reject_resumes: false,
                commands: Vec::new(),
                events: None,
            })),
        }
    }

    fn model(&self) -> MutexGuard<'_, PlayerModel> {
        self.model.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Receive the player's events. Replaces any earlier subscriber.
    #[must_use]
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<PlaybackEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.model().events = Some(tx);
        rx
    }

    /// Current position.
    #[must_use]
    pub fn position(&self) -> f64 {
        self.model().position
    }

    /// Whether playback is paused.
    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.model().paused
    }

    /// Mutations applied through the video handle so far.
    #[must_use]
    pub fn commands(&self) -> Vec<PlayerCommand> {
        self.model().commands.clone()
    }

    /// Forget recorded mutations.
    pub fn clear_commands(&self) {
        self.model().commands.clear();
    }

    /// Set the position without emitting an event, as playback progress does.
    pub fn set_position(&self, position: f64) {
        self.model().position = position;
    }

    /// Show or hide an advertisement.
    pub fn set_ad_showing(&self, showing: bool) {
        self.model().ad_showing = showing;
    }

    /// Whether the video has loaded metadata.
    pub fn set_ready(&self, ready: bool) {
        self.model().ready = ready;
    }

    /// Add or remove the video element.
    pub fn set_video_present(&self, present: bool) {
        self.model().video_present = present;
    }

    /// Add or remove the whole player.
    pub fn set_player_present(&self, present: bool) {
        self.model().player_present = present;
    }

    /// Make seeks fail.
    pub fn reject_seeks(&self, reject: bool) {
        self.model().reject_seeks = reject;
    }

    /// Make resumes fail.
    pub fn reject_resumes(&self, reject: bool) {
        self.model().reject_resumes = reject;
    }

    /// The user presses play.
    pub fn user_play(&self) {
        let mut model = self.model();
        model.paused = false;
        model.emit(PlaybackEvent::Play);
    }

    /// The user presses pause.
    pub fn user_pause(&self) {
        let mut model = self.model();
        model.paused = true;
        model.emit(PlaybackEvent::Pause);
    }

    /// The user seeks.
    pub fn user_seek(&self, position: f64) {
        let mut model = self.model();
        model.position = position;
        model.emit(PlaybackEvent::Seeked);
    }
}

impl PlayerProbe for SimulatedPlayer {
    type Video = SimulatedVideo;

    fn locate_player(&mut self) -> bool {
        self.model().player_present
    }

    fn locate_video(&mut self) -> Option<SimulatedVideo> {
        let model = self.model();
        (model.player_present && model.video_present).then(|| SimulatedVideo {
            model: Arc::clone(&self.model),
        })
    }

    fn is_ad_showing(&mut self) -> bool {
        let model = self.model();
        model.player_present && model.ad_showing
    }
}

/// Video handle of a [`SimulatedPlayer`].
#[derive(Debug, Clone)]
pub struct SimulatedVideo {
    model: Arc<Mutex<PlayerModel>>,
}

impl SimulatedVideo {
    fn model(&self) -> MutexGuard<'_, PlayerModel> {
        self.model.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl VideoElement for SimulatedVideo {
    fn position(&self) -> f64 {
        self.model().position
    }

    fn is_paused(&self) -> bool {
        self.model().paused
    }

    fn is_ready(&self) -> bool {
        self.model().ready
    }

    fn seek_to(&mut self, position: f64) -> Result<(), PlaybackError> {
        let mut model = self.model();
        model.commands.push(PlayerCommand::Seek(position));
        if model.reject_seeks {
            return Err(PlaybackError::new(PlaybackAction::Seek, "seeking disabled"));
        }

        model.position = position;
        model.emit(PlaybackEvent::Seeked);
        Ok(())
    }

    fn pause(&mut self) -> Result<(), PlaybackError> {
        let mut model = self.model();
        model.commands.push(PlayerCommand::Pause);
        if !model.paused {
            model.paused = true;
            model.emit(PlaybackEvent::Pause);
        }
        Ok(())
    }

    fn resume(&mut self) -> Result<(), PlaybackError> {
        let mut model = self.model();
        model.commands.push(PlayerCommand::Resume);
        if model.reject_resumes {
            return Err(PlaybackError::new(
                PlaybackAction::Resume,
                "play() is not allowed without user activation",
            ));
        }

        if model.paused {
            model.paused = false;
            model.emit(PlaybackEvent::Play);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mutations_emit_events() {
        let mut player = SimulatedPlayer::new();
        let mut events = player.subscribe();
        let mut video = player.locate_video().unwrap();

        video.seek_to(42.0).unwrap();
        video.resume().unwrap();
        video.resume().unwrap();
        video.pause().unwrap();

        assert_eq!(events.try_recv(), Ok(PlaybackEvent::Seeked));
        assert_eq!(events.try_recv(), Ok(PlaybackEvent::Play));
        assert_eq!(events.try_recv(), Ok(PlaybackEvent::Pause));
        assert!(events.try_recv().is_err());

        assert_eq!(
            player.commands(),
            vec![
                PlayerCommand::Seek(42.0),
                PlayerCommand::Resume,
                PlayerCommand::Resume,
                PlayerCommand::Pause,
            ]
        );
        assert_eq!(video.state(), VideoState::new(42.0, true));
    }

    #[test]
    fn test_rejected_resume_keeps_paused() {
        let mut player = SimulatedPlayer::new();
        player.reject_resumes(true);
        let mut video = player.locate_video().unwrap();

        let err = video.resume().unwrap_err();
        assert_eq!(err.action, PlaybackAction::Resume);
        assert!(video.is_paused());
    }

    #[test]
    fn test_missing_player_hides_video_and_ads() {
        let mut player = SimulatedPlayer::new();
        player.set_ad_showing(true);
        assert!(player.is_ad_showing());

        player.set_player_present(false);
        assert!(!player.locate_player());
        assert!(player.locate_video().is_none());
        assert!(!player.is_ad_showing());
    }
}
