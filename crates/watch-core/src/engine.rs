//! Playback-state reconciliation.
//!
//! The [`Engine`] turns local playback events, remote states, ad transitions
//! and room changes into at most one outbound or applied state mutation each.
//! It performs no I/O of its own: every entry point takes the current instant
//! and returns the [`EngineAction`]s for the caller to carry out, and deferred
//! work is kept in a [`TimerQueue`] the caller polls.
//!
//! Two flags decide whether a local event may be broadcast:
//!
//! - **applying remote** is set while a remote state is being applied and for
//!   a short window afterwards, so the events the mutation itself fires are
//!   not echoed back to the room.
//! - **watching ad** is set while the local viewer is inside an advertisement.
//!   Peers only learn about it through the sentinel state.

use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, trace};
use watch_protocol::{RoomId, VideoState};

use crate::notice::Notice;
use crate::probe::{PlaybackEvent, PlayerProbe, VideoElement};
use crate::timers::{TimerId, TimerQueue};

/// Drift in seconds tolerated before seeking to a remote position.
pub const SEEK_TOLERANCE_SECS: f64 = 1.5;

/// How long local events are ignored after applying a remote state.
pub const SUPPRESSION_WINDOW: Duration = Duration::from_millis(200);

/// Delay between the end of a local ad and resuming playback.
pub const AD_FINISH_DEBOUNCE: Duration = Duration::from_millis(1000);

/// Delay between attaching to the video and the first broadcast.
pub const INITIAL_SYNC_DELAY: Duration = Duration::from_millis(500);

/// Engine timing.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Drift in seconds tolerated before seeking.
    pub seek_tolerance: f64,
    /// How long local events are ignored after applying a remote state.
    pub suppression_window: Duration,
    /// Delay between the end of a local ad and resuming playback.
    pub ad_finish_debounce: Duration,
    /// Delay between attaching and the first broadcast.
    pub initial_sync_delay: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            seek_tolerance: SEEK_TOLERANCE_SECS,
            suppression_window: SUPPRESSION_WINDOW,
            ad_finish_debounce: AD_FINISH_DEBOUNCE,
            initial_sync_delay: INITIAL_SYNC_DELAY,
        }
    }
}

/// What the caller must do after an engine step.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineAction {
    /// Send this state to the room.
    Broadcast(VideoState),
    /// Tell the viewer.
    Notify(Notice),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Deferred {
    EndSuppression,
    ResumeAfterAd,
    InitialSync,
}

/// Reconciles one viewer's playback with the room.
pub struct Engine<P: PlayerProbe> {
    probe: P,
    video: Option<P::Video>,
    room: Option<RoomId>,
    watching_ad: bool,
    applying_remote: bool,
    suppression_timer: Option<TimerId>,
    ad_resume_timer: Option<TimerId>,
    timers: TimerQueue<Deferred>,
    config: EngineConfig,
}

impl<P: PlayerProbe> Engine<P> {
    /// Create an engine that is not attached to any video yet.
    #[must_use]
    pub fn new(probe: P, config: EngineConfig) -> Self {
        Self {
            probe,
            video: None,
            room: None,
            watching_ad: false,
            applying_remote: false,
            suppression_timer: None,
            ad_resume_timer: None,
            timers: TimerQueue::new(),
            config,
        }
    }

    /// The probe.
    pub fn probe(&self) -> &P {
        &self.probe
    }

    /// The probe, mutably.
    pub fn probe_mut(&mut self) -> &mut P {
        &mut self.probe
    }

    /// Room this viewer belongs to.
    #[must_use]
    pub fn room(&self) -> Option<&RoomId> {
        self.room.as_ref()
    }

    /// Whether a video has been found.
    #[must_use]
    pub fn is_attached(&self) -> bool {
        self.video.is_some()
    }

    /// Whether the local viewer is inside an advertisement.
    #[must_use]
    pub fn is_watching_ad(&self) -> bool {
        self.watching_ad
    }

    /// Whether local events are currently suppressed after a remote update.
    #[must_use]
    pub fn is_applying_remote(&self) -> bool {
        self.applying_remote
    }

    /// When [`Engine::poll_timers`] next has work.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        self.timers.next_deadline()
    }

    /// Adopt the room read from storage at startup, without announcing it.
    pub fn restore_room(&mut self, room: Option<RoomId>) {
        self.room = room;
    }

    /// Try to find a ready video.
    ///
    /// On success the ad state is sampled once and the initial sync is
    /// scheduled unless an ad is already showing.
    pub fn try_attach(&mut self, now: Instant) -> Vec<EngineAction> {
        if self.video.is_some() {
            return Vec::new();
        }

        let Some(video) = self.probe.locate_video() else {
            trace!("Video not found yet");
            return Vec::new();
        };
        if !video.is_ready() {
            trace!("Video found but not ready");
            return Vec::new();
        }

        self.video = Some(video);
        info!(room = ?self.room, "Attached to video");

        let mut actions = vec![EngineAction::Notify(Notice::RoomStatus(self.room.clone()))];
        actions.extend(self.poll_ad(now));

        if !self.watching_ad {
            self.timers
                .schedule(now + self.config.initial_sync_delay, Deferred::InitialSync);
        }

        actions
    }

    /// A local play, pause or seek happened.
    pub fn on_local_event(&mut self, event: PlaybackEvent, _now: Instant) -> Vec<EngineAction> {
        trace!(event = ?event, "Local playback event");
        self.local_state_change().into_iter().collect()
    }

    /// Broadcast the local state unless something says we must not.
    fn local_state_change(&mut self) -> Option<EngineAction> {
        if self.applying_remote {
            trace!("Suppressing local event caused by remote state");
            return None;
        }
        if self.room.is_none() || self.watching_ad {
            trace!(watching_ad = self.watching_ad, "Not broadcasting local state");
            return None;
        }

        let state = self.video.as_ref()?.state();
        debug!(state = %state, "Broadcasting local state");
        Some(EngineAction::Broadcast(state))
    }

    /// A state arrived from the room.
    pub fn on_remote_state(
        &mut self,
        room: &RoomId,
        state: VideoState,
        now: Instant,
    ) -> Vec<EngineAction> {
        if self.room.as_ref() != Some(room) {
            debug!(room = %room, "Ignoring state for another room");
            return Vec::new();
        }
        let Some(video) = self.video.as_mut() else {
            return Vec::new();
        };
        if self.watching_ad {
            debug!(state = %state, "Ignoring remote state during local ad");
            return vec![EngineAction::Notify(Notice::SyncIgnoredDuringAd)];
        }

        let local = video.state();
        let seek_needed = !state.is_ad_break()
            && (local.position - state.position).abs() > self.config.seek_tolerance;
        let pause_needed = local.paused != state.paused;

        if !seek_needed && !pause_needed {
            trace!(state = %state, "Already in sync");
            return Vec::new();
        }

        info!(state = %state, seek_needed, pause_needed, "Applying remote state");
        let mut actions = vec![EngineAction::Notify(Notice::Syncing(state))];
        self.applying_remote = true;

        if seek_needed {
            if let Err(e) = video.seek_to(state.position) {
                actions.push(EngineAction::Notify(Notice::PlaybackFailed(e)));
            }
        }

        if pause_needed {
            let result = if state.paused {
                video.pause()
            } else if self.probe.is_ad_showing() {
                // A viewer inside an ad is never pushed into the video.
                if video.is_paused() {
                    Ok(())
                } else {
                    video.pause()
                }
            } else {
                video.resume()
            };

            if let Err(e) = result {
                actions.push(EngineAction::Notify(Notice::PlaybackFailed(e)));
            }
        }

        if let Some(id) = self.suppression_timer.take() {
            self.timers.cancel(id);
        }
        self.suppression_timer = Some(
            self.timers
                .schedule(now + self.config.suppression_window, Deferred::EndSuppression),
        );

        actions
    }

    /// Sample the ad signal from the probe and handle any edge.
    pub fn poll_ad(&mut self, now: Instant) -> Vec<EngineAction> {
        if !self.probe.locate_player() {
            return Vec::new();
        }
        let showing = self.probe.is_ad_showing();
        self.on_ad_signal(showing, now)
    }

    /// The ad signal was observed. Only changes act.
    pub fn on_ad_signal(&mut self, showing: bool, now: Instant) -> Vec<EngineAction> {
        if self.video.is_none() || showing == self.watching_ad {
            return Vec::new();
        }

        self.watching_ad = showing;
        if let Some(id) = self.ad_resume_timer.take() {
            self.timers.cancel(id);
        }

        if showing {
            info!(room = ?self.room, "Local ad started");
            if self.room.is_none() {
                return Vec::new();
            }
            return vec![
                EngineAction::Broadcast(VideoState::ad_break()),
                EngineAction::Notify(Notice::AdStarted),
            ];
        }

        info!(room = ?self.room, "Local ad finished");
        if self.room.is_some() {
            self.ad_resume_timer = Some(
                self.timers
                    .schedule(now + self.config.ad_finish_debounce, Deferred::ResumeAfterAd),
            );
        }
        Vec::new()
    }

    /// The stored room ID changed.
    pub fn set_room(&mut self, room: Option<RoomId>, _now: Instant) -> Vec<EngineAction> {
        if self.room == room {
            return Vec::new();
        }

        let replaced = self.room.is_some();
        self.room = room;
        info!(room = ?self.room, replaced, "Room changed");

        let mut actions = vec![EngineAction::Notify(Notice::RoomChanged {
            room: self.room.clone(),
            replaced,
        })];

        if self.room.is_none() {
            return actions;
        }
        let playing = self.video.as_ref().is_some_and(|video| !video.is_paused());
        if self.video.is_some() && self.watching_ad {
            actions.push(EngineAction::Broadcast(VideoState::ad_break()));
        } else if playing {
            actions.extend(self.local_state_change());
        }

        actions
    }

    /// Run every deferred task due at `now`.
    pub fn poll_timers(&mut self, now: Instant) -> Vec<EngineAction> {
        let mut actions = Vec::new();

        while let Some(task) = self.timers.pop_due(now) {
            match task {
                Deferred::EndSuppression => {
                    self.suppression_timer = None;
                    self.applying_remote = false;
                    trace!("Suppression window over");
                }
                Deferred::ResumeAfterAd => {
                    self.ad_resume_timer = None;
                    actions.extend(self.resume_after_ad());
                }
                Deferred::InitialSync => {
                    debug!("Initial sync");
                    actions.extend(self.local_state_change());
                }
            }
        }

        actions
    }

    fn resume_after_ad(&mut self) -> Vec<EngineAction> {
        // The page may have swapped the video during the ad.
        let Some(video) = self.probe.locate_video() else {
            debug!("Video gone after ad, not resuming");
            return Vec::new();
        };
        let video = self.video.insert(video);

        let mut actions = vec![EngineAction::Notify(Notice::AdFinished)];
        match video.resume() {
            Ok(()) => actions.extend(self.local_state_change()),
            Err(e) => actions.push(EngineAction::Notify(Notice::PlaybackFailed(e))),
        }
        actions
    }
}
