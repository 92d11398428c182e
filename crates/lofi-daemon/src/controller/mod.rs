//! PlaybackController: the station playback state machine.
//!
//! Owns the single media handle plus the current station, play flag and
//! volume/mute.  Every method is synchronous; anything asynchronous (timers,
//! play-request outcomes, media events) comes back in as a
//! `ControllerEvent` through the channel handed to `new`, and the owner
//! feeds it to `handle_event`.  The controller is therefore only ever
//! touched from one task.
//!
//! # Station switch
//! ```text
//!  select_station ──► Loading ──┬── CanPlay ─────────┐ first one wins,
//!                               └── ReadyTimeout ────┤ the other is a no-op
//!                                                    ▼
//!                                     play request (optimistic ReadyPlaying)
//!                                                    │
//!                                 PlaySettled ──► Committed | RolledBack
//! ```
//! Each switch carries a sequence number; timer events from a superseded
//! switch are ignored, and `ListenerExpired` drops the switch record.

use std::sync::Arc;
use std::time::Duration;

use lofi_proto::config::PlayerConfig;
use lofi_proto::protocol::{PlaybackPhase, StationDescriptor};
use lofi_proto::registry::StationRegistry;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

use crate::media::{MediaEvent, MediaHandle, PlayRejection};

#[cfg(test)]
mod tests;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ControllerError {
    #[error("unknown station: {0}")]
    InvalidStation(String),

    #[error("operation not valid while {phase:?}")]
    NotReady { phase: PlaybackPhase },
}

/// Classification of a failed or refused playback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Superseded or permission-gated play request; swallowed.
    PlaybackRejectedBenign,
    /// Any other play-request rejection; state reverted.
    PlaybackRejectedFatal,
    /// Error reported by the handle itself.
    MediaFault,
}

impl FailureKind {
    pub fn of_rejection(rejection: &PlayRejection) -> Self {
        if rejection.is_benign() {
            FailureKind::PlaybackRejectedBenign
        } else {
            FailureKind::PlaybackRejectedFatal
        }
    }
}

/// Emitted after the state mutation it describes.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    PlayingChanged(bool),
    StationChanged(StationDescriptor),
    VolumeChanged { level: u8, muted: bool },
    PlaybackFailed { kind: FailureKind, reason: String },
}

/// Asynchronous inputs into the controller.
#[derive(Debug, Clone, PartialEq)]
pub enum ControllerEvent {
    Media(MediaEvent),
    ReadyTimeout { seq: u64 },
    ListenerExpired { seq: u64 },
    PlaySettled {
        ticket: u64,
        result: Result<(), PlayRejection>,
    },
}

/// Reconciliation state of the most recent play request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlayIntent {
    #[default]
    None,
    /// Request sent, outcome unknown; `is_playing` is optimistic.
    Pending { ticket: u64 },
    Committed,
    RolledBack,
}

/// A load in flight: which source, whether it should start playing once
/// ready, and whether a ready trigger has already acted.
struct PendingLoad {
    seq: u64,
    url: String,
    autoplay: bool,
    fired: bool,
    ready_timer: AbortHandle,
    expiry_timer: AbortHandle,
}

enum ReadyTrigger {
    CanPlay,
    Timeout { seq: u64 },
}

pub struct PlaybackController<M: MediaHandle> {
    registry: Arc<StationRegistry>,
    settings: PlayerConfig,
    media: Option<M>,
    current: StationDescriptor,
    phase: PlaybackPhase,
    is_playing: bool,
    volume: u8,
    is_muted: bool,
    /// Mute came from dragging the volume to zero, not from the user.
    muted_by_volume: bool,
    intent: PlayIntent,
    next_ticket: u64,
    load_seq: u64,
    load: Option<PendingLoad>,
    last_error: Option<String>,
    events_tx: mpsc::UnboundedSender<ControllerEvent>,
    outbox: Vec<Notification>,
}

impl<M: MediaHandle> PlaybackController<M> {
    pub fn new(
        registry: Arc<StationRegistry>,
        settings: PlayerConfig,
        events_tx: mpsc::UnboundedSender<ControllerEvent>,
    ) -> Self {
        let current = registry.first().clone();
        let volume = settings.default_volume.min(100);
        Self {
            registry,
            settings,
            media: None,
            current,
            phase: PlaybackPhase::Idle,
            is_playing: false,
            volume,
            is_muted: volume == 0,
            muted_by_volume: volume == 0,
            intent: PlayIntent::None,
            next_ticket: 0,
            load_seq: 0,
            load: None,
            last_error: None,
            events_tx,
            outbox: Vec::new(),
        }
    }

    // ── accessors ─────────────────────────────────────────────────────────────

    pub fn registry(&self) -> &StationRegistry {
        &self.registry
    }

    pub fn current_station(&self) -> &StationDescriptor {
        &self.current
    }

    pub fn phase(&self) -> PlaybackPhase {
        self.phase
    }

    pub fn is_playing(&self) -> bool {
        self.is_playing
    }

    pub fn volume(&self) -> u8 {
        self.volume
    }

    pub fn is_muted(&self) -> bool {
        self.is_muted
    }

    pub fn play_intent(&self) -> PlayIntent {
        self.intent
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Sequence number of the load still listening for readiness, if any.
    pub fn pending_load_seq(&self) -> Option<u64> {
        self.load.as_ref().map(|l| l.seq)
    }

    /// Notifications produced since the last call, oldest first.
    pub fn take_notifications(&mut self) -> Vec<Notification> {
        std::mem::take(&mut self.outbox)
    }

    // ── operations ────────────────────────────────────────────────────────────

    /// Take ownership of the media handle and start buffering the current
    /// station.  Never auto-plays.
    pub fn initialize(&mut self, mut media: M) -> Result<(), ControllerError> {
        if self.media.is_some() {
            return Err(ControllerError::NotReady { phase: self.phase });
        }
        media.set_source(&self.current.stream_url);
        media.set_volume(self.output_level());
        media.set_muted(self.is_muted);
        media.load();
        self.media = Some(media);
        self.phase = PlaybackPhase::Loading;
        self.arm_load(false);
        info!("controller: initialized on '{}'", self.current.name);
        Ok(())
    }

    pub fn select_station(&mut self, id: &str) -> Result<(), ControllerError> {
        let station = self
            .registry
            .get(id)
            .map_err(|_| ControllerError::InvalidStation(id.to_string()))?
            .clone();
        if self.media.is_none() {
            return Err(ControllerError::NotReady { phase: self.phase });
        }

        self.cancel_load();
        self.intent = PlayIntent::None;
        let level = self.output_level();
        let muted = self.is_muted;
        if let Some(media) = self.media.as_mut() {
            media.pause();
            media.set_source(&station.stream_url);
            media.load();
            media.set_volume(level);
            media.set_muted(muted);
        }

        info!("controller: switching to '{}'", station.name);
        self.current = station.clone();
        self.phase = PlaybackPhase::Loading;
        self.last_error = None;
        let was_playing = std::mem::replace(&mut self.is_playing, false);
        self.arm_load(true);

        self.outbox.push(Notification::StationChanged(station));
        if was_playing {
            self.outbox.push(Notification::PlayingChanged(false));
        }
        Ok(())
    }

    pub fn toggle_play_pause(&mut self) -> Result<(), ControllerError> {
        match self.phase {
            PlaybackPhase::Idle | PlaybackPhase::Loading => {
                Err(ControllerError::NotReady { phase: self.phase })
            }
            PlaybackPhase::ReadyPlaying => {
                if let Some(media) = self.media.as_mut() {
                    media.pause();
                }
                // A still-pending play outcome must not resurrect playback.
                self.intent = PlayIntent::None;
                self.phase = PlaybackPhase::ReadyPaused;
                self.is_playing = false;
                info!("controller: paused '{}'", self.current.name);
                self.outbox.push(Notification::PlayingChanged(false));
                Ok(())
            }
            PlaybackPhase::ReadyPaused | PlaybackPhase::Failed => {
                self.last_error = None;
                self.request_play();
                Ok(())
            }
        }
    }

    /// Apply a new output level.  Zero mutes; leaving zero lifts a mute that
    /// zero caused.  Never resumes stalled playback.
    pub fn set_volume(&mut self, level: u8) {
        let level = level.min(100);
        self.volume = level;
        if level == 0 {
            if !self.is_muted {
                self.muted_by_volume = true;
            }
            self.is_muted = true;
        } else if self.muted_by_volume {
            self.is_muted = false;
            self.muted_by_volume = false;
        }
        self.apply_output();
        debug!("controller: volume {} muted={}", self.volume, self.is_muted);
        self.push_volume_changed();
    }

    pub fn toggle_mute(&mut self) {
        self.is_muted = !self.is_muted;
        self.muted_by_volume = false;
        if !self.is_muted && self.volume == 0 {
            self.volume = self.settings.unmute_volume.clamp(1, 100);
        }
        self.apply_output();
        debug!("controller: mute → {} (volume {})", self.is_muted, self.volume);
        self.push_volume_changed();
    }

    pub fn skip_next(&mut self) -> Result<(), ControllerError> {
        let id = self
            .registry
            .next(&self.current.id)
            .map_err(|_| ControllerError::InvalidStation(self.current.id.clone()))?
            .id
            .clone();
        self.select_station(&id)
    }

    pub fn skip_prev(&mut self) -> Result<(), ControllerError> {
        let id = self
            .registry
            .prev(&self.current.id)
            .map_err(|_| ControllerError::InvalidStation(self.current.id.clone()))?
            .id
            .clone();
        self.select_station(&id)
    }

    pub fn random_station(&mut self) -> Result<(), ControllerError> {
        let id = self
            .registry
            .random_other(&self.current.id)
            .map_err(|_| ControllerError::InvalidStation(self.current.id.clone()))?
            .id
            .clone();
        self.select_station(&id)
    }

    /// Stop and release the media handle.  Valid exactly once per
    /// `initialize`.
    pub fn teardown(&mut self) -> Result<(), ControllerError> {
        let Some(mut media) = self.media.take() else {
            return Err(ControllerError::NotReady { phase: self.phase });
        };
        self.cancel_load();
        media.pause();
        media.release();
        self.intent = PlayIntent::None;
        self.phase = PlaybackPhase::Idle;
        info!("controller: torn down");
        if std::mem::replace(&mut self.is_playing, false) {
            self.outbox.push(Notification::PlayingChanged(false));
        }
        Ok(())
    }

    // ── asynchronous inputs ───────────────────────────────────────────────────

    pub fn handle_event(&mut self, event: ControllerEvent) {
        match event {
            ControllerEvent::Media(MediaEvent::CanPlay) => self.on_ready(ReadyTrigger::CanPlay),
            ControllerEvent::Media(MediaEvent::Error(reason)) => self.on_media_error(reason),
            ControllerEvent::ReadyTimeout { seq } => self.on_ready(ReadyTrigger::Timeout { seq }),
            ControllerEvent::ListenerExpired { seq } => self.on_listener_expired(seq),
            ControllerEvent::PlaySettled { ticket, result } => self.on_play_settled(ticket, result),
        }
    }

    fn on_ready(&mut self, trigger: ReadyTrigger) {
        let Some(load) = self.load.as_mut() else {
            debug!("controller: ready signal with no pending load, ignored");
            return;
        };
        if let ReadyTrigger::Timeout { seq } = trigger {
            if seq != load.seq {
                debug!("controller: stale ready timeout seq={} (current {})", seq, load.seq);
                return;
            }
        }
        if load.fired {
            debug!("controller: load seq={} already started, ready signal is a no-op", load.seq);
            return;
        }
        load.fired = true;
        load.ready_timer.abort();
        let autoplay = load.autoplay;
        let url = load.url.clone();
        match trigger {
            ReadyTrigger::CanPlay => debug!("controller: load seq={} ready", load.seq),
            ReadyTrigger::Timeout { .. } => {
                debug!("controller: load seq={} ready timeout, starting anyway", load.seq)
            }
        }

        if self.phase != PlaybackPhase::Loading {
            return;
        }
        if !autoplay {
            self.phase = PlaybackPhase::ReadyPaused;
            return;
        }
        let source_matches = self.media.as_ref().and_then(|m| m.source()) == Some(url.as_str());
        if !source_matches {
            warn!("controller: handle re-pointed away from {}, not playing", url);
            self.phase = PlaybackPhase::ReadyPaused;
            return;
        }
        self.request_play();
    }

    fn on_listener_expired(&mut self, seq: u64) {
        match self.load.as_ref() {
            Some(load) if load.seq == seq => {
                let fired = load.fired;
                self.cancel_load();
                debug!("controller: load seq={} listener expired", seq);
                // Only reachable when the ready fallback is configured longer
                // than the listener expiry.
                if !fired && self.phase == PlaybackPhase::Loading {
                    self.phase = PlaybackPhase::ReadyPaused;
                }
            }
            _ => debug!("controller: stale listener expiry seq={}", seq),
        }
    }

    fn on_play_settled(&mut self, ticket: u64, result: Result<(), PlayRejection>) {
        match self.intent {
            PlayIntent::Pending { ticket: pending } if pending == ticket => {}
            _ => {
                debug!("controller: outcome of superseded play ticket={} ignored", ticket);
                return;
            }
        }
        match result {
            Ok(()) => {
                debug!("controller: play ticket={} confirmed", ticket);
                self.intent = PlayIntent::Committed;
            }
            Err(rejection) if rejection.is_benign() => {
                info!(
                    "controller: play ticket={} rejected ({}), keeping playing state",
                    ticket, rejection
                );
                self.intent = PlayIntent::Committed;
            }
            Err(rejection) => {
                warn!("controller: play ticket={} failed: {}", ticket, rejection);
                let reason = rejection.to_string();
                self.intent = PlayIntent::RolledBack;
                self.phase = PlaybackPhase::ReadyPaused;
                self.is_playing = false;
                self.last_error = Some(reason.clone());
                self.outbox.push(Notification::PlayingChanged(false));
                self.outbox.push(Notification::PlaybackFailed {
                    kind: FailureKind::of_rejection(&rejection),
                    reason,
                });
            }
        }
    }

    fn on_media_error(&mut self, reason: String) {
        if self.media.is_none() {
            return;
        }
        warn!("controller: media error on '{}': {}", self.current.name, reason);
        self.cancel_load();
        self.intent = PlayIntent::None;
        self.phase = PlaybackPhase::Failed;
        self.last_error = Some(reason.clone());
        if std::mem::replace(&mut self.is_playing, false) {
            self.outbox.push(Notification::PlayingChanged(false));
        }
        self.outbox.push(Notification::PlaybackFailed {
            kind: FailureKind::MediaFault,
            reason,
        });
    }

    // ── helpers ───────────────────────────────────────────────────────────────

    /// Issue one play request and flip to playing before it resolves.
    fn request_play(&mut self) {
        let Some(media) = self.media.as_mut() else {
            return;
        };
        let outcome = media.play();
        self.next_ticket += 1;
        let ticket = self.next_ticket;
        self.intent = PlayIntent::Pending { ticket };
        self.phase = PlaybackPhase::ReadyPlaying;
        info!("controller: play '{}' ticket={}", self.current.name, ticket);

        let tx = self.events_tx.clone();
        tokio::spawn(async move {
            let result = outcome.await;
            let _ = tx.send(ControllerEvent::PlaySettled { ticket, result });
        });

        if !std::mem::replace(&mut self.is_playing, true) {
            self.outbox.push(Notification::PlayingChanged(true));
        }
    }

    fn arm_load(&mut self, autoplay: bool) {
        self.load_seq += 1;
        let seq = self.load_seq;
        let ready_timer = self.spawn_timer(
            self.settings.ready_timeout(),
            ControllerEvent::ReadyTimeout { seq },
        );
        let expiry_timer = self.spawn_timer(
            self.settings.listener_expiry(),
            ControllerEvent::ListenerExpired { seq },
        );
        self.load = Some(PendingLoad {
            seq,
            url: self.current.stream_url.clone(),
            autoplay,
            fired: false,
            ready_timer,
            expiry_timer,
        });
    }

    fn cancel_load(&mut self) {
        if let Some(load) = self.load.take() {
            load.ready_timer.abort();
            load.expiry_timer.abort();
        }
    }

    fn spawn_timer(&self, delay: Duration, event: ControllerEvent) -> AbortHandle {
        let tx = self.events_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(event);
        })
        .abort_handle()
    }

    fn output_level(&self) -> f32 {
        f32::from(self.volume) / 100.0
    }

    fn apply_output(&mut self) {
        let level = self.output_level();
        let muted = self.is_muted;
        if let Some(media) = self.media.as_mut() {
            media.set_volume(level);
            media.set_muted(muted);
        }
    }

    fn push_volume_changed(&mut self) {
        self.outbox.push(Notification::VolumeChanged {
            level: self.volume,
            muted: self.is_muted,
        });
    }
}

impl<M: MediaHandle> Drop for PlaybackController<M> {
    fn drop(&mut self) {
        self.cancel_load();
    }
}
