/// DaemonCore: single-owner event loop around the playback controller.
///
/// Every input (client commands, controller timers and play outcomes, mpv
/// signals) arrives as a `DaemonEvent` or `ControllerEvent` and is applied
/// here, one at a time.  The controller is never shared with another task.
///
/// After each event the core drains the controller's notifications,
/// publishes a new `PlayerSnapshot` (bumping `rev`) and fans out
/// `BroadcastMessage`s to socket and HTTP clients.  Mutation always
/// precedes the notices describing it.
use std::sync::Arc;

use lofi_proto::config::PlayerConfig;
use lofi_proto::protocol::{Broadcast, Command, MediaHealth, Mood, PlayerSnapshot};
use lofi_proto::registry::StationRegistry;
use lofi_proto::state::StateManager;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use crate::controller::{ControllerError, ControllerEvent, Notification, PlaybackController};
use crate::media::MediaHandle;
use crate::mpv::MpvOutput;
use crate::BroadcastMessage;

// ── DaemonEvent ───────────────────────────────────────────────────────────────

/// All external inputs into the DaemonCore loop.
#[derive(Debug)]
pub enum DaemonEvent {
    /// A command from a TCP client or the HTTP API.
    ClientCommand(Command),
    Controller(ControllerEvent),
    /// mpv process health as seen by the media sequencer.
    MediaHealth(MediaHealth),
    Shutdown,
}

impl From<MpvOutput> for DaemonEvent {
    fn from(output: MpvOutput) -> Self {
        match output {
            MpvOutput::Media(event) => DaemonEvent::Controller(ControllerEvent::Media(event)),
            MpvOutput::Health(health) => DaemonEvent::MediaHealth(health),
        }
    }
}

/// Forward mpv output into the core's event channel.
pub fn forward_media_output(
    mut output_rx: mpsc::UnboundedReceiver<MpvOutput>,
    event_tx: mpsc::Sender<DaemonEvent>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(output) = output_rx.recv().await {
            if event_tx.send(output.into()).await.is_err() {
                break;
            }
        }
    })
}

// ── DaemonCore ────────────────────────────────────────────────────────────────

pub struct DaemonCore<M: MediaHandle> {
    controller: PlaybackController<M>,
    controller_rx: mpsc::UnboundedReceiver<ControllerEvent>,
    state_manager: Arc<StateManager>,
    broadcast_tx: broadcast::Sender<BroadcastMessage>,
    /// Cosmetic, so it lives here rather than in the controller.
    mood: Mood,
    media_health: MediaHealth,
    /// Core-level notices held back until the next publish.
    pending: Vec<Broadcast>,
}

impl<M: MediaHandle> DaemonCore<M> {
    /// Build the controller and hand it the media handle.  Must be called
    /// inside a tokio runtime (the controller arms its timers right away).
    pub fn new(
        registry: StationRegistry,
        settings: PlayerConfig,
        media: M,
        broadcast_tx: broadcast::Sender<BroadcastMessage>,
    ) -> anyhow::Result<Self> {
        let (controller_tx, controller_rx) = mpsc::unbounded_channel();
        let mut controller = PlaybackController::new(Arc::new(registry), settings, controller_tx);
        controller.initialize(media)?;
        // The initial load is not a station change worth announcing.
        controller.take_notifications();

        let initial = snapshot_of(&controller, Mood::default(), &MediaHealth::Absent);
        Ok(Self {
            controller,
            controller_rx,
            state_manager: Arc::new(StateManager::new(PlayerSnapshot { rev: 1, ..initial })),
            broadcast_tx,
            mood: Mood::default(),
            media_health: MediaHealth::Absent,
            pending: Vec::new(),
        })
    }

    /// Shared with the socket and HTTP servers.
    pub fn state_manager(&self) -> Arc<StateManager> {
        Arc::clone(&self.state_manager)
    }

    /// Run until `Shutdown` arrives or every event sender is gone, then tear
    /// the controller down.
    pub async fn run(mut self, mut event_rx: mpsc::Receiver<DaemonEvent>) -> anyhow::Result<()> {
        info!("DaemonCore: starting event loop");

        loop {
            let evt = tokio::select! {
                evt = event_rx.recv() => match evt {
                    Some(evt) => evt,
                    None => {
                        info!("DaemonCore: event channel closed, shutting down");
                        break;
                    }
                },
                Some(evt) = self.controller_rx.recv() => DaemonEvent::Controller(evt),
            };

            match evt {
                DaemonEvent::Shutdown => {
                    info!("DaemonCore: shutdown requested");
                    break;
                }
                DaemonEvent::ClientCommand(cmd) => {
                    info!("DaemonCore: command {:?}", cmd);
                    if let Err(e) = self.handle_command(cmd) {
                        warn!("DaemonCore: command rejected: {}", e);
                        self.notice(Broadcast::Error {
                            message: e.to_string(),
                        });
                    }
                }
                DaemonEvent::Controller(evt) => {
                    self.controller.handle_event(evt);
                    debug!(
                        "DaemonCore: phase={:?} intent={:?} pending_load={:?}",
                        self.controller.phase(),
                        self.controller.play_intent(),
                        self.controller.pending_load_seq()
                    );
                }
                DaemonEvent::MediaHealth(health) => {
                    if self.media_health != health {
                        info!("DaemonCore: mpv health {:?} → {:?}", self.media_health, health);
                        self.media_health = health;
                    }
                }
            }
            self.flush().await;
        }

        self.cleanup().await;
        Ok(())
    }

    fn handle_command(&mut self, cmd: Command) -> Result<(), ControllerError> {
        match cmd {
            Command::SelectStation { id } => self.controller.select_station(&id)?,
            Command::TogglePlayPause => self.controller.toggle_play_pause()?,
            Command::SkipNext => self.controller.skip_next()?,
            Command::SkipPrev => self.controller.skip_prev()?,
            Command::Random => self.controller.random_station()?,
            Command::SetVolume { level } => self.controller.set_volume(level),
            Command::ToggleMute => self.controller.toggle_mute(),
            Command::SetMood { mood } => {
                if self.mood != mood {
                    self.mood = mood;
                    self.pending.push(Broadcast::MoodChanged { mood });
                }
            }
            Command::GetState => {
                let _ = self.broadcast_tx.send(BroadcastMessage::StateUpdated);
            }
        }
        Ok(())
    }

    /// Publish the snapshot, then announce what changed.
    async fn flush(&mut self) {
        let notifications = self.controller.take_notifications();
        let changed = self.state_manager.publish(self.snapshot()).await;
        for notification in notifications {
            self.notice(notice_for(notification));
        }
        for broadcast in std::mem::take(&mut self.pending) {
            self.notice(broadcast);
        }
        if changed {
            let _ = self.broadcast_tx.send(BroadcastMessage::StateUpdated);
        }
    }

    fn notice(&self, broadcast: Broadcast) {
        // No subscribers is fine.
        let _ = self.broadcast_tx.send(BroadcastMessage::Notice(broadcast));
    }

    fn snapshot(&self) -> PlayerSnapshot {
        snapshot_of(&self.controller, self.mood, &self.media_health)
    }

    async fn cleanup(&mut self) {
        info!("DaemonCore: cleanup, releasing media");
        if let Err(e) = self.controller.teardown() {
            debug!("DaemonCore: teardown skipped: {}", e);
        }
        self.flush().await;
    }
}

fn snapshot_of<M: MediaHandle>(
    ctrl: &PlaybackController<M>,
    mood: Mood,
    media_health: &MediaHealth,
) -> PlayerSnapshot {
    PlayerSnapshot {
        rev: 0,
        stations: ctrl.registry().list().to_vec(),
        current_station: ctrl.current_station().id.clone(),
        phase: ctrl.phase(),
        is_playing: ctrl.is_playing(),
        volume: ctrl.volume(),
        is_muted: ctrl.is_muted(),
        mood,
        last_error: ctrl.last_error().map(str::to_string),
        media_health: media_health.clone(),
    }
}

fn notice_for(notification: Notification) -> Broadcast {
    match notification {
        Notification::PlayingChanged(playing) => Broadcast::PlayingChanged { playing },
        Notification::StationChanged(station) => Broadcast::StationChanged { station },
        Notification::VolumeChanged { level, muted } => Broadcast::VolumeChanged { level, muted },
        Notification::PlaybackFailed { kind, reason } => {
            debug!("DaemonCore: playback failed ({:?}): {}", kind, reason);
            Broadcast::PlaybackFailed { reason }
        }
    }
}
