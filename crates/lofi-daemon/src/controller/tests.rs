//! State-machine tests for the playback controller.
//!
//! The media handle is a recording fake whose play requests stay pending
//! until the test resolves them.  Tests run on a paused tokio clock, so
//! awaiting the event channel auto-advances to the next timer.

use super::*;
use futures_util::FutureExt;
use lofi_proto::protocol::AccentColor;
use std::collections::VecDeque;
use std::sync::Mutex;
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::media::PlayFuture;

#[derive(Debug, Clone, PartialEq)]
enum Call {
    SetSource(String),
    Load,
    Pause,
    Play(String),
    Volume(u8),
    Muted(bool),
    Release,
}

type PlayReply = oneshot::Sender<Result<(), PlayRejection>>;

#[derive(Clone, Default)]
struct Recorder {
    calls: Arc<Mutex<Vec<Call>>>,
    replies: Arc<Mutex<VecDeque<PlayReply>>>,
    /// When set, the handle lands on this address whatever it is pointed at.
    redirect: Arc<Mutex<Option<String>>>,
}

impl Recorder {
    fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    fn plays(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Play(url) => Some(url),
                _ => None,
            })
            .collect()
    }

    fn clear(&self) {
        self.calls.lock().unwrap().clear();
    }

    fn resolve_oldest(&self, result: Result<(), PlayRejection>) {
        let reply = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .expect("no outstanding play request");
        let _ = reply.send(result);
    }
}

struct FakeMedia {
    source: Option<String>,
    rec: Recorder,
}

impl FakeMedia {
    fn record(&self, call: Call) {
        self.rec.calls.lock().unwrap().push(call);
    }
}

impl MediaHandle for FakeMedia {
    fn set_source(&mut self, url: &str) {
        let landed = self.rec.redirect.lock().unwrap().clone();
        self.source = Some(landed.unwrap_or_else(|| url.to_string()));
        self.record(Call::SetSource(url.to_string()));
    }

    fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }

    fn load(&mut self) {
        self.record(Call::Load);
    }

    fn pause(&mut self) {
        self.record(Call::Pause);
    }

    fn play(&mut self) -> PlayFuture {
        self.record(Call::Play(self.source.clone().unwrap_or_default()));
        let (tx, rx) = oneshot::channel();
        self.rec.replies.lock().unwrap().push_back(tx);
        async move { rx.await.unwrap_or(Err(PlayRejection::Aborted)) }.boxed()
    }

    fn set_volume(&mut self, level: f32) {
        self.record(Call::Volume((level * 100.0).round() as u8));
    }

    fn set_muted(&mut self, muted: bool) {
        self.record(Call::Muted(muted));
    }

    fn release(&mut self) {
        self.record(Call::Release);
    }
}

fn station(id: &str) -> StationDescriptor {
    StationDescriptor {
        id: id.to_string(),
        name: id.to_uppercase(),
        description: format!("station {}", id),
        stream_url: format!("https://streams.example/{}", id),
        accent: AccentColor::Amber,
    }
}

fn url(id: &str) -> String {
    station(id).stream_url
}

struct Harness {
    ctrl: PlaybackController<FakeMedia>,
    rx: mpsc::UnboundedReceiver<ControllerEvent>,
    rec: Recorder,
}

impl Harness {
    /// Registry [a, b, c], initialized but not yet ready.
    fn new() -> Self {
        Self::with_settings(PlayerConfig::default())
    }

    fn with_settings(settings: PlayerConfig) -> Self {
        let registry =
            StationRegistry::new(vec![station("a"), station("b"), station("c")]).unwrap();
        let (tx, rx) = mpsc::unbounded_channel();
        let mut ctrl = PlaybackController::new(Arc::new(registry), settings, tx);
        let rec = Recorder::default();
        ctrl.initialize(FakeMedia {
            source: None,
            rec: rec.clone(),
        })
        .unwrap();
        Self { ctrl, rx, rec }
    }

    /// Initialized and ready-paused on station `a`, with a clean call log.
    fn ready() -> Self {
        Self::ready_with(PlayerConfig::default())
    }

    fn ready_with(settings: PlayerConfig) -> Self {
        let mut h = Self::with_settings(settings);
        h.ctrl.handle_event(ControllerEvent::Media(MediaEvent::CanPlay));
        assert_eq!(h.ctrl.phase(), PlaybackPhase::ReadyPaused);
        h.rec.clear();
        h.ctrl.take_notifications();
        h
    }

    fn can_play(&mut self) {
        self.ctrl
            .handle_event(ControllerEvent::Media(MediaEvent::CanPlay));
    }

    /// Feed events to the controller until one matches `pred`.
    async fn pump_until(&mut self, pred: impl Fn(&ControllerEvent) -> bool) -> ControllerEvent {
        loop {
            let event = self.rx.recv().await.expect("event channel closed");
            self.ctrl.handle_event(event.clone());
            if pred(&event) {
                return event;
            }
        }
    }

    async fn settle_play(&mut self, result: Result<(), PlayRejection>) {
        self.rec.resolve_oldest(result);
        self.pump_until(|e| matches!(e, ControllerEvent::PlaySettled { .. }))
            .await;
    }

    /// Select `id`, let readiness win the race, confirm the play request.
    async fn switch_and_play(&mut self, id: &str) {
        self.ctrl.select_station(id).unwrap();
        self.can_play();
        self.settle_play(Ok(())).await;
    }
}

// ── initialize ────────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_initialize_points_handle_without_autoplay() {
    let mut h = Harness::new();
    assert_eq!(
        h.rec.calls(),
        vec![
            Call::SetSource(url("a")),
            Call::Volume(70),
            Call::Muted(false),
            Call::Load
        ]
    );
    assert_eq!(h.ctrl.phase(), PlaybackPhase::Loading);
    assert!(!h.ctrl.is_playing());

    h.can_play();
    assert_eq!(h.ctrl.phase(), PlaybackPhase::ReadyPaused);
    assert!(h.rec.plays().is_empty());
    assert!(!h.ctrl.is_playing());
}

#[tokio::test(start_paused = true)]
async fn test_initial_load_settles_paused_when_readiness_never_arrives() {
    let mut h = Harness::new();
    let start = Instant::now();
    h.pump_until(|e| matches!(e, ControllerEvent::ReadyTimeout { .. }))
        .await;
    assert!(start.elapsed() >= Duration::from_millis(2000));
    assert_eq!(h.ctrl.phase(), PlaybackPhase::ReadyPaused);
    assert!(h.rec.plays().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_initialize_twice_is_rejected() {
    let mut h = Harness::ready();
    let err = h
        .ctrl
        .initialize(FakeMedia {
            source: None,
            rec: Recorder::default(),
        })
        .unwrap_err();
    assert_eq!(
        err,
        ControllerError::NotReady {
            phase: PlaybackPhase::ReadyPaused
        }
    );
}

#[tokio::test(start_paused = true)]
async fn test_operations_before_initialize_are_not_ready() {
    let registry = StationRegistry::new(vec![station("a"), station("b")]).unwrap();
    let (tx, _rx) = mpsc::unbounded_channel();
    let mut ctrl: PlaybackController<FakeMedia> =
        PlaybackController::new(Arc::new(registry), PlayerConfig::default(), tx);
    assert_eq!(ctrl.phase(), PlaybackPhase::Idle);
    assert_eq!(ctrl.current_station().id, "a");
    assert_eq!(ctrl.volume(), 70);
    assert!(!ctrl.is_muted());
    assert_eq!(
        ctrl.select_station("b"),
        Err(ControllerError::NotReady {
            phase: PlaybackPhase::Idle
        })
    );
    assert!(ctrl.toggle_play_pause().is_err());
    assert_eq!(ctrl.current_station().id, "a");
}

// ── station switch & ready/timeout race ───────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_select_station_reuses_the_same_handle() {
    let mut h = Harness::ready();
    h.ctrl.select_station("b").unwrap();
    let calls = h.rec.calls();
    assert_eq!(
        &calls[..3],
        &[Call::Pause, Call::SetSource(url("b")), Call::Load]
    );
    assert!(!calls.contains(&Call::Release));
    assert_eq!(h.ctrl.phase(), PlaybackPhase::Loading);
    assert_eq!(h.ctrl.current_station().id, "b");
    assert_eq!(
        h.ctrl.take_notifications(),
        vec![Notification::StationChanged(station("b"))]
    );
}

#[tokio::test(start_paused = true)]
async fn test_readiness_before_timer_issues_exactly_one_play() {
    let mut h = Harness::ready();
    h.ctrl.select_station("b").unwrap();
    let seq = h.ctrl.pending_load_seq().unwrap();

    h.can_play();
    assert_eq!(h.rec.plays(), vec![url("b")]);
    assert_eq!(h.ctrl.phase(), PlaybackPhase::ReadyPlaying);
    assert!(h.ctrl.is_playing());

    // The fallback timer firing late must be a no-op.
    h.ctrl.handle_event(ControllerEvent::ReadyTimeout { seq });
    h.can_play();
    assert_eq!(h.rec.plays(), vec![url("b")]);

    h.settle_play(Ok(())).await;
    h.pump_until(|e| matches!(e, ControllerEvent::ListenerExpired { seq: s } if *s == seq))
        .await;
    assert_eq!(h.ctrl.pending_load_seq(), None);
    assert_eq!(h.rec.plays(), vec![url("b")]);
    assert_eq!(h.ctrl.play_intent(), PlayIntent::Committed);
}

#[tokio::test(start_paused = true)]
async fn test_timeout_fallback_plays_when_readiness_never_arrives() {
    let mut h = Harness::ready();
    let start = Instant::now();
    h.ctrl.select_station("c").unwrap();
    h.pump_until(|e| matches!(e, ControllerEvent::ReadyTimeout { .. }))
        .await;
    assert!(start.elapsed() >= Duration::from_millis(2000));
    assert_eq!(h.rec.plays(), vec![url("c")]);
    assert!(h.ctrl.is_playing());

    // Readiness showing up afterwards does not issue a second request.
    h.can_play();
    assert_eq!(h.rec.plays(), vec![url("c")]);
}

#[tokio::test(start_paused = true)]
async fn test_superseded_switch_cannot_play_the_old_station() {
    let mut h = Harness::ready();
    h.ctrl.select_station("b").unwrap();
    let stale_seq = h.ctrl.pending_load_seq().unwrap();
    h.ctrl.select_station("c").unwrap();
    let seq = h.ctrl.pending_load_seq().unwrap();
    assert!(seq > stale_seq);

    h.ctrl
        .handle_event(ControllerEvent::ReadyTimeout { seq: stale_seq });
    h.ctrl
        .handle_event(ControllerEvent::ListenerExpired { seq: stale_seq });
    assert!(h.rec.plays().is_empty());
    assert_eq!(h.ctrl.pending_load_seq(), Some(seq));

    h.pump_until(|e| matches!(e, ControllerEvent::ReadyTimeout { .. }))
        .await;
    assert_eq!(h.rec.plays(), vec![url("c")]);
}

#[tokio::test(start_paused = true)]
async fn test_every_station_settles_as_current() {
    let mut h = Harness::ready();
    let ids: Vec<String> = h
        .ctrl
        .registry()
        .list()
        .iter()
        .map(|s| s.id.clone())
        .collect();
    for id in ids {
        h.switch_and_play(&id).await;
        assert_eq!(h.ctrl.current_station().id, id);
        assert!(h.ctrl.is_playing());
        assert_eq!(h.ctrl.play_intent(), PlayIntent::Committed);
    }
}

#[tokio::test(start_paused = true)]
async fn test_switching_while_playing_notifies_station_then_paused() {
    let mut h = Harness::ready();
    h.switch_and_play("b").await;
    h.ctrl.take_notifications();

    h.ctrl.select_station("c").unwrap();
    assert!(!h.ctrl.is_playing());
    assert_eq!(
        h.ctrl.take_notifications(),
        vec![
            Notification::StationChanged(station("c")),
            Notification::PlayingChanged(false)
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_outcome_of_superseded_play_is_ignored() {
    let mut h = Harness::ready();
    h.ctrl.select_station("b").unwrap();
    h.can_play();
    // Switch again before b's play request resolves.
    h.ctrl.select_station("c").unwrap();
    h.settle_play(Err(PlayRejection::Other("connection reset".into())))
        .await;
    assert_eq!(h.ctrl.phase(), PlaybackPhase::Loading);
    assert_eq!(h.ctrl.last_error(), None);
    assert!(!h
        .ctrl
        .take_notifications()
        .iter()
        .any(|n| matches!(n, Notification::PlaybackFailed { .. })));
}

#[tokio::test(start_paused = true)]
async fn test_unknown_station_fails_fast_and_leaves_state() {
    let mut h = Harness::ready();
    assert_eq!(
        h.ctrl.select_station("nope"),
        Err(ControllerError::InvalidStation("nope".into()))
    );
    assert_eq!(h.ctrl.current_station().id, "a");
    assert_eq!(h.ctrl.phase(), PlaybackPhase::ReadyPaused);
    assert!(h.rec.calls().is_empty());
    assert!(h.ctrl.take_notifications().is_empty());
}

// ── skip ──────────────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_skip_next_walks_the_registry_in_a_circle() {
    let mut h = Harness::ready();
    h.ctrl.skip_next().unwrap();
    h.ctrl.skip_next().unwrap();
    assert_eq!(h.ctrl.current_station().id, "c");
    h.ctrl.skip_next().unwrap();
    assert_eq!(h.ctrl.current_station().id, "a");
}

#[tokio::test(start_paused = true)]
async fn test_skip_next_registry_size_times_returns_home() {
    let mut h = Harness::ready();
    let n = h.ctrl.registry().len();
    for _ in 0..n {
        h.ctrl.skip_next().unwrap();
    }
    assert_eq!(h.ctrl.current_station().id, "a");
}

#[tokio::test(start_paused = true)]
async fn test_skip_prev_and_random_move_off_current() {
    let mut h = Harness::ready();
    h.ctrl.skip_prev().unwrap();
    assert_eq!(h.ctrl.current_station().id, "c");
    h.ctrl.random_station().unwrap();
    assert_ne!(h.ctrl.current_station().id, "c");
}

// ── play / pause reconciliation ───────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_toggle_play_is_optimistic_until_settled() {
    let mut h = Harness::ready();
    h.ctrl.toggle_play_pause().unwrap();
    assert!(h.ctrl.is_playing());
    assert_eq!(h.ctrl.phase(), PlaybackPhase::ReadyPlaying);
    assert!(matches!(h.ctrl.play_intent(), PlayIntent::Pending { .. }));
    assert_eq!(
        h.ctrl.take_notifications(),
        vec![Notification::PlayingChanged(true)]
    );

    h.settle_play(Ok(())).await;
    assert_eq!(h.ctrl.play_intent(), PlayIntent::Committed);
    assert!(h.ctrl.take_notifications().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_benign_rejections_keep_playing_state() {
    for rejection in [PlayRejection::Aborted, PlayRejection::NotAllowed] {
        let mut h = Harness::ready();
        h.ctrl.toggle_play_pause().unwrap();
        h.ctrl.take_notifications();
        h.settle_play(Err(rejection)).await;
        assert!(h.ctrl.is_playing());
        assert_eq!(h.ctrl.phase(), PlaybackPhase::ReadyPlaying);
        assert_eq!(h.ctrl.play_intent(), PlayIntent::Committed);
        assert!(h.ctrl.take_notifications().is_empty());
    }
}

#[tokio::test(start_paused = true)]
async fn test_fatal_rejection_reverts_and_reports() {
    let mut h = Harness::ready();
    h.ctrl.toggle_play_pause().unwrap();
    h.ctrl.take_notifications();
    h.settle_play(Err(PlayRejection::Other("unsupported codec".into())))
        .await;
    assert!(!h.ctrl.is_playing());
    assert_eq!(h.ctrl.phase(), PlaybackPhase::ReadyPaused);
    assert_eq!(h.ctrl.play_intent(), PlayIntent::RolledBack);
    assert_eq!(h.ctrl.last_error(), Some("unsupported codec"));
    assert_eq!(
        h.ctrl.take_notifications(),
        vec![
            Notification::PlayingChanged(false),
            Notification::PlaybackFailed {
                kind: FailureKind::PlaybackRejectedFatal,
                reason: "unsupported codec".into()
            }
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_pause_is_synchronous_and_wins_over_late_outcome() {
    let mut h = Harness::ready();
    h.ctrl.toggle_play_pause().unwrap();
    h.rec.clear();
    h.ctrl.toggle_play_pause().unwrap();
    assert_eq!(h.rec.calls(), vec![Call::Pause]);
    assert!(!h.ctrl.is_playing());
    assert_eq!(h.ctrl.phase(), PlaybackPhase::ReadyPaused);

    h.settle_play(Ok(())).await;
    assert!(!h.ctrl.is_playing());
    assert_eq!(h.ctrl.phase(), PlaybackPhase::ReadyPaused);
}

#[tokio::test(start_paused = true)]
async fn test_toggle_while_loading_is_rejected() {
    let mut h = Harness::ready();
    h.ctrl.select_station("b").unwrap();
    assert_eq!(
        h.ctrl.toggle_play_pause(),
        Err(ControllerError::NotReady {
            phase: PlaybackPhase::Loading
        })
    );
    assert!(h.rec.plays().is_empty());
}

// ── media faults ──────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_media_error_forces_failed_and_reports() {
    let mut h = Harness::ready();
    h.switch_and_play("b").await;
    h.ctrl.take_notifications();

    h.ctrl
        .handle_event(ControllerEvent::Media(MediaEvent::Error("network".into())));
    assert_eq!(h.ctrl.phase(), PlaybackPhase::Failed);
    assert!(!h.ctrl.is_playing());
    assert_eq!(
        h.ctrl.take_notifications(),
        vec![
            Notification::PlayingChanged(false),
            Notification::PlaybackFailed {
                kind: FailureKind::MediaFault,
                reason: "network".into()
            }
        ]
    );

    // Failed counts as paused for the transport control.
    h.rec.clear();
    h.ctrl.toggle_play_pause().unwrap();
    assert_eq!(h.rec.plays(), vec![url("b")]);
    assert_eq!(h.ctrl.last_error(), None);
}

#[tokio::test(start_paused = true)]
async fn test_media_error_during_switch_disarms_the_race() {
    let mut h = Harness::ready();
    h.ctrl.select_station("b").unwrap();
    h.ctrl
        .handle_event(ControllerEvent::Media(MediaEvent::Error("404".into())));
    assert_eq!(h.ctrl.pending_load_seq(), None);

    h.can_play();
    tokio::time::sleep(Duration::from_secs(10)).await;
    while let Ok(event) = h.rx.try_recv() {
        h.ctrl.handle_event(event);
    }
    assert!(h.rec.plays().is_empty());
    assert_eq!(h.ctrl.phase(), PlaybackPhase::Failed);
}

// ── volume & mute ─────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_volume_zero_mutes_and_raising_unmutes() {
    let mut h = Harness::ready();
    h.ctrl.set_volume(0);
    assert!(h.ctrl.is_muted());
    assert_eq!(h.rec.calls(), vec![Call::Volume(0), Call::Muted(true)]);

    h.ctrl.set_volume(40);
    assert!(!h.ctrl.is_muted());
    assert_eq!(h.ctrl.volume(), 40);
    assert_eq!(
        h.ctrl.take_notifications(),
        vec![
            Notification::VolumeChanged {
                level: 0,
                muted: true
            },
            Notification::VolumeChanged {
                level: 40,
                muted: false
            }
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_user_mute_survives_volume_changes() {
    let mut h = Harness::ready();
    h.ctrl.toggle_mute();
    assert!(h.ctrl.is_muted());
    h.ctrl.set_volume(20);
    assert!(h.ctrl.is_muted());
    h.ctrl.set_volume(0);
    h.ctrl.set_volume(60);
    assert!(h.ctrl.is_muted());
}

#[tokio::test(start_paused = true)]
async fn test_volume_is_clamped_and_does_not_resume_playback() {
    let mut h = Harness::ready();
    h.ctrl.set_volume(250);
    assert_eq!(h.ctrl.volume(), 100);
    assert!(h.rec.plays().is_empty());
    assert_eq!(h.ctrl.phase(), PlaybackPhase::ReadyPaused);
}

#[tokio::test(start_paused = true)]
async fn test_unmute_at_zero_restores_audible_level() {
    let mut h = Harness::ready();
    h.ctrl.set_volume(50);
    h.ctrl.set_volume(0);
    h.ctrl.toggle_mute();
    assert!(!h.ctrl.is_muted());
    assert_eq!(h.ctrl.volume(), 30);
    let calls = h.rec.calls();
    assert_eq!(&calls[calls.len() - 2..], &[Call::Volume(30), Call::Muted(false)]);
}

#[tokio::test(start_paused = true)]
async fn test_volume_survives_station_switch() {
    let mut h = Harness::ready();
    h.ctrl.set_volume(45);
    h.rec.clear();
    h.ctrl.select_station("b").unwrap();
    let calls = h.rec.calls();
    assert!(calls.contains(&Call::Volume(45)));
    assert!(calls.contains(&Call::Muted(false)));
}

// ── teardown ──────────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_teardown_releases_handle_once() {
    let mut h = Harness::ready();
    h.switch_and_play("b").await;
    h.rec.clear();
    h.ctrl.take_notifications();

    h.ctrl.teardown().unwrap();
    assert_eq!(h.rec.calls(), vec![Call::Pause, Call::Release]);
    assert_eq!(h.ctrl.phase(), PlaybackPhase::Idle);
    assert!(!h.ctrl.is_playing());
    assert_eq!(
        h.ctrl.take_notifications(),
        vec![Notification::PlayingChanged(false)]
    );

    assert!(h.ctrl.teardown().is_err());
    assert!(h.ctrl.select_station("c").is_err());
}

#[tokio::test(start_paused = true)]
async fn test_teardown_cancels_pending_timers() {
    let mut h = Harness::ready();
    h.ctrl.select_station("b").unwrap();
    h.ctrl.teardown().unwrap();

    tokio::time::sleep(Duration::from_secs(10)).await;
    while let Ok(event) = h.rx.try_recv() {
        h.ctrl.handle_event(event);
    }
    assert!(h.rec.plays().is_empty());
    assert_eq!(h.ctrl.phase(), PlaybackPhase::Idle);
}

// ── guards ────────────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_no_play_when_handle_lands_on_another_address() {
    let mut h = Harness::ready();
    *h.rec.redirect.lock().unwrap() = Some("https://elsewhere.example/ads".into());

    h.ctrl.select_station("b").unwrap();
    assert_eq!(h.ctrl.phase(), PlaybackPhase::Loading);
    h.can_play();

    assert!(h.rec.plays().is_empty());
    assert_eq!(h.ctrl.phase(), PlaybackPhase::ReadyPaused);
    assert!(!h.ctrl.is_playing());
    assert_eq!(h.ctrl.play_intent(), PlayIntent::None);

    // The fallback timer was disarmed by the first trigger.
    let late = tokio::time::timeout(Duration::from_secs(3), h.rx.recv()).await;
    assert!(!matches!(late, Ok(Some(ControllerEvent::ReadyTimeout { .. }))));
    assert!(h.rec.plays().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_listener_expiry_before_any_trigger_settles_paused() {
    let mut h = Harness::ready_with(PlayerConfig {
        ready_timeout_ms: 8000,
        listener_expiry_ms: 5000,
        ..PlayerConfig::default()
    });
    let started = Instant::now();
    h.ctrl.select_station("b").unwrap();

    h.pump_until(|e| matches!(e, ControllerEvent::ListenerExpired { .. }))
        .await;
    assert!(started.elapsed() >= Duration::from_millis(5000));
    assert_eq!(h.ctrl.phase(), PlaybackPhase::ReadyPaused);
    assert_eq!(h.ctrl.pending_load_seq(), None);
    assert!(h.rec.plays().is_empty());

    // Neither a late readiness signal nor the cancelled fallback may play.
    h.can_play();
    let late = tokio::time::timeout(Duration::from_secs(10), h.rx.recv()).await;
    assert!(late.is_err());
    assert!(h.rec.plays().is_empty());
    assert_eq!(h.ctrl.current_station().id, "b");
}

