//! Terminal event loop.
//!
//! - Keyboard events are read on a blocking task and forwarded as
//!   `AppMessage::Event`.
//! - Daemon broadcasts arrive from the connection reader task.
//! - The loop redraws after every message; commands flow out through the
//!   `DaemonConnection`.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use lofi_proto::protocol::{Broadcast, Command, Mood, PlaybackPhase, PlayerSnapshot, PROTOCOL_VERSION};
use ratatui::crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{backend::CrosstermBackend, Terminal};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::connection::{DaemonConnection, DaemonMessage};

const VOLUME_STEP: u8 = 5;
const MAX_LOG_LINES: usize = 50;
/// Upper bound on how long quitting waits for the input thread.
const INPUT_POLL: Duration = Duration::from_millis(100);

enum AppMessage {
    Event(Event),
    Daemon(DaemonMessage),
}

pub struct App {
    pub state: PlayerSnapshot,
    pub connected: bool,
    /// Index into `state.stations` under the cursor.
    pub cursor: usize,
    /// Most recent playback failure or rejected command.
    pub last_error: Option<String>,
    pub logs: Vec<String>,
    pub should_quit: bool,
    /// Cursor jumps to the current station on the first snapshot.
    synced_cursor: bool,
}

impl App {
    pub fn new() -> Self {
        Self {
            state: PlayerSnapshot::default(),
            connected: false,
            cursor: 0,
            last_error: None,
            logs: Vec::new(),
            should_quit: false,
            synced_cursor: false,
        }
    }

    // ── Main run loop ─────────────────────────────────────────────────────────

    pub async fn run(mut self, address: &str) -> anyhow::Result<()> {
        let (conn, mut daemon_rx) = DaemonConnection::connect(address).await?;
        info!("connected to daemon at {}", address);
        self.connected = true;

        enable_raw_mode()?;
        let mut stdout = io::stdout();
        execute!(stdout, EnterAlternateScreen)?;
        let backend = CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend)?;

        let (tx, mut rx) = mpsc::channel::<AppMessage>(256);

        // ── Background task: keyboard events ──────────────────────────────────
        let input_done = Arc::new(AtomicBool::new(false));
        let input = tokio::task::spawn_blocking({
            let event_tx = tx.clone();
            let done = input_done.clone();
            move || pump_input(terminal_input, event_tx, done)
        });

        // ── Background task: daemon messages ──────────────────────────────────
        tokio::spawn(async move {
            while let Some(msg) = daemon_rx.recv().await {
                if tx.send(AppMessage::Daemon(msg)).await.is_err() {
                    break;
                }
            }
        });

        let result = async {
            loop {
                terminal.draw(|f| crate::ui::draw(f, &self))?;
                if self.should_quit {
                    break;
                }
                let Some(msg) = rx.recv().await else {
                    break;
                };
                match msg {
                    AppMessage::Event(Event::Key(key)) => {
                        if let Some(cmd) = self.on_key(key) {
                            if let Err(e) = conn.send_command(cmd).await {
                                warn!("command not sent: {}", e);
                                self.last_error = Some(e.to_string());
                            }
                        }
                    }
                    AppMessage::Event(_) => {}
                    AppMessage::Daemon(DaemonMessage::Broadcast(b)) => self.apply(b),
                    AppMessage::Daemon(DaemonMessage::Disconnected(reason)) => {
                        warn!("daemon disconnected: {}", reason);
                        self.connected = false;
                        self.last_error = Some(reason);
                    }
                }
            }
            Ok::<(), anyhow::Error>(())
        }
        .await;

        // Runtime shutdown blocks on the input thread; stop it here.
        input_done.store(true, Ordering::Relaxed);
        drop(rx);
        let _ = input.await;

        disable_raw_mode()?;
        execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
        terminal.show_cursor()?;
        result
    }

    // ── Input ─────────────────────────────────────────────────────────────────

    /// Map a key to a daemon command, updating local UI state on the way.
    pub fn on_key(&mut self, key: KeyEvent) -> Option<Command> {
        if key.kind != KeyEventKind::Press {
            return None;
        }
        match key.code {
            KeyCode::Char('q') | KeyCode::Esc => {
                self.should_quit = true;
                None
            }
            KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                self.should_quit = true;
                None
            }
            KeyCode::Up | KeyCode::Char('k') => {
                self.cursor = self.cursor.saturating_sub(1);
                None
            }
            KeyCode::Down | KeyCode::Char('j') => {
                if self.cursor + 1 < self.state.stations.len() {
                    self.cursor += 1;
                }
                None
            }
            KeyCode::Enter => {
                let station = self.state.stations.get(self.cursor)?;
                // Choosing the current station again acts as play/pause.
                if station.id == self.state.current_station {
                    Some(Command::TogglePlayPause)
                } else {
                    Some(Command::SelectStation {
                        id: station.id.clone(),
                    })
                }
            }
            KeyCode::Char(' ') => Some(Command::TogglePlayPause),
            KeyCode::Char('n') => Some(Command::SkipNext),
            KeyCode::Char('p') => Some(Command::SkipPrev),
            KeyCode::Char('r') => Some(Command::Random),
            KeyCode::Char('+') | KeyCode::Char('=') => Some(Command::SetVolume {
                level: self.state.volume.saturating_add(VOLUME_STEP).min(100),
            }),
            KeyCode::Char('-') => Some(Command::SetVolume {
                level: self.state.volume.saturating_sub(VOLUME_STEP),
            }),
            KeyCode::Char('m') => Some(Command::ToggleMute),
            KeyCode::Tab => Some(Command::SetMood {
                mood: self.state.mood.next(),
            }),
            _ => None,
        }
    }

    // ── Daemon messages ───────────────────────────────────────────────────────

    pub fn apply(&mut self, broadcast: Broadcast) {
        match broadcast {
            Broadcast::Hello {
                protocol_version,
                state,
            } => {
                if protocol_version != PROTOCOL_VERSION {
                    warn!(
                        "daemon speaks protocol {} (expected {})",
                        protocol_version, PROTOCOL_VERSION
                    );
                    self.last_error = Some(format!(
                        "incompatible daemon protocol {}",
                        protocol_version
                    ));
                }
                self.set_state(state);
            }
            Broadcast::State { data } => self.set_state(data),
            Broadcast::PlayingChanged { playing } => {
                self.state.is_playing = playing;
                if playing {
                    self.last_error = None;
                }
            }
            Broadcast::StationChanged { station } => {
                debug!("station changed to {}", station.id);
                self.state.current_station = station.id.clone();
                self.state.phase = PlaybackPhase::Loading;
                if let Some(idx) = self.state.stations.iter().position(|s| s.id == station.id) {
                    self.cursor = idx;
                }
            }
            Broadcast::VolumeChanged { level, muted } => {
                self.state.volume = level;
                self.state.is_muted = muted;
            }
            Broadcast::PlaybackFailed { reason } => self.last_error = Some(reason),
            Broadcast::MoodChanged { mood } => self.state.mood = mood,
            Broadcast::Log { message } => self.push_log(message),
            Broadcast::Error { message } => {
                self.push_log(format!(
                    "{} [ERROR] {}",
                    chrono::Local::now().format("%H:%M:%S"),
                    message
                ));
                self.last_error = Some(message);
            }
        }
    }

    fn set_state(&mut self, state: PlayerSnapshot) {
        // Older revisions can arrive after a notice already moved us on.
        if state.rev < self.state.rev {
            debug!("ignoring stale snapshot rev={} (have {})", state.rev, self.state.rev);
            return;
        }
        self.state = state;
        if let Some(err) = &self.state.last_error {
            self.last_error = Some(err.clone());
        }
        if !self.synced_cursor {
            if let Some(idx) = self
                .state
                .stations
                .iter()
                .position(|s| s.id == self.state.current_station)
            {
                self.cursor = idx;
                self.synced_cursor = true;
            }
        }
        self.cursor = self.cursor.min(self.state.stations.len().saturating_sub(1));
    }

    fn push_log(&mut self, line: String) {
        self.logs.push(line);
        if self.logs.len() > MAX_LOG_LINES {
            let excess = self.logs.len() - MAX_LOG_LINES;
            self.logs.drain(..excess);
        }
    }

    pub fn mood(&self) -> Mood {
        self.state.mood
    }
}

/// Poll the terminal for the next event, giving up after `INPUT_POLL`.
fn terminal_input() -> io::Result<Option<Event>> {
    if event::poll(INPUT_POLL)? {
        event::read().map(Some)
    } else {
        Ok(None)
    }
}

/// Forward input events until `done` is set, the app loop goes away or the
/// source fails.  Runs on a blocking thread.
fn pump_input<F>(mut next_event: F, tx: mpsc::Sender<AppMessage>, done: Arc<AtomicBool>)
where
    F: FnMut() -> io::Result<Option<Event>>,
{
    while !done.load(Ordering::Relaxed) {
        match next_event() {
            Ok(Some(ev)) => {
                if tx.blocking_send(AppMessage::Event(ev)).is_err() {
                    break;
                }
            }
            Ok(None) => {}
            Err(e) => {
                debug!("input reader stopped: {}", e);
                break;
            }
        }
    }
}
