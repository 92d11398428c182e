//! Color palette and style constants for the lofi TUI.

use lofi_proto::protocol::{AccentColor, Mood, PlaybackPhase};
use ratatui::style::{Color, Modifier, Style};

// ── Color palette ─────────────────────────────────────────────────────────────

pub const C_PLAYING: Color = Color::Rgb(80, 200, 120);
pub const C_CONNECTING: Color = Color::Rgb(255, 184, 80);
pub const C_ERROR: Color = Color::Rgb(255, 80, 80);
pub const C_MUTED: Color = Color::Rgb(72, 72, 88);
pub const C_SECONDARY: Color = Color::Rgb(115, 115, 138);
pub const C_PRIMARY: Color = Color::Rgb(210, 210, 225);
pub const C_SELECTION_BG: Color = Color::Rgb(28, 28, 40);
pub const C_PANEL_BORDER: Color = Color::Rgb(40, 40, 52);

pub fn accent(color: AccentColor) -> Color {
    let (r, g, b) = color.rgb();
    Color::Rgb(r, g, b)
}

/// Border tint for the active mood.
pub fn mood_tint(mood: Mood) -> Color {
    match mood {
        Mood::Study => Color::Rgb(120, 100, 200),
        Mood::Sleep => Color::Rgb(70, 80, 150),
        Mood::Rain => Color::Rgb(90, 130, 170),
        Mood::Ocean => Color::Rgb(60, 160, 170),
    }
}

/// Status icon and colour for the now-playing bar.
pub fn phase_badge(phase: PlaybackPhase) -> (&'static str, Color) {
    match phase {
        PlaybackPhase::ReadyPlaying => ("▶", C_PLAYING),
        PlaybackPhase::Loading => ("◔", C_CONNECTING),
        PlaybackPhase::ReadyPaused => ("⏸", C_SECONDARY),
        PlaybackPhase::Failed => ("⛔", C_ERROR),
        PlaybackPhase::Idle => ("■", C_MUTED),
    }
}

// ── Predefined styles ─────────────────────────────────────────────────────────

pub fn style_default() -> Style {
    Style::default().fg(C_PRIMARY)
}

pub fn style_secondary() -> Style {
    Style::default().fg(C_SECONDARY)
}

pub fn style_selected() -> Style {
    Style::default()
        .bg(C_SELECTION_BG)
        .fg(C_PRIMARY)
        .add_modifier(Modifier::BOLD)
}

pub fn style_muted() -> Style {
    Style::default().fg(C_MUTED)
}
