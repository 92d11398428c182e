use lofi_proto::protocol::{Mood, PlaybackPhase};
use ratatui::{
    layout::{Constraint, Direction, Layout, Rect},
    style::{Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, List, ListItem, ListState, Paragraph},
    Frame,
};

use crate::app::App;
use crate::theme::*;

pub fn draw(f: &mut Frame, app: &App) {
    let area = f.area();

    let outer = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(1), // mood tabs
            Constraint::Length(1), // separator
            Constraint::Min(3),    // station list
            Constraint::Length(1), // now playing
            Constraint::Length(1), // volume
            Constraint::Length(1), // status / error
            Constraint::Length(1), // keybindings
        ])
        .split(area);

    draw_moods(f, app, outer[0]);
    draw_separator(f, outer[1]);
    draw_stations(f, app, outer[2]);
    draw_now_playing(f, app, outer[3]);
    draw_volume(f, app, outer[4]);
    draw_status(f, app, outer[5]);
    draw_keybindings(f, outer[6]);
}

// ── Mood tabs ─────────────────────────────────────────────────────────────────

fn draw_moods(f: &mut Frame, app: &App, area: Rect) {
    let active = app.mood();
    let mut spans = vec![Span::styled(" lofi ", style_default().add_modifier(Modifier::BOLD))];
    for mood in Mood::ALL {
        let style = if mood == active {
            Style::default()
                .fg(mood_tint(mood))
                .add_modifier(Modifier::BOLD | Modifier::UNDERLINED)
        } else {
            style_muted()
        };
        spans.push(Span::raw(" "));
        spans.push(Span::styled(mood.label(), style));
    }
    f.render_widget(Paragraph::new(Line::from(spans)), area);
}

fn draw_separator(f: &mut Frame, area: Rect) {
    let line = "─".repeat(area.width as usize);
    f.render_widget(
        Paragraph::new(Span::styled(line, Style::default().fg(C_PANEL_BORDER))),
        area,
    );
}

// ── Station list ──────────────────────────────────────────────────────────────

fn draw_stations(f: &mut Frame, app: &App, area: Rect) {
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(mood_tint(app.mood())))
        .title(Span::styled(" Stations ", style_secondary()));

    if app.state.stations.is_empty() {
        let msg = if app.connected {
            "  no stations"
        } else {
            "  waiting for daemon…"
        };
        f.render_widget(
            Paragraph::new(Span::styled(msg, style_muted())).block(block),
            area,
        );
        return;
    }

    let items: Vec<ListItem> = app
        .state
        .stations
        .iter()
        .map(|station| {
            let is_current = station.id == app.state.current_station;
            let marker = if !is_current {
                Span::raw("   ")
            } else {
                let (icon, color) = phase_badge(app.state.phase);
                Span::styled(format!(" {} ", icon), Style::default().fg(color))
            };
            let name_style = if is_current {
                Style::default()
                    .fg(accent(station.accent))
                    .add_modifier(Modifier::BOLD)
            } else {
                Style::default().fg(accent(station.accent))
            };
            ListItem::new(Line::from(vec![
                marker,
                Span::styled("● ", Style::default().fg(accent(station.accent))),
                Span::styled(station.name.clone(), name_style),
                Span::styled(format!("  {}", station.description), style_secondary()),
            ]))
        })
        .collect();

    let list = List::new(items)
        .block(block)
        .highlight_style(style_selected());
    let mut list_state = ListState::default();
    list_state.select(Some(app.cursor));
    f.render_stateful_widget(list, area, &mut list_state);
}

// ── Now playing ───────────────────────────────────────────────────────────────

fn draw_now_playing(f: &mut Frame, app: &App, area: Rect) {
    let (icon, color) = if app.connected {
        phase_badge(app.state.phase)
    } else {
        ("✕", C_ERROR)
    };
    let mut spans = vec![
        Span::styled(format!(" {} ", icon), Style::default().fg(color)),
        Span::styled(
            format!("{:<8}", app.state.phase.label()),
            Style::default().fg(color),
        ),
    ];
    if let Some(station) = app.state.current() {
        spans.push(Span::styled(
            station.name.clone(),
            Style::default()
                .fg(accent(station.accent))
                .add_modifier(Modifier::BOLD),
        ));
        spans.push(Span::styled(format!("  {}", station.stream_url), style_muted()));
    }
    if let Some(badge) = app.state.media_health.badge_label() {
        let color = if app.state.media_health.is_unhealthy() {
            C_ERROR
        } else {
            C_CONNECTING
        };
        spans.push(Span::styled(
            format!("  [mpv {}]", badge),
            Style::default().fg(color),
        ));
    }
    f.render_widget(Paragraph::new(Line::from(spans)), area);
}

// ── Volume ────────────────────────────────────────────────────────────────────

fn draw_volume(f: &mut Frame, app: &App, area: Rect) {
    let label = if app.state.is_muted {
        " muted ".to_string()
    } else {
        format!(" {:>3}%  ", app.state.volume)
    };
    let bar_w = (area.width as usize).saturating_sub(label.len() + 6).min(40);
    let filled = bar_w * app.state.volume as usize / 100;
    let bar_color = if app.state.is_muted { C_MUTED } else { C_PLAYING };

    let line = Line::from(vec![
        Span::styled(" vol ", style_secondary()),
        Span::styled("█".repeat(filled), Style::default().fg(bar_color)),
        Span::styled("░".repeat(bar_w - filled), style_muted()),
        Span::styled(
            label,
            if app.state.is_muted {
                Style::default().fg(C_CONNECTING)
            } else {
                style_default()
            },
        ),
    ]);
    f.render_widget(Paragraph::new(line), area);
}

// ── Status line ───────────────────────────────────────────────────────────────

fn draw_status(f: &mut Frame, app: &App, area: Rect) {
    let line = if let Some(err) = &app.last_error {
        Line::from(Span::styled(format!(" ⚠ {}", err), Style::default().fg(C_ERROR)))
    } else if let Some(log) = app.logs.last() {
        Line::from(Span::styled(format!(" {}", log), style_muted()))
    } else if app.state.phase == PlaybackPhase::Loading {
        Line::from(Span::styled(" tuning in…", Style::default().fg(C_CONNECTING)))
    } else {
        Line::from("")
    };
    f.render_widget(Paragraph::new(line), area);
}

fn draw_keybindings(f: &mut Frame, area: Rect) {
    let keys = [
        ("↑↓", "move"),
        ("enter", "select"),
        ("space", "play/pause"),
        ("n/p", "next/prev"),
        ("r", "random"),
        ("+/-", "volume"),
        ("m", "mute"),
        ("tab", "mood"),
        ("q", "quit"),
    ];
    let mut spans = Vec::with_capacity(keys.len() * 2);
    for (key, action) in keys {
        spans.push(Span::styled(format!(" {}", key), style_default()));
        spans.push(Span::styled(format!(" {} ", action), style_muted()));
    }
    f.render_widget(Paragraph::new(Line::from(spans)), area);
}
