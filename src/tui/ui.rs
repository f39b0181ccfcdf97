//! UI rendering for the TUI

use std::time::Instant;

use ratatui::{
    buffer::Buffer,
    layout::{Alignment, Constraint, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, LineGauge, Paragraph, Widget, Wrap},
    Frame,
};
use unicode_width::UnicodeWidthChar;

use super::app::{App, View};
use super::help;
use crate::models::{format_time, RepeatMode};

/// Main render function
pub fn render(frame: &mut Frame, app: &App) {
    let area = frame.area();

    let [header_area, main_area, status_area] = Layout::vertical([
        Constraint::Length(1),
        Constraint::Fill(1),
        Constraint::Length(1),
    ])
    .areas(area);

    render_header(header_area, frame.buffer_mut(), app);

    match app.view {
        View::Auth => render_auth(main_area, frame.buffer_mut(), app),
        View::Player => render_player(main_area, frame.buffer_mut(), app),
    }

    render_status(status_area, frame.buffer_mut(), app);

    if app.show_help {
        help::render_help_popup(frame);
    }
}

fn render_header(area: Rect, buf: &mut Buffer, app: &App) {
    let title = Span::styled(
        " miniplayer",
        Style::default()
            .fg(Color::White)
            .add_modifier(Modifier::BOLD),
    );

    let device = match app.view {
        View::Player => app
            .player
            .snapshot()
            .device_name
            .clone()
            .unwrap_or_else(|| "no device".to_string()),
        View::Auth => "signed out".to_string(),
    };
    let right = format!("{}  [?] Help ", device);

    let left_width = " miniplayer".len();
    let padding_width = (area.width as usize).saturating_sub(left_width + display_width(&right));

    let header_line = Line::from(vec![
        title,
        Span::raw(" ".repeat(padding_width)),
        Span::styled(right, Style::default().fg(Color::Gray)),
    ]);

    Paragraph::new(header_line)
        .style(Style::default().bg(Color::DarkGray))
        .render(area, buf);
}

fn render_auth(area: Rect, buf: &mut Buffer, app: &App) {
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Green))
        .title(" Sign in to Spotify ");
    let inner = block.inner(area);
    block.render(area, buf);

    let mut lines = vec![Line::from("")];
    if app.login_in_progress {
        lines.push(Line::from(Span::styled(
            "Waiting for the browser to finish signing in...",
            Style::default().fg(Color::Yellow),
        )));
        if let Some(ref url) = app.login_url {
            lines.push(Line::from(""));
            lines.push(Line::from("If no browser opened, visit:"));
            lines.push(Line::from(Span::styled(
                url.clone(),
                Style::default().fg(Color::Cyan),
            )));
        }
    } else {
        lines.push(Line::from("You are not signed in."));
        lines.push(Line::from(""));
        lines.push(Line::from(vec![
            Span::raw("Press "),
            Span::styled("l", Style::default().fg(Color::Yellow)),
            Span::raw(" to sign in, "),
            Span::styled("q", Style::default().fg(Color::Yellow)),
            Span::raw(" to quit."),
        ]));
    }
    if let Some(ref msg) = app.auth_message {
        lines.push(Line::from(""));
        lines.push(Line::from(Span::styled(
            msg.clone(),
            Style::default().fg(Color::Red),
        )));
    }

    Paragraph::new(lines)
        .alignment(Alignment::Center)
        .wrap(Wrap { trim: false })
        .render(inner, buf);
}

fn render_player(area: Rect, buf: &mut Buffer, app: &App) {
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Green));
    let inner = block.inner(area);
    block.render(area, buf);

    let [_, title_area, artist_area, _, gauge_area, _, modes_area, _] = Layout::vertical([
        Constraint::Length(1),
        Constraint::Length(1),
        Constraint::Length(1),
        Constraint::Length(1),
        Constraint::Length(1),
        Constraint::Length(1),
        Constraint::Length(1),
        Constraint::Fill(1),
    ])
    .areas(inner);

    let player = &app.player;
    let snap = player.snapshot();

    if snap.title.is_empty() {
        let hint = if player.has_active_device() {
            "Nothing is playing"
        } else {
            "Nothing is playing. Press c to connect to a device"
        };
        Paragraph::new(Span::styled(hint, Style::default().fg(Color::Gray)))
            .alignment(Alignment::Center)
            .render(title_area, buf);
        return;
    }

    let state = if snap.is_playing { "▶" } else { "⏸" };
    let heart = if player.is_liked() {
        Span::styled(" ♥", Style::default().fg(Color::Green))
    } else {
        Span::styled(" ♡", Style::default().fg(Color::Gray))
    };
    let title_width = (title_area.width as usize).saturating_sub(6);
    Paragraph::new(Line::from(vec![
        Span::styled(format!("{} ", state), Style::default().fg(Color::Green)),
        Span::styled(
            truncate(&snap.title, title_width),
            Style::default()
                .fg(Color::White)
                .add_modifier(Modifier::BOLD),
        ),
        heart,
    ]))
    .alignment(Alignment::Center)
    .render(title_area, buf);

    Paragraph::new(Span::styled(
        truncate(&snap.artists_line(), artist_area.width as usize),
        Style::default().fg(Color::Gray),
    ))
    .alignment(Alignment::Center)
    .render(artist_area, buf);

    let ratio = if snap.duration_ms > 0 {
        (snap.progress_ms as f64 / snap.duration_ms as f64).clamp(0.0, 1.0)
    } else {
        0.0
    };
    LineGauge::default()
        .filled_style(Style::default().fg(Color::Green))
        .unfilled_style(Style::default().fg(Color::DarkGray))
        .label(format!(
            "{} / {}",
            format_time(snap.progress_ms),
            format_time(snap.duration_ms)
        ))
        .ratio(ratio)
        .render(gauge_area, buf);

    let on = Style::default().fg(Color::Green);
    let off = Style::default().fg(Color::DarkGray);
    let repeat_label = match snap.repeat {
        RepeatMode::Off => "repeat",
        RepeatMode::Context => "repeat all",
        RepeatMode::Track => "repeat one",
    };
    let volume = player
        .volume()
        .map(|v| format!("vol {}%", v))
        .unwrap_or_else(|| "vol --".to_string());
    Paragraph::new(Line::from(vec![
        Span::styled("shuffle", if snap.shuffle { on } else { off }),
        Span::raw("   "),
        Span::styled(
            repeat_label,
            if snap.repeat == RepeatMode::Off { off } else { on },
        ),
        Span::raw("   "),
        Span::styled(volume, Style::default().fg(Color::Gray)),
    ]))
    .alignment(Alignment::Center)
    .render(modes_area, buf);
}

fn render_status(area: Rect, buf: &mut Buffer, app: &App) {
    if app.view == View::Player {
        if let Some(msg) = app.player.notice(Instant::now()) {
            let line = Line::from(Span::styled(
                format!(" {} ", msg),
                Style::default().fg(Color::Red).bg(Color::DarkGray),
            ));
            Paragraph::new(line)
                .style(Style::default().bg(Color::DarkGray))
                .render(area, buf);
            return;
        }
    }

    let sep = Span::styled(" | ", Style::default().fg(Color::Gray));
    let hint = |k: &'static str, d: &'static str| {
        vec![
            Span::styled(k, Style::default().fg(Color::Yellow)),
            Span::styled(d, Style::default().fg(Color::Gray)),
        ]
    };
    let mut spans = vec![Span::raw(" ")];
    let hints: &[(&'static str, &'static str)] = match app.view {
        View::Player => &[
            ("space", " play/pause"),
            ("n/p", " skip"),
            ("f", " like"),
            ("?", " help"),
            ("q", " quit"),
        ],
        View::Auth => &[("l", " sign in"), ("q", " quit")],
    };
    for (i, &(k, d)) in hints.iter().enumerate() {
        if i > 0 {
            spans.push(sep.clone());
        }
        spans.extend(hint(k, d));
    }

    Paragraph::new(Line::from(spans))
        .style(Style::default().bg(Color::DarkGray))
        .render(area, buf);
}

fn display_width(s: &str) -> usize {
    s.chars().map(|c| c.width().unwrap_or(0)).sum()
}

/// Cut `s` to at most `width` terminal columns, marking the cut with `…`.
fn truncate(s: &str, width: usize) -> String {
    if display_width(s) <= width {
        return s.to_string();
    }
    let mut out = String::new();
    let mut used = 0;
    for c in s.chars() {
        let w = c.width().unwrap_or(0);
        if used + w + 1 > width {
            break;
        }
        out.push(c);
        used += w;
    }
    out.push('…');
    out
}
