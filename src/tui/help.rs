//! Help popup overlay listing the player key bindings.

use ratatui::{
    layout::Rect,
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Clear, Paragraph},
    Frame,
};

const POPUP_WIDTH: u16 = 44;
const KEY_COLUMN: usize = 12;

/// A key binding and what it does.
struct Shortcut {
    key: &'static str,
    desc: &'static str,
}

const fn sc(key: &'static str, desc: &'static str) -> Shortcut {
    Shortcut { key, desc }
}

const PLAYBACK: &[Shortcut] = &[
    sc("Space", "Play / pause"),
    sc("n", "Next track"),
    sc("p", "Previous track"),
    sc("Left/Right", "Seek 10 seconds"),
    sc("s", "Toggle shuffle"),
    sc("r", "Cycle repeat mode"),
    sc("+ / -", "Volume up / down"),
    sc("f", "Like / unlike track"),
];

const SESSION: &[Shortcut] = &[
    sc("c", "Connect to a device"),
    sc("Ctrl+R", "Refresh now"),
    sc("L", "Log out"),
    sc("?", "Toggle this help"),
    sc("q", "Quit"),
];

/// Render the help popup centered on screen.
pub fn render_help_popup(frame: &mut Frame) {
    let area = frame.area();
    let lines = build_lines(&[("PLAYBACK", PLAYBACK), ("SESSION", SESSION)]);

    // Content plus borders.
    let height = (lines.len() as u16 + 2).min(area.height.saturating_sub(2));
    let width = POPUP_WIDTH.min(area.width.saturating_sub(2));
    let popup_area = centered_rect(width, height, area);

    frame.render_widget(Clear, popup_area);

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Cyan))
        .title(Span::styled(
            " HELP ",
            Style::default()
                .fg(Color::Cyan)
                .add_modifier(Modifier::BOLD),
        ))
        .title_bottom(Line::from(Span::styled(
            " Press any key to close ",
            Style::default().fg(Color::Gray),
        )));

    frame.render_widget(Paragraph::new(lines).block(block), popup_area);
}

fn build_lines(sections: &[(&'static str, &[Shortcut])]) -> Vec<Line<'static>> {
    let mut lines = Vec::new();
    for (i, (title, shortcuts)) in sections.iter().enumerate() {
        if i > 0 {
            lines.push(Line::from(""));
        }
        lines.push(Line::from(Span::styled(
            *title,
            Style::default()
                .fg(Color::White)
                .add_modifier(Modifier::BOLD),
        )));
        for shortcut in shortcuts.iter() {
            lines.push(Line::from(vec![
                Span::styled(
                    format!(" {:<width$}", shortcut.key, width = KEY_COLUMN),
                    Style::default().fg(Color::Yellow),
                ),
                Span::styled(shortcut.desc, Style::default().fg(Color::Gray)),
            ]));
        }
    }
    lines
}

fn centered_rect(width: u16, height: u16, area: Rect) -> Rect {
    let x = area.x + area.width.saturating_sub(width) / 2;
    let y = area.y + area.height.saturating_sub(height) / 2;
    Rect::new(x, y, width, height)
}
