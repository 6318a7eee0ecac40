use ratatui::layout::{Alignment, Constraint, Direction, Layout, Rect};
use ratatui::prelude::*;
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span, Text};
use ratatui::widgets::*;
use unicode_width::{UnicodeWidthChar, UnicodeWidthStr};

use crate::app::{AppState, Focus};
use crate::serial::BAUD_RATE;

/// Also clamps `app.output_scroll` to the rows the log actually has.
pub fn draw(frame: &mut Frame, app: &mut AppState) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints(
            [Constraint::Length(3), Constraint::Min(5), Constraint::Length(3)].as_ref(),
        )
        .split(frame.size());

    draw_header(frame, chunks[0], app);
    draw_body(frame, chunks[1], app);
    draw_footer(frame, chunks[2], app);
}

fn control_style(app: &AppState, control: Focus) -> Style {
    if !control.enabled(app.is_connected()) {
        Style::default().fg(Color::DarkGray)
    } else if app.focus == control {
        Style::default().fg(Color::Yellow)
    } else {
        Style::default()
    }
}

fn button<'a>(label: &'a str, app: &AppState, control: Focus) -> Paragraph<'a> {
    let style = if control.enabled(app.is_connected()) && app.focus == control {
        Style::default()
            .fg(Color::Black)
            .bg(Color::Yellow)
            .add_modifier(Modifier::BOLD)
    } else {
        control_style(app, control)
    };
    Paragraph::new(label)
        .alignment(Alignment::Center)
        .style(style)
        .block(Block::default().borders(Borders::ALL))
}

fn draw_header(frame: &mut Frame, area: Rect, app: &AppState) {
    let mut spans: Vec<Span> = Vec::new();
    spans.push(Span::styled(" nanoterm ", Style::default().fg(Color::Black).bg(Color::Cyan).add_modifier(Modifier::BOLD)));
    spans.push(Span::raw("  Esc:quit  TAB:focus  r:refresh  Enter:activate "));
    spans.push(Span::styled(
        format!(" [baud:{}] ", BAUD_RATE),
        Style::default().fg(Color::Yellow),
    ));
    if let Some(name) = app.connection.port_name().or(app.selected_port_name()) {
        spans.push(Span::styled(
            format!(" port:{} ", name),
            Style::default().fg(Color::Green),
        ));
    }
    spans.push(Span::styled(
        if app.is_connected() { " CONNECTED " } else { " DISCONNECTED " },
        if app.is_connected() {
            Style::default().fg(Color::Black).bg(Color::Green)
        } else {
            Style::default().fg(Color::Black).bg(Color::Red)
        },
    ));

    let block = Block::default().borders(Borders::ALL).title("Help");
    let p = Paragraph::new(Text::from(Line::from(spans))).block(block);
    frame.render_widget(p, area);
}

fn draw_body(frame: &mut Frame, area: Rect, app: &mut AppState) {
    let chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(30), Constraint::Percentage(70)].as_ref())
        .split(area);

    let left = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(3), Constraint::Length(3)].as_ref())
        .split(chunks[0]);

    draw_ports(frame, left[0], app);
    let label = if app.is_connected() { "Disconnect" } else { "Connect" };
    frame.render_widget(button(label, app, Focus::Connect), left[1]);
    draw_output(frame, chunks[1], app);
}

fn draw_ports(frame: &mut Frame, area: Rect, app: &AppState) {
    let items: Vec<ListItem> = app
        .ports
        .iter()
        .map(|p| ListItem::new(Line::from(Span::raw(p.as_str()))))
        .collect();

    let title = if app.is_connected() {
        "Connected to"
    } else {
        "Available ports"
    };
    let list = List::new(items)
        .block(Block::default().borders(Borders::ALL).title(title))
        .style(control_style(app, Focus::Ports))
        .highlight_style(if app.is_connected() {
            Style::default().fg(Color::Green).add_modifier(Modifier::BOLD)
        } else {
            Style::default().bg(Color::Blue)
        })
        .highlight_symbol("> ");

    let mut state = ListState::default();
    state.select(app.selected_port);
    frame.render_stateful_widget(list, area, &mut state);
}

/// Splits `line` into rows no wider than `width` terminal cells.
fn wrap_rows(line: &str, width: usize) -> Vec<&str> {
    if width == 0 || line.width() <= width {
        return vec![line];
    }
    let mut rows = Vec::new();
    let mut start = 0;
    let mut used = 0;
    for (i, c) in line.char_indices() {
        let w = c.width().unwrap_or(0);
        if used + w > width && i > start {
            rows.push(&line[start..i]);
            start = i;
            used = 0;
        }
        used += w;
    }
    rows.push(&line[start..]);
    rows
}

/// Start and end (exclusive) of the display lines that fit in `height`
/// rows when scrolled `scroll` lines back from the newest one.
fn visible_range(total: usize, height: usize, scroll: usize) -> (usize, usize) {
    let max_scroll = total.saturating_sub(height);
    let scroll = scroll.min(max_scroll);
    let end = total - scroll;
    (end.saturating_sub(height), end)
}

fn draw_output(frame: &mut Frame, area: Rect, app: &mut AppState) {
    let width = area.width.saturating_sub(2) as usize; // borders
    let height = area.height.saturating_sub(2) as usize;

    // Received data may carry its own line breaks.
    let lines: Vec<&str> = app
        .output_lines
        .iter()
        .flat_map(|entry| entry.lines())
        .map(|l| l.trim_end_matches('\r'))
        .flat_map(|l| wrap_rows(l, width))
        .collect();

    app.output_scroll = app.output_scroll.min(lines.len().saturating_sub(height));
    let (start, end) = visible_range(lines.len(), height, app.output_scroll);
    let title = if end < lines.len() {
        format!("Output (+{} below)", lines.len() - end)
    } else {
        "Output".to_string()
    };
    let block = Block::default()
        .borders(Borders::ALL)
        .title(title)
        .border_style(control_style(app, Focus::Output));

    let text: Vec<Line> = lines[start..end]
        .iter()
        .map(|l| Line::from(Span::raw(*l)))
        .collect();
    let p = Paragraph::new(Text::from(text)).block(block);
    frame.render_widget(p, area);
}

fn draw_footer(frame: &mut Frame, area: Rect, app: &AppState) {
    let chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Min(10), Constraint::Length(10)].as_ref())
        .split(area);

    let block = Block::default().borders(Borders::ALL).title("Command");
    let p = Paragraph::new(app.input_buffer.as_str())
        .style(control_style(app, Focus::Command))
        .block(block);
    frame.render_widget(p, chunks[0]);
    frame.render_widget(button("Send", app, Focus::Send), chunks[1]);

    if app.focus == Focus::Command {
        let inner_width = chunks[0].width.saturating_sub(2);
        let x = chunks[0].x + 1 + (app.input_buffer.width() as u16).min(inner_width);
        let y = chunks[0].y + 1;
        frame.set_cursor(x, y);
    }
}
