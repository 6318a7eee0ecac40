use std::collections::VecDeque;
use std::io;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use crossterm::{execute, terminal};
use log::{debug, info, warn};
use ratatui::backend::CrosstermBackend;
use ratatui::Terminal;

use crate::config::Config;
use crate::prefs::Preferences;
use crate::serial::{self, Connection, PortOpener, SystemOpener};
use crate::ui;

const MAX_OUTPUT_LINES: usize = 5000;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Focus {
    Ports,
    Connect,
    Command,
    Send,
    Output,
}

impl Focus {
    const ORDER: [Focus; 5] = [
        Focus::Ports,
        Focus::Connect,
        Focus::Command,
        Focus::Send,
        Focus::Output,
    ];

    /// Whether the control takes input in the given connection state.
    pub fn enabled(self, connected: bool) -> bool {
        match self {
            Focus::Ports => !connected,
            Focus::Command | Focus::Send => connected,
            Focus::Connect | Focus::Output => true,
        }
    }
}

pub struct AppState {
    pub ports: Vec<String>,
    pub selected_port: Option<usize>,
    pub connection: Connection,
    opener: Box<dyn PortOpener>,
    prefs_path: PathBuf,

    pub output_lines: VecDeque<String>,
    /// Rows scrolled back from the newest one; 0 follows the tail. Drawing
    /// clamps it to what the view can show.
    pub output_scroll: usize,
    /// Start of a UTF-8 sequence whose remaining bytes have not arrived yet.
    rx_tail: Vec<u8>,

    pub input_buffer: String,
    pub focus: Focus,
}

impl AppState {
    fn new(config: &Config) -> Self {
        Self::with_ports(
            serial::list_ports(),
            Box::new(SystemOpener),
            config.prefs_path.clone(),
        )
    }

    pub fn with_ports(ports: Vec<String>, opener: Box<dyn PortOpener>, prefs_path: PathBuf) -> Self {
        info!("found {} serial port(s): {:?}", ports.len(), ports);
        let selected_port = match Preferences::load(&prefs_path) {
            Ok(Some(prefs)) => prefs.preselect(&ports),
            Ok(None) => None,
            Err(e) => {
                warn!("ignoring preferences: {e:#}");
                None
            }
        };
        Self {
            ports,
            selected_port,
            connection: Connection::Disconnected,
            opener,
            prefs_path,
            output_lines: VecDeque::new(),
            output_scroll: 0,
            rx_tail: Vec::new(),
            input_buffer: String::new(),
            focus: Focus::Ports,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    pub fn selected_port_name(&self) -> Option<&str> {
        self.selected_port
            .and_then(|idx| self.ports.get(idx))
            .map(String::as_str)
    }

    /// Appends an entry and brings the view back to the newest line.
    fn add_output_line<S: Into<String>>(&mut self, line: S) {
        self.output_lines.push_back(line.into());
        while self.output_lines.len() > MAX_OUTPUT_LINES {
            self.output_lines.pop_front();
        }
        self.output_scroll = 0;
    }

    pub fn toggle_connection(&mut self) {
        if self.is_connected() {
            self.disconnect();
        } else {
            self.connect();
        }
    }

    fn connect(&mut self) {
        let Some(port) = self.selected_port_name().map(str::to_owned) else {
            self.add_output_line("[no port selected]");
            return;
        };
        match self.connection.connect(self.opener.as_ref(), &port) {
            Ok(()) => {
                self.rx_tail.clear();
                self.add_output_line(format!("[connected to {port}]"));
                self.focus = Focus::Command;
                if let Err(e) = Preferences::new(port).save(&self.prefs_path) {
                    warn!("could not save preferences: {e:#}");
                }
            }
            Err(e) => {
                warn!("connect failed: {e}");
                self.add_output_line(e.to_string());
            }
        }
    }

    fn disconnect(&mut self) {
        if self.connection.disconnect() {
            self.add_output_line("[disconnected]");
        }
        self.focus = Focus::Ports;
    }

    /// Closes the session; called once the event loop has ended.
    pub fn shutdown(&mut self) {
        self.connection.disconnect();
    }

    /// One poll tick. Drains every pending byte into a single entry, and
    /// does nothing at all while disconnected.
    pub fn poll_tick(&mut self) {
        if !self.is_connected() {
            return;
        }
        match self.connection.read_pending() {
            Ok(bytes) if bytes.is_empty() => {}
            Ok(bytes) => {
                debug!("received {} byte(s)", bytes.len());
                let mut data = std::mem::take(&mut self.rx_tail);
                data.extend_from_slice(&bytes);
                let split = data.len() - incomplete_tail(&data);
                self.rx_tail = data.split_off(split);
                if !data.is_empty() {
                    self.add_output_line(format!("RX: {}", String::from_utf8_lossy(&data)));
                }
            }
            Err(e) => {
                warn!("read failed: {e}");
                self.add_output_line(format!("[error] {e}"));
            }
        }
    }

    pub fn send_command(&mut self) {
        if !self.is_connected() {
            return;
        }
        let command = std::mem::take(&mut self.input_buffer);
        self.add_output_line(format!("TX: {command}"));
        if let Err(e) = self.connection.write(command.as_bytes()) {
            warn!("write failed: {e}");
            self.add_output_line(format!("[error] {e}"));
        }
    }

    pub fn refresh_ports(&mut self) {
        if self.is_connected() {
            return;
        }
        let current = self.selected_port_name().map(str::to_owned);
        self.ports = serial::list_ports();
        self.selected_port = reselect(&self.ports, current.as_deref());
        info!("refreshed ports: {:?}", self.ports);
    }

    fn cycle_focus(&mut self, forward: bool) {
        let order = Focus::ORDER;
        let len = order.len();
        let connected = self.is_connected();
        let mut idx = order.iter().position(|f| *f == self.focus).unwrap_or(0);
        for _ in 0..len {
            idx = if forward {
                (idx + 1) % len
            } else {
                (idx + len - 1) % len
            };
            if order[idx].enabled(connected) {
                self.focus = order[idx];
                return;
            }
        }
    }

    fn move_selection(&mut self, delta: isize) {
        if self.is_connected() {
            return;
        }
        if self.ports.is_empty() {
            self.selected_port = None;
            return;
        }
        let len = self.ports.len() as isize;
        let next = match self.selected_port {
            Some(i) => i as isize + delta,
            None => 0,
        };
        self.selected_port = Some(next.clamp(0, len - 1) as usize);
    }
}

/// Length of a trailing UTF-8 sequence that is valid so far but cut short.
fn incomplete_tail(bytes: &[u8]) -> usize {
    let start = bytes.len().saturating_sub(3);
    for i in (start..bytes.len()).rev() {
        if bytes[i] & 0xC0 != 0x80 {
            return match std::str::from_utf8(&bytes[i..]) {
                Err(e) if e.error_len().is_none() => bytes.len() - i,
                _ => 0,
            };
        }
    }
    0
}

/// Keeps `current` selected if it survived a re-enumeration, otherwise
/// falls back to the first port.
fn reselect(ports: &[String], current: Option<&str>) -> Option<usize> {
    current
        .and_then(|name| ports.iter().position(|p| p == name))
        .or(if ports.is_empty() { None } else { Some(0) })
}

pub fn run(config: Config) -> Result<()> {
    enable_raw_mode().context("enable raw mode")?;
    let mut stdout = io::stdout();
    execute!(stdout, terminal::EnterAlternateScreen).context("enter alternate screen")?;

    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;
    terminal.clear()?;

    let mut app = AppState::new(&config);
    let res = run_inner(&mut terminal, &mut app, config.poll_interval);
    app.shutdown();

    disable_raw_mode().ok();
    execute!(
        io::stdout(),
        terminal::LeaveAlternateScreen,
        crossterm::cursor::Show
    )
    .ok();
    terminal.show_cursor().ok();

    res
}

fn run_inner(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    app: &mut AppState,
    poll_interval: Duration,
) -> Result<()> {
    let mut last_tick = Instant::now();

    loop {
        terminal.draw(|f| ui::draw(f, app))?;

        let timeout = poll_interval
            .checked_sub(last_tick.elapsed())
            .unwrap_or_else(|| Duration::from_millis(0));

        if event::poll(timeout)? {
            if let Event::Key(key) = event::read()? {
                if handle_key_event(app, key) {
                    break;
                }
            }
        }

        // The tick keeps running after a disconnect; it is a no-op then.
        if last_tick.elapsed() >= poll_interval {
            app.poll_tick();
            last_tick = Instant::now();
        }
    }
    Ok(())
}

/// Returns true when the user asked to quit.
fn handle_key_event(app: &mut AppState, key: KeyEvent) -> bool {
    if key.kind != KeyEventKind::Press {
        return false;
    }
    if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
        return true;
    }
    let typing = app.focus == Focus::Command;
    match key.code {
        KeyCode::Esc => return true,
        KeyCode::Char('q') if !typing => return true,
        KeyCode::Char('r') if !typing => app.refresh_ports(),
        KeyCode::Tab => app.cycle_focus(true),
        KeyCode::BackTab => app.cycle_focus(false),
        _ => match app.focus {
            Focus::Ports => match key.code {
                KeyCode::Up => app.move_selection(-1),
                KeyCode::Down => app.move_selection(1),
                KeyCode::Enter => app.toggle_connection(),
                _ => {}
            },
            Focus::Connect => {
                if matches!(key.code, KeyCode::Enter | KeyCode::Char(' ')) {
                    app.toggle_connection();
                }
            }
            Focus::Command => match key.code {
                KeyCode::Enter => app.send_command(),
                KeyCode::Backspace => {
                    app.input_buffer.pop();
                }
                KeyCode::Char(c) if !key.modifiers.contains(KeyModifiers::CONTROL) => {
                    app.input_buffer.push(c);
                }
                _ => {}
            },
            Focus::Send => {
                if matches!(key.code, KeyCode::Enter | KeyCode::Char(' ')) {
                    app.send_command();
                }
            }
            Focus::Output => match key.code {
                KeyCode::PageUp => {
                    app.output_scroll = app.output_scroll.saturating_add(5);
                }
                KeyCode::PageDown => {
                    app.output_scroll = app.output_scroll.saturating_sub(5);
                }
                KeyCode::Home => {
                    app.output_scroll = usize::MAX;
                }
                KeyCode::End => {
                    app.output_scroll = 0;
                }
                _ => {}
            },
        },
    }
    false
}
