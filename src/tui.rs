use std::{
    io,
    time::{Duration, Instant},
};

use anyhow::Result;
use crossterm::{
    cursor,
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use log::warn;
use ratatui::{
    backend::CrosstermBackend,
    prelude::*,
    widgets::{Block, BorderType, Borders, Clear, List, ListItem, ListState, Padding, Paragraph, Wrap},
};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use crate::{
    bridge::{HostBridge, HostEvent},
    catalog_view::{category_buckets, filter_applications, resolve_download, CategoryBucket, ViewState},
    logging::{LogLevel, LogPanel},
    models::Application,
    orchestrator::Orchestrator,
    state::AppState,
};

const STATUS_MESSAGE_TTL: Duration = Duration::from_secs(2);
const LOG_PANEL_HEIGHT: u16 = 8;
const CATEGORY_PANEL_WIDTH: u16 = 26;

/// Everything the UI needs to talk to the host.
pub(crate) struct Session {
    pub bridge: HostBridge,
    pub events: UnboundedReceiver<HostEvent>,
    pub orchestrator: Orchestrator,
}

/// Results of background work started from the UI.
enum UiMessage {
    CatalogLoaded(Option<usize>),
    SpeedTest(std::result::Result<String, String>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Command {
    Add(String),
    Remove(String),
    Use(String),
    Endpoints,
    Speed,
    Refresh,
    About,
}

fn parse_command(input: &str) -> std::result::Result<Command, String> {
    let body = input.trim().trim_start_matches(':').trim();
    let (name, argument) = match body.split_once(char::is_whitespace) {
        Some((name, rest)) => (name, rest.trim()),
        None => (body, ""),
    };
    let needs_argument = |command: fn(String) -> Command| {
        if argument.is_empty() {
            Err(format!(":{name} needs an endpoint URL"))
        } else {
            Ok(command(argument.to_string()))
        }
    };
    match name {
        "add" => needs_argument(Command::Add),
        "remove" | "rm" => needs_argument(Command::Remove),
        "use" => needs_argument(Command::Use),
        "endpoints" | "ls" => Ok(Command::Endpoints),
        "speed" => Ok(Command::Speed),
        "refresh" => Ok(Command::Refresh),
        "about" => Ok(Command::About),
        other => Err(format!("unknown command :{other}")),
    }
}

struct TerminalRestore;

impl Drop for TerminalRestore {
    fn drop(&mut self) {
        let _ = disable_raw_mode();
        let mut stdout = io::stdout();
        let _ = execute!(stdout, LeaveAlternateScreen, cursor::Show);
    }
}

/// Single-line editor for the search box; `cursor` counts chars, not bytes.
#[derive(Debug, Default)]
struct SearchInput {
    text: String,
    cursor: usize,
}

impl SearchInput {
    fn is_command(&self) -> bool {
        self.text.trim_start().starts_with(':')
    }

    fn char_len(&self) -> usize {
        self.text.chars().count()
    }

    fn byte_index(&self, char_index: usize) -> usize {
        self.text
            .char_indices()
            .nth(char_index)
            .map(|(idx, _)| idx)
            .unwrap_or(self.text.len())
    }

    fn insert(&mut self, ch: char) {
        let at = self.byte_index(self.cursor);
        self.text.insert(at, ch);
        self.cursor += 1;
    }

    fn backspace(&mut self) -> bool {
        if self.cursor == 0 {
            return false;
        }
        let start = self.byte_index(self.cursor - 1);
        let end = self.byte_index(self.cursor);
        self.text.replace_range(start..end, "");
        self.cursor -= 1;
        true
    }

    fn delete(&mut self) -> bool {
        if self.cursor >= self.char_len() {
            return false;
        }
        let start = self.byte_index(self.cursor);
        let end = self.byte_index(self.cursor + 1);
        self.text.replace_range(start..end, "");
        true
    }

    /// Removes trailing whitespace and then one word before the cursor.
    fn delete_word(&mut self) -> bool {
        if self.cursor == 0 {
            return false;
        }
        let before: Vec<char> = self.text.chars().take(self.cursor).collect();
        let mut keep = before.len();
        while keep > 0 && before[keep - 1].is_whitespace() {
            keep -= 1;
        }
        while keep > 0 && !before[keep - 1].is_whitespace() {
            keep -= 1;
        }
        let start = self.byte_index(keep);
        let end = self.byte_index(self.cursor);
        self.text.replace_range(start..end, "");
        self.cursor = keep;
        true
    }

    fn clear(&mut self) {
        self.text.clear();
        self.cursor = 0;
    }

    fn move_by(&mut self, delta: isize) {
        if delta < 0 {
            self.cursor = self.cursor.saturating_sub(delta.unsigned_abs());
        } else {
            self.cursor = (self.cursor + delta as usize).min(self.char_len());
        }
    }

    /// Window of `width` chars that keeps the cursor visible, plus the cursor column.
    fn visible(&self, width: usize) -> (String, usize) {
        if width == 0 {
            return (String::new(), 0);
        }
        let start = if self.char_len() > width && self.cursor >= width {
            self.cursor - width + 1
        } else {
            0
        };
        let window = self.text.chars().skip(start).take(width).collect();
        (window, self.cursor - start)
    }
}

struct TuiState {
    input: SearchInput,
    view: ViewState,
    buckets: Vec<CategoryBucket>,
    visible: Vec<Application>,
    list_state: ListState,
    log: LogPanel,
    about: Option<(String, String)>,
    should_quit: bool,
    status_message: Option<String>,
    status_deadline: Option<Instant>,
    messages_tx: UnboundedSender<UiMessage>,
    messages_rx: UnboundedReceiver<UiMessage>,
}

impl TuiState {
    fn new(log_capacity: usize) -> Self {
        let (messages_tx, messages_rx) = mpsc::unbounded_channel();
        Self {
            input: SearchInput::default(),
            view: ViewState::default(),
            buckets: Vec::new(),
            visible: Vec::new(),
            list_state: ListState::default(),
            log: LogPanel::new(log_capacity),
            about: None,
            should_quit: false,
            status_message: None,
            status_deadline: None,
            messages_tx,
            messages_rx,
        }
    }

    fn selected_app(&self) -> Option<&Application> {
        self.list_state
            .selected()
            .and_then(|index| self.visible.get(index))
    }
}

pub(crate) fn run_tui(state: &AppState, session: &mut Session) -> Result<()> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, cursor::Hide)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;
    let _restore = TerminalRestore;

    let mut ui = TuiState::new(state.config.log_panel_capacity);
    recompute(&mut ui, state);
    report_catalog_load(&mut ui, state, session);

    loop {
        drain_host_events(&mut ui, session);
        drain_ui_messages(&mut ui, state, session);
        terminal.draw(|frame| render_ui(frame, &mut ui, state, session))?;

        if ui.should_quit {
            break;
        }

        if event::poll(Duration::from_millis(16))? {
            if let Event::Key(key) = event::read()? {
                handle_key_event(key, &mut ui, state, session);
            }
        }
    }

    terminal.show_cursor()?;
    Ok(())
}

/// Pushes a line to the panel and mirrors it to the host log file.
fn view_log(ui: &mut TuiState, session: &Session, level: LogLevel, text: impl Into<String>) {
    let text = text.into();
    if let Err(err) = session.bridge.log_message(format!("[{level}] {text}")) {
        warn!("log message dropped: {err}");
    }
    ui.log.push(level, text);
}

fn report_catalog_load(ui: &mut TuiState, state: &AppState, session: &Session) {
    let snapshot = state.catalog.lock().unwrap().clone();
    for error in &snapshot.errors {
        view_log(ui, session, LogLevel::Warning, error.clone());
    }
    match snapshot.endpoint {
        Some(endpoint) => view_log(
            ui,
            session,
            LogLevel::Success,
            format!(
                "loaded {} applications from {endpoint}",
                snapshot.applications.len()
            ),
        ),
        None => view_log(
            ui,
            session,
            LogLevel::Error,
            "no catalog endpoint answered; the list is empty",
        ),
    }
}

fn drain_host_events(ui: &mut TuiState, session: &mut Session) {
    while let Ok(event) = session.events.try_recv() {
        if let Err(err) = session.orchestrator.dispatch(&session.bridge, &event) {
            ui.log.push(LogLevel::Error, format!("host command failed: {err}"));
        }
        match event {
            HostEvent::Log { level, text } => ui.log.push(level, text),
            HostEvent::About { title, text } | HostEvent::InstallGuide { title, text } => {
                ui.about = Some((title, text))
            }
            _ => {}
        }
    }
}

fn drain_ui_messages(ui: &mut TuiState, state: &AppState, session: &Session) {
    while let Ok(message) = ui.messages_rx.try_recv() {
        match message {
            UiMessage::CatalogLoaded(Some(_)) => {
                recompute(ui, state);
                report_catalog_load(ui, state, session);
            }
            UiMessage::CatalogLoaded(None) => {
                set_status_message(ui, "Refresh already running.");
            }
            UiMessage::SpeedTest(Ok(fastest)) => {
                view_log(
                    ui,
                    session,
                    LogLevel::Success,
                    format!("switched to fastest endpoint {fastest}"),
                );
                start_refresh(ui, state);
            }
            UiMessage::SpeedTest(Err(err)) => {
                view_log(ui, session, LogLevel::Error, format!("speed test failed: {err}"));
            }
        }
    }
}

fn start_refresh(ui: &mut TuiState, state: &AppState) {
    set_status_message(ui, "Refreshing catalog...");
    let refresh_state = state.clone();
    let tx = ui.messages_tx.clone();
    tokio::spawn(async move {
        let loaded = refresh_state.refresh().await;
        let _ = tx.send(UiMessage::CatalogLoaded(loaded));
    });
}

fn start_speed_test(ui: &mut TuiState, state: &AppState) {
    set_status_message(ui, "Testing endpoint speed...");
    let test_state = state.clone();
    let tx = ui.messages_tx.clone();
    tokio::spawn(async move {
        let result = test_state.speed_test().await.map_err(|err| err.to_string());
        let _ = tx.send(UiMessage::SpeedTest(result));
    });
}

/// Recomputes buckets and the visible list from the current snapshot.
fn recompute(ui: &mut TuiState, state: &AppState) {
    let apps = state.catalog.lock().unwrap().applications.clone();
    ui.buckets = category_buckets(&apps);
    if !ui.buckets.iter().any(|bucket| bucket.category == ui.view.category) {
        ui.view = ui.view.with_category(None);
    }
    if !ui.input.is_command() {
        ui.view = ui.view.with_search(ui.input.text.clone());
    }
    ui.visible = filter_applications(&apps, &ui.view)
        .into_iter()
        .cloned()
        .collect();
    if ui.visible.is_empty() {
        ui.list_state.select(None);
    } else {
        let index = ui.list_state.selected().unwrap_or(0).min(ui.visible.len() - 1);
        ui.list_state.select(Some(index));
    }
}

fn handle_key_event(key: KeyEvent, ui: &mut TuiState, state: &AppState, session: &mut Session) {
    if key.kind == KeyEventKind::Release {
        return;
    }

    if ui.about.is_some() {
        if matches!(key.code, KeyCode::Esc | KeyCode::Enter | KeyCode::F(1)) {
            ui.about = None;
        }
        return;
    }

    if key.modifiers.contains(KeyModifiers::CONTROL) {
        match key.code {
            KeyCode::Char('c') => ui.should_quit = true,
            KeyCode::Char('r') => start_refresh(ui, state),
            KeyCode::Char('t') => start_speed_test(ui, state),
            KeyCode::Char('d') => open_download_dir(ui, state, session),
            KeyCode::Char('n') => move_selection(ui, 1),
            KeyCode::Char('p') => move_selection(ui, -1),
            KeyCode::Char('u') => {
                ui.input.clear();
                recompute(ui, state);
            }
            KeyCode::Char('w') => {
                if ui.input.delete_word() {
                    recompute(ui, state);
                }
            }
            KeyCode::Left => ui.input.move_by(-1),
            KeyCode::Right => ui.input.move_by(1),
            _ => {}
        }
        return;
    }

    if key.modifiers.contains(KeyModifiers::ALT) {
        if let KeyCode::Char(ch) = key.code {
            if let Some(digit) = ch.to_digit(10).filter(|digit| *digit > 0) {
                open_navigation(ui, state, session, digit as usize - 1);
            }
        }
        return;
    }

    match key.code {
        KeyCode::Esc => ui.should_quit = true,
        KeyCode::F(1) => {
            if let Err(err) = session.bridge.show_about() {
                set_status_message(ui, format!("About unavailable: {err}"));
            }
        }
        KeyCode::F(5) => start_refresh(ui, state),
        KeyCode::Enter => {
            if ui.input.is_command() {
                run_command(ui, state, session);
            } else {
                trigger_selected(ui, state, session);
            }
        }
        KeyCode::Tab => cycle_category(ui, state, 1),
        KeyCode::BackTab => cycle_category(ui, state, -1),
        KeyCode::Up => move_selection(ui, -1),
        KeyCode::Down => move_selection(ui, 1),
        KeyCode::Home => ui.input.cursor = 0,
        KeyCode::End => ui.input.cursor = ui.input.char_len(),
        KeyCode::Left => ui.input.move_by(-1),
        KeyCode::Right => ui.input.move_by(1),
        KeyCode::Backspace => {
            if ui.input.backspace() {
                recompute(ui, state);
            }
        }
        KeyCode::Delete => {
            if ui.input.delete() {
                recompute(ui, state);
            }
        }
        KeyCode::Char(ch) => {
            ui.input.insert(ch);
            recompute(ui, state);
        }
        _ => {}
    }
}

fn trigger_selected(ui: &mut TuiState, state: &AppState, session: &mut Session) {
    let Some(app) = ui.selected_app().cloned() else {
        set_status_message(ui, "Nothing selected.");
        return;
    };
    let resolved = resolve_download(&app, &state.catalog_base());
    let button = session.orchestrator.button(&app, resolved.as_ref());
    if !button.enabled {
        set_status_message(ui, format!("{}: {}", app.name, button.label));
        return;
    }

    match session
        .orchestrator
        .trigger(&session.bridge, &app, resolved.as_ref())
    {
        Ok(_) => set_status_message(ui, format!("Starting {}", app.name)),
        Err(err) => view_log(ui, session, LogLevel::Error, err.to_string()),
    }
}

fn run_command(ui: &mut TuiState, state: &AppState, session: &Session) {
    let command = match parse_command(&ui.input.text) {
        Ok(command) => command,
        Err(message) => {
            set_status_message(ui, message);
            return;
        }
    };
    ui.input.clear();
    recompute(ui, state);

    let updated = match command {
        Command::Add(url) => Some(state.add_endpoint(&url).map(|_| format!("added {url}"))),
        Command::Remove(url) => Some(
            state
                .remove_endpoint(&url)
                .map(|selected| format!("removed {url}, using {selected}")),
        ),
        Command::Use(url) => Some(
            state
                .select_endpoint(&url)
                .map(|selected| format!("using {selected}")),
        ),
        Command::Endpoints => {
            let config = state.catalog_config();
            for endpoint in config.endpoints() {
                let marker = if endpoint == config.selected() { "*" } else { " " };
                ui.log.push(LogLevel::Info, format!("{marker} {endpoint}"));
            }
            None
        }
        Command::Speed => {
            start_speed_test(ui, state);
            None
        }
        Command::Refresh => {
            start_refresh(ui, state);
            None
        }
        Command::About => {
            if let Err(err) = session.bridge.show_about() {
                set_status_message(ui, format!("About unavailable: {err}"));
            }
            None
        }
    };

    match updated {
        Some(Ok(text)) => {
            view_log(ui, session, LogLevel::Success, text);
            start_refresh(ui, state);
        }
        Some(Err(err)) => view_log(ui, session, LogLevel::Error, err.to_string()),
        None => {}
    }
}

fn open_navigation(ui: &mut TuiState, state: &AppState, session: &Session, index: usize) {
    let link = state.catalog.lock().unwrap().navigation.get(index).cloned();
    let Some(link) = link else {
        set_status_message(ui, format!("No navigation link {}", index + 1));
        return;
    };
    if let Err(err) = session.bridge.open_external_link(link.url) {
        view_log(ui, session, LogLevel::Error, err.to_string());
    }
}

fn open_download_dir(ui: &mut TuiState, state: &AppState, session: &Session) {
    let dir = state.config.download_dir();
    if let Err(err) = session.bridge.open_file_path(dir) {
        view_log(ui, session, LogLevel::Error, err.to_string());
    }
}

fn cycle_category(ui: &mut TuiState, state: &AppState, delta: isize) {
    if ui.buckets.is_empty() {
        return;
    }
    let len = ui.buckets.len() as isize;
    let current = ui
        .buckets
        .iter()
        .position(|bucket| bucket.category == ui.view.category)
        .unwrap_or(0) as isize;
    let next = (current + delta).rem_euclid(len) as usize;
    ui.view = ui.view.with_category(ui.buckets[next].category.as_deref());
    ui.list_state.select(Some(0));
    recompute(ui, state);
}

fn move_selection(ui: &mut TuiState, delta: isize) {
    let len = ui.visible.len();
    if len == 0 {
        ui.list_state.select(None);
        return;
    }

    let current = ui.list_state.selected().unwrap_or(0);
    let next = if delta < 0 {
        if current == 0 {
            len - 1
        } else {
            current - 1
        }
    } else if current + 1 >= len {
        0
    } else {
        current + 1
    };

    ui.list_state.select(Some(next));
}

fn set_status_message(ui: &mut TuiState, message: impl Into<String>) {
    ui.status_message = Some(message.into());
    ui.status_deadline = Some(Instant::now() + STATUS_MESSAGE_TTL);
}

fn update_status_message(ui: &mut TuiState) {
    if let Some(deadline) = ui.status_deadline {
        if Instant::now() >= deadline {
            ui.status_message = None;
            ui.status_deadline = None;
        }
    }
}

#[derive(Clone, Copy)]
struct Theme {
    background: Color,
    surface: Color,
    border: Color,
    accent: Color,
    text: Color,
    dim: Color,
    highlight_bg: Color,
    highlight_fg: Color,
    success: Color,
    warning: Color,
    error: Color,
}

impl Theme {
    fn new() -> Self {
        Self {
            background: Color::Rgb(18, 20, 23),
            surface: Color::Rgb(28, 31, 36),
            border: Color::Rgb(58, 62, 70),
            accent: Color::Rgb(242, 193, 78),
            text: Color::Rgb(232, 230, 227),
            dim: Color::Rgb(148, 153, 160),
            highlight_bg: Color::Rgb(45, 93, 124),
            highlight_fg: Color::Rgb(250, 250, 250),
            success: Color::Rgb(126, 211, 158),
            warning: Color::Rgb(238, 185, 110),
            error: Color::Rgb(240, 113, 120),
        }
    }

    fn level(&self, level: LogLevel) -> Color {
        match level {
            LogLevel::Info => self.text,
            LogLevel::Success => self.success,
            LogLevel::Warning => self.warning,
            LogLevel::Error => self.error,
        }
    }
}

fn panel(title: &str, theme: Theme, focused: bool) -> Block<'static> {
    let border = if focused { theme.accent } else { theme.border };
    Block::default()
        .borders(Borders::ALL)
        .border_type(BorderType::Rounded)
        .border_style(Style::default().fg(border))
        .style(Style::default().bg(theme.surface))
        .title(Span::styled(
            format!(" {title} "),
            Style::default().fg(theme.text).add_modifier(Modifier::BOLD),
        ))
}

fn render_ui(frame: &mut Frame, ui: &mut TuiState, state: &AppState, session: &Session) {
    let theme = Theme::new();
    update_status_message(ui);
    let area = frame.size();
    frame.render_widget(
        Block::default().style(Style::default().bg(theme.background)),
        area,
    );

    let layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(1),
            Constraint::Length(3),
            Constraint::Min(4),
            Constraint::Length(1),
            Constraint::Length(LOG_PANEL_HEIGHT),
            Constraint::Length(1),
        ])
        .split(area);

    let body = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Length(CATEGORY_PANEL_WIDTH), Constraint::Min(20)])
        .split(layout[2]);

    render_header(frame, layout[0], ui, state, session, theme);
    render_input(frame, layout[1], ui, theme);
    render_categories(frame, body[0], ui, theme);
    render_applications(frame, body[1], ui, state, session, theme);
    render_navigation(frame, layout[3], state, theme);
    render_log(frame, layout[4], ui, theme);
    render_footer(frame, layout[5], ui, theme);

    if let Some((title, text)) = ui.about.as_ref() {
        render_about(frame, area, title, text, theme);
    }
}

fn render_header(
    frame: &mut Frame,
    area: Rect,
    ui: &TuiState,
    state: &AppState,
    session: &Session,
    theme: Theme,
) {
    let layout = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(50), Constraint::Percentage(50)])
        .split(area);

    let left = Line::from(vec![
        Span::styled(
            "appdock",
            Style::default()
                .fg(theme.accent)
                .add_modifier(Modifier::BOLD),
        ),
        Span::styled("  software catalog", Style::default().fg(theme.dim)),
    ]);
    frame.render_widget(
        Paragraph::new(left).style(Style::default().bg(theme.background)),
        layout[0],
    );

    let endpoint = state.catalog_config().selected().to_string();
    let mut right_text = format!(
        "{endpoint}  apps: {}  downloads: {}",
        ui.visible.len(),
        session.orchestrator.active_count()
    );
    if state.is_refreshing() {
        right_text.push_str("  refreshing…");
    }
    let right = Paragraph::new(Line::from(Span::styled(
        right_text,
        Style::default().fg(theme.dim),
    )))
    .alignment(Alignment::Right)
    .style(Style::default().bg(theme.background));
    frame.render_widget(right, layout[1]);
}

fn render_input(frame: &mut Frame, area: Rect, ui: &TuiState, theme: Theme) {
    let input_padding = 1u16;
    let input_width = area
        .width
        .saturating_sub(2 + input_padding.saturating_mul(2)) as usize;
    let (visible_input, cursor_x) = ui.input.visible(input_width);
    let input_span = if ui.input.text.is_empty() {
        Span::styled(
            "Type to search, or :add / :remove / :use / :speed",
            Style::default().fg(theme.dim),
        )
    } else {
        Span::styled(visible_input, Style::default().fg(theme.text))
    };
    let title = if ui.input.is_command() { " Command " } else { " Search " };

    let input = Paragraph::new(Line::from(input_span))
        .style(Style::default().bg(theme.surface))
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_type(BorderType::Rounded)
                .border_style(Style::default().fg(theme.accent))
                .style(Style::default().bg(theme.surface))
                .padding(Padding::horizontal(input_padding))
                .title(Span::styled(
                    title,
                    Style::default()
                        .fg(theme.accent)
                        .add_modifier(Modifier::BOLD),
                )),
        );
    frame.render_widget(input, area);

    let cursor_x = area.x + 1 + input_padding + cursor_x as u16;
    let cursor_y = area.y + 1;
    let max_cursor_x = area.x + area.width.saturating_sub(1 + input_padding);
    if cursor_x < max_cursor_x && area.height > 2 {
        frame.set_cursor(cursor_x, cursor_y);
    }
}

fn render_categories(frame: &mut Frame, area: Rect, ui: &TuiState, theme: Theme) {
    let items: Vec<ListItem> = ui
        .buckets
        .iter()
        .map(|bucket| {
            let selected = bucket.category == ui.view.category;
            let style = if selected {
                Style::default()
                    .fg(theme.highlight_fg)
                    .bg(theme.highlight_bg)
                    .add_modifier(Modifier::BOLD)
            } else {
                Style::default().fg(theme.text)
            };
            ListItem::new(Line::from(vec![
                Span::styled(bucket.name.clone(), style),
                Span::styled(format!(" ({})", bucket.count), Style::default().fg(theme.dim)),
            ]))
        })
        .collect();
    frame.render_widget(List::new(items).block(panel("Categories", theme, false)), area);
}

fn render_applications(
    frame: &mut Frame,
    area: Rect,
    ui: &mut TuiState,
    state: &AppState,
    session: &Session,
    theme: Theme,
) {
    let block = panel("Applications", theme, true);

    if ui.visible.is_empty() {
        let message = if state.catalog.lock().unwrap().applications.is_empty() {
            "Catalog is empty. Ctrl+R to retry, Ctrl+T to pick a faster endpoint."
        } else {
            "No applications match. Try another query or category."
        };
        let empty = Paragraph::new(message)
            .style(Style::default().fg(theme.dim).bg(theme.surface))
            .alignment(Alignment::Center)
            .wrap(Wrap { trim: true })
            .block(block);
        frame.render_widget(empty, area);
        return;
    }

    let base = state.catalog_base();
    let items: Vec<ListItem> = ui
        .visible
        .iter()
        .map(|app| {
            let resolved = resolve_download(app, &base);
            let button = session.orchestrator.button(app, resolved.as_ref());
            let button_style = if button.enabled {
                Style::default()
                    .fg(theme.accent)
                    .add_modifier(Modifier::BOLD)
            } else {
                Style::default().fg(theme.dim)
            };

            let mut title = vec![Span::styled(
                app.name.clone(),
                Style::default().fg(theme.text).add_modifier(Modifier::BOLD),
            )];
            if let Some(version) = app.version.as_deref() {
                title.push(Span::styled(format!(" {version}"), Style::default().fg(theme.dim)));
            }
            title.push(Span::styled(format!("  [{}]", button.label), button_style));

            let mut subtitle = vec![Span::styled(
                app.category_name().to_string(),
                Style::default().fg(theme.success),
            )];
            let filename = resolved.as_ref().map(|resolved| resolved.filename.as_str());
            let owner = app.key();
            if let Some(task) = filename
                .and_then(|name| session.orchestrator.task(name))
                .filter(|task| task.owner == owner)
            {
                let target = task
                    .save_path
                    .as_ref()
                    .map(|path| path.display().to_string())
                    .unwrap_or_else(|| task.filename.clone());
                subtitle.push(Span::styled(
                    format!(" {} -> {target}", format_bytes(task.received_bytes, task.total_bytes)),
                    Style::default().fg(theme.accent),
                ));
            } else if let Some(reason) = session.orchestrator.failure(app) {
                subtitle.push(Span::styled(
                    format!(" {reason}"),
                    Style::default().fg(theme.error),
                ));
            } else if !app.description().is_empty() {
                subtitle.push(Span::styled(
                    format!(" {}", app.description()),
                    Style::default().fg(theme.dim),
                ));
            }
            ListItem::new(vec![Line::from(title), Line::from(subtitle)])
        })
        .collect();

    let list = List::new(items)
        .block(block)
        .highlight_style(
            Style::default()
                .fg(theme.highlight_fg)
                .bg(theme.highlight_bg)
                .add_modifier(Modifier::BOLD),
        )
        .highlight_symbol("> ");
    frame.render_stateful_widget(list, area, &mut ui.list_state);
}

fn format_bytes(received: u64, total: u64) -> String {
    const MIB: f64 = 1024.0 * 1024.0;
    if total > 0 {
        format!("{:.1}/{:.1} MiB", received as f64 / MIB, total as f64 / MIB)
    } else {
        format!("{:.1} MiB", received as f64 / MIB)
    }
}

fn render_navigation(frame: &mut Frame, area: Rect, state: &AppState, theme: Theme) {
    let links = state.catalog.lock().unwrap().navigation.clone();
    let key_style = Style::default()
        .fg(theme.accent)
        .add_modifier(Modifier::BOLD);
    let mut spans = vec![Span::styled("links ", Style::default().fg(theme.dim))];
    for (index, link) in links.iter().take(9).enumerate() {
        spans.push(Span::styled(format!("Alt+{} ", index + 1), key_style));
        spans.push(Span::styled(
            format!("{}  ", link.name),
            Style::default().fg(theme.text),
        ));
    }
    frame.render_widget(
        Paragraph::new(Line::from(spans)).style(Style::default().bg(theme.background)),
        area,
    );
}

fn render_log(frame: &mut Frame, area: Rect, ui: &TuiState, theme: Theme) {
    let lines: Vec<Line> = ui
        .log
        .entries()
        .take(area.height.saturating_sub(2) as usize)
        .map(|entry| {
            Line::from(Span::styled(
                entry.line(),
                Style::default().fg(theme.level(entry.level)),
            ))
        })
        .collect();
    frame.render_widget(Paragraph::new(lines).block(panel("Log", theme, false)), area);
}

fn render_footer(frame: &mut Frame, area: Rect, ui: &TuiState, theme: Theme) {
    if let Some(message) = ui.status_message.as_deref() {
        let footer_widget = Paragraph::new(Line::from(Span::styled(
            message,
            Style::default()
                .fg(theme.accent)
                .add_modifier(Modifier::BOLD),
        )))
        .alignment(Alignment::Center)
        .style(Style::default().bg(theme.background));
        frame.render_widget(footer_widget, area);
        return;
    }

    let key_style = Style::default()
        .fg(theme.accent)
        .add_modifier(Modifier::BOLD);
    let hint_style = Style::default().fg(theme.dim);
    let hints = [
        ("Enter", "download  "),
        ("Tab", "category  "),
        ("Ctrl+R", "refresh  "),
        ("Ctrl+T", "speed test  "),
        ("Ctrl+D", "downloads  "),
        ("F1", "about  "),
        ("Esc", "quit"),
    ];
    let footer = Line::from(
        hints
            .iter()
            .flat_map(|(key, hint)| {
                [
                    Span::styled(*key, key_style),
                    Span::styled(format!(": {hint}"), hint_style),
                ]
            })
            .collect::<Vec<_>>(),
    );
    let footer_widget = Paragraph::new(footer)
        .alignment(Alignment::Center)
        .style(Style::default().bg(theme.background));
    frame.render_widget(footer_widget, area);
}

fn render_about(frame: &mut Frame, area: Rect, title: &str, text: &str, theme: Theme) {
    let width = area.width.min(64);
    let height = area.height.min(9);
    let popup = Rect {
        x: area.x + (area.width - width) / 2,
        y: area.y + (area.height - height) / 2,
        width,
        height,
    };
    frame.render_widget(Clear, popup);
    let body = Paragraph::new(text.to_string())
        .style(Style::default().fg(theme.text).bg(theme.surface))
        .wrap(Wrap { trim: true })
        .block(panel(title, theme, true).padding(Padding::uniform(1)));
    frame.render_widget(body, popup);
}
