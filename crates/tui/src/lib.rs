use std::io::{self, Stdout};
use std::time::{Duration, Instant, SystemTime};

use chrono::{DateTime, Local};
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::execute;
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Alignment, Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Cell, Clear, Paragraph, Row as TableRow, Table, Wrap};
use ratatui::{Frame, Terminal};
use sqlr_core::bootstrap::BootstrapState;
use sqlr_core::catalog::QueryMode;
use sqlr_core::gateway::{GatewayError, QueryGateway, QueryResult};
use sqlr_core::history::{HistoryEntry, HistoryLog};
use sqlr_core::lifecycle::{Disposition, ExecutionTicket, Phase, RequestId, Submission, ViewMode};
use sqlr_core::presentation::SortDirection;
use sqlr_core::{Session, SessionView};
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::AbortHandle;
use tracing::{debug, info};

const TICK_RATE: Duration = Duration::from_millis(120);

#[derive(Debug, Error)]
pub enum TuiError {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pane {
    Queries,
    Editor,
    Results,
}

impl Pane {
    fn next(self) -> Self {
        match self {
            Self::Queries => Self::Editor,
            Self::Editor => Self::Results,
            Self::Results => Self::Queries,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InputMode {
    Normal,
    EditQuery,
    Search,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DirectionKey {
    Up,
    Down,
    Left,
    Right,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Msg {
    Quit,
    ToggleHelp,
    NextPane,
    Submit,
    RunQuery,
    ToggleView,
    StartEdit,
    StartSearch,
    ToggleFilterColumn,
    SortColumn,
    Navigate(DirectionKey),
    Input(char),
    Backspace,
    FinishInput,
    Tick,
}

#[derive(Debug)]
struct Completion {
    request: RequestId,
    outcome: Result<QueryResult, GatewayError>,
}

struct TuiApp<G: QueryGateway + 'static> {
    session: Session<G>,
    runtime: Handle,
    completions_tx: UnboundedSender<Completion>,
    completions_rx: UnboundedReceiver<Completion>,
    running: Option<(RequestId, AbortHandle)>,
    pane: Pane,
    input: InputMode,
    column_cursor: usize,
    row_offset: usize,
    history_cursor: usize,
    show_help: bool,
    should_quit: bool,
    status_line: String,
}

impl<G: QueryGateway + 'static> TuiApp<G> {
    fn new(session: Session<G>, runtime: Handle) -> Self {
        let (completions_tx, completions_rx) = mpsc::unbounded_channel();
        Self {
            session,
            runtime,
            completions_tx,
            completions_rx,
            running: None,
            pane: Pane::Queries,
            input: InputMode::Normal,
            column_cursor: 0,
            row_offset: 0,
            history_cursor: 0,
            show_help: false,
            should_quit: false,
            status_line: "Connecting to SQL engine...".to_string(),
        }
    }

    fn start(&mut self) {
        let runtime = self.runtime.clone();
        let outcome = runtime.block_on(self.session.bootstrap()).cloned();
        self.status_line = match outcome {
            Ok(BootstrapState::Failed { message }) => message,
            Ok(_) => match self.session.view().schema_warning {
                Some(warning) => format!("SQL engine ready. {warning}"),
                None => "SQL engine ready".to_string(),
            },
            Err(error) => error.to_string(),
        };

        if let Some(submission) = self.session.auto_run_if_needed() {
            self.dispatch(submission);
        }
    }

    fn handle(&mut self, msg: Msg) {
        match msg {
            Msg::Quit => self.should_quit = true,
            Msg::ToggleHelp => self.show_help = !self.show_help,
            Msg::NextPane => self.pane = self.pane.next(),
            Msg::Submit => self.submit(),
            Msg::RunQuery => self.run_active_query(),
            Msg::ToggleView => {
                self.session.toggle_view_mode();
                self.history_cursor = 0;
            }
            Msg::StartEdit => self.start_edit(),
            Msg::StartSearch => {
                self.input = InputMode::Search;
                self.status_line = "Type to search, Enter or Esc to finish".to_string();
            }
            Msg::ToggleFilterColumn => self.toggle_filter_column(),
            Msg::SortColumn => {
                if let Some(column) = self.selected_column() {
                    self.session.request_sort(&column);
                    self.row_offset = 0;
                }
            }
            Msg::Navigate(direction) => self.navigate(direction),
            Msg::Input(ch) => self.edit_input(|text| text.push(ch)),
            Msg::Backspace => self.edit_input(|text| {
                text.pop();
            }),
            Msg::FinishInput => self.input = InputMode::Normal,
            Msg::Tick => self.drain_completions(),
        }
    }

    fn submit(&mut self) {
        match self.pane {
            Pane::Queries | Pane::Editor => self.run_active_query(),
            Pane::Results => {
                if self.session.view().view_mode == ViewMode::History {
                    self.rerun_selected_history();
                } else {
                    self.handle(Msg::SortColumn);
                }
            }
        }
    }

    fn run_active_query(&mut self) {
        let submission = self.session.run();
        self.dispatch(submission);
    }

    fn rerun_selected_history(&mut self) {
        let query = self
            .session
            .view()
            .history
            .get(self.history_cursor)
            .map(|entry| entry.query.clone());
        match query {
            Some(query) => {
                let submission = self.session.rerun(&query);
                self.dispatch(submission);
            }
            None => self.status_line = "No history entry selected".to_string(),
        }
    }

    fn dispatch(&mut self, submission: Submission) {
        self.abort_superseded();
        match submission {
            Submission::Dispatched(ticket) => {
                self.status_line = "Executing query...".to_string();
                self.row_offset = 0;
                self.spawn_execution(ticket);
            }
            Submission::Rejected(rejection) => self.status_line = rejection.to_string(),
        }
    }

    fn spawn_execution(&mut self, ticket: ExecutionTicket) {
        let gateway = self.session.gateway();
        let completions_tx = self.completions_tx.clone();
        let request = ticket.id;
        let task = self.runtime.spawn(async move {
            let outcome = gateway.execute_query(&ticket.query).await;
            if ticket.cancellation.is_cancelled() {
                debug!(request = request.get(), "discarding cancelled execution");
                return;
            }
            if completions_tx.send(Completion { request, outcome }).is_err() {
                debug!(request = request.get(), "completion receiver dropped");
            }
        });
        self.running = Some((request, task.abort_handle()));
    }

    // Stops the gateway call of a request the lifecycle no longer tracks.
    fn abort_superseded(&mut self) {
        let live = self.session.lifecycle().in_flight().map(|ticket| ticket.id);
        let Some((request, task)) = self.running.take() else {
            return;
        };
        if Some(request) == live {
            self.running = Some((request, task));
            return;
        }
        debug!(request = request.get(), "aborting superseded execution");
        task.abort();
    }

    fn drain_completions(&mut self) {
        while let Ok(completion) = self.completions_rx.try_recv() {
            self.apply_completion(completion);
        }
    }

    fn apply_completion(&mut self, completion: Completion) -> Disposition {
        if self
            .running
            .as_ref()
            .is_some_and(|(request, _)| *request == completion.request)
        {
            self.running = None;
        }
        let disposition = self
            .session
            .complete(completion.request, completion.outcome);
        if disposition == Disposition::Superseded {
            return disposition;
        }

        let view = self.session.view();
        self.status_line = match (view.error, view.execution_time_ms) {
            (Some(error), _) => format!("Query failed: {error}"),
            (None, Some(ms)) => format!("Query completed in {ms:.2} ms"),
            (None, None) => "Query completed".to_string(),
        };
        let column_count = view.results.columns.len();
        self.column_cursor = self.column_cursor.min(column_count.saturating_sub(1));
        disposition
    }

    fn start_edit(&mut self) {
        if self.session.active_query().custom_text().is_empty() {
            let seed = self.session.active_query().current_text().to_string();
            self.session.edit_query_text(seed);
        } else if self.session.active_query().mode() == QueryMode::Predefined {
            let text = self.session.active_query().custom_text().to_string();
            self.session.edit_query_text(text);
        }
        self.pane = Pane::Editor;
        self.input = InputMode::EditQuery;
        self.status_line = "Editing custom query, Enter or Esc to finish".to_string();
    }

    fn edit_input(&mut self, edit: impl FnOnce(&mut String)) {
        match self.input {
            InputMode::EditQuery => {
                let mut text = self.session.active_query().custom_text().to_string();
                edit(&mut text);
                self.session.edit_query_text(text);
            }
            InputMode::Search => {
                let mut term = self.session.table_view().search_term().to_string();
                edit(&mut term);
                self.session.set_search_term(term);
                self.row_offset = 0;
            }
            InputMode::Normal => {}
        }
    }

    fn toggle_filter_column(&mut self) {
        let Some(column) = self.selected_column() else {
            self.status_line = "No column to filter on".to_string();
            return;
        };
        let selected = self.session.toggle_filter_column(&column);
        self.row_offset = 0;
        self.status_line = if selected {
            format!("Searching in column `{column}`")
        } else {
            format!("Stopped searching in column `{column}`")
        };
    }

    fn selected_column(&self) -> Option<String> {
        self.session
            .view()
            .results
            .columns
            .get(self.column_cursor)
            .cloned()
    }

    fn navigate(&mut self, direction: DirectionKey) {
        match self.pane {
            Pane::Queries => self.navigate_catalog(direction),
            Pane::Editor => self.status_line = "Press e to edit the custom query".to_string(),
            Pane::Results => self.navigate_results(direction),
        }
    }

    fn navigate_catalog(&mut self, direction: DirectionKey) {
        let active = self.session.active_query();
        let last_index = active.catalog().len().saturating_sub(1);
        let index = match direction {
            DirectionKey::Up | DirectionKey::Left => active.selected_index().saturating_sub(1),
            DirectionKey::Down | DirectionKey::Right => {
                (active.selected_index() + 1).min(last_index)
            }
        };
        self.status_line = match self.session.select_predefined_query(index) {
            Ok(descriptor) => descriptor.description.to_string(),
            Err(error) => error.to_string(),
        };
    }

    fn navigate_results(&mut self, direction: DirectionKey) {
        let view = self.session.view();
        if view.view_mode == ViewMode::History {
            let last = view.history.len().saturating_sub(1);
            self.history_cursor = step(self.history_cursor, direction, last);
            return;
        }

        match direction {
            DirectionKey::Up | DirectionKey::Down => {
                let last = view.results.filtered_count.saturating_sub(1);
                self.row_offset = step(self.row_offset, direction, last);
            }
            DirectionKey::Left | DirectionKey::Right => {
                let last = view.results.columns.len().saturating_sub(1);
                self.column_cursor = step(self.column_cursor, direction, last);
            }
        }
    }
}

fn step(current: usize, direction: DirectionKey, last: usize) -> usize {
    match direction {
        DirectionKey::Up | DirectionKey::Left => current.saturating_sub(1),
        DirectionKey::Down | DirectionKey::Right => (current + 1).min(last),
    }
}

/// Takes over the terminal until the user quits. Gateway calls are spawned
/// on `runtime`; this function must not be called from inside it.
pub fn run<G: QueryGateway + 'static>(session: Session<G>, runtime: Handle) -> Result<(), TuiError> {
    let mut terminal = setup_terminal()?;
    let run_result = run_loop(&mut terminal, TuiApp::new(session, runtime));
    let restore_result = restore_terminal(&mut terminal);

    if let Err(error) = run_result {
        restore_result?;
        return Err(error);
    }

    restore_result?;
    Ok(())
}

fn setup_terminal() -> Result<Terminal<CrosstermBackend<Stdout>>, TuiError> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;
    terminal.clear()?;
    Ok(terminal)
}

fn restore_terminal(terminal: &mut Terminal<CrosstermBackend<Stdout>>) -> Result<(), TuiError> {
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;
    Ok(())
}

fn run_loop<G: QueryGateway + 'static>(
    terminal: &mut Terminal<CrosstermBackend<Stdout>>,
    mut app: TuiApp<G>,
) -> Result<(), TuiError> {
    terminal.draw(|frame| render(frame, &app))?;
    app.start();
    info!("terminal session started");
    let mut last_tick = Instant::now();

    loop {
        terminal.draw(|frame| render(frame, &app))?;

        let timeout = TICK_RATE
            .checked_sub(last_tick.elapsed())
            .unwrap_or(Duration::ZERO);
        if event::poll(timeout)? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    if let Some(message) = map_key_event(key, app.input) {
                        app.handle(message);
                    }
                }
            }
        }

        if last_tick.elapsed() >= TICK_RATE {
            app.handle(Msg::Tick);
            last_tick = Instant::now();
        }

        if app.should_quit {
            break;
        }
    }

    Ok(())
}

fn render<G: QueryGateway + 'static>(frame: &mut Frame<'_>, app: &TuiApp<G>) {
    let view = app.session.view();
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Min(8),
            Constraint::Length(4),
        ])
        .split(frame.area());

    let header = Paragraph::new(Line::from(vec![
        Span::styled(
            format!(" Engine: {} ", engine_label(view.bootstrap, view.initialize_latency)),
            Style::default()
                .fg(Color::Yellow)
                .add_modifier(Modifier::BOLD),
        ),
        Span::raw(" | "),
        Span::raw(format!(
            "Query: {}",
            match view.phase {
                Phase::Executing => "executing",
                Phase::Idle => "idle",
            }
        )),
        Span::raw(" | "),
        Span::raw(format!(
            "Last run: {}",
            view.execution_time_ms
                .map_or_else(|| "-".to_string(), |ms| format!("{ms:.2} ms"))
        )),
        Span::raw(" | "),
        Span::raw(format!("History: {}", view.history.len())),
    ]))
    .block(Block::default().borders(Borders::ALL).title("SQL Runner"));
    frame.render_widget(header, chunks[0]);

    let body = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(35), Constraint::Percentage(65)])
        .split(chunks[1]);
    let left = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(6), Constraint::Length(8)])
        .split(body[0]);

    render_catalog(frame, app, &view, left[0]);
    render_editor(frame, app, &view, left[1]);
    match view.view_mode {
        ViewMode::Results => render_results(frame, app, &view, body[1]),
        ViewMode::History => render_history(frame, app, &view, body[1]),
    }

    let search_cursor = if app.input == InputMode::Search {
        "_"
    } else {
        ""
    };
    let filter_columns = if view.table.filter_columns().is_empty() {
        "none".to_string()
    } else {
        view.table
            .filter_columns()
            .iter()
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(", ")
    };
    let mut filter_line = format!(
        "Search: {}{search_cursor} | Columns: {filter_columns}",
        view.table.search_term()
    );
    if let Some(warning) = view.schema_warning {
        filter_line.push_str(" | ");
        filter_line.push_str(warning);
    }
    let footer = Paragraph::new(vec![
        Line::from(filter_line),
        Line::from(format!("Status: {}", app.status_line)),
    ])
    .block(Block::default().borders(Borders::ALL).title("? for help"));
    frame.render_widget(footer, chunks[2]);

    if app.show_help {
        render_help_popup(frame);
    }
}

fn pane_block<G: QueryGateway + 'static>(app: &TuiApp<G>, pane: Pane, title: String) -> Block<'static> {
    let style = if app.pane == pane {
        Style::default().fg(Color::Cyan)
    } else {
        Style::default()
    };
    Block::default()
        .borders(Borders::ALL)
        .border_style(style)
        .title(title)
}

fn render_catalog<G: QueryGateway + 'static>(
    frame: &mut Frame<'_>,
    app: &TuiApp<G>,
    view: &SessionView<'_>,
    area: Rect,
) {
    let mut lines = view
        .catalog
        .iter()
        .enumerate()
        .map(|(index, descriptor)| {
            let selected = index == view.selected_index;
            let marker = if selected { ">" } else { " " };
            let style = if selected && view.query_mode == QueryMode::Predefined {
                Style::default().add_modifier(Modifier::BOLD)
            } else {
                Style::default()
            };
            Line::styled(format!("{marker} {}", descriptor.name), style)
        })
        .collect::<Vec<_>>();
    if let Some(descriptor) = view.catalog.get(view.selected_index) {
        lines.push(Line::from(""));
        lines.push(Line::styled(
            descriptor.description,
            Style::default().fg(Color::DarkGray),
        ));
    }

    let paragraph = Paragraph::new(lines)
        .wrap(Wrap { trim: true })
        .block(pane_block(app, Pane::Queries, "Predefined Queries".to_string()));
    frame.render_widget(paragraph, area);
}

fn render_editor<G: QueryGateway + 'static>(
    frame: &mut Frame<'_>,
    app: &TuiApp<G>,
    view: &SessionView<'_>,
    area: Rect,
) {
    let mut title = match view.query_mode {
        QueryMode::Custom => "Custom Query (active)".to_string(),
        QueryMode::Predefined => "Custom Query".to_string(),
    };
    if app.input == InputMode::EditQuery {
        title.push_str(" [editing]");
    }
    let text = match view.query_mode {
        QueryMode::Custom => view.query_text.to_string(),
        QueryMode::Predefined => app.session.active_query().custom_text().to_string(),
    };
    let paragraph = Paragraph::new(text)
        .wrap(Wrap { trim: false })
        .block(pane_block(app, Pane::Editor, title));
    frame.render_widget(paragraph, area);
}

fn render_results<G: QueryGateway + 'static>(
    frame: &mut Frame<'_>,
    app: &TuiApp<G>,
    view: &SessionView<'_>,
    area: Rect,
) {
    let results = &view.results;
    let title = format!(
        "Results (Showing {} of {} records)",
        results.filtered_count, results.total_count
    );
    let block = pane_block(app, Pane::Results, title);

    let message = if let Some(error) = view.error {
        Some(Line::styled(
            format!("Error: {error}"),
            Style::default().fg(Color::Red),
        ))
    } else if view.phase == Phase::Executing {
        Some(Line::from("Executing query..."))
    } else if results.is_empty() {
        Some(Line::from("No data"))
    } else {
        None
    };
    if let Some(message) = message {
        let paragraph = Paragraph::new(message)
            .wrap(Wrap { trim: false })
            .alignment(Alignment::Left)
            .block(block);
        frame.render_widget(paragraph, area);
        return;
    }

    let sort = view.table.sort();
    let header = TableRow::new(results.columns.iter().enumerate().map(|(index, column)| {
        let mut label = column.clone();
        if let Some(sort) = sort.filter(|sort| sort.column == *column) {
            label.push(' ');
            label.push_str(sort_indicator(sort.direction));
        }
        if view.table.filter_columns().contains(column) {
            label.push('*');
        }
        let mut style = Style::default().add_modifier(Modifier::BOLD);
        if index == app.column_cursor {
            style = style.add_modifier(Modifier::REVERSED);
        }
        Cell::from(label).style(style)
    }));
    let rows = results.rows.iter().skip(app.row_offset).map(|row| {
        TableRow::new(
            results
                .columns
                .iter()
                .map(|column| Cell::from(row.value(column).to_string())),
        )
    });
    let widths = vec![Constraint::Min(8); results.columns.len()];
    let table = Table::new(rows, widths).header(header).block(block);
    frame.render_widget(table, area);
}

fn render_history<G: QueryGateway + 'static>(
    frame: &mut Frame<'_>,
    app: &TuiApp<G>,
    view: &SessionView<'_>,
    area: Rect,
) {
    let mut lines = Vec::with_capacity(view.history.len() * 2);
    for (index, entry) in view.history.iter().enumerate() {
        let marker = if index == app.history_cursor { ">" } else { " " };
        let (label, color) = if entry.success {
            ("OK ", Color::Green)
        } else {
            ("ERR", Color::Red)
        };
        lines.push(Line::from(vec![
            Span::raw(format!("{marker} ")),
            Span::styled(label, Style::default().fg(color)),
            Span::raw(format!(
                " {} {}  {}",
                format_timestamp(entry.timestamp),
                history_timing(entry).unwrap_or_else(|| " ".repeat(12)),
                entry.query
            )),
        ]));
        if let Some(message) = &entry.message {
            lines.push(Line::styled(
                format!("      {message}"),
                Style::default().fg(Color::DarkGray),
            ));
        }
    }
    if lines.is_empty() {
        lines.push(Line::from("No queries run yet"));
    }

    let paragraph = Paragraph::new(lines).block(pane_block(
        app,
        Pane::Results,
        history_title(view.history),
    ));
    frame.render_widget(paragraph, area);
}

fn render_help_popup(frame: &mut Frame<'_>) {
    let area = centered_rect(70, 60, frame.area());
    frame.render_widget(Clear, area);
    let help = Paragraph::new(vec![
        Line::from("Global keymap"),
        Line::from("q: quit"),
        Line::from("?: toggle help"),
        Line::from("Tab: cycle panes"),
        Line::from("r: run the active query"),
        Line::from("Enter: run query, sort column or re-run history entry (by pane)"),
        Line::from("e: edit custom query"),
        Line::from("v: toggle results / history"),
        Line::from("/: search, f: toggle search column, s: sort column"),
        Line::from("Arrows or hjkl: navigation"),
    ])
    .block(Block::default().borders(Borders::ALL).title("Help"));
    frame.render_widget(help, area);
}

fn centered_rect(width_percent: u16, height_percent: u16, area: Rect) -> Rect {
    let vertical = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100_u16 - height_percent) / 2),
            Constraint::Percentage(height_percent),
            Constraint::Percentage((100_u16 - height_percent) / 2),
        ])
        .split(area);

    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100_u16 - width_percent) / 2),
            Constraint::Percentage(width_percent),
            Constraint::Percentage((100_u16 - width_percent) / 2),
        ])
        .split(vertical[1])[1]
}

fn engine_label(state: &BootstrapState, initialize_latency: Option<Duration>) -> String {
    match (state, initialize_latency) {
        (BootstrapState::Uninitialized | BootstrapState::Initializing, _) => {
            "connecting".to_string()
        }
        (BootstrapState::Ready, Some(latency)) => {
            format!("ready ({:.0} ms)", latency.as_secs_f64() * 1_000.0)
        }
        (BootstrapState::Ready, None) => "ready".to_string(),
        (BootstrapState::Failed { .. }, _) => "failed".to_string(),
    }
}

fn history_title(history: &HistoryLog) -> String {
    format!(
        "History ({}/{} entries, Enter to re-run)",
        history.len(),
        history.capacity()
    )
}

// Only successful runs carry a meaningful duration.
fn history_timing(entry: &HistoryEntry) -> Option<String> {
    entry
        .success
        .then(|| format!("{:>9.2} ms", entry.execution_time_ms))
}

fn sort_indicator(direction: SortDirection) -> &'static str {
    match direction {
        SortDirection::Ascending => "↑",
        SortDirection::Descending => "↓",
    }
}

fn format_timestamp(timestamp: SystemTime) -> String {
    DateTime::<Local>::from(timestamp)
        .format("%H:%M:%S")
        .to_string()
}

fn map_key_event(key: KeyEvent, input: InputMode) -> Option<Msg> {
    if input != InputMode::Normal {
        return match key.code {
            KeyCode::Esc | KeyCode::Enter => Some(Msg::FinishInput),
            KeyCode::Backspace => Some(Msg::Backspace),
            KeyCode::Char(ch) if !key.modifiers.contains(KeyModifiers::CONTROL) => {
                Some(Msg::Input(ch))
            }
            _ => None,
        };
    }

    match (key.modifiers, key.code) {
        (KeyModifiers::CONTROL, KeyCode::Char('c')) | (_, KeyCode::Char('q')) => Some(Msg::Quit),
        (_, KeyCode::Char('?')) => Some(Msg::ToggleHelp),
        (_, KeyCode::Tab) => Some(Msg::NextPane),
        (_, KeyCode::Enter) => Some(Msg::Submit),
        (_, KeyCode::Char('r')) => Some(Msg::RunQuery),
        (_, KeyCode::Char('v')) => Some(Msg::ToggleView),
        (_, KeyCode::Char('e')) => Some(Msg::StartEdit),
        (_, KeyCode::Char('/')) => Some(Msg::StartSearch),
        (_, KeyCode::Char('f')) => Some(Msg::ToggleFilterColumn),
        (_, KeyCode::Char('s')) => Some(Msg::SortColumn),
        (_, KeyCode::Up | KeyCode::Char('k')) => Some(Msg::Navigate(DirectionKey::Up)),
        (_, KeyCode::Down | KeyCode::Char('j')) => Some(Msg::Navigate(DirectionKey::Down)),
        (_, KeyCode::Left | KeyCode::Char('h')) => Some(Msg::Navigate(DirectionKey::Left)),
        (_, KeyCode::Right | KeyCode::Char('l')) => Some(Msg::Navigate(DirectionKey::Right)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::{Duration, SystemTime};

    use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
    use sqlr_core::bootstrap::BootstrapState;
    use sqlr_core::gateway::{GatewayError, QueryGateway, QueryResult, Row, SchemaColumn};
    use sqlr_core::history::HistoryEntry;
    use sqlr_core::lifecycle::{Disposition, ViewMode};
    use sqlr_core::Session;
    use tokio::runtime::{Builder, Runtime};

    use super::{
        engine_label, format_timestamp, history_timing, history_title, map_key_event, InputMode,
        Msg, Pane, TuiApp,
    };

    #[derive(Debug, Default)]
    struct OrdersGateway {
        execute_calls: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl QueryGateway for OrdersGateway {
        async fn initialize(&self) -> Result<(), GatewayError> {
            Ok(())
        }

        async fn execute_query(&self, _sql: &str) -> Result<QueryResult, GatewayError> {
            self.execute_calls.fetch_add(1, Ordering::SeqCst);
            Ok(QueryResult::succeeded(
                vec![
                    Row::new().with("orderID", 10248).with("shipCountry", "France"),
                    Row::new().with("orderID", 10249).with("shipCountry", "Germany"),
                ],
                3.5,
            ))
        }

        async fn fetch_schema(&self, _table: &str) -> Result<Vec<SchemaColumn>, GatewayError> {
            Err(GatewayError::new("schema endpoint unavailable"))
        }
    }

    #[derive(Debug, Default)]
    struct SlowGateway {
        started: AtomicUsize,
        finished: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl QueryGateway for SlowGateway {
        async fn initialize(&self) -> Result<(), GatewayError> {
            Ok(())
        }

        async fn execute_query(&self, _sql: &str) -> Result<QueryResult, GatewayError> {
            self.started.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            self.finished.fetch_add(1, Ordering::SeqCst);
            Ok(QueryResult::succeeded(
                vec![Row::new().with("orderID", 10248)],
                50.0,
            ))
        }

        async fn fetch_schema(&self, _table: &str) -> Result<Vec<SchemaColumn>, GatewayError> {
            Ok(vec![SchemaColumn::new("orderID", "INTEGER")])
        }
    }

    fn started_with<G: QueryGateway + Default + 'static>() -> (Runtime, Arc<G>, TuiApp<G>) {
        let runtime = Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("runtime should build");
        let gateway = Arc::new(G::default());
        let mut app = TuiApp::new(
            Session::new(Arc::clone(&gateway), "orders"),
            runtime.handle().clone(),
        );
        app.start();
        (runtime, gateway, app)
    }

    fn started_app() -> (Runtime, Arc<OrdersGateway>, TuiApp<OrdersGateway>) {
        started_with()
    }

    fn settle<G: QueryGateway + 'static>(runtime: &Runtime, app: &mut TuiApp<G>) -> Disposition {
        let completion = runtime
            .block_on(app.completions_rx.recv())
            .expect("a completion should arrive");
        app.apply_completion(completion)
    }

    #[test]
    fn pane_cycles_in_expected_order() {
        assert_eq!(Pane::Queries.next(), Pane::Editor);
        assert_eq!(Pane::Editor.next(), Pane::Results);
        assert_eq!(Pane::Results.next(), Pane::Queries);
    }

    #[test]
    fn keymap_supports_required_global_keys() {
        let normal = |code| map_key_event(KeyEvent::new(code, KeyModifiers::NONE), InputMode::Normal);
        assert_eq!(normal(KeyCode::Char('q')), Some(Msg::Quit));
        assert_eq!(normal(KeyCode::Tab), Some(Msg::NextPane));
        assert_eq!(normal(KeyCode::Char('r')), Some(Msg::RunQuery));
        assert_eq!(normal(KeyCode::Char('/')), Some(Msg::StartSearch));
        assert_eq!(
            map_key_event(
                KeyEvent::new(KeyCode::Char('c'), KeyModifiers::CONTROL),
                InputMode::Normal
            ),
            Some(Msg::Quit)
        );
    }

    #[test]
    fn text_input_captures_printable_keys() {
        let search = |code| map_key_event(KeyEvent::new(code, KeyModifiers::NONE), InputMode::Search);
        assert_eq!(search(KeyCode::Char('q')), Some(Msg::Input('q')));
        assert_eq!(search(KeyCode::Backspace), Some(Msg::Backspace));
        assert_eq!(search(KeyCode::Esc), Some(Msg::FinishInput));
        assert_eq!(search(KeyCode::Tab), None);
    }

    #[test]
    fn start_bootstraps_and_runs_the_default_query_once() {
        let (runtime, gateway, mut app) = started_app();
        assert_eq!(
            app.session.view().schema_warning,
            Some("Could not fetch table schema.")
        );

        assert_eq!(settle(&runtime, &mut app), Disposition::Applied);
        assert_eq!(gateway.execute_calls.load(Ordering::SeqCst), 1);
        assert_eq!(app.status_line, "Query completed in 3.50 ms");
        assert_eq!(app.session.view().results.total_count, 2);
        assert!(app.session.auto_run_if_needed().is_none());
    }

    #[test]
    fn search_keys_filter_the_selected_column() {
        let (runtime, _gateway, mut app) = started_app();
        settle(&runtime, &mut app);

        app.pane = Pane::Results;
        app.handle(Msg::Navigate(super::DirectionKey::Right));
        app.handle(Msg::ToggleFilterColumn);
        app.handle(Msg::StartSearch);
        for ch in "GER".chars() {
            app.handle(Msg::Input(ch));
        }
        app.handle(Msg::FinishInput);

        let view = app.session.view();
        assert_eq!(view.table.search_term(), "GER");
        assert_eq!(view.results.filtered_count, 1);
        assert_eq!(view.results.total_count, 2);
        assert_eq!(app.input, InputMode::Normal);
    }

    #[test]
    fn rapid_reruns_only_deliver_the_newest_outcome() {
        let (runtime, _gateway, mut app) = started_app();
        settle(&runtime, &mut app);

        app.handle(Msg::RunQuery);
        app.handle(Msg::RunQuery);
        assert_eq!(settle(&runtime, &mut app), Disposition::Applied);
        assert!(app.completions_rx.try_recv().is_err());

        let view = app.session.view();
        assert_eq!(view.history.len(), 3);
        assert_eq!(
            view.history.get(1).and_then(|entry| entry.message.as_deref()),
            Some("Query cancelled: superseded by a newer request")
        );
    }

    #[test]
    fn superseded_gateway_calls_are_aborted() {
        let (runtime, gateway, mut app) = started_with::<SlowGateway>();
        runtime.block_on(async { tokio::time::sleep(Duration::from_millis(10)).await });
        assert_eq!(gateway.started.load(Ordering::SeqCst), 1);

        app.handle(Msg::RunQuery);
        app.handle(Msg::RunQuery);
        assert_eq!(settle(&runtime, &mut app), Disposition::Applied);
        runtime.block_on(async { tokio::time::sleep(Duration::from_millis(300)).await });

        assert_eq!(gateway.finished.load(Ordering::SeqCst), 1);
        assert!(app.running.is_none());
        assert!(app.completions_rx.try_recv().is_err());
        let view = app.session.view();
        assert_eq!(view.history.len(), 3);
        assert_eq!(view.results.total_count, 1);
    }

    #[test]
    fn enter_in_history_view_reruns_the_selected_entry() {
        let (runtime, gateway, mut app) = started_app();
        settle(&runtime, &mut app);

        app.pane = Pane::Results;
        app.handle(Msg::ToggleView);
        assert_eq!(app.session.view().view_mode, ViewMode::History);
        app.handle(Msg::Submit);
        settle(&runtime, &mut app);

        let view = app.session.view();
        assert_eq!(gateway.execute_calls.load(Ordering::SeqCst), 2);
        assert_eq!(view.history.len(), 2);
        assert_eq!(view.view_mode, ViewMode::Results);
    }

    #[test]
    fn history_shows_timing_for_successful_runs_only() {
        let succeeded = HistoryEntry::succeeded("SELECT * FROM orders", 3.5);
        let rejected = HistoryEntry::failed("SELEC * FROM orders", 0.0, "SQL syntax error");
        assert_eq!(history_timing(&succeeded).as_deref(), Some("     3.50 ms"));
        assert_eq!(history_timing(&rejected), None);

        let (runtime, _gateway, mut app) = started_app();
        settle(&runtime, &mut app);
        assert_eq!(
            history_title(app.session.view().history),
            "History (1/50 entries, Enter to re-run)"
        );
    }

    #[test]
    fn engine_label_reports_initialize_latency() {
        assert_eq!(
            engine_label(&BootstrapState::Ready, Some(Duration::from_millis(12))),
            "ready (12 ms)"
        );
        assert_eq!(engine_label(&BootstrapState::Ready, None), "ready");
        assert_eq!(
            engine_label(&BootstrapState::Initializing, None),
            "connecting"
        );
        let failed = BootstrapState::Failed {
            message: "Failed to connect to backend".to_string(),
        };
        assert_eq!(engine_label(&failed, None), "failed");

        let (_runtime, _gateway, app) = started_app();
        assert!(app.session.view().initialize_latency.is_some());
    }

    #[test]
    fn timestamps_render_as_wall_clock_time() {
        let rendered = format_timestamp(SystemTime::now());
        assert_eq!(rendered.len(), 8);
        assert_eq!(rendered.matches(':').count(), 2);
    }
}
