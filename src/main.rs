use std::io;
use std::sync::mpsc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use crossterm::event::{
    self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEvent, KeyEventKind,
};
use crossterm::execute;
use crossterm::terminal::{
    EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode,
};
use ratatui::layout::{Constraint, Direction, Layout};
use ratatui::prelude::*;
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Clear, Paragraph};
use tracing::{info, warn};

use keiba_terminal::api::ApiClient;
use keiba_terminal::config::AppConfig;
use keiba_terminal::identity::{DeviceToken, default_token_path};
use keiba_terminal::logging::init_file_logging;
use keiba_terminal::marks::{BuyState, MarkCategory};
use keiba_terminal::prediction::{buy_of_other, mark_of_other};
use keiba_terminal::provider::spawn_provider;
use keiba_terminal::refresh_gate::format_remaining;
use keiba_terminal::state::{AppState, Delta, ProviderCommand, Screen, apply_delta};

const MAX_OTHER_COLUMNS: usize = 4;

struct App {
    state: AppState,
    should_quit: bool,
    cmd_tx: mpsc::Sender<ProviderCommand>,
}

impl App {
    fn new(state: AppState, cmd_tx: mpsc::Sender<ProviderCommand>) -> Self {
        Self {
            state,
            should_quit: false,
            cmd_tx,
        }
    }

    fn send(&mut self, cmd: Option<ProviderCommand>) {
        let Some(cmd) = cmd else {
            return;
        };
        if self.cmd_tx.send(cmd).is_err() {
            self.state.push_log("[WARN] Provider unavailable");
        }
    }

    fn send_all(&mut self, cmds: Vec<ProviderCommand>) {
        for cmd in cmds {
            self.send(Some(cmd));
        }
    }

    fn on_key(&mut self, key: KeyEvent) {
        if self.state.comment_draft.is_some() {
            self.on_comment_key(key);
            return;
        }
        match key.code {
            KeyCode::Char('q') => self.should_quit = true,
            KeyCode::Char('?') => self.state.help_overlay = !self.state.help_overlay,
            KeyCode::Char('j') | KeyCode::Down => self.state.select_next(),
            KeyCode::Char('k') | KeyCode::Up => self.state.select_prev(),
            KeyCode::Char('g') => {
                let cmd = self.state.cycle_group();
                self.send(cmd);
            }
            _ => match self.state.screen {
                Screen::Races => self.on_races_key(key),
                Screen::Prediction => self.on_prediction_key(key),
            },
        }
    }

    fn on_comment_key(&mut self, key: KeyEvent) {
        match key.code {
            KeyCode::Enter => self.state.commit_comment(),
            KeyCode::Esc => self.state.cancel_comment_edit(),
            KeyCode::Backspace => self.state.pop_comment_char(),
            KeyCode::Char(c) => self.state.push_comment_char(c),
            _ => {}
        }
    }

    fn on_races_key(&mut self, key: KeyEvent) {
        match key.code {
            KeyCode::Enter => {
                let cmd = self.state.open_selected_race();
                self.send(cmd);
            }
            KeyCode::Char('r') => {
                let cmd = self.state.request_refresh();
                self.send(cmd);
            }
            KeyCode::Char('[') | KeyCode::Left => {
                let cmds = self.state.shift_date(-1);
                self.send_all(cmds);
            }
            KeyCode::Char(']') | KeyCode::Right => {
                let cmds = self.state.shift_date(1);
                self.send_all(cmds);
            }
            _ => {}
        }
    }

    fn on_prediction_key(&mut self, key: KeyEvent) {
        match key.code {
            KeyCode::Esc | KeyCode::Backspace => self.state.close_prediction(),
            KeyCode::Char(c @ '1'..='5') => {
                let idx = (c as usize) - ('1' as usize);
                self.state.mark_selected(Some(MarkCategory::ALL[idx]));
            }
            KeyCode::Char('0') | KeyCode::Delete => self.state.mark_selected(None),
            KeyCode::Char('b') => self.state.toggle_buy_selected(),
            KeyCode::Char('a') => self.state.set_buy_selected(BuyState::Primary),
            KeyCode::Char('c') => self.state.set_buy_selected(BuyState::Secondary),
            KeyCode::Char('x') => self.state.set_buy_selected(BuyState::None),
            KeyCode::Char('m') => self.state.begin_comment_edit(),
            KeyCode::Char('s') => {
                let cmd = self.state.save_prediction();
                if cmd.is_none() && !self.state.prediction.dirty() {
                    self.state.push_log("[INFO] No changes to save");
                }
                self.send(cmd);
            }
            KeyCode::Char('R') => {
                let cmd = self.state.reload_prediction();
                self.send(cmd);
            }
            _ => {}
        }
    }
}

fn main() -> Result<()> {
    let config = AppConfig::from_env();
    let _log_guard = match init_file_logging(&config.log_dir) {
        Ok(guard) => Some(guard),
        Err(err) => {
            eprintln!("logging disabled: {err:#}");
            None
        }
    };

    let token_path = match config.token_path.clone() {
        Some(path) => path,
        None => default_token_path()?,
    };
    let token = DeviceToken::load_or_create(&token_path).context("load device token")?;
    let api = ApiClient::new(config.api_base_url.clone(), token, config.http_timeout)?;
    info!(api = api.base_url(), date = %config.date, "starting keiba_terminal");

    if let Some(nickname) = parse_register_arg()? {
        let user = api
            .register(&nickname)
            .map_err(|err| anyhow!(err.user_message()))?;
        println!("Registered as {} ({})", user.nickname, user.id);
        return Ok(());
    }

    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = ratatui::backend::CrosstermBackend::new(stdout);
    let mut terminal = ratatui::Terminal::new(backend)?;

    let (tx, rx) = mpsc::channel();
    let (cmd_tx, cmd_rx) = mpsc::channel();
    spawn_provider(api, tx, cmd_rx);

    let mut app = App::new(AppState::new(config.date, config.group_id.clone()), cmd_tx);
    let startup = app.state.startup_commands();
    app.send_all(startup);
    let res = run_app(&mut terminal, &mut app, rx);

    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;

    if let Err(err) = res {
        warn!(error = %err, "terminal loop failed");
        eprintln!("error: {err}");
    }
    Ok(())
}

fn parse_register_arg() -> Result<Option<String>> {
    let mut args = std::env::args().skip(1);
    match args.next().as_deref() {
        None => Ok(None),
        Some("--register") => args
            .next()
            .map(Some)
            .ok_or_else(|| anyhow!("--register requires a nickname")),
        Some(other) => Err(anyhow!("unknown argument: {other}")),
    }
}

fn run_app<B: Backend>(
    terminal: &mut Terminal<B>,
    app: &mut App,
    rx: mpsc::Receiver<Delta>,
) -> io::Result<()> {
    let tick_rate = Duration::from_millis(250);
    let mut last_tick = Instant::now();

    loop {
        while let Ok(delta) = rx.try_recv() {
            apply_delta(&mut app.state, delta);
        }
        app.state.tick(Instant::now());

        terminal.draw(|f| ui(f, &app.state))?;

        let timeout = tick_rate
            .checked_sub(last_tick.elapsed())
            .unwrap_or(Duration::ZERO);
        if event::poll(timeout)?
            && let Event::Key(key) = event::read()?
            && key.kind == KeyEventKind::Press
        {
            app.on_key(key);
        }

        if last_tick.elapsed() >= tick_rate {
            last_tick = Instant::now();
        }

        if app.should_quit {
            app.state.gate.dispose();
            app.state.prediction.close();
            return Ok(());
        }
    }
}

fn ui(frame: &mut Frame, state: &AppState) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(2),
            Constraint::Min(1),
            Constraint::Length(2),
        ])
        .split(frame.size());

    let header = Paragraph::new(header_text(state)).block(Block::default().borders(Borders::BOTTOM));
    frame.render_widget(header, chunks[0]);

    match state.screen {
        Screen::Races => render_races(frame, chunks[1], state),
        Screen::Prediction => render_prediction(frame, chunks[1], state),
    }

    let footer = Paragraph::new(footer_text(state)).block(Block::default().borders(Borders::TOP));
    frame.render_widget(footer, chunks[2]);

    if state.help_overlay {
        let area = frame.size();
        render_help_overlay(frame, area);
    }
}

fn header_text(state: &AppState) -> String {
    let user = state
        .user
        .as_ref()
        .map(|u| u.nickname.as_str())
        .unwrap_or("(unregistered)");
    format!(
        " KEIBA | {} | {} | {}",
        state.date.format("%Y-%m-%d (%a)"),
        state.group_label(),
        user
    )
}

fn footer_text(state: &AppState) -> String {
    let keys = match state.screen {
        Screen::Races => "j/k Move | Enter Open | r Refresh | [/] Date | g Group | ? Help | q Quit",
        Screen::Prediction => {
            "1-5 Mark | 0 Clear | b Buy | m Comment | s Save | R Reload | g Group | Esc Back | q Quit"
        }
    };
    let last = state.logs.back().map(String::as_str).unwrap_or("");
    format!("{keys}   {last}")
}

fn refresh_label(state: &AppState) -> String {
    if state.gate.is_refreshing() {
        "[ Refreshing... ]".to_string()
    } else if !state.gate.can_refresh() {
        format!("[ {} ]", format_remaining(state.gate.remaining_seconds()))
    } else if state.venues.is_empty() && !state.races_loading {
        "[ Fetch races ]".to_string()
    } else {
        "[ Refresh ]".to_string()
    }
}

fn render_races(frame: &mut Frame, area: Rect, state: &AppState) {
    let sections = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(2), Constraint::Min(1)])
        .split(area);

    let hint = if state.venues.is_empty() {
        "No race data for this day"
    } else {
        "Race data can be refreshed"
    };
    let button_style = if state.gate.can_refresh() && !state.gate.is_refreshing() {
        Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD)
    } else {
        Style::default().fg(Color::DarkGray)
    };
    let mut lines = vec![Line::from(vec![
        Span::raw(format!("{hint}  ")),
        Span::styled(refresh_label(state), button_style),
    ])];
    if let Some(err) = state.races_error.as_deref() {
        lines.push(Line::styled(err.to_string(), Style::default().fg(Color::Red)));
    }
    frame.render_widget(Paragraph::new(lines), sections[0]);

    let list_area = sections[1];
    let races = state.races();
    if races.is_empty() {
        let text = if state.races_loading {
            "Loading..."
        } else {
            "No races"
        };
        let empty = Paragraph::new(text).style(Style::default().fg(Color::DarkGray));
        frame.render_widget(empty, list_area);
        return;
    }

    let (start, end) = visible_range(state.selected, races.len(), list_area.height as usize);
    let lines: Vec<Line> = (start..end)
        .map(|idx| {
            let race = races[idx];
            let venue = state.venue_of(&race.id).unwrap_or("");
            let course = match (race.surface.as_deref(), race.distance) {
                (Some(surface), Some(distance)) => format!("{surface}{distance}m"),
                (None, Some(distance)) => format!("{distance}m"),
                _ => String::new(),
            };
            let text = format!(
                "{:<6} {:>2}R {:<22} {:>5} {:<8} {:>2} runners {}",
                venue,
                race.race_number,
                race.race_name,
                race.post_time.as_deref().unwrap_or("--:--"),
                course,
                race.horse_count,
                if race.has_prediction { "✓" } else { "" }
            );
            if idx == state.selected {
                Line::styled(text, Style::default().fg(Color::White).bg(Color::DarkGray))
            } else {
                Line::raw(text)
            }
        })
        .collect();
    frame.render_widget(Paragraph::new(lines), list_area);
}

fn render_prediction(frame: &mut Frame, area: Rect, state: &AppState) {
    let pred = &state.prediction;
    let sections = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(2),
            Constraint::Length(1),
            Constraint::Min(1),
            Constraint::Length(1),
        ])
        .split(area);

    let title = match pred.race() {
        Some(race) => format!(
            "{} {}R {}  {}{}{}",
            race.venue,
            race.race_number,
            race.race_name,
            race.surface.as_deref().unwrap_or(""),
            race.distance.map(|d| format!("{d}m")).unwrap_or_default(),
            race.post_time
                .as_deref()
                .map(|t| format!("  post {t}"))
                .unwrap_or_default(),
        ),
        None if pred.loading() => "Loading...".to_string(),
        None => "Race not found".to_string(),
    };
    let mut title_lines = vec![Line::styled(
        title,
        Style::default().add_modifier(Modifier::BOLD),
    )];
    if let Some(err) = pred.error() {
        title_lines.push(Line::styled(err.to_string(), Style::default().fg(Color::Red)));
    }
    frame.render_widget(Paragraph::new(title_lines), sections[0]);

    let others: Vec<_> = pred.others().iter().take(MAX_OTHER_COLUMNS).collect();
    let mut head = format!("{:>3} {:<18} {:<10} {:<6}", "No", "Name", "Jockey", "Mine");
    for other in &others {
        head.push_str(&format!(" {:<8}", truncate(&other.nickname, 8)));
    }
    frame.render_widget(
        Paragraph::new(head).style(Style::default().fg(Color::DarkGray)),
        sections[1],
    );

    let table_area = sections[2];
    let entrants = pred.entrants();
    let (start, end) = visible_range(
        state.entrant_selected,
        entrants.len(),
        table_area.height as usize,
    );
    let lines: Vec<Line> = (start..end)
        .map(|idx| {
            let entrant = &entrants[idx];
            let mine = cell_text(pred.mark_of(entrant.id), pred.buy_of(entrant.id));
            let mut spans = vec![
                Span::raw(format!(
                    "{:>3} {:<18} {:<10} ",
                    entrant.number,
                    truncate(&entrant.name, 18),
                    truncate(entrant.jockey_name.as_deref().unwrap_or(""), 10)
                )),
                Span::styled(format!("{mine:<6}"), mark_style(pred.mark_of(entrant.id))),
            ];
            for other in &others {
                let mark = mark_of_other(other, entrant.id);
                let text = cell_text(mark, buy_of_other(other, entrant.id));
                spans.push(Span::styled(format!(" {text:<8}"), mark_style(mark)));
            }
            let mut line = Line::from(spans);
            if entrant.scratched {
                line = line.style(
                    Style::default()
                        .fg(Color::DarkGray)
                        .add_modifier(Modifier::CROSSED_OUT),
                );
            } else if idx == state.entrant_selected {
                line = line.style(Style::default().bg(Color::DarkGray));
            }
            line
        })
        .collect();
    frame.render_widget(Paragraph::new(lines), table_area);

    let status = if let Some(draft) = state.comment_draft.as_deref() {
        format!("Comment: {draft}_  (Enter apply, Esc cancel)")
    } else if pred.saving() {
        "Saving...".to_string()
    } else if pred.dirty() {
        "Unsaved changes (s to save)".to_string()
    } else {
        format!("No changes | {} marked", pred.sheet().marked_count())
    };
    let status = match (state.comment_draft.is_none(), pred.comment()) {
        (true, Some(comment)) => format!("{status} | \"{comment}\""),
        _ => status,
    };
    frame.render_widget(
        Paragraph::new(status).style(Style::default().fg(Color::Yellow)),
        sections[3],
    );
}

fn cell_text(mark: Option<MarkCategory>, buy: BuyState) -> String {
    let symbol = mark.map(MarkCategory::symbol).unwrap_or("-");
    format!("{symbol}{}", buy.symbol())
}

fn mark_style(mark: Option<MarkCategory>) -> Style {
    let color = match mark {
        Some(MarkCategory::Primary) => Color::Red,
        Some(MarkCategory::Secondary) => Color::Blue,
        Some(MarkCategory::DarkHorse) => Color::Green,
        Some(MarkCategory::Contender) => Color::Magenta,
        Some(MarkCategory::LongShot) => Color::Yellow,
        None => Color::DarkGray,
    };
    Style::default().fg(color)
}

fn truncate(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

fn visible_range(selected: usize, total: usize, visible: usize) -> (usize, usize) {
    if total == 0 {
        return (0, 0);
    }
    if total <= visible {
        return (0, total);
    }

    let mut start = selected.saturating_sub(visible / 2);
    if start + visible > total {
        start = total - visible;
    }
    (start, start + visible)
}

fn render_help_overlay(frame: &mut Frame, area: Rect) {
    let popup_area = centered_rect(60, 70, area);
    frame.render_widget(Clear, popup_area);

    let mut text = vec![
        "Keiba Terminal - Help".to_string(),
        String::new(),
        "Races:".to_string(),
        "  j/k or ↑/↓   Move".to_string(),
        "  Enter        Open predictions".to_string(),
        "  r            Refresh race data (rate limited)".to_string(),
        "  [ / ]        Previous / next day".to_string(),
        "  g            Cycle group scope".to_string(),
        String::new(),
        "Predictions:".to_string(),
    ];
    for (idx, mark) in MarkCategory::ALL.iter().enumerate() {
        text.push(format!("  {}            {} {}", idx + 1, mark.symbol(), mark.label()));
    }
    text.extend(
        [
            "  0            Clear mark",
            "  b            Cycle buy: axis -> cover -> none",
            "  a / c / x    Set axis / cover / none",
            "  m            Edit comment",
            "  s            Save",
            "  R            Reload",
            "  Esc          Back",
        ]
        .map(str::to_string),
    );

    let help = Paragraph::new(text.join("\n"))
        .block(Block::default().title("Help").borders(Borders::ALL))
        .style(Style::default());
    frame.render_widget(help, popup_area);
}

fn centered_rect(percent_x: u16, percent_y: u16, area: Rect) -> Rect {
    let vertical = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(area);

    let horizontal = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(vertical[1]);

    horizontal[1]
}
