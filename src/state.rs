use std::collections::VecDeque;
use std::time::Instant;

use chrono::{Duration as ChronoDuration, NaiveDate};

use crate::api::{
    ApiError, Entrant, FetchOutcome, FetchStatus, Group, PredictionsResponse, RaceSummary, User,
    Venue,
};
use crate::marks::{BuyState, EntrantId, MarkCategory};
use crate::prediction::{FetchTicket, PredictionController, SaveRequest, Scope};
use crate::refresh_gate::{RefreshGate, RefreshOutcome, StatusTicket};

const LOG_CAPACITY: usize = 200;
pub const COMMENT_MAX_CHARS: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Screen {
    Races,
    Prediction,
}

#[derive(Debug, Clone)]
pub struct AppState {
    pub screen: Screen,
    pub date: NaiveDate,
    pub venues: Vec<Venue>,
    pub races_loading: bool,
    pub races_error: Option<String>,
    /// Last race-list load issued and last one applied. Loads run in
    /// parallel, so an older list must never replace a newer one.
    races_issued: u64,
    races_applied: u64,
    pub selected: usize,
    pub entrant_selected: usize,
    pub groups: Vec<Group>,
    pub group_id: Option<String>,
    pub user: Option<User>,
    pub gate: RefreshGate,
    pub prediction: PredictionController,
    /// Comment being typed; `None` when not editing.
    pub comment_draft: Option<String>,
    pub logs: VecDeque<String>,
    pub help_overlay: bool,
}

impl AppState {
    pub fn new(date: NaiveDate, group_id: Option<String>) -> Self {
        let mut gate = RefreshGate::new();
        gate.open(date);
        Self {
            screen: Screen::Races,
            date,
            venues: Vec::new(),
            races_loading: true,
            races_error: None,
            races_issued: 0,
            races_applied: 0,
            selected: 0,
            entrant_selected: 0,
            groups: Vec::new(),
            group_id,
            user: None,
            gate,
            prediction: PredictionController::new(),
            comment_draft: None,
            logs: VecDeque::with_capacity(LOG_CAPACITY),
            help_overlay: false,
        }
    }

    pub fn startup_commands(&mut self) -> Vec<ProviderCommand> {
        let mut cmds = vec![ProviderCommand::LoadUser, ProviderCommand::LoadGroups];
        cmds.extend(self.day_commands());
        cmds
    }

    /// Race list plus refresh status for the current date.
    fn day_commands(&mut self) -> Vec<ProviderCommand> {
        let mut cmds = vec![ProviderCommand::LoadRaces {
            date: self.date,
            seq: self.next_races_seq(),
        }];
        if let Some(ticket) = self.gate.status_ticket() {
            cmds.push(ProviderCommand::LoadFetchStatus { ticket });
        }
        cmds
    }

    fn next_races_seq(&mut self) -> u64 {
        self.races_issued += 1;
        self.races_issued
    }

    pub fn push_log(&mut self, msg: impl Into<String>) {
        if self.logs.len() >= LOG_CAPACITY {
            self.logs.pop_front();
        }
        self.logs.push_back(msg.into());
    }

    /// Moves the race list to another day and re-scopes the refresh gate.
    pub fn shift_date(&mut self, days: i64) -> Vec<ProviderCommand> {
        let Some(date) = self.date.checked_add_signed(ChronoDuration::days(days)) else {
            return Vec::new();
        };
        self.date = date;
        self.venues.clear();
        self.races_loading = true;
        self.races_error = None;
        self.selected = 0;
        self.gate.open(date);
        self.day_commands()
    }

    /// The returned command carries the sequence for the race list that
    /// follows a successful refresh.
    pub fn request_refresh(&mut self) -> Option<ProviderCommand> {
        let date = self.gate.try_begin()?;
        self.push_log(format!("[INFO] Refreshing race data for {date}"));
        Some(ProviderCommand::RefreshRaces {
            date,
            races_seq: self.next_races_seq(),
        })
    }

    pub fn races(&self) -> Vec<&RaceSummary> {
        self.venues.iter().flat_map(|v| v.races.iter()).collect()
    }

    pub fn selected_race(&self) -> Option<&RaceSummary> {
        self.races().get(self.selected).copied()
    }

    pub fn venue_of(&self, race_id: &str) -> Option<&str> {
        self.venues
            .iter()
            .find(|v| v.races.iter().any(|r| r.id == race_id))
            .map(|v| v.venue.as_str())
    }

    pub fn select_next(&mut self) {
        match self.screen {
            Screen::Races => self.selected = wrap_next(self.selected, self.races().len()),
            Screen::Prediction => {
                self.entrant_selected =
                    wrap_next(self.entrant_selected, self.prediction.entrants().len())
            }
        }
    }

    pub fn select_prev(&mut self) {
        match self.screen {
            Screen::Races => self.selected = wrap_prev(self.selected, self.races().len()),
            Screen::Prediction => {
                self.entrant_selected =
                    wrap_prev(self.entrant_selected, self.prediction.entrants().len())
            }
        }
    }

    pub fn open_selected_race(&mut self) -> Option<ProviderCommand> {
        let race_id = self.selected_race()?.id.clone();
        self.screen = Screen::Prediction;
        self.entrant_selected = 0;
        let ticket = self
            .prediction
            .open(Scope::new(race_id, self.group_id.clone()));
        Some(ProviderCommand::LoadPredictions { ticket })
    }

    pub fn close_prediction(&mut self) {
        if self.prediction.dirty() {
            self.push_log("[WARN] Unsaved marks discarded");
        }
        self.prediction.close();
        self.comment_draft = None;
        self.screen = Screen::Races;
    }

    /// Cycles personal -> each group -> personal. Re-scopes an open race.
    pub fn cycle_group(&mut self) -> Option<ProviderCommand> {
        self.group_id = match self.group_id.as_deref() {
            None => self.groups.first().map(|g| g.id.clone()),
            Some(current) => self
                .groups
                .iter()
                .position(|g| g.id == current)
                .and_then(|idx| self.groups.get(idx + 1))
                .map(|g| g.id.clone()),
        };
        self.push_log(format!("[INFO] Scope: {}", self.group_label()));
        if self.screen != Screen::Prediction {
            return None;
        }
        let race_id = self.prediction.scope()?.race_id.clone();
        self.comment_draft = None;
        let ticket = self
            .prediction
            .open(Scope::new(race_id, self.group_id.clone()));
        Some(ProviderCommand::LoadPredictions { ticket })
    }

    pub fn group_label(&self) -> String {
        match self.group_id.as_deref() {
            None => "Personal".to_string(),
            Some(id) => self
                .groups
                .iter()
                .find(|g| g.id == id)
                .map(|g| g.name.clone())
                .unwrap_or_else(|| id.to_string()),
        }
    }

    pub fn selected_entrant(&self) -> Option<&Entrant> {
        self.prediction.entrants().get(self.entrant_selected)
    }

    fn editable_entrant(&self) -> Option<EntrantId> {
        self.selected_entrant()
            .filter(|e| !e.scratched)
            .map(|e| e.id)
    }

    pub fn mark_selected(&mut self, mark: Option<MarkCategory>) {
        if let Some(id) = self.editable_entrant() {
            self.prediction.set_mark(id, mark);
        }
    }

    pub fn toggle_buy_selected(&mut self) {
        if let Some(id) = self.editable_entrant() {
            self.prediction.toggle_buy(id);
        }
    }

    pub fn set_buy_selected(&mut self, buy: BuyState) {
        if let Some(id) = self.editable_entrant() {
            self.prediction.set_buy(id, buy);
        }
    }

    pub fn save_prediction(&mut self) -> Option<ProviderCommand> {
        let request = self.prediction.begin_save()?;
        self.push_log("[INFO] Saving prediction");
        Some(ProviderCommand::SavePrediction { request })
    }

    pub fn begin_comment_edit(&mut self) {
        if self.screen != Screen::Prediction
            || self.prediction.scope().is_none()
            || self.prediction.loading()
        {
            return;
        }
        self.comment_draft = Some(self.prediction.comment().unwrap_or_default().to_string());
    }

    pub fn push_comment_char(&mut self, c: char) {
        if let Some(draft) = self.comment_draft.as_mut()
            && draft.chars().count() < COMMENT_MAX_CHARS
        {
            draft.push(c);
        }
    }

    pub fn pop_comment_char(&mut self) {
        if let Some(draft) = self.comment_draft.as_mut() {
            draft.pop();
        }
    }

    /// Applies the draft. An unchanged comment leaves the prediction clean.
    pub fn commit_comment(&mut self) {
        let Some(draft) = self.comment_draft.take() else {
            return;
        };
        if draft.trim() != self.prediction.comment().unwrap_or_default() {
            self.prediction.set_comment(&draft);
        }
    }

    pub fn cancel_comment_edit(&mut self) {
        self.comment_draft = None;
    }

    pub fn reload_prediction(&mut self) -> Option<ProviderCommand> {
        let ticket = self.prediction.refetch()?;
        Some(ProviderCommand::LoadPredictions { ticket })
    }

    /// Advances the refresh countdown.
    pub fn tick(&mut self, now: Instant) -> bool {
        self.gate.poll(now)
    }
}

fn wrap_next(current: usize, total: usize) -> usize {
    if total == 0 { 0 } else { (current + 1) % total }
}

fn wrap_prev(current: usize, total: usize) -> usize {
    if total == 0 {
        0
    } else if current == 0 {
        total - 1
    } else {
        current - 1
    }
}

#[derive(Debug, Clone)]
pub enum Delta {
    RacesLoaded {
        date: NaiveDate,
        seq: u64,
        result: Result<Vec<Venue>, ApiError>,
    },
    FetchStatusLoaded {
        ticket: StatusTicket,
        result: Result<FetchStatus, ApiError>,
    },
    RefreshFinished {
        date: NaiveDate,
        result: Result<FetchOutcome, ApiError>,
    },
    PredictionsLoaded {
        ticket: FetchTicket,
        result: Result<PredictionsResponse, ApiError>,
    },
    PredictionSaved {
        ticket: FetchTicket,
        result: Result<(), ApiError>,
    },
    GroupsLoaded(Result<Vec<Group>, ApiError>),
    UserLoaded(Result<Option<User>, ApiError>),
    Log(String),
}

#[derive(Debug, Clone)]
pub enum ProviderCommand {
    LoadUser,
    LoadGroups,
    LoadRaces { date: NaiveDate, seq: u64 },
    LoadFetchStatus { ticket: StatusTicket },
    RefreshRaces { date: NaiveDate, races_seq: u64 },
    LoadPredictions { ticket: FetchTicket },
    SavePrediction { request: SaveRequest },
}

pub fn apply_delta(state: &mut AppState, delta: Delta) {
    apply_delta_at(state, delta, Instant::now());
}

pub fn apply_delta_at(state: &mut AppState, delta: Delta, now: Instant) {
    match delta {
        Delta::RacesLoaded { date, seq, result } => {
            if date != state.date || seq <= state.races_applied {
                return;
            }
            state.races_applied = seq;
            state.races_loading = false;
            match result {
                Ok(venues) => {
                    state.venues = venues;
                    state.races_error = None;
                    let total = state.races().len();
                    if state.selected >= total {
                        state.selected = total.saturating_sub(1);
                    }
                }
                Err(err) => {
                    state.push_log(format!("[WARN] Race list: {err}"));
                    state.races_error = Some(err.user_message());
                }
            }
        }
        Delta::FetchStatusLoaded { ticket, result } => {
            if let Err(err) = &result {
                state.push_log(format!("[WARN] Refresh status unavailable: {err}"));
            }
            state.gate.apply_status(ticket, result, now);
        }
        Delta::RefreshFinished { date, result } => {
            match state.gate.apply_refresh(date, result, now) {
                RefreshOutcome::Refreshed => {
                    // The provider follows up with RacesLoaded.
                    state.push_log("[INFO] Race data refreshed");
                    state.races_error = None;
                    state.races_loading = true;
                }
                RefreshOutcome::Failed(message) => {
                    state.push_log(format!("[WARN] Refresh failed: {message}"));
                    state.races_error = Some(message);
                }
                RefreshOutcome::Ignored => {}
            }
        }
        Delta::PredictionsLoaded { ticket, result } => {
            if let Err(err) = &result {
                state.push_log(format!("[WARN] Predictions: {err}"));
            }
            if !state.prediction.apply_fetch(&ticket, result) {
                state.push_log(format!(
                    "[INFO] Dropped stale predictions for race {}",
                    ticket.scope().race_id
                ));
                return;
            }
            let total = state.prediction.entrants().len();
            if state.entrant_selected >= total {
                state.entrant_selected = total.saturating_sub(1);
            }
        }
        Delta::PredictionSaved { ticket, result } => {
            let ok = result.is_ok();
            if !state.prediction.apply_save(&ticket, result) {
                return;
            }
            if ok {
                state.push_log("[INFO] Prediction saved");
            } else if let Some(err) = state.prediction.error() {
                let line = format!("[WARN] Save failed: {err}");
                state.push_log(line);
            }
        }
        Delta::GroupsLoaded(result) => match result {
            Ok(groups) => {
                if let Some(id) = state.group_id.as_deref()
                    && !groups.iter().any(|g| g.id == id)
                {
                    state.push_log(format!("[WARN] Not a member of group {id}"));
                }
                state.groups = groups;
            }
            Err(err) => state.push_log(format!("[WARN] Groups: {err}")),
        },
        Delta::UserLoaded(result) => match result {
            Ok(Some(user)) => {
                state.push_log(format!("[INFO] Signed in as {}", user.nickname));
                state.user = Some(user);
            }
            Ok(None) => {
                state.push_log("[WARN] Device not registered; run with --register <nickname>");
            }
            Err(err) => state.push_log(format!("[WARN] User: {err}")),
        },
        Delta::Log(msg) => state.push_log(msg),
    }
}
