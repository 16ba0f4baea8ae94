use crate::api::{
    ApiError, Entrant, PredictionRecord, PredictionsResponse, RaceInfo, SavePredictionBody,
};
use crate::marks::{BuyState, EntrantId, MarkCategory, MarkSheet};

/// The (race, optional group) pair a prediction is recorded against.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Scope {
    pub race_id: String,
    pub group_id: Option<String>,
}

impl Scope {
    pub fn new(race_id: impl Into<String>, group_id: Option<String>) -> Self {
        Self {
            race_id: race_id.into(),
            group_id,
        }
    }
}

/// Identifies one issued request. Responses carrying an older ticket, or a
/// ticket for another scope, are discarded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchTicket {
    seq: u64,
    scope: Scope,
}

impl FetchTicket {
    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }
}

#[derive(Debug, Clone)]
pub struct SaveRequest {
    pub ticket: FetchTicket,
    pub body: SavePredictionBody,
}

/// Local mark/buy state for one race scope, reconciled with the server.
#[derive(Debug, Clone, Default)]
pub struct PredictionController {
    scope: Option<Scope>,
    seq: u64,
    race: Option<RaceInfo>,
    entrants: Vec<Entrant>,
    others: Vec<PredictionRecord>,
    sheet: MarkSheet,
    comment: Option<String>,
    dirty: bool,
    loading: bool,
    saving: bool,
    error: Option<String>,
}

impl PredictionController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Switches to `scope` with empty local state. Any response still in
    /// flight for the previous scope becomes stale.
    pub fn open(&mut self, scope: Scope) -> FetchTicket {
        self.scope = Some(scope.clone());
        self.race = None;
        self.entrants.clear();
        self.others.clear();
        self.sheet = MarkSheet::default();
        self.comment = None;
        self.dirty = false;
        self.saving = false;
        self.error = None;
        self.issue_ticket(scope)
    }

    /// New ticket for the current scope. Refused while a save is
    /// outstanding: the save's own refetch confirms it.
    pub fn refetch(&mut self) -> Option<FetchTicket> {
        if self.saving {
            return None;
        }
        let scope = self.scope.clone()?;
        self.error = None;
        Some(self.issue_ticket(scope))
    }

    /// Tears down the scope; late responses are dropped.
    pub fn close(&mut self) {
        *self = Self {
            seq: self.seq + 1,
            ..Self::default()
        };
    }

    fn issue_ticket(&mut self, scope: Scope) -> FetchTicket {
        self.seq += 1;
        self.loading = true;
        FetchTicket {
            seq: self.seq,
            scope,
        }
    }

    pub fn is_current(&self, ticket: &FetchTicket) -> bool {
        ticket.seq == self.seq && self.scope.as_ref() == Some(&ticket.scope)
    }

    /// Applies a fetch result. Returns false when the response was stale.
    pub fn apply_fetch(
        &mut self,
        ticket: &FetchTicket,
        result: Result<PredictionsResponse, ApiError>,
    ) -> bool {
        if !self.is_current(ticket) {
            return false;
        }
        self.loading = false;
        match result {
            Ok(resp) => {
                let mine = resp.mine().cloned();
                self.race = Some(resp.race);
                self.entrants = resp.horses;
                self.others = resp.predictions.into_iter().filter(|p| !p.is_mine).collect();
                self.hydrate(mine.as_ref());
                self.error = None;
            }
            Err(err) => {
                self.error = Some(err.user_message());
            }
        }
        true
    }

    /// Replaces local marks with the server's record, or empties them.
    pub fn hydrate(&mut self, mine: Option<&PredictionRecord>) {
        match mine {
            Some(record) => {
                self.sheet = record.marks.clone().normalized();
                self.comment = record.comment.clone();
            }
            None => {
                self.sheet = MarkSheet::default();
                self.comment = None;
            }
        }
        self.dirty = false;
    }

    pub fn set_mark(&mut self, id: EntrantId, mark: Option<MarkCategory>) {
        self.sheet.set_mark(id, mark);
        self.dirty = true;
    }

    pub fn toggle_buy(&mut self, id: EntrantId) {
        self.sheet.toggle_buy(id);
        self.dirty = true;
    }

    pub fn set_buy(&mut self, id: EntrantId, state: BuyState) {
        self.sheet.set_buy(id, state);
        self.dirty = true;
    }

    pub fn set_comment(&mut self, comment: &str) {
        let trimmed = comment.trim();
        self.comment = (!trimmed.is_empty()).then(|| trimmed.to_string());
        self.dirty = true;
    }

    /// Wire body for a save. Does not touch `dirty`.
    pub fn snapshot_for_save(&self) -> SavePredictionBody {
        SavePredictionBody {
            group_id: self.scope.as_ref().and_then(|s| s.group_id.clone()),
            marks: self.sheet.clone(),
            comment: self.comment.clone(),
        }
    }

    pub fn can_save(&self) -> bool {
        self.scope.is_some() && self.dirty && !self.saving && !self.loading
    }

    /// Starts a save, or returns `None` when saving is not allowed now.
    pub fn begin_save(&mut self) -> Option<SaveRequest> {
        if !self.can_save() {
            return None;
        }
        let scope = self.scope.clone()?;
        self.saving = true;
        self.error = None;
        self.seq += 1;
        let ticket = FetchTicket {
            seq: self.seq,
            scope,
        };
        Some(SaveRequest {
            ticket,
            body: self.snapshot_for_save(),
        })
    }

    /// On success the refetch under the same ticket is expected next; its
    /// `hydrate` clears `dirty`.
    pub fn apply_save(&mut self, ticket: &FetchTicket, result: Result<(), ApiError>) -> bool {
        if !self.is_current(ticket) {
            return false;
        }
        self.saving = false;
        match result {
            Ok(()) => self.loading = true,
            Err(err) => self.error = Some(err.user_message()),
        }
        true
    }

    pub fn mark_of(&self, id: EntrantId) -> Option<MarkCategory> {
        self.sheet.mark_of(id)
    }

    pub fn buy_of(&self, id: EntrantId) -> BuyState {
        self.sheet.buy_of(id)
    }

    pub fn scope(&self) -> Option<&Scope> {
        self.scope.as_ref()
    }

    pub fn race(&self) -> Option<&RaceInfo> {
        self.race.as_ref()
    }

    pub fn entrants(&self) -> &[Entrant] {
        &self.entrants
    }

    pub fn entrant(&self, id: EntrantId) -> Option<&Entrant> {
        self.entrants.iter().find(|e| e.id == id)
    }

    pub fn others(&self) -> &[PredictionRecord] {
        &self.others
    }

    pub fn sheet(&self) -> &MarkSheet {
        &self.sheet
    }

    pub fn comment(&self) -> Option<&str> {
        self.comment.as_deref()
    }

    pub fn dirty(&self) -> bool {
        self.dirty
    }

    pub fn loading(&self) -> bool {
        self.loading
    }

    pub fn saving(&self) -> bool {
        self.saving
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }
}

pub fn mark_of_other(record: &PredictionRecord, id: EntrantId) -> Option<MarkCategory> {
    record.marks.mark_of(id)
}

pub fn buy_of_other(record: &PredictionRecord, id: EntrantId) -> BuyState {
    record.marks.buy_of(id)
}
