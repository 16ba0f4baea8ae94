use std::time::{Duration, Instant};

use chrono::{DateTime, NaiveDate, Utc};

use crate::api::{ApiError, FetchOutcome, FetchStatus};

/// Cooldown applied locally after a successful refresh.
pub const REFRESH_COOLDOWN_SECS: u64 = 600;
const TICK: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatePhase {
    Ready,
    Cooling,
    InFlight,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// Data was refreshed; the race list should be reloaded.
    Refreshed,
    Failed(String),
    /// Result belonged to another date or no refresh was outstanding.
    Ignored,
}

/// One-second repeating timer. Owned by the gate while it is cooling; a new
/// countdown replaces the old one, dropping it cancels it.
#[derive(Debug, Clone)]
struct Countdown {
    next_tick: Instant,
}

impl Countdown {
    fn start(now: Instant) -> Self {
        Self {
            next_tick: now + TICK,
        }
    }

    /// Number of whole periods elapsed at `now`, capped at `limit`.
    fn take_due(&mut self, now: Instant, limit: u64) -> u64 {
        let mut due = 0;
        while due < limit && now >= self.next_tick {
            due += 1;
            self.next_tick += TICK;
        }
        due
    }
}

/// Issued with each fetch-status load. A status reply only applies while
/// its ticket is current; starting or finishing a refresh, or changing the
/// date, makes earlier tickets stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusTicket {
    date: NaiveDate,
    epoch: u64,
}

impl StatusTicket {
    pub fn date(&self) -> NaiveDate {
        self.date
    }
}

/// Gates the server-side scrape behind its cooldown for one date.
#[derive(Debug, Clone, Default)]
pub struct RefreshGate {
    date: Option<NaiveDate>,
    epoch: u64,
    remaining_seconds: u64,
    last_fetch_time: Option<DateTime<Utc>>,
    in_flight: bool,
    countdown: Option<Countdown>,
}

impl RefreshGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scopes the gate to `date`, back in Ready until its status arrives.
    pub fn open(&mut self, date: NaiveDate) {
        *self = Self {
            date: Some(date),
            epoch: self.epoch + 1,
            ..Self::default()
        };
    }

    pub fn dispose(&mut self) {
        *self = Self {
            epoch: self.epoch + 1,
            ..Self::default()
        };
    }

    /// Ticket for a status load of the current date.
    pub fn status_ticket(&self) -> Option<StatusTicket> {
        Some(StatusTicket {
            date: self.date?,
            epoch: self.epoch,
        })
    }

    pub fn date(&self) -> Option<NaiveDate> {
        self.date
    }

    pub fn phase(&self) -> GatePhase {
        if self.in_flight {
            GatePhase::InFlight
        } else if self.remaining_seconds > 0 {
            GatePhase::Cooling
        } else {
            GatePhase::Ready
        }
    }

    /// Cooldown only; see [`RefreshGate::is_refreshing`] for the in-flight flag.
    pub fn can_refresh(&self) -> bool {
        self.remaining_seconds == 0
    }

    pub fn is_refreshing(&self) -> bool {
        self.in_flight
    }

    pub fn remaining_seconds(&self) -> u64 {
        self.remaining_seconds
    }

    pub fn last_fetch_time(&self) -> Option<DateTime<Utc>> {
        self.last_fetch_time
    }

    pub fn has_timer(&self) -> bool {
        self.countdown.is_some()
    }

    /// Applies the status loaded when the date was opened. Errors are
    /// swallowed; the refresh call itself is the authoritative check.
    /// Returns false when the ticket is stale.
    pub fn apply_status(
        &mut self,
        ticket: StatusTicket,
        result: Result<FetchStatus, ApiError>,
        now: Instant,
    ) -> bool {
        if self.date != Some(ticket.date) || self.epoch != ticket.epoch {
            return false;
        }
        let Ok(status) = result else {
            return true;
        };
        if status.last_fetch_time.is_some() {
            self.last_fetch_time = status.last_fetch_time;
        }
        if status.can_fetch {
            self.enter_ready();
        } else {
            self.enter_cooling(status.wait_seconds(Utc::now()), now);
        }
        true
    }

    /// Starts a refresh if the gate is Ready. Returns the date to refresh.
    pub fn try_begin(&mut self) -> Option<NaiveDate> {
        if self.phase() != GatePhase::Ready {
            return None;
        }
        let date = self.date?;
        self.in_flight = true;
        self.epoch += 1;
        Some(date)
    }

    pub fn apply_refresh(
        &mut self,
        date: NaiveDate,
        result: Result<FetchOutcome, ApiError>,
        now: Instant,
    ) -> RefreshOutcome {
        if self.date != Some(date) || !self.in_flight {
            return RefreshOutcome::Ignored;
        }
        self.in_flight = false;
        self.epoch += 1;
        match result {
            Ok(outcome) => {
                if outcome.fetched_at.is_some() {
                    self.last_fetch_time = outcome.fetched_at;
                }
                self.enter_cooling(REFRESH_COOLDOWN_SECS, now);
                RefreshOutcome::Refreshed
            }
            Err(ApiError::RateLimited { status, message }) => {
                if status.last_fetch_time.is_some() {
                    self.last_fetch_time = status.last_fetch_time;
                }
                self.enter_cooling(status.wait_seconds(Utc::now()), now);
                RefreshOutcome::Failed(message)
            }
            Err(err) => RefreshOutcome::Failed(err.user_message()),
        }
    }

    /// One countdown step.
    pub fn tick(&mut self) {
        if self.remaining_seconds == 0 {
            self.countdown = None;
            return;
        }
        self.remaining_seconds -= 1;
        if self.remaining_seconds == 0 {
            self.enter_ready();
        }
    }

    /// Applies every tick that has come due. Returns true if anything changed.
    pub fn poll(&mut self, now: Instant) -> bool {
        let due = match self.countdown.as_mut() {
            Some(countdown) => countdown.take_due(now, self.remaining_seconds),
            None => return false,
        };
        for _ in 0..due {
            self.tick();
        }
        due > 0
    }

    fn enter_cooling(&mut self, seconds: u64, now: Instant) {
        if seconds == 0 {
            self.enter_ready();
            return;
        }
        self.remaining_seconds = seconds;
        self.countdown = Some(Countdown::start(now));
    }

    fn enter_ready(&mut self) {
        self.remaining_seconds = 0;
        self.countdown = None;
    }
}

/// `m:ss`, as shown on the refresh button.
pub fn format_remaining(seconds: u64) -> String {
    format!("{}:{:02}", seconds / 60, seconds % 60)
}
