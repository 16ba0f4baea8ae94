use std::sync::mpsc::{Receiver, Sender};
use std::thread;

use tracing::{debug, info, warn};

use crate::api::ApiClient;
use crate::state::{Delta, ProviderCommand};

/// Runs commands against the API off the UI thread. Each command gets its
/// own worker, so results may arrive out of order; deltas carry the ticket
/// or date they were issued for.
pub fn spawn_provider(api: ApiClient, tx: Sender<Delta>, cmd_rx: Receiver<ProviderCommand>) {
    thread::spawn(move || {
        info!(base_url = api.base_url(), "provider started");
        while let Ok(cmd) = cmd_rx.recv() {
            let api = api.clone();
            let tx = tx.clone();
            thread::spawn(move || execute(&api, &tx, cmd));
        }
        debug!("provider command channel closed");
    });
}

pub fn execute(api: &ApiClient, tx: &Sender<Delta>, cmd: ProviderCommand) {
    debug!(?cmd, "executing");
    match cmd {
        ProviderCommand::LoadUser => {
            let _ = tx.send(Delta::UserLoaded(api.me()));
        }
        ProviderCommand::LoadGroups => {
            let _ = tx.send(Delta::GroupsLoaded(api.groups()));
        }
        ProviderCommand::LoadRaces { date, seq } => {
            let result = api.fetch_races(date);
            let _ = tx.send(Delta::RacesLoaded { date, seq, result });
        }
        ProviderCommand::LoadFetchStatus { ticket } => {
            let result = api.fetch_status(ticket.date());
            let _ = tx.send(Delta::FetchStatusLoaded { ticket, result });
        }
        ProviderCommand::RefreshRaces { date, races_seq } => {
            let result = api.trigger_fetch(date);
            let refreshed = result.is_ok();
            match &result {
                Err(err) if err.is_rate_limited() => info!(%date, "refresh still cooling down"),
                Err(err) => warn!(%date, error = %err, "refresh rejected"),
                Ok(_) => {}
            }
            let _ = tx.send(Delta::RefreshFinished { date, result });
            if refreshed {
                let result = api.fetch_races(date);
                let _ = tx.send(Delta::RacesLoaded {
                    date,
                    seq: races_seq,
                    result,
                });
            }
        }
        ProviderCommand::LoadPredictions { ticket } => {
            let result = api.fetch_predictions(ticket.scope());
            let _ = tx.send(Delta::PredictionsLoaded { ticket, result });
        }
        ProviderCommand::SavePrediction { request } => {
            let ticket = request.ticket;
            let result = api.save_prediction(&ticket.scope().race_id, &request.body);
            let saved = result.is_ok();
            let _ = tx.send(Delta::PredictionSaved {
                ticket: ticket.clone(),
                result,
            });
            if saved {
                // The server's copy is authoritative after a save.
                let result = api.fetch_predictions(ticket.scope());
                let _ = tx.send(Delta::PredictionsLoaded { ticket, result });
            }
        }
    }
}
