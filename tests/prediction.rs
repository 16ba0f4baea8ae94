use std::fs;
use std::path::PathBuf;

use keiba_terminal::api::{ApiError, PredictionsResponse, parse_predictions_json};
use keiba_terminal::marks::{BuyState, EntrantId, MarkCategory};
use keiba_terminal::prediction::{PredictionController, Scope, buy_of_other, mark_of_other};

fn read_fixture(name: &str) -> String {
    let mut path = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    path.push("tests");
    path.push("fixtures");
    path.push(name);
    fs::read_to_string(path).expect("fixture file should be readable")
}

fn tokyo_response() -> PredictionsResponse {
    parse_predictions_json(&read_fixture("predictions.json")).expect("fixture should parse")
}

fn loaded_controller() -> PredictionController {
    let mut pred = PredictionController::new();
    let ticket = pred.open(Scope::new("race-tokyo-11", None));
    assert!(pred.apply_fetch(&ticket, Ok(tokyo_response())));
    pred
}

#[test]
fn fetch_hydrates_mine_and_keeps_others() {
    let pred = loaded_controller();
    assert!(!pred.loading());
    assert!(!pred.dirty());
    assert_eq!(pred.entrants().len(), 5);
    assert_eq!(pred.mark_of(EntrantId(502)), Some(MarkCategory::Primary));
    assert_eq!(pred.mark_of(EntrantId(501)), Some(MarkCategory::Secondary));
    assert_eq!(pred.mark_of(EntrantId(504)), Some(MarkCategory::Contender));
    assert_eq!(pred.buy_of(EntrantId(501)), BuyState::Secondary);
    assert_eq!(pred.comment(), Some("pace looks slow"));

    assert_eq!(pred.others().len(), 1);
    let friend = &pred.others()[0];
    assert_eq!(mark_of_other(friend, EntrantId(504)), Some(MarkCategory::Primary));
    assert_eq!(mark_of_other(friend, EntrantId(502)), Some(MarkCategory::Contender));
    assert_eq!(buy_of_other(friend, EntrantId(504)), BuyState::Primary);
    assert_eq!(buy_of_other(friend, EntrantId(505)), BuyState::None);
}

#[test]
fn fetch_without_mine_starts_empty() {
    let mut resp = tokyo_response();
    resp.predictions.retain(|p| !p.is_mine);

    let mut pred = PredictionController::new();
    let ticket = pred.open(Scope::new("race-tokyo-11", None));
    pred.set_mark(EntrantId(505), Some(MarkCategory::Primary));
    assert!(pred.apply_fetch(&ticket, Ok(resp)));
    assert!(pred.sheet().is_empty());
    assert!(!pred.dirty());
}

#[test]
fn every_mutation_sets_dirty_and_hydrate_clears_it() {
    let mut pred = loaded_controller();

    pred.set_mark(EntrantId(505), Some(MarkCategory::DarkHorse));
    assert!(pred.dirty());
    pred.hydrate(None);
    assert!(!pred.dirty());

    pred.toggle_buy(EntrantId(505));
    assert!(pred.dirty());
    pred.hydrate(None);

    pred.set_buy(EntrantId(505), BuyState::None);
    assert!(pred.dirty());
    pred.hydrate(None);

    pred.set_comment("soft ground");
    assert!(pred.dirty());
}

#[test]
fn snapshot_for_save_does_not_change_dirty() {
    let mut pred = loaded_controller();
    let _ = pred.snapshot_for_save();
    assert!(!pred.dirty());

    pred.set_mark(EntrantId(505), Some(MarkCategory::Primary));
    let body = pred.snapshot_for_save();
    assert!(pred.dirty());
    assert_eq!(body.marks.mark_of(EntrantId(505)), Some(MarkCategory::Primary));
    assert_eq!(body.marks.mark_of(EntrantId(502)), None);
    assert_eq!(body.group_id, None);
}

#[test]
fn save_body_carries_group_scope_and_wire_fields() {
    let mut pred = PredictionController::new();
    let ticket = pred.open(Scope::new("race-tokyo-11", Some("grp-1".to_string())));
    pred.apply_fetch(&ticket, Ok(tokyo_response()));
    pred.toggle_buy(EntrantId(505));

    let value = serde_json::to_value(pred.snapshot_for_save()).expect("serializable");
    assert_eq!(value["groupId"], "grp-1");
    assert_eq!(value["honmei"], 502);
    assert_eq!(value["jiku"], serde_json::json!([502, 505]));
    assert_eq!(value["comment"], "pace looks slow");
}

#[test]
fn stale_fetch_for_previous_race_is_discarded() {
    let mut pred = PredictionController::new();
    let race_x = pred.open(Scope::new("race-x", None));
    let race_y = pred.open(Scope::new("race-tokyo-11", None));

    let mut stale = tokyo_response();
    stale.race.id = "race-x".to_string();
    stale.race.race_name = "Stale".to_string();
    assert!(!pred.apply_fetch(&race_x, Ok(stale)));
    assert!(pred.loading());
    assert!(pred.race().is_none());

    assert!(pred.apply_fetch(&race_y, Ok(tokyo_response())));
    assert_eq!(pred.race().map(|r| r.race_name.as_str()), Some("Autumn Stakes"));
}

#[test]
fn stale_fetch_for_previous_group_is_discarded() {
    let mut pred = PredictionController::new();
    let personal = pred.open(Scope::new("race-tokyo-11", None));
    let grouped = pred.open(Scope::new("race-tokyo-11", Some("grp-1".to_string())));
    assert!(!pred.apply_fetch(&personal, Ok(tokyo_response())));
    assert!(pred.sheet().is_empty());
    assert!(pred.apply_fetch(&grouped, Ok(tokyo_response())));
}

#[test]
fn older_fetch_for_same_scope_is_discarded() {
    let mut pred = loaded_controller();
    let first = pred.refetch().expect("scope is open");
    let second = pred.refetch().expect("scope is open");
    assert!(!pred.apply_fetch(&first, Err(ApiError::Transport("reset".into()))));
    assert!(pred.error().is_none());
    assert!(pred.apply_fetch(&second, Ok(tokyo_response())));
}

#[test]
fn closed_controller_ignores_late_response() {
    let mut pred = PredictionController::new();
    let ticket = pred.open(Scope::new("race-tokyo-11", None));
    pred.close();
    assert!(!pred.apply_fetch(&ticket, Ok(tokyo_response())));
    assert!(pred.scope().is_none());
    assert!(pred.entrants().is_empty());
}

#[test]
fn fetch_failure_keeps_local_marks() {
    let mut pred = loaded_controller();
    pred.set_mark(EntrantId(505), Some(MarkCategory::LongShot));
    let ticket = pred.refetch().expect("scope is open");
    let applied = pred.apply_fetch(
        &ticket,
        Err(ApiError::Rejected {
            status: 403,
            message: "Not a member of this group".to_string(),
        }),
    );
    assert!(applied);
    assert_eq!(pred.error(), Some("Not a member of this group"));
    assert_eq!(pred.mark_of(EntrantId(505)), Some(MarkCategory::LongShot));
    assert!(pred.dirty());
}

#[test]
fn save_is_gated_on_dirty_and_single_flight() {
    let mut pred = loaded_controller();
    assert!(pred.begin_save().is_none());

    pred.set_mark(EntrantId(505), Some(MarkCategory::Primary));
    let request = pred.begin_save().expect("dirty prediction can be saved");
    assert!(pred.saving());
    assert!(pred.begin_save().is_none());
    assert_eq!(request.ticket.scope().race_id, "race-tokyo-11");
    assert_eq!(request.body.marks.mark_of(EntrantId(505)), Some(MarkCategory::Primary));
}

#[test]
fn successful_save_is_confirmed_by_refetch() {
    let mut pred = loaded_controller();
    pred.set_mark(EntrantId(505), Some(MarkCategory::Primary));
    let request = pred.begin_save().expect("dirty prediction can be saved");

    assert!(pred.apply_save(&request.ticket, Ok(())));
    assert!(!pred.saving());
    assert!(pred.dirty());
    assert!(pred.loading());

    let mut confirmed = tokyo_response();
    if let Some(mine) = confirmed.predictions.iter_mut().find(|p| p.is_mine) {
        mine.marks.set_mark(EntrantId(505), Some(MarkCategory::Primary));
    }
    assert!(pred.apply_fetch(&request.ticket, Ok(confirmed)));
    assert!(!pred.dirty());
    assert_eq!(pred.mark_of(EntrantId(505)), Some(MarkCategory::Primary));
    assert_eq!(pred.mark_of(EntrantId(502)), None);
}

#[test]
fn rejected_save_keeps_changes_and_message() {
    let mut pred = loaded_controller();
    pred.toggle_buy(EntrantId(504));
    let request = pred.begin_save().expect("dirty prediction can be saved");
    let err = ApiError::Rejected {
        status: 400,
        message: "Race already started".to_string(),
    };
    assert!(pred.apply_save(&request.ticket, Err(err)));
    assert!(!pred.saving());
    assert!(pred.dirty());
    assert_eq!(pred.error(), Some("Race already started"));
    assert_eq!(pred.buy_of(EntrantId(504)), BuyState::None);
    assert!(pred.begin_save().is_some());
}

#[test]
fn transport_failure_surfaces_generic_message() {
    let mut pred = loaded_controller();
    pred.toggle_buy(EntrantId(504));
    let request = pred.begin_save().expect("dirty prediction can be saved");
    pred.apply_save(&request.ticket, Err(ApiError::Transport("timed out".into())));
    let message = pred.error().expect("error recorded");
    assert!(!message.contains("timed out"));
}

#[test]
fn legacy_record_without_buy_arrays_hydrates() {
    let resp = parse_predictions_json(&read_fixture("predictions_legacy.json"))
        .expect("legacy fixture should parse");
    let mut pred = PredictionController::new();
    let ticket = pred.open(Scope::new("race-kyoto-5", None));
    assert!(pred.apply_fetch(&ticket, Ok(resp)));
    assert_eq!(pred.mark_of(EntrantId(9002)), Some(MarkCategory::Primary));
    assert_eq!(pred.mark_of(EntrantId(9001)), Some(MarkCategory::Contender));
    assert_eq!(pred.buy_of(EntrantId(9001)), BuyState::None);
    assert_eq!(
        mark_of_other(&pred.others()[0], EntrantId(9001)),
        Some(MarkCategory::Primary)
    );
}

#[test]
fn marks_are_keyed_by_identity_not_display_number() {
    let pred = loaded_controller();
    let quiet_harbor = pred.entrant(EntrantId(507)).expect("entrant exists");
    assert_eq!(quiet_harbor.number, 3);
    assert!(quiet_harbor.scratched);
    assert_eq!(pred.mark_of(EntrantId(3)), None);
    assert_eq!(pred.mark_of(EntrantId(507)), None);
}

#[test]
fn reload_during_save_cannot_strand_the_save() {
    let mut pred = loaded_controller();
    pred.set_mark(EntrantId(505), Some(MarkCategory::DarkHorse));
    let request = pred.begin_save().expect("dirty prediction can be saved");

    assert!(pred.refetch().is_none());
    assert!(pred.is_current(&request.ticket));

    let failed = ApiError::Rejected {
        status: 500,
        message: "database busy".to_string(),
    };
    assert!(pred.apply_save(&request.ticket, Err(failed)));
    assert!(!pred.saving());
    assert!(pred.dirty());
    assert!(pred.can_save());

    let reload = pred.refetch().expect("reload allowed once the save settled");
    assert!(pred.apply_fetch(&reload, Ok(tokyo_response())));
    pred.set_mark(EntrantId(505), Some(MarkCategory::DarkHorse));
    assert!(pred.begin_save().is_some());
}

#[test]
fn failed_confirmation_after_save_keeps_dirty() {
    let mut pred = loaded_controller();
    pred.set_mark(EntrantId(505), Some(MarkCategory::Primary));
    let request = pred.begin_save().expect("dirty prediction can be saved");
    pred.apply_save(&request.ticket, Ok(()));

    let applied = pred.apply_fetch(&request.ticket, Err(ApiError::Transport("reset".into())));
    assert!(applied);
    assert!(pred.dirty());
    assert!(!pred.loading());
    assert!(pred.error().is_some());
    assert_eq!(pred.mark_of(EntrantId(505)), Some(MarkCategory::Primary));
    assert!(pred.can_save());
}
