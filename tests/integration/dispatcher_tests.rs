//! Dispatcher tests: the full client-visible behaviour, end to end on the
//! host — two-client contention, drive translation down to the exact GATT
//! writes, phase interplay, game control and the admin actions.

use std::cell::RefCell;
use std::rc::Rc;

use futures_lite::future::block_on;

use rlgateway::ble::coordinator::Coordinator;
use rlgateway::car::CarId;
use rlgateway::config::GatewayConfig;
use rlgateway::game::GameManager;
use rlgateway::gatt::{CHAR_DEVID, CHAR_STATUS};
use rlgateway::registry::CarRegistry;
use rlgateway::session::SessionTable;
use rlgateway::session::dispatcher::{Dispatcher, Reply};
use rlgateway::session::drive::{DriveQueue, JobOutcome, run_drive_job};

use crate::mock_ports::{InstantDelay, ManualClock, MockBleBackend, MockShell, car_adv};

/// MAC whose last four hex digits are 0x8bb5 = 35765.
const MAC: &str = "cc:ba:97:0d:8b:b5";
const CAR: u32 = 35_765;

type TestDispatcher =
    Dispatcher<MockBleBackend, MockShell, InstantDelay, ManualClock>;

struct Rig {
    dispatcher: TestDispatcher,
    coordinator: Rc<Coordinator<MockBleBackend, MockShell, InstantDelay>>,
    registry: Rc<RefCell<CarRegistry>>,
    drive_queue: Rc<DriveQueue>,
    backend: MockBleBackend,
    shell: MockShell,
    clock: ManualClock,
}

impl Rig {
    /// Gateway with one discovered car, in the control phase, and the
    /// given client slots opened.
    fn with_car(slots: &[u8]) -> Self {
        let backend = MockBleBackend::new();
        backend.set_read_default(CHAR_STATUS, b"ok");
        backend.set_read_default(CHAR_DEVID, b"car-8bb5");
        let shell = MockShell::new();
        let clock = ManualClock::new();
        let registry = Rc::new(RefCell::new(CarRegistry::new()));
        let game = Rc::new(RefCell::new(GameManager::new(300)));
        let sessions = Rc::new(RefCell::new(SessionTable::new()));
        let drive_queue = Rc::new(DriveQueue::new());
        let coordinator = Rc::new(Coordinator::new(
            backend.clone(),
            registry.clone(),
            shell.clone(),
            InstantDelay::new(),
            GatewayConfig::default(),
        ));

        backend.push_scan_window(vec![car_adv(MAC, -55)]);
        block_on(coordinator.start_scan_phase(0));
        backend.clear_calls();

        let dispatcher = Dispatcher::new(
            coordinator.clone(),
            registry.clone(),
            game,
            sessions,
            drive_queue.clone(),
            clock.clone(),
        );
        for &slot in slots {
            dispatcher.session_opened(slot);
        }

        Self {
            dispatcher,
            coordinator,
            registry,
            drive_queue,
            backend,
            shell,
            clock,
        }
    }

    fn handle(&self, slot: u8, text: &str) -> Reply {
        block_on(self.dispatcher.handle(slot, text))
    }

    fn run_next_job(&self) -> JobOutcome {
        let job = self.drive_queue.try_next().expect("a queued drive job");
        block_on(run_drive_job(job, &self.coordinator, &self.registry))
    }
}

fn msg(reply: &Reply) -> &str {
    reply.value["message"].as_str().unwrap_or_default()
}

// ── Message framing errors ────────────────────────────────────

#[test]
fn invalid_json_reply() {
    let rig = Rig::with_car(&[0]);
    let reply = rig.handle(0, "this is not json");
    assert_eq!(reply.value["status"], "error");
    assert_eq!(reply.value["message"], "Invalid JSON format");
    assert!(!reply.broadcast);
}

#[test]
fn unknown_action_echoes_action() {
    let rig = Rig::with_car(&[0]);
    let reply = rig.handle(0, r#"{"action":"warp_car","car":1}"#);
    assert_eq!(reply.value["status"], "error");
    assert_eq!(reply.value["message"], "Unknown action");
    assert_eq!(reply.value["action"], "warp_car");

    // A JSON object without an action at all.
    let reply = rig.handle(0, r#"{"car":1}"#);
    assert_eq!(reply.value["message"], "Unknown action");
    assert!(reply.value.get("action").is_none());
}

// ── Fleet queries ─────────────────────────────────────────────

#[test]
fn get_all_cars_lists_snapshot() {
    let rig = Rig::with_car(&[0]);
    let reply = rig.handle(0, r#"{"action":"get_all_cars"}"#);
    assert_eq!(reply.value["status"], "success");
    assert_eq!(reply.value["count"], 1);
    assert_eq!(reply.value["cars"][0]["car"], CAR);
    assert_eq!(reply.value["cars"][0]["ble_address"], MAC);
}

#[test]
fn get_free_cars_reflects_ownership() {
    let rig = Rig::with_car(&[0, 1]);
    let reply = rig.handle(0, r#"{"action":"get_free_cars"}"#);
    assert_eq!(reply.value["free_cars"][0], CAR);

    rig.handle(1, &format!(r#"{{"action":"select_car","car":{CAR}}}"#));
    let reply = rig.handle(0, r#"{"action":"get_free_cars"}"#);
    assert_eq!(reply.value["free_cars"].as_array().unwrap().len(), 0);
    assert_eq!(reply.value["message"], "Found 0 available cars");
}

#[test]
fn get_car_status_known_and_unknown() {
    let rig = Rig::with_car(&[0]);
    let reply = rig.handle(0, &format!(r#"{{"action":"get_car_status","car":{CAR}}}"#));
    assert_eq!(reply.value["car_status"]["car"], CAR);
    assert_eq!(reply.value["car_status"]["move"], "stopped");

    let reply = rig.handle(0, r#"{"action":"get_car_status","car":9999}"#);
    assert_eq!(reply.value["status"], "error");
    assert_eq!(reply.value["message"], "Car 9999 not found");
}

// ── Ownership: two-client contention ──────────────────────────

#[test]
fn two_client_contention_and_release_on_disconnect() {
    let rig = Rig::with_car(&[0, 1]);
    let select = format!(r#"{{"action":"select_car","car":{CAR}}}"#);

    // Session A takes the car.
    let reply = rig.handle(0, &select);
    assert_eq!(reply.value["status"], "success");
    assert_eq!(reply.value["action"], "select_car");
    assert_eq!(reply.value["car"], CAR);

    // Session B is refused.
    let reply = rig.handle(1, &select);
    assert_eq!(reply.value["status"], "error");
    assert!(msg(&reply).contains("already selected by another client"));

    // A's socket closes; its cars are released before the id is dropped.
    rig.dispatcher.session_closed(0);

    // B retries and wins.
    let reply = rig.handle(1, &select);
    assert_eq!(reply.value["status"], "success");
    assert_eq!(reply.value["car"], CAR);
}

#[test]
fn select_is_idempotent_for_the_holder() {
    let rig = Rig::with_car(&[0]);
    let select = format!(r#"{{"action":"select_car","car":{CAR}}}"#);
    rig.handle(0, &select);
    let reply = rig.handle(0, &select);
    assert_eq!(reply.value["status"], "success");
    assert!(msg(&reply).contains("already selected by this client"));
}

#[test]
fn select_requires_car_id() {
    let rig = Rig::with_car(&[0]);
    let reply = rig.handle(0, r#"{"action":"select_car"}"#);
    assert_eq!(reply.value["status"], "error");
    assert_eq!(reply.value["message"], "Car ID is required");
}

#[test]
fn free_car_is_idempotent_and_owner_checked() {
    let rig = Rig::with_car(&[0, 1]);
    let free = format!(r#"{{"action":"free_car","car":{CAR}}}"#);

    // Freeing an already-free car succeeds.
    let reply = rig.handle(0, &free);
    assert_eq!(reply.value["status"], "success");
    assert!(msg(&reply).contains("already free"));

    rig.handle(0, &format!(r#"{{"action":"select_car","car":{CAR}}}"#));

    // Another session cannot free it.
    let reply = rig.handle(1, &free);
    assert_eq!(reply.value["status"], "error");
    assert!(msg(&reply).contains("not selected by this client"));

    // The owner can.
    let reply = rig.handle(0, &free);
    assert_eq!(reply.value["status"], "success");
    assert!(msg(&reply).contains("has been freed"));
}

// ── move_car ──────────────────────────────────────────────────

#[test]
fn move_car_translates_and_writes_in_order() {
    let rig = Rig::with_car(&[0]);
    rig.handle(0, &format!(r#"{{"action":"select_car","car":{CAR}}}"#));

    let reply = rig.handle(
        0,
        &format!(r#"{{"action":"move_car","car":{CAR},"move":"forward","x":-30,"boost":true}}"#),
    );
    assert_eq!(reply.value["status"], "success");
    assert_eq!(reply.value["bluetooth_command_sent"], true);
    // Cached state updated synchronously, before any BLE completion.
    assert_eq!(reply.value["car_status"]["move"], "forward");
    assert_eq!(reply.value["car_status"]["x"], -30);
    assert_eq!(reply.value["car_status"]["boost"], true);

    // The queued job performs the actual GATT writes, connecting first.
    rig.backend.push_scan_window(vec![car_adv(MAC, -48)]);
    assert_eq!(rig.run_next_job(), JobOutcome::Sent);
    let writes = rig.backend.writes();
    assert_eq!(
        writes,
        vec![
            (rlgateway::gatt::CHAR_DIR_X, vec![0xE2]), // -30
            (rlgateway::gatt::CHAR_DIR_Y, vec![50]),
            (rlgateway::gatt::CHAR_DIR_SPEED, vec![100]),
            (rlgateway::gatt::CHAR_DECAY_MODE, vec![1]),
        ]
    );
}

#[test]
fn move_car_boost_variants() {
    let rig = Rig::with_car(&[0]);
    rig.handle(0, &format!(r#"{{"action":"select_car","car":{CAR}}}"#));
    let reply = rig.handle(
        0,
        &format!(r#"{{"action":"move_car","car":{CAR},"move":"stopped","x":0,"boost":"true"}}"#),
    );
    assert_eq!(reply.value["status"], "success");
    rig.backend.push_scan_window(vec![car_adv(MAC, -48)]);
    assert_eq!(rig.run_next_job(), JobOutcome::Sent);
    let writes = rig.backend.writes();
    // stopped + boost: y=0, speed=100, decay=1
    assert_eq!(writes[1].1, vec![0]);
    assert_eq!(writes[2].1, vec![100]);
    assert_eq!(writes[3].1, vec![1]);
}

#[test]
fn move_car_requires_ownership() {
    let rig = Rig::with_car(&[0]);
    let reply = rig.handle(
        0,
        &format!(r#"{{"action":"move_car","car":{CAR},"move":"forward","x":0}}"#),
    );
    assert_eq!(reply.value["status"], "error");
    assert!(msg(&reply).contains("not selected by this client"));
    assert!(rig.drive_queue.try_next().is_none());
}

#[test]
fn move_car_rejects_out_of_range_steering() {
    let rig = Rig::with_car(&[0]);
    rig.handle(0, &format!(r#"{{"action":"select_car","car":{CAR}}}"#));
    for x in [101, -101] {
        let reply = rig.handle(
            0,
            &format!(r#"{{"action":"move_car","car":{CAR},"move":"forward","x":{x}}}"#),
        );
        assert_eq!(reply.value["status"], "error");
        assert!(msg(&reply).contains("Must be between -100 and 100"));
    }
    // Nothing was queued, nothing was written.
    assert!(rig.drive_queue.try_next().is_none());
    assert!(rig.backend.writes().is_empty());
}

#[test]
fn move_car_boundary_steering_passes_through() {
    let rig = Rig::with_car(&[0]);
    rig.handle(0, &format!(r#"{{"action":"select_car","car":{CAR}}}"#));
    for x in [100, -100] {
        let reply = rig.handle(
            0,
            &format!(r#"{{"action":"move_car","car":{CAR},"move":"forward","x":{x}}}"#),
        );
        assert_eq!(reply.value["status"], "success");
    }
}

#[test]
fn move_car_owned_by_other_session_is_refused() {
    let rig = Rig::with_car(&[0, 1]);
    rig.handle(1, &format!(r#"{{"action":"select_car","car":{CAR}}}"#));

    let reply = rig.handle(
        0,
        &format!(r#"{{"action":"move_car","car":{CAR},"move":"forward","x":0}}"#),
    );
    assert_eq!(reply.value["status"], "error");
    assert!(msg(&reply).contains("controlled by another client"));
    assert!(rig.drive_queue.try_next().is_none());
}

#[test]
fn move_car_in_scan_phase_updates_state_without_radio() {
    let rig = Rig::with_car(&[0]);
    rig.handle(0, &format!(r#"{{"action":"select_car","car":{CAR}}}"#));
    rig.coordinator.switch_to_scan_phase();

    let reply = rig.handle(
        0,
        &format!(r#"{{"action":"move_car","car":{CAR},"move":"forward","x":10}}"#),
    );
    // The cached state update succeeds; only the radio part is skipped.
    assert_eq!(reply.value["status"], "success");
    assert_eq!(reply.value["bluetooth_command_sent"], false);
    assert_eq!(reply.value["car_status"]["move"], "forward");
    assert!(rig.drive_queue.try_next().is_none());
}

#[test]
fn move_car_rejects_unknown_move() {
    let rig = Rig::with_car(&[0]);
    let reply = rig.handle(
        0,
        &format!(r#"{{"action":"move_car","car":{CAR},"move":"sideways","x":0}}"#),
    );
    assert_eq!(reply.value["status"], "error");
}

#[test]
fn newer_move_supersedes_queued_one() {
    let rig = Rig::with_car(&[0]);
    rig.handle(0, &format!(r#"{{"action":"select_car","car":{CAR}}}"#));
    let forward =
        format!(r#"{{"action":"move_car","car":{CAR},"move":"forward","x":0,"boost":false}}"#);
    let stop = format!(r#"{{"action":"move_car","car":{CAR},"move":"stopped","x":0}}"#);
    rig.handle(0, &forward);
    rig.handle(0, &stop);

    rig.backend.push_scan_window(vec![car_adv(MAC, -48)]);
    // The older job is dropped without touching the radio…
    assert_eq!(rig.run_next_job(), JobOutcome::Superseded);
    assert!(rig.backend.writes().is_empty());
    // …and the newer one goes through.
    assert_eq!(rig.run_next_job(), JobOutcome::Sent);
    assert_eq!(rig.backend.writes().len(), 4);
}

#[test]
fn session_end_aborts_pending_jobs() {
    let rig = Rig::with_car(&[0]);
    rig.handle(0, &format!(r#"{{"action":"select_car","car":{CAR}}}"#));
    rig.handle(
        0,
        &format!(r#"{{"action":"move_car","car":{CAR},"move":"forward","x":0}}"#),
    );

    rig.dispatcher.session_closed(0);

    assert_eq!(rig.run_next_job(), JobOutcome::Orphaned);
    assert!(rig.backend.writes().is_empty());
    // The car is free again for the next client.
    assert_eq!(rig.registry.borrow().list_free().as_slice(), &[CarId(CAR)]);
}

// ── Wi-Fi provisioning ────────────────────────────────────────

#[test]
fn set_wifi_credentials_success_and_warning() {
    let rig = Rig::with_car(&[0]);
    rig.backend.push_scan_window(vec![car_adv(MAC, -48)]);
    block_on(rig.coordinator.connect_to_device(MAC.parse().unwrap())).unwrap();

    rig.backend.push_read(CHAR_STATUS, Ok(b"configured"));
    let reply = rig.handle(
        0,
        &format!(
            r#"{{"action":"set_wifi_credentials","car":{CAR},"ssid":"TestWiFi","password":"TestPassword123"}}"#
        ),
    );
    assert_eq!(reply.value["status"], "success");
    assert_eq!(reply.value["wifi_data"]["ssid"], "TestWiFi");
    assert!(reply.value.get("warning").is_none());

    rig.backend.push_read(CHAR_STATUS, Ok(b"wifi_error"));
    let reply = rig.handle(
        0,
        &format!(r#"{{"action":"set_wifi_credentials","car":{CAR}}}"#),
    );
    assert_eq!(reply.value["status"], "success");
    assert!(
        reply.value["warning"]
            .as_str()
            .unwrap()
            .contains("wifi_error")
    );
}

// ── connect_to_car / send_to_car ──────────────────────────────

#[test]
fn connect_to_car_reports_connection() {
    let rig = Rig::with_car(&[0]);
    rig.backend.push_scan_window(vec![car_adv(MAC, -48)]);

    let reply = rig.handle(0, &format!(r#"{{"action":"connect_to_car","car":{CAR}}}"#));
    assert_eq!(reply.value["status"], "success");
    assert!(msg(&reply).contains("Successfully connected"));
    assert_eq!(reply.value["car"]["connected"], true);

    // Second request short-circuits on the open link.
    let reply = rig.handle(0, &format!(r#"{{"action":"connect_to_car","car":{CAR}}}"#));
    assert!(msg(&reply).contains("already connected"));
}

#[test]
fn connect_to_car_in_scan_phase_fails() {
    let rig = Rig::with_car(&[0]);
    rig.coordinator.switch_to_scan_phase();
    let reply = rig.handle(0, &format!(r#"{{"action":"connect_to_car","car":{CAR}}}"#));
    assert_eq!(reply.value["status"], "error");
    assert!(msg(&reply).contains("scan phase"));
}

#[test]
fn send_to_car_passthrough() {
    let rig = Rig::with_car(&[0]);
    rig.backend.push_scan_window(vec![car_adv(MAC, -48)]);

    let reply = rig.handle(
        0,
        &format!(r#"{{"action":"send_to_car","car":{CAR},"command":"ping","message":"hello"}}"#),
    );
    assert_eq!(reply.value["status"], "success");
    assert_eq!(reply.value["sent_data"]["command"], "ping");
    // The passthrough frame is written as "<command>:<message>".
    let writes = rig.backend.writes();
    assert_eq!(
        writes.last().unwrap().1,
        b"ping:hello".to_vec()
    );
}

// ── Phase actions ─────────────────────────────────────────────

#[test]
fn phase_actions_roundtrip() {
    let rig = Rig::with_car(&[0]);

    let reply = rig.handle(0, r#"{"action":"get_phase_status"}"#);
    assert_eq!(reply.value["phase_status"]["current_phase"], "control");

    // A scan that finds nothing leaves the adapter in the scan phase.
    let reply = rig.handle(0, r#"{"action":"switch_to_scan_phase"}"#);
    assert_eq!(reply.value["phase"], "scan");
    assert_eq!(reply.value["discovered_cars"].as_array().unwrap().len(), 0);

    let reply = rig.handle(0, r#"{"action":"switch_to_control_phase"}"#);
    assert_eq!(reply.value["phase"], "control");
    assert!(rig.coordinator.is_in_control_phase());

    // A scan that finds the car flips straight back to control.
    rig.backend.push_scan_window(vec![car_adv(MAC, -60)]);
    let reply = rig.handle(0, r#"{"action":"switch_to_scan_phase"}"#);
    assert_eq!(reply.value["phase"], "control");
    assert_eq!(reply.value["discovered_cars"].as_array().unwrap().len(), 1);
}

// ── Game actions ──────────────────────────────────────────────

#[test]
fn game_control_actions_broadcast() {
    let rig = Rig::with_car(&[0, 1, 2]);

    let reply = rig.handle(0, r#"{"action":"start_game","match_length_seconds":120}"#);
    assert!(reply.broadcast);
    assert_eq!(reply.value["message"], "Game started!");
    assert_eq!(reply.value["game_status"]["state"], "active");
    assert_eq!(reply.value["game_status"]["time_remaining"], 120);

    rig.clock.advance_secs(30);
    let reply = rig.handle(1, r#"{"action":"stop_game"}"#);
    assert!(reply.broadcast);
    assert_eq!(reply.value["game_status"]["state"], "paused");
    assert_eq!(reply.value["game_status"]["time_remaining"], 90);

    let reply = rig.handle(2, r#"{"action":"resume_game"}"#);
    assert!(reply.broadcast);
    assert_eq!(reply.value["game_status"]["state"], "active");

    let reply = rig.handle(0, r#"{"action":"end_game"}"#);
    assert!(reply.broadcast);
    assert_eq!(reply.value["game_status"]["state"], "ended");

    // Restarting yields a fresh game: zeroed goals, full clock.
    let reply = rig.handle(0, r#"{"action":"start_game"}"#);
    assert!(reply.broadcast);
    assert_eq!(reply.value["game_status"]["time_remaining"], 120);
    assert_eq!(
        reply.value["game_status"]["teams"]["red"]["score"],
        0
    );
}

#[test]
fn game_control_failures_do_not_broadcast() {
    let rig = Rig::with_car(&[0]);
    let reply = rig.handle(0, r#"{"action":"stop_game"}"#);
    assert_eq!(reply.value["status"], "error");
    assert!(!reply.broadcast);

    let reply = rig.handle(0, r#"{"action":"resume_game"}"#);
    assert_eq!(reply.value["status"], "error");
    assert!(!reply.broadcast);
}

#[test]
fn goals_and_teams() {
    let rig = Rig::with_car(&[0]);
    rig.handle(0, r#"{"action":"start_game"}"#);

    let reply = rig.handle(
        0,
        &format!(r#"{{"action":"goal_scored","team":"red","car_id":{CAR}}}"#),
    );
    assert!(reply.broadcast);
    assert_eq!(
        reply.value["game_status"]["teams"]["red"]["score"],
        1
    );

    // score_goal mutates identically but answers only the caller.
    let reply = rig.handle(0, r#"{"action":"score_goal","team":"blue"}"#);
    assert!(!reply.broadcast);
    assert_eq!(
        reply.value["game_status"]["teams"]["blue"]["score"],
        1
    );

    let reply = rig.handle(0, r#"{"action":"goal_scored","team":"green"}"#);
    assert_eq!(reply.value["status"], "error");
    assert!(!reply.broadcast);

    let reply = rig.handle(0, r#"{"action":"add_team","color":"green","name":"Goblins"}"#);
    assert_eq!(reply.value["status"], "success");

    let reply = rig.handle(
        0,
        &format!(r#"{{"action":"add_car_to_team","car":{CAR},"team":"green"}}"#),
    );
    assert_eq!(reply.value["status"], "success");

    // Unknown cars cannot join teams.
    let reply = rig.handle(0, r#"{"action":"add_car_to_team","car":9999,"team":"green"}"#);
    assert_eq!(reply.value["status"], "error");

    let reply = rig.handle(
        0,
        &format!(r#"{{"action":"remove_car_from_teams","car":{CAR}}}"#),
    );
    assert_eq!(reply.value["status"], "success");

    let reply = rig.handle(0, r#"{"action":"get_game_status"}"#);
    let teams = &reply.value["game_status"]["teams"];
    assert_eq!(teams["green"]["car_ids"].as_array().unwrap().len(), 0);
}

// ── Bluetooth admin ───────────────────────────────────────────

#[test]
fn bluetooth_admin_actions() {
    let rig = Rig::with_car(&[0]);

    let reply = rig.handle(0, r#"{"action":"get_bluetooth_status"}"#);
    assert_eq!(reply.value["bluetooth_status"]["total_discovered"], 1);

    rig.backend.push_scan_window(vec![car_adv(MAC, -44)]);
    let reply = rig.handle(0, r#"{"action":"start_bluetooth_scan"}"#);
    assert_eq!(reply.value["status"], "success");
    assert_eq!(
        reply.value["discovered_devices"][0]["address"],
        MAC
    );
    assert!(rig.coordinator.auto_discovery());

    let reply = rig.handle(0, r#"{"action":"stop_bluetooth_scan"}"#);
    assert_eq!(reply.value["status"], "success");
    assert!(!rig.coordinator.auto_discovery());

    let reply = rig.handle(
        0,
        &format!(r#"{{"action":"pair_bluetooth_device","address":"{MAC}"}}"#),
    );
    assert_eq!(reply.value["status"], "success");
    assert!(rig.shell.calls().iter().any(|c| c.starts_with("pair")));

    let reply = rig.handle(0, r#"{"action":"pair_bluetooth_device"}"#);
    assert_eq!(reply.value["message"], "Device address is required");
}
