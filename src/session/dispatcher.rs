//! Per-message action routing.
//!
//! One dispatcher serves every client session.  A message is decoded,
//! looked up in the flat action match, executed (awaited when it touches
//! the radio or shared game state), and answered with a JSON reply.
//! Game-control actions are answered to *all* live sessions; everything
//! else goes back to the sender only.
//!
//! Ownership-sensitive actions (`move_car`, `send_to_car`,
//! `connect_to_car`, `select_car`, `free_car`) resolve the sender's
//! session id and are refused when the car is held by someone else.

use std::cell::RefCell;
use std::rc::Rc;

use log::{info, warn};
use serde_json::{Value, json};

use crate::ble::coordinator::Coordinator;
use crate::car::{BleAddr, CarId, Move};
use crate::game::GameManager;
use crate::ports::{BleBackend, ClockPort, DelayPort, ShellPort};
use crate::registry::CarRegistry;

use super::drive::{self, DriveJob, DriveQueue};
use super::protocol::{
    self, DecodeError, Request, bool_field, car_id_field, int_field, str_field,
};
use super::{ClientSlot, SessionId, SessionTable};

// ───────────────────────────────────────────────────────────────
// Reply
// ───────────────────────────────────────────────────────────────

/// A handler's answer, tagged with its fan-out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub value: Value,
    /// When set, the reply goes to every live session (sender included).
    pub broadcast: bool,
}

impl Reply {
    pub fn direct(value: Value) -> Self {
        Self {
            value,
            broadcast: false,
        }
    }

    pub fn broadcast(value: Value) -> Self {
        Self {
            value,
            broadcast: true,
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Dispatcher
// ───────────────────────────────────────────────────────────────

pub struct Dispatcher<B, S, D, C> {
    coordinator: Rc<Coordinator<B, S, D>>,
    registry: Rc<RefCell<CarRegistry>>,
    game: Rc<RefCell<GameManager>>,
    sessions: Rc<RefCell<SessionTable>>,
    drive_queue: Rc<DriveQueue>,
    clock: C,
}

impl<B, S, D, C> Dispatcher<B, S, D, C>
where
    B: BleBackend,
    S: ShellPort,
    D: DelayPort,
    C: ClockPort,
{
    pub fn new(
        coordinator: Rc<Coordinator<B, S, D>>,
        registry: Rc<RefCell<CarRegistry>>,
        game: Rc<RefCell<GameManager>>,
        sessions: Rc<RefCell<SessionTable>>,
        drive_queue: Rc<DriveQueue>,
        clock: C,
    ) -> Self {
        Self {
            coordinator,
            registry,
            game,
            sessions,
            drive_queue,
            clock,
        }
    }

    // ── Session lifecycle ─────────────────────────────────────

    /// A client transport was accepted on `slot`.
    pub fn session_opened(&self, slot: ClientSlot) {
        if let Some(id) = self.sessions.borrow_mut().open(slot) {
            info!("new client connection on slot {slot}: {id}");
        }
    }

    /// A client transport closed: release every car it held before the
    /// session id is forgotten.  Queued drive jobs from the session abort
    /// at execution time because the ownership check no longer passes.
    pub fn session_closed(&self, slot: ClientSlot) {
        let Some(id) = self.sessions.borrow_mut().close(slot) else {
            return;
        };
        let freed = self.registry.borrow_mut().free_all_by(id);
        if freed.is_empty() {
            info!("client {id} disconnected");
        } else {
            info!("client {id} disconnected, freed cars {:?}", freed.as_slice());
        }
    }

    fn session_for(&self, slot: ClientSlot) -> SessionId {
        let mut sessions = self.sessions.borrow_mut();
        if let Some(id) = sessions.session(slot) {
            return id;
        }
        warn!("message from slot {slot} before accept notification");
        sessions.open(slot).unwrap_or(SessionId(0))
    }

    // ── Message entry point ───────────────────────────────────

    pub async fn handle(&self, slot: ClientSlot, text: &str) -> Reply {
        let request = match protocol::decode_request(text) {
            Ok(request) => request,
            Err(DecodeError::InvalidJson) => return Reply::direct(protocol::invalid_json()),
            Err(DecodeError::MissingAction) => {
                return Reply::direct(protocol::unknown_action(None));
            }
        };
        let session = self.session_for(slot);
        self.dispatch(session, &request).await
    }

    async fn dispatch(&self, session: SessionId, request: &Request) -> Reply {
        let body = &request.body;
        match request.action.as_str() {
            // ── Fleet queries ─────────────────────────────────
            "get_all_cars" => self.get_all_cars(),
            "get_free_cars" => self.get_free_cars(),
            "get_car_status" => self.get_car_status(body),

            // ── Ownership ─────────────────────────────────────
            "select_car" => self.select_car(session, body),
            "free_car" => self.free_car(session, body),

            // ── Car control ───────────────────────────────────
            "move_car" => self.move_car(session, body),
            "send_to_car" => self.send_to_car(session, body).await,
            "connect_to_car" => self.connect_to_car(session, body).await,
            "set_wifi_credentials" => self.set_wifi_credentials(body).await,

            // ── Phase control ─────────────────────────────────
            "switch_to_scan_phase" => self.switch_to_scan_phase().await,
            "switch_to_control_phase" => self.switch_to_control_phase().await,
            "get_phase_status" => self.get_phase_status().await,

            // ── Game control (broadcast on success) ───────────
            "start_game" => self.start_game(body),
            "stop_game" => self.stop_game(),
            "resume_game" => self.resume_game(),
            "end_game" => self.end_game(),
            "goal_scored" => self.goal_scored(body, true),

            // ── Game queries ──────────────────────────────────
            "get_game_status" => self.get_game_status(),
            "score_goal" => self.goal_scored(body, false),
            "add_car_to_team" => self.add_car_to_team(body),
            "remove_car_from_teams" => self.remove_car_from_teams(body),
            "add_team" => self.add_team(body),

            // ── Bluetooth admin ───────────────────────────────
            "get_bluetooth_status" => self.get_bluetooth_status().await,
            "start_bluetooth_scan" => self.start_bluetooth_scan().await,
            "stop_bluetooth_scan" => self.stop_bluetooth_scan(),
            "pair_bluetooth_device" => self.pair_bluetooth_device(body),

            other => Reply::direct(protocol::unknown_action(Some(other))),
        }
    }

    // ── Shared lookups ────────────────────────────────────────

    fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    /// Resolve the `car` field into an id, or produce the error reply.
    fn require_car_id(&self, body: &Value, action: &str) -> Result<CarId, Reply> {
        match car_id_field(body, "car") {
            Some(id) => Ok(CarId(id)),
            None => Err(Reply::direct(protocol::error_reply(
                action,
                "Car ID is required",
            ))),
        }
    }

    /// Error reply when the car is held by a different session.  Unowned
    /// cars may still be connected or provisioned by anyone.
    fn check_ownership(&self, id: CarId, session: SessionId, action: &str) -> Option<Reply> {
        let registry = self.registry.borrow();
        let car = registry.by_id(id)?;
        match car.owner {
            Some(owner) if owner != session => Some(Reply::direct(protocol::error_reply(
                action,
                format!("Car {id} is controlled by another client. Select the car first."),
            ))),
            _ => None,
        }
    }

    /// Error reply unless the sender holds the car.  Movement requires
    /// ownership: a queued drive job for an unassigned car aborts anyway.
    fn require_owner(&self, id: CarId, session: SessionId, action: &str) -> Option<Reply> {
        let registry = self.registry.borrow();
        let car = registry.by_id(id)?;
        match car.owner {
            Some(owner) if owner == session => None,
            Some(_) => Some(Reply::direct(protocol::error_reply(
                action,
                format!("Car {id} is controlled by another client. Select the car first."),
            ))),
            None => Some(Reply::direct(protocol::error_reply(
                action,
                format!("Car {id} is not selected by this client. Select the car first."),
            ))),
        }
    }

    fn not_found(action: &str, id: CarId) -> Reply {
        Reply::direct(protocol::error_reply(action, format!("Car {id} not found")))
    }

    // ── Fleet queries ─────────────────────────────────────────

    fn get_all_cars(&self) -> Reply {
        let cars = self.registry.borrow().all_status_json();
        let count = cars.len();
        Reply::direct(json!({
            "status": "success",
            "cars": cars,
            "count": count,
        }))
    }

    fn get_free_cars(&self) -> Reply {
        let free = self.registry.borrow().list_free();
        Reply::direct(json!({
            "status": "success",
            "action": "get_free_cars",
            "free_cars": free.as_slice(),
            "message": format!("Found {} available cars", free.len()),
        }))
    }

    fn get_car_status(&self, body: &Value) -> Reply {
        let id = match self.require_car_id(body, "get_car_status") {
            Ok(id) => id,
            Err(reply) => return reply,
        };
        let registry = self.registry.borrow();
        match registry.by_id(id) {
            Some(car) => Reply::direct(json!({
                "status": "success",
                "action": "get_car_status",
                "car_status": car.status_json(),
            })),
            None => Self::not_found("get_car_status", id),
        }
    }

    // ── Ownership ─────────────────────────────────────────────

    fn select_car(&self, session: SessionId, body: &Value) -> Reply {
        let id = match self.require_car_id(body, "select_car") {
            Ok(id) => id,
            Err(reply) => return reply,
        };

        let mut registry = self.registry.borrow_mut();
        let already_owned = registry
            .by_id(id)
            .is_some_and(|car| car.owner == Some(session));
        match registry.select(id, session) {
            Ok(()) => {
                let message = if already_owned {
                    format!("Car {id} is already selected by this client")
                } else {
                    format!("Car {id} successfully selected")
                };
                info!("{session} selected car {id}");
                Reply::direct(json!({
                    "status": "success",
                    "action": "select_car",
                    "car": id,
                    "message": message,
                }))
            }
            Err(e) => Reply::direct(protocol::error_reply("select_car", e.to_string())),
        }
    }

    fn free_car(&self, session: SessionId, body: &Value) -> Reply {
        let id = match self.require_car_id(body, "free_car") {
            Ok(id) => id,
            Err(reply) => return reply,
        };

        let mut registry = self.registry.borrow_mut();
        let was_free = registry.by_id(id).map(|car| car.is_free());
        match registry.free(id, Some(session)) {
            Ok(()) => {
                let message = if was_free == Some(true) {
                    format!("Car {id} is already free")
                } else {
                    format!("Car {id} has been freed")
                };
                Reply::direct(json!({
                    "status": "success",
                    "action": "free_car",
                    "car": id,
                    "message": message,
                }))
            }
            Err(e) => Reply::direct(protocol::error_reply("free_car", e.to_string())),
        }
    }

    // ── Car control ───────────────────────────────────────────

    fn move_car(&self, session: SessionId, body: &Value) -> Reply {
        const ACTION: &str = "move_car";

        let id = match self.require_car_id(body, ACTION) {
            Ok(id) => id,
            Err(reply) => return reply,
        };

        // Steering is validated before anything is touched; ±101 never
        // reaches the radio.
        let x = int_field(body, "x").unwrap_or(0);
        if !(-100..=100).contains(&x) {
            return Reply::direct(protocol::error_reply(
                ACTION,
                format!("Invalid x parameter: {x}. Must be between -100 and 100"),
            ));
        }
        let movement = match str_field(body, "move").map(Move::parse) {
            Some(Some(movement)) => movement,
            _ => {
                return Reply::direct(protocol::error_reply(
                    ACTION,
                    "Invalid move parameter. Must be one of: forward, backward, stopped",
                ));
            }
        };
        let boost = bool_field(body, "boost").unwrap_or(false);

        if let Some(reply) = self.require_owner(id, session, ACTION) {
            return reply;
        }

        // Update the cached state synchronously, then try to queue the
        // radio write.  The reply reports whether the job was queued, not
        // whether it completed.
        let mut registry = self.registry.borrow_mut();
        let Some(car) = registry.by_id_mut(id) else {
            return Self::not_found(ACTION, id);
        };
        car.movement = movement;
        car.x = x as i8;
        car.boost = boost;
        let addr = car.ble_address;
        let car_status = car.status_json();

        let schedulable = self.coordinator.is_in_control_phase();
        let queued = if schedulable {
            let seq = registry.next_drive_seq(id).unwrap_or(0);
            self.drive_queue.schedule(DriveJob {
                session,
                car_id: id,
                addr,
                seq,
                params: drive::translate_move(movement, x as i8, boost),
            })
        } else {
            warn!("cannot queue drive command for car {id}: not in control phase");
            false
        };

        let message = if queued {
            format!("Car {id} command received and executed and Bluetooth drive command initiated")
        } else {
            format!("Car {id} command received and executed")
        };
        Reply::direct(json!({
            "status": "success",
            "action": ACTION,
            "message": message,
            "car_status": car_status,
            "bluetooth_command_sent": queued,
        }))
    }

    async fn send_to_car(&self, session: SessionId, body: &Value) -> Reply {
        const ACTION: &str = "send_to_car";

        let id = match self.require_car_id(body, ACTION) {
            Ok(id) => id,
            Err(reply) => return reply,
        };
        if let Some(reply) = self.check_ownership(id, session, ACTION) {
            return reply;
        }
        let command = str_field(body, "command").unwrap_or("test").to_owned();
        let message = str_field(body, "message")
            .unwrap_or("Hello from server!")
            .to_owned();

        let Some((addr, name)) = self.car_addr_and_name(id) else {
            return Self::not_found(ACTION, id);
        };

        match self.coordinator.send_command(addr, &command, &message).await {
            Ok(()) => {
                let car_status = self
                    .registry
                    .borrow()
                    .by_id(id)
                    .map(|car| car.status_json());
                Reply::direct(json!({
                    "status": "success",
                    "action": ACTION,
                    "message": format!("Command '{command}' sent to car {name}"),
                    "sent_data": {
                        "command": command,
                        "message": message,
                        "car_id": id,
                        "ble_address": addr,
                    },
                    "car": car_status,
                }))
            }
            Err(e) => Reply::direct(protocol::error_reply(
                ACTION,
                format!("Error sending to car: {e}"),
            )),
        }
    }

    async fn connect_to_car(&self, session: SessionId, body: &Value) -> Reply {
        const ACTION: &str = "connect_to_car";

        let id = match self.require_car_id(body, ACTION) {
            Ok(id) => id,
            Err(reply) => return reply,
        };
        if let Some(reply) = self.check_ownership(id, session, ACTION) {
            return reply;
        }
        let Some((addr, name)) = self.car_addr_and_name(id) else {
            return Self::not_found(ACTION, id);
        };

        let already = self
            .registry
            .borrow()
            .by_id(id)
            .is_some_and(|car| car.connected);
        if already {
            let car_status = self.registry.borrow().by_id(id).map(|c| c.status_json());
            return Reply::direct(json!({
                "status": "success",
                "action": ACTION,
                "message": format!("Car {name} is already connected"),
                "car": car_status,
            }));
        }

        match self.coordinator.connect_to_device(addr).await {
            Ok(()) => {
                // Fresh link: pull battery and status into the cache.
                if let Err(e) = self.coordinator.refresh_telemetry(addr).await {
                    warn!("telemetry refresh after connect failed: {e}");
                }
                let car_status = self.registry.borrow().by_id(id).map(|c| c.status_json());
                Reply::direct(json!({
                    "status": "success",
                    "action": ACTION,
                    "message": format!("Successfully connected to car {name}"),
                    "car": car_status,
                }))
            }
            Err(e) => Reply::direct(protocol::error_reply(
                ACTION,
                format!("Failed to connect to car {name}: {e}"),
            )),
        }
    }

    async fn set_wifi_credentials(&self, body: &Value) -> Reply {
        const ACTION: &str = "set_wifi_credentials";

        let id = match self.require_car_id(body, ACTION) {
            Ok(id) => id,
            Err(reply) => return reply,
        };
        let ssid = str_field(body, "ssid").unwrap_or("TestWiFi").to_owned();
        let password = str_field(body, "password")
            .unwrap_or("TestPassword123")
            .to_owned();

        let Some((addr, name)) = self.car_addr_and_name(id) else {
            return Self::not_found(ACTION, id);
        };

        match self.coordinator.set_wifi(addr, &ssid, &password).await {
            Ok(outcome) => {
                let car_status = self.registry.borrow().by_id(id).map(|c| c.status_json());
                let mut reply = json!({
                    "status": "success",
                    "action": ACTION,
                    "message": format!("WiFi credentials set on car {name}"),
                    "wifi_data": {
                        "ssid": ssid,
                        "car_id": id,
                        "ble_address": addr,
                    },
                    "car": car_status,
                });
                if let Some(status) = outcome.status.as_deref() {
                    if !outcome.is_configured() {
                        reply["warning"] = json!(format!("car reported status '{status}'"));
                    }
                }
                Reply::direct(reply)
            }
            Err(e) => Reply::direct(protocol::error_reply(
                ACTION,
                format!("Failed to set WiFi credentials on car {name}: {e}"),
            )),
        }
    }

    fn car_addr_and_name(&self, id: CarId) -> Option<(BleAddr, String)> {
        let registry = self.registry.borrow();
        let car = registry.by_id(id)?;
        Some((car.ble_address, car.name.as_str().to_owned()))
    }

    // ── Phase control ─────────────────────────────────────────

    async fn switch_to_scan_phase(&self) -> Reply {
        let cars = self.coordinator.start_scan_phase(self.now_ms()).await;
        let discovered: Vec<Value> = cars
            .iter()
            .map(|adv| {
                json!({
                    "name": adv.local_name.as_str(),
                    "address": adv.addr,
                    "rssi": adv.rssi,
                })
            })
            .collect();
        Reply::direct(json!({
            "status": "success",
            "action": "switch_to_scan_phase",
            "message": format!("Switched to scan phase. Found {} cars.", discovered.len()),
            "phase": self.coordinator.phase().as_str(),
            "discovered_cars": discovered,
        }))
    }

    async fn switch_to_control_phase(&self) -> Reply {
        self.coordinator.switch_to_control_phase();
        let status = self.coordinator.status_json().await;
        Reply::direct(json!({
            "status": "success",
            "action": "switch_to_control_phase",
            "message": "Switched to control phase. You can now send commands to cars.",
            "phase": "control",
            "discovered_cars": status["devices"],
        }))
    }

    async fn get_phase_status(&self) -> Reply {
        Reply::direct(json!({
            "status": "success",
            "action": "get_phase_status",
            "phase_status": self.coordinator.status_json().await,
        }))
    }

    // ── Game control ──────────────────────────────────────────

    fn start_game(&self, body: &Value) -> Reply {
        let length = int_field(body, "match_length_seconds")
            .and_then(|v| u32::try_from(v).ok())
            .filter(|v| *v > 0);
        let now = self.now_ms();
        let mut game = self.game.borrow_mut();
        game.start_game(length, now);
        info!("game started (length {} s)", game.current().match_length_seconds());
        Reply::broadcast(json!({
            "status": "success",
            "action": "start_game",
            "message": "Game started!",
            "game_status": game.current().snapshot(now),
        }))
    }

    fn stop_game(&self) -> Reply {
        let now = self.now_ms();
        let mut game = self.game.borrow_mut();
        if game.stop_game(now) {
            Reply::broadcast(json!({
                "status": "success",
                "action": "stop_game",
                "message": "Game stopped!",
                "game_status": game.current().snapshot(now),
            }))
        } else {
            Reply::direct(protocol::error_reply("stop_game", "Game is not active"))
        }
    }

    fn resume_game(&self) -> Reply {
        let now = self.now_ms();
        let mut game = self.game.borrow_mut();
        if game.resume_game(now) {
            Reply::broadcast(json!({
                "status": "success",
                "action": "resume_game",
                "message": "Game resumed!",
                "game_status": game.current().snapshot(now),
            }))
        } else {
            Reply::direct(protocol::error_reply(
                "resume_game",
                "Game cannot be resumed",
            ))
        }
    }

    fn end_game(&self) -> Reply {
        let now = self.now_ms();
        let mut game = self.game.borrow_mut();
        game.end_game(now);
        Reply::broadcast(json!({
            "status": "success",
            "action": "end_game",
            "message": "Game ended!",
            "game_status": game.current().snapshot(now),
        }))
    }

    /// Shared by `goal_scored` (broadcast) and `score_goal` (direct).
    fn goal_scored(&self, body: &Value, broadcast: bool) -> Reply {
        let action = if broadcast { "goal_scored" } else { "score_goal" };
        let Some(team) = str_field(body, "team") else {
            return Reply::direct(protocol::error_reply(action, "Team is required"));
        };
        let player = str_field(body, "player_id");
        let car = car_id_field(body, "car_id").map(CarId);

        let now = self.now_ms();
        let mut game = self.game.borrow_mut();
        if game.score_goal(team, player, car, now) {
            let value = json!({
                "status": "success",
                "action": action,
                "message": format!("Goal scored by team {team}!"),
                "game_status": game.current().snapshot(now),
            });
            if broadcast {
                Reply::broadcast(value)
            } else {
                Reply::direct(value)
            }
        } else {
            Reply::direct(protocol::error_reply(
                action,
                format!("Team {team} not found"),
            ))
        }
    }

    // ── Game queries ──────────────────────────────────────────

    fn get_game_status(&self) -> Reply {
        Reply::direct(json!({
            "status": "success",
            "action": "get_game_status",
            "game_status": self.game.borrow().current().snapshot(self.now_ms()),
        }))
    }

    fn add_car_to_team(&self, body: &Value) -> Reply {
        const ACTION: &str = "add_car_to_team";
        let id = match self.require_car_id(body, ACTION) {
            Ok(id) => id,
            Err(reply) => return reply,
        };
        let Some(team) = str_field(body, "team") else {
            return Reply::direct(protocol::error_reply(ACTION, "Team is required"));
        };
        let registry = self.registry.borrow();
        if self.game.borrow_mut().add_car_to_team(id, team, &registry) {
            Reply::direct(json!({
                "status": "success",
                "action": ACTION,
                "message": format!("Car {id} added to team {team}"),
            }))
        } else {
            Reply::direct(protocol::error_reply(
                ACTION,
                format!("Car {id} or team {team} not found"),
            ))
        }
    }

    fn remove_car_from_teams(&self, body: &Value) -> Reply {
        const ACTION: &str = "remove_car_from_teams";
        let id = match self.require_car_id(body, ACTION) {
            Ok(id) => id,
            Err(reply) => return reply,
        };
        self.game
            .borrow_mut()
            .current_mut()
            .remove_car_from_teams(id);
        Reply::direct(json!({
            "status": "success",
            "action": ACTION,
            "message": format!("Car {id} removed from all teams"),
        }))
    }

    fn add_team(&self, body: &Value) -> Reply {
        const ACTION: &str = "add_team";
        let Some(color) = str_field(body, "color") else {
            return Reply::direct(protocol::error_reply(ACTION, "Team color is required"));
        };
        let name = str_field(body, "name");
        if self.game.borrow_mut().current_mut().add_team(color, name) {
            Reply::direct(json!({
                "status": "success",
                "action": ACTION,
                "message": format!("Team {color} added"),
            }))
        } else {
            Reply::direct(protocol::error_reply(ACTION, "Team limit reached"))
        }
    }

    // ── Bluetooth admin ───────────────────────────────────────

    async fn get_bluetooth_status(&self) -> Reply {
        Reply::direct(json!({
            "status": "success",
            "action": "get_bluetooth_status",
            "bluetooth_status": self.coordinator.status_json().await,
        }))
    }

    async fn start_bluetooth_scan(&self) -> Reply {
        self.coordinator.set_auto_discovery(true);
        let cfg_window = self.coordinator.config().discover_scan_ms;
        let cars = self.coordinator.discover_cars(cfg_window, self.now_ms()).await;
        let devices: Vec<Value> = cars
            .iter()
            .map(|adv| {
                json!({
                    "address": adv.addr,
                    "name": adv.local_name.as_str(),
                    "rssi": adv.rssi,
                })
            })
            .collect();
        Reply::direct(json!({
            "status": "success",
            "action": "start_bluetooth_scan",
            "message": "Bluetooth scan completed",
            "discovered_devices": devices,
        }))
    }

    fn stop_bluetooth_scan(&self) -> Reply {
        self.coordinator.set_auto_discovery(false);
        Reply::direct(json!({
            "status": "success",
            "action": "stop_bluetooth_scan",
            "message": "Bluetooth auto-discovery stopped",
        }))
    }

    fn pair_bluetooth_device(&self, body: &Value) -> Reply {
        const ACTION: &str = "pair_bluetooth_device";
        let Some(address) = str_field(body, "address") else {
            return Reply::direct(protocol::error_reply(ACTION, "Device address is required"));
        };
        let Ok(addr) = address.parse::<BleAddr>() else {
            return Reply::direct(protocol::error_reply(
                ACTION,
                format!("Invalid device address: {address}"),
            ));
        };
        if self.coordinator.shell().pair(addr) {
            Reply::direct(json!({
                "status": "success",
                "action": ACTION,
                "message": format!("Successfully paired with {addr}"),
            }))
        } else {
            Reply::direct(protocol::error_reply(
                ACTION,
                format!("Failed to pair with {addr}"),
            ))
        }
    }
}
