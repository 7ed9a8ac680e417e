//! Rocket League IRL gateway — main entry point.
//!
//! Explicitly constructed roots wired on one cooperative executor:
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                      Adapters (outer ring)                     │
//! │                                                                │
//! │  EspBleCentral    NullShell     Uptime/ReactorDelay            │
//! │  (BleBackend)     (ShellPort)   (ClockPort/DelayPort)          │
//! │  TcpTransport     esp_idf_logger                               │
//! │                                                                │
//! │  ──────────────── Port Trait Boundary ───────────────────      │
//! │                                                                │
//! │  ┌────────────────────────────────────────────────────────┐    │
//! │  │   Coordinator · Registry · GameManager · Dispatcher    │    │
//! │  └────────────────────────────────────────────────────────┘    │
//! │                                                                │
//! │  Tasks: io accept/read/write · dispatch · drive · clock · scan │
//! └────────────────────────────────────────────────────────────────┘
//! ```

use std::cell::RefCell;
use std::rc::Rc;

use anyhow::Result;
use core::time::Duration;
use embassy_futures::select::{Either3, select3};
use log::{info, warn};
use serde_json::json;

use rlgateway::adapters::ble_central::EspBleCentral;
use rlgateway::adapters::shell::NullShell;
use rlgateway::adapters::time::{ReactorDelay, Uptime};
use rlgateway::adapters::transport::TcpTransport;
use rlgateway::ble::BleEvent;
use rlgateway::ble::coordinator::Coordinator;
use rlgateway::config::GatewayConfig;
use rlgateway::game::GameManager;
use rlgateway::ports::ClockPort;
use rlgateway::registry::CarRegistry;
use rlgateway::session::channels::{
    CMD_CHANNEL, CONNECT_CHANNEL, DISCONNECT_CHANNEL, OutboundMsg, RESP_CHANNEL,
};
use rlgateway::session::dispatcher::Dispatcher;
use rlgateway::session::drive::{DriveQueue, drive_worker};
use rlgateway::session::{SessionTable, broadcast_json, io};

fn main() -> Result<()> {
    // ── 1. ESP-IDF bootstrap ──────────────────────────────────
    esp_idf_svc::sys::link_patches();
    esp_idf_logger::init()?;

    info!("╔══════════════════════════════════════╗");
    info!("║  RL Gateway v{}                     ║", env!("CARGO_PKG_VERSION"));
    info!("╚══════════════════════════════════════╝");

    let cfg = GatewayConfig::default();

    // ── 2. Adapters ───────────────────────────────────────────
    // The ESP32 has no shell tooling; adapter recovery degrades to plain
    // settle waits around the Bluedroid power cycle.
    let backend = EspBleCentral::new();
    let shell = NullShell;
    let clock = Rc::new(Uptime::new());
    let delay = ReactorDelay::new();
    let transport = TcpTransport::bind(cfg.listen_port)?;

    // ── 3. Domain roots ───────────────────────────────────────
    let registry = Rc::new(RefCell::new(CarRegistry::new()));
    let game = Rc::new(RefCell::new(GameManager::new(cfg.match_length_seconds)));
    let sessions = Rc::new(RefCell::new(SessionTable::new()));
    let drive_queue = Rc::new(DriveQueue::new());
    let coordinator = Rc::new(Coordinator::new(
        backend,
        registry.clone(),
        shell,
        delay,
        cfg.clone(),
    ));
    let dispatcher = Rc::new(Dispatcher::new(
        coordinator.clone(),
        registry.clone(),
        game.clone(),
        sessions.clone(),
        drive_queue.clone(),
        ClockHandle(clock.clone()),
    ));

    // Phase transitions are pushed to every client as they happen.
    {
        let sessions = sessions.clone();
        coordinator.subscribe(move |event| {
            if let BleEvent::PhaseChanged { phase } = event {
                broadcast_json(
                    &sessions.borrow(),
                    &json!({
                        "status": "success",
                        "action": "phase_change",
                        "phase": phase.as_str(),
                        "message": format!("Adapter entered {phase} phase"),
                    }),
                );
            }
        });
    }

    // ── 4. Tasks ──────────────────────────────────────────────
    let executor: edge_executor::LocalExecutor<'_, 8> = edge_executor::LocalExecutor::new();

    let shared_transport = Rc::new(RefCell::new(transport));
    let slots = io::new_slots();
    executor
        .spawn(io::accept_loop(shared_transport.clone(), slots.clone()))
        .detach();
    executor
        .spawn(io::read_loop(shared_transport.clone(), slots.clone()))
        .detach();
    executor
        .spawn(io::write_loop(shared_transport, slots))
        .detach();

    // Dispatch: inbound frames, accepts, disconnects.
    {
        let dispatcher = dispatcher.clone();
        let sessions = sessions.clone();
        executor
            .spawn(async move {
                loop {
                    match select3(
                        CMD_CHANNEL.receive(),
                        CONNECT_CHANNEL.receive(),
                        DISCONNECT_CHANNEL.receive(),
                    )
                    .await
                    {
                        Either3::First(msg) => {
                            let reply = dispatcher.handle(msg.slot, &msg.text).await;
                            if reply.broadcast {
                                broadcast_json(&sessions.borrow(), &reply.value);
                            } else {
                                let out = OutboundMsg {
                                    slot: msg.slot,
                                    text: reply.value.to_string(),
                                };
                                if RESP_CHANNEL.try_send(out).is_err() {
                                    warn!("reply to slot {} dropped: channel full", msg.slot);
                                }
                            }
                        }
                        Either3::Second(connect) => dispatcher.session_opened(connect.slot),
                        Either3::Third(disconnect) => dispatcher.session_closed(disconnect.slot),
                    }
                }
            })
            .detach();
    }

    // Drive worker: drains queued move commands.
    executor
        .spawn(drive_worker(
            drive_queue,
            coordinator.clone(),
            registry.clone(),
        ))
        .detach();

    // Match clock: 1 Hz tick, broadcasts the automatic game end.
    {
        let game = game.clone();
        let sessions = sessions.clone();
        let clock = clock.clone();
        executor
            .spawn(async move {
                loop {
                    async_io_mini::Timer::after(Duration::from_secs(1)).await;
                    let now = clock.now_ms();
                    if game.borrow_mut().check_game_time(now) {
                        info!("match clock expired, game ended");
                        let snapshot = game.borrow().current().snapshot(now);
                        broadcast_json(
                            &sessions.borrow(),
                            &json!({
                                "status": "success",
                                "action": "game_ended",
                                "message": "Game ended: time expired",
                                "game_status": snapshot,
                            }),
                        );
                    }
                }
            })
            .detach();
    }

    // Discovery: one boot-time scan phase, then periodic rediscovery for
    // as long as the adapter sits in the scan phase.
    {
        let coordinator = coordinator.clone();
        let clock = clock.clone();
        executor
            .spawn(async move {
                coordinator.start_scan_phase(clock.now_ms()).await;
                loop {
                    async_io_mini::Timer::after(Duration::from_millis(u64::from(
                        coordinator.config().auto_scan_interval_ms,
                    )))
                    .await;
                    if coordinator.auto_discovery() && coordinator.is_in_scan_phase() {
                        coordinator.start_scan_phase(clock.now_ms()).await;
                    }
                }
            })
            .detach();
    }

    info!("gateway up: {} client slots, BLE adapter arbitrated", rlgateway::session::MAX_CLIENTS);
    futures_lite::future::block_on(executor.run(core::future::pending::<()>()));
    unreachable!("executor never returns");
}

/// `ClockPort` view over the shared uptime counter.
struct ClockHandle(Rc<Uptime>);

impl ClockPort for ClockHandle {
    fn now_ms(&self) -> u64 {
        self.0.now_ms()
    }
}
