//! Device-session tests: connect retry ladder, adaptive backoff, ordered
//! drive writes, and the Wi-Fi provisioning sequence.
//!
//! These run on the host against recording mocks; no radio involved.

use futures_lite::future::block_on;

use rlgateway::ble::device::{DeviceSession, LinkState, WifiOutcome};
use rlgateway::car::BleAddr;
use rlgateway::config::GatewayConfig;
use rlgateway::error::{DriveAxis, LinkError};
use rlgateway::gatt::{
    CHAR_APPLY, CHAR_DECAY_MODE, CHAR_DEVID, CHAR_DIR_SPEED, CHAR_DIR_X, CHAR_DIR_Y, CHAR_PASS,
    CHAR_SSID, CHAR_STATUS,
};

use crate::mock_ports::{BackendCall, InstantDelay, MockBleBackend, MockShell};

const MAC: &str = "cc:ba:97:0d:8c:b5";

fn addr() -> BleAddr {
    MAC.parse().unwrap()
}

fn session() -> DeviceSession {
    DeviceSession::new(addr(), "RL-CAR-cc:ba:97:0d:8c:b5")
}

fn healthy_backend() -> MockBleBackend {
    let backend = MockBleBackend::new();
    backend.set_read_default(CHAR_STATUS, b"ok");
    backend.set_read_default(CHAR_DEVID, b"car-8cb5");
    backend
}

// ── Connect ───────────────────────────────────────────────────

#[test]
fn connect_succeeds_and_probes_identity() {
    let backend = healthy_backend();
    let shell = MockShell::new();
    let delay = InstantDelay::new();
    let cfg = GatewayConfig::default();
    let mut session = session();

    block_on(async {
        session
            .connect(3, &mut backend.clone(), &shell, &delay, &cfg)
            .await
            .unwrap();
    });

    assert_eq!(session.state(), LinkState::Connected);
    assert_eq!(session.device_id.as_deref(), Some("car-8cb5"));
    // Exactly one connect, bounded by the per-attempt timeout.
    let connects: Vec<_> = backend
        .calls()
        .into_iter()
        .filter(|c| matches!(c, BackendCall::Connect { .. }))
        .collect();
    assert_eq!(
        connects,
        vec![BackendCall::Connect {
            addr: addr(),
            timeout_ms: cfg.connect_attempt_timeout_ms,
        }]
    );
}

#[test]
fn connect_backoff_follows_error_class_table() {
    let backend = healthy_backend();
    backend.push_connect_result(Err("org.bluez.Error.InProgress"));
    backend.push_connect_result(Err("Connection timeout"));
    backend.push_connect_result(Ok(()));
    let shell = MockShell::new();
    let delay = InstantDelay::new();
    let cfg = GatewayConfig::default();
    let mut session = session();

    block_on(async {
        session
            .connect(3, &mut backend.clone(), &shell, &delay, &cfg)
            .await
            .unwrap();
    });

    // attempt 1 fails InProgress → 3000 + 1·500
    // attempt 2: 500 settle, fails timeout → 1500 + 2·500
    // attempt 3: 500 settle, succeeds → 500 stabilisation
    assert_eq!(delay.recorded(), vec![3_500, 500, 2_500, 500, 500]);
    assert_eq!(backend.connect_attempts(), 3);
}

#[test]
fn connect_abort_class_triggers_stale_link_clear() {
    let backend = healthy_backend();
    backend.push_connect_result(Err("Software caused connection abort"));
    backend.push_connect_result(Ok(()));
    let shell = MockShell::new();
    shell.set_active_links(&[addr()]);
    let delay = InstantDelay::new();
    let cfg = GatewayConfig::default();
    let mut session = session();

    block_on(async {
        session
            .connect(2, &mut backend.clone(), &shell, &delay, &cfg)
            .await
            .unwrap();
    });

    // Once up front, once after the aborted attempt.
    let disconnects = shell
        .calls()
        .into_iter()
        .filter(|c| c.starts_with("disconnect"))
        .count();
    assert_eq!(disconnects, 2);
    assert_eq!(session.state(), LinkState::Connected);
}

#[test]
fn connect_exhausts_retries() {
    let backend = healthy_backend();
    for _ in 0..3 {
        backend.push_connect_result(Err("le-connection-abort-by-local"));
    }
    let shell = MockShell::new();
    let delay = InstantDelay::new();
    let cfg = GatewayConfig::default();
    let mut session = session();

    let err = block_on(async {
        session
            .connect(3, &mut backend.clone(), &shell, &delay, &cfg)
            .await
            .unwrap_err()
    });

    assert_eq!(err.attempts, 3);
    assert_eq!(session.state(), LinkState::Idle);
    assert_eq!(backend.connect_attempts(), 3);
}

#[test]
fn disconnect_is_idempotent() {
    let backend = healthy_backend();
    let shell = MockShell::new();
    let delay = InstantDelay::new();
    let cfg = GatewayConfig::default();
    let mut session = session();

    block_on(async {
        session
            .connect(1, &mut backend.clone(), &shell, &delay, &cfg)
            .await
            .unwrap();
        session.disconnect(&mut backend.clone(), &shell, &delay).await;
        assert_eq!(session.state(), LinkState::Idle);

        backend.clear_calls();
        session.disconnect(&mut backend.clone(), &shell, &delay).await;
    });

    // Second disconnect touched nothing.
    assert!(backend.calls().is_empty());
}

#[test]
fn health_check_uses_short_timeout() {
    let backend = healthy_backend();
    let shell = MockShell::new();
    let delay = InstantDelay::new();
    let cfg = GatewayConfig::default();
    let mut session = session();

    block_on(async {
        session
            .connect(1, &mut backend.clone(), &shell, &delay, &cfg)
            .await
            .unwrap();
        backend.clear_calls();
        assert!(session.is_healthy(&mut backend.clone(), &cfg).await);
        backend.push_read(CHAR_STATUS, Err("timeout"));
        assert!(!session.is_healthy(&mut backend.clone(), &cfg).await);
    });

    let reads: Vec<_> = backend.calls();
    assert!(reads.iter().all(|c| matches!(
        c,
        BackendCall::Read {
            characteristic: CHAR_STATUS,
            timeout_ms: 3_000,
            ..
        }
    )));
}

#[test]
fn disconnect_stops_notifications() {
    let backend = healthy_backend();
    let shell = MockShell::new();
    let delay = InstantDelay::new();
    let mut session = connected_session(&backend);

    block_on(session.enable_status_notify(&mut backend.clone())).unwrap();
    block_on(session.disconnect(&mut backend.clone(), &shell, &delay));

    let calls = backend.calls();
    let sub = calls
        .iter()
        .position(|c| matches!(c, BackendCall::Subscribe(CHAR_STATUS)));
    let unsub = calls
        .iter()
        .position(|c| matches!(c, BackendCall::Unsubscribe(CHAR_STATUS)));
    assert!(sub.is_some());
    assert!(unsub.is_some());
    assert!(sub < unsub);
}

#[test]
fn reads_require_connection() {
    let backend = healthy_backend();
    let cfg = GatewayConfig::default();
    let mut session = session();

    let err = block_on(session.read_battery(&mut backend.clone(), &cfg)).unwrap_err();
    assert_eq!(err, LinkError::NotConnected);
    assert!(backend.calls().is_empty());
}

// ── Drive ─────────────────────────────────────────────────────

fn connected_session(backend: &MockBleBackend) -> DeviceSession {
    let shell = MockShell::new();
    let delay = InstantDelay::new();
    let cfg = GatewayConfig::default();
    let mut session = session();
    block_on(session.connect(1, &mut backend.clone(), &shell, &delay, &cfg)).unwrap();
    backend.clear_calls();
    session
}

#[test]
fn set_drive_writes_axes_in_fixed_order() {
    let backend = healthy_backend();
    let mut session = connected_session(&backend);

    block_on(session.set_drive(-30, 50, 100, 1, &mut backend.clone())).unwrap();

    assert_eq!(
        backend.writes(),
        vec![
            (CHAR_DIR_X, vec![0xE2]), // -30 two's complement
            (CHAR_DIR_Y, vec![50]),
            (CHAR_DIR_SPEED, vec![100]),
            (CHAR_DECAY_MODE, vec![1]),
        ]
    );
}

#[test]
fn set_drive_clamps_to_firmware_domains() {
    let backend = healthy_backend();
    let mut session = connected_session(&backend);

    block_on(session.set_drive(250, -250, 180, 7, &mut backend.clone())).unwrap();

    assert_eq!(
        backend.writes(),
        vec![
            (CHAR_DIR_X, vec![100]),
            (CHAR_DIR_Y, vec![0x9C]), // -100
            (CHAR_DIR_SPEED, vec![100]),
            (CHAR_DECAY_MODE, vec![1]),
        ]
    );
}

#[test]
fn set_drive_partial_failure_names_first_failed_axis() {
    let backend = healthy_backend();
    let mut session = connected_session(&backend);
    backend.fail_writes(CHAR_DIR_SPEED, "write failed");

    let err = block_on(session.set_drive(0, 50, 50, 0, &mut backend.clone())).unwrap_err();

    assert_eq!(err.axis, DriveAxis::Speed);
    assert_eq!(err.axis.index(), 2);
    // X and Y were written and are not rolled back.
    let writes = backend.writes();
    assert_eq!(writes.len(), 3);
    assert_eq!(writes[0].0, CHAR_DIR_X);
    assert_eq!(writes[1].0, CHAR_DIR_Y);
    assert_eq!(writes[2].0, CHAR_DIR_SPEED);
}

#[test]
fn transport_error_drops_the_link() {
    let backend = healthy_backend();
    let mut session = connected_session(&backend);
    backend.fail_writes(CHAR_DIR_X, "Software caused connection abort");

    let err = block_on(session.set_drive(1, 0, 0, 0, &mut backend.clone())).unwrap_err();
    assert_eq!(err.axis, DriveAxis::X);
    assert_eq!(session.state(), LinkState::Idle);
}

// ── Wi-Fi provisioning ────────────────────────────────────────

#[test]
fn set_wifi_sequence_and_configured_status() {
    let backend = healthy_backend();
    let delay = InstantDelay::new();
    let cfg = GatewayConfig::default();
    let mut session = connected_session(&backend);
    backend.push_read(CHAR_STATUS, Ok(b"configured"));

    let outcome = block_on(session.set_wifi(
        "TestWiFi",
        "TestPassword123",
        &mut backend.clone(),
        &delay,
        &cfg,
    ))
    .unwrap();

    assert!(outcome.is_configured());
    assert_eq!(
        backend.writes(),
        vec![
            (CHAR_SSID, b"TestWiFi".to_vec()),
            (CHAR_PASS, b"TestPassword123".to_vec()),
            (CHAR_APPLY, vec![0x01]),
        ]
    );
    // The settle wait between Apply and the status re-read.
    assert_eq!(delay.recorded(), vec![cfg.wifi_apply_settle_ms]);
}

#[test]
fn set_wifi_reports_unexpected_status() {
    let backend = healthy_backend();
    let delay = InstantDelay::new();
    let cfg = GatewayConfig::default();
    let mut session = connected_session(&backend);
    backend.push_read(CHAR_STATUS, Ok(b"wifi_error"));

    let outcome = block_on(session.set_wifi(
        "TestWiFi",
        "pw",
        &mut backend.clone(),
        &delay,
        &cfg,
    ))
    .unwrap();

    assert!(!outcome.is_configured());
    assert_eq!(outcome.status.as_deref(), Some("wifi_error"));
}

#[test]
fn set_wifi_survives_unreadable_status() {
    let backend = healthy_backend();
    let delay = InstantDelay::new();
    let cfg = GatewayConfig::default();
    let mut session = connected_session(&backend);
    backend.push_read(CHAR_STATUS, Err("timeout"));

    let outcome = block_on(session.set_wifi(
        "Net",
        "password",
        &mut backend.clone(),
        &delay,
        &cfg,
    ))
    .unwrap();
    assert_eq!(outcome, WifiOutcome { status: None });
}
