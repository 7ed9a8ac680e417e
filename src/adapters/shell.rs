//! Host shell fallbacks for adapter recovery.
//!
//! On Linux hosts (the Raspberry Pi deployment) these wrap the BlueZ
//! command-line tools: `hcitool` for active-link queries and forced
//! disconnects, `hciconfig` for adapter power, `bluetoothctl` for the
//! service power cycle and pairing.  Every call is best-effort — a missing
//! or failing tool is reported as `false`, logged by the caller at debug,
//! and never aborts anything.
//!
//! Non-Linux hosts (including the ESP32 target, which has no shell at all)
//! use [`NullShell`].

use crate::car::BleAddr;
use crate::ports::ShellPort;

// ───────────────────────────────────────────────────────────────
// No-op shell
// ───────────────────────────────────────────────────────────────

/// Shell stub for hosts without BlueZ tooling.  Reports an always-running
/// adapter and succeeds at every power step so recovery sequences degrade
/// to plain waits.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullShell;

impl ShellPort for NullShell {
    fn active_links(&self) -> heapless::Vec<BleAddr, 8> {
        heapless::Vec::new()
    }

    fn disconnect_link(&self, _addr: BleAddr) -> bool {
        true
    }

    fn adapter_down(&self) -> bool {
        true
    }

    fn adapter_up(&self) -> bool {
        true
    }

    fn service_power(&self, _on: bool) -> bool {
        true
    }

    fn adapter_running(&self) -> bool {
        true
    }

    fn pair(&self, _addr: BleAddr) -> bool {
        false
    }
}

// ───────────────────────────────────────────────────────────────
// BlueZ shell (Linux hosts)
// ───────────────────────────────────────────────────────────────

#[cfg(target_os = "linux")]
pub use bluez::BlueZShell;

#[cfg(target_os = "linux")]
mod bluez {
    use std::process::Command;

    use log::debug;

    use crate::car::BleAddr;
    use crate::ports::ShellPort;

    /// BlueZ command-line shell for a named adapter (`hci0`, `hci1`, …).
    #[derive(Debug, Clone)]
    pub struct BlueZShell {
        adapter: heapless::String<8>,
    }

    impl BlueZShell {
        pub fn new(adapter: &str) -> Self {
            let mut buf = heapless::String::new();
            let _ = buf.push_str(crate::car::clip(adapter, 8));
            Self { adapter: buf }
        }

        /// Run a command, returning its stdout on exit status 0.
        fn run(program: &str, args: &[&str]) -> Option<String> {
            match Command::new(program).args(args).output() {
                Ok(output) if output.status.success() => {
                    Some(String::from_utf8_lossy(&output.stdout).into_owned())
                }
                Ok(output) => {
                    debug!(
                        "{program} {args:?} exited with {}: {}",
                        output.status,
                        String::from_utf8_lossy(&output.stderr).trim()
                    );
                    None
                }
                Err(e) => {
                    debug!("could not run {program}: {e}");
                    None
                }
            }
        }
    }

    impl ShellPort for BlueZShell {
        fn active_links(&self) -> heapless::Vec<BleAddr, 8> {
            let mut links = heapless::Vec::new();
            let Some(stdout) = Self::run("hcitool", &["con"]) else {
                return links;
            };
            // `hcitool con` lines look like:
            //   "< LE CC:BA:97:0D:8C:B5 handle 64 state 1 lm MASTER"
            for line in stdout.lines() {
                for token in line.split_whitespace() {
                    if let Ok(addr) = token.parse::<BleAddr>() {
                        let _ = links.push(addr);
                        break;
                    }
                }
            }
            links
        }

        fn disconnect_link(&self, addr: BleAddr) -> bool {
            let addr_text = addr.to_string();
            let hci = Self::run("sudo", &["hcitool", "dc", &addr_text]).is_some();
            // Backup path: bluetoothctl knows about LE links hcitool misses.
            let ctl = Self::run("bluetoothctl", &["disconnect", &addr_text]).is_some();
            hci || ctl
        }

        fn adapter_down(&self) -> bool {
            Self::run("sudo", &["hciconfig", self.adapter.as_str(), "down"]).is_some()
        }

        fn adapter_up(&self) -> bool {
            Self::run("sudo", &["hciconfig", self.adapter.as_str(), "up"]).is_some()
        }

        fn service_power(&self, on: bool) -> bool {
            let arg = if on { "on" } else { "off" };
            Self::run("bluetoothctl", &["power", arg]).is_some()
        }

        fn adapter_running(&self) -> bool {
            Self::run("hciconfig", &[self.adapter.as_str()])
                .is_some_and(|stdout| stdout.contains("UP RUNNING"))
        }

        fn pair(&self, addr: BleAddr) -> bool {
            let addr_text = addr.to_string();
            let mut all_ok = true;
            for step in ["pair", "trust", "connect"] {
                if Self::run("bluetoothctl", &[step, &addr_text]).is_none() {
                    all_ok = false;
                }
            }
            all_ok
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Tests
// ───────────────────────────────────────────────────────────────
