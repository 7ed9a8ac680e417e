//! Drive command translation and the fire-and-forget drive queue.
//!
//! `move_car` replies before the BLE traffic happens: the dispatcher
//! updates the cached car state, queues a [`DriveJob`], and reports whether
//! the job was queued.  The drive worker drains the queue on the shared
//! executor and drops jobs that have been superseded (a newer command for
//! the same car) or orphaned (the owning session released the car).

use std::cell::RefCell;
use std::rc::Rc;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use log::{debug, info, warn};

use crate::ble::coordinator::Coordinator;
use crate::car::{BleAddr, CarId, Move};
use crate::ports::{BleBackend, DelayPort, ShellPort};
use crate::registry::CarRegistry;

use super::SessionId;

// ───────────────────────────────────────────────────────────────
// Translation
// ───────────────────────────────────────────────────────────────

/// The four values written to the motor characteristics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriveParams {
    pub x: i8,
    pub y: i8,
    pub speed: i8,
    pub decay: i8,
}

/// Translate a client movement command into motor parameters.
///
/// | move     | y   | speed | speed (boost) | decay |
/// |----------|-----|-------|---------------|-------|
/// | forward  | +50 | 50    | 100           | 0 / 1 |
/// | backward | −50 | 50    | 100           | 0 / 1 |
/// | stopped  | 0   | 0     | 100           | 0 / 1 |
///
/// Steering `x` passes through unchanged.
pub fn translate_move(movement: Move, x: i8, boost: bool) -> DriveParams {
    let (y, base_speed) = match movement {
        Move::Forward => (50, 50),
        Move::Backward => (-50, 50),
        Move::Stopped => (0, 0),
    };
    DriveParams {
        x,
        y,
        speed: if boost { 100 } else { base_speed },
        decay: i8::from(boost),
    }
}

// ───────────────────────────────────────────────────────────────
// Drive queue
// ───────────────────────────────────────────────────────────────

/// One queued BLE drive command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriveJob {
    pub session: SessionId,
    pub car_id: CarId,
    pub addr: BleAddr,
    /// The car's drive sequence number at enqueue time; an older number
    /// than the registry's current one means this job was superseded.
    pub seq: u32,
    pub params: DriveParams,
}

const DRIVE_DEPTH: usize = 8;

/// Bounded queue between the dispatcher and the drive worker.
pub struct DriveQueue {
    channel: Channel<CriticalSectionRawMutex, DriveJob, DRIVE_DEPTH>,
}

impl Default for DriveQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl DriveQueue {
    pub fn new() -> Self {
        Self {
            channel: Channel::new(),
        }
    }

    /// Queue a job without waiting.  Returns false when the queue is full
    /// (the worker is badly behind; the client sees
    /// `bluetooth_command_sent: false` and the cached state still updated).
    pub fn schedule(&self, job: DriveJob) -> bool {
        match self.channel.try_send(job) {
            Ok(()) => true,
            Err(_) => {
                warn!("drive queue full, dropping command for car {}", job.car_id);
                false
            }
        }
    }

    pub async fn next(&self) -> DriveJob {
        self.channel.receive().await
    }

    pub fn try_next(&self) -> Option<DriveJob> {
        self.channel.try_receive().ok()
    }
}

/// Why a queued job did not reach the car.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Sent,
    /// A newer command for the same car was queued after this one.
    Superseded,
    /// The car is gone or no longer owned by the queueing session.
    Orphaned,
    /// The BLE write failed.
    Failed,
}

/// Execute one queued job against the coordinator.
///
/// The job re-validates ownership and freshness at execution time: session
/// end or a `free_car` between enqueue and execution aborts the write.
pub async fn run_drive_job<B, S, D>(
    job: DriveJob,
    coordinator: &Coordinator<B, S, D>,
    registry: &Rc<RefCell<CarRegistry>>,
) -> JobOutcome
where
    B: BleBackend,
    S: ShellPort,
    D: DelayPort,
{
    {
        let registry = registry.borrow();
        let Some(car) = registry.by_id(job.car_id) else {
            debug!("dropping drive job for unknown car {}", job.car_id);
            return JobOutcome::Orphaned;
        };
        if car.owner != Some(job.session) {
            debug!(
                "dropping drive job for car {}: no longer owned by {}",
                job.car_id, job.session
            );
            return JobOutcome::Orphaned;
        }
        if car.drive_seq != job.seq {
            debug!(
                "dropping superseded drive job for car {} (seq {} < {})",
                job.car_id, job.seq, car.drive_seq
            );
            return JobOutcome::Superseded;
        }
    }

    let DriveParams { x, y, speed, decay } = job.params;
    match coordinator
        .drive_car(job.addr, x.into(), y.into(), speed.into(), decay.into())
        .await
    {
        Ok(()) => {
            info!("drive command sent to car {}", job.car_id);
            JobOutcome::Sent
        }
        Err(e) => {
            warn!("drive command for car {} failed: {e}", job.car_id);
            JobOutcome::Failed
        }
    }
}

/// Worker task: drains the drive queue for the life of the gateway.
pub async fn drive_worker<B, S, D>(
    queue: Rc<DriveQueue>,
    coordinator: Rc<Coordinator<B, S, D>>,
    registry: Rc<RefCell<CarRegistry>>,
)
where
    B: BleBackend,
    S: ShellPort,
    D: DelayPort,
{
    loop {
        let job = queue.next().await;
        let _ = run_drive_job(job, &coordinator, &registry).await;
    }
}

// ───────────────────────────────────────────────────────────────
// Tests
// ───────────────────────────────────────────────────────────────
