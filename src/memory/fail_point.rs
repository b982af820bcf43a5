//! Command fail points for fault injection.

use crate::driver::{DriverError, DriverResult};
use parking_lot::Mutex;

/// Commands that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    StartSession,
    StartTransaction,
    Insert,
    Find,
    Update,
    Delete,
    Commit,
}

/// Fails the next `times` invocations of `command` with `error`.
#[derive(Debug, Clone)]
pub struct FailPoint {
    pub command: Command,
    pub times: u32,
    pub error: DriverError,
}

impl FailPoint {
    pub fn new(command: Command, times: u32, error: DriverError) -> Self {
        Self {
            command,
            times,
            error,
        }
    }
}

/// Fail points registered on a client, shared with its sessions.
#[derive(Debug, Default)]
pub struct FailPoints {
    points: Mutex<Vec<FailPoint>>,
}

impl FailPoints {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, fail_point: FailPoint) {
        if fail_point.times > 0 {
            self.points.lock().push(fail_point);
        }
    }

    pub fn clear(&self) {
        self.points.lock().clear();
    }

    /// Consumes one failure for `command`, oldest fail point first.
    pub fn trigger(&self, command: Command) -> DriverResult<()> {
        let mut points = self.points.lock();
        let Some(index) = points.iter().position(|fp| fp.command == command) else {
            return Ok(());
        };

        let error = points[index].error.clone();
        points[index].times -= 1;
        if points[index].times == 0 {
            points.remove(index);
        }

        log::trace!("Fail point triggered for {:?}: {}", command, error);
        Err(error)
    }

    /// Failures still pending for `command`.
    pub fn remaining(&self, command: Command) -> u32 {
        self.points
            .lock()
            .iter()
            .filter(|fp| fp.command == command)
            .map(|fp| fp.times)
            .sum()
    }
}
