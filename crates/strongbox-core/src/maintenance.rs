use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::{Result, StoreError};

/// Process-wide switch that blocks new mutations during maintenance.
///
/// Checked once when a mutation starts. Operations already past the check
/// run to completion.
#[derive(Debug, Default)]
pub struct MaintenanceGate {
    active: AtomicBool,
}

impl MaintenanceGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_maintenance(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub fn enter(&self) {
        if !self.active.swap(true, Ordering::AcqRel) {
            tracing::warn!("maintenance mode entered; new mutations will be rejected");
        }
    }

    pub fn exit(&self) {
        if self.active.swap(false, Ordering::AcqRel) {
            tracing::info!("maintenance mode exited");
        }
    }

    /// Fails with `MaintenanceModeActive` while the gate is engaged.
    pub fn check(&self) -> Result<()> {
        if self.is_maintenance() {
            Err(StoreError::MaintenanceModeActive)
        } else {
            Ok(())
        }
    }
}
