//! Interface run state

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use tracing::info;

use crate::FhError;

/// Interface life cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum InterfaceStatus {
    Init = 0,
    Running = 1,
    Stopped = 2,
}

impl InterfaceStatus {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => InterfaceStatus::Running,
            2 => InterfaceStatus::Stopped,
            _ => InterfaceStatus::Init,
        }
    }
}

/// Shared run state, checked by the tick path before every dispatch
#[derive(Debug, Clone)]
pub struct InterfaceState {
    inner: Arc<AtomicU8>,
}

impl Default for InterfaceState {
    fn default() -> Self {
        Self::new()
    }
}

impl InterfaceState {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(AtomicU8::new(InterfaceStatus::Init as u8)),
        }
    }

    pub fn get(&self) -> InterfaceStatus {
        InterfaceStatus::from_u8(self.inner.load(Ordering::Acquire))
    }

    pub fn is_running(&self) -> bool {
        self.get() == InterfaceStatus::Running
    }

    /// Enter RUNNING from INIT or STOPPED
    pub fn start(&self) -> Result<(), FhError> {
        let prev = self.inner.swap(InterfaceStatus::Running as u8, Ordering::AcqRel);
        if prev == InterfaceStatus::Running as u8 {
            return Err(FhError::InvalidParam("interface already running".into()));
        }
        info!("Interface running");
        Ok(())
    }

    /// Enter STOPPED; returns whether the interface was running
    pub fn stop(&self) -> bool {
        let prev = self.inner.swap(InterfaceStatus::Stopped as u8, Ordering::AcqRel);
        info!("Interface stopped");
        prev == InterfaceStatus::Running as u8
    }
}
