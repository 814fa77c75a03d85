//! O-RAN 7.2x Fronthaul C-Plane Library
//! 
//! This crate implements the C-Plane section codec with its section
//! extensions, the per-eAxC section information database, the TDD frame
//! structure and the deadline scheduler that decides in over-the-air time
//! when C-Plane messages are built or expected.

pub mod cplane;
pub mod frame;
pub mod section_db;
pub mod timing;

use interfaces::InterfaceError;
use thiserror::Error;

/// Fronthaul errors
///
/// Success is `Ok(_)`; every failure maps to one status code through
/// [`FhError::status`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FhError {
    #[error("Operation failed: {0}")]
    Fail(String),
    
    #[error("Temporarily unavailable, retry: {0}")]
    Retry(String),
    
    #[error("Resource exhausted: {0}")]
    Resource(String),
    
    #[error("Invalid parameter: {0}")]
    InvalidParam(String),
    
    #[error("Fatal error: {0}")]
    Fatal(String),
    
    #[error("Unsupported: {0}")]
    Unsupported(String),
    
    #[error("Invalid packet: {0}")]
    InvalidPacket(String),
}

/// Status code of a successful operation
pub const STATUS_SUCCESS: i32 = 0;

impl FhError {
    /// Numeric status code
    pub fn status(&self) -> i32 {
        match self {
            FhError::Fail(_) => -1,
            FhError::Retry(_) => -2,
            FhError::Resource(_) => -3,
            FhError::InvalidParam(_) => -4,
            FhError::Fatal(_) => -5,
            FhError::Unsupported(_) => -6,
            FhError::InvalidPacket(_) => -7,
        }
    }
}

impl From<InterfaceError> for FhError {
    fn from(err: InterfaceError) -> Self {
        match err {
            InterfaceError::BufferFull(_) => FhError::Resource(err.to_string()),
            InterfaceError::ShortBuffer { .. } | InterfaceError::InvalidMessage(_) => {
                FhError::InvalidPacket(err.to_string())
            }
            InterfaceError::InvalidConfig(_) => FhError::InvalidParam(err.to_string()),
            InterfaceError::WorkerUnavailable(_) => FhError::Retry(err.to_string()),
        }
    }
}
