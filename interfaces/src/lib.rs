//! Fronthaul Transport Interfaces Library
//! 
//! This crate provides the collaborators the C-Plane core relies on: eCPRI
//! framing, scatter-gather packet buffers with zero-copy external
//! attachment, and worker dispatch for scheduled jobs.

pub mod buffer;
pub mod ecpri;
pub mod worker;

use thiserror::Error;

/// Interface errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("Invalid message format: {0}")]
    InvalidMessage(String),
    
    #[error("Buffer too short: need {needed} bytes, have {available}")]
    ShortBuffer { needed: usize, available: usize },
    
    #[error("Buffer pool exhausted ({0} buffers in flight)")]
    BufferFull(usize),
    
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    
    #[error("Worker {0} is not available")]
    WorkerUnavailable(usize),
}
