//! Core types for the parley messaging protocol
//!
//! This crate provides the message envelope data model, the fixed command
//! names, and the error taxonomy used throughout the parley implementation.

pub mod envelope;
pub mod error;

pub use envelope::{Command, Envelope, ServerInfo, Version, WireError};
pub use error::{ParleyError, ParleyResult};
