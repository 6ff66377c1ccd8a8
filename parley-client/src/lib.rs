//! Client implementation for the parley messaging protocol
//!
//! This crate provides the connection-side core: the correlator that matches
//! asynchronous responses to the requests that produced them, the connection
//! state machine driven by a single dispatcher task, and the [`Client`]
//! façade composing them with the wire and transport layers.

pub mod client;
pub mod correlator;
mod dispatch;
pub mod state;

pub use client::{Client, ClientBuilder, DEFAULT_NAME, DEFAULT_PORT, DEFAULT_TIMEOUT};
pub use correlator::{Correlator, ID_WRAP};
pub use dispatch::Status;
pub use state::ConnectionState;
