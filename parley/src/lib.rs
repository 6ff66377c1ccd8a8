//! parley - client for a delimiter-framed, session-authenticated
//! request/response messaging protocol over TCP
//!
//! # Architecture
//!
//! This library is organized as a workspace with one crate per layer:
//!
//! - `parley-core`: envelope data model, commands, error taxonomy
//! - `parley-wire`: frame reassembly and payload codecs
//! - `parley-transport`: byte-stream transport (TCP)
//! - `parley-client`: correlator, connection state machine, client façade
//!
//! # Usage
//!
//! ```no_run
//! use parley::client::ClientBuilder;
//! ```

// Re-export core types
pub use parley_core::{Command, Envelope, ParleyError, ParleyResult, ServerInfo, WireError};

// Re-export client API
pub mod client {
    pub use parley_client::*;
}

// Re-export wire codecs
pub mod wire {
    pub use parley_wire::*;
}

// Re-export transport layer
pub mod transport {
    pub use parley_transport::*;
}
