//! Transport layer for the parley messaging protocol
//!
//! This crate provides the byte-stream collaborator surface consumed by the
//! client core: a pair of traits describing a connectable stream, and the
//! TCP implementation. The core never opens raw sockets itself; it only
//! calls this interface and reacts to what reads return.

pub mod stream;
pub mod tcp;

pub use stream::{StreamAccessor, TransportLayer};
pub use tcp::TcpTransport;
