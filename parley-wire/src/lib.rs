//! Wire layer for the parley messaging protocol
//!
//! This crate provides the two byte-level codecs: the [`Framer`] that cuts a
//! raw, possibly fragmented stream into delimiter-terminated frames, and the
//! [`Serializer`] contract (with the shipped JSON implementation) that turns
//! frame payloads into message envelopes.

pub mod framer;
pub mod serializer;

pub use framer::{Framer, DELIMITER};
pub use serializer::{JsonSerializer, Serializer};
