//! Request/response correlation
//!
//! Responses arrive in any order; the correlator routes each one to the
//! caller that produced the request. Entries are keyed by the correlation
//! id and additionally tracked in insertion order so that a response (or
//! failure) that cannot be attributed to a specific id falls back to the
//! oldest still-pending request.

use parley_core::{Envelope, ParleyError, ParleyResult};
use std::collections::{HashMap, VecDeque};
use tokio::sync::oneshot;

/// Completion channel for one pending request
pub type Completion = oneshot::Sender<ParleyResult<Envelope>>;

/// Upper bound for the correlation id counter
///
/// Ids wrap modulo this bound to stay short and human-readable. Correctness
/// requires that the number of simultaneously outstanding requests never
/// reaches the bound; this is a documented invariant of caller usage, not
/// enforced here.
pub const ID_WRAP: u32 = 99_999;

/// Pending-request table with FIFO fallback
///
/// Owns every pending completion exclusively. Each entry is removed exactly
/// once: by id match, by FIFO fallback, or by the disconnect sweep.
#[derive(Debug)]
pub struct Correlator {
    pending: HashMap<String, Completion>,
    order: VecDeque<String>,
    counter: u32,
}

impl Correlator {
    /// Create an empty correlator
    pub fn new() -> Self {
        Self {
            pending: HashMap::new(),
            order: VecDeque::new(),
            counter: 0,
        }
    }

    /// Generate the next correlation id
    ///
    /// Connection-scoped monotonically increasing counter formatted as a
    /// decimal string, wrapping at [`ID_WRAP`].
    pub fn next_id(&mut self) -> String {
        self.counter = if self.counter >= ID_WRAP {
            1
        } else {
            self.counter + 1
        };
        self.counter.to_string()
    }

    /// Register a pending request under `id`
    ///
    /// # Errors
    /// Returns the completion back if the id is already registered, which
    /// can only happen when the caller exceeds the id wrap bound with
    /// outstanding requests.
    pub fn register(&mut self, id: String, completion: Completion) -> Result<(), Completion> {
        if self.pending.contains_key(&id) {
            return Err(completion);
        }
        self.order.push_back(id.clone());
        self.pending.insert(id, completion);
        Ok(())
    }

    /// Number of still-pending requests
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Check whether no requests are pending
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Complete the request registered under `id` with a response
    ///
    /// Returns `false` (no-op) if the id is not registered, e.g. when the
    /// entry was already settled by the disconnect sweep.
    pub fn resolve(&mut self, id: &str, envelope: Envelope) -> bool {
        match self.pending.remove(id) {
            Some(completion) => {
                let _ = completion.send(Ok(envelope));
                true
            }
            None => false,
        }
    }

    /// Fail the request registered under `id`
    pub fn reject(&mut self, id: &str, err: ParleyError) -> bool {
        match self.pending.remove(id) {
            Some(completion) => {
                let _ = completion.send(Err(err));
                true
            }
            None => false,
        }
    }

    /// Complete the oldest still-pending request with a response
    ///
    /// Used when an incoming message carries no id. Returns `false` if
    /// nothing is pending.
    pub fn resolve_earliest(&mut self, envelope: Envelope) -> bool {
        match self.pop_earliest() {
            Some(completion) => {
                let _ = completion.send(Ok(envelope));
                true
            }
            None => false,
        }
    }

    /// Fail the oldest still-pending request
    ///
    /// Used when a failure (decode error, idle timeout) cannot be
    /// attributed to a specific outstanding call.
    pub fn reject_earliest(&mut self, err: ParleyError) -> bool {
        match self.pop_earliest() {
            Some(completion) => {
                let _ = completion.send(Err(err));
                true
            }
            None => false,
        }
    }

    /// Fail every still-pending request with `err`, in insertion order
    ///
    /// Invoked exactly once per disconnect event; clears the table.
    pub fn drain(&mut self, err: &ParleyError) {
        while let Some(id) = self.order.pop_front() {
            if let Some(completion) = self.pending.remove(&id) {
                let _ = completion.send(Err(err.clone()));
            }
        }
        self.order.clear();
        self.pending.clear();
    }

    /// Zero the id counter
    ///
    /// The counter is scoped to one connection; called on teardown so the
    /// next connection numbers its requests from 1 again.
    pub fn reset_counter(&mut self) {
        self.counter = 0;
    }

    /// Pop the oldest entry that is still live, skipping ids that were
    /// already settled by an explicit id match.
    fn pop_earliest(&mut self) -> Option<Completion> {
        while let Some(id) = self.order.pop_front() {
            if let Some(completion) = self.pending.remove(&id) {
                return Some(completion);
            }
        }
        None
    }
}

impl Default for Correlator {
    fn default() -> Self {
        Self::new()
    }
}
