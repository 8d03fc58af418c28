//! Registry of cancellable in-flight resolver calls, keyed by run.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};

use formfill_core::JobTicket;
use tokio_util::sync::CancellationToken;

use crate::ResolverError;

#[derive(Default)]
struct Registry {
    next_id: u64,
    in_flight: HashMap<JobTicket, HashMap<u64, CancellationToken>>,
}

/// Tracks every in-flight call per document run so that removing a document
/// can cancel all of its work at once. A later run of the same path is keyed
/// apart and never sees the cancellation.
///
/// A tracked call deregisters itself when it settles or is dropped.
/// Cancellation surfaces to the awaiting caller as a `Cancelled` failure.
#[derive(Clone, Default)]
pub struct RequestLifecycleTracker {
    registry: Arc<Mutex<Registry>>,
}

impl RequestLifecycleTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn track<T, F>(&self, ticket: &JobTicket, op: F) -> Result<T, ResolverError>
    where
        F: Future<Output = Result<T, ResolverError>>,
    {
        let (id, token) = self.register(ticket);
        let _registration = Registration {
            tracker: self,
            ticket,
            id,
        };
        tokio::select! {
            biased;
            _ = token.cancelled() => Err(ResolverError::cancelled()),
            result = op => result,
        }
    }

    /// Cancels every tracked call of the run and forgets it.
    /// Returns how many calls were cancelled; unknown runs yield zero.
    pub fn cancel_all(&self, ticket: &JobTicket) -> usize {
        let removed = self.lock().in_flight.remove(ticket);
        match removed {
            Some(calls) => {
                for token in calls.values() {
                    token.cancel();
                }
                calls.len()
            }
            None => 0,
        }
    }

    pub fn in_flight(&self, ticket: &JobTicket) -> usize {
        self.lock().in_flight.get(ticket).map_or(0, HashMap::len)
    }

    pub fn is_empty(&self) -> bool {
        self.lock().in_flight.is_empty()
    }

    fn register(&self, ticket: &JobTicket) -> (u64, CancellationToken) {
        let mut registry = self.lock();
        registry.next_id += 1;
        let id = registry.next_id;
        let token = CancellationToken::new();
        registry
            .in_flight
            .entry(ticket.clone())
            .or_default()
            .insert(id, token.clone());
        (id, token)
    }

    fn deregister(&self, ticket: &JobTicket, id: u64) {
        let mut registry = self.lock();
        if let Some(calls) = registry.in_flight.get_mut(ticket) {
            calls.remove(&id);
            if calls.is_empty() {
                registry.in_flight.remove(ticket);
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

struct Registration<'a> {
    tracker: &'a RequestLifecycleTracker,
    ticket: &'a JobTicket,
    id: u64,
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        self.tracker.deregister(self.ticket, self.id);
    }
}
