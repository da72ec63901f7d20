//! Delayed pod eviction
//!
//! Pod deletes are not applied right away: a delete can race the add of a
//! different pod that reuses the same address, so each identifier is queued
//! and only removed once the grace period has passed and the stored record
//! still carries the deleted pod's name.

use kubemeta_common::PodIdentifier;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteRequest {
    pub id: PodIdentifier,
    pub pod_name: String,
    pub ts: Instant,
}

/// Time-ordered queue of pending deletes
#[derive(Debug, Default)]
pub struct DeleteQueue {
    requests: VecDeque<DeleteRequest>,
}

impl DeleteQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, request: DeleteRequest) {
        self.requests.push_back(request);
    }

    /// Pop every request queued at least `grace` before `now`. Stops at the
    /// first younger request; requests are enqueued in time order.
    pub fn drain_expired(&mut self, now: Instant, grace: Duration) -> Vec<DeleteRequest> {
        let cutoff = self
            .requests
            .iter()
            .position(|r| now.saturating_duration_since(r.ts) < grace)
            .unwrap_or(self.requests.len());
        self.requests.drain(..cutoff).collect()
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }
}
