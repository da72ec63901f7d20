//! Identifier → pod record table

use crate::k8s::types::PodRecord;
use kubemeta_common::PodIdentifier;
use std::collections::HashMap;
use std::sync::Arc;

/// Primary pod lookup table. Every identifier of a pod points at the same
/// shared record; a record lives as long as any identifier references it.
#[derive(Debug, Default)]
pub struct PodTable {
    entries: HashMap<PodIdentifier, Arc<PodRecord>>,
}

impl PodTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `record` under every identifier, unless the record already
    /// stored under an identifier started strictly later. Returns the number
    /// of identifiers written.
    pub fn put(&mut self, identifiers: &[PodIdentifier], record: Arc<PodRecord>) -> usize {
        let mut written = 0;
        for id in identifiers {
            if let Some(existing) = self.entries.get(id) {
                if is_newer(existing, &record) {
                    continue;
                }
            }
            self.entries.insert(id.clone(), Arc::clone(&record));
            written += 1;
        }
        written
    }

    /// Record for `id`, hiding ignored pods
    pub fn lookup(&self, id: &PodIdentifier) -> Option<Arc<PodRecord>> {
        self.entries
            .get(id)
            .filter(|record| !record.ignore)
            .cloned()
    }

    /// Record for `id` including ignored pods, for delete bookkeeping
    pub fn get_raw(&self, id: &PodIdentifier) -> Option<&Arc<PodRecord>> {
        self.entries.get(id)
    }

    /// Remove the entry for `id` only if it still belongs to the pod `name`.
    pub fn remove_if_named(&mut self, id: &PodIdentifier, name: &str) -> bool {
        match self.entries.get(id) {
            Some(record) if record.name == name => {
                self.entries.remove(id);
                true
            }
            _ => false,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Whether `existing` started strictly after `incoming`. A missing start time
/// on either side never blocks the write.
fn is_newer(existing: &PodRecord, incoming: &PodRecord) -> bool {
    match (existing.start_time, incoming.start_time) {
        (Some(stored), Some(new)) => stored > new,
        _ => false,
    }
}
