use std::collections::VecDeque;

use tokio::sync::Mutex;

/// One cached outbound `audio_chunk` envelope: the exact JSON text that went
/// out on the wire, plus the unit-index range it covers, so `resume` can
/// forward entries verbatim (spec.md §4.3).
#[derive(Debug, Clone)]
pub struct CachedChunk {
    pub unit_index_start: u64,
    pub unit_index_end: u64,
    pub json: String,
}

/// Bounded ring of the last N emitted `audio_chunk` envelopes for one
/// session, default N=64 (`TTS_CACHE_SIZE`).
#[derive(Debug)]
pub struct ReplayCache {
    entries: Mutex<VecDeque<CachedChunk>>,
    capacity: usize,
}

pub enum ResumeOutcome {
    /// Forward these cached envelopes, oldest first.
    Entries(Vec<String>),
    /// Nothing in the cache covers the requested point; emit
    /// `resume_not_available`.
    NotAvailable,
}

impl ReplayCache {
    pub fn new(capacity: usize) -> Self {
        ReplayCache {
            entries: Mutex::new(VecDeque::with_capacity(capacity.max(1))),
            capacity: capacity.max(1),
        }
    }

    pub async fn push(&self, chunk: CachedChunk) {
        let mut entries = self.entries.lock().await;
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(chunk);
    }

    /// Forward every cached entry whose `unit_index_end` is greater than
    /// `last_unit_index_received`. `resume_not_available` if none qualify —
    /// this also covers the empty-cache case and the case where the request
    /// is older than the oldest retained entry (spec.md §4.3).
    pub async fn resume_from(&self, last_unit_index_received: u64) -> ResumeOutcome {
        let entries = self.entries.lock().await;

        let gap = entries
            .front()
            .is_some_and(|first| last_unit_index_received < first.unit_index_start);
        if gap {
            return ResumeOutcome::NotAvailable;
        }

        let matches: Vec<String> = entries
            .iter()
            .filter(|e| e.unit_index_end > last_unit_index_received)
            .map(|e| e.json.clone())
            .collect();

        if matches.is_empty() {
            ResumeOutcome::NotAvailable
        } else {
            ResumeOutcome::Entries(matches)
        }
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }
}
