//! Per-session state, replay cache, and the session registry (spec.md §4.3,
//! §4.4). Modeled on `src/server/auth.rs::AuthState`'s `RwLock<HashMap<...>>`
//! registry idiom and `src/gateway/heartbeat.rs::CronHeartbeat::run`'s
//! `select! { sleep, shutdown }` cleanup loop shape.

pub mod cache;

pub use cache::{CachedChunk, ReplayCache, ResumeOutcome};

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use crate::protocol::AudioSpec;

fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// One TTS conversation, keyed by `session_id` (spec.md §3).
#[derive(Debug)]
pub struct Session {
    pub session_id: String,
    pub audio_spec: AudioSpec,
    pub ttl_s: u64,

    seq: AtomicU64,
    unit_index: AtomicU64,
    finished: AtomicBool,
    cancelled: AtomicBool,
    last_activity_ts: AtomicI64,

    text_tx: mpsc::UnboundedSender<String>,
    text_rx: Mutex<mpsc::UnboundedReceiver<String>>,

    send_queue: mpsc::UnboundedSender<String>,
    queue_depth: AtomicU64,
    pub cache: ReplayCache,

    synth_task: Mutex<Option<JoinHandle<()>>>,
}

impl Session {
    pub fn new(
        session_id: String,
        audio_spec: AudioSpec,
        ttl_s: u64,
        cache_size: usize,
        send_queue: mpsc::UnboundedSender<String>,
    ) -> Arc<Self> {
        let (text_tx, text_rx) = mpsc::unbounded_channel();
        Arc::new(Session {
            session_id,
            audio_spec,
            ttl_s,
            seq: AtomicU64::new(0),
            unit_index: AtomicU64::new(0),
            finished: AtomicBool::new(false),
            cancelled: AtomicBool::new(false),
            last_activity_ts: AtomicI64::new(now_unix()),
            text_tx,
            text_rx: Mutex::new(text_rx),
            send_queue,
            queue_depth: AtomicU64::new(0),
            cache: ReplayCache::new(cache_size),
            synth_task: Mutex::new(None),
        })
    }

    pub fn touch(&self) {
        self.last_activity_ts.store(now_unix(), Ordering::Relaxed);
    }

    /// Enqueue an outbound frame for the connection's writer task, returning
    /// the queue depth *after* this push so the caller can compare it
    /// against the backpressure high-water mark (spec.md §4.5).
    pub fn push_outbound(&self, json: String) -> u64 {
        let depth = self.queue_depth.fetch_add(1, Ordering::Relaxed) + 1;
        // Receiver lives in the connection's writer task; once it drops (the
        // socket closed) there is nothing left to deliver to.
        let _ = self.send_queue.send(json);
        depth
    }

    /// Called by the writer task after it has sent (or dropped) one frame.
    pub fn mark_outbound_drained(&self) {
        self.queue_depth.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn is_idle_expired(&self) -> bool {
        let last = self.last_activity_ts.load(Ordering::Relaxed);
        now_unix().saturating_sub(last) as u64 > self.ttl_s
    }

    pub fn seq(&self) -> u64 {
        self.seq.load(Ordering::Relaxed)
    }

    pub fn observe_seq(&self, seq: u64) {
        self.seq.fetch_max(seq, Ordering::Relaxed);
    }

    pub fn next_unit_range(&self) -> (u64, u64) {
        let start = self.unit_index.fetch_add(1, Ordering::Relaxed);
        (start, start + 1)
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Relaxed)
    }

    pub fn mark_finished(&self) {
        self.finished.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    pub fn mark_cancelled(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    /// Enqueue one text unit for the synthesis loop to consume.
    pub fn push_text_unit(&self, text: String) {
        // Receiver is only ever dropped when the session itself is torn
        // down, at which point no further pushes happen; ignore a closed
        // channel rather than propagating it.
        let _ = self.text_tx.send(text);
    }

    /// Pop the next pending text unit, waiting up to a short timeout.
    /// Returns `None` on timeout (caller should recheck `finished`).
    pub async fn pop_text_unit(&self, timeout: std::time::Duration) -> Option<String> {
        let mut rx = self.text_rx.lock().await;
        tokio::time::timeout(timeout, rx.recv()).await.ok().flatten()
    }

    pub async fn set_synth_task(&self, handle: JoinHandle<()>) {
        *self.synth_task.lock().await = Some(handle);
    }

    pub async fn has_synth_task(&self) -> bool {
        let guard = self.synth_task.lock().await;
        matches!(&*guard, Some(h) if !h.is_finished())
    }

    pub async fn abort_synth_task(&self) {
        if let Some(handle) = self.synth_task.lock().await.take() {
            handle.abort();
        }
    }
}

/// Registry of live sessions plus the idle-expiry sweep (spec.md §4.4).
pub struct SessionManager {
    sessions: Mutex<HashMap<String, Arc<Session>>>,
    default_ttl_s: u64,
    cache_size: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("session {0} already exists with a different audio_spec")]
    AudioSpecMismatch(String),
}

impl SessionManager {
    pub fn new(default_ttl_s: u64, cache_size: usize) -> Self {
        SessionManager {
            sessions: Mutex::new(HashMap::new()),
            default_ttl_s,
            cache_size,
        }
    }

    /// Returns the existing session if `session_id` is known (validating
    /// `audio_spec` matches), otherwise creates one.
    pub async fn get_or_create(
        &self,
        session_id: &str,
        audio_spec: AudioSpec,
        send_queue: mpsc::UnboundedSender<String>,
    ) -> Result<Arc<Session>, SessionError> {
        let mut sessions = self.sessions.lock().await;
        if let Some(existing) = sessions.get(session_id) {
            if existing.audio_spec != audio_spec {
                return Err(SessionError::AudioSpecMismatch(session_id.to_string()));
            }
            existing.touch();
            return Ok(existing.clone());
        }

        let session = Session::new(
            session_id.to_string(),
            audio_spec,
            self.default_ttl_s,
            self.cache_size,
            send_queue,
        );
        sessions.insert(session_id.to_string(), session.clone());
        Ok(session)
    }

    pub async fn get(&self, session_id: &str) -> Option<Arc<Session>> {
        self.sessions.lock().await.get(session_id).cloned()
    }

    pub async fn remove(&self, session_id: &str) -> Option<Arc<Session>> {
        self.sessions.lock().await.remove(session_id)
    }

    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    /// Periodic sweep: destroy sessions idle longer than their `ttl_s`.
    /// Driven by the caller's `tokio::select! { sleep, shutdown }` loop, the
    /// way `CronHeartbeat::run` structures its own tick.
    pub async fn sweep_expired(&self) -> Vec<Arc<Session>> {
        let mut sessions = self.sessions.lock().await;
        let expired_ids: Vec<String> = sessions
            .iter()
            .filter(|(_, s)| s.is_idle_expired())
            .map(|(id, _)| id.clone())
            .collect();

        let mut expired = Vec::with_capacity(expired_ids.len());
        for id in expired_ids {
            if let Some(session) = sessions.remove(&id) {
                expired.push(session);
            }
        }
        expired
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::AudioFormat;

    fn spec() -> AudioSpec {
        AudioSpec {
            format: AudioFormat::Pcm16Raw,
            sample_rate: 22050,
            channels: 1,
        }
    }

    #[tokio::test]
    async fn get_or_create_returns_same_session_on_second_call() {
        let mgr = SessionManager::new(60, 8);
        let (tx, _rx) = mpsc::unbounded_channel();
        let a = mgr.get_or_create("s1", spec(), tx.clone()).await.unwrap();
        let b = mgr.get_or_create("s1", spec(), tx).await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(mgr.len().await, 1);
    }

    #[tokio::test]
    async fn get_or_create_rejects_audio_spec_mismatch() {
        let mgr = SessionManager::new(60, 8);
        let (tx, _rx) = mpsc::unbounded_channel();
        mgr.get_or_create("s1", spec(), tx.clone()).await.unwrap();
        let mut other = spec();
        other.sample_rate = 16000;
        let err = mgr.get_or_create("s1", other, tx).await.unwrap_err();
        assert!(matches!(err, SessionError::AudioSpecMismatch(_)));
    }

    #[tokio::test]
    async fn unit_index_is_strictly_increasing() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let session = Session::new("s1".into(), spec(), 60, 8, tx);
        let (s0, e0) = session.next_unit_range();
        let (s1, e1) = session.next_unit_range();
        assert_eq!((s0, e0), (0, 1));
        assert_eq!((s1, e1), (1, 2));
    }

    #[tokio::test]
    async fn sweep_expired_removes_only_idle_sessions() {
        let mgr = SessionManager::new(0, 8); // ttl 0 => immediately expired once touched in the past
        let (tx, _rx) = mpsc::unbounded_channel();
        mgr.get_or_create("s1", spec(), tx).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let expired = mgr.sweep_expired().await;
        assert_eq!(expired.len(), 1);
        assert_eq!(mgr.len().await, 0);
    }

    #[tokio::test]
    async fn pop_text_unit_times_out_when_empty() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let session = Session::new("s1".into(), spec(), 60, 8, tx);
        let got = session.pop_text_unit(std::time::Duration::from_millis(10)).await;
        assert!(got.is_none());
    }

    #[tokio::test]
    async fn pop_text_unit_returns_pushed_value() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let session = Session::new("s1".into(), spec(), 60, 8, tx);
        session.push_text_unit("hello".into());
        let got = session.pop_text_unit(std::time::Duration::from_millis(50)).await;
        assert_eq!(got.as_deref(), Some("hello"));
    }
}
