//! End-to-end exercise of the session registry + dummy synthesis backend +
//! replay cache working together, independent of any WebSocket transport.

use tokio::sync::mpsc;

use tts_gateway_core::protocol::{AudioFormat, AudioSpec};
use tts_gateway_core::session::{CachedChunk, ResumeOutcome, SessionManager};
use tts_gateway_core::tts::{DummyEngine, TtsEngine};

fn spec() -> AudioSpec {
    AudioSpec {
        format: AudioFormat::Pcm16Raw,
        sample_rate: 22050,
        channels: 1,
    }
}

#[tokio::test]
async fn text_units_flow_through_to_synthesized_audio_and_replay_cache() {
    let manager = SessionManager::new(60, 8);
    let (out_tx, mut out_rx) = mpsc::unbounded_channel();
    let session = manager.get_or_create("s1", spec(), out_tx).await.unwrap();

    session.push_text_unit("hello there".to_string());
    session.mark_finished();

    let text = session.pop_text_unit(std::time::Duration::from_millis(50)).await.unwrap();
    assert_eq!(text, "hello there");
    assert!(session.is_finished());

    let engine = DummyEngine::new();
    let (start, end) = session.next_unit_range();
    let pcm = engine.synthesize_pcm16(&text, session.audio_spec).await.unwrap();
    assert!(!pcm.is_empty());

    session
        .cache
        .push(CachedChunk {
            unit_index_start: start,
            unit_index_end: end,
            json: format!("{{\"unit_index_start\":{start},\"unit_index_end\":{end}}}"),
        })
        .await;

    let depth = session.push_outbound("{\"type\":\"audio_chunk\"}".to_string());
    assert_eq!(depth, 1);
    assert_eq!(out_rx.recv().await.unwrap(), "{\"type\":\"audio_chunk\"}");
    session.mark_outbound_drained();

    match session.cache.resume_from(0).await {
        ResumeOutcome::Entries(entries) => assert_eq!(entries.len(), 1),
        ResumeOutcome::NotAvailable => panic!("expected the just-cached chunk"),
    }
}

#[tokio::test]
async fn reconnecting_with_the_same_session_id_reuses_state() {
    let manager = SessionManager::new(60, 8);
    let (tx_a, _rx_a) = mpsc::unbounded_channel();
    let first = manager.get_or_create("s1", spec(), tx_a).await.unwrap();
    first.observe_seq(5);

    let (tx_b, _rx_b) = mpsc::unbounded_channel();
    let second = manager.get_or_create("s1", spec(), tx_b).await.unwrap();

    assert_eq!(second.seq(), 5);
    assert_eq!(manager.len().await, 1);
}

#[tokio::test]
async fn dummy_engine_stream_chunks_respect_requested_chunk_size() {
    let engine = DummyEngine::new();
    let chunks = engine
        .synthesize_pcm16_stream("a longer utterance to synthesize", spec(), 64)
        .await
        .unwrap();

    assert!(chunks.len() > 1);
    for chunk in &chunks[..chunks.len() - 1] {
        assert_eq!(chunk.len(), 64);
    }
    assert!(chunks.last().unwrap().len() <= 64);
}
