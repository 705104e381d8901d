// Integration tests for capture: sample conversion, chunking and the
// capture engine's hand-off to the session task.

mod common;

use anyhow::Result;
use common::{CaptureHandle, ScriptedCapture};
use lingo_voice::audio::pcm::{float_to_int16, int16_to_float};
use lingo_voice::audio::{
    AudioCaptureEngine, AudioChunk, CaptureConfig, CaptureEvent, ChunkAccumulator, ChunkConfig,
    DeviceSelector,
};
use lingo_voice::LiveError;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn engine(handle: &Arc<CaptureHandle>, threshold: usize, queue_depth: usize) -> AudioCaptureEngine {
    AudioCaptureEngine::new(
        Box::new(ScriptedCapture::new(Arc::clone(handle))),
        CaptureConfig {
            chunk_threshold_samples: threshold,
            queue_depth,
            ..CaptureConfig::default()
        },
    )
}

#[test]
fn test_pcm_round_trip_every_value() {
    for v in i16::MIN..=i16::MAX {
        let back = float_to_int16(int16_to_float(v));
        assert!(
            (back as i32 - v as i32).abs() <= 1,
            "{} came back as {}",
            v,
            back
        );
    }
}

#[test]
fn test_float_to_int16_extremes() {
    assert_eq!(float_to_int16(1.0), 32767);
    assert_eq!(float_to_int16(-1.0), -32768);
    assert_eq!(float_to_int16(0.0), 0);
    // Out-of-range input is clamped
    assert_eq!(float_to_int16(1.5), 32767);
    assert_eq!(float_to_int16(-3.0), -32768);
}

#[test]
fn test_chunk_count_is_floor_of_total_over_threshold() {
    // Odd frame sizes so chunk boundaries never line up with frames
    for (threshold, frame_size, frames) in [(4096, 128, 100), (1000, 333, 31), (512, 1024, 7)] {
        let mut accumulator = ChunkAccumulator::new(ChunkConfig::new(threshold, 16000));
        let mut chunks: Vec<AudioChunk> = Vec::new();

        for _ in 0..frames {
            accumulator.push(&vec![0.25; frame_size], |chunk| chunks.push(chunk));
        }

        let total = frame_size * frames;
        assert_eq!(chunks.len(), total / threshold, "threshold {}", threshold);
        assert!(chunks.iter().all(|c| c.sample_count() == threshold));
        assert_eq!(accumulator.pending_samples(), total % threshold);

        let sequences: Vec<u64> = chunks.iter().map(|c| c.sequence).collect();
        let expected: Vec<u64> = (0..chunks.len() as u64).collect();
        assert_eq!(sequences, expected);
    }
}

#[test]
fn test_default_chunk_is_256ms() {
    let config = ChunkConfig::default();
    assert_eq!(config.threshold_samples, 4096);
    assert_eq!(config.chunk_duration_ms(), 256);
}

#[test]
fn test_chunk_preserves_sample_order() {
    let mut accumulator = ChunkAccumulator::new(ChunkConfig::new(4, 16000));
    let mut chunks = Vec::new();

    accumulator.push(&[0.1, 0.2, 0.3], |c| chunks.push(c));
    accumulator.push(&[0.4, 0.5, 0.6], |c| chunks.push(c));

    assert_eq!(chunks.len(), 1);
    let expected: Vec<u8> = [0.1f32, 0.2, 0.3, 0.4]
        .iter()
        .flat_map(|s| float_to_int16(*s).to_le_bytes())
        .collect();
    assert_eq!(chunks[0].data, expected);
    assert_eq!(accumulator.pending_samples(), 2);
}

#[tokio::test]
async fn test_engine_emits_chunks_in_order() -> Result<()> {
    let handle = CaptureHandle::new();
    let mut engine = engine(&handle, 1024, 16);

    let mut events = engine.open(&DeviceSelector::Default)?;
    assert!(engine.is_open());

    for _ in 0..10 {
        assert!(handle.push(&[0.1; 512]));
    }

    let mut sequences = Vec::new();
    for _ in 0..5 {
        match events.recv().await {
            Some(CaptureEvent::Chunk(chunk)) => {
                assert_eq!(chunk.sample_count(), 1024);
                assert_eq!(chunk.sample_rate, 16000);
                assert_eq!(chunk.channels, 1);
                sequences.push(chunk.sequence);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }
    assert_eq!(sequences, vec![0, 1, 2, 3, 4]);
    assert_eq!(engine.stats().chunks_emitted(), 5);

    engine.close();
    Ok(())
}

#[tokio::test]
async fn test_engine_requests_mono_at_configured_rate() -> Result<()> {
    let handle = CaptureHandle::new();
    let mut engine = engine(&handle, 4096, 8);

    let _events = engine.open(&DeviceSelector::Id("usb-headset".to_string()))?;

    let request = handle.last_request.lock().clone().expect("backend was opened");
    assert_eq!(request.sample_rate, 16000);
    assert_eq!(request.device, DeviceSelector::Id("usb-headset".to_string()));
    assert!(request.echo_cancellation);
    assert!(request.noise_suppression);
    assert!(request.auto_gain_control);
    Ok(())
}

#[tokio::test]
async fn test_full_queue_drops_newest_chunks() -> Result<()> {
    let handle = CaptureHandle::new();
    let mut engine = engine(&handle, 100, 1);

    let mut events = engine.open(&DeviceSelector::Default)?;

    // Three chunks' worth while nobody reads
    handle.push(&[0.5; 300]);

    let stats = engine.stats();
    assert_eq!(stats.chunks_emitted(), 1);
    assert_eq!(stats.chunks_dropped(), 2);

    // The chunk that made it is the oldest one
    match events.recv().await {
        Some(CaptureEvent::Chunk(chunk)) => assert_eq!(chunk.sequence, 0),
        other => panic!("unexpected event {:?}", other),
    }
    Ok(())
}

#[tokio::test]
async fn test_sample_taps_see_every_frame() -> Result<()> {
    let handle = CaptureHandle::new();
    let mut engine = engine(&handle, 4096, 8);

    let seen = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&seen);
    engine.on_samples(move |frame| {
        counter.fetch_add(frame.len(), Ordering::SeqCst);
    });

    let _events = engine.open(&DeviceSelector::Default)?;
    handle.push(&[0.0; 128]);
    handle.push(&[0.0; 256]);

    assert_eq!(seen.load(Ordering::SeqCst), 384);
    Ok(())
}

#[tokio::test]
async fn test_sample_taps_survive_reopen() -> Result<()> {
    let handle = CaptureHandle::new();
    let mut engine = engine(&handle, 4096, 8);

    let seen = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&seen);
    engine.on_samples(move |frame| {
        counter.fetch_add(frame.len(), Ordering::SeqCst);
    });

    let _first = engine.open(&DeviceSelector::Default)?;
    handle.push(&[0.0; 100]);
    engine.close();

    let _second = engine.open(&DeviceSelector::Default)?;
    handle.push(&[0.0; 100]);

    assert_eq!(seen.load(Ordering::SeqCst), 200);
    Ok(())
}

#[tokio::test]
async fn test_device_failure_after_open_is_reported() -> Result<()> {
    let handle = CaptureHandle::new();
    let mut engine = engine(&handle, 4096, 8);

    let mut events = engine.open(&DeviceSelector::Default)?;
    assert!(handle.fail(LiveError::Device("unplugged".to_string())));

    match events.recv().await {
        Some(CaptureEvent::Failed(LiveError::Device(detail))) => assert_eq!(detail, "unplugged"),
        other => panic!("unexpected event {:?}", other),
    }
    Ok(())
}

#[test]
fn test_open_errors_are_distinct() {
    let handle = CaptureHandle::new();
    let mut engine = engine(&handle, 4096, 8);

    handle.fail_next_open(LiveError::PermissionDenied("user refused".to_string()));
    let err = engine.open(&DeviceSelector::Default).unwrap_err();
    assert!(matches!(err, LiveError::PermissionDenied(_)));
    assert!(!engine.is_open());

    handle.fail_next_open(LiveError::DeviceUnavailable("no such device".to_string()));
    let err = engine.open(&DeviceSelector::Id("missing".to_string())).unwrap_err();
    assert!(matches!(err, LiveError::DeviceUnavailable(_)));
    assert_eq!(handle.open_count(), 0);
}

#[test]
fn test_close_is_idempotent_and_safe_without_open() {
    let handle = CaptureHandle::new();
    let mut engine = engine(&handle, 4096, 8);

    // Never opened
    engine.close();
    engine.close();
    assert_eq!(handle.open_count(), 0);

    let _events = engine.open(&DeviceSelector::Default).unwrap();
    assert_eq!(handle.open_count(), 1);

    engine.close();
    engine.close();
    assert_eq!(handle.open_count(), 0);
    assert!(!engine.is_open());
    assert!(!handle.push(&[0.0; 16]), "callback must be released on close");
}
