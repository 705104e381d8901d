// Integration tests for replaying WAV files as a capture source

use anyhow::Result;
use hound::{SampleFormat, WavSpec, WavWriter};
use lingo_voice::audio::{
    AudioCaptureEngine, AudioFile, CaptureConfig, CaptureEvent, DeviceSelector, FileBackend,
};
use lingo_voice::LiveError;
use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;

fn write_int_wav(path: &Path, sample_rate: u32, channels: u16, frames: usize) -> Result<()> {
    let spec = WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let mut writer = WavWriter::create(path, spec)?;
    for i in 0..frames {
        let value = ((i % 100) as i16 - 50) * 200;
        for _ in 0..channels {
            writer.write_sample(value)?;
        }
    }
    writer.finalize()?;
    Ok(())
}

#[test]
fn test_audio_file_reads_int_samples() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let path = temp_dir.path().join("speech.wav");
    write_int_wav(&path, 16000, 1, 16000)?;

    let audio = AudioFile::open(&path)?;
    assert_eq!(audio.sample_rate, 16000);
    assert_eq!(audio.channels, 1);
    assert_eq!(audio.samples.len(), 16000);
    assert!((audio.duration_seconds - 1.0).abs() < 1e-9);
    assert!(audio.samples.iter().all(|s| (-1.0..=1.0).contains(s)));
    Ok(())
}

#[test]
fn test_audio_file_normalizes_stereo_float() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let path = temp_dir.path().join("stereo.wav");

    let spec = WavSpec {
        channels: 2,
        sample_rate: 48000,
        bits_per_sample: 32,
        sample_format: SampleFormat::Float,
    };
    let mut writer = WavWriter::create(&path, spec)?;
    for _ in 0..4800 {
        writer.write_sample(0.5f32)?;
        writer.write_sample(-0.5f32)?;
    }
    writer.finalize()?;

    let audio = AudioFile::open(&path)?;
    assert_eq!(audio.channels, 2);

    let mono = audio.to_mono(16000)?;
    assert_eq!(mono.len(), 1600);
    // Opposite channels cancel out when averaged
    assert!(mono.iter().all(|s| s.abs() < 1e-6));
    Ok(())
}

#[tokio::test]
async fn test_file_backend_feeds_capture_engine() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let path = temp_dir.path().join("prompt.wav");
    // 0.5s at 16kHz
    write_int_wav(&path, 16000, 1, 8000)?;

    let mut engine = AudioCaptureEngine::new(
        Box::new(FileBackend::new(&path).with_frame_size(400)),
        CaptureConfig {
            chunk_threshold_samples: 1600,
            ..CaptureConfig::default()
        },
    );

    let mut events = engine.open(&DeviceSelector::Default)?;

    let mut chunks = Vec::new();
    loop {
        match tokio::time::timeout(Duration::from_secs(5), events.recv()).await? {
            Some(CaptureEvent::Chunk(chunk)) => chunks.push(chunk),
            Some(CaptureEvent::Failed(e)) => panic!("capture failed: {}", e),
            // File finished and the backend released its callbacks
            None => break,
        }
    }

    assert_eq!(chunks.len(), 5);
    assert!(chunks.iter().all(|c| c.sample_count() == 1600));
    assert!(chunks.iter().all(|c| c.sample_rate == 16000));

    engine.close();
    engine.close();
    Ok(())
}

#[tokio::test]
async fn test_file_backend_resamples_to_capture_rate() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let path = temp_dir.path().join("hifi.wav");
    // 0.25s at 48kHz stereo
    write_int_wav(&path, 48000, 2, 12000)?;

    let mut engine = AudioCaptureEngine::new(
        Box::new(FileBackend::new(&path)),
        CaptureConfig {
            chunk_threshold_samples: 1000,
            ..CaptureConfig::default()
        },
    );

    let mut events = engine.open(&DeviceSelector::Default)?;

    let mut total = 0;
    while let Some(event) = tokio::time::timeout(Duration::from_secs(5), events.recv()).await? {
        if let CaptureEvent::Chunk(chunk) = event {
            total += chunk.sample_count();
        }
    }

    // 4000 samples at 16kHz: four full chunks, nothing left over
    assert_eq!(total, 4000);
    Ok(())
}

#[test]
fn test_missing_file_is_device_unavailable() {
    let mut engine = AudioCaptureEngine::new(
        Box::new(FileBackend::new("/nonexistent/input.wav")),
        CaptureConfig::default(),
    );

    let err = engine.open(&DeviceSelector::Default).unwrap_err();
    assert!(matches!(err, LiveError::DeviceUnavailable(_)));
    assert!(!engine.is_open());

    // Closing after a failed open is harmless
    engine.close();
}
