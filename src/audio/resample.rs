//! Mono resampling on rubato's FFT resampler.
//!
//! Every rate conversion in the crate goes through here: capture (device
//! rate to the send rate), playback (message rate to the device rate) and
//! WAV files replayed as a microphone.

use rubato::{FftFixedIn, Resampler};

use crate::error::LiveError;

/// Input frames rubato consumes per call
const CHUNK_FRAMES: usize = 1024;
const SUB_CHUNKS: usize = 2;

/// Upper bound on silence blocks fed to push a whole buffer through
const MAX_FLUSH_BLOCKS: usize = 32;

fn resampler_error(err: impl std::fmt::Display) -> LiveError {
    LiveError::Device(format!("resampler: {}", err))
}

/// Resamples one mono stream block by block
///
/// Input is buffered until rubato's next chunk is full, so callers may push
/// frames of any size. The filter delay is trimmed from the start of the
/// stream: output sample 0 lines up with input sample 0.
pub struct StreamResampler {
    /// None when both rates match
    inner: Option<FftFixedIn<f32>>,
    pending: Vec<f32>,
    skip: usize,
}

impl StreamResampler {
    pub fn new(from_rate: u32, to_rate: u32) -> Result<Self, LiveError> {
        let from_rate = from_rate.max(1);
        let to_rate = to_rate.max(1);

        if from_rate == to_rate {
            return Ok(Self {
                inner: None,
                pending: Vec::new(),
                skip: 0,
            });
        }

        let inner = FftFixedIn::<f32>::new(
            from_rate as usize,
            to_rate as usize,
            CHUNK_FRAMES,
            SUB_CHUNKS,
            1,
        )
        .map_err(resampler_error)?;

        Ok(Self {
            skip: inner.output_delay(),
            pending: Vec::with_capacity(CHUNK_FRAMES * 2),
            inner: Some(inner),
        })
    }

    pub fn is_passthrough(&self) -> bool {
        self.inner.is_none()
    }

    /// Resample one block, appending whatever output is ready to `out`.
    pub fn process(&mut self, input: &[f32], out: &mut Vec<f32>) -> Result<(), LiveError> {
        let Some(inner) = self.inner.as_mut() else {
            out.extend_from_slice(input);
            return Ok(());
        };

        self.pending.extend_from_slice(input);

        let mut consumed = 0;
        loop {
            let needed = inner.input_frames_next();
            if self.pending.len() - consumed < needed {
                break;
            }

            let block = [&self.pending[consumed..consumed + needed]];
            let frames = inner.process(&block, None).map_err(resampler_error)?;
            consumed += needed;

            let produced = &frames[0];
            let trim = self.skip.min(produced.len());
            self.skip -= trim;
            out.extend_from_slice(&produced[trim..]);
        }

        self.pending.drain(..consumed);
        Ok(())
    }
}

/// Resample a complete buffer to exactly `round(len * to / from)` samples.
pub fn resample_buffer(samples: &[f32], from_rate: u32, to_rate: u32) -> Result<Vec<f32>, LiveError> {
    if from_rate == to_rate || samples.is_empty() {
        return Ok(samples.to_vec());
    }

    let expected =
        (samples.len() as f64 * to_rate as f64 / from_rate.max(1) as f64).round() as usize;

    let mut resampler = StreamResampler::new(from_rate, to_rate)?;
    let mut out = Vec::with_capacity(expected + CHUNK_FRAMES);
    resampler.process(samples, &mut out)?;

    // Trailing silence pushes the last partial chunk through the filter
    let silence = [0.0f32; CHUNK_FRAMES];
    let mut blocks = 0;
    while out.len() < expected && blocks < MAX_FLUSH_BLOCKS {
        resampler.process(&silence, &mut out)?;
        blocks += 1;
    }

    out.resize(expected, 0.0);
    Ok(out)
}
