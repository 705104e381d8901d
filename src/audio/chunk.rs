
use super::pcm;

/// A buffer of mono PCM16 audio on its way to or from the network.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioChunk {
    /// Raw samples, PCM16 little-endian
    pub data: Vec<u8>,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Number of channels (always 1)
    pub channels: u16,
    /// Capture order (outbound) or arrival order (inbound)
    pub sequence: u64,
}

impl AudioChunk {
    pub fn new(data: Vec<u8>, sample_rate: u32, sequence: u64) -> Self {
        Self {
            data,
            sample_rate,
            channels: 1,
            sequence,
        }
    }

    /// Build a chunk from float samples, converting them to PCM16.
    pub fn from_samples(samples: &[f32], sample_rate: u32, sequence: u64) -> Self {
        Self::new(pcm::encode_pcm16(samples), sample_rate, sequence)
    }

    pub fn sample_count(&self) -> usize {
        self.data.len() / 2
    }

    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.sample_count() as f64 / self.sample_rate as f64
    }

    pub fn to_samples(&self) -> Vec<f32> {
        pcm::decode_pcm16(&self.data)
    }
}

/// Chunking configuration
#[derive(Debug, Clone)]
pub struct ChunkConfig {
    /// Samples per emitted chunk (default: 4096 = 256ms at 16kHz)
    pub threshold_samples: usize,
    /// Sample rate of the frames being accumulated
    pub sample_rate: u32,
}

impl ChunkConfig {
    pub fn new(threshold_samples: usize, sample_rate: u32) -> Self {
        Self {
            threshold_samples: threshold_samples.max(1),
            sample_rate,
        }
    }

    /// Chunk duration in milliseconds
    pub fn chunk_duration_ms(&self) -> u64 {
        (self.threshold_samples as u64 * 1000) / self.sample_rate.max(1) as u64
    }
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self::new(4096, 16000)
    }
}

/// Accumulates small capture frames into fixed-size PCM16 chunks
///
/// Every emitted chunk holds exactly `threshold_samples` samples; anything
/// short of a full chunk stays pending until more frames arrive.
#[derive(Debug)]
pub struct ChunkAccumulator {
    config: ChunkConfig,
    pending: Vec<f32>,
    next_sequence: u64,
}

impl ChunkAccumulator {
    pub fn new(config: ChunkConfig) -> Self {
        let pending = Vec::with_capacity(config.threshold_samples * 2);
        Self {
            config,
            pending,
            next_sequence: 0,
        }
    }

    /// Append a frame and emit every chunk that became complete.
    pub fn push<F>(&mut self, frame: &[f32], mut emit: F)
    where
        F: FnMut(AudioChunk),
    {
        self.pending.extend_from_slice(frame);

        let threshold = self.config.threshold_samples;
        if self.pending.len() < threshold {
            return;
        }

        let full = self.pending.len() / threshold * threshold;
        for block in self.pending[..full].chunks_exact(threshold) {
            emit(AudioChunk::from_samples(
                block,
                self.config.sample_rate,
                self.next_sequence,
            ));
            self.next_sequence += 1;
        }
        self.pending.drain(..full);
    }

    pub fn pending_samples(&self) -> usize {
        self.pending.len()
    }
}
