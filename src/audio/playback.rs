use std::collections::VecDeque;
use tracing::{debug, info};

use super::chunk::AudioChunk;
use super::output::AudioOutput;

/// Where a chunk landed on the output timeline
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledPlayback {
    pub start_at: f64,
    pub duration: f64,
}

impl ScheduledPlayback {
    pub fn end_at(&self) -> f64 {
        self.start_at + self.duration
    }
}

/// Schedules inbound audio back-to-back on an output clock
///
/// Each chunk starts at `max(now, next_start_time)` and pushes the cursor to
/// its own end, so chunks never overlap and never wait behind a stale
/// schedule after an underrun. The cursor is private; callers only schedule,
/// reset or interrupt.
pub struct PlaybackScheduler {
    output: Box<dyn AudioOutput>,
    /// 0.0 means unset
    next_start_time: f64,
    /// Windows of buffers that may still be playing
    windows: VecDeque<ScheduledPlayback>,
}

impl PlaybackScheduler {
    pub fn new(output: Box<dyn AudioOutput>) -> Self {
        info!("Playback scheduler ready on {} output", output.name());
        Self {
            output,
            next_start_time: 0.0,
            windows: VecDeque::new(),
        }
    }

    /// Decode a chunk and schedule it after everything already queued.
    ///
    /// The chunk's own sample rate is used for both the buffer and its
    /// duration. Empty chunks are skipped.
    pub fn schedule(&mut self, chunk: &AudioChunk) -> Option<ScheduledPlayback> {
        if chunk.sample_rate == 0 {
            debug!("Skipping chunk {} with zero sample rate", chunk.sequence);
            return None;
        }

        let samples = chunk.to_samples();
        if samples.is_empty() {
            return None;
        }

        let duration = samples.len() as f64 / chunk.sample_rate as f64;
        let now = self.output.current_time();
        let start_at = now.max(self.next_start_time);

        self.output.play_at(start_at, samples, chunk.sample_rate);
        self.next_start_time = start_at + duration;

        let scheduled = ScheduledPlayback { start_at, duration };
        self.prune(now);
        self.windows.push_back(scheduled);

        debug!(
            "Scheduled chunk {} at {:.3}s for {:.3}s ({}Hz)",
            chunk.sequence, start_at, duration, chunk.sample_rate
        );

        Some(scheduled)
    }

    /// Forget the timeline and drop buffers that have not started.
    ///
    /// Called at every session start and during teardown.
    pub fn reset(&mut self) {
        self.output.discard_pending();
        self.next_start_time = 0.0;
        self.windows.clear();
    }

    /// Barge-in: drop buffers not yet started and pull the cursor back to now.
    pub fn interrupt(&mut self) {
        let now = self.output.current_time();
        self.output.discard_pending();
        self.windows.retain(|w| w.start_at <= now);
        self.next_start_time = self
            .windows
            .back()
            .map(|w| w.end_at())
            .unwrap_or(0.0)
            .max(0.0);
        debug!("Playback interrupted at {:.3}s", now);
    }

    /// True while some scheduled buffer covers the current clock time.
    pub fn is_speaking(&self) -> bool {
        let now = self.output.current_time();
        self.windows
            .iter()
            .any(|w| w.start_at <= now && now < w.end_at())
    }

    /// Seconds of audio queued beyond the current clock.
    pub fn buffered_secs(&self) -> f64 {
        (self.next_start_time - self.output.current_time()).max(0.0)
    }

    pub fn current_time(&self) -> f64 {
        self.output.current_time()
    }

    /// Release the output context.
    pub fn close_output(&mut self) {
        self.output.close();
    }

    fn prune(&mut self, now: f64) {
        while let Some(front) = self.windows.front() {
            if front.end_at() <= now {
                self.windows.pop_front();
            } else {
                break;
            }
        }
    }
}
