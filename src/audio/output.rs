//! Audio output contexts the playback scheduler renders into.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Instant;

/// An output context with its own monotonic clock
///
/// Times are seconds on the output's clock, which starts at 0 when the
/// context opens.
pub trait AudioOutput: Send {
    /// Current playback clock in seconds.
    fn current_time(&self) -> f64;

    /// Queue mono samples to start playing at `start_at`.
    fn play_at(&mut self, start_at: f64, samples: Vec<f32>, sample_rate: u32);

    /// Drop every buffer whose start time is still in the future.
    fn discard_pending(&mut self);

    /// Release the device. Safe to call repeatedly.
    fn close(&mut self);

    fn name(&self) -> &str;
}

/// A buffer handed to a [`VirtualOutput`]
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledBuffer {
    pub start_at: f64,
    pub sample_count: usize,
    pub sample_rate: u32,
}

impl ScheduledBuffer {
    pub fn duration_secs(&self) -> f64 {
        self.sample_count as f64 / self.sample_rate as f64
    }

    pub fn end_at(&self) -> f64 {
        self.start_at + self.duration_secs()
    }
}

#[derive(Debug)]
enum VirtualClock {
    Manual(f64),
    Wall(Instant),
}

#[derive(Debug)]
struct VirtualState {
    clock: VirtualClock,
    scheduled: Vec<ScheduledBuffer>,
    discarded: usize,
    closed: bool,
}

impl VirtualState {
    fn now(&self) -> f64 {
        match &self.clock {
            VirtualClock::Manual(t) => *t,
            VirtualClock::Wall(started) => started.elapsed().as_secs_f64(),
        }
    }
}

/// Output with no device behind it
///
/// Records what would have played. The clock is either advanced by hand
/// ([`VirtualOutput::manual`]) or follows wall time ([`VirtualOutput::realtime`],
/// used for muted sessions). Clones share state, so a test can keep a handle
/// while the scheduler owns the output.
#[derive(Debug, Clone)]
pub struct VirtualOutput {
    state: Arc<Mutex<VirtualState>>,
}

impl VirtualOutput {
    pub fn manual() -> Self {
        Self::with_clock(VirtualClock::Manual(0.0))
    }

    pub fn realtime() -> Self {
        Self::with_clock(VirtualClock::Wall(Instant::now()))
    }

    fn with_clock(clock: VirtualClock) -> Self {
        Self {
            state: Arc::new(Mutex::new(VirtualState {
                clock,
                scheduled: Vec::new(),
                discarded: 0,
                closed: false,
            })),
        }
    }

    /// Move a manual clock forward. No effect on a wall clock.
    pub fn advance(&self, secs: f64) {
        let mut state = self.state.lock();
        if let VirtualClock::Manual(t) = &mut state.clock {
            *t += secs;
        }
    }

    /// Buffers scheduled and not discarded, in scheduling order. A wall-clock
    /// output keeps only those that have not finished playing.
    pub fn scheduled(&self) -> Vec<ScheduledBuffer> {
        self.state.lock().scheduled.clone()
    }

    pub fn discarded(&self) -> usize {
        self.state.lock().discarded
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }
}

impl AudioOutput for VirtualOutput {
    fn current_time(&self) -> f64 {
        self.state.lock().now()
    }

    fn play_at(&mut self, start_at: f64, samples: Vec<f32>, sample_rate: u32) {
        let mut state = self.state.lock();
        if state.closed {
            return;
        }
        // A wall clock runs for a whole session; forget what has finished
        if let VirtualClock::Wall(_) = state.clock {
            let now = state.now();
            state.scheduled.retain(|buffer| buffer.end_at() > now);
        }
        state.scheduled.push(ScheduledBuffer {
            start_at,
            sample_count: samples.len(),
            sample_rate,
        });
    }

    fn discard_pending(&mut self) {
        let mut state = self.state.lock();
        let now = state.now();
        let before = state.scheduled.len();
        state.scheduled.retain(|buffer| buffer.start_at <= now);
        state.discarded += before - state.scheduled.len();
    }

    fn close(&mut self) {
        self.state.lock().closed = true;
    }

    fn name(&self) -> &str {
        "virtual"
    }
}
