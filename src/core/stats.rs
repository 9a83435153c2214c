// Rolling frame-rate and latency statistics

use crate::platform::process;
use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;

/// Number of recent steps averaged into the smoothed FPS
pub const FPS_WINDOW: usize = 30;

/// Sliding window of per-step frame rates
#[derive(Debug, Clone)]
pub struct FpsWindow {
    samples: VecDeque<f64>,
    capacity: usize,
}

impl Default for FpsWindow {
    fn default() -> Self {
        Self::new(FPS_WINDOW)
    }
}

impl FpsWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Record one step latency
    pub fn push(&mut self, latency_ms: f64) {
        let fps = if latency_ms > 0.0 { 1000.0 / latency_ms } else { 0.0 };
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(fps);
    }

    /// Arithmetic mean of the window, 0 when empty
    pub fn smoothed(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        self.samples.iter().sum::<f64>() / self.samples.len() as f64
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }
}

/// Statistics handed to sinks with every recorded frame
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LoopStats {
    pub fps: f64,
    pub frame_latency_ms: f64,
    pub resident_memory_mb: Option<f64>,
    pub frames_recorded: usize,
}

impl LoopStats {
    pub fn sample(window: &FpsWindow, frame_latency_ms: f64, frames_recorded: usize) -> Self {
        Self {
            fps: window.smoothed(),
            frame_latency_ms,
            resident_memory_mb: process::resident_memory_mb(),
            frames_recorded,
        }
    }
}

impl fmt::Display for LoopStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "FPS: {:.1} | Frame latency: {:.1} ms | Memory: ",
            self.fps, self.frame_latency_ms
        )?;
        match self.resident_memory_mb {
            Some(mb) => write!(f, "{:.1} MB", mb),
            None => write!(f, "n/a"),
        }
    }
}
