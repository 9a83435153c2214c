// Session transcript of recorded detection frames and its JSON export

use crate::models::pose::DetectionFrame;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::Path;
use tracing::info;

/// How many frames the transcript keeps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Retention {
    /// Keep every frame of the session
    #[default]
    Unbounded,
    /// Keep only the newest n frames
    Capped(usize),
}

/// Ordered, append-only record of detection frames for one session
#[derive(Debug, Clone, Default)]
pub struct Transcript {
    frames: VecDeque<DetectionFrame>,
    retention: Retention,
    evicted: u64,
}

impl Transcript {
    pub fn new(retention: Retention) -> Self {
        Self {
            frames: VecDeque::new(),
            retention,
            evicted: 0,
        }
    }

    pub fn append(&mut self, frame: DetectionFrame) {
        self.frames.push_back(frame);
        if let Retention::Capped(limit) = self.retention {
            while self.frames.len() > limit.max(1) {
                self.frames.pop_front();
                self.evicted += 1;
            }
        }
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Frames dropped by the retention cap so far
    pub fn evicted(&self) -> u64 {
        self.evicted
    }

    pub fn retention(&self) -> Retention {
        self.retention
    }

    pub fn frames(&self) -> impl Iterator<Item = &DetectionFrame> {
        self.frames.iter()
    }

    pub fn last(&self) -> Option<&DetectionFrame> {
        self.frames.back()
    }

    /// Serialize the transcript as a pretty-printed JSON array
    pub fn to_json(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec_pretty(&self.frames)
    }

    /// Write the JSON export to `path`, creating parent directories
    pub fn export_to(&self, path: &Path) -> std::io::Result<usize> {
        let bytes = self.to_json()?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, &bytes)?;
        info!(path = %path.display(), frames = self.frames.len(), "Exported transcript");
        Ok(self.frames.len())
    }
}
