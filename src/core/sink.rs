// Frame sinks: consumers of detection results, errors and user notices

use crate::core::coordinator::{CoordinatorError, ErrorClass};
use crate::core::renderer::RenderSurface;
use crate::core::stats::LoopStats;
use crate::models::pose::DetectionFrame;
use serde::Serialize;
use std::fmt;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// Short user-facing message
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "level", content = "message", rename_all = "snake_case")]
pub enum Notice {
    Info(String),
    Warning(String),
}

impl Notice {
    pub fn info(message: impl Into<String>) -> Self {
        Notice::Info(message.into())
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Notice::Warning(message.into())
    }

    pub fn message(&self) -> &str {
        match self {
            Notice::Info(message) | Notice::Warning(message) => message,
        }
    }
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

/// Consumer of everything the coordinator produces
pub trait FrameSink: Send {
    /// A detection frame was recorded; `surface` already carries the overlay
    fn on_frame(&mut self, frame: &DetectionFrame, stats: &LoopStats, surface: &RenderSurface);

    fn on_error(&mut self, error: &CoordinatorError);

    fn on_notice(&mut self, notice: &Notice) {
        let _ = notice;
    }
}

/// Logs every event through `tracing`
#[derive(Debug, Default)]
pub struct TracingSink;

impl FrameSink for TracingSink {
    fn on_frame(&mut self, frame: &DetectionFrame, stats: &LoopStats, _surface: &RenderSurface) {
        info!(
            variant = %frame.variant,
            poses = frame.poses.len(),
            latency_ms = format_args!("{:.1}", frame.frame_latency_ms),
            "{}",
            stats
        );
    }

    fn on_error(&mut self, error: &CoordinatorError) {
        error!(class = ?error.class(), "{}", error);
    }

    fn on_notice(&mut self, notice: &Notice) {
        match notice {
            Notice::Info(message) => info!("{}", message),
            Notice::Warning(message) => warn!("{}", message),
        }
    }
}

/// Event forwarded by `ChannelSink`
#[derive(Debug, Clone)]
pub enum SinkEvent {
    Frame {
        frame: DetectionFrame,
        stats: LoopStats,
    },
    Error {
        class: ErrorClass,
        message: String,
    },
    Notice(Notice),
}

/// Forwards events over an unbounded channel, e.g. to a UI task
#[derive(Debug)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<SinkEvent>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<SinkEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl FrameSink for ChannelSink {
    fn on_frame(&mut self, frame: &DetectionFrame, stats: &LoopStats, _surface: &RenderSurface) {
        let _ = self.tx.send(SinkEvent::Frame {
            frame: frame.clone(),
            stats: *stats,
        });
    }

    fn on_error(&mut self, error: &CoordinatorError) {
        let _ = self.tx.send(SinkEvent::Error {
            class: error.class(),
            message: error.to_string(),
        });
    }

    fn on_notice(&mut self, notice: &Notice) {
        let _ = self.tx.send(SinkEvent::Notice(notice.clone()));
    }
}
