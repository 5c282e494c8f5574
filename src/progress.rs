//! Progress reporting for the in-process model backend
//!
//! Reporters are observers only. They receive `(stage, done, total)` updates
//! while the model is fetched and while an image is computed, and nothing
//! they do can change the outcome of a request. Implementations must return
//! promptly and never block.

use tokio::sync::mpsc;

/// Compute stages reported for every processed image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComputeStage {
    /// Reading and decoding the staged image
    Decode,
    /// Resizing and normalizing into the model tensor
    Preprocess,
    /// Running the model
    Inference,
    /// Mapping the output tensor back onto the image as alpha
    Mask,
    /// Encoding the result
    Encode,
}

impl ComputeStage {
    /// All stages in execution order
    pub const ALL: [ComputeStage; 5] = [
        Self::Decode,
        Self::Preprocess,
        Self::Inference,
        Self::Mask,
        Self::Encode,
    ];

    /// Short stage key
    #[must_use]
    pub fn key(self) -> &'static str {
        match self {
            Self::Decode => "decode",
            Self::Preprocess => "preprocess",
            Self::Inference => "inference",
            Self::Mask => "mask",
            Self::Encode => "encode",
        }
    }

    /// 1-based position of the stage
    #[must_use]
    pub fn position(self) -> u64 {
        match self {
            Self::Decode => 1,
            Self::Preprocess => 2,
            Self::Inference => 3,
            Self::Mask => 4,
            Self::Encode => 5,
        }
    }
}

/// A single progress observation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressUpdate {
    /// Stage name, `fetch:<file>` or `compute:<stage>`
    pub stage: String,
    /// Amount done
    pub done: u64,
    /// Amount expected in total (0 when unknown)
    pub total: u64,
}

impl ProgressUpdate {
    /// Model file download progress
    #[must_use]
    pub fn fetch(file: &str, done: u64, total: Option<u64>) -> Self {
        Self {
            stage: format!("fetch:{file}"),
            done,
            total: total.unwrap_or(0),
        }
    }

    /// Image compute stage reached
    #[must_use]
    pub fn compute(stage: ComputeStage) -> Self {
        Self {
            stage: format!("compute:{}", stage.key()),
            done: stage.position(),
            total: ComputeStage::ALL.len() as u64,
        }
    }

    /// Progress as a percentage, when the total is known
    #[must_use]
    pub fn percentage(&self) -> Option<u8> {
        if self.total == 0 {
            return None;
        }
        Some(((self.done.min(self.total) * 100) / self.total) as u8)
    }
}

/// Trait for observing progress during background removal
pub trait ProgressReporter: Send + Sync {
    /// Report a progress update
    fn report_progress(&self, update: ProgressUpdate);
}

/// Discards all progress updates
#[derive(Debug, Default)]
pub struct NoOpProgressReporter;

impl ProgressReporter for NoOpProgressReporter {
    fn report_progress(&self, _update: ProgressUpdate) {}
}

/// Emits progress updates as `tracing` debug events
#[derive(Debug, Default)]
pub struct TracingProgressReporter;

impl ProgressReporter for TracingProgressReporter {
    fn report_progress(&self, update: ProgressUpdate) {
        match update.percentage() {
            Some(percent) => tracing::debug!(
                stage = %update.stage,
                done = update.done,
                total = update.total,
                "[{}%] {}",
                percent,
                update.stage
            ),
            None => tracing::debug!(
                stage = %update.stage,
                done = update.done,
                "{} ({} so far)",
                update.stage,
                update.done
            ),
        }
    }
}

/// Forwards progress updates into a bounded channel
///
/// Updates are dropped when the channel is full or closed.
#[derive(Debug, Clone)]
pub struct ChannelProgressReporter {
    sender: mpsc::Sender<ProgressUpdate>,
}

impl ChannelProgressReporter {
    /// Create a reporter and the receiving end of its channel
    #[must_use]
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<ProgressUpdate>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self { sender }, receiver)
    }
}

impl ProgressReporter for ChannelProgressReporter {
    fn report_progress(&self, update: ProgressUpdate) {
        if self.sender.try_send(update).is_err() {
            tracing::trace!("Progress update dropped");
        }
    }
}
