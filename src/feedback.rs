use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Progress, messages and cancellation for one append run.
///
/// Purely advisory: the run only reads `is_canceled` back.
pub trait Feedback {
    fn is_canceled(&self) -> bool {
        false
    }

    /// Percentage in `0..=100`.
    fn set_progress(&mut self, percent: u8);

    fn push_info(&mut self, message: &str);

    fn report_error(&mut self, message: &str);
}

/// Shared cancellation switch, cheap to clone into another thread.
#[derive(Clone, Debug, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_canceled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Forwards everything to `tracing`.
#[derive(Debug, Default)]
pub struct LogFeedback {
    cancel: CancellationFlag,
    last_progress: Option<u8>,
}

impl LogFeedback {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cancellation(cancel: CancellationFlag) -> Self {
        Self {
            cancel,
            last_progress: None,
        }
    }

    pub fn cancellation(&self) -> CancellationFlag {
        self.cancel.clone()
    }
}

impl Feedback for LogFeedback {
    fn is_canceled(&self) -> bool {
        self.cancel.is_canceled()
    }

    fn set_progress(&mut self, percent: u8) {
        // One line per percent step at most.
        if self.last_progress != Some(percent) {
            self.last_progress = Some(percent);
            tracing::debug!(percent, "append progress");
        }
    }

    fn push_info(&mut self, message: &str) {
        tracing::info!("{message}");
    }

    fn report_error(&mut self, message: &str) {
        tracing::error!("{message}");
    }
}
