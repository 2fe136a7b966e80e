use serde::Serialize;
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Progress {
    pub current: u64,
    pub total: u64,
}

impl Progress {
    pub const fn new(current: u64, total: u64) -> Self {
        Self { current, total }
    }

    pub fn fraction(&self) -> f32 {
        if self.total == 0 {
            return 0.0;
        }
        (self.current as f64 / self.total as f64).clamp(0.0, 1.0) as f32
    }
}

/// Writer half of the latest-progress slot. Lives on worker threads and may
/// publish as often as it likes; only the newest value survives.
#[derive(Debug, Clone)]
pub struct ProgressPublisher {
    tx: watch::Sender<Option<Progress>>,
}

/// Reader half, owned by the stage and drained at most once per tick.
#[derive(Debug)]
pub struct ProgressSlot {
    rx: watch::Receiver<Option<Progress>>,
}

pub fn progress_slot() -> (ProgressPublisher, ProgressSlot) {
    let (tx, rx) = watch::channel(None);
    (ProgressPublisher { tx }, ProgressSlot { rx })
}

impl ProgressPublisher {
    /// Returns `false` once the reader is gone, which callers treat as a
    /// request to stop the transfer.
    pub fn publish(&self, progress: Progress) -> bool {
        self.tx.send(Some(progress)).is_ok()
    }

    pub fn is_observed(&self) -> bool {
        !self.tx.is_closed()
    }
}

impl ProgressSlot {
    /// Yields the newest unseen value, including one published just before
    /// the worker finished and dropped its publisher.
    pub fn drain(&mut self) -> Option<Progress> {
        let value = self.rx.borrow_and_update();
        if !value.has_changed() {
            return None;
        }
        *value
    }
}
