use std::path::PathBuf;

use chrono::{DateTime, Local};
use serde::Serialize;
use tokio::sync::mpsc;

use crate::core::cancellation::CancellationToken;
use crate::core::settings::ProjectParams;
use crate::core::LaunchState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum LogLevel {
    Dev,
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogLine {
    pub timestamp: DateTime<Local>,
    pub level: LogLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineOutcome {
    /// Editor spawned; the launcher should persist and exit.
    Launched { project: PathBuf },
    /// Relaunch script spawned; the launcher must exit so it can be replaced.
    UpdateHandedOff,
    /// Nothing to launch here; show the project list again.
    ReturnToProjectSelection,
    Failed(String),
    Cancelled,
}

#[derive(Debug, Clone)]
pub enum PipelineEvent {
    State(LaunchState),
    Status(String),
    Log(LogLine),
    /// Registry mutation requested from a worker; applied on the update thread.
    RegisterProject { path: PathBuf, params: ProjectParams },
    Finished(PipelineOutcome),
}

pub type EventReceiver = mpsc::UnboundedReceiver<PipelineEvent>;

/// Posting half of the presentation layer's event queue, bound to the
/// cancellation token of the view that started the pipeline. Once that token
/// is cancelled every post is dropped.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<PipelineEvent>,
    cancel: CancellationToken,
}

pub fn event_queue(cancel: CancellationToken) -> (EventSink, EventReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (EventSink { tx, cancel }, rx)
}

impl EventSink {
    pub fn new(tx: mpsc::UnboundedSender<PipelineEvent>, cancel: CancellationToken) -> Self {
        Self { tx, cancel }
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn post(&self, event: PipelineEvent) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }
        self.tx.send(event).is_ok()
    }

    pub fn state(&self, state: LaunchState) {
        tracing::debug!(?state, "pipeline state");
        self.post(PipelineEvent::State(state));
    }

    pub fn status(&self, message: impl Into<String>) {
        self.post(PipelineEvent::Status(message.into()));
    }

    pub fn log(&self, level: LogLevel, message: impl Into<String>) {
        let message = message.into();
        match level {
            LogLevel::Dev => tracing::debug!("{message}"),
            LogLevel::Info => tracing::info!("{message}"),
            LogLevel::Warning => tracing::warn!("{message}"),
            LogLevel::Error => tracing::error!("{message}"),
        }
        self.post(PipelineEvent::Log(LogLine {
            timestamp: Local::now(),
            level,
            message,
        }));
    }

    pub fn info(&self, message: impl Into<String>) {
        self.log(LogLevel::Info, message);
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.log(LogLevel::Warning, message);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.log(LogLevel::Error, message);
    }

    pub fn finish(&self, outcome: PipelineOutcome) {
        self.post(PipelineEvent::Finished(outcome));
    }

    /// Raw queue handle, bypassing the cancellation check.
    #[cfg(test)]
    pub(crate) fn sender(&self) -> mpsc::UnboundedSender<PipelineEvent> {
        self.tx.clone()
    }
}
