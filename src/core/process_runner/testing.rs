use std::sync::Mutex;

use async_trait::async_trait;

use super::{CommandSpec, ProcessRunner};
use crate::core::cancellation::CancellationToken;
use crate::core::error::ProcessError;

/// Records commands instead of running them.
pub(crate) struct RecordingRunner {
    exit_code: i32,
    output: Vec<String>,
    fail_detached: bool,
    runs: Mutex<Vec<CommandSpec>>,
    detached: Mutex<Vec<CommandSpec>>,
}

impl RecordingRunner {
    pub(crate) fn new(exit_code: i32) -> Self {
        Self {
            exit_code,
            output: Vec::new(),
            fail_detached: false,
            runs: Mutex::new(Vec::new()),
            detached: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn with_output(mut self, lines: &[&str]) -> Self {
        self.output = lines.iter().map(|line| line.to_string()).collect();
        self
    }

    pub(crate) fn failing_detached(mut self) -> Self {
        self.fail_detached = true;
        self
    }

    pub(crate) fn runs(&self) -> Vec<CommandSpec> {
        self.runs.lock().expect("runs lock").clone()
    }

    pub(crate) fn detached(&self) -> Vec<CommandSpec> {
        self.detached.lock().expect("detached lock").clone()
    }
}

#[async_trait]
impl ProcessRunner for RecordingRunner {
    async fn run(
        &self,
        command: &CommandSpec,
        on_line: &(dyn for<'a> Fn(&'a str) + Send + Sync),
        cancel: &CancellationToken,
    ) -> Result<i32, ProcessError> {
        if cancel.is_cancelled() {
            return Err(ProcessError::Cancelled);
        }
        self.runs.lock().expect("runs lock").push(command.clone());
        for line in &self.output {
            on_line(line);
        }
        Ok(self.exit_code)
    }

    fn spawn_detached(&self, command: &CommandSpec) -> Result<u32, ProcessError> {
        if self.fail_detached {
            return Err(ProcessError::Spawn {
                program: command.program.clone(),
                source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
            });
        }
        self.detached.lock().expect("detached lock").push(command.clone());
        Ok(4242)
    }
}
