pub mod archive;
pub mod auth;
pub mod cancellation;
pub mod config;
pub mod downloader;
pub mod error;
pub mod events;
pub mod launch_pipeline;
pub mod launcher;
pub mod network;
pub mod process_runner;
pub mod progress;
pub mod project_properties;
pub mod services;
pub mod settings;
pub mod stage;
pub mod storage;
pub mod update;
pub mod validator;
pub mod version;
pub mod version_resolver;
pub mod web_client;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LaunchState {
    Idle,
    CheckingUpdates,
    ResolvingVersion,
    Building,
    Downloading,
    Verifying,
    Extracting,
    Installing,
    Launching,
    Launched,
    Failed,
    Cancelled,
}

impl LaunchState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            LaunchState::Launched | LaunchState::Failed | LaunchState::Cancelled
        )
    }
}
