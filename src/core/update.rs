use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::core::archive::extract_to_staging;
use crate::core::cancellation::CancellationToken;
use crate::core::downloader::{
    fetch_following_redirects, HttpTransport, MAX_REDIRECT_DEPTH,
};
use crate::core::error::{LauncherError, ProcessError, UpdateError};
use crate::core::events::{EventSink, PipelineOutcome};
use crate::core::network::UpdateManifestDocument;
use crate::core::process_runner::{CommandSpec, ProcessRunner};
use crate::core::progress::{Progress, ProgressPublisher};
use crate::core::validator::SignatureVerifier;
use crate::core::LaunchState;

/// Release number of this launcher build, compared against the manifest.
pub const CURRENT_LAUNCHER_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformDownload {
    pub url: String,
    pub signature: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewVersionInfo {
    pub version: u32,
    /// Download for the platform this launcher runs on, if one is published.
    pub download: Option<PlatformDownload>,
}

impl NewVersionInfo {
    pub fn parse(bytes: &[u8]) -> Result<Self, UpdateError> {
        Self::parse_for(bytes, platform_key())
    }

    pub fn parse_for(bytes: &[u8], platform: &str) -> Result<Self, UpdateError> {
        let mut document: UpdateManifestDocument = serde_yaml::from_slice(bytes)?;
        let download = document
            .download
            .remove(platform)
            .map(|entry| PlatformDownload {
                url: entry.url,
                signature: entry.signature,
            });
        Ok(Self {
            version: document.version,
            download,
        })
    }

    pub fn is_new_version(&self) -> bool {
        self.version > CURRENT_LAUNCHER_VERSION
    }
}

/// Key under `download:` in the update manifest.
pub fn platform_key() -> &'static str {
    std::env::consts::OS
}

pub async fn check_for_update(
    transport: &dyn HttpTransport,
    manifest_url: &str,
    cancel: &CancellationToken,
) -> Result<NewVersionInfo, UpdateError> {
    let response =
        fetch_following_redirects(transport, manifest_url, MAX_REDIRECT_DEPTH, None, cancel)
            .await?;
    if !response.is_ok() {
        tracing::error!("Unable to retrieve new version info.");
        return Err(UpdateError::Http {
            status: response.status,
            url: manifest_url.to_string(),
        });
    }
    NewVersionInfo::parse(&response.body)
}

fn relaunch_script_name() -> &'static str {
    if cfg!(windows) {
        "relaunch.bat"
    } else {
        "relaunch.sh"
    }
}

/// Replaces the running launcher: download, verify, stage, hand off to the
/// relaunch script.
pub struct SelfUpdatePipeline {
    transport: Arc<dyn HttpTransport>,
    verifier: Arc<dyn SignatureVerifier>,
    runner: Arc<dyn ProcessRunner>,
    staging_dir: PathBuf,
    launcher_exe: PathBuf,
}

impl SelfUpdatePipeline {
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        verifier: Arc<dyn SignatureVerifier>,
        runner: Arc<dyn ProcessRunner>,
        staging_dir: impl Into<PathBuf>,
        launcher_exe: impl Into<PathBuf>,
    ) -> Self {
        Self {
            transport,
            verifier,
            runner,
            staging_dir: staging_dir.into(),
            launcher_exe: launcher_exe.into(),
        }
    }

    pub async fn run(
        self,
        info: NewVersionInfo,
        sink: EventSink,
        progress: ProgressPublisher,
    ) -> PipelineOutcome {
        let outcome = match self.execute(&info, &sink, &progress).await {
            Ok(outcome) => outcome,
            Err(error) if error.is_cancelled() => PipelineOutcome::Cancelled,
            Err(error) => {
                let message = error.to_string();
                sink.error(&message);
                sink.state(LaunchState::Failed);
                sink.status(&message);
                PipelineOutcome::Failed(message)
            }
        };
        sink.finish(outcome.clone());
        outcome
    }

    async fn execute(
        &self,
        info: &NewVersionInfo,
        sink: &EventSink,
        progress: &ProgressPublisher,
    ) -> Result<PipelineOutcome, LauncherError> {
        let cancel = sink.cancellation();
        let download = info
            .download
            .clone()
            .ok_or_else(|| UpdateError::NoDownloadForPlatform(platform_key().to_string()))?;

        sink.state(LaunchState::Downloading);
        sink.status("Downloading...");
        let on_progress = |current: u64, total: u64| progress.publish(Progress::new(current, total));
        let response = fetch_following_redirects(
            self.transport.as_ref(),
            &download.url,
            MAX_REDIRECT_DEPTH,
            Some(&on_progress),
            cancel,
        )
        .await
        .map_err(UpdateError::from)?;
        if !response.is_ok() {
            return Err(UpdateError::Http {
                status: response.status,
                url: download.url,
            }
            .into());
        }
        if response.body.is_empty() {
            return Err(UpdateError::EmptyPayload.into());
        }

        sink.state(LaunchState::Verifying);
        sink.status("Verifying...");
        self.verifier.verify(&response.body, &download.signature)?;

        sink.state(LaunchState::Extracting);
        sink.status("Extracting...");
        let staging = self.staging_dir.clone();
        let bytes = response.body;
        let extract_cancel = cancel.clone();
        let publisher = progress.clone();
        let files = tokio::task::spawn_blocking(move || {
            prepare_staging(&staging)?;
            extract_to_staging(&bytes, &staging, &extract_cancel, &mut |p| {
                publisher.publish(p);
            })
            .map_err(UpdateError::from)
        })
        .await??;
        sink.info(format!(
            "Staged {files} files for launcher version {}",
            info.version
        ));

        if cancel.is_cancelled() {
            return Err(LauncherError::Cancelled);
        }

        sink.state(LaunchState::Launching);
        sink.status("Restarting...");
        let command = self.relaunch_command()?;
        self.runner
            .spawn_detached(&command)
            .map_err(UpdateError::from)?;
        Ok(PipelineOutcome::UpdateHandedOff)
    }

    fn relaunch_command(&self) -> Result<CommandSpec, UpdateError> {
        let install_dir = self
            .launcher_exe
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        let script = install_dir.join(relaunch_script_name());
        if !script.is_file() {
            return Err(ProcessError::RelaunchScriptNotFound(script).into());
        }

        let command = if cfg!(windows) {
            CommandSpec::new(&script)
        } else {
            CommandSpec::new("sh").arg(script.to_string_lossy())
        };
        Ok(command
            .arg("--source")
            .arg(self.staging_dir.to_string_lossy())
            .arg("--target")
            .arg(install_dir.to_string_lossy())
            .arg("--pid")
            .arg(std::process::id().to_string())
            .arg("--restart")
            .arg(self.launcher_exe.to_string_lossy())
            .current_dir(&install_dir))
    }
}

fn prepare_staging(staging: &Path) -> Result<(), UpdateError> {
    let staging_error = |source| UpdateError::Staging {
        path: staging.to_path_buf(),
        source,
    };
    if staging.exists() {
        fs::remove_dir_all(staging).map_err(staging_error)?;
    }
    fs::create_dir_all(staging).map_err(staging_error)
}
