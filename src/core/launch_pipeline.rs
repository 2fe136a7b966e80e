use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use crate::core::archive::{install_archive, open_archive};
use crate::core::auth::RemoteCredentials;
use crate::core::error::{LauncherError, ProcessError};
use crate::core::events::{EventSink, LogLevel, PipelineOutcome};
use crate::core::launcher::{build_command, EditorLaunchPlan, SAFE_MODE_MIN_VERSION};
use crate::core::process_runner::ProcessRunner;
use crate::core::progress::{Progress, ProgressPublisher};
use crate::core::project_properties::{get_properties, ProjectPaths, ProjectProperties};
use crate::core::settings::ProjectLocation;
use crate::core::version::HalleyVersion;
use crate::core::version_resolver::{plan_acquisition, AcquisitionPlan};
use crate::core::web_client::RemoteProjectClient;
use crate::core::LaunchState;

#[derive(Debug, Clone)]
pub struct LaunchRequest {
    pub location: ProjectLocation,
    pub safe_mode: bool,
}

/// Gets a project's editor onto disk (build or download) and starts it.
pub struct AcquisitionPipeline {
    client: Arc<RemoteProjectClient>,
    runner: Arc<dyn ProcessRunner>,
    launcher_exe: PathBuf,
}

impl AcquisitionPipeline {
    pub fn new(
        client: Arc<RemoteProjectClient>,
        runner: Arc<dyn ProcessRunner>,
        launcher_exe: impl Into<PathBuf>,
    ) -> Self {
        Self {
            client,
            runner,
            launcher_exe: launcher_exe.into(),
        }
    }

    /// Never fails: every error ends as a logged, terminal outcome that is
    /// also posted to the event queue.
    pub async fn run(
        self,
        request: LaunchRequest,
        sink: EventSink,
        progress: ProgressPublisher,
    ) -> PipelineOutcome {
        let outcome = match self.execute(&request, &sink, &progress).await {
            Ok(outcome) => outcome,
            Err(error) if error.is_cancelled() => {
                sink.state(LaunchState::Cancelled);
                PipelineOutcome::Cancelled
            }
            Err(error) => {
                let message = error.to_string();
                sink.error(&message);
                sink.state(LaunchState::Failed);
                PipelineOutcome::Failed(message)
            }
        };
        sink.finish(outcome.clone());
        outcome
    }

    async fn execute(
        &self,
        request: &LaunchRequest,
        sink: &EventSink,
        progress: &ProgressPublisher,
    ) -> Result<PipelineOutcome, LauncherError> {
        let location = &request.location;
        let remote_tracked = location.is_remote_tracked();

        if remote_tracked {
            sink.state(LaunchState::CheckingUpdates);
            sink.status("Checking for updates...");
            self.sync_remote(location, sink).await;
            if sink.cancellation().is_cancelled() {
                return Err(LauncherError::Cancelled);
            }
        }

        sink.state(LaunchState::ResolvingVersion);
        let Some(properties) = get_properties(location, false) else {
            sink.warn(format!(
                "No project found at {}",
                location.path.display()
            ));
            return Ok(PipelineOutcome::ReturnToProjectSelection);
        };

        let plan = plan_acquisition(&properties, remote_tracked);
        sink.log(
            LogLevel::Dev,
            format!(
                "Project '{}' requires {}, built {}: {}",
                properties.name,
                properties.required_version,
                properties.built_version,
                plan.describe()
            ),
        );

        match plan {
            AcquisitionPlan::Launch => {}
            AcquisitionPlan::Build { clean } => self.build(&properties, clean, sink).await?,
            AcquisitionPlan::Download { version } => {
                self.download_and_install(&properties, version, sink, progress)
                    .await?
            }
        }

        if sink.cancellation().is_cancelled() {
            return Err(LauncherError::Cancelled);
        }
        self.launch(&properties, request.safe_mode, sink)
    }

    async fn sync_remote(&self, location: &ProjectLocation, sink: &EventSink) {
        let Some(credentials) = RemoteCredentials::from_params(&location.params) else {
            sink.warn("Remote project has incomplete connection settings, using local copy");
            return;
        };
        if self
            .client
            .update_project_data(&credentials, sink)
            .await
            .is_none()
        {
            sink.warn(format!(
                "Unable to sync project '{}' from {}, using local copy",
                credentials.project,
                credentials.base_url()
            ));
        }
    }

    async fn build(
        &self,
        properties: &ProjectProperties,
        clean: bool,
        sink: &EventSink,
    ) -> Result<(), LauncherError> {
        sink.state(LaunchState::Building);
        sink.status("Building...");

        let command = build_command(&properties.path, clean)?;
        sink.info(format!("Running {}", command.display()));
        let on_line = |line: &str| sink.log(LogLevel::Dev, line);
        let code = self
            .runner
            .run(&command, &on_line, sink.cancellation())
            .await?;
        if code != 0 {
            return Err(ProcessError::BuildFailed(code).into());
        }
        sink.info("Build successful.");
        Ok(())
    }

    async fn download_and_install(
        &self,
        properties: &ProjectProperties,
        version: HalleyVersion,
        sink: &EventSink,
        progress: &ProgressPublisher,
    ) -> Result<(), LauncherError> {
        let cancel = sink.cancellation();

        sink.state(LaunchState::Downloading);
        sink.status("Downloading...");
        let url = self.client.editor_archive_url(version);
        sink.info(format!("Downloading editor {version} from {url}"));
        let on_progress = |current: u64, total: u64| progress.publish(Progress::new(current, total));
        let bytes = self
            .client
            .download_editor_archive(version, Some(&on_progress), cancel)
            .await;
        if cancel.is_cancelled() {
            return Err(LauncherError::Cancelled);
        }
        if bytes.is_empty() {
            return Err(LauncherError::Download { url });
        }

        sink.state(LaunchState::Verifying);
        sink.status("Verifying...");
        open_archive(&bytes)?;

        sink.state(LaunchState::Extracting);
        sink.status("Extracting...");
        let paths = ProjectPaths::new(&properties.path);
        let engine_dir = paths.engine_dir();
        let marker = paths.built_version_file();
        let install_cancel = cancel.clone();
        let publisher = progress.clone();
        let written = tokio::task::spawn_blocking(move || {
            install_archive(&bytes, &engine_dir, &install_cancel, &mut |p| {
                publisher.publish(p);
            })
        })
        .await??;

        sink.state(LaunchState::Installing);
        sink.status("Installing...");
        if let Some(parent) = marker.parent() {
            fs::create_dir_all(parent).map_err(|source| LauncherError::Write {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        fs::write(&marker, version.to_string()).map_err(|source| LauncherError::Write {
            path: marker.clone(),
            source,
        })?;
        sink.info(format!("Installed editor {version} ({written} bytes)"));
        Ok(())
    }

    fn launch(
        &self,
        properties: &ProjectProperties,
        safe_mode: bool,
        sink: &EventSink,
    ) -> Result<PipelineOutcome, LauncherError> {
        sink.state(LaunchState::Launching);
        sink.status("Launching...");

        let safe_mode = if safe_mode && properties.required_version < SAFE_MODE_MIN_VERSION {
            sink.warn(format!(
                "Safe mode needs Halley {SAFE_MODE_MIN_VERSION} or newer, launching normally"
            ));
            false
        } else {
            safe_mode
        };

        let plan = EditorLaunchPlan::new(&properties.path, &self.launcher_exe, safe_mode);
        let command = plan.command()?;
        self.runner.spawn_detached(&command)?;
        sink.state(LaunchState::Launched);
        Ok(PipelineOutcome::Launched {
            project: properties.path.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;
    use crate::core::archive::fixtures::zip_bytes;
    use crate::core::cancellation::CancellationToken;
    use crate::core::downloader::testing::ScriptedTransport;
    use crate::core::downloader::HttpResponse;
    use crate::core::events::{event_queue, EventReceiver, PipelineEvent};
    use crate::core::process_runner::testing::RecordingRunner;
    use crate::core::progress::progress_slot;
    use crate::core::settings::ProjectParams;

    fn write(path: PathBuf, contents: &[u8]) {
        fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        fs::write(path, contents).expect("write");
    }

    fn project(root: &Path, required: &str, built: Option<&str>) -> ProjectPaths {
        let paths = ProjectPaths::new(root);
        write(
            paths.properties_file(),
            format!("name: Demo\nhalleyVersion: {required}\n").as_bytes(),
        );
        if let Some(built) = built {
            write(paths.editor_executable(), b"");
            write(paths.built_version_file(), built.as_bytes());
        }
        paths
    }

    fn remote_location(root: &Path) -> ProjectLocation {
        // No credentials beyond the url, so the sync step is skipped with a
        // warning and no request is spent on it.
        ProjectLocation::new(
            root,
            ProjectParams::from([("url".to_string(), "https://hub.test".to_string())]),
        )
    }

    fn pipeline(transport: Arc<ScriptedTransport>, runner: Arc<RecordingRunner>, data: &Path) -> AcquisitionPipeline {
        let client = RemoteProjectClient::new(
            transport,
            data.join("projects"),
            "https://update.test/editor-bins",
        );
        AcquisitionPipeline::new(Arc::new(client), runner, "/opt/halley/halley-launcher")
    }

    fn states(rx: &mut EventReceiver) -> Vec<LaunchState> {
        let mut states = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let PipelineEvent::State(state) = event {
                states.push(state);
            }
        }
        states
    }

    async fn run(
        pipeline: AcquisitionPipeline,
        location: ProjectLocation,
        safe_mode: bool,
    ) -> (PipelineOutcome, EventReceiver) {
        let (sink, rx) = event_queue(CancellationToken::new());
        let (publisher, _slot) = progress_slot();
        let outcome = pipeline
            .run(LaunchRequest { location, safe_mode }, sink, publisher)
            .await;
        (outcome, rx)
    }

    #[tokio::test]
    async fn up_to_date_project_launches_without_build_or_download() {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = dir.path().join("game");
        let paths = project(&root, "1.2.3", Some("1.2.3"));
        let transport = Arc::new(ScriptedTransport::new(Vec::new()));
        let runner = Arc::new(RecordingRunner::new(0));

        let (outcome, mut rx) = run(
            pipeline(transport.clone(), runner.clone(), dir.path()),
            ProjectLocation::local(&root),
            false,
        )
        .await;

        assert_eq!(outcome, PipelineOutcome::Launched { project: root.clone() });
        assert!(transport.requests().is_empty());
        assert!(runner.runs().is_empty());
        let detached = runner.detached();
        assert_eq!(detached.len(), 1);
        assert_eq!(detached[0].program, paths.editor_executable());
        assert_eq!(
            states(&mut rx),
            [
                LaunchState::ResolvingVersion,
                LaunchState::Launching,
                LaunchState::Launched
            ]
        );
    }

    #[tokio::test]
    async fn remote_project_with_empty_download_fails_before_extraction() {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = dir.path().join("game");
        let paths = project(&root, "1.2.3", Some("1.0.0"));
        let transport = Arc::new(ScriptedTransport::new(vec![HttpResponse::new(200, Vec::new())]));
        let runner = Arc::new(RecordingRunner::new(0));

        let (outcome, mut rx) = run(
            pipeline(transport.clone(), runner.clone(), dir.path()),
            remote_location(&root),
            false,
        )
        .await;

        let url = "https://update.test/editor-bins/editor-1.2.3.zip";
        assert_eq!(outcome, PipelineOutcome::Failed(format!("Unable to download editor from {url}")));
        assert_eq!(transport.requested_urls(), [url]);
        let states = states(&mut rx);
        assert!(states.contains(&LaunchState::Downloading));
        assert!(!states.contains(&LaunchState::Extracting));
        assert_eq!(states.last(), Some(&LaunchState::Failed));
        assert_eq!(
            fs::read_to_string(paths.built_version_file()).expect("marker"),
            "1.0.0"
        );
        assert!(runner.detached().is_empty());
    }

    #[tokio::test]
    async fn remote_project_downloads_installs_and_launches() {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = dir.path().join("game");
        let paths = project(&root, "1.2.3", None);
        let archive = zip_bytes(&[
            ("bin/halley-editor", b"editor"),
            ("bin/halley-editor.exe", b"editor"),
            ("include/halley_version.hpp", b"#define HALLEY_VERSION_MAJOR 1\n#define HALLEY_VERSION_MINOR 2\n#define HALLEY_VERSION_REVISION 3\n"),
        ]);
        let transport = Arc::new(ScriptedTransport::new(vec![HttpResponse::new(200, archive)]));
        let runner = Arc::new(RecordingRunner::new(0));

        let (outcome, mut rx) = run(
            pipeline(transport, runner.clone(), dir.path()),
            remote_location(&root),
            false,
        )
        .await;

        assert_eq!(outcome, PipelineOutcome::Launched { project: root.clone() });
        assert_eq!(
            fs::read_to_string(paths.built_version_file()).expect("marker"),
            "1.2.3"
        );
        assert_eq!(fs::read(paths.editor_executable()).expect("editor"), b"editor");
        assert_eq!(
            states(&mut rx),
            [
                LaunchState::CheckingUpdates,
                LaunchState::ResolvingVersion,
                LaunchState::Downloading,
                LaunchState::Verifying,
                LaunchState::Extracting,
                LaunchState::Installing,
                LaunchState::Launching,
                LaunchState::Launched,
            ]
        );
        assert_eq!(runner.detached().len(), 1);
    }

    #[tokio::test]
    async fn unreadable_archive_is_rejected_at_verification() {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = dir.path().join("game");
        let paths = project(&root, "1.2.3", None);
        let transport = Arc::new(ScriptedTransport::new(vec![HttpResponse::new(200, b"garbage".to_vec())]));
        let runner = Arc::new(RecordingRunner::new(0));

        let (outcome, _rx) = run(
            pipeline(transport, runner, dir.path()),
            remote_location(&root),
            false,
        )
        .await;

        assert!(matches!(outcome, PipelineOutcome::Failed(message) if message.contains("unreadable")));
        assert!(!paths.built_version_file().exists());
    }

    #[tokio::test]
    async fn local_project_builds_with_clean_flag_then_launches() {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = dir.path().join("game");
        let paths = project(&root, "1.2.3", Some("1.0.0"));
        write(paths.clean_build_threshold_file(), b"1.1.0");
        write(paths.build_script(), b"exit 0");
        let transport = Arc::new(ScriptedTransport::new(Vec::new()));
        let runner = Arc::new(RecordingRunner::new(0).with_output(&["compiling editor"]));

        let (outcome, _rx) = run(
            pipeline(transport.clone(), runner.clone(), dir.path()),
            ProjectLocation::local(&root),
            false,
        )
        .await;

        assert_eq!(outcome, PipelineOutcome::Launched { project: root.clone() });
        let runs = runner.runs();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].args.last().map(String::as_str), Some("--clean"));
        assert!(transport.requests().is_empty());
    }

    #[tokio::test]
    async fn failed_build_reports_exit_code_and_does_not_launch() {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = dir.path().join("game");
        let paths = project(&root, "1.2.3", None);
        write(paths.build_script(), b"exit 2");
        let runner = Arc::new(RecordingRunner::new(2));

        let (outcome, _rx) = run(
            pipeline(Arc::new(ScriptedTransport::new(Vec::new())), runner.clone(), dir.path()),
            ProjectLocation::local(&root),
            false,
        )
        .await;

        assert_eq!(
            outcome,
            PipelineOutcome::Failed("Build failed with error code 2".to_string())
        );
        assert_eq!(runner.runs().len(), 1);
        assert!(runner.detached().is_empty());
    }

    #[tokio::test]
    async fn missing_manifest_returns_to_project_selection() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (outcome, _rx) = run(
            pipeline(
                Arc::new(ScriptedTransport::new(Vec::new())),
                Arc::new(RecordingRunner::new(0)),
                dir.path(),
            ),
            ProjectLocation::local(dir.path().join("gone")),
            false,
        )
        .await;
        assert_eq!(outcome, PipelineOutcome::ReturnToProjectSelection);
    }

    #[tokio::test]
    async fn missing_editor_fails_visibly() {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = dir.path().join("game");
        let paths = project(&root, "1.2.3", Some("1.2.3"));
        fs::remove_file(paths.editor_executable()).expect("remove editor");
        // Built marker without a binary reads as unbuilt, and the recorded
        // build succeeds without producing one.
        write(paths.build_script(), b"exit 0");
        let runner = Arc::new(RecordingRunner::new(0));

        let (outcome, _rx) = run(
            pipeline(Arc::new(ScriptedTransport::new(Vec::new())), runner.clone(), dir.path()),
            ProjectLocation::local(&root),
            false,
        )
        .await;

        assert!(matches!(outcome, PipelineOutcome::Failed(message) if message.starts_with("Editor not found at")));
    }

    #[tokio::test]
    async fn failed_editor_spawn_is_terminal() {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = dir.path().join("game");
        project(&root, "1.2.3", Some("1.2.3"));
        let runner = Arc::new(RecordingRunner::new(0).failing_detached());

        let (outcome, mut rx) = run(
            pipeline(Arc::new(ScriptedTransport::new(Vec::new())), runner.clone(), dir.path()),
            ProjectLocation::local(&root),
            false,
        )
        .await;

        assert!(matches!(&outcome, PipelineOutcome::Failed(message) if message.starts_with("Could not start")));
        assert!(runner.detached().is_empty());
        let states = states(&mut rx);
        assert_eq!(states.last(), Some(&LaunchState::Failed));
        assert!(!states.contains(&LaunchState::Launched));
    }

    #[tokio::test]
    async fn download_stops_when_nobody_watches_progress() {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = dir.path().join("game");
        let paths = project(&root, "1.2.3", None);
        let archive = zip_bytes(&[("bin/halley-editor", b"editor")]);
        let transport = Arc::new(ScriptedTransport::new(vec![HttpResponse::new(200, archive)]));
        let runner = Arc::new(RecordingRunner::new(0));

        let (sink, mut rx) = event_queue(CancellationToken::new());
        let (publisher, slot) = progress_slot();
        drop(slot);
        let outcome = pipeline(transport, runner.clone(), dir.path())
            .run(
                LaunchRequest {
                    location: remote_location(&root),
                    safe_mode: false,
                },
                sink,
                publisher,
            )
            .await;

        assert_eq!(
            outcome,
            PipelineOutcome::Failed(
                "Unable to download editor from https://update.test/editor-bins/editor-1.2.3.zip".to_string()
            )
        );
        assert!(!paths.editor_executable().exists());
        assert!(!paths.built_version_file().exists());
        assert!(!states(&mut rx).contains(&LaunchState::Extracting));
        assert!(runner.detached().is_empty());
    }

    #[tokio::test]
    async fn safe_mode_is_dropped_for_old_engines() {
        let dir = tempfile::tempdir().expect("tempdir");
        let old = dir.path().join("old");
        project(&old, "3.3.78", Some("3.3.78"));
        let new = dir.path().join("new");
        project(&new, "3.3.79", Some("3.3.79"));
        let runner = Arc::new(RecordingRunner::new(0));
        let transport = Arc::new(ScriptedTransport::new(Vec::new()));

        run(pipeline(transport.clone(), runner.clone(), dir.path()), ProjectLocation::local(&old), true).await;
        run(pipeline(transport, runner.clone(), dir.path()), ProjectLocation::local(&new), true).await;

        let detached = runner.detached();
        assert!(!detached[0].args.iter().any(|arg| arg == "--dont-load-dll"));
        assert!(detached[1].args.iter().any(|arg| arg == "--dont-load-dll"));
    }

    #[tokio::test]
    async fn cancelled_pipeline_posts_nothing_more() {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = dir.path().join("game");
        project(&root, "1.2.3", None);
        let cancel = CancellationToken::new();
        let (sink, mut rx) = event_queue(cancel.clone());
        let (publisher, _slot) = progress_slot();
        cancel.cancel();

        let outcome = pipeline(
            Arc::new(ScriptedTransport::new(Vec::new())),
            Arc::new(RecordingRunner::new(0)),
            dir.path(),
        )
        .run(
            LaunchRequest {
                location: remote_location(&root),
                safe_mode: false,
            },
            sink,
            publisher,
        )
        .await;

        assert_eq!(outcome, PipelineOutcome::Cancelled);
        assert!(rx.try_recv().is_err());
    }
}
