use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::FutureExt;
use tokio::task::JoinHandle;

use crate::core::auth::RemoteCredentials;
use crate::core::cancellation::CancellationToken;
use crate::core::error::{RegistryError, StorageError, UpdateError};
use crate::core::events::{
    event_queue, EventReceiver, EventSink, LogLine, PipelineEvent, PipelineOutcome,
};
use crate::core::launch_pipeline::LaunchRequest;
use crate::core::progress::{progress_slot, Progress, ProgressPublisher, ProgressSlot};
use crate::core::project_properties::{get_properties, ProjectProperties};
use crate::core::services::LauncherServices;
use crate::core::settings::{LauncherSettings, ProjectLocation};
use crate::core::storage::KeyValueStore;
use crate::core::update::{check_for_update, NewVersionInfo};
use crate::core::LaunchState;

/// Receives everything the stage wants shown. Called on the update thread
/// only.
pub trait Presenter {
    fn on_state(&mut self, _state: LaunchState) {}
    fn on_status(&mut self, status: &str);
    fn on_log(&mut self, line: &LogLine);
    fn on_progress(&mut self, progress: Progress);
    fn on_finished(&mut self, outcome: &PipelineOutcome);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageControl {
    Continue,
    Exit(i32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewKind {
    LaunchProject,
    AddRemoteProject,
    Update,
}

/// The pipeline currently on screen. Tearing it down cancels its token and
/// drops its event queue, so nothing it posts afterwards reaches the stage.
struct ActiveView {
    kind: ViewKind,
    cancel: CancellationToken,
    events: EventReceiver,
    progress: ProgressSlot,
    _task: JoinHandle<PipelineOutcome>,
}

pub struct LauncherStage {
    services: Arc<LauncherServices>,
    settings: LauncherSettings,
    store: Box<dyn KeyValueStore>,
    active: Option<ActiveView>,
    update_check: Option<JoinHandle<Result<NewVersionInfo, UpdateError>>>,
    new_version: Option<NewVersionInfo>,
    exit_code: Option<i32>,
}

impl LauncherStage {
    pub fn new(
        services: Arc<LauncherServices>,
        store: Box<dyn KeyValueStore>,
    ) -> Result<Self, StorageError> {
        let settings = LauncherSettings::load_from_store(store.as_ref())?;
        Ok(Self {
            services,
            settings,
            store,
            active: None,
            update_check: None,
            new_version: None,
            exit_code: None,
        })
    }

    pub fn settings(&self) -> &LauncherSettings {
        &self.settings
    }

    pub fn projects(&self) -> &[ProjectLocation] {
        self.settings.projects()
    }

    pub fn is_busy(&self) -> bool {
        self.active.is_some()
    }

    pub fn active_view(&self) -> Option<ViewKind> {
        self.active.as_ref().map(|view| view.kind)
    }

    pub fn new_version_info(&self) -> Option<&NewVersionInfo> {
        self.new_version.as_ref()
    }

    pub fn is_checking_for_updates(&self) -> bool {
        self.update_check.is_some()
    }

    /// Reads every registered project and drops the ones whose manifest is
    /// gone.
    pub fn scan_projects(&mut self) -> Vec<ProjectProperties> {
        let mut found = Vec::new();
        let mut stale = Vec::new();
        for project in self.settings.projects() {
            match get_properties(project, false) {
                Some(properties) => found.push(properties),
                None => stale.push(project.path.clone()),
            }
        }
        for path in stale {
            tracing::info!(path = %path.display(), "Removing project without manifest");
            if let Err(error) = self.settings.remove(&path) {
                tracing::error!("{error}");
            }
        }
        found
    }

    pub fn add_local(&mut self, path: &Path) -> Result<ProjectProperties, RegistryError> {
        let location = ProjectLocation::local(path);
        let properties =
            get_properties(&location, false).ok_or_else(|| RegistryError::NotAProject(path.to_path_buf()))?;
        if !self.settings.add(path, location.params) {
            return Err(RegistryError::AlreadyExists(path.to_path_buf()));
        }
        Ok(properties)
    }

    pub fn remove(&mut self, path: &Path) -> Result<bool, RegistryError> {
        self.settings.remove(path)
    }

    /// Opens a registered project, promoting it to the front of the list.
    pub fn open(&mut self, path: &Path, safe_mode: bool) -> Result<(), RegistryError> {
        let location = self
            .settings
            .try_get(path)
            .cloned()
            .ok_or_else(|| RegistryError::NotRegistered(path.to_path_buf()))?;
        self.settings.bump(path);
        self.start_launch(location, safe_mode);
        Ok(())
    }

    /// Opens a project named on the command line. Registered projects keep
    /// their connection parameters; others are launched as local trees
    /// without being added.
    pub fn open_initial(&mut self, path: PathBuf) {
        if self.settings.try_get(&path).is_some() {
            if let Err(error) = self.open(&path, false) {
                tracing::error!("{error}");
            }
            return;
        }
        self.start_launch(ProjectLocation::local(path), false);
    }

    fn start_launch(&mut self, location: ProjectLocation, safe_mode: bool) {
        let pipeline = self.services.acquisition_pipeline();
        self.start_view(ViewKind::LaunchProject, move |sink, progress| {
            pipeline.run(LaunchRequest { location, safe_mode }, sink, progress)
        });
    }

    pub fn add_remote(&mut self, credentials: RemoteCredentials) -> Result<(), RegistryError> {
        if !credentials.is_complete() {
            return Err(RegistryError::IncompleteCredentials);
        }
        let client = self.services.client.clone();
        self.start_view(ViewKind::AddRemoteProject, move |sink, _progress| async move {
            sink.status("Connecting...");
            let outcome = match client.update_project_data(&credentials, &sink).await {
                Some(path) => {
                    sink.info(format!("Added project at {}", path.display()));
                    PipelineOutcome::ReturnToProjectSelection
                }
                None if sink.cancellation().is_cancelled() => PipelineOutcome::Cancelled,
                None => {
                    let message = format!(
                        "Unable to add project '{}' from {}",
                        credentials.project,
                        credentials.base_url()
                    );
                    sink.error(&message);
                    PipelineOutcome::Failed(message)
                }
            };
            sink.finish(outcome.clone());
            outcome
        });
        Ok(())
    }

    pub fn check_for_updates(&mut self) {
        if self.update_check.is_some() {
            return;
        }
        let transport = self.services.transport.clone();
        let url = self.services.config.update_manifest_url().to_string();
        self.update_check = Some(tokio::spawn(async move {
            check_for_update(transport.as_ref(), &url, &CancellationToken::new()).await
        }));
    }

    /// Starts the self-update when a newer launcher is known. Returns false
    /// when there is nothing to update to.
    pub fn start_update(&mut self) -> bool {
        let Some(info) = self.new_version.clone().filter(NewVersionInfo::is_new_version) else {
            return false;
        };
        let pipeline = self.services.self_update_pipeline(info.version);
        self.start_view(ViewKind::Update, move |sink, progress| {
            pipeline.run(info, sink, progress)
        });
        true
    }

    fn start_view<F, Fut>(&mut self, kind: ViewKind, start: F)
    where
        F: FnOnce(EventSink, ProgressPublisher) -> Fut,
        Fut: std::future::Future<Output = PipelineOutcome> + Send + 'static,
    {
        self.cancel();
        let cancel = CancellationToken::new();
        let (sink, events) = event_queue(cancel.clone());
        let (publisher, progress) = progress_slot();
        let task = tokio::spawn(start(sink, publisher));
        self.active = Some(ActiveView {
            kind,
            cancel,
            events,
            progress,
            _task: task,
        });
    }

    /// Tears down the active view. Late events from its pipeline are
    /// discarded, except registry updates which are still applied.
    pub fn cancel(&mut self) {
        let Some(mut view) = self.active.take() else {
            return;
        };
        view.cancel.cancel();
        while let Ok(event) = view.events.try_recv() {
            if let PipelineEvent::RegisterProject { path, params } = event {
                self.settings.add_or_update(path, params);
            }
        }
        tracing::debug!(kind = ?view.kind, "view torn down");
    }

    /// One update-thread frame: apply queued events, forward the latest
    /// progress once, pick up the update check, and persist the registry if
    /// anything changed.
    pub fn tick(&mut self, presenter: &mut dyn Presenter) -> StageControl {
        while let Some(event) = self
            .active
            .as_mut()
            .and_then(|view| view.events.try_recv().ok())
        {
            self.apply(event, presenter);
        }

        if let Some(view) = self.active.as_mut() {
            if let Some(progress) = view.progress.drain() {
                presenter.on_progress(progress);
            }
        }

        self.poll_update_check();

        if self.settings.is_dirty() {
            if let Err(error) = self.settings.save_to_store(self.store.as_ref()) {
                tracing::error!("Unable to save launcher settings: {error}");
            }
        }

        match self.exit_code {
            Some(code) => StageControl::Exit(code),
            None => StageControl::Continue,
        }
    }

    fn apply(&mut self, event: PipelineEvent, presenter: &mut dyn Presenter) {
        match event {
            PipelineEvent::State(state) => presenter.on_state(state),
            PipelineEvent::Status(status) => presenter.on_status(&status),
            PipelineEvent::Log(line) => presenter.on_log(&line),
            PipelineEvent::RegisterProject { path, params } => {
                self.settings.add_or_update(path, params);
            }
            PipelineEvent::Finished(outcome) => {
                if let Some(mut view) = self.active.take() {
                    if let Some(progress) = view.progress.drain() {
                        presenter.on_progress(progress);
                    }
                }
                match &outcome {
                    PipelineOutcome::Launched { project } => {
                        self.settings.bump(project);
                        self.exit_code = Some(0);
                    }
                    PipelineOutcome::UpdateHandedOff => self.exit_code = Some(0),
                    _ => {}
                }
                presenter.on_finished(&outcome);
            }
        }
    }

    fn poll_update_check(&mut self) {
        let Some(handle) = self.update_check.as_mut() else {
            return;
        };
        let Some(result) = handle.now_or_never() else {
            return;
        };
        self.update_check = None;
        match result {
            Ok(Ok(info)) => {
                if info.is_new_version() {
                    tracing::info!(version = info.version, "Launcher update available");
                }
                self.new_version = Some(info);
            }
            Ok(Err(error)) => tracing::error!("Unable to retrieve new version info: {error}"),
            Err(error) => tracing::error!("Update check task failed: {error}"),
        }
    }
}
