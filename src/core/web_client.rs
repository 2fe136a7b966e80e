use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use base64::{engine::general_purpose, Engine as _};
use sha2::{Digest, Sha256};
use url::Url;

use crate::core::auth::{RemoteCredentials, SessionToken};
use crate::core::cancellation::CancellationToken;
use crate::core::downloader::{
    fetch_following_redirects, HttpRequest, HttpResponse, HttpTransport, ProgressCallback,
    MAX_REDIRECT_DEPTH,
};
use crate::core::error::{LauncherError, TransportError};
use crate::core::events::{EventSink, PipelineEvent};
use crate::core::network::{
    ExternalProjectEnvelope, RemoteErrorBody, SessionRequest, SessionResponse,
};
use crate::core::version::HalleyVersion;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleFile {
    pub path: PathBuf,
    pub bytes: Vec<u8>,
}

/// Files of a remote project, already screened: every path is relative,
/// free of `..` and carries content.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProjectBundle {
    pub files: Vec<BundleFile>,
}

impl ProjectBundle {
    fn from_envelope(envelope: ExternalProjectEnvelope) -> Self {
        let mut raw: Vec<(String, String)> = envelope
            .files
            .into_iter()
            .map(|file| (file.path, file.bytes))
            .collect();
        if let Some(properties) = envelope.properties {
            raw.push(("halley_project/properties.yaml".to_string(), properties));
        }
        if let Some(icon) = envelope.icon {
            raw.push(("halley_project/icon48.png".to_string(), icon));
        }

        let mut files = Vec::with_capacity(raw.len());
        for (path, encoded) in raw {
            let Some(relative) = safe_relative_path(&path) else {
                tracing::warn!("Rejecting bundle entry with unsafe path '{path}'");
                continue;
            };
            let bytes = match general_purpose::STANDARD.decode(encoded.trim()) {
                Ok(bytes) => bytes,
                Err(error) => {
                    tracing::warn!("Rejecting bundle entry '{path}': {error}");
                    continue;
                }
            };
            if bytes.is_empty() {
                tracing::warn!("Rejecting empty bundle entry '{path}'");
                continue;
            }
            files.push(BundleFile {
                path: relative,
                bytes,
            });
        }
        Self { files }
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Writes every file under `root`. Stops at the first failure.
    pub fn write_to(&self, root: &Path) -> Result<(), LauncherError> {
        for file in &self.files {
            let target = root.join(&file.path);
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent).map_err(|source| LauncherError::Write {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
            fs::write(&target, &file.bytes).map_err(|source| LauncherError::Write {
                path: target.clone(),
                source,
            })?;
        }
        Ok(())
    }
}

fn safe_relative_path(raw: &str) -> Option<PathBuf> {
    let normalized = raw.replace('\\', "/");
    let path = Path::new(&normalized);
    if normalized.trim().is_empty() {
        return None;
    }
    let mut relative = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => relative.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    (!relative.as_os_str().is_empty()).then_some(relative)
}

/// Talks to the project hosting service and to the editor archive mirror.
pub struct RemoteProjectClient {
    transport: Arc<dyn HttpTransport>,
    projects_dir: PathBuf,
    editor_base_url: String,
}

impl RemoteProjectClient {
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        projects_dir: impl Into<PathBuf>,
        editor_base_url: impl Into<String>,
    ) -> Self {
        Self {
            transport,
            projects_dir: projects_dir.into(),
            editor_base_url: editor_base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Issues a request, folding transport errors into a status-0 response.
    async fn send(
        &self,
        request: HttpRequest,
        progress: Option<ProgressCallback<'_>>,
        cancel: &CancellationToken,
    ) -> HttpResponse {
        let url = request.url.clone();
        match self.transport.send(request, progress, cancel).await {
            Ok(response) => response,
            Err(TransportError::Cancelled) => HttpResponse::transport_failure(),
            Err(error) => {
                tracing::warn!(url = %url, "Request failed: {error}");
                HttpResponse::transport_failure()
            }
        }
    }

    pub async fn login(
        &self,
        base_url: &str,
        project: &str,
        username: &str,
        password: &str,
        cancel: &CancellationToken,
    ) -> Option<SessionToken> {
        let body = SessionRequest {
            username,
            password,
            project,
        };
        let request = match HttpRequest::post_json(format!("{base_url}/sessions"), &body) {
            Ok(request) => request,
            Err(error) => {
                tracing::error!("Unable to encode login request: {error}");
                return None;
            }
        };

        let response = self.send(request, None, cancel).await;
        match response.status {
            0 => None,
            200 => match serde_json::from_slice::<SessionResponse>(&response.body) {
                Ok(session) => Some(SessionToken::new(session.token)),
                Err(error) => {
                    tracing::error!("Malformed login response: {error}");
                    None
                }
            },
            status => {
                let body: RemoteErrorBody =
                    serde_json::from_slice(&response.body).unwrap_or_default();
                tracing::error!(status, "Error attempting to login: {}", body.error_msg);
                None
            }
        }
    }

    pub async fn fetch_bundle(
        &self,
        base_url: &str,
        project: &str,
        token: &SessionToken,
        cancel: &CancellationToken,
    ) -> Option<ProjectBundle> {
        let url = match project_properties_url(base_url, project) {
            Ok(url) => url,
            Err(error) => {
                tracing::error!("{error}");
                return None;
            }
        };
        let request = HttpRequest::get(url).with_header("Authorization", token.authorization_header());

        let response = self.send(request, None, cancel).await;
        if !response.is_ok() {
            tracing::error!(status = response.status, "Unable to fetch project '{project}'");
            return None;
        }
        match serde_json::from_slice::<ExternalProjectEnvelope>(&response.body) {
            Ok(envelope) => Some(ProjectBundle::from_envelope(envelope)),
            Err(error) => {
                tracing::error!("Malformed project bundle for '{project}': {error}");
                None
            }
        }
    }

    /// Local mirror directory of a remote project: the project name plus a
    /// digest of the service URL, so the same project name on two services
    /// never collides.
    pub fn project_dir(&self, project: &str, url: &str) -> PathBuf {
        let digest = format!("{:x}", Sha256::digest(url.as_bytes()));
        let name: String = project
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.projects_dir.join(format!("{name}-{}", &digest[..16]))
    }

    /// Logs in, fetches the bundle, mirrors it locally and asks the update
    /// thread to register the mirror. Returns the mirror path on success;
    /// nothing is registered when any step fails.
    pub async fn update_project_data(
        &self,
        credentials: &RemoteCredentials,
        sink: &EventSink,
    ) -> Option<PathBuf> {
        let cancel = sink.cancellation();
        let base_url = credentials.base_url();

        let token = self
            .login(
                base_url,
                &credentials.project,
                &credentials.username,
                &credentials.password,
                cancel,
            )
            .await?;
        let bundle = self
            .fetch_bundle(base_url, &credentials.project, &token, cancel)
            .await?;
        if bundle.is_empty() {
            tracing::warn!("Project '{}' has no files to mirror", credentials.project);
        }

        let target = self.project_dir(&credentials.project, base_url);
        let write_target = target.clone();
        let written = tokio::task::spawn_blocking(move || bundle.write_to(&write_target)).await;
        match written {
            Ok(Ok(())) => {}
            Ok(Err(error)) => {
                tracing::error!("Unable to store project data: {error}");
                return None;
            }
            Err(error) => {
                tracing::error!("Project data writer failed: {error}");
                return None;
            }
        }
        if cancel.is_cancelled() {
            return None;
        }

        let params = RemoteCredentials {
            url: base_url.to_string(),
            ..credentials.clone()
        }
        .to_params();
        sink.post(PipelineEvent::RegisterProject {
            path: target.clone(),
            params,
        });
        tracing::info!(path = %target.display(), "Mirrored remote project '{}'", credentials.project);
        Some(target)
    }

    pub fn editor_archive_url(&self, version: HalleyVersion) -> String {
        format!("{}/editor-{version}.zip", self.editor_base_url)
    }

    /// Empty bytes mean failure; there is no "nothing to download" answer.
    pub async fn download_editor_archive(
        &self,
        version: HalleyVersion,
        progress: Option<ProgressCallback<'_>>,
        cancel: &CancellationToken,
    ) -> Vec<u8> {
        let url = self.editor_archive_url(version);
        let response = match fetch_following_redirects(
            self.transport.as_ref(),
            &url,
            MAX_REDIRECT_DEPTH,
            progress,
            cancel,
        )
        .await
        {
            Ok(response) => response,
            Err(TransportError::Cancelled) => return Vec::new(),
            Err(error) => {
                tracing::warn!(url = %url, "Editor download failed: {error}");
                return Vec::new();
            }
        };
        if !response.is_ok() {
            tracing::warn!(url = %url, status = response.status, "Editor download refused");
            return Vec::new();
        }
        response.body
    }
}

fn project_properties_url(base_url: &str, project: &str) -> Result<String, TransportError> {
    let raw = format!("{base_url}/external-project-properties/");
    let mut url = Url::parse(&raw).map_err(|source| TransportError::InvalidUrl {
        url: raw.clone(),
        source,
    })?;
    url.path_segments_mut()
        .map_err(|_| TransportError::InvalidUrl {
            url: raw.clone(),
            source: url::ParseError::RelativeUrlWithCannotBeABaseBase,
        })?
        .pop_if_empty()
        .push(project);
    Ok(url.into())
}
