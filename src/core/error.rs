use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Could not read launcher config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Launcher config {path} is malformed: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("No data directory available on this platform; set HALLEY_LAUNCHER_DATA_DIR")]
    NoDataDir,
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Settings store error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Settings document is malformed: {0}")]
    Document(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Another launcher instance holds {0}")]
    Locked(PathBuf),
}

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Could not delete project directory {path}: {source}")]
    RemoveDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Project already exists: {0}")]
    AlreadyExists(PathBuf),

    #[error("No project manifest found at {0}")]
    NotAProject(PathBuf),

    #[error("Remote project needs an http(s) URL, project name, username and password")]
    IncompleteCredentials,

    #[error("Project is not registered: {0}")]
    NotRegistered(PathBuf),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Invalid URL {url}: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("Redirect from {url} has no Location header")]
    MissingLocation { url: String },

    #[error("Too many redirects (more than {limit}) while fetching {url}")]
    TooManyRedirects { url: String, limit: u32 },

    #[error("Request body could not be encoded: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Transfer aborted by the receiver")]
    Aborted,

    #[error("Operation cancelled")]
    Cancelled,
}

#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("Archive is unreadable: {0}")]
    Unreadable(#[source] zip::result::ZipError),

    #[error("Could not read archive entry #{index}: {source}")]
    Entry {
        index: usize,
        #[source]
        source: zip::result::ZipError,
    },

    #[error("Archive entry {0} escapes the destination directory")]
    UnsafePath(String),

    #[error("Could not write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Extraction cancelled")]
    Cancelled,
}

#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("Could not start {program}: {source}")]
    Spawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Lost track of {program}: {source}")]
    Wait {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Editor not found at {0}")]
    EditorNotFound(PathBuf),

    #[error("Build script not found at {0}")]
    BuildScriptNotFound(PathBuf),

    #[error("Relaunch script not found at {0}")]
    RelaunchScriptNotFound(PathBuf),

    #[error("Build failed with error code {0}")]
    BuildFailed(i32),

    #[error("Process cancelled")]
    Cancelled,
}

#[derive(Error, Debug)]
pub enum UpdateError {
    #[error("Update manifest is malformed: {0}")]
    Manifest(#[from] serde_yaml::Error),

    #[error("HTTP Error {status}: {url}")]
    Http { status: u16, url: String },

    #[error("No launcher download published for platform '{0}'")]
    NoDownloadForPlatform(String),

    #[error("Update signature rejected: {0}")]
    Signature(String),

    #[error("Downloaded update is empty")]
    EmptyPayload,

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Archive(#[from] ArchiveError),

    #[error(transparent)]
    Process(#[from] ProcessError),

    #[error("Could not prepare staging directory {path}: {source}")]
    Staging {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Error, Debug)]
pub enum LauncherError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Archive(#[from] ArchiveError),

    #[error(transparent)]
    Process(#[from] ProcessError),

    #[error(transparent)]
    Update(#[from] UpdateError),

    #[error("Could not write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Unable to download editor from {url}")]
    Download { url: String },

    #[error("Background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("Operation cancelled")]
    Cancelled,
}

impl LauncherError {
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            LauncherError::Cancelled
                | LauncherError::Transport(TransportError::Cancelled)
                | LauncherError::Archive(ArchiveError::Cancelled)
                | LauncherError::Process(ProcessError::Cancelled)
                | LauncherError::Update(UpdateError::Transport(TransportError::Cancelled))
                | LauncherError::Update(UpdateError::Archive(ArchiveError::Cancelled))
                | LauncherError::Update(UpdateError::Process(ProcessError::Cancelled))
        )
    }
}
