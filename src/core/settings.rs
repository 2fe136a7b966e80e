use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::auth::PARAM_URL;
use crate::core::error::{RegistryError, StorageError};
use crate::core::storage::KeyValueStore;

pub const SETTINGS_KEY: &str = "settings";

pub type ProjectParams = BTreeMap<String, String>;

/// A registered project. Identity is the path alone; `params` carries the
/// remote connection for mirrored projects.
#[derive(Debug, Clone, Serialize)]
pub struct ProjectLocation {
    pub path: PathBuf,
    pub params: ProjectParams,
}

impl ProjectLocation {
    pub fn new(path: impl Into<PathBuf>, params: ProjectParams) -> Self {
        Self {
            path: path.into(),
            params,
        }
    }

    pub fn local(path: impl Into<PathBuf>) -> Self {
        Self::new(path, ProjectParams::new())
    }

    pub fn is_remote_tracked(&self) -> bool {
        self.params.contains_key(PARAM_URL)
    }
}

impl PartialEq for ProjectLocation {
    fn eq(&self, other: &Self) -> bool {
        self.path == other.path
    }
}

impl Eq for ProjectLocation {}

/// Older launchers stored bare path strings.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum StoredProject {
    Path(String),
    Entry {
        path: String,
        #[serde(default)]
        params: ProjectParams,
    },
}

impl From<StoredProject> for ProjectLocation {
    fn from(value: StoredProject) -> Self {
        match value {
            StoredProject::Path(path) => ProjectLocation::local(path),
            StoredProject::Entry { path, params } => ProjectLocation::new(path, params),
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct SettingsDocument {
    #[serde(default)]
    projects: Vec<serde_json::Value>,
}

/// Most-recently-used project registry.
#[derive(Debug, Default)]
pub struct LauncherSettings {
    projects: Vec<ProjectLocation>,
    dirty: bool,
}

impl LauncherSettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn projects(&self) -> &[ProjectLocation] {
        &self.projects
    }

    pub fn try_get(&self, path: &Path) -> Option<&ProjectLocation> {
        self.projects.iter().find(|project| project.path == path)
    }

    pub fn add(&mut self, path: impl Into<PathBuf>, params: ProjectParams) -> bool {
        let path = path.into();
        if self.try_get(&path).is_some() {
            return false;
        }
        self.projects.insert(0, ProjectLocation::new(path, params));
        self.dirty = true;
        true
    }

    pub fn add_or_update(&mut self, path: impl Into<PathBuf>, params: ProjectParams) -> bool {
        let path = path.into();
        if let Some(existing) = self.projects.iter_mut().find(|p| p.path == path) {
            if existing.params != params {
                existing.params = params;
                self.dirty = true;
            }
            return true;
        }
        self.add(path, params)
    }

    /// Removes a project. Remote-tracked projects are local mirrors, so their
    /// directory goes with them; if that deletion fails the entry is kept.
    pub fn remove(&mut self, path: &Path) -> Result<bool, RegistryError> {
        let Some(index) = self.projects.iter().position(|p| p.path == path) else {
            return Ok(false);
        };

        if self.projects[index].is_remote_tracked() {
            match fs::remove_dir_all(path) {
                Ok(()) => {}
                Err(error) if error.kind() == ErrorKind::NotFound => {}
                Err(source) => {
                    return Err(RegistryError::RemoveDirectory {
                        path: path.to_path_buf(),
                        source,
                    })
                }
            }
        }

        self.projects.remove(index);
        self.dirty = true;
        Ok(true)
    }

    pub fn bump(&mut self, path: &Path) {
        let Some(index) = self.projects.iter().position(|p| p.path == path) else {
            return;
        };
        if index == 0 {
            return;
        }
        let project = self.projects.remove(index);
        self.projects.insert(0, project);
        self.dirty = true;
    }

    /// Fails rather than dropping an entry that cannot be encoded, such as a
    /// path that is not valid UTF-8.
    pub fn save(&self) -> Result<SettingsDocument, StorageError> {
        let projects = self
            .projects
            .iter()
            .map(serde_json::to_value)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(SettingsDocument { projects })
    }

    /// Entries that are neither a path string nor a `{path, params}` object
    /// are skipped.
    pub fn load(&mut self, document: SettingsDocument) {
        let mut projects: Vec<ProjectLocation> = Vec::with_capacity(document.projects.len());
        for raw in document.projects {
            match serde_json::from_value::<StoredProject>(raw) {
                Ok(stored) => {
                    let location = ProjectLocation::from(stored);
                    if !projects.contains(&location) {
                        projects.push(location);
                    }
                }
                Err(error) => tracing::warn!("Skipping malformed project entry: {error}"),
            }
        }
        self.projects = projects;
        self.dirty = false;
    }

    pub fn save_to_store(&mut self, store: &dyn KeyValueStore) -> Result<(), StorageError> {
        let bytes = serde_json::to_vec(&self.save()?)?;
        store.set(SETTINGS_KEY, &bytes)?;
        self.dirty = false;
        Ok(())
    }

    pub fn load_from_store(store: &dyn KeyValueStore) -> Result<Self, StorageError> {
        let mut settings = Self::new();
        if let Some(bytes) = store.get(SETTINGS_KEY)? {
            if !bytes.is_empty() {
                settings.load(serde_json::from_slice(&bytes)?);
            }
        }
        Ok(settings)
    }
}
