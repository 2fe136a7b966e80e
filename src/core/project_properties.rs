use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::settings::ProjectLocation;
use crate::core::version::HalleyVersion;

/// Fixed well-known locations inside a project tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectPaths {
    root: PathBuf,
}

impl ProjectPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn properties_file(&self) -> PathBuf {
        self.root.join("halley_project").join("properties.yaml")
    }

    pub fn icon_file(&self) -> PathBuf {
        self.root.join("halley_project").join("icon48.png")
    }

    /// Where editor archives are unpacked.
    pub fn engine_dir(&self) -> PathBuf {
        self.root.join("halley")
    }

    pub fn version_header(&self) -> PathBuf {
        self.engine_dir().join("include").join("halley_version.hpp")
    }

    pub fn clean_build_threshold_file(&self) -> PathBuf {
        self.engine_dir()
            .join("include")
            .join("clean_build_if_older.txt")
    }

    pub fn built_version_file(&self) -> PathBuf {
        self.engine_dir().join("bin").join("build_version.txt")
    }

    pub fn editor_executable(&self) -> PathBuf {
        self.engine_dir().join("bin").join(editor_binary_name())
    }

    pub fn build_script(&self) -> PathBuf {
        let name = if cfg!(windows) {
            "build_editor.bat"
        } else {
            "build_editor.sh"
        };
        self.engine_dir().join("scripts").join(name)
    }
}

pub fn editor_binary_name() -> &'static str {
    if cfg!(windows) {
        "halley-editor.exe"
    } else {
        "halley-editor"
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PropertiesManifest {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    halley_version: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectProperties {
    pub path: PathBuf,
    pub name: String,
    #[serde(skip)]
    pub icon: Option<Vec<u8>>,
    pub required_version: HalleyVersion,
    /// Zero when no editor binary is present.
    pub built_version: HalleyVersion,
    pub clean_build_threshold: HalleyVersion,
}

impl ProjectProperties {
    pub fn is_built(&self) -> bool {
        !self.built_version.is_unknown()
    }

    pub fn is_up_to_date(&self) -> bool {
        self.built_version == self.required_version
    }

    pub fn needs_clean_build(&self) -> bool {
        self.built_version < self.clean_build_threshold
    }
}

/// Reads a project's manifest. `None` means there is no usable
/// `properties.yaml`, which is how stale registry entries are detected.
pub fn get_properties(location: &ProjectLocation, load_icon: bool) -> Option<ProjectProperties> {
    let paths = ProjectPaths::new(&location.path);

    let raw = fs::read_to_string(paths.properties_file()).ok()?;
    if raw.trim().is_empty() {
        return None;
    }
    let manifest = serde_yaml::from_str::<PropertiesManifest>(&raw).unwrap_or_else(|error| {
        tracing::warn!(
            path = %paths.properties_file().display(),
            "Unable to parse project properties: {error}"
        );
        PropertiesManifest::default()
    });

    let required_version = match fs::read_to_string(paths.version_header()) {
        Ok(header) => HalleyVersion::parse_header(header.lines()),
        Err(_) => manifest
            .halley_version
            .as_deref()
            .map(HalleyVersion::parse)
            .unwrap_or_default(),
    };

    let built_version = if paths.editor_executable().is_file() {
        read_version_file(&paths.built_version_file())
    } else {
        HalleyVersion::default()
    };

    let icon = if load_icon {
        fs::read(paths.icon_file()).ok()
    } else {
        None
    };

    Some(ProjectProperties {
        path: location.path.clone(),
        name: manifest
            .name
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| "Unknown".to_string()),
        icon,
        required_version,
        built_version,
        clean_build_threshold: read_version_file(&paths.clean_build_threshold_file()),
    })
}

fn read_version_file(path: &Path) -> HalleyVersion {
    fs::read_to_string(path)
        .map(|raw| HalleyVersion::parse(raw.trim()))
        .unwrap_or_default()
}
