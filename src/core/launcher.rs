use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::core::error::{LauncherError, ProcessError};
use crate::core::process_runner::CommandSpec;
use crate::core::project_properties::ProjectPaths;
use crate::core::version::HalleyVersion;

/// Oldest engine whose editor understands `--dont-load-dll`.
pub const SAFE_MODE_MIN_VERSION: HalleyVersion = HalleyVersion::new(3, 3, 79);

pub(crate) const SETTINGS_DB_FILE: &str = "settings.db";
pub(crate) const LOCK_FILE: &str = "launcher.lock";

#[derive(Debug, Clone)]
pub struct LauncherDataLayout {
    pub root: PathBuf,
    /// Local mirrors of remote-tracked projects.
    pub projects: PathBuf,
    pub staging: PathBuf,
    pub logs: PathBuf,
}

impl LauncherDataLayout {
    pub fn from_root(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            projects: root.join("projects"),
            staging: root.join("staging"),
            logs: root.join("logs"),
        }
    }

    pub fn settings_db(&self) -> PathBuf {
        self.root.join(SETTINGS_DB_FILE)
    }

    pub fn lock_file(&self) -> PathBuf {
        self.root.join(LOCK_FILE)
    }

    pub fn update_staging_dir(&self, version: u32) -> PathBuf {
        self.staging.join(format!("update-{version}"))
    }

    pub fn ensure(&self) -> Result<(), LauncherError> {
        for path in [&self.root, &self.projects, &self.staging, &self.logs] {
            fs::create_dir_all(path).map_err(|source| LauncherError::Write {
                path: path.clone(),
                source,
            })?;
        }
        Ok(())
    }
}

/// How the editor of one project gets started.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EditorLaunchPlan {
    pub executable: PathBuf,
    pub working_dir: PathBuf,
    pub project: PathBuf,
    pub launcher: PathBuf,
    pub safe_mode: bool,
}

impl EditorLaunchPlan {
    pub fn new(project: &Path, launcher: &Path, safe_mode: bool) -> Self {
        let paths = ProjectPaths::new(project);
        let executable = paths.editor_executable();
        let working_dir = executable
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| project.to_path_buf());
        Self {
            executable,
            working_dir,
            project: project.to_path_buf(),
            launcher: launcher.to_path_buf(),
            safe_mode,
        }
    }

    pub fn command(&self) -> Result<CommandSpec, ProcessError> {
        if !self.executable.is_file() {
            return Err(ProcessError::EditorNotFound(self.executable.clone()));
        }
        let mut command = CommandSpec::new(&self.executable)
            .arg("--project")
            .arg(self.project.to_string_lossy())
            .arg("--launcher")
            .arg(self.launcher.to_string_lossy())
            .current_dir(&self.working_dir);
        if self.safe_mode {
            command = command.arg("--dont-load-dll");
        }
        Ok(command)
    }
}

/// Build script invocation, run from the project root.
pub fn build_command(project: &Path, clean: bool) -> Result<CommandSpec, ProcessError> {
    let script = ProjectPaths::new(project).build_script();
    if !script.is_file() {
        return Err(ProcessError::BuildScriptNotFound(script));
    }

    let mut command = if cfg!(windows) {
        CommandSpec::new(&script)
    } else {
        CommandSpec::new("sh").arg(script.to_string_lossy())
    };
    if clean {
        command = command.arg("--clean");
    }
    Ok(command.current_dir(project))
}

/// The running launcher binary. Falls back to the bare binary name when the
/// platform cannot tell.
pub fn current_launcher_exe() -> PathBuf {
    std::env::current_exe().unwrap_or_else(|error| {
        tracing::warn!("Unable to resolve launcher executable: {error}");
        PathBuf::from(if cfg!(windows) {
            "halley-launcher.exe"
        } else {
            "halley-launcher"
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_creates_its_directories() {
        let dir = tempfile::tempdir().expect("tempdir");
        let layout = LauncherDataLayout::from_root(&dir.path().join("data"));
        layout.ensure().expect("ensure");
        assert!(layout.projects.is_dir());
        assert!(layout.staging.is_dir());
        assert!(layout.logs.is_dir());
        assert_eq!(
            layout.update_staging_dir(7),
            dir.path().join("data/staging/update-7")
        );
    }

    #[test]
    fn editor_command_requires_executable() {
        let dir = tempfile::tempdir().expect("tempdir");
        let plan = EditorLaunchPlan::new(dir.path(), Path::new("/opt/halley-launcher"), true);
        assert!(matches!(plan.command(), Err(ProcessError::EditorNotFound(_))));

        let exe = ProjectPaths::new(dir.path()).editor_executable();
        fs::create_dir_all(exe.parent().expect("bin")).expect("mkdir");
        fs::write(&exe, b"").expect("touch");

        let command = plan.command().expect("command");
        assert_eq!(command.program, exe);
        assert_eq!(command.working_dir.as_deref(), exe.parent());
        assert_eq!(
            command.args,
            [
                "--project".to_string(),
                dir.path().to_string_lossy().to_string(),
                "--launcher".to_string(),
                "/opt/halley-launcher".to_string(),
                "--dont-load-dll".to_string(),
            ]
        );
    }

    #[test]
    fn build_command_passes_clean_flag() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert!(matches!(
            build_command(dir.path(), false),
            Err(ProcessError::BuildScriptNotFound(_))
        ));

        let script = ProjectPaths::new(dir.path()).build_script();
        fs::create_dir_all(script.parent().expect("scripts")).expect("mkdir");
        fs::write(&script, b"exit 0").expect("script");

        let clean = build_command(dir.path(), true).expect("command");
        assert_eq!(clean.args.last().map(String::as_str), Some("--clean"));
        assert_eq!(clean.working_dir.as_deref(), Some(dir.path()));

        let incremental = build_command(dir.path(), false).expect("command");
        assert!(!incremental.args.iter().any(|arg| arg == "--clean"));
    }
}
