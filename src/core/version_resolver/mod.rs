use serde::Serialize;

use crate::core::project_properties::ProjectProperties;
use crate::core::version::HalleyVersion;

/// What has to happen before a project's editor can be started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum AcquisitionPlan {
    /// The built editor matches the required version.
    Launch,
    /// Local checkout: run the build script.
    Build { clean: bool },
    /// Remote-tracked: fetch the published editor archive.
    Download { version: HalleyVersion },
}

impl AcquisitionPlan {
    pub fn describe(&self) -> String {
        match self {
            AcquisitionPlan::Launch => "Editor is up to date".to_string(),
            AcquisitionPlan::Build { clean: true } => "Clean build required".to_string(),
            AcquisitionPlan::Build { clean: false } => "Incremental build required".to_string(),
            AcquisitionPlan::Download { version } => format!("Editor {version} must be downloaded"),
        }
    }
}

/// Unknown versions count as zero, so a project whose built version cannot
/// be read is always rebuilt or redownloaded.
pub fn plan_acquisition(properties: &ProjectProperties, remote_tracked: bool) -> AcquisitionPlan {
    if properties.is_up_to_date() {
        return AcquisitionPlan::Launch;
    }
    if remote_tracked {
        return AcquisitionPlan::Download {
            version: properties.required_version,
        };
    }
    AcquisitionPlan::Build {
        clean: properties.needs_clean_build(),
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    fn properties(required: &str, built: &str, threshold: &str) -> ProjectProperties {
        ProjectProperties {
            path: PathBuf::from("/projects/demo"),
            name: "Demo".to_string(),
            icon: None,
            required_version: HalleyVersion::parse(required),
            built_version: HalleyVersion::parse(built),
            clean_build_threshold: HalleyVersion::parse(threshold),
        }
    }

    #[test]
    fn matching_versions_launch_directly() {
        let props = properties("1.2.3", "1.2.3", "9.9.9");
        assert_eq!(plan_acquisition(&props, true), AcquisitionPlan::Launch);
        assert_eq!(plan_acquisition(&props, false), AcquisitionPlan::Launch);
    }

    #[test]
    fn remote_projects_download_the_required_version() {
        let props = properties("1.2.3", "1.0.0", "0.0.0");
        assert_eq!(
            plan_acquisition(&props, true),
            AcquisitionPlan::Download {
                version: HalleyVersion::new(1, 2, 3)
            }
        );
    }

    #[test]
    fn clean_flag_follows_threshold() {
        assert_eq!(
            plan_acquisition(&properties("1.2.3", "1.0.0", "1.1.0"), false),
            AcquisitionPlan::Build { clean: true }
        );
        assert_eq!(
            plan_acquisition(&properties("1.2.3", "1.1.0", "1.1.0"), false),
            AcquisitionPlan::Build { clean: false }
        );
    }

    #[test]
    fn unbuilt_project_with_threshold_gets_clean_build() {
        assert_eq!(
            plan_acquisition(&properties("1.2.3", "", "0.0.1"), false),
            AcquisitionPlan::Build { clean: true }
        );
    }
}
