use std::path::PathBuf;
use std::sync::Arc;

use crate::core::config::LauncherConfig;
use crate::core::downloader::{HttpTransport, ReqwestTransport};
use crate::core::error::LauncherError;
use crate::core::launch_pipeline::AcquisitionPipeline;
use crate::core::launcher::{current_launcher_exe, LauncherDataLayout};
use crate::core::process_runner::{ProcessRunner, SystemProcessRunner};
use crate::core::update::SelfUpdatePipeline;
use crate::core::validator::{verifier_from_key, SignatureVerifier};
use crate::core::web_client::RemoteProjectClient;

/// Long-lived collaborators shared by every pipeline the stage starts.
pub struct LauncherServices {
    pub config: LauncherConfig,
    pub layout: LauncherDataLayout,
    pub transport: Arc<dyn HttpTransport>,
    pub client: Arc<RemoteProjectClient>,
    pub runner: Arc<dyn ProcessRunner>,
    pub verifier: Arc<dyn SignatureVerifier>,
    pub launcher_exe: PathBuf,
}

impl LauncherServices {
    pub fn from_config(config: LauncherConfig) -> Result<Self, LauncherError> {
        let transport: Arc<dyn HttpTransport> =
            Arc::new(ReqwestTransport::new(&config.network_tuning())?);
        let verifier: Arc<dyn SignatureVerifier> =
            Arc::from(verifier_from_key(config.update_public_key.as_deref()));
        Ok(Self::with_parts(
            config,
            transport,
            Arc::new(SystemProcessRunner),
            verifier,
            current_launcher_exe(),
        ))
    }

    pub fn with_parts(
        config: LauncherConfig,
        transport: Arc<dyn HttpTransport>,
        runner: Arc<dyn ProcessRunner>,
        verifier: Arc<dyn SignatureVerifier>,
        launcher_exe: PathBuf,
    ) -> Self {
        let layout = LauncherDataLayout::from_root(&config.data_dir());
        let client = Arc::new(RemoteProjectClient::new(
            transport.clone(),
            layout.projects.clone(),
            config.editor_archive_base_url(),
        ));
        Self {
            config,
            layout,
            transport,
            client,
            runner,
            verifier,
            launcher_exe,
        }
    }

    pub fn acquisition_pipeline(&self) -> AcquisitionPipeline {
        AcquisitionPipeline::new(
            self.client.clone(),
            self.runner.clone(),
            self.launcher_exe.clone(),
        )
    }

    pub fn self_update_pipeline(&self, version: u32) -> SelfUpdatePipeline {
        SelfUpdatePipeline::new(
            self.transport.clone(),
            self.verifier.clone(),
            self.runner.clone(),
            self.layout.update_staging_dir(version),
            self.launcher_exe.clone(),
        )
    }
}
