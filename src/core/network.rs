use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SessionRequest<'a> {
    pub(crate) username: &'a str,
    pub(crate) password: &'a str,
    pub(crate) project: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SessionResponse {
    #[serde(default)]
    pub(crate) token: String,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RemoteErrorBody {
    #[serde(default)]
    pub(crate) error_msg: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ExternalProjectEnvelope {
    #[serde(default)]
    pub(crate) files: Vec<ExternalProjectFile>,
    /// Older services send only the manifest and icon, base64 encoded.
    #[serde(default)]
    pub(crate) properties: Option<String>,
    #[serde(default)]
    pub(crate) icon: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ExternalProjectFile {
    pub(crate) path: String,
    /// Base64 encoded content.
    #[serde(default)]
    pub(crate) bytes: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct UpdateManifestDocument {
    #[serde(default)]
    pub(crate) version: u32,
    #[serde(default)]
    pub(crate) download: BTreeMap<String, PlatformDownloadEntry>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub(crate) struct PlatformDownloadEntry {
    pub(crate) url: String,
    /// Base64 encoded detached signature of the archive.
    #[serde(default)]
    pub(crate) signature: String,
}
