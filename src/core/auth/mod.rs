use serde::{Deserialize, Serialize};

use crate::core::settings::ProjectParams;

pub const PARAM_URL: &str = "url";
pub const PARAM_PROJECT: &str = "project";
pub const PARAM_USERNAME: &str = "username";
pub const PARAM_PASSWORD: &str = "password";

/// Connection parameters of a remote-tracked project, as stored in its
/// registry entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteCredentials {
    pub url: String,
    pub project: String,
    pub username: String,
    pub password: String,
}

impl RemoteCredentials {
    pub fn new(
        url: impl Into<String>,
        project: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            url: url.into(),
            project: project.into(),
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn from_params(params: &ProjectParams) -> Option<Self> {
        let field = |key: &str| {
            params
                .get(key)
                .map(|value| value.trim())
                .filter(|value| !value.is_empty())
                .map(str::to_string)
        };

        let credentials = Self {
            url: field(PARAM_URL)?,
            project: field(PARAM_PROJECT)?,
            username: field(PARAM_USERNAME)?,
            password: params.get(PARAM_PASSWORD).cloned().unwrap_or_default(),
        };
        credentials.is_complete().then_some(credentials)
    }

    pub fn to_params(&self) -> ProjectParams {
        ProjectParams::from([
            (PARAM_URL.to_string(), self.url.clone()),
            (PARAM_PROJECT.to_string(), self.project.clone()),
            (PARAM_USERNAME.to_string(), self.username.clone()),
            (PARAM_PASSWORD.to_string(), self.password.clone()),
        ])
    }

    /// The service URL without a trailing slash.
    pub fn base_url(&self) -> &str {
        self.url.trim_end_matches('/')
    }

    pub fn is_complete(&self) -> bool {
        self.url.starts_with("http")
            && !self.project.is_empty()
            && !self.username.is_empty()
            && !self.password.is_empty()
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct SessionToken(String);

impl SessionToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn authorization_header(&self) -> String {
        format!("Bearer {}", self.0)
    }
}

impl std::fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SessionToken(..)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credentials_round_trip_through_params() {
        let credentials = RemoteCredentials::new("https://hub.test/api/", "game", "ana", "s3cret");
        let params = credentials.to_params();
        assert_eq!(RemoteCredentials::from_params(&params), Some(credentials.clone()));
        assert_eq!(credentials.base_url(), "https://hub.test/api");
        assert!(credentials.is_complete());
    }

    #[test]
    fn url_alone_is_not_a_credential_set() {
        let params = ProjectParams::from([(PARAM_URL.to_string(), "https://hub.test".to_string())]);
        assert_eq!(RemoteCredentials::from_params(&params), None);
    }

    #[test]
    fn stored_and_entered_credentials_follow_one_rule() {
        let no_password = RemoteCredentials::new("https://hub.test", "game", "ana", "");
        assert!(!no_password.is_complete());
        assert_eq!(RemoteCredentials::from_params(&no_password.to_params()), None);

        let not_http = RemoteCredentials::new("ftp://hub.test", "game", "ana", "pw");
        assert!(!not_http.is_complete());
        assert_eq!(RemoteCredentials::from_params(&not_http.to_params()), None);
    }

    #[test]
    fn token_debug_hides_secret() {
        let token = SessionToken::new("abc");
        assert_eq!(format!("{token:?}"), "SessionToken(..)");
        assert_eq!(token.authorization_header(), "Bearer abc");
    }
}
