//! Caller identity as seen by the engine: an opaque bearer credential.
//!
//! The engine never inspects tokens. A [`Session`] carries the provider that
//! mints them and is handed to every coordinator operation explicitly.

use std::fmt;
use std::sync::Arc;

use anyhow::anyhow;
use async_trait::async_trait;

use crate::config::Config;

/// Opaque bearer credential scoped to one user.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    subject: String,
    token: String,
}

impl Credential {
    pub fn new(subject: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            token: token.into(),
        }
    }

    /// Stable user identifier that storage scopes records by.
    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn bearer_token(&self) -> &str {
        &self.token
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("subject", &self.subject)
            .field("token", &"<redacted>")
            .finish()
    }
}

#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Fetch a credential for the current user. May suspend or fail.
    async fn credential(&self) -> anyhow::Result<Credential>;
}

/// Capability passed into every lifecycle operation.
#[derive(Clone)]
pub struct Session {
    provider: Arc<dyn CredentialProvider>,
}

impl Session {
    pub fn new(provider: Arc<dyn CredentialProvider>) -> Self {
        Self { provider }
    }

    pub async fn credential(&self) -> anyhow::Result<Credential> {
        self.provider.credential().await
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session").finish_non_exhaustive()
    }
}

/// Credentials taken from the environment or the rc file.
#[derive(Debug, Clone, Default)]
pub struct StaticCredentials {
    subject: Option<String>,
    token: Option<String>,
}

impl StaticCredentials {
    pub fn new(subject: Option<String>, token: Option<String>) -> Self {
        Self { subject, token }
    }

    /// `FORETHOUGHT_USER` / `FORETHOUGHT_TOKEN` win over `auth.user` /
    /// `auth.token`.
    pub fn from_config(cfg: &Config) -> Self {
        let subject = std::env::var("FORETHOUGHT_USER")
            .ok()
            .or_else(|| cfg.get("auth.user"));
        let token = std::env::var("FORETHOUGHT_TOKEN")
            .ok()
            .or_else(|| cfg.get("auth.token"));
        Self::new(subject, token)
    }
}

#[async_trait]
impl CredentialProvider for StaticCredentials {
    async fn credential(&self) -> anyhow::Result<Credential> {
        let subject = self
            .subject
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| anyhow!("no user configured; set auth.user or FORETHOUGHT_USER"))?;
        Ok(Credential::new(subject, self.token.clone().unwrap_or_default()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_credentials_require_a_subject() {
        let missing = StaticCredentials::new(Some("  ".to_string()), None);
        assert!(missing.credential().await.is_err());

        let present = StaticCredentials::new(Some("ada".to_string()), Some("t0k".to_string()));
        let credential = present.credential().await.expect("credential");
        assert_eq!(credential.subject(), "ada");
        assert_eq!(credential.bearer_token(), "t0k");
    }

    #[test]
    fn debug_output_redacts_token() {
        let credential = Credential::new("ada", "secret-token");
        let rendered = format!("{credential:?}");
        assert!(rendered.contains("ada"));
        assert!(!rendered.contains("secret-token"));
    }
}
