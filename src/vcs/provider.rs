//! Resolves stored VCS providers into authenticated clients.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use super::{Cloud, GitHubClient, GitLabClient, VcsClient, VcsProvider, VcsProviderResolver};
use crate::config::AppConfig;
use crate::error::HookError;
use crate::repositories::VcsProviderRepository;

/// Database-backed [`VcsProviderResolver`].
#[derive(Debug, Clone)]
pub struct VcsProviderService {
    repo: VcsProviderRepository,
    github_api_base: String,
    gitlab_api_base: String,
    timeout: Duration,
}

impl VcsProviderService {
    pub fn new(repo: VcsProviderRepository, config: &AppConfig) -> Self {
        Self {
            repo,
            github_api_base: config.github_api_base.clone(),
            gitlab_api_base: config.gitlab_api_base.clone(),
            timeout: Duration::from_secs(config.vcs_http_timeout_secs),
        }
    }

    pub fn repository(&self) -> &VcsProviderRepository {
        &self.repo
    }

    fn default_api_base(&self, cloud: Cloud) -> &str {
        match cloud {
            Cloud::GitHub => &self.github_api_base,
            Cloud::GitLab => &self.gitlab_api_base,
        }
    }
}

#[async_trait]
impl VcsProviderResolver for VcsProviderService {
    async fn get_vcs_provider(&self, id: Uuid) -> Result<VcsProvider, HookError> {
        self.repo.get(id).await
    }

    async fn get_vcs_client(&self, id: Uuid) -> Result<Arc<dyn VcsClient>, HookError> {
        let model = self
            .repo
            .find_by_id(id)
            .await?
            .ok_or_else(|| HookError::not_found(format!("vcs provider {id}")))?;
        let cloud: Cloud = model.cloud.parse()?;
        let token = self.repo.decrypt_token(&model)?;
        let api_base = model
            .api_base
            .as_deref()
            .unwrap_or_else(|| self.default_api_base(cloud));

        let client: Arc<dyn VcsClient> = match cloud {
            Cloud::GitHub => Arc::new(
                GitHubClient::new(api_base, token.as_str(), self.timeout)
                    .map_err(HookError::vcs("building github client"))?,
            ),
            Cloud::GitLab => Arc::new(
                GitLabClient::new(api_base, token.as_str(), self.timeout)
                    .map_err(HookError::vcs("building gitlab client"))?,
            ),
        };
        Ok(client)
    }
}
