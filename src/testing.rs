//! In-memory doubles for the VCS seams, shared by unit and integration tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::HookError;
use crate::vcs::{
    CreateWebhookOptions, DeleteWebhookOptions, GetWebhookOptions, Repository,
    UpdateWebhookOptions, VcsClient, VcsError, VcsProvider, VcsProviderResolver, Webhook,
};

/// One recorded call against [`FakeVcsClient`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VcsCall {
    GetRepository(String),
    CreateWebhook(CreateWebhookOptions),
    GetWebhook { repo: String, id: String },
    UpdateWebhook(UpdateWebhookOptions),
    DeleteWebhook { repo: String, id: String },
}

#[derive(Debug, Default)]
struct Failures {
    get_repository: Option<u16>,
    create_webhook: Option<u16>,
    get_webhook: Option<u16>,
    update_webhook: Option<u16>,
    delete_webhook: Option<u16>,
}

#[derive(Debug, Default)]
struct State {
    calls: Vec<VcsCall>,
    webhooks: HashMap<String, Webhook>,
    next_ids: VecDeque<String>,
    counter: u64,
    missing_repos: HashSet<String>,
    failures: Failures,
}

/// Stateful fake provider: registered webhooks live in memory, every call is
/// recorded, and individual operations can be made to fail.
#[derive(Debug, Default)]
pub struct FakeVcsClient {
    state: Mutex<State>,
}

fn injected(status: u16) -> VcsError {
    match status {
        404 => VcsError::NotFound,
        401 | 403 => VcsError::Unauthorized { status },
        _ => VcsError::Api {
            status,
            message: "injected failure".into(),
        },
    }
}

impl FakeVcsClient {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Queues the id handed out by the next `create_webhook`.
    pub fn with_next_cloud_id(self, id: &str) -> Self {
        self.state().next_ids.push_back(id.to_string());
        self
    }

    /// Seeds an already-registered webhook.
    pub fn with_webhook(self, webhook: Webhook) -> Self {
        self.state().webhooks.insert(webhook.id.clone(), webhook);
        self
    }

    /// Makes `get_repository` report the repository as missing.
    pub fn with_missing_repository(self, identifier: &str) -> Self {
        self.state().missing_repos.insert(identifier.to_string());
        self
    }

    pub fn fail_get_repository(self, status: u16) -> Self {
        self.state().failures.get_repository = Some(status);
        self
    }

    pub fn fail_create_webhook(self, status: u16) -> Self {
        self.state().failures.create_webhook = Some(status);
        self
    }

    pub fn fail_get_webhook(self, status: u16) -> Self {
        self.state().failures.get_webhook = Some(status);
        self
    }

    pub fn fail_update_webhook(self, status: u16) -> Self {
        self.state().failures.update_webhook = Some(status);
        self
    }

    pub fn fail_delete_webhook(self, status: u16) -> Self {
        self.state().failures.delete_webhook = Some(status);
        self
    }

    /// Clears every injected failure.
    pub fn heal(&self) {
        self.state().failures = Failures::default();
    }

    pub fn calls(&self) -> Vec<VcsCall> {
        self.state().calls.clone()
    }

    pub fn count(&self, predicate: impl Fn(&VcsCall) -> bool) -> usize {
        self.state().calls.iter().filter(|call| predicate(call)).count()
    }

    /// Webhooks currently registered, keyed by provider id.
    pub fn webhooks(&self) -> HashMap<String, Webhook> {
        self.state().webhooks.clone()
    }
}

#[async_trait]
impl VcsClient for FakeVcsClient {
    async fn get_repository(&self, identifier: &str) -> Result<Repository, VcsError> {
        let mut state = self.state();
        state.calls.push(VcsCall::GetRepository(identifier.to_string()));
        if let Some(status) = state.failures.get_repository {
            return Err(injected(status));
        }
        if state.missing_repos.contains(identifier) {
            return Err(VcsError::NotFound);
        }
        Ok(Repository {
            identifier: identifier.to_string(),
            default_branch: "main".into(),
        })
    }

    async fn create_webhook(&self, opts: CreateWebhookOptions) -> Result<String, VcsError> {
        let mut state = self.state();
        state.calls.push(VcsCall::CreateWebhook(opts.clone()));
        if let Some(status) = state.failures.create_webhook {
            return Err(injected(status));
        }
        let id = match state.next_ids.pop_front() {
            Some(id) => id,
            None => {
                state.counter += 1;
                format!("fake-{}", state.counter)
            }
        };
        state.webhooks.insert(
            id.clone(),
            Webhook {
                id: id.clone(),
                repo: opts.repo,
                events: opts.events,
                endpoint: opts.endpoint,
            },
        );
        Ok(id)
    }

    async fn get_webhook(&self, opts: GetWebhookOptions) -> Result<Webhook, VcsError> {
        let mut state = self.state();
        state.calls.push(VcsCall::GetWebhook {
            repo: opts.repo.clone(),
            id: opts.id.clone(),
        });
        if let Some(status) = state.failures.get_webhook {
            return Err(injected(status));
        }
        state
            .webhooks
            .get(&opts.id)
            .filter(|hook| hook.repo == opts.repo)
            .cloned()
            .ok_or(VcsError::NotFound)
    }

    async fn update_webhook(&self, opts: UpdateWebhookOptions) -> Result<(), VcsError> {
        let mut state = self.state();
        state.calls.push(VcsCall::UpdateWebhook(opts.clone()));
        if let Some(status) = state.failures.update_webhook {
            return Err(injected(status));
        }
        let hook = state.webhooks.get_mut(&opts.id).ok_or(VcsError::NotFound)?;
        hook.events = opts.webhook.events;
        hook.endpoint = opts.webhook.endpoint;
        Ok(())
    }

    async fn delete_webhook(&self, opts: DeleteWebhookOptions) -> Result<(), VcsError> {
        let mut state = self.state();
        state.calls.push(VcsCall::DeleteWebhook {
            repo: opts.repo.clone(),
            id: opts.id.clone(),
        });
        if let Some(status) = state.failures.delete_webhook {
            return Err(injected(status));
        }
        state
            .webhooks
            .remove(&opts.id)
            .map(|_| ())
            .ok_or(VcsError::NotFound)
    }
}

/// Fixed provider table for exercising the connection service without a
/// credential store.
#[derive(Default, Clone)]
pub struct StaticProviderResolver {
    providers: HashMap<Uuid, (VcsProvider, Arc<dyn VcsClient>)>,
    invalid_credentials: HashSet<Uuid>,
}

impl StaticProviderResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_provider(mut self, provider: VcsProvider, client: Arc<dyn VcsClient>) -> Self {
        self.providers.insert(provider.id, (provider, client));
        self
    }

    /// Makes client resolution for `id` fail as if its token were unusable.
    pub fn with_invalid_credentials(mut self, id: Uuid) -> Self {
        self.invalid_credentials.insert(id);
        self
    }
}

#[async_trait]
impl VcsProviderResolver for StaticProviderResolver {
    async fn get_vcs_provider(&self, id: Uuid) -> Result<VcsProvider, HookError> {
        self.providers
            .get(&id)
            .map(|(provider, _)| provider.clone())
            .ok_or_else(|| HookError::not_found(format!("vcs provider {id}")))
    }

    async fn get_vcs_client(&self, id: Uuid) -> Result<Arc<dyn VcsClient>, HookError> {
        if self.invalid_credentials.contains(&id) {
            return Err(HookError::InvalidCredentials {
                vcs_provider_id: id,
                reason: "token rejected".into(),
            });
        }
        self.providers
            .get(&id)
            .map(|(_, client)| client.clone())
            .ok_or_else(|| HookError::not_found(format!("vcs provider {id}")))
    }
}
