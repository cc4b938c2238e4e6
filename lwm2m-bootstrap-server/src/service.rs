//! Async facade over [`SessionOrchestrator`] for transport layers.
//!
//! Sessions live in a [`SessionRegistry`] and are addressed by [`SessionId`].
//! Every orchestrator call runs on the blocking pool because authorizers and
//! task sources may block on their stores.

use std::sync::Arc;

use lwm2m_bootstrap_auth::SecurityAuthorizer;
use lwm2m_bootstrap_core::{
    AuditSink, BootstrapPolicy, BootstrapSession, DeviceIdentity, EndpointName, FailureCause,
    OrchestratorError, Outcome, ProvisioningOperation, SessionId, SessionOrchestrator,
};

use crate::bootstrap_config::BootstrapConfigStore;
use crate::config::{ConfigError, ServerConfig};
use crate::credentials::InMemorySecurityStore;
use crate::registry::{SessionRegistry, SharedSession};
use crate::task_provider::ConfigStoreTaskProvider;

/// Errors surfaced to the transport layer.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ServiceError {
    #[error("unknown session: {0}")]
    UnknownSession(SessionId),

    #[error(transparent)]
    Orchestrator(#[from] OrchestratorError),

    #[error("session {0} was poisoned by a panic")]
    Poisoned(SessionId),

    #[error("blocking task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Returned by [`BootstrapService::begin`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionStart {
    pub id: SessionId,
    pub authorized: bool,
}

/// Stores a [`BootstrapService`] reads from, kept for hot reload.
#[derive(Debug, Clone)]
pub struct Stores {
    pub configs: Arc<BootstrapConfigStore>,
    pub credentials: Arc<InMemorySecurityStore>,
}

impl Stores {
    /// Validate `config` and swap it into both stores.
    ///
    /// Templates are swapped first so X.509 checks never see a credential
    /// set that is newer than the templates.
    pub fn reload(&self, config: &ServerConfig) -> Result<(), ConfigError> {
        config.validate()?;
        self.configs.replace_all(config.bootstrap.iter().cloned())?;
        self.credentials.replace_all(config.security.iter().cloned())?;
        tracing::info!(
            templates = self.configs.len(),
            credentials = self.credentials.len(),
            "Configuration reloaded"
        );
        Ok(())
    }
}

/// Drives bootstrap sessions on behalf of a transport layer.
#[derive(Debug)]
pub struct BootstrapService {
    orchestrator: Arc<SessionOrchestrator>,
    registry: SessionRegistry,
}

impl BootstrapService {
    pub fn new(orchestrator: SessionOrchestrator) -> Self {
        Self {
            orchestrator: Arc::new(orchestrator),
            registry: SessionRegistry::new(),
        }
    }

    /// Wire the in-memory stores, credential authorizer and template task
    /// provider from a configuration file.
    pub fn from_config(
        config: &ServerConfig,
        audit: Arc<dyn AuditSink>,
    ) -> Result<(Self, Stores), ConfigError> {
        config.validate()?;
        let configs = Arc::new(BootstrapConfigStore::from_configs(
            config.bootstrap.iter().cloned(),
        )?);
        let credentials = Arc::new(InMemorySecurityStore::new(
            config.security.iter().cloned(),
            configs.clone(),
        )?);

        let orchestrator = SessionOrchestrator::new(
            Arc::new(SecurityAuthorizer::new(credentials.clone())),
            Arc::new(ConfigStoreTaskProvider::new(configs.clone())),
            audit,
        )
        .with_config(config.orchestrator.clone());

        Ok((
            Self::new(orchestrator),
            Stores {
                configs,
                credentials,
            },
        ))
    }

    pub fn orchestrator(&self) -> &SessionOrchestrator {
        &self.orchestrator
    }

    // ── Session lifecycle ─────────────────────────────────────────────────

    /// Open and register a session. Refused devices are registered too, so
    /// the transport can report the failure through [`fail`](Self::fail).
    pub async fn begin(
        &self,
        endpoint: EndpointName,
        identity: DeviceIdentity,
    ) -> Result<SessionStart, ServiceError> {
        let orchestrator = self.orchestrator.clone();
        let session =
            tokio::task::spawn_blocking(move || orchestrator.begin(endpoint, identity)).await?;

        let authorized = session.is_authorized();
        tracing::debug!(
            session = %session.id(),
            endpoint = %session.endpoint(),
            authorized,
            "Session opened"
        );
        let id = self.registry.insert(session).await;
        Ok(SessionStart { id, authorized })
    }

    pub async fn has_work(&self, id: SessionId) -> Result<bool, ServiceError> {
        self.with_session(id, |o, s| Ok(o.has_work(s)?)).await
    }

    pub async fn first_operation(
        &self,
        id: SessionId,
    ) -> Result<ProvisioningOperation, ServiceError> {
        self.with_session(id, |o, s| Ok(o.first_operation(s)?)).await
    }

    /// Report what happened to `operation` and learn what to do next.
    pub async fn report(
        &self,
        id: SessionId,
        operation: ProvisioningOperation,
        outcome: Outcome,
    ) -> Result<BootstrapPolicy, ServiceError> {
        self.with_session(id, move |o, s| Ok(o.report(s, operation, outcome)?))
            .await
    }

    /// Close a completed exchange and forget the session.
    pub async fn end(&self, id: SessionId) -> Result<(), ServiceError> {
        let session = self.take(id).await?;
        let orchestrator = self.orchestrator.clone();
        tokio::task::spawn_blocking(move || {
            let session = lock(&session, id)?;
            orchestrator.end(&session);
            Ok::<_, ServiceError>(())
        })
        .await?
    }

    /// Abort an exchange and forget the session.
    pub async fn fail(&self, id: SessionId, cause: FailureCause) -> Result<(), ServiceError> {
        let session = self.take(id).await?;
        let orchestrator = self.orchestrator.clone();
        tokio::task::spawn_blocking(move || {
            let session = lock(&session, id)?;
            tracing::debug!(session = %id, endpoint = %session.endpoint(), %cause, "Session failed");
            orchestrator.on_failed(&session, cause);
            Ok::<_, ServiceError>(())
        })
        .await?
    }

    // ── Introspection ─────────────────────────────────────────────────────

    /// A copy of the session's current state.
    pub async fn snapshot(&self, id: SessionId) -> Result<BootstrapSession, ServiceError> {
        let session = self
            .registry
            .get(&id)
            .await
            .ok_or(ServiceError::UnknownSession(id))?;
        let guard = lock(&session, id)?;
        Ok(guard.clone())
    }

    pub async fn active_sessions(&self) -> usize {
        self.registry.len().await
    }

    // ── Internals ─────────────────────────────────────────────────────────

    async fn take(&self, id: SessionId) -> Result<SharedSession, ServiceError> {
        self.registry
            .remove(&id)
            .await
            .ok_or(ServiceError::UnknownSession(id))
    }

    async fn with_session<T, F>(&self, id: SessionId, f: F) -> Result<T, ServiceError>
    where
        T: Send + 'static,
        F: FnOnce(&SessionOrchestrator, &mut BootstrapSession) -> Result<T, ServiceError>
            + Send
            + 'static,
    {
        let session = self
            .registry
            .get(&id)
            .await
            .ok_or(ServiceError::UnknownSession(id))?;
        let orchestrator = self.orchestrator.clone();

        tokio::task::spawn_blocking(move || {
            let mut guard = lock(&session, id)?;
            f(&orchestrator, &mut guard)
        })
        .await?
    }
}

fn lock(
    session: &SharedSession,
    id: SessionId,
) -> Result<std::sync::MutexGuard<'_, BootstrapSession>, ServiceError> {
    session.lock().map_err(|_| ServiceError::Poisoned(id))
}
