//! Entry point for applications: wires the store, coordinator, gate and
//! scheduler together and exposes the login/logout surface.

use std::sync::Arc;

use anyhow::Result;
use tracing::{info, warn};

use crate::api::{
    ApiError, HttpIdentityClient, IdentityBackend, Navigator, PublicRoutes, RequestGate,
    ReqwestTransport, Transport,
};
use crate::auth::{
    FileStorage, KeyringStorage, RefreshCoordinator, RenewalScheduler, Role, Session,
    SessionStorage, SessionStore, Subscription, Visibility,
};
use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::error::SessionError;

/// External collaborators the manager is built from.
pub struct Collaborators {
    pub storage: Box<dyn SessionStorage>,
    pub backend: Arc<dyn IdentityBackend>,
    pub transport: Arc<dyn Transport>,
    pub navigator: Arc<dyn Navigator>,
    pub clock: Arc<dyn Clock>,
}

pub struct SessionManager {
    store: Arc<SessionStore>,
    backend: Arc<dyn IdentityBackend>,
    coordinator: RefreshCoordinator,
    gate: RequestGate,
    scheduler: RenewalScheduler,
}

impl SessionManager {
    pub fn new(config: &Config, parts: Collaborators) -> Self {
        let store = Arc::new(SessionStore::new(
            parts.storage,
            &config.storage_key,
            Arc::clone(&parts.clock),
        ));
        let coordinator = RefreshCoordinator::new(Arc::clone(&parts.backend), Arc::clone(&store));

        let (public_routes, rejected) = PublicRoutes::from_patterns(&config.public_routes);
        let (public_views, rejected_views) = PublicRoutes::from_patterns(&config.public_views);
        for pattern in rejected.iter().chain(rejected_views.iter()) {
            warn!(pattern = %pattern, "Ignoring invalid public route pattern");
        }

        let gate = RequestGate::new(
            parts.transport,
            Arc::clone(&store),
            coordinator.clone(),
            public_routes,
            public_views,
            parts.navigator,
            Arc::clone(&parts.clock),
        );
        let scheduler = RenewalScheduler::new(
            Arc::clone(&store),
            coordinator.clone(),
            parts.clock,
            config.renewal_interval(),
            config.renewal_horizon(),
        );
        scheduler.attach();

        Self {
            store,
            backend: parts.backend,
            coordinator,
            gate,
            scheduler,
        }
    }

    /// Manager talking HTTP to the configured backends, with the session
    /// record in the cache directory or the OS keychain.
    pub fn from_config(config: &Config, navigator: Arc<dyn Navigator>) -> Result<Self> {
        let backend = HttpIdentityClient::new(&config.auth_base_url, config.request_timeout())?;
        let transport = ReqwestTransport::new(&config.api_base_url, config.request_timeout())?;
        let storage: Box<dyn SessionStorage> = if config.use_keychain {
            Box::new(KeyringStorage::new())
        } else {
            Box::new(FileStorage::new(config.cache_dir()?))
        };

        Ok(Self::new(
            config,
            Collaborators {
                storage,
                backend: Arc::new(backend),
                transport: Arc::new(transport),
                navigator,
                clock: Arc::new(SystemClock),
            },
        ))
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<Session, ApiError> {
        let session = self.backend.login(email, password).await?.into_session();
        self.store.save(&session)?;
        info!(user_id = %session.user_id, role = %session.role, "Logged in");
        Ok(session)
    }

    /// End the session. The backend is told on a best-effort basis; the local
    /// session is cleared either way.
    pub async fn logout(&self) -> Result<(), SessionError> {
        let access_token = self.store.access_token();
        if let Err(e) = self.backend.logout(access_token.as_deref()).await {
            warn!(error = %e, "Backend logout failed, clearing local session anyway");
        }
        self.store.clear()?;
        info!("Logged out");
        Ok(())
    }

    pub fn is_logged_in(&self) -> bool {
        self.store.is_logged_in()
    }

    pub fn user_role(&self) -> Option<Role> {
        self.store.user_role()
    }

    pub fn current_session(&self) -> Option<Session> {
        self.store.get()
    }

    pub fn on_session_change<F>(&self, callback: F) -> Subscription
    where
        F: Fn(Option<&Session>) + Send + Sync + 'static,
    {
        self.store.on_session_change(callback)
    }

    pub async fn on_visibility_change(&self, visibility: Visibility) -> bool {
        self.scheduler.on_visibility_change(visibility).await
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    pub fn gate(&self) -> &RequestGate {
        &self.gate
    }

    pub fn coordinator(&self) -> &RefreshCoordinator {
        &self.coordinator
    }

    pub fn scheduler(&self) -> &RenewalScheduler {
        &self.scheduler
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        self.scheduler.detach();
    }
}
