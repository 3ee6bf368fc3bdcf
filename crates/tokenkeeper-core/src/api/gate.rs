//! The request gate every outbound API call passes through.
//!
//! It attaches the current access credential, and when the backend answers
//! 401 it renews the credential through the [`RefreshCoordinator`] and replays
//! the call once. It is the only place a request is ever retried.

use std::sync::Arc;

use reqwest::StatusCode;
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, info, warn};

use super::routes::PublicRoutes;
use super::transport::{ApiRequest, ApiResponse, Transport};
use super::ApiError;
use crate::auth::{RefreshCoordinator, SessionStore};
use crate::clock::Clock;
use crate::error::SessionError;

/// The UI routing layer, as far as the session subsystem needs it.
pub trait Navigator: Send + Sync {
    /// Location currently shown to the user.
    fn current_view(&self) -> String;

    fn redirect_to_login(&self);
}

/// Navigator for headless use; never redirects.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNavigator;

impl Navigator for NoopNavigator {
    fn current_view(&self) -> String {
        String::new()
    }

    fn redirect_to_login(&self) {}
}

pub struct RequestGate {
    transport: Arc<dyn Transport>,
    store: Arc<SessionStore>,
    coordinator: RefreshCoordinator,
    public_routes: PublicRoutes,
    public_views: PublicRoutes,
    navigator: Arc<dyn Navigator>,
    clock: Arc<dyn Clock>,
}

impl RequestGate {
    pub fn new(
        transport: Arc<dyn Transport>,
        store: Arc<SessionStore>,
        coordinator: RefreshCoordinator,
        public_routes: PublicRoutes,
        public_views: PublicRoutes,
        navigator: Arc<dyn Navigator>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            transport,
            store,
            coordinator,
            public_routes,
            public_views,
            navigator,
            clock,
        }
    }

    /// Send a request, handling credentials and one renewal-and-replay.
    ///
    /// Error statuses are returned as `Err` via [`ApiError::from_status`].
    pub async fn send(&self, request: ApiRequest) -> Result<ApiResponse, ApiError> {
        if self.public_routes.is_public(&request.method, &request.path) {
            debug!(method = %request.method, path = %request.path, "Public route, sending without credential");
            let response = self.transport.execute(&request).await?;
            return Self::check_response(response);
        }

        let session = self.store.get();
        let refresh_available = session.as_ref().is_some_and(|s| s.has_refresh_token());
        let access_token = session
            .map(|s| s.access_token)
            .filter(|token| refresh_available || !crate::auth::token::is_expired(token, self.clock.now()));

        let access_token = match access_token {
            Some(token) => token,
            None => {
                warn!(path = %request.path, "No usable session for protected request");
                self.signal_logged_out();
                return Err(SessionError::Unauthenticated.into());
            }
        };

        let response = self
            .transport
            .execute(&request.with_bearer(&access_token))
            .await?;
        if response.status != StatusCode::UNAUTHORIZED {
            return Self::check_response(response);
        }

        debug!(path = %request.path, "Request unauthorized, attempting renewal");
        let renewed = match self.renewed_token(&access_token).await {
            Ok(token) => token,
            Err(e) => {
                warn!(error = %e, path = %request.path, "Could not renew session");
                self.signal_logged_out();
                return Err(ApiError::Unauthorized);
            }
        };

        // Replayed exactly once; a second 401 is returned as-is.
        let replay = self.transport.execute(&request.with_bearer(&renewed)).await?;
        Self::check_response(replay)
    }

    /// A credential other than `rejected`: one a concurrent renewal already
    /// stored, or a new one from the coordinator.
    async fn renewed_token(&self, rejected: &str) -> Result<String, SessionError> {
        let session = self.store.get().ok_or(SessionError::NoActiveSession)?;
        if session.access_token != rejected && !session.is_access_expired(self.clock.now()) {
            debug!("Credential already renewed by another request");
            return Ok(session.access_token);
        }
        if !session.has_refresh_token() {
            if let Err(e) = self.store.clear() {
                warn!(error = %e, "Failed to clear session");
            }
            return Err(SessionError::NoRefreshCredential);
        }
        self.coordinator.request_refresh().await
    }

    /// Route to login unless the user is already on a public view.
    fn signal_logged_out(&self) {
        let view = self.navigator.current_view();
        if self.public_views.is_public_view(&view) {
            debug!(view = %view, "Already on a public view, not redirecting");
            return;
        }
        info!(view = %view, "Redirecting to login");
        self.navigator.redirect_to_login();
    }

    fn check_response(response: ApiResponse) -> Result<ApiResponse, ApiError> {
        if response.status.is_success() {
            Ok(response)
        } else {
            Err(ApiError::from_status(response.status, &response.body))
        }
    }

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        self.send(ApiRequest::get(path)).await?.json()
    }

    pub async fn post_json<T: DeserializeOwned, B: Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        let body = serde_json::to_value(body)
            .map_err(|e| ApiError::InvalidResponse(format!("Failed to encode request body: {}", e)))?;
        self.send(ApiRequest::post(path, body)).await?.json()
    }
}
