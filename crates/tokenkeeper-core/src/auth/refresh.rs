//! Single-flight renewal of the access credential.
//!
//! However many callers ask for a renewal at once, one `refresh` call goes to
//! the identity backend and every caller receives its outcome. The call runs
//! on its own task and always completes, even if every caller gives up.

use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

use super::session::SessionStore;
use crate::api::identity::IdentityBackend;
use crate::api::ApiError;
use crate::error::SessionError;

type Outcome = Result<String, SessionError>;

enum State {
    Idle,
    Renewing(Vec<oneshot::Sender<Outcome>>),
}

struct Inner {
    backend: Arc<dyn IdentityBackend>,
    store: Arc<SessionStore>,
    state: Mutex<State>,
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Clone is cheap - all clones share one renewal state.
#[derive(Clone)]
pub struct RefreshCoordinator {
    inner: Arc<Inner>,
}

impl RefreshCoordinator {
    pub fn new(backend: Arc<dyn IdentityBackend>, store: Arc<SessionStore>) -> Self {
        Self {
            inner: Arc::new(Inner {
                backend,
                store,
                state: Mutex::new(State::Idle),
            }),
        }
    }

    pub fn is_renewing(&self) -> bool {
        matches!(*self.inner.state(), State::Renewing(_))
    }

    /// Obtain a fresh access credential, joining any renewal already running.
    ///
    /// Failures are terminal: the session has been cleared by the time the
    /// error is returned.
    pub async fn request_refresh(&self) -> Result<String, SessionError> {
        let (tx, rx) = oneshot::channel();

        let refresh_token = {
            let mut state = self.inner.state();
            if let State::Renewing(waiters) = &mut *state {
                waiters.push(tx);
                debug!(waiters = waiters.len(), "Joined in-flight session renewal");
                None
            } else {
                let refresh_token = self
                    .inner
                    .store
                    .refresh_token()
                    .ok_or(SessionError::NoRefreshCredential);
                if refresh_token.is_ok() {
                    *state = State::Renewing(vec![tx]);
                }
                Some(refresh_token)
            }
        };

        match refresh_token {
            None => {}
            Some(Ok(refresh_token)) => {
                debug!("Starting session renewal");
                let inner = Arc::clone(&self.inner);
                tokio::spawn(async move {
                    Self::renew(inner, refresh_token).await;
                });
            }
            Some(Err(e)) => {
                warn!("Session renewal requested without a refresh credential");
                if let Err(clear_err) = self.inner.store.clear() {
                    warn!(error = %clear_err, "Failed to clear session");
                }
                return Err(e);
            }
        }

        rx.await
            .unwrap_or_else(|_| Err(SessionError::RenewalFailed("renewal task aborted".into())))
    }

    async fn renew(inner: Arc<Inner>, refresh_token: String) {
        let outcome = match inner.backend.refresh(&refresh_token).await {
            Ok(response) => {
                match inner
                    .store
                    .update_credentials(response.access_token, response.refresh_token)
                {
                    Ok(session) => {
                        info!(user_id = %session.user_id, "Session renewed");
                        Ok(session.access_token)
                    }
                    Err(e) => Err(e),
                }
            }
            Err(ApiError::Unauthorized) => {
                Err(SessionError::RenewalRejected("refresh credential expired or revoked".into()))
            }
            Err(ApiError::AccessDenied(reason)) | Err(ApiError::BadRequest(reason)) => {
                Err(SessionError::RenewalRejected(reason))
            }
            Err(e) => Err(SessionError::RenewalFailed(e.to_string())),
        };

        if let Err(ref e) = outcome {
            error!(error = %e, "Session renewal failed, clearing session");
            if let Err(clear_err) = inner.store.clear() {
                warn!(error = %clear_err, "Failed to clear session");
            }
        }

        let waiters = match std::mem::replace(&mut *inner.state(), State::Idle) {
            State::Renewing(waiters) => waiters,
            State::Idle => Vec::new(),
        };
        debug!(waiters = waiters.len(), success = outcome.is_ok(), "Session renewal resolved");
        for waiter in waiters {
            // A waiter that stopped listening has nothing left to do.
            let _ = waiter.send(outcome.clone());
        }
    }
}
