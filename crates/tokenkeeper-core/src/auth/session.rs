//! The current session and the store that owns it.
//!
//! `SessionStore` is the only reader and writer of the persisted record. Every
//! other component reads through it on each use instead of keeping a copy.

use std::sync::{Arc, Mutex, MutexGuard, Weak};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use tracing::{debug, info, warn};

use super::storage::SessionStorage;
use super::token;
use crate::clock::Clock;
use crate::error::SessionError;

/// Default key the session record is persisted under.
pub const DEFAULT_STORAGE_KEY: &str = "session";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Manager,
    Agent,
    Viewer,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Manager => "manager",
            Role::Agent => "agent",
            Role::Viewer => "viewer",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

fn non_empty<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value.filter(|s| !s.is_empty()))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub user_id: String,
    pub display_name: String,
    pub role: Role,
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "non_empty")]
    pub refresh_token: Option<String>,
}

impl Session {
    /// A record missing any user field or its access credential is never
    /// handed out.
    fn is_complete(&self) -> bool {
        !self.user_id.is_empty() && !self.display_name.is_empty() && !self.access_token.is_empty()
    }

    pub fn has_refresh_token(&self) -> bool {
        self.refresh_token.is_some()
    }

    /// Expiry of the access credential, if it can be decoded.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        token::decode_expiry(&self.access_token).ok()
    }

    pub fn issued_at(&self) -> Option<DateTime<Utc>> {
        token::decode_claims(&self.access_token)
            .ok()
            .and_then(|claims| claims.issued_at)
    }

    pub fn is_access_expired(&self, now: DateTime<Utc>) -> bool {
        token::is_expired(&self.access_token, now)
    }

    /// Check if the access credential will expire within `horizon`
    pub fn needs_refresh(&self, now: DateTime<Utc>, horizon: Duration) -> bool {
        token::is_expiring_soon(&self.access_token, now, horizon)
    }

    /// Get minutes remaining until expiry (for display)
    pub fn minutes_until_expiry(&self, now: DateTime<Utc>) -> i64 {
        self.expires_at()
            .map(|expiry| (expiry - now).num_minutes().max(0))
            .unwrap_or(0)
    }
}

type Listener = Arc<dyn Fn(Option<&Session>) + Send + Sync>;

#[derive(Default)]
struct Listeners {
    next_id: u64,
    callbacks: Vec<(u64, Listener)>,
}

/// At most one thread delivers notifications at a time. A write made while
/// a delivery is running only marks `pending`; the running delivery picks it up.
#[derive(Default)]
struct Delivery {
    pending: bool,
    delivering: bool,
}

/// Releases the delivery slot if a listener panics.
struct DeliveryGuard<'a>(&'a Mutex<Delivery>);

impl Drop for DeliveryGuard<'_> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            lock(self.0).delivering = false;
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Handle returned by [`SessionStore::on_session_change`].
///
/// The callback stays registered until `unsubscribe` is called or the handle
/// is dropped.
#[must_use = "dropping a Subscription unregisters its callback"]
pub struct Subscription {
    id: u64,
    listeners: Weak<Mutex<Listeners>>,
}

impl Subscription {
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(listeners) = self.listeners.upgrade() {
            lock(&listeners).callbacks.retain(|(id, _)| *id != self.id);
        }
    }
}

pub struct SessionStore {
    storage: Box<dyn SessionStorage>,
    key: String,
    clock: Arc<dyn Clock>,
    /// Serializes read-modify-write cycles on the record.
    write_lock: Mutex<()>,
    listeners: Arc<Mutex<Listeners>>,
    delivery: Mutex<Delivery>,
}

impl SessionStore {
    pub fn new(storage: Box<dyn SessionStorage>, key: &str, clock: Arc<dyn Clock>) -> Self {
        Self {
            storage,
            key: key.to_string(),
            clock,
            write_lock: Mutex::new(()),
            listeners: Arc::new(Mutex::new(Listeners::default())),
            delivery: Mutex::new(Delivery::default()),
        }
    }

    /// Current session, or `None` when there is no usable record.
    pub fn get(&self) -> Option<Session> {
        let contents = match self.storage.read(&self.key) {
            Ok(Some(contents)) => contents,
            Ok(None) => return None,
            Err(e) => {
                warn!(error = %e, "Failed to read session record");
                return None;
            }
        };

        match serde_json::from_str::<Session>(&contents) {
            Ok(session) if session.is_complete() => Some(session),
            Ok(_) => {
                warn!("Ignoring incomplete session record");
                None
            }
            Err(e) => {
                warn!(error = %e, "Ignoring malformed session record");
                None
            }
        }
    }

    pub fn save(&self, session: &Session) -> Result<(), SessionError> {
        {
            let _guard = lock(&self.write_lock);
            self.persist(session)?;
        }
        info!(user_id = %session.user_id, role = %session.role, "Session saved");
        self.notify();
        Ok(())
    }

    /// Replace only the access credential of the current session.
    pub fn update_access_credential(&self, access_token: String) -> Result<Session, SessionError> {
        self.update_credentials(access_token, None)
    }

    /// Replace the access credential and, when the backend rotated it, the
    /// refresh credential. User fields are preserved.
    pub fn update_credentials(
        &self,
        access_token: String,
        refresh_token: Option<String>,
    ) -> Result<Session, SessionError> {
        let updated = {
            let _guard = lock(&self.write_lock);
            let mut session = self.get().ok_or(SessionError::NoActiveSession)?;
            session.access_token = access_token;
            if let Some(refresh_token) = refresh_token.filter(|t| !t.is_empty()) {
                session.refresh_token = Some(refresh_token);
            }
            self.persist(&session)?;
            session
        };
        debug!(user_id = %updated.user_id, "Access credential updated");
        self.notify();
        Ok(updated)
    }

    /// Remove the session. Does nothing when there is no record.
    pub fn clear(&self) -> Result<(), SessionError> {
        let removed = {
            let _guard = lock(&self.write_lock);
            self.storage.remove(&self.key).map_err(SessionError::storage)?
        };
        if removed {
            info!("Session cleared");
            self.notify();
        }
        Ok(())
    }

    /// A session whose access credential has lapsed still counts as logged in
    /// while it can be renewed; the request gate renews it on first use.
    pub fn is_logged_in(&self) -> bool {
        match self.get() {
            Some(session) => {
                !session.is_access_expired(self.clock.now()) || session.has_refresh_token()
            }
            None => false,
        }
    }

    pub fn user_role(&self) -> Option<Role> {
        self.get().map(|session| session.role)
    }

    pub fn access_token(&self) -> Option<String> {
        self.get().map(|session| session.access_token)
    }

    pub fn refresh_token(&self) -> Option<String> {
        self.get().and_then(|session| session.refresh_token)
    }

    /// Register a callback fired after every save, update and clear.
    ///
    /// Callbacks receive the session as stored when they run, so the last
    /// notification always matches the store. Writes made from inside a
    /// callback are delivered after the current round, never nested.
    pub fn on_session_change<F>(&self, callback: F) -> Subscription
    where
        F: Fn(Option<&Session>) + Send + Sync + 'static,
    {
        let mut listeners = lock(&self.listeners);
        listeners.next_id += 1;
        let id = listeners.next_id;
        listeners.callbacks.push((id, Arc::new(callback)));
        Subscription {
            id,
            listeners: Arc::downgrade(&self.listeners),
        }
    }

    fn persist(&self, session: &Session) -> Result<(), SessionError> {
        let contents = serde_json::to_string(session)
            .map_err(|e| SessionError::Storage(e.to_string()))?;
        self.storage
            .write(&self.key, &contents)
            .map_err(SessionError::storage)
    }

    fn notify(&self) {
        {
            let mut delivery = lock(&self.delivery);
            delivery.pending = true;
            if delivery.delivering {
                return;
            }
            delivery.delivering = true;
        }

        let _guard = DeliveryGuard(&self.delivery);
        loop {
            {
                let mut delivery = lock(&self.delivery);
                if !delivery.pending {
                    delivery.delivering = false;
                    return;
                }
                delivery.pending = false;
            }

            let current = self.get();
            // Callbacks run without the registry lock so they may (un)subscribe.
            let callbacks: Vec<Listener> = lock(&self.listeners)
                .callbacks
                .iter()
                .map(|(_, callback)| Arc::clone(callback))
                .collect();
            for callback in callbacks {
                callback(current.as_ref());
            }
        }
    }
}
