//! Proactive renewal, independent of request traffic.
//!
//! While a renewable session exists a timer checks the access credential every
//! period and renews it once it is inside the renewal horizon. Coming back to
//! the foreground triggers an immediate check, since timers do not fire while
//! the process is suspended.

use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration as StdDuration;

use chrono::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::refresh::RefreshCoordinator;
use super::session::{SessionStore, Subscription};
use crate::clock::Clock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Visible,
    Hidden,
}

struct SchedulerState {
    timer: Option<JoinHandle<()>>,
    visibility: Visibility,
    subscription: Option<Subscription>,
}

struct Inner {
    store: Arc<SessionStore>,
    coordinator: RefreshCoordinator,
    clock: Arc<dyn Clock>,
    period: StdDuration,
    horizon: Duration,
    state: Mutex<SchedulerState>,
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, SchedulerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn start(&self) {
        let mut state = self.state();
        if state.timer.as_ref().is_some_and(|timer| !timer.is_finished()) {
            return;
        }
        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                warn!("No async runtime available, background renewal not started");
                return;
            }
        };

        let store = Arc::clone(&self.store);
        let coordinator = self.coordinator.clone();
        let clock = Arc::clone(&self.clock);
        let period = self.period;
        let horizon = self.horizon;

        state.timer = Some(handle.spawn(async move {
            let mut ticks = interval_at(Instant::now() + period, period);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticks.tick().await;
                Self::tick(&store, &coordinator, clock.as_ref(), horizon).await;
            }
        }));
        debug!(period_secs = period.as_secs(), "Background renewal started");
    }

    fn stop(&self) {
        if let Some(timer) = self.state().timer.take() {
            timer.abort();
            debug!("Background renewal stopped");
        }
    }

    async fn tick(
        store: &SessionStore,
        coordinator: &RefreshCoordinator,
        clock: &dyn Clock,
        horizon: Duration,
    ) {
        let Some(session) = store.get() else {
            return;
        };
        if !session.has_refresh_token() || !session.needs_refresh(clock.now(), horizon) {
            return;
        }

        info!(minutes_left = session.minutes_until_expiry(clock.now()), "Renewing session ahead of expiry");
        if let Err(e) = coordinator.request_refresh().await {
            // The coordinator has already cleared the session.
            warn!(error = %e, "Background renewal failed");
        }
    }
}

/// Clone is cheap - all clones drive the same timer.
#[derive(Clone)]
pub struct RenewalScheduler {
    inner: Arc<Inner>,
}

impl RenewalScheduler {
    pub fn new(
        store: Arc<SessionStore>,
        coordinator: RefreshCoordinator,
        clock: Arc<dyn Clock>,
        period: StdDuration,
        horizon: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                coordinator,
                clock,
                period,
                horizon,
                state: Mutex::new(SchedulerState {
                    timer: None,
                    visibility: Visibility::Visible,
                    subscription: None,
                }),
            }),
        }
    }

    /// Follow the session store: start on a renewable session, stop when the
    /// session goes away. Also applies the current state immediately.
    pub fn attach(&self) {
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let subscription = self.inner.store.on_session_change(move |session| {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            match session {
                Some(session) if session.has_refresh_token() => inner.start(),
                _ => inner.stop(),
            }
        });
        self.inner.state().subscription = Some(subscription);

        match self.inner.store.get() {
            Some(session) if session.has_refresh_token() => self.inner.start(),
            _ => self.inner.stop(),
        }
    }

    /// Stop following the session store and cancel the timer.
    pub fn detach(&self) {
        let subscription = self.inner.state().subscription.take();
        drop(subscription);
        self.inner.stop();
    }

    pub fn start(&self) {
        self.inner.start();
    }

    pub fn stop(&self) {
        self.inner.stop();
    }

    pub fn is_running(&self) -> bool {
        self.inner
            .state()
            .timer
            .as_ref()
            .is_some_and(|timer| !timer.is_finished())
    }

    /// Record an application visibility transition. Returning to the
    /// foreground with a lapsed access credential renews it right away; a
    /// lapsed session that cannot be renewed is cleared by the coordinator.
    ///
    /// Returns true when a renewal was requested.
    pub async fn on_visibility_change(&self, visibility: Visibility) -> bool {
        let previous = std::mem::replace(&mut self.inner.state().visibility, visibility);
        if visibility != Visibility::Visible || previous == Visibility::Visible {
            return false;
        }

        let Some(session) = self.inner.store.get() else {
            return false;
        };
        if !session.is_access_expired(self.inner.clock.now()) {
            return false;
        }

        info!(
            renewable = session.has_refresh_token(),
            "Access credential lapsed while in background, renewing"
        );
        if let Err(e) = self.inner.coordinator.request_refresh().await {
            warn!(error = %e, "Renewal after returning to foreground failed");
        }
        true
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(|e| e.into_inner());
        if let Some(timer) = state.timer.take() {
            timer.abort();
        }
    }
}
