//! Client-side session lifecycle for REST applications.
//!
//! Keeps the logged-in session, notices when the access credential is stale,
//! renews it at most once at a time however many requests need it, and
//! replays requests that failed because the credential had expired.
//!
//! Start with [`SessionManager`]; the individual pieces are public for
//! applications that want to wire them differently.

pub mod api;
pub mod auth;
pub mod clock;
pub mod config;
pub mod error;
pub mod manager;

pub use api::{ApiError, ApiRequest, ApiResponse, Navigator, RequestGate};
pub use auth::{RefreshCoordinator, RenewalScheduler, Role, Session, SessionStore, Visibility};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Config;
pub use error::SessionError;
pub use manager::{Collaborators, SessionManager};
