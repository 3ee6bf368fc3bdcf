//! Outbound API access.
//!
//! All protected calls go through the `RequestGate`, which attaches the
//! bearer credential and replays a call once after renewing an expired
//! credential. The identity backend (login/refresh/logout) and the HTTP
//! transport sit behind traits so they can be swapped out.

pub mod error;
pub mod gate;
pub mod identity;
pub mod routes;
pub mod transport;

pub use error::ApiError;
pub use gate::{Navigator, NoopNavigator, RequestGate};
pub use identity::{HttpIdentityClient, IdentityBackend, LoginResponse, RefreshResponse, UserInfo};
pub use reqwest::{Method, StatusCode};
pub use routes::{PublicRoutes, RoutePattern};
pub use transport::{ApiRequest, ApiResponse, ReqwestTransport, Transport};
