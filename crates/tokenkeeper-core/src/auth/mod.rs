//! Session lifecycle: the stored session, credential inspection, renewal.
//!
//! This module provides:
//! - `SessionStore`: the single owner of the persisted session record
//! - `RefreshCoordinator`: single-flight renewal of the access credential
//! - `RenewalScheduler`: timer and foreground driven proactive renewal
//! - `token`: expiry checks on access credentials (no signature checks)
//! - Storage backends: file, OS keychain, in-memory

pub mod credentials;
pub mod refresh;
pub mod scheduler;
pub mod session;
pub mod storage;
pub mod token;

pub use credentials::KeyringStorage;
pub use refresh::RefreshCoordinator;
pub use scheduler::{RenewalScheduler, Visibility};
pub use session::{Role, Session, SessionStore, Subscription, DEFAULT_STORAGE_KEY};
pub use storage::{FileStorage, MemoryStorage, SessionStorage};
