use thiserror::Error;

use crate::auth::token::DecodeError;

/// Failures of the session lifecycle.
///
/// `Clone` because a single renewal outcome is handed to every caller waiting
/// on it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("Malformed credential: {0}")]
    Decode(#[from] DecodeError),

    #[error("No active session")]
    NoActiveSession,

    #[error("No refresh credential available - login required")]
    NoRefreshCredential,

    #[error("Refresh credential rejected: {0}")]
    RenewalRejected(String),

    #[error("Session renewal failed: {0}")]
    RenewalFailed(String),

    #[error("Not authenticated")]
    Unauthenticated,

    #[error("Session storage failure: {0}")]
    Storage(String),
}

impl SessionError {
    /// True for failures that end the session and require a fresh login.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionError::NoRefreshCredential
                | SessionError::RenewalRejected(_)
                | SessionError::RenewalFailed(_)
                | SessionError::Unauthenticated
        )
    }

    pub(crate) fn storage(err: anyhow::Error) -> Self {
        SessionError::Storage(format!("{:#}", err))
    }
}
