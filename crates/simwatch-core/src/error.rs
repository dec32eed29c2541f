// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for simwatch-core.
//!
//! Errors fall into four classes:
//!
//! | Class | Type | Effect |
//! |-------|------|--------|
//! | Fatal | [`Error::Fatal`] | stops the tick loop and the process |
//! | Session-reset | [`EvictionReason`] | evicts one session |
//! | Transient | [`AuthorityError`](crate::client::AuthorityError) | logged, retried next interval |
//! | Request-rejected | [`RequestRejected`] | answered synchronously, no state change |

use std::fmt;

use thiserror::Error;

use crate::capability::{CapabilityMismatch, InvalidVersion};
use crate::types::{SessionToken, UnknownGameState};

/// Result type using the crate [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Crate-level errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Unrecoverable condition; the whole process must stop.
    #[error("Fatal error: {0}")]
    Fatal(String),

    /// One session became unusable and was evicted.
    #[error("Session {token} reset: {reason}")]
    SessionReset {
        /// Evicted session.
        token: SessionToken,
        /// Why it was evicted.
        reason: EvictionReason,
    },
}

/// How a rejected request should be reported to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectionKind {
    /// The request itself is malformed.
    BadRequest,
    /// The request is well-formed but not allowed in the current state.
    NotAllowed,
}

/// Reasons an inbound request is refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum RequestRejected {
    /// No session exists for the token.
    #[error("Invalid game session token '{0}', you might need to start setup first")]
    UnknownSession(SessionToken),

    /// The acceptance policies declined the session.
    #[error("Game session '{0}' was not accepted by this watchdog")]
    NotAccepted(SessionToken),

    /// The capability requirements are not met.
    #[error("{0}")]
    Capability(#[from] CapabilityMismatch),

    /// A new session cannot start in the ended state.
    #[error("Game session '{0}' has already ended")]
    AlreadyEnded(SessionToken),

    /// Fields are missing or malformed.
    #[error("{0}")]
    Invalid(String),
}

impl RequestRejected {
    /// Classification used to pick a response status.
    pub fn kind(&self) -> RejectionKind {
        match self {
            RequestRejected::Invalid(_) => RejectionKind::BadRequest,
            RequestRejected::UnknownSession(_)
            | RequestRejected::NotAccepted(_)
            | RequestRejected::Capability(_)
            | RequestRejected::AlreadyEnded(_) => RejectionKind::NotAllowed,
        }
    }
}

impl From<InvalidVersion> for RequestRejected {
    fn from(err: InvalidVersion) -> Self {
        RequestRejected::Invalid(format!("Invalid required simulations: {}", err))
    }
}

impl From<UnknownGameState> for RequestRejected {
    fn from(err: UnknownGameState) -> Self {
        RequestRejected::Invalid(err.to_string())
    }
}

/// Why a session left the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EvictionReason {
    /// The authority reports another token as the owner of this session.
    Superseded {
        /// Token the authority now recognises.
        owner: SessionToken,
    },
    /// The ownership check kept failing.
    OwnershipUnverifiable(String),
    /// The authority refused to renew the credentials.
    CredentialsRejected(String),
    /// Credential renewal kept failing.
    CredentialsUnrenewable(String),
    /// The refresh credential expired before it could be used.
    CredentialsExpired,
    /// A phase hook reported an unrecoverable error.
    PhaseFailed(String),
    /// The session's lock was poisoned by a panic during its tick.
    Poisoned,
    /// The game ended and no new game was requested.
    Ended,
}

impl fmt::Display for EvictionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EvictionReason::Superseded { owner } => {
                write!(f, "superseded by session token '{}'", owner)
            }
            EvictionReason::OwnershipUnverifiable(e) => {
                write!(f, "could not verify session ownership: {}", e)
            }
            EvictionReason::CredentialsRejected(e) => {
                write!(f, "credential renewal rejected: {}", e)
            }
            EvictionReason::CredentialsUnrenewable(e) => {
                write!(f, "could not renew credentials: {}", e)
            }
            EvictionReason::CredentialsExpired => write!(f, "credentials expired"),
            EvictionReason::PhaseFailed(e) => write!(f, "phase hook failed: {}", e),
            EvictionReason::Poisoned => write!(f, "session state poisoned by a panic"),
            EvictionReason::Ended => write!(f, "game ended"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::CapabilityVersion;

    #[test]
    fn test_rejection_kinds() {
        assert_eq!(
            RequestRejected::Invalid("x".into()).kind(),
            RejectionKind::BadRequest
        );
        assert_eq!(
            RequestRejected::UnknownSession("t".into()).kind(),
            RejectionKind::NotAllowed
        );
        let mismatch = CapabilityMismatch::VersionTooLow {
            name: "Foo".into(),
            required: "2.0".parse::<CapabilityVersion>().unwrap(),
            offered: "1.0".parse::<CapabilityVersion>().unwrap(),
        };
        assert_eq!(
            RequestRejected::from(mismatch).kind(),
            RejectionKind::NotAllowed
        );
    }

    #[test]
    fn test_unknown_session_message() {
        let err = RequestRejected::UnknownSession("abc".into());
        assert!(err.to_string().contains("abc"));
        assert!(err.to_string().contains("start setup first"));
    }

    #[test]
    fn test_session_reset_display() {
        let err = Error::SessionReset {
            token: "abc".into(),
            reason: EvictionReason::Superseded {
                owner: "def".into(),
            },
        };
        let display = err.to_string();
        assert!(display.contains("abc"));
        assert!(display.contains("superseded"));
        assert!(display.contains("def"));
    }
}
