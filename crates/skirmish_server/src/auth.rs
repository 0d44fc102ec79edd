//! Authorization of routed messages.
//!
//! The transport hands the server the claims it extracted from a request; the server
//! asks the [`Authorizer`] registered in the root scope under [`AUTH_STRATEGY`] whether
//! those claims may address the target session. Replacing the registration changes the
//! policy for every shard at once.

use crate::error::ServerError;
use serde::{Deserialize, Serialize};
use skirmish_runtime::{Dependency, SessionId};
use std::sync::Arc;
use tracing::warn;

/// The active authorization policy.
pub const AUTH_STRATEGY: Dependency<(), Arc<dyn Authorizer>> = Dependency::new("Auth.Strategy");

/// What the transport knows about the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Session the caller was admitted to
    pub session_id: SessionId,
    #[serde(default)]
    pub login: String,
}

/// Decides whether a caller may address a session.
pub trait Authorizer: Send + Sync {
    fn authorize(&self, session: SessionId, claims: Option<&Claims>) -> Result<(), ServerError>;
}

/// Lets every message through.
#[derive(Debug, Default, Clone, Copy)]
pub struct AllowAll;

impl Authorizer for AllowAll {
    fn authorize(&self, _session: SessionId, _claims: Option<&Claims>) -> Result<(), ServerError> {
        Ok(())
    }
}

/// Accepts a message only when the caller's claims name the target session.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokenMatch;

impl Authorizer for TokenMatch {
    fn authorize(&self, session: SessionId, claims: Option<&Claims>) -> Result<(), ServerError> {
        match claims {
            Some(claims) if claims.session_id == session => Ok(()),
            Some(claims) => {
                warn!(
                    login = %claims.login,
                    claimed = %claims.session_id,
                    target = %session,
                    "🚫 Claims name another session"
                );
                Err(ServerError::Unauthorized(session))
            }
            None => {
                warn!(target = %session, "🚫 Message without claims");
                Err(ServerError::Unauthorized(session))
            }
        }
    }
}
