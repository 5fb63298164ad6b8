//! Re-authentication seam for challenged replays

use async_trait::async_trait;
use fraud_engine::{AuthTier, UserId};

use crate::Result;

/// Performs a step-up authentication with the user.
///
/// Called during replay of an offline entry whose assessment came back
/// CHALLENGE. The synchronizer bounds every call with a timeout.
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// `Ok(true)` when the user satisfied `tier`
    async fn reauthenticate(&self, user_id: &UserId, tier: AuthTier) -> Result<bool>;
}

/// Authenticator for nodes with no channel to the user; every challenge fails
#[derive(Debug, Clone, Copy, Default)]
pub struct NoChannelAuthenticator;

#[async_trait]
impl Authenticator for NoChannelAuthenticator {
    async fn reauthenticate(&self, user_id: &UserId, tier: AuthTier) -> Result<bool> {
        tracing::warn!(
            user_id = %user_id,
            tier = ?tier,
            "No authentication channel configured, challenge not satisfied"
        );
        Ok(false)
    }
}
