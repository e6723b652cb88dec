use async_trait::async_trait;

use crate::error::ApiError;
use crate::request::{Fields, RequestEnvelope};

/// Pluggable authentication collaborator.
///
/// The dispatcher hands over the normalized request, the validated payload
/// and the auth key configured for the route (falling back to the
/// application secret). The collaborator returns the authenticated user's
/// id, which the dispatcher injects into the payload; how tokens are carried
/// and verified is entirely its business.
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn authenticate(
        &self,
        request: &RequestEnvelope,
        payload: &Fields,
        auth_key: &str,
    ) -> Result<String, ApiError>;
}
