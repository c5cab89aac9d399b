//! Identity seam
//!
//! The engine never authenticates anyone itself; it asks a resolver which
//! user a connection belongs to and stamps that id on every inbound envelope.

use async_trait::async_trait;

/// What the gateway knows about a connecting client
#[derive(Debug, Clone, Default)]
pub struct ConnectRequest {
    /// Project from the channel address
    pub project_id: String,
    /// Identity asserted by an upstream proxy header
    pub forwarded_user: Option<String>,
    /// Identity passed as a query parameter
    pub query_user: Option<String>,
}

/// Maps a connecting client to an authenticated user id
#[async_trait]
pub trait IdentityResolver: Send + Sync {
    /// `None` refuses the connection
    async fn resolve(&self, request: &ConnectRequest) -> Option<String>;
}

/// Trusts identity asserted by the fronting gateway.
///
/// The forwarded header wins over the query parameter. Blank values are
/// treated as absent.
#[derive(Debug, Clone, Copy, Default)]
pub struct ForwardedIdentity;

#[async_trait]
impl IdentityResolver for ForwardedIdentity {
    async fn resolve(&self, request: &ConnectRequest) -> Option<String> {
        [&request.forwarded_user, &request.query_user]
            .into_iter()
            .flatten()
            .map(|id| id.trim())
            .find(|id| !id.is_empty())
            .map(str::to_string)
    }
}
