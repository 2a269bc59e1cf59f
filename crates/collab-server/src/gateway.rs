//! Session authentication for incoming connections.
//!
//! The gateway resolves a connection's permission level for a specific
//! document before any tree data is exchanged. Resolution is delegated to an
//! external auth/permission service behind the [`PermissionResolver`] trait;
//! this subsystem never mints identities itself. Every failure path rejects
//! the connection (fail closed) - there is no fallback identity when the
//! resolver is unreachable.

use async_trait::async_trait;
use collab_core::session::{PermissionLevel, Session};
use serde::Deserialize;
use std::collections::HashMap;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Missing or invalid document id")]
    MissingFormId,

    #[error("Missing credentials")]
    MissingCredentials,

    #[error("Access denied")]
    Denied,

    #[error("Permission resolver unavailable: {0}")]
    ResolverUnavailable(String),
}

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("Access denied")]
    Denied,

    #[error("Resolver unavailable: {0}")]
    Unavailable(String),
}

/// Identity and permission level resolved for a token against one document.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedAccess {
    pub user_id: String,
    #[serde(rename = "permissionLevel")]
    pub permission: PermissionLevel,
}

/// External auth/permission service boundary (consumed, not reimplemented).
#[async_trait]
pub trait PermissionResolver: Send + Sync {
    async fn resolve(
        &self,
        form_id: &str,
        token: &str,
    ) -> std::result::Result<ResolvedAccess, ResolveError>;
}

/// Credentials extracted from the connection request.
///
/// Tokens may arrive via the `Authorization: Bearer` header or the `token`
/// connection parameter; the first channel present wins.
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    pub header_token: Option<String>,
    pub param_token: Option<String>,
}

impl Credentials {
    pub fn first_present(&self) -> Option<&str> {
        self.header_token
            .as_deref()
            .or(self.param_token.as_deref())
            .filter(|t| !t.is_empty())
    }
}

/// Authenticates connections and assigns each a permission level for one
/// document.
#[derive(Clone)]
pub struct SessionGateway {
    resolver: std::sync::Arc<dyn PermissionResolver>,
}

impl SessionGateway {
    pub fn new(resolver: std::sync::Arc<dyn PermissionResolver>) -> Self {
        Self { resolver }
    }

    /// Authenticate a connection request for a document.
    ///
    /// Rejection happens before the replica is attached to the transport, so
    /// no document state ever reaches an unauthenticated peer.
    pub async fn authenticate(
        &self,
        form_id: Option<&str>,
        credentials: &Credentials,
    ) -> std::result::Result<Session, AuthError> {
        let form_id = form_id
            .filter(|id| !id.is_empty())
            .ok_or(AuthError::MissingFormId)?;
        let token = credentials
            .first_present()
            .ok_or(AuthError::MissingCredentials)?;

        match self.resolver.resolve(form_id, token).await {
            Ok(access) => Ok(Session::new(access.user_id, form_id, access.permission)),
            Err(ResolveError::Denied) => Err(AuthError::Denied),
            Err(ResolveError::Unavailable(reason)) => {
                // Hard rejection: a resolver outage must never grant access
                warn!("Permission resolver unavailable for {}: {}", form_id, reason);
                Err(AuthError::ResolverUnavailable(reason))
            }
        }
    }
}

/// Resolver backed by the platform auth service over HTTP.
///
/// Calls `GET {base}/forms/{form_id}/access` with the session token as a
/// bearer credential and expects a JSON [`ResolvedAccess`] body.
pub struct HttpResolver {
    client: reqwest::Client,
    base_url: String,
}

impl HttpResolver {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl PermissionResolver for HttpResolver {
    async fn resolve(
        &self,
        form_id: &str,
        token: &str,
    ) -> std::result::Result<ResolvedAccess, ResolveError> {
        let url = format!("{}/forms/{}/access", self.base_url.trim_end_matches('/'), form_id);
        let response = self
            .client
            .get(&url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| ResolveError::Unavailable(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            response
                .json::<ResolvedAccess>()
                .await
                .map_err(|e| ResolveError::Unavailable(e.to_string()))
        } else if status == reqwest::StatusCode::UNAUTHORIZED
            || status == reqwest::StatusCode::FORBIDDEN
        {
            Err(ResolveError::Denied)
        } else {
            Err(ResolveError::Unavailable(format!("status {status}")))
        }
    }
}

/// Fixed-table resolver for tests and local development.
pub struct StaticResolver {
    grants: HashMap<String, (String, String, PermissionLevel)>,
}

impl Default for StaticResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl StaticResolver {
    pub fn new() -> Self {
        Self {
            grants: HashMap::new(),
        }
    }

    /// Grant `token` access to `form_id` as `user_id` with `permission`.
    pub fn grant(
        mut self,
        token: &str,
        user_id: &str,
        form_id: &str,
        permission: PermissionLevel,
    ) -> Self {
        self.grants.insert(
            token.to_string(),
            (user_id.to_string(), form_id.to_string(), permission),
        );
        self
    }
}

#[async_trait]
impl PermissionResolver for StaticResolver {
    async fn resolve(
        &self,
        form_id: &str,
        token: &str,
    ) -> std::result::Result<ResolvedAccess, ResolveError> {
        match self.grants.get(token) {
            Some((user_id, granted_form, permission)) if granted_form == form_id => {
                Ok(ResolvedAccess {
                    user_id: user_id.clone(),
                    permission: *permission,
                })
            }
            _ => Err(ResolveError::Denied),
        }
    }
}
