//! Identifying the caller, and deciding what they may do.
//!
//! The server sits behind an authenticating proxy, which asserts the caller's identity in the `esg_actor_id` header.
//! What an actor may do is decided by the [`RoleAuthorizer`], from the roles configured in `ESG_ACTOR_ROLES`.
use std::{
    collections::HashMap,
    fmt::Display,
    future::{ready, Ready},
    str::FromStr,
    sync::Arc,
};

use actix_web::{dev::Payload, FromRequest, HttpRequest};
use escrow_engine::{ActionAuthorizer, CollaboratorError, Permission};
use log::*;
use serde::{Deserialize, Serialize};

use crate::errors::ServerError;

pub const ACTOR_HEADER: &str = "esg_actor_id";

//--------------------------------------        ActorId        ---------------------------------------------------------
/// The actor making the request, taken from the `esg_actor_id` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActorId(pub String);

impl ActorId {
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl Display for ActorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromRequest for ActorId {
    type Error = ServerError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        let actor = req
            .headers()
            .get(ACTOR_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(|s| ActorId(s.to_string()))
            .ok_or_else(|| {
                debug!("💻️ Request to {} has no {ACTOR_HEADER} header", req.path());
                ServerError::MissingActor
            });
        ready(actor)
    }
}

//--------------------------------------       ActorRole       ---------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorRole {
    /// May read the ledger.
    Viewer,
    /// May read the ledger, release, refund, resolve disputes and run the auto-release sweep.
    Admin,
    /// Everything an admin may do, and may also release escrows whose delivery has not been confirmed.
    SuperAdmin,
}

impl ActorRole {
    pub fn permissions(&self) -> &'static [Permission] {
        match self {
            ActorRole::Viewer => &[Permission::ViewLedger],
            ActorRole::Admin => &[
                Permission::ViewLedger,
                Permission::Release,
                Permission::Refund,
                Permission::ResolveDispute,
                Permission::RunAutoRelease,
            ],
            ActorRole::SuperAdmin => &[
                Permission::ViewLedger,
                Permission::Release,
                Permission::ReleaseUndelivered,
                Permission::Refund,
                Permission::ResolveDispute,
                Permission::RunAutoRelease,
            ],
        }
    }

    pub fn allows(&self, permission: Permission) -> bool {
        self.permissions().contains(&permission)
    }
}

impl FromStr for ActorRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "viewer" => Ok(ActorRole::Viewer),
            "admin" => Ok(ActorRole::Admin),
            "super_admin" | "superadmin" => Ok(ActorRole::SuperAdmin),
            _ => Err(format!("{s} is not a valid role. Use viewer, admin or super_admin")),
        }
    }
}

impl Display for ActorRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ActorRole::Viewer => "viewer",
            ActorRole::Admin => "admin",
            ActorRole::SuperAdmin => "super_admin",
        };
        f.write_str(s)
    }
}

//--------------------------------------    RoleAuthorizer     ---------------------------------------------------------
/// Authorizes actions from a fixed table of actor roles. Actors that are not in the table may do nothing.
#[derive(Debug, Clone, Default)]
pub struct RoleAuthorizer {
    roles: Arc<HashMap<String, ActorRole>>,
}

impl RoleAuthorizer {
    pub fn new(roles: HashMap<String, ActorRole>) -> Self {
        if roles.is_empty() {
            warn!("🔐️ No actor roles are configured. Every administrative request will be refused.");
        }
        Self { roles: Arc::new(roles) }
    }

    pub fn role_of(&self, actor_id: &str) -> Option<ActorRole> {
        self.roles.get(actor_id).copied()
    }
}

impl ActionAuthorizer for RoleAuthorizer {
    async fn is_authorized(&self, actor_id: &str, permission: Permission) -> Result<bool, CollaboratorError> {
        let allowed = self.role_of(actor_id).map(|r| r.allows(permission)).unwrap_or(false);
        trace!("🔐️ {actor_id} may {permission}: {allowed}");
        Ok(allowed)
    }
}
