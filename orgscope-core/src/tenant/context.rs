//! Tenant context for the current unit of work.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{RejectReason, ScopeError, ScopeResult};

/// A validated organization identifier.
///
/// Only non-nil UUIDs are accepted. The value handed to the database is
/// always the canonical hyphenated lowercase form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct OrgId(Uuid);

impl OrgId {
    /// Parse a candidate identifier from untrusted input.
    pub fn parse(candidate: &str) -> ScopeResult<Self> {
        let trimmed = candidate.trim();
        if trimmed.is_empty() {
            return Err(ScopeError::rejected(
                RejectReason::Missing,
                "empty organization identifier",
            ));
        }

        let uuid = Uuid::try_parse(trimmed).map_err(|_| {
            ScopeError::rejected(
                RejectReason::Malformed,
                format!("organization identifier is not a UUID ({} bytes)", trimmed.len()),
            )
        })?;

        Self::from_uuid(uuid)
    }

    /// Wrap an already-typed UUID. The nil UUID is rejected.
    pub fn from_uuid(uuid: Uuid) -> ScopeResult<Self> {
        if uuid.is_nil() {
            return Err(ScopeError::rejected(
                RejectReason::Malformed,
                "nil organization identifier",
            ));
        }
        Ok(Self(uuid))
    }

    /// Generate a random organization id.
    pub fn new_v4() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get the inner UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for OrgId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl FromStr for OrgId {
    type Err = ScopeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for OrgId {
    type Error = ScopeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<OrgId> for String {
    fn from(id: OrgId) -> Self {
        id.to_string()
    }
}

/// Identifier of the acting user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(Uuid);

impl UserId {
    /// Create a user id.
    pub fn new(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Generate a random user id.
    pub fn new_v4() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get the inner UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

/// Context for the current tenant.
///
/// Built once per request or job from a trusted source and never mutated.
/// It is passed explicitly to every data access path; there is no ambient
/// "current tenant".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantContext {
    organization_id: OrgId,
    user_id: Option<UserId>,
}

impl TenantContext {
    /// Create a context for work not attributed to a user (e.g. a background job).
    pub fn new(organization_id: OrgId) -> Self {
        Self {
            organization_id,
            user_id: None,
        }
    }

    /// Create a context for an acting user.
    pub fn for_user(organization_id: OrgId, user_id: UserId) -> Self {
        Self {
            organization_id,
            user_id: Some(user_id),
        }
    }

    /// The organization this work is scoped to.
    pub fn organization_id(&self) -> OrgId {
        self.organization_id
    }

    /// The acting user, if any.
    pub fn user_id(&self) -> Option<UserId> {
        self.user_id
    }
}
