//! Resolution of a tenant context from an inbound request's trust signals.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::{debug, warn};

use super::context::{OrgId, TenantContext, UserId};
use crate::config::ScopeConfig;
use crate::error::{RejectReason, ScopeError, ScopeResult};

/// An authenticated caller, as established by the authentication layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    /// The authenticated user.
    pub user_id: UserId,
    /// Raw organization claim from the token, if the token carries one.
    pub org_claim: Option<String>,
}

impl Principal {
    /// Create a principal without an organization claim.
    pub fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            org_claim: None,
        }
    }

    /// Attach an organization claim.
    pub fn with_org_claim(mut self, claim: impl Into<String>) -> Self {
        self.org_claim = Some(claim.into());
        self
    }
}

/// The trust signals carried by one inbound request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TenantCredentials {
    /// Raw value of the organization header.
    pub header: Option<String>,
    /// The authenticated principal, if any.
    pub principal: Option<Principal>,
}

impl TenantCredentials {
    /// Credentials with only a header value.
    pub fn from_header(value: impl Into<String>) -> Self {
        Self {
            header: Some(value.into()),
            principal: None,
        }
    }

    /// Attach an authenticated principal.
    pub fn with_principal(mut self, principal: Principal) -> Self {
        self.principal = Some(principal);
        self
    }

    /// Attach a header value.
    pub fn with_header(mut self, value: impl Into<String>) -> Self {
        self.header = Some(value.into());
        self
    }
}

/// Lookup of organization memberships.
#[async_trait]
pub trait MembershipStore: Send + Sync {
    /// Whether `user` belongs to `org`.
    async fn is_member(&self, user: &UserId, org: &OrgId) -> ScopeResult<bool>;
}

/// An in-memory membership table.
#[derive(Debug, Clone, Default)]
pub struct StaticMembership {
    members: Arc<RwLock<HashMap<UserId, HashSet<OrgId>>>>,
}

impl StaticMembership {
    /// Create an empty membership table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Grant membership.
    pub fn grant(&self, user: UserId, org: OrgId) -> &Self {
        self.members.write().entry(user).or_default().insert(org);
        self
    }

    /// Revoke membership.
    pub fn revoke(&self, user: &UserId, org: &OrgId) -> bool {
        self.members
            .write()
            .get_mut(user)
            .is_some_and(|orgs| orgs.remove(org))
    }

    /// Number of users with at least one membership.
    pub fn len(&self) -> usize {
        self.members.read().values().filter(|o| !o.is_empty()).count()
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl MembershipStore for StaticMembership {
    async fn is_member(&self, user: &UserId, org: &OrgId) -> ScopeResult<bool> {
        Ok(self
            .members
            .read()
            .get(user)
            .is_some_and(|orgs| orgs.contains(org)))
    }
}

/// Turns request credentials into a tenant context or a rejection.
#[async_trait]
pub trait TenantResolver: Send + Sync {
    /// Resolve the context for one request.
    async fn resolve(&self, credentials: &TenantCredentials) -> ScopeResult<TenantContext>;
}

/// The standard resolver: one candidate, strict format, membership-checked.
pub struct ContextResolver<M> {
    store: M,
    allow_header_only: bool,
    allowed_orgs: HashSet<OrgId>,
}

impl<M: MembershipStore> ContextResolver<M> {
    /// Create a resolver that requires an authenticated principal.
    pub fn new(store: M) -> Self {
        Self {
            store,
            allow_header_only: false,
            allowed_orgs: HashSet::new(),
        }
    }

    /// Create a resolver from configuration.
    pub fn from_config(store: M, config: &ScopeConfig) -> Self {
        Self {
            store,
            allow_header_only: config.allow_header_only,
            allowed_orgs: config.allowed_orgs.iter().copied().collect(),
        }
    }

    /// Accept header-only requests for the given organizations.
    pub fn allow_header_only<I>(mut self, orgs: I) -> Self
    where
        I: IntoIterator<Item = OrgId>,
    {
        self.allow_header_only = true;
        self.allowed_orgs.extend(orgs);
        self
    }

    /// Pick the single candidate identifier.
    fn candidate(credentials: &TenantCredentials) -> ScopeResult<OrgId> {
        let header = non_blank(credentials.header.as_deref());
        let claim = non_blank(
            credentials
                .principal
                .as_ref()
                .and_then(|p| p.org_claim.as_deref()),
        );

        match (header, claim) {
            (None, None) => Err(ScopeError::rejected(
                RejectReason::Missing,
                "no organization header or claim",
            )),
            (Some(raw), None) | (None, Some(raw)) => OrgId::parse(raw),
            (Some(h), Some(c)) => {
                let header_org = OrgId::parse(h)?;
                let claim_org = OrgId::parse(c)?;
                if header_org != claim_org {
                    return Err(ScopeError::rejected(
                        RejectReason::Ambiguous,
                        format!("header names {header_org} but claim names {claim_org}"),
                    ));
                }
                Ok(header_org)
            }
        }
    }

    async fn check(&self, credentials: &TenantCredentials) -> ScopeResult<TenantContext> {
        let org = Self::candidate(credentials)?;

        match &credentials.principal {
            Some(principal) => {
                if !self.store.is_member(&principal.user_id, &org).await? {
                    return Err(ScopeError::rejected(
                        RejectReason::NotAMember,
                        format!("user {} is not a member of {org}", principal.user_id),
                    ));
                }
                Ok(TenantContext::for_user(org, principal.user_id))
            }
            None if !self.allow_header_only => Err(ScopeError::rejected(
                RejectReason::Unauthenticated,
                format!("header-only assertion of {org}"),
            )),
            None if !self.allowed_orgs.contains(&org) => Err(ScopeError::rejected(
                RejectReason::NotAllowed,
                format!("{org} is not on the header allow-list"),
            )),
            None => Ok(TenantContext::new(org)),
        }
    }
}

#[async_trait]
impl<M: MembershipStore> TenantResolver for ContextResolver<M> {
    async fn resolve(&self, credentials: &TenantCredentials) -> ScopeResult<TenantContext> {
        match self.check(credentials).await {
            Ok(ctx) => {
                debug!(
                    org_id = %ctx.organization_id(),
                    user_id = ?ctx.user_id().map(|u| u.to_string()),
                    "Tenant context resolved"
                );
                Ok(ctx)
            }
            Err(e) => {
                if let Some(reason) = e.reject_reason() {
                    warn!(code = %e.code(), reason = %reason, detail = %e, "Tenant context rejected");
                }
                Err(e)
            }
        }
    }
}

impl<M> std::fmt::Debug for ContextResolver<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextResolver")
            .field("allow_header_only", &self.allow_header_only)
            .field("allowed_orgs", &self.allowed_orgs.len())
            .finish()
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (StaticMembership, UserId, OrgId, OrgId) {
        let store = StaticMembership::new();
        let user = UserId::new_v4();
        let home = OrgId::new_v4();
        let other = OrgId::new_v4();
        store.grant(user, home);
        (store, user, home, other)
    }

    #[tokio::test]
    async fn test_member_resolves() {
        let (store, user, home, _) = setup();
        let resolver = ContextResolver::new(store);

        let creds = TenantCredentials::from_header(home.to_string())
            .with_principal(Principal::new(user));
        let ctx = resolver.resolve(&creds).await.unwrap();

        assert_eq!(ctx.organization_id(), home);
        assert_eq!(ctx.user_id(), Some(user));
    }

    #[tokio::test]
    async fn test_claim_only_resolves() {
        let (store, user, home, _) = setup();
        let resolver = ContextResolver::new(store);

        let creds = TenantCredentials::default()
            .with_principal(Principal::new(user).with_org_claim(home.to_string()));
        assert_eq!(resolver.resolve(&creds).await.unwrap().organization_id(), home);
    }

    #[tokio::test]
    async fn test_non_member_rejected() {
        let (store, user, _, other) = setup();
        let resolver = ContextResolver::new(store);

        let creds = TenantCredentials::from_header(other.to_string())
            .with_principal(Principal::new(user));
        let err = resolver.resolve(&creds).await.unwrap_err();
        assert_eq!(err.reject_reason(), Some(RejectReason::NotAMember));
    }

    #[tokio::test]
    async fn test_missing_rejected() {
        let (store, user, _, _) = setup();
        let resolver = ContextResolver::new(store);

        let creds = TenantCredentials::default()
            .with_header("   ")
            .with_principal(Principal::new(user));
        let err = resolver.resolve(&creds).await.unwrap_err();
        assert_eq!(err.reject_reason(), Some(RejectReason::Missing));
    }

    #[tokio::test]
    async fn test_malformed_rejected_before_membership() {
        let (store, user, _, _) = setup();
        let resolver = ContextResolver::new(store);

        let creds = TenantCredentials::from_header("1; SET app.org_id = ''")
            .with_principal(Principal::new(user));
        let err = resolver.resolve(&creds).await.unwrap_err();
        assert_eq!(err.reject_reason(), Some(RejectReason::Malformed));
    }

    #[tokio::test]
    async fn test_conflicting_candidates_rejected() {
        let (store, user, home, other) = setup();
        store.grant(user, other);
        let resolver = ContextResolver::new(store);

        let creds = TenantCredentials::from_header(other.to_string())
            .with_principal(Principal::new(user).with_org_claim(home.to_string()));
        let err = resolver.resolve(&creds).await.unwrap_err();
        assert_eq!(err.reject_reason(), Some(RejectReason::Ambiguous));
    }

    #[tokio::test]
    async fn test_header_only_rejected_by_default() {
        let (store, _, home, _) = setup();
        let resolver = ContextResolver::new(store);

        let err = resolver
            .resolve(&TenantCredentials::from_header(home.to_string()))
            .await
            .unwrap_err();
        assert_eq!(err.reject_reason(), Some(RejectReason::Unauthenticated));
    }

    #[tokio::test]
    async fn test_header_only_allow_list() {
        let (store, _, home, other) = setup();
        let resolver = ContextResolver::new(store).allow_header_only([home]);

        let ctx = resolver
            .resolve(&TenantCredentials::from_header(home.to_string()))
            .await
            .unwrap();
        assert_eq!(ctx.organization_id(), home);
        assert_eq!(ctx.user_id(), None);

        let err = resolver
            .resolve(&TenantCredentials::from_header(other.to_string()))
            .await
            .unwrap_err();
        assert_eq!(err.reject_reason(), Some(RejectReason::NotAllowed));
    }

    #[tokio::test]
    async fn test_revoked_membership() {
        let (store, user, home, _) = setup();
        assert!(store.revoke(&user, &home));
        assert!(store.is_empty());

        let resolver = ContextResolver::new(store);
        let creds = TenantCredentials::from_header(home.to_string())
            .with_principal(Principal::new(user));
        assert!(resolver.resolve(&creds).await.is_err());
    }
}
