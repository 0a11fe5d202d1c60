//! Ownership and sharing state of one piece of durable state.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use dphp_types::{Role, User, UserId};
use serde::{Deserialize, Serialize};

use crate::error::{AuthError, AuthResult};
use crate::operation::{Mode, Operation};
use crate::permissions::CreatePermissions;
use crate::share::{Grantee, Share};

/// Access control record for an activity, entity or orchestration.
///
/// Mutations take `&mut self`; callers that share a resource across tasks
/// wrap it in their own lock.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    #[serde(default)]
    pub owners: BTreeSet<UserId>,
    #[serde(default)]
    pub shares: Vec<Share>,
    #[serde(default)]
    pub mode: Mode,
    /// When the resource and its state should be deleted.
    #[serde(default)]
    pub expires: Option<DateTime<Utc>>,
    #[serde(skip)]
    revision: u64,
}

impl Resource {
    /// A fresh resource owned by `owner`, if there is one.
    pub fn new(owner: Option<&User>, mode: Mode) -> Self {
        let owners = owner
            .filter(|u| !u.user_id.is_empty())
            .map(|u| u.user_id.clone())
            .into_iter()
            .collect();
        Self {
            owners,
            shares: Vec::new(),
            mode,
            expires: None,
            revision: 0,
        }
    }

    pub fn from_bytes(data: &[u8], revision: u64) -> AuthResult<Self> {
        let mut resource: Resource = serde_json::from_slice(data)?;
        resource.revision = revision;
        Ok(resource)
    }

    pub fn to_bytes(&self) -> AuthResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Store revision this copy was read at; `0` if never stored.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub(crate) fn set_revision(&mut self, revision: u64) {
        self.revision = revision;
    }

    pub fn is_owner(&self, principal: Option<&User>) -> bool {
        principal.is_some_and(|u| self.owners.contains(&u.user_id))
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires.is_some_and(|at| at <= now)
    }

    /// Can `principal` perform `operation` on this resource?
    pub fn want_to(&self, operation: Operation, principal: Option<&User>) -> bool {
        if self.mode == Mode::Anonymous {
            return true;
        }
        let Some(user) = principal else {
            return false;
        };

        let owner = self.owners.contains(&user.user_id);
        if self.mode == Mode::Authenticated && (owner || operation != Operation::Owner) {
            return true;
        }
        if user.is_admin() || owner {
            return true;
        }
        self.shares.iter().any(|s| s.want_to(operation, user))
    }

    pub fn require(&self, operation: Operation, principal: Option<&User>) -> AuthResult<()> {
        if self.want_to(operation, principal) {
            Ok(())
        } else {
            Err(AuthError::not_authorized(operation))
        }
    }

    /// Add `share`, merging its operations into an existing share for the
    /// same user or role.
    pub fn grant(&mut self, share: Share, principal: Option<&User>) -> AuthResult<()> {
        self.require(Operation::SharePlus, principal)?;
        match self
            .shares
            .iter_mut()
            .find(|s| s.grantee() == share.grantee())
        {
            Some(existing) => existing
                .operations_mut()
                .extend(share.operations().iter().copied()),
            None => self.shares.push(share),
        }
        Ok(())
    }

    pub fn grant_user(
        &mut self,
        user_id: UserId,
        operation: Operation,
        principal: Option<&User>,
    ) -> AuthResult<()> {
        self.grant(Share::user(user_id, [operation]), principal)
    }

    pub fn grant_role(
        &mut self,
        role: Role,
        operation: Operation,
        principal: Option<&User>,
    ) -> AuthResult<()> {
        self.grant(Share::role(role, [operation]), principal)
    }

    /// Remove `user_id`'s share, or only `operation` from it.
    pub fn revoke_user(
        &mut self,
        user_id: &UserId,
        operation: Option<Operation>,
        principal: Option<&User>,
    ) -> AuthResult<()> {
        self.revoke(Grantee::User(user_id), operation, principal)
    }

    /// Remove `role`'s share, or only `operation` from it.
    pub fn revoke_role(
        &mut self,
        role: &Role,
        operation: Option<Operation>,
        principal: Option<&User>,
    ) -> AuthResult<()> {
        self.revoke(Grantee::Role(role), operation, principal)
    }

    fn revoke(
        &mut self,
        grantee: Grantee<'_>,
        operation: Option<Operation>,
        principal: Option<&User>,
    ) -> AuthResult<()> {
        self.require(Operation::ShareMinus, principal)?;
        match operation {
            None => self.shares.retain(|s| s.grantee() != grantee),
            Some(op) => {
                for share in self.shares.iter_mut().filter(|s| s.grantee() == grantee) {
                    share.operations_mut().remove(&op);
                }
                self.shares
                    .retain(|s| s.grantee() != grantee || !s.operations().is_empty());
            }
        }
        Ok(())
    }

    /// Make `new_owner` an owner, dropping `current` from the owners unless
    /// `keep_existing` is set.
    pub fn share_ownership(
        &mut self,
        new_owner: UserId,
        current: Option<&User>,
        keep_existing: bool,
    ) -> AuthResult<()> {
        let current = current.ok_or(AuthError::UnknownUser)?;
        if !keep_existing {
            self.owners.remove(&current.user_id);
        }
        self.owners.insert(new_owner);
        Ok(())
    }

    /// Evaluate a creation policy for `principal`, adopting its mode and
    /// lifetime.
    pub fn is_permitted(
        &mut self,
        permissions: &CreatePermissions,
        principal: Option<&User>,
        now: DateTime<Utc>,
    ) -> bool {
        self.mode = permissions.mode;
        self.expires = permissions.time_to_live().and_then(|ttl| {
            chrono::Duration::from_std(ttl)
                .ok()
                .and_then(|ttl| now.checked_add_signed(ttl))
        });
        permissions.is_permitted(principal)
    }

    /// Adopt the policy's mode; true if it changed.
    pub fn apply_permissions(&mut self, permissions: &CreatePermissions) -> bool {
        if self.mode == permissions.mode {
            return false;
        }
        self.mode = permissions.mode;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn alice() -> User {
        User::new("alice", vec![])
    }

    fn bob() -> User {
        User::new("bob", vec![Role::new("writers")])
    }

    fn admin() -> User {
        User::new("root", vec![Role::admin()])
    }

    #[test]
    fn anonymous_mode_allows_everything() {
        let resource = Resource::new(Some(&alice()), Mode::Anonymous);
        for op in Operation::ALL {
            assert!(resource.want_to(op, None));
            assert!(resource.want_to(op, Some(&bob())));
        }
    }

    #[test]
    fn authenticated_mode_reserves_ownership() {
        let resource = Resource::new(Some(&alice()), Mode::Authenticated);
        for op in Operation::ALL {
            assert!(!resource.want_to(op, None));
            assert!(resource.want_to(op, Some(&alice())));
            assert_eq!(resource.want_to(op, Some(&bob())), op != Operation::Owner);
        }
        assert!(resource.want_to(Operation::Owner, Some(&admin())));
    }

    #[test]
    fn explicit_mode_needs_owner_admin_or_share() {
        let mut resource = Resource::new(Some(&alice()), Mode::Explicit);
        for op in Operation::ALL {
            assert!(resource.want_to(op, Some(&alice())));
            assert!(resource.want_to(op, Some(&admin())));
            assert!(!resource.want_to(op, Some(&bob())));
            assert!(!resource.want_to(op, None));
        }

        resource
            .grant_role(Role::new("writers"), Operation::Signal, Some(&alice()))
            .unwrap();
        assert!(resource.want_to(Operation::Signal, Some(&bob())));
        assert!(!resource.want_to(Operation::Call, Some(&bob())));
    }

    #[test]
    fn grant_requires_share_plus() {
        let mut resource = Resource::new(Some(&alice()), Mode::Explicit);
        let err = resource
            .grant_user(UserId::new("carol"), Operation::Signal, Some(&bob()))
            .unwrap_err();
        assert!(matches!(
            err,
            AuthError::NotAuthorized {
                operation: Operation::SharePlus
            }
        ));
        assert!(resource.shares.is_empty());
    }

    #[test]
    fn grant_is_idempotent_and_merges() {
        let mut resource = Resource::new(Some(&alice()), Mode::Explicit);
        let owner = Some(&alice());
        resource.grant_user("bob".into(), Operation::Signal, owner).unwrap();
        resource.grant_user("bob".into(), Operation::Signal, owner).unwrap();
        resource.grant_user("bob".into(), Operation::Call, owner).unwrap();
        resource.grant_role("bob".into(), Operation::Lock, owner).unwrap();

        assert_eq!(resource.shares.len(), 2);
        assert_eq!(
            resource.shares[0],
            Share::user("bob", [Operation::Signal, Operation::Call])
        );
        assert_eq!(resource.shares[1], Share::role("bob", [Operation::Lock]));
    }

    #[test]
    fn revoke_drops_only_the_matching_share() {
        let mut resource = Resource::new(Some(&alice()), Mode::Explicit);
        let owner = Some(&alice());
        resource.grant_user("bob".into(), Operation::Signal, owner).unwrap();
        resource.grant_user("carol".into(), Operation::Signal, owner).unwrap();
        resource.grant_role("bob".into(), Operation::Signal, owner).unwrap();

        resource.revoke_user(&"bob".into(), None, owner).unwrap();
        assert_eq!(
            resource.shares,
            vec![
                Share::user("carol", [Operation::Signal]),
                Share::role("bob", [Operation::Signal]),
            ]
        );

        resource.revoke_user(&"nobody".into(), None, owner).unwrap();
        assert_eq!(resource.shares.len(), 2);

        resource.revoke_role(&"bob".into(), None, owner).unwrap();
        assert_eq!(resource.shares, vec![Share::user("carol", [Operation::Signal])]);
    }

    #[test]
    fn revoke_single_operation() {
        let mut resource = Resource::new(Some(&alice()), Mode::Explicit);
        let owner = Some(&alice());
        resource
            .grant(Share::role("ops", [Operation::Signal, Operation::Call]), owner)
            .unwrap();

        resource
            .revoke_role(&"ops".into(), Some(Operation::Signal), owner)
            .unwrap();
        assert_eq!(resource.shares, vec![Share::role("ops", [Operation::Call])]);

        resource
            .revoke_role(&"ops".into(), Some(Operation::Call), owner)
            .unwrap();
        assert!(resource.shares.is_empty());
    }

    #[test]
    fn revoke_requires_share_minus() {
        let mut resource = Resource::new(Some(&alice()), Mode::Explicit);
        resource
            .grant_user("bob".into(), Operation::SharePlus, Some(&alice()))
            .unwrap();
        assert!(resource.revoke_user(&"bob".into(), None, Some(&bob())).is_err());
        assert_eq!(resource.shares.len(), 1);
    }

    #[test]
    fn ownership_transfer() {
        let mut resource = Resource::new(Some(&alice()), Mode::Explicit);
        assert!(matches!(
            resource.share_ownership("bob".into(), None, false),
            Err(AuthError::UnknownUser)
        ));

        resource
            .share_ownership("bob".into(), Some(&alice()), true)
            .unwrap();
        assert!(resource.is_owner(Some(&alice())));
        assert!(resource.is_owner(Some(&bob())));

        resource
            .share_ownership("carol".into(), Some(&alice()), false)
            .unwrap();
        assert!(!resource.is_owner(Some(&alice())));
        assert!(resource.owners.contains(&UserId::new("carol")));
    }

    #[test]
    fn permission_evaluation_sets_mode_and_expiry() {
        let now = Utc::now();
        let mut resource = Resource::new(None, Mode::Explicit);
        let perms = CreatePermissions {
            ttl: 60_000_000_000,
            ..CreatePermissions::new(Mode::Authenticated)
        };
        assert!(resource.is_permitted(&perms, Some(&bob()), now));
        assert_eq!(resource.mode, Mode::Authenticated);
        assert_eq!(resource.expires, Some(now + Duration::seconds(60)));
        assert!(!resource.is_expired(now));
        assert!(resource.is_expired(now + Duration::seconds(61)));

        assert!(!resource.is_permitted(&perms, None, now));
    }

    #[test]
    fn apply_reports_mode_changes() {
        let mut resource = Resource::new(None, Mode::Explicit);
        assert!(!resource.apply_permissions(&CreatePermissions::new(Mode::Explicit)));
        assert!(resource.apply_permissions(&CreatePermissions::new(Mode::Anonymous)));
        assert_eq!(resource.mode, Mode::Anonymous);
    }

    #[test]
    fn bytes_carry_revision_separately() {
        let mut resource = Resource::new(Some(&alice()), Mode::Explicit);
        resource.grant_user("bob".into(), Operation::Call, Some(&alice())).unwrap();
        let bytes = resource.to_bytes().unwrap();
        let back = Resource::from_bytes(&bytes, 7).unwrap();
        assert_eq!(back.revision(), 7);
        assert_eq!(back.owners, resource.owners);
        assert_eq!(back.shares, resource.shares);
    }
}
