//! Sharing and ownership changes carried in the `P-Meta` header.

use dphp_auth::{AuthResult, Operation, Resource, Share};
use dphp_types::{Role, User, UserId};
use serde::{Deserialize, Serialize};

use crate::error::{ConsumerError, ConsumerResult};

/// An administrative change applied directly to a resource instead of being
/// executed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all_fields = "camelCase")]
pub enum AdminAction {
    RevokeRole {
        role: Role,
        #[serde(default)]
        operation: Option<Operation>,
    },
    RevokeUser {
        user_id: UserId,
        #[serde(default)]
        operation: Option<Operation>,
    },
    ShareWithRole {
        role: Role,
        allowed_operations: Vec<Operation>,
    },
    ShareWithUser {
        user_id: UserId,
        allowed_operations: Vec<Operation>,
    },
    /// Add an owner, keeping the current ones.
    ShareOwnership { user_id: UserId },
    /// Hand ownership over, dropping the acting owner.
    GiveOwnership { user_id: UserId },
}

impl AdminAction {
    /// Decode a `P-Meta` value. Empty and placeholder values carry no action.
    pub fn from_meta(raw: &str) -> ConsumerResult<Option<Self>> {
        match raw.trim() {
            "" | "null" | "[]" | "{}" => Ok(None),
            raw => serde_json::from_str(raw)
                .map(Some)
                .map_err(ConsumerError::Serialization),
        }
    }

    pub fn apply(&self, resource: &mut Resource, principal: Option<&User>) -> AuthResult<()> {
        match self {
            AdminAction::RevokeRole { role, operation } => {
                resource.revoke_role(role, *operation, principal)
            }
            AdminAction::RevokeUser { user_id, operation } => {
                resource.revoke_user(user_id, *operation, principal)
            }
            AdminAction::ShareWithRole {
                role,
                allowed_operations,
            } => resource.grant(
                Share::role(role.clone(), allowed_operations.iter().copied()),
                principal,
            ),
            AdminAction::ShareWithUser {
                user_id,
                allowed_operations,
            } => resource.grant(
                Share::user(user_id.clone(), allowed_operations.iter().copied()),
                principal,
            ),
            AdminAction::ShareOwnership { user_id } => {
                resource.require(Operation::Owner, principal)?;
                resource.share_ownership(user_id.clone(), principal, true)
            }
            AdminAction::GiveOwnership { user_id } => {
                resource.require(Operation::Owner, principal)?;
                resource.share_ownership(user_id.clone(), principal, false)
            }
        }
    }
}
