use std::collections::BTreeSet;

use dphp_types::{Role, User, UserId};
use serde::{Deserialize, Serialize};

use crate::operation::Operation;

/// A capability grant on a resource.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Share {
    #[serde(rename_all = "camelCase")]
    User {
        user_id: UserId,
        allowed_operations: BTreeSet<Operation>,
    },
    #[serde(rename_all = "camelCase")]
    Role {
        role: Role,
        allowed_operations: BTreeSet<Operation>,
    },
}

/// What a share is keyed by.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Grantee<'a> {
    User(&'a UserId),
    Role(&'a Role),
}

impl Share {
    pub fn user(user_id: impl Into<UserId>, operations: impl IntoIterator<Item = Operation>) -> Self {
        Share::User {
            user_id: user_id.into(),
            allowed_operations: operations.into_iter().collect(),
        }
    }

    pub fn role(role: impl Into<Role>, operations: impl IntoIterator<Item = Operation>) -> Self {
        Share::Role {
            role: role.into(),
            allowed_operations: operations.into_iter().collect(),
        }
    }

    pub fn grantee(&self) -> Grantee<'_> {
        match self {
            Share::User { user_id, .. } => Grantee::User(user_id),
            Share::Role { role, .. } => Grantee::Role(role),
        }
    }

    pub fn operations(&self) -> &BTreeSet<Operation> {
        match self {
            Share::User {
                allowed_operations, ..
            }
            | Share::Role {
                allowed_operations, ..
            } => allowed_operations,
        }
    }

    pub(crate) fn operations_mut(&mut self) -> &mut BTreeSet<Operation> {
        match self {
            Share::User {
                allowed_operations, ..
            }
            | Share::Role {
                allowed_operations, ..
            } => allowed_operations,
        }
    }

    /// Does this share let `principal` perform `operation`?
    pub fn want_to(&self, operation: Operation, principal: &User) -> bool {
        let matches = match self {
            Share::User { user_id, .. } => principal.user_id == *user_id,
            Share::Role { role, .. } => principal.is(role),
        };
        matches && self.operations().contains(&operation)
    }
}
