use std::time::Duration;

use dphp_types::{Role, User, UserId};
use serde::{Deserialize, Serialize};

use crate::error::{AuthError, AuthResult};
use crate::operation::Mode;

/// Sharing limits; `-1` means unlimited.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Limits {
    #[serde(default)]
    pub user: i64,
    #[serde(default)]
    pub role: i64,
    #[serde(default)]
    pub global: i64,
}

/// Creation policy for resources of one definition, as reported by the
/// executor's permission lookup.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatePermissions {
    pub mode: Mode,
    #[serde(default)]
    pub limits: Limits,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub users: Vec<UserId>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub roles: Vec<Role>,
    /// Resource lifetime in nanoseconds; `0` never expires.
    #[serde(default)]
    pub ttl: u64,
}

impl CreatePermissions {
    pub fn new(mode: Mode) -> Self {
        Self {
            mode,
            ..Default::default()
        }
    }

    pub fn validate(&self) -> AuthResult<()> {
        let limits = [
            ("user", self.limits.user),
            ("role", self.limits.role),
            ("global", self.limits.global),
        ];
        for (name, value) in limits {
            if value < -1 {
                return Err(AuthError::InvalidPermissions(format!(
                    "{name} limit must be -1 or greater, got {value}"
                )));
            }
        }
        Ok(())
    }

    pub fn time_to_live(&self) -> Option<Duration> {
        (self.ttl > 0).then(|| Duration::from_nanos(self.ttl))
    }

    /// May `principal` create a resource under this policy?
    pub fn is_permitted(&self, principal: Option<&User>) -> bool {
        match self.mode {
            Mode::Anonymous => true,
            Mode::Authenticated => principal.is_some_and(|u| !u.user_id.is_empty()),
            Mode::Explicit => principal.is_some_and(|u| {
                self.users.contains(&u.user_id) || u.roles.iter().any(|r| self.roles.contains(r))
            }),
        }
    }
}

fn null_as_empty<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}
