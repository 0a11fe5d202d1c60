use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

/// Reserved role that bypasses every resource check.
pub const ADMIN_ROLE: &str = "admin";

#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Role(pub String);

impl Role {
    pub fn new(role: impl Into<String>) -> Self {
        Self(role.into())
    }

    pub fn admin() -> Self {
        Self(ADMIN_ROLE.to_string())
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Role {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// The acting principal.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    #[serde(rename = "userId")]
    pub user_id: UserId,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub roles: Vec<Role>,
}

impl User {
    pub fn new(user_id: impl Into<String>, roles: Vec<Role>) -> Self {
        Self {
            user_id: UserId::new(user_id),
            roles,
        }
    }

    pub fn is(&self, role: &Role) -> bool {
        self.roles.contains(role)
    }

    pub fn is_admin(&self) -> bool {
        self.roles.iter().any(|r| r.0 == ADMIN_ROLE)
    }

    /// Decode a `Provenance` header value.
    ///
    /// `null`, an empty user id, or undecodable JSON all yield the anonymous
    /// principal (`None`).
    pub fn from_provenance(raw: &str) -> Option<User> {
        match serde_json::from_str::<Option<User>>(raw) {
            Ok(Some(user)) if !user.user_id.is_empty() => Some(user),
            _ => None,
        }
    }

    /// Encode an optional principal as a `Provenance` header value.
    pub fn to_provenance(user: Option<&User>) -> String {
        serde_json::to_string(&user).unwrap_or_else(|_| "null".to_string())
    }
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<Role>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<Role>>::deserialize(deserializer)?.unwrap_or_default())
}
