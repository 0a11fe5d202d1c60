use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{AuthError, AuthResult};

/// Something a principal may want to do to a resource.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Operation {
    /// Send signals to an orchestration or entity.
    #[serde(rename = "signal")]
    Signal,
    /// Poll for orchestration completion.
    #[serde(rename = "completion")]
    Completion,
    /// Read orchestration output.
    #[serde(rename = "output")]
    Output,
    /// Call an entity.
    #[serde(rename = "call")]
    Call,
    /// Lock an entity.
    #[serde(rename = "lock")]
    Lock,
    /// Invite more shares.
    #[serde(rename = "share+")]
    SharePlus,
    /// See and manage other shares.
    #[serde(rename = "share-")]
    ShareMinus,
    /// Transfer ownership.
    #[serde(rename = "owner")]
    Owner,
}

impl Operation {
    pub const ALL: [Operation; 8] = [
        Operation::Signal,
        Operation::Completion,
        Operation::Output,
        Operation::Call,
        Operation::Lock,
        Operation::SharePlus,
        Operation::ShareMinus,
        Operation::Owner,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Signal => "signal",
            Operation::Completion => "completion",
            Operation::Output => "output",
            Operation::Call => "call",
            Operation::Lock => "lock",
            Operation::SharePlus => "share+",
            Operation::ShareMinus => "share-",
            Operation::Owner => "owner",
        }
    }

    /// Operations that bring a missing resource into existence.
    pub fn implies_creation(&self) -> bool {
        matches!(
            self,
            Operation::Signal | Operation::Call | Operation::Lock | Operation::Output
        )
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Operation::ALL
            .into_iter()
            .find(|op| op.as_str() == s)
            .ok_or_else(|| AuthError::UnknownOperation(s.to_string()))
    }
}

/// Parse a comma separated operation list as carried in the
/// `Target-Operations` and `Source-Operations` headers.
pub fn parse_operations(list: &str) -> AuthResult<Vec<Operation>> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::parse)
        .collect()
}

/// Who a resource is open to.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Mode {
    /// Any caller, authenticated or not.
    #[serde(rename = "anon")]
    Anonymous,
    /// Any authenticated caller; ownership changes stay with owners.
    #[serde(rename = "auth")]
    Authenticated,
    /// Owners, admins and explicit shares only.
    #[default]
    #[serde(rename = "explicit")]
    Explicit,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Mode::Anonymous => "anon",
            Mode::Authenticated => "auth",
            Mode::Explicit => "explicit",
        })
    }
}
