use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Entry point the executor dispatches a call to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Method {
    #[serde(rename = "processMsg")]
    ProcessMessage,
    #[serde(rename = "entitySignal")]
    SignalEntity,
    #[serde(rename = "startOrchestration")]
    StartOrchestration,
    #[serde(rename = "orchestrationSignal")]
    SignalOrchestration,
    #[serde(rename = "entityDecoder")]
    DecodeEntity,
    #[serde(rename = "getPermissions")]
    GetPermissions,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::ProcessMessage => "processMsg",
            Method::SignalEntity => "entitySignal",
            Method::StartOrchestration => "startOrchestration",
            Method::SignalOrchestration => "orchestrationSignal",
            Method::DecodeEntity => "entityDecoder",
            Method::GetPermissions => "getPermissions",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "processMsg" => Ok(Method::ProcessMessage),
            "entitySignal" => Ok(Method::SignalEntity),
            "startOrchestration" => Ok(Method::StartOrchestration),
            "orchestrationSignal" => Ok(Method::SignalOrchestration),
            "entityDecoder" => Ok(Method::DecodeEntity),
            "getPermissions" => Ok(Method::GetPermissions),
            other => Err(format!("unknown method {other:?}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_forms_agree() {
        for method in [
            Method::ProcessMessage,
            Method::SignalEntity,
            Method::StartOrchestration,
            Method::SignalOrchestration,
            Method::DecodeEntity,
            Method::GetPermissions,
        ] {
            assert_eq!(method.as_str().parse::<Method>().unwrap(), method);
            let json = serde_json::to_string(&method).unwrap();
            assert_eq!(json, format!("\"{}\"", method.as_str()));
        }
        assert!("nope".parse::<Method>().is_err());
    }
}
