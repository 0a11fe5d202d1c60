use thiserror::Error;

/// Errors produced while decoding identifiers and wire records.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TypesError {
    #[error("malformed identifier {input:?}: {reason}")]
    MalformedIdentifier { input: String, reason: String },

    #[error("malformed event message: {0}")]
    MalformedEvent(String),
}

impl TypesError {
    pub(crate) fn malformed(input: &str, reason: impl Into<String>) -> Self {
        TypesError::MalformedIdentifier {
            input: input.to_string(),
            reason: reason.into(),
        }
    }
}

impl From<serde_json::Error> for TypesError {
    fn from(e: serde_json::Error) -> Self {
        TypesError::MalformedEvent(e.to_string())
    }
}
