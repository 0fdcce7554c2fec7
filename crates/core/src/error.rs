use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AppsecError {
    /// The value handed to a listener cannot be evaluated (e.g. root is not a map).
    #[error("Invalid object: {0}")]
    InvalidObject(String),

    /// A configuration fragment is malformed. The message is shown verbatim.
    #[error("{0}")]
    InvalidConfig(String),

    /// Evaluation exceeded its budget (microseconds).
    #[error("Evaluation timed out after {0}us")]
    Timeout(u64),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("{0}")]
    Other(String),
}

impl AppsecError {
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    pub fn invalid_object(msg: impl Into<String>) -> Self {
        Self::InvalidObject(msg.into())
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}

impl From<serde_json::Error> for AppsecError {
    fn from(e: serde_json::Error) -> Self {
        Self::Parse(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, AppsecError>;
