use crate::types::UserId;

/// A failed outbound call to the messaging platform.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The platform answered and refused the call.
    #[error("api error{}: {description}", code_suffix(.code))]
    Api {
        code: Option<i64>,
        description: String,
    },

    #[error("network error: {0}")]
    Network(String),

    #[error("unexpected response: {0}")]
    Decode(String),
}

impl TransportError {
    pub fn api(code: i64, description: impl Into<String>) -> Self {
        Self::Api {
            code: Some(code),
            description: description.into(),
        }
    }

    pub fn description(&self) -> &str {
        match self {
            Self::Api { description, .. } => description,
            Self::Network(msg) | Self::Decode(msg) => msg,
        }
    }

    /// The platform rejected the request itself (HTTP 400 class).
    pub fn is_bad_request(&self) -> bool {
        matches!(self, Self::Api { code: Some(400), .. })
    }
}

fn code_suffix(code: &Option<i64>) -> String {
    code.map(|c| format!(" {c}")).unwrap_or_default()
}

/// Failures surfaced to a relay handler.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RelayError {
    #[error("could not provision a thread for user {user} after {attempts} attempts: {last}")]
    Provisioning {
        user: UserId,
        attempts: u32,
        last: String,
    },

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// A state write that did not reach storage. In-memory state stays authoritative.
#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    #[error("state file I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("state serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}
