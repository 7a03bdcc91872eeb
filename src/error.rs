use thiserror::Error;

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum AppError {
    /// The backend rejected the bearer token. Never retried.
    #[error("not authorized")]
    Unauthorized,

    #[error("network error: {0}")]
    Network(String),

    #[error("request timed out")]
    Timeout,

    #[error("server error {status}: {message}")]
    Server { status: u16, message: String },

    #[error("{0}")]
    Validation(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("unexpected response: {0}")]
    Decode(String),
}

impl AppError {
    pub fn validation(msg: impl Into<String>) -> Self {
        AppError::Validation(msg.into())
    }

    pub fn is_auth(&self) -> bool {
        matches!(self, AppError::Unauthorized)
    }

    /// Network-class and server-class failures flip reachability to NOT_READY.
    pub fn degrades_reachability(&self) -> bool {
        match self {
            AppError::Network(_) | AppError::Timeout => true,
            AppError::Server { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Text worth showing the user. Failures that mean the backend is down
    /// are covered by the startup overlay and only get logged.
    pub fn user_message(&self) -> Option<String> {
        match self {
            AppError::Validation(msg) => Some(msg.clone()),
            AppError::Server { status, message } if *status < 500 => Some(message.clone()),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(e: serde_json::Error) -> Self {
        AppError::Decode(e.to_string())
    }
}
