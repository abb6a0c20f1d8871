use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum GridwanError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid target address '{target}': {reason}")]
    InvalidTarget { target: String, reason: String },

    #[error("Encode error: {0}")]
    Encode(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Frame of {size} bytes exceeds max {max} bytes")]
    FrameTooLarge { size: usize, max: usize },

    #[error("IO error: {0}")]
    Io(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("JSON error: {0}")]
    Json(String),

    #[error("Authentication failed for group {0}")]
    Authentication(String),
}

pub type Result<T> = std::result::Result<T, GridwanError>;

impl From<std::io::Error> for GridwanError {
    fn from(e: std::io::Error) -> Self {
        GridwanError::Io(e.to_string())
    }
}

impl From<serde_json::Error> for GridwanError {
    fn from(e: serde_json::Error) -> Self {
        GridwanError::Json(e.to_string())
    }
}

impl GridwanError {
    /// Short machine-readable name, used as the `kind` field in fault log records.
    pub fn kind(&self) -> &'static str {
        match self {
            GridwanError::Config(_) => "config",
            GridwanError::InvalidTarget { .. } => "invalid_target",
            GridwanError::Encode(_) => "encode",
            GridwanError::Decode(_) => "decode",
            GridwanError::FrameTooLarge { .. } => "frame_too_large",
            GridwanError::Io(_) => "io",
            GridwanError::Transport(_) => "transport",
            GridwanError::Json(_) => "json",
            GridwanError::Authentication(_) => "authentication",
        }
    }
}
