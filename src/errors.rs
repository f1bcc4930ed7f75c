use thiserror::Error;

/// Stable classification of [`DbError`] values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    MissingField,
    InvalidCriteria,
    InvalidOperator,
    InvalidPipeline,
    InvalidUpdate,
    InvalidGeo,
    Json,
    Transport,
    ReplicationStartup,
    Config,
    Io,
    NoSuchModel,
}

#[derive(Debug, Error)]
pub enum DbError {
    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Invalid criteria: {0}")]
    InvalidCriteria(String),

    #[error("Invalid operator {op}: {reason}")]
    InvalidOperator { op: String, reason: String },

    #[error("Invalid aggregation pipeline: {0}")]
    InvalidPipeline(String),

    #[error("Invalid update: {0}")]
    InvalidUpdate(String),

    #[error("Invalid distance criteria: {0}")]
    InvalidGeo(String),

    #[error("Serde JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Replication startup failed: {0}")]
    ReplicationStartup(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("No such model: {0}")]
    NoSuchModel(String),
}

impl DbError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::MissingField(_) => ErrorKind::MissingField,
            Self::InvalidCriteria(_) => ErrorKind::InvalidCriteria,
            Self::InvalidOperator { .. } => ErrorKind::InvalidOperator,
            Self::InvalidPipeline(_) => ErrorKind::InvalidPipeline,
            Self::InvalidUpdate(_) => ErrorKind::InvalidUpdate,
            Self::InvalidGeo(_) => ErrorKind::InvalidGeo,
            Self::Json(_) => ErrorKind::Json,
            Self::Transport(_) => ErrorKind::Transport,
            Self::ReplicationStartup(_) => ErrorKind::ReplicationStartup,
            Self::Config(_) => ErrorKind::Config,
            Self::Io(_) => ErrorKind::Io,
            Self::NoSuchModel(_) => ErrorKind::NoSuchModel,
        }
    }

    pub(crate) fn operator(op: &str, reason: impl Into<String>) -> Self {
        Self::InvalidOperator { op: op.to_string(), reason: reason.into() }
    }

    /// True for the synchronous input-shape failures raised while compiling.
    #[must_use]
    pub fn is_validation(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::MissingField
                | ErrorKind::InvalidCriteria
                | ErrorKind::InvalidOperator
                | ErrorKind::InvalidPipeline
                | ErrorKind::InvalidUpdate
                | ErrorKind::InvalidGeo
        )
    }
}

impl From<std::io::Error> for DbError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

impl From<reqwest::Error> for DbError {
    fn from(e: reqwest::Error) -> Self {
        Self::Transport(e.to_string())
    }
}

impl From<toml::de::Error> for DbError {
    fn from(e: toml::de::Error) -> Self {
        Self::Config(e.to_string())
    }
}
