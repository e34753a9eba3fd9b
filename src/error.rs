use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DataShapeError {
    #[error("submission {submission_id}: missing required field `{field}`")]
    MissingField {
        submission_id: String,
        field: &'static str,
    },

    #[error("submission {submission_id}: rating {rating} is outside 1..=5")]
    RatingOutOfRange { submission_id: String, rating: u32 },

    #[error("submission {submission_id}: recipient '{name}' is not in the directory")]
    UnknownRecipient { submission_id: String, name: String },
}

#[derive(Debug, Error)]
pub enum TemplateRenderError {
    #[error("template context is missing `{0}`")]
    MissingField(&'static str),

    #[error("template formatting failed: {0}")]
    Format(#[from] std::fmt::Error),
}

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("invalid address '{address}': {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("could not build message: {0}")]
    Build(String),

    #[error("transport failure: {0}")]
    Transport(String),

    #[error("preview write failed: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("cannot reach feedback source: {0}")]
    Connection(String),

    #[error("feedback query failed: {0}")]
    Query(String),

    #[error("csv source: {0}")]
    Csv(#[from] csv::Error),
}

impl From<sqlx::Error> for SourceError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::Configuration(_) => SourceError::Connection(err.to_string()),
            other => SourceError::Query(other.to_string()),
        }
    }
}

/// Failures that abort a whole run before anything is sent.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("no recipient named '{0}' in the directory")]
    RecipientNotFound(String),

    #[error(transparent)]
    SourceConnection(SourceError),

    #[error(transparent)]
    Source(SourceError),
}

impl From<SourceError> for RunError {
    fn from(err: SourceError) -> Self {
        match err {
            SourceError::Connection(_) => RunError::SourceConnection(err),
            other => RunError::Source(other),
        }
    }
}
