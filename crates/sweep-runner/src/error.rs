use std::io;
use std::path::PathBuf;
use sweep_core::KeyError;

#[derive(Debug, thiserror::Error)]
pub enum ExpandError {
    #[error("io failure at {}: {source}", .path.display())]
    IoFailure {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("axis `{0}` has no values")]
    EmptyAxis(String),
    #[error("paired axes {axes} have different lengths ({lengths})")]
    MismatchedPairing { axes: String, lengths: String },
    #[error("field `{0}` is bound by more than one axis")]
    DuplicateField(String),
    #[error("`{field}` references unknown field `${{{reference}}}`")]
    UnboundReference { field: String, reference: String },
    #[error("placeholder {token} maps to unknown field `{field}`")]
    UnknownPlaceholderField { token: String, field: String },
    #[error("placeholder {0} is declared for more than one field")]
    DuplicateToken(String),
    #[error("placeholder token for field `{0}` is empty")]
    EmptyPlaceholder(String),
    #[error("axes span more than {} combinations", usize::MAX)]
    TooManyCombinations,
    #[error("invalid output path pattern: {0}")]
    InvalidPath(String),
    #[error("combinations {first} and {second} both render to {}", .path.display())]
    PathCollision {
        path: PathBuf,
        first: usize,
        second: usize,
    },
    #[error(transparent)]
    Pattern(#[from] regex::Error),
}

impl ExpandError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        ExpandError::IoFailure {
            path: path.into(),
            source,
        }
    }
}

/// Why a single report could not be classified or archived.
#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("report is not valid UTF-8")]
    NotUtf8,
    #[error("no ```json fenced configuration block")]
    NoSnapshot,
    #[error("configuration block is not a valid configuration: {0}")]
    MalformedSnapshot(#[from] serde_json::Error),
    #[error(transparent)]
    Key(#[from] KeyError),
}
