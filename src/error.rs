use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Git error: {0}")]
    Git(#[from] git2::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("No home directory")]
    NoHomeDir,

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Operation not found: {0}")]
    OperationNotFound(String),

    #[error("Execution not found: {0}")]
    ExecutionNotFound(String),

    #[error("Notebook not found: {0}")]
    NotebookNotFound(String),

    #[error("Repository not synced: {0}")]
    MirrorNotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Command `{command}` failed: {message}")]
    CommandFailed { command: String, message: String },

    #[error("Operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Task join error: {0}")]
    TaskJoin(String),
}

impl Error {
    /// True for errors caused by a missing registry entry or filesystem
    /// precondition rather than a failure while doing work.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Error::OperationNotFound(_)
                | Error::ExecutionNotFound(_)
                | Error::NotebookNotFound(_)
                | Error::MirrorNotFound(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
