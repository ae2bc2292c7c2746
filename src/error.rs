use std::path::PathBuf;

/// Errors that abort a run before or during setup. Failures inside a live
/// game never surface here; they are confined to that game and logged.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid configuration: {reason}")]
    Config { reason: String },

    #[error("no engine configuration for player {name:?} (names are case sensitive)")]
    UnknownPlayer { name: String },

    #[error("cannot read {}: {source}", path.display())]
    FileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub fn config(reason: impl Into<String>) -> Error {
        Error::Config {
            reason: reason.into(),
        }
    }
}
