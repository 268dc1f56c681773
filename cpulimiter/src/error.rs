//! Error types returned by the controller, tracker, and process providers.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("at least one of --pid, --name, or --command is required")]
    NoSelector,

    #[error("no process found with name `{0}`")]
    NameNotFound(String),

    #[error("process {0} not found")]
    NotFound(u32),

    #[error("permission denied operating on process {0}")]
    PermissionDenied(u32),

    #[error("the target process is no longer running")]
    NoProcess,

    #[error("failed to spawn `{command}`")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("transient OS error")]
    Os(#[from] std::io::Error),
}

pub type Result<T> = core::result::Result<T, Error>;
