use std::path::PathBuf;

use thiserror::Error;

/// Library error type for picture-frame operations.
#[derive(Debug, Error)]
pub enum Error {
    /// `Scheduler::start` was called on a scheduler that is already running.
    #[error("scheduler already started")]
    SchedulerAlreadyStarted,

    /// The scheduler was stopped and cannot be restarted.
    #[error("scheduler has been stopped")]
    SchedulerStopped,

    /// A viewer command was issued before `init` or after shutdown.
    #[error("init() must be called before controlling the viewer")]
    ViewerNotRunning,

    /// The viewer executable could not be probed successfully.
    #[error("viewer probe '{} --help' failed: {reason}", .exe.display())]
    ViewerProbe { exe: PathBuf, reason: String },

    /// Launching the long-running viewer failed.
    #[error("failed to launch viewer {}: {source}", .exe.display())]
    ViewerSpawn {
        exe: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Writing a control command to the viewer failed.
    #[error("failed to send '{command}' to viewer: {source}")]
    ViewerIo {
        command: &'static str,
        #[source]
        source: std::io::Error,
    },

    /// A sub-directory name was empty or tried to escape the picture root.
    #[error("invalid directory name '{0}'")]
    InvalidDirectoryName(String),

    /// An uploaded file name was empty or path-like.
    #[error("invalid file name '{0}'")]
    InvalidFileName(String),

    /// The upload destination already exists.
    #[error("file '{file}' already exists in {directory}")]
    DuplicateFile { directory: String, file: String },

    /// Upload content did not declare an image content type.
    #[error("'{0}' is not an image")]
    NotAnImage(String),

    /// Underlying IO error.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Settings persistence failed.
    #[error("settings error: {0:#}")]
    Settings(anyhow::Error),
}
