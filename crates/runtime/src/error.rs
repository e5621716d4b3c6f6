//! Error types for the sandbox runtime.

use thiserror::Error;

/// Result type alias for runtime operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while bringing a sandbox session up.
///
/// Teardown deliberately has no error type: failures while stopping an
/// individual process are logged and swallowed so the remaining processes
/// still get their termination attempt.
#[derive(Debug, Error)]
pub enum Error {
    /// The OS could not hand out a free loopback port.
    #[error("no free loopback port available: {0}")]
    Resource(#[source] std::io::Error),

    /// A required external program is not installed or not on PATH.
    #[error(
        "{program} not found. Check that Xvfb, openbox, x11vnc, novnc and node \
         are installed and on PATH."
    )]
    DependencyMissing {
        /// The program the OS failed to locate.
        program: String,
    },

    /// A launch step failed for a reason other than a missing program.
    #[error("failed to launch {stage}: {source}")]
    Launch {
        /// Display name of the launch step that failed.
        stage: String,
        #[source]
        source: std::io::Error,
    },
}

impl Error {
    /// Returns the missing program name if this is a dependency error.
    pub fn missing_program(&self) -> Option<&str> {
        match self {
            Error::DependencyMissing { program } => Some(program),
            _ => None,
        }
    }
}
