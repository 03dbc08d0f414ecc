//! Error types for shared memory and semaphore operations

use thiserror::Error;

/// Errors that can occur while creating, opening or using the line IPC objects
#[derive(Error, Debug)]
pub enum IpcError {
    /// Object already exists
    #[error("IPC object already exists: {name}")]
    AlreadyExists {
        /// Object name
        name: String,
    },

    /// Object not found
    #[error("IPC object not found: {name}")]
    NotFound {
        /// Object name
        name: String,
    },

    /// Permission denied
    #[error("Permission denied accessing IPC object: {name}")]
    PermissionDenied {
        /// Object name
        name: String,
    },

    /// Name cannot be used for a POSIX object
    #[error("Invalid IPC object name: {name:?}")]
    InvalidName {
        /// Rejected name
        name: String,
    },

    /// Segment exists but was laid out by an incompatible build
    #[error("Incompatible line state segment {name}: {reason}")]
    LayoutMismatch {
        /// Segment name
        name: String,
        /// What did not match
        reason: String,
    },

    /// Station index outside the line
    #[error("Station index {index} out of range")]
    StationOutOfRange {
        /// Offending index
        index: usize,
    },

    /// A bounded wait elapsed
    #[error("Timed out waiting on {name}")]
    Timeout {
        /// Semaphore name
        name: String,
    },

    /// Semaphore operation failed
    #[error("Semaphore {op} failed on {name}: {source}")]
    Semaphore {
        /// Operation (`open`, `post`, `wait`, ...)
        op: &'static str,
        /// Semaphore name
        name: String,
        /// OS error
        source: std::io::Error,
    },

    /// IO error
    #[error("IO error: {source}")]
    Io {
        /// Source IO error
        #[from]
        source: std::io::Error,
    },

    /// Nix system call error
    #[error("System call error: {source}")]
    Nix {
        /// Source nix error
        #[from]
        source: nix::Error,
    },
}

impl IpcError {
    /// Classify an OS error raised while creating or opening `name`.
    pub fn from_os(name: &str, op: &'static str, source: std::io::Error) -> Self {
        match source.kind() {
            std::io::ErrorKind::NotFound => Self::NotFound {
                name: name.to_string(),
            },
            std::io::ErrorKind::AlreadyExists => Self::AlreadyExists {
                name: name.to_string(),
            },
            std::io::ErrorKind::PermissionDenied => Self::PermissionDenied {
                name: name.to_string(),
            },
            _ => Self::Semaphore {
                op,
                name: name.to_string(),
                source,
            },
        }
    }
}

/// Result type for line IPC operations
pub type IpcResult<T> = Result<T, IpcError>;
