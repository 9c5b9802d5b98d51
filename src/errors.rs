use std::collections::TryReserveError;
use std::path::PathBuf;
use std::string::FromUtf8Error;

/// All error types that can occur while running the device manager.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Failed to serialize data to JSON.
    #[error("failed to dump json: {0:?}")]
    JsonDump(serde_json::Error),

    /// Failed to deserialize JSON data.
    #[error("failed to load json: {0:?}")]
    JsonLoad(serde_json::Error),

    /// A network socket operation failed.
    #[error("socket {action} error: {err:?}")]
    Socket { action: String, err: std::io::Error },

    /// An inbound datagram contained invalid UTF-8.
    #[error("utf8 decoding error: {0:?}")]
    Utf8Decode(FromUtf8Error),

    /// An inbound datagram was well-formed JSON but not a usable report.
    #[error("{0}")]
    Protocol(String),

    /// The configuration document has no device list at the expected path.
    #[error("cannot find devices array at {path}")]
    DevicesNotFound { path: String },

    /// The device registry could not be allocated.
    #[error("no more memory: {0}")]
    OutOfMemory(TryReserveError),

    /// A command targeted a device index the registry does not hold.
    #[error("unknown device {0}")]
    UnknownDevice(usize),

    /// The configuration file could not be read or written.
    #[error("cannot access configuration {path:?}: {err:?}")]
    ConfigFile { path: PathBuf, err: std::io::Error },
}

impl Error {
    /// Create a new socket error
    pub fn socket(action: &str, err: std::io::Error) -> Self {
        Error::Socket {
            action: action.to_string(),
            err,
        }
    }

    /// Create a new protocol error
    pub fn protocol(reason: &str, data: &str) -> Self {
        Error::Protocol(format!("{reason} in: {data}"))
    }

    /// Create a new configuration file error
    pub fn config_file(path: impl Into<PathBuf>, err: std::io::Error) -> Self {
        Error::ConfigFile {
            path: path.into(),
            err,
        }
    }
}

/// Hacky implementation of PartialEq for testing
#[cfg(test)]
impl PartialEq for Error {
    fn eq(&self, other: &Self) -> bool {
        self.to_string() == other.to_string()
    }
}
