use tokio::task::JoinError;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug)]
pub enum Error {
    IOError(std::io::Error),
    WalkError(walkdir::Error),
    JoinError(JoinError),
    /// The archive could not be read as a gzip-compressed tar stream
    InvalidArchive(String),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::IOError(e) => write!(f, "archive io error: {}", e),
            Error::WalkError(e) => write!(f, "could not walk source directory: {}", e),
            Error::JoinError(e) => write!(f, "archive task failed: {}", e),
            Error::InvalidArchive(msg) => write!(f, "invalid archive: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Error::IOError(value)
    }
}

impl From<walkdir::Error> for Error {
    fn from(value: walkdir::Error) -> Self {
        Error::WalkError(value)
    }
}

impl From<JoinError> for Error {
    fn from(value: JoinError) -> Self {
        Error::JoinError(value)
    }
}
