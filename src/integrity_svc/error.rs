use tokio::task::JoinError;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug)]
pub enum Error {
    FileReadError(tokio::io::Error),
    JoinError(JoinError),
    /// The archive could not be listed as a gzip-compressed tar stream
    Unreadable(String),
    /// The archive listed zero entries
    EmptyArchive,
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::FileReadError(e) => write!(f, "could not read archive: {}", e),
            Error::JoinError(e) => write!(f, "verification task failed: {}", e),
            Error::Unreadable(msg) => write!(f, "archive is unreadable: {}", msg),
            Error::EmptyArchive => write!(f, "empty archive"),
        }
    }
}

impl std::error::Error for Error {}

impl From<JoinError> for Error {
    fn from(value: JoinError) -> Self {
        Error::JoinError(value)
    }
}

impl From<tokio::io::Error> for Error {
    fn from(value: tokio::io::Error) -> Self {
        Error::FileReadError(value)
    }
}
