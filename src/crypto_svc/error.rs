use tokio::task::JoinError;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug)]
pub enum Error {
    IOError(std::io::Error),
    JoinError(JoinError),
    KeyDerivation(String),
    /// The envelope names an algorithm other than the one this service writes
    UnsupportedAlgorithm(String),
    /// A salt, iv or tag field could not be decoded or has the wrong length
    MalformedEnvelope(String),
    /// Wrong passphrase, altered ciphertext or altered tag
    AuthenticationFailed,
    /// The input exceeds what one key and IV may protect, in bytes
    InputTooLarge(u64),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::IOError(e) => write!(f, "crypto io error: {}", e),
            Error::JoinError(e) => write!(f, "key derivation task failed: {}", e),
            Error::KeyDerivation(msg) => write!(f, "key derivation failed: {}", msg),
            Error::UnsupportedAlgorithm(alg) => write!(f, "unsupported encryption algorithm '{}'", alg),
            Error::MalformedEnvelope(msg) => write!(f, "malformed encryption envelope: {}", msg),
            Error::AuthenticationFailed => write!(f, "decryption failed: wrong passphrase or corrupted ciphertext"),
            Error::InputTooLarge(max) => write!(f, "input exceeds the {} byte limit of a single envelope", max),
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Error::IOError(value)
    }
}

impl From<JoinError> for Error {
    fn from(value: JoinError) -> Self {
        Error::JoinError(value)
    }
}

impl From<tempfile::PathPersistError> for Error {
    fn from(value: tempfile::PathPersistError) -> Self {
        Error::IOError(value.error)
    }
}
