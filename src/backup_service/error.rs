use crate::{archive_svc, cloud_svc, crypto_svc, data_layer_error::DataLayerError, integrity_svc};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug)]
pub enum Error {
    /// Missing server, backup, destination or artifact
    NotFound(String),
    /// Missing provider-config field, malformed payload, disabled destination
    Validation(String),
    /// Empty archive, or ciphertext checksum mismatch on download
    Integrity(String),
    /// Remote storage rejected the request
    Provider(String),
    /// Expected archive or backup file absent on disk
    Filesystem(String),
    Crypto(crypto_svc::error::Error),
    Archive(archive_svc::error::Error),
    DataLayerError(DataLayerError),
    IOError(std::io::Error),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::NotFound(msg) => write!(f, "not found: {}", msg),
            Error::Validation(msg) => write!(f, "validation failed: {}", msg),
            Error::Integrity(msg) => write!(f, "integrity check failed: {}", msg),
            Error::Provider(msg) => write!(f, "provider error: {}", msg),
            Error::Filesystem(msg) => write!(f, "filesystem error: {}", msg),
            Error::Crypto(e) => write!(f, "{}", e),
            Error::Archive(e) => write!(f, "{}", e),
            Error::DataLayerError(e) => write!(f, "{}", e),
            Error::IOError(e) => write!(f, "io error: {}", e),
        }
    }
}

impl std::error::Error for Error {}

impl From<tokio::io::Error> for Error {
    fn from(value: tokio::io::Error) -> Self {
        Error::IOError(value)
    }
}

impl From<DataLayerError> for Error {
    fn from(value: DataLayerError) -> Self {
        Error::DataLayerError(value)
    }
}

impl From<crypto_svc::error::Error> for Error {
    fn from(value: crypto_svc::error::Error) -> Self {
        Error::Crypto(value)
    }
}

impl From<archive_svc::error::Error> for Error {
    fn from(value: archive_svc::error::Error) -> Self {
        Error::Archive(value)
    }
}

impl From<integrity_svc::error::Error> for Error {
    fn from(value: integrity_svc::error::Error) -> Self {
        use integrity_svc::error::Error as E;
        match value {
            E::EmptyArchive | E::Unreadable(_) => Error::Integrity(value.to_string()),
            E::FileReadError(e) if e.kind() == std::io::ErrorKind::NotFound => Error::Filesystem(e.to_string()),
            E::FileReadError(e) => Error::IOError(e),
            E::JoinError(e) => Error::IOError(std::io::Error::new(std::io::ErrorKind::Other, e)),
        }
    }
}

impl From<cloud_svc::error::Error> for Error {
    fn from(value: cloud_svc::error::Error) -> Self {
        use cloud_svc::error::Error as E;
        match value {
            E::Validation(msg) => Error::Validation(msg),
            E::Provider(msg) => Error::Provider(msg),
            E::Filesystem(msg) => Error::Filesystem(msg),
            E::IOError(e) => Error::IOError(e),
        }
    }
}
