use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Service unavailable: {0}")]
    Service(#[from] ServiceError),

    #[error("Permission denied: {0}")]
    Permission(String),

    #[error("File system error: {0}")]
    FileSystem(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("HTTP {status} from {url}")]
    Http { url: String, status: u16 },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Archive error: {0}")]
    Archive(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid configuration file: {0}")]
    InvalidFile(String),

    #[error("Invalid value for {field}: {value}")]
    InvalidValue { field: String, value: String },
}

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Service operation failed: {0}")]
    OperationFailed(String),

    #[error("Service communication error: {0}")]
    CommunicationError(String),
}

impl From<csv::Error> for AppError {
    fn from(err: csv::Error) -> Self {
        AppError::FileSystem(std::io::Error::new(std::io::ErrorKind::Other, err))
    }
}

impl From<zip::result::ZipError> for AppError {
    fn from(err: zip::result::ZipError) -> Self {
        AppError::Archive(err.to_string())
    }
}

impl From<walkdir::Error> for AppError {
    fn from(err: walkdir::Error) -> Self {
        AppError::FileSystem(err.into())
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
