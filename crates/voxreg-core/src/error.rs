use thiserror::Error;

#[derive(Error, Debug)]
pub enum RegistrationError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("dimension mismatch: {0}")]
    DimensionMismatch(String),

    #[error("numerical error: {0}")]
    Numerical(String),

    #[error("unsupported configuration: {0}")]
    Unsupported(String),

    #[error("invalid file: {0}")]
    InvalidFile(String),
}

pub type Result<T> = std::result::Result<T, RegistrationError>;
