use thiserror::Error;

#[derive(Error, Debug)]
pub enum DvxError {
    #[error("Invalid format: {0}")]
    Format(String),

    #[error("Crypto operation failed: {0}")]
    Crypto(String),

    #[error("Invalid key material: {0}")]
    KeyMaterial(String),

    #[error("HSM operation failed: {0}")]
    Hsm(String),

    #[error("Cache operation failed: {0}")]
    Cache(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, DvxError>;
