use model::ModelError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum VerifierError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Config file error: {0}")]
    ConfigFile(#[from] toml::de::Error),

    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    #[error("Invalid extra body: {message}")]
    InvalidExtraBody { message: String },

    #[error("Invalid test case on line {line}: {message}")]
    InvalidTestCase { line: usize, message: String },

    #[error("Unknown validator: {name}")]
    UnknownValidator { name: String },

    #[error("Model error: {0}")]
    Model(#[from] ModelError),
}

pub type VerifierResult<T> = Result<T, VerifierError>;
