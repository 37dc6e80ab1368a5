use thiserror::Error;

use crate::reconstruction::ReconstructionError;

#[derive(Error, Debug)]
pub enum PanexamError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Image encoding error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Reconstruction error: {0}")]
    Reconstruction(#[from] ReconstructionError),

    #[error("Port error in {port}: {message}")]
    Port { port: String, message: String },

    #[error("System error: {message}")]
    System { message: String },
}

impl PanexamError {
    pub fn system<S: Into<String>>(message: S) -> Self {
        Self::System {
            message: message.into(),
        }
    }

    pub fn port<P: Into<String>, S: Into<String>>(port: P, message: S) -> Self {
        Self::Port {
            port: port.into(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, PanexamError>;
