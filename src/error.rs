//! Renderer error type

use crate::backend::BackendError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RendererError {
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error("{region} capacity exceeded: requested {requested} bytes, {available} available")]
    CapacityExceeded {
        region: &'static str,
        requested: u64,
        available: u64,
    },
    #[error("{count} lights exceed the maximum of {max}")]
    TooManyLights { count: usize, max: usize },
    #[error("Invalid model: {0}")]
    InvalidModel(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("Texture error: {0}")]
    Texture(String),
    #[error("Window error: {0}")]
    Window(String),
}

pub type RendererResult<T> = Result<T, RendererError>;
