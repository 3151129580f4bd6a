use thiserror::Error;

pub type CanvasResult<T> = Result<T, CanvasError>;

#[derive(Error, Debug)]
pub enum CanvasError {
    /// Pixel buffer and palette geometry disagree, or the buffer is malformed
    #[error("encoding error: {0}")]
    Encoding(String),

    /// Palette or encoder resources could not be set up
    #[error("resource error: {0}")]
    Resource(String),

    #[error("canvas has not been initialized")]
    NotInitialized,

    #[error("an animation is already running")]
    AnimationRunning,

    #[error("config error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl CanvasError {
    pub fn encoding(msg: impl Into<String>) -> Self {
        Self::Encoding(msg.into())
    }

    pub fn resource(msg: impl Into<String>) -> Self {
        Self::Resource(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}
