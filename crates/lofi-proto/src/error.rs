use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("station registry is empty")]
    Empty,

    #[error("duplicate station id: {0}")]
    DuplicateId(String),

    #[error("station not found: {0}")]
    NotFound(String),

    #[error("failed to parse station file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to read station file: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error, PartialEq)]
#[error("unknown mood: {0}")]
pub struct UnknownMood(pub String);

#[derive(Debug, Error, PartialEq)]
pub enum FrameError {
    #[error("frame of {0} bytes exceeds the limit")]
    TooLarge(usize),
}
