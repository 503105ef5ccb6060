use thiserror::Error;

#[derive(Debug, Error)]
pub enum PigoError {
    #[error("catalog error: {0}")]
    Catalog(String),

    #[error("backend error: {0}")]
    Backend(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("no stream resolved for the current selection")]
    NoStream,

    #[error("handoff error: {0}")]
    Handoff(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
