use thiserror::Error;

use crate::retry::Transient;

#[derive(Debug, Error)]
pub enum AniListError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("AniList API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("parse error: {0}")]
    Parse(String),
}

impl Transient for AniListError {
    fn is_transient(&self) -> bool {
        match self {
            Self::Http(e) => !e.is_decode(),
            Self::Api { .. } => true,
            Self::Parse(_) => false,
        }
    }
}
