#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Regex(#[from] regex::Error),

    #[error("invalid alias {alias:?}: must be one of {allowed}")]
    InvalidAlias { alias: char, allowed: &'static str },
}

pub type Result<T> = std::result::Result<T, Error>;
