use thiserror::Error;

pub type Result<T> = std::result::Result<T, CoreError>;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum CoreError {
    #[error("Unexpected key format: {0:?}")]
    InvalidKey(String),
}
