use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("Invalid address")]
    InvalidAddress,
    #[error("Invalid hex: {0}")]
    InvalidHex(String),
}
