use thiserror::Error;

/// Errors for stores providing the node's own ILP address.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum AddressStoreError {
    #[error("invalid address: {0}")]
    InvalidAddress(String),
    #[error("store error: {0}")]
    Other(String),
}

/// Errors for the account registry.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum AccountStoreError {
    #[error("account not found: {0}")]
    AccountNotFound(String),
    #[error("account already exists: {0}")]
    AccountExists(String),
    #[error("store error: {0}")]
    Other(String),
}
