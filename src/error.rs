use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Error that can be returned by [`crate::StableMap`] lookups.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    /// The requested key is not present in the map.
    #[error("key does not exist")]
    KeyNotFound,
}
