use thiserror::Error;

/// Result type alias for store operations
pub type Result<T, E = StoreError> = std::result::Result<T, E>;

/// Failures raised by a store backend. These are infrastructure faults and
/// must never be conflated with client-input rejections.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("store backend unavailable: {0}")]
    Unavailable(String),

    #[error("store constraint violated: {0}")]
    Constraint(String),
}
