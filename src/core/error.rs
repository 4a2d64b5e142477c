use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SimError {
    /// Invalid or inconsistent configuration, raised before any path is simulated.
    #[error("configuration error: {0}")]
    Configuration(String),
    /// Factorization failure while generating correlated returns.
    #[error("numerical error: {0}")]
    Numerical(String),
}

impl SimError {
    pub(crate) fn config(msg: impl Into<String>) -> Self {
        SimError::Configuration(msg.into())
    }

    pub(crate) fn numerical(msg: impl Into<String>) -> Self {
        SimError::Numerical(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, SimError>;
