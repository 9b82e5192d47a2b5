use std::fmt::Display;

/// Errors surfaced by parameter construction, precomputation and backends
///
/// Nothing is retried: a failed run leaves no valid tables behind and must be restarted from
/// parameter construction.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The backend, a kernel, a binding or an output location is unusable
    #[error("configuration error: {0}")]
    Configuration(String),
    /// Parameters or arguments were rejected before any work was dispatched
    #[error("validation error: {0}")]
    Validation(String),
    /// The device failed while executing or reading back work
    #[error("device error: {0}")]
    Device(String),
}

impl Error {
    pub(crate) fn configuration(msg: impl Display) -> Self {
        Error::Configuration(msg.to_string())
    }

    pub(crate) fn validation(msg: impl Display) -> Self {
        Error::Validation(msg.to_string())
    }

    #[cfg_attr(not(feature = "vulkan"), allow(dead_code))]
    pub(crate) fn device(msg: impl Display) -> Self {
        Error::Device(msg.to_string())
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
