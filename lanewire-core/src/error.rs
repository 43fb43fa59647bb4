/// Lanewire Error Types
///
/// Status taxonomy shared by the endpoint layer and the transports it drives.

use thiserror::Error;

use crate::lane::LaneIndex;

/// Main error type for lanewire operations.
///
/// The type is `Clone` so a flush request can keep the first terminal error
/// and hand it back to the caller once the in-flight lanes have drained.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LanewireError {
    /// Allocation failure (endpoint or request pool exhausted)
    #[error("Out of memory: {0}")]
    NoMemory(&'static str),

    /// Hardware queue exhausted, or identity map insertion failed
    #[error("No resources available")]
    NoResource,

    /// Missing or malformed argument
    #[error("Invalid parameter: {0}")]
    InvalidParam(String),

    /// Terminal failure reported by a transport
    #[error("I/O error: {0}")]
    Io(String),

    /// Pending slot already occupied
    #[error("Busy")]
    Busy,

    /// No endpoint for the given peer
    #[error("No endpoint for peer {0:#x}")]
    NoSuchPeer(u64),

    /// Lane index outside the endpoint's configuration
    #[error("Invalid lane: {0}")]
    InvalidLane(LaneIndex),

    /// Request discarded before it could complete (worker shutdown)
    #[error("Request canceled")]
    Canceled,
}

/// Result type alias for lanewire operations
pub type Result<T> = std::result::Result<T, LanewireError>;

impl LanewireError {
    /// Create an I/O error with a message
    pub fn io(msg: impl Into<String>) -> Self {
        Self::Io(msg.into())
    }

    /// Create an invalid parameter error with a message
    pub fn invalid_param(msg: impl Into<String>) -> Self {
        Self::InvalidParam(msg.into())
    }

    /// Check if this error only signals backpressure.
    ///
    /// Transient errors are retried by the caller (pending queue) and never
    /// reported as the final status of a request.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::NoResource | Self::Busy)
    }

    /// Check if this error aborts further lane processing.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        !self.is_transient()
    }
}
