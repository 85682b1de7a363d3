use gattlink_core::FrameError;
use thiserror::Error;

/// Opaque failure code reported by the BLE host, passed through unmodified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
#[error("host error code {code:#x}")]
pub struct HostError {
    pub code: i32,
}

impl HostError {
    pub const fn new(code: i32) -> Self {
        Self { code }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// Bad caller input: empty name, missing callback, empty or oversized
    /// payload.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
    /// Operation attempted out of lifecycle order.
    #[error("invalid state: {0}")]
    InvalidState(&'static str),
    /// Targeted send to a connection id that is not registered.
    #[error("connection {0} not found")]
    ConnectionNotFound(u16),
    #[error(transparent)]
    Host(#[from] HostError),
    #[error(transparent)]
    Frame(#[from] FrameError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_messages_are_stable() {
        assert_eq!(HostError::new(0x103).to_string(), "host error code 0x103");
        assert_eq!(
            TransportError::ConnectionNotFound(7).to_string(),
            "connection 7 not found"
        );
        assert_eq!(
            TransportError::InvalidState("not initialized").to_string(),
            "invalid state: not initialized"
        );
        assert_eq!(
            TransportError::from(FrameError::PayloadTooLarge { len: 600, max: 509 }).to_string(),
            "payload too large: 600 bytes (max 509)"
        );
    }
}
