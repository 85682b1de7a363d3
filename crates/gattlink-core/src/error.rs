use thiserror::Error;

/// Errors returned by characteristic frame encode/decode.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    /// Outbound payload does not fit into a single frame.
    #[error("payload too large: {len} bytes (max {max})")]
    PayloadTooLarge { len: usize, max: usize },
    /// Raw value is shorter than the frame header.
    #[error("frame too short: {len} bytes (min {min})")]
    FrameTooShort { len: usize, min: usize },
    /// Raw value exceeds header plus maximum payload.
    #[error("frame too large: {len} bytes (max {max})")]
    FrameTooLarge { len: usize, max: usize },
    /// Header length field disagrees with the bytes present.
    #[error("frame length mismatch: header says {declared}, {available} bytes present")]
    LengthMismatch { declared: usize, available: usize },
}

/// Errors returned by strict UUID parsing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UuidError {
    #[error("empty uuid string")]
    Empty,
    /// Normalized hex length is not 4, 8 or 32.
    #[error("invalid uuid length: {0} hex digits")]
    InvalidLength(usize),
    #[error("invalid hex digit in uuid")]
    InvalidHex,
}

/// Errors returned while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(&'static str),
}

#[cfg(test)]
mod tests {
    use super::{FrameError, UuidError};

    #[test]
    fn error_messages_are_stable() {
        assert_eq!(
            FrameError::PayloadTooLarge { len: 510, max: 509 }.to_string(),
            "payload too large: 510 bytes (max 509)"
        );
        assert_eq!(
            FrameError::FrameTooShort { len: 2, min: 3 }.to_string(),
            "frame too short: 2 bytes (min 3)"
        );
        assert_eq!(
            UuidError::InvalidLength(3).to_string(),
            "invalid uuid length: 3 hex digits"
        );
    }
}
