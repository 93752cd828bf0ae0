use thiserror::Error;

/// Coarse outcome of a modem decode, mirroring the result codes handed to
/// the feature layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeStatus {
    Success,
    NoSignal,
    Corrupt,
    InsufficientSamples,
}

#[derive(Debug, Error)]
pub enum SqLinkError {
    #[error("Insufficient samples: need at least {needed}, got {got}")]
    InsufficientSamples { needed: usize, got: usize },

    #[error("No carrier detected")]
    NoSignal,

    #[error("Failed to find preamble/sync pattern")]
    SyncNotFound,

    #[error("Packet truncated")]
    Truncated,

    #[error("CRC mismatch (received {received:#010x}, computed {computed:#010x})")]
    BadCrc { received: u32, computed: u32 },

    #[error("Payload size {size} exceeds maximum {max}")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("Invalid packet header: {0}")]
    HeaderInvalid(String),

    #[error("Uncorrectable Hamming block")]
    HammingUncorrectable,

    #[error("Output buffer too small: need {needed}, capacity {capacity}")]
    BufferTooSmall { needed: usize, capacity: usize },

    #[error("Block of {len} bytes exceeds maximum {max}")]
    BlockTooLarge { len: usize, max: usize },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Transport error: {0}")]
    Transport(String),
}

impl SqLinkError {
    /// Classify an error the way the modem reports it upstream.
    pub fn status(&self) -> DecodeStatus {
        match self {
            SqLinkError::InsufficientSamples { .. } => DecodeStatus::InsufficientSamples,
            SqLinkError::NoSignal => DecodeStatus::NoSignal,
            _ => DecodeStatus::Corrupt,
        }
    }
}

pub type Result<T> = std::result::Result<T, SqLinkError>;
