use thiserror::Error;

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("Connection failed: {reason}")]
    ConnectionFailed { reason: String },

    #[error("Compositor does not advertise {interface}")]
    ProtocolUnavailable { interface: &'static str },

    #[error("Protocol dispatch failed: {reason}")]
    Dispatch { reason: String },

    #[error("Capture target is gone")]
    TargetGone,

    /// A second request was issued while one is still in flight.
    #[error("A frame request is already in flight")]
    AlreadyBusy,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DescriptorError {
    #[error("Frame has zero dimensions")]
    ZeroDimensions,

    #[error("Unsupported plane count {0} (expected 1..=4)")]
    PlaneCount(u32),

    #[error("Plane index {index} out of range for {count} plane(s)")]
    PlaneIndex { index: u32, count: u32 },

    #[error("Plane {0} was never described")]
    MissingPlane(u32),

    #[error("Ready received before frame metadata")]
    NoMetadata,
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Reading config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parsing config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Configuration invalid: {reason}")]
    Invalid { reason: String },
}
