use thiserror::Error;

/// Faults reported by a capture device or one of its tracks.
///
/// Cloneable so a single device fault can be delivered to every subscriber.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CaptureError {
    #[error("device {0} disconnected")]
    Disconnected(String),
    #[error("permission to use {0} was revoked")]
    PermissionRevoked(String),
    #[error("track {0} has been stopped")]
    TrackStopped(String),
    #[error("dimension probe detached before a report was received")]
    ProbeDetached,
    #[error("frame is {actual} bytes, expected {expected}")]
    FrameSize { expected: usize, actual: usize },
    #[error("device error: {0}")]
    Device(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClipError {
    #[error("clip initialization failed: {0}")]
    Initialization(#[from] CaptureError),
    #[error("clip was destroyed before it became ready")]
    Destroyed,
    #[error("configuration error: {0}")]
    Config(String),
}

pub type Result<T, E = ClipError> = std::result::Result<T, E>;
