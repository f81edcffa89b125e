//! Typed error kinds for the hardware core. None of these ever
//! escape the poll loop or a configuration call as a hard failure: every
//! caller either retries, logs and moves on, or returns a best-effort value.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BusError {
    #[error("i2c io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("checksum mismatch")]
    Checksum,

    #[error("rssi {0} outside [1, 999]")]
    RssiRange(u16),

    #[error("capture already in progress on node {0}")]
    CaptureInProgress(usize),

    #[error("node {0} does not support this operation (api_level {1})")]
    UnsupportedApiLevel(usize, u16),

    #[error("no node at index {0}")]
    UnknownNode(usize),
}
