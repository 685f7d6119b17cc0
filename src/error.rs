use std::io;
use std::net::SocketAddr;

use thiserror::Error;

/// Errors returned to callers of send and lifecycle operations.
///
/// Malformed or hostile network input never surfaces here; it is dropped, or ends the
/// connection with [`DisconnectReason::InvalidPacket`](crate::DisconnectReason::InvalidPacket).
#[derive(Error, Debug)]
pub enum Error {
    /// Every slot of the send window holds an unacknowledged packet
    #[error("send window is full")]
    SendWindowFull,

    /// The configured cap on outstanding reliable packets has been reached
    #[error("send buffer limit of {limit} packets reached")]
    SendBufferLimit { limit: usize },

    /// Message is larger than the channel can carry
    #[error("message of {size} bytes exceeds the maximum of {max} bytes for this channel")]
    MessageTooLarge { size: usize, max: usize },

    /// Message would need fragmentation, which is disabled
    #[error("message of {size} bytes exceeds {max} bytes and fragmentation is disabled")]
    FragmentationDisabled { size: usize, max: usize },

    /// Connection is not in the connected state
    #[error("connection is not connected")]
    NotConnected,

    /// Bind or connect called on a peer that is already running
    #[error("peer is already active")]
    AlreadyActive,

    /// Operation requires a bound or connected peer
    #[error("peer is not active")]
    NotActive,

    /// No connection exists for the endpoint
    #[error("no connection for {0}")]
    UnknownConnection(SocketAddr),

    /// Socket operation failed
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Result type for ripcord operations.
pub type Result<T> = std::result::Result<T, Error>;
