use std::{io, net::SocketAddr};

use thiserror::Error;

/// Why a single payload could not be queued for one recipient.
///
/// These never leave the hub: a broadcast folds them into its
/// [`BroadcastReport`](crate::hub::BroadcastReport) and moves on to the next
/// recipient.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("recipient send queue is full")]
    QueueFull,
    #[error("recipient has disconnected")]
    Disconnected,
}

#[derive(Debug, Error)]
pub enum ServeError {
    #[error("failed to bind {addr}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
}
