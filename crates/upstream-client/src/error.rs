//! Error types for upstream client operations.
//!
//! This module provides the error hierarchy for the capability set a feed uses
//! to talk to one upstream node:
//!
//! - [`ClientError`] - the primary error type for all client operations
//!
//! # Error Philosophy
//!
//! Every variant here is something the feed state machine (§4.1 of the reorg
//! engine) can react to directly: a dial/subscribe/fetch failure always routes
//! back into the feed's backoff loop. None of these are meant to propagate past
//! the feed.

use std::time::Duration;
use thiserror::Error;

/// Result type alias using [`ClientError`].
pub type Result<T> = std::result::Result<T, ClientError>;

/// Errors that can occur when talking to a single upstream node.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ClientError {
    /// Failed to establish a connection to the node.
    #[error("connection failed: {0}")]
    Connection(String),

    /// The node reported that it is still syncing.
    #[error("node is still syncing (current block {current}, highest {highest})")]
    Syncing {
        /// Block the node has synced up to.
        current: u64,
        /// Highest block the node is aware of.
        highest: u64,
    },

    /// A request timed out waiting for a response.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// Subscribing to new heads failed.
    #[error("subscription failed: {0}")]
    Subscription(String),

    /// A block-by-hash or block-by-number lookup came back empty.
    #[error("block not found: {0}")]
    NotFound(String),

    /// Transport-level error from the underlying RPC client.
    #[error("transport error: {0}")]
    Transport(String),
}

impl ClientError {
    /// Whether this error is likely transient and the feed should simply retry.
    ///
    /// Every variant here is transient from the feed's point of view — there is
    /// no fatal client error, only ones that cost another trip through backoff.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        true
    }
}

impl From<alloy::transports::TransportError> for ClientError {
    fn from(err: alloy::transports::TransportError) -> Self {
        let msg = err.to_string();
        let lower = msg.to_lowercase();
        if lower.contains("timeout") || lower.contains("timed out") {
            Self::Timeout(Duration::from_secs(0))
        } else if lower.contains("connection") || lower.contains("connect") {
            Self::Connection(msg)
        } else {
            Self::Transport(msg)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_variants_are_transient() {
        assert!(ClientError::Connection("x".into()).is_transient());
        assert!(
            ClientError::Syncing {
                current: 1,
                highest: 2
            }
            .is_transient()
        );
        assert!(ClientError::Timeout(Duration::from_secs(1)).is_transient());
    }

    #[test]
    fn display_messages_are_informative() {
        let err = ClientError::NotFound("0xdead".into());
        assert!(err.to_string().contains("0xdead"));
    }
}
