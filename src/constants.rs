//! Protocol and timing constants for syncwire.
//!
//! This module centralizes the magic numbers of the connection layer so
//! that the manager, the session façade and the CLI agree on them.
//!
//! # Categories
//!
//! - **Timeouts**: Handshake timeout
//! - **Heartbeat**: Keep-alive cadence
//! - **Reconnection**: Backoff base, cap and attempt ceiling
//! - **Channels**: Broadcast buffer sizes

use std::time::Duration;

// ============================================================================
// Timeouts
// ============================================================================

/// Maximum time a WebSocket handshake may take.
///
/// Applies to explicit `connect()` calls and to automatic retries alike.
/// There is no per-message timeout; a stalled read is only detected
/// through a failing heartbeat.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

// ============================================================================
// Heartbeat
// ============================================================================

/// Interval between ping frames while connected.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

// ============================================================================
// Reconnection
// ============================================================================

/// Delay before the first automatic reconnection attempt.
///
/// Subsequent attempts double this value: 2s, 4s, 8s, 16s, 32s.
pub const RECONNECT_BASE_DELAY: Duration = Duration::from_secs(2);

/// Upper bound on any single reconnection delay.
pub const RECONNECT_MAX_DELAY: Duration = Duration::from_secs(60);

/// Number of automatic reconnection attempts before settling at
/// `Disconnected`.
pub const MAX_RECONNECT_ATTEMPTS: u32 = 5;

// ============================================================================
// Channels
// ============================================================================

/// Buffer size of the raw inbound frame broadcast.
pub const INBOUND_CHANNEL_CAPACITY: usize = 256;

/// Buffer size of each per-category event broadcast.
pub const CATEGORY_CHANNEL_CAPACITY: usize = 128;

/// Buffer size of the connection state transition broadcast.
pub const STATE_CHANNEL_CAPACITY: usize = 32;

// ============================================================================
// Endpoint
// ============================================================================

/// Path appended to the REST base URL to reach the WebSocket endpoint.
pub const WS_PATH: &str = "/ws";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_values_are_reasonable() {
        assert!(CONNECT_TIMEOUT >= Duration::from_secs(5));
        assert!(CONNECT_TIMEOUT < HEARTBEAT_INTERVAL);
    }

    #[test]
    fn test_backoff_never_reaches_cap_within_attempts() {
        // Last scheduled delay is base * 2^(max-1) = 32s, below the 60s cap.
        let last = RECONNECT_BASE_DELAY * 2u32.pow(MAX_RECONNECT_ATTEMPTS - 1);
        assert!(last <= RECONNECT_MAX_DELAY);
    }
}
