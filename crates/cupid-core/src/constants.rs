//! Default transport limits of the connection hub.

use std::time::Duration;

/// Largest inbound WebSocket message accepted before the session is closed.
pub const MAX_MESSAGE_BYTES: usize = 512 * 1024;

/// Outbound mailbox capacity per session, in frames.
pub const MAILBOX_CAPACITY: usize = 256;

/// Inbound silence after which a peer is presumed dead.
pub const IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Deadline for a single transport write.
pub const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Interval between keepalive probes.
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);

/// Maximum number of queued frames joined into one transport write.
pub const COALESCE_MAX_FRAMES: usize = 32;

/// Separator between coalesced envelopes in a single text frame.
pub const ENVELOPE_SEPARATOR: char = '\n';
