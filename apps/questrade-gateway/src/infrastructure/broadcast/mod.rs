//! Broadcast Hub
//!
//! Fan-out point between the single stream connection and in-process
//! consumers. Quotes and connection-status transitions go out on separate
//! `tokio::sync::broadcast` channels; slow consumers lag and drop rather
//! than backpressure the stream reader.

use tokio::sync::broadcast;

use crate::infrastructure::questrade::messages::QuoteMessage;

/// Stream connection status, as consumers observe it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamStatus {
    /// This instance is standing by; another instance owns the stream.
    Standby,
    /// Resolving symbols and allocating the stream socket.
    Provisioning,
    /// Socket open and authenticated; quotes flowing.
    Connected,
    /// Connection lost; reconnect pending.
    Disconnected,
    /// Shut down for good.
    Stopped,
}

/// Fan-out hub for quotes and status transitions.
#[derive(Debug)]
pub struct BroadcastHub {
    quotes: broadcast::Sender<QuoteMessage>,
    status: broadcast::Sender<StreamStatus>,
}

impl BroadcastHub {
    /// Create a hub whose channels buffer `capacity` messages per receiver.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (quotes, _) = broadcast::channel(capacity);
        let (status, _) = broadcast::channel(capacity);
        Self { quotes, status }
    }

    /// Subscribe to quote updates.
    #[must_use]
    pub fn subscribe_quotes(&self) -> broadcast::Receiver<QuoteMessage> {
        self.quotes.subscribe()
    }

    /// Subscribe to connection-status transitions.
    #[must_use]
    pub fn subscribe_status(&self) -> broadcast::Receiver<StreamStatus> {
        self.status.subscribe()
    }

    /// Publish a quote. A send with no receivers is not an error.
    pub fn publish_quote(&self, quote: QuoteMessage) {
        let _ = self.quotes.send(quote);
    }

    /// Publish a status transition.
    pub fn publish_status(&self, status: StreamStatus) {
        let _ = self.status.send(status);
    }

    /// Current number of quote subscribers.
    #[must_use]
    pub fn quote_subscribers(&self) -> usize {
        self.quotes.receiver_count()
    }
}

impl Default for BroadcastHub {
    fn default() -> Self {
        Self::new(1024)
    }
}

// =============================================================================
// Tests
// =============================================================================
