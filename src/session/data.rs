//! Boundary to the upper-layer data channel.
//!
//! A session hands every non-empty inbound `Data` body to its channel and
//! sends whatever payloads the channel produces. Reliable delivery,
//! fragmentation and acknowledgements live behind this trait.

use tokio::sync::mpsc;

const LOG_TARGET: &str = "ssu::data";

/// Default capacity of the inbound queue of a [`QueueDataChannel`].
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// Upper-layer message handling for one session.
///
/// Every method is called with the session lock held and must not block.
/// Returned payloads are sent as `Data` bodies in order.
pub trait DataChannel: Send {
    /// Handle an inbound `Data` body; return any immediate replies.
    fn on_data(&mut self, body: &[u8]) -> Vec<Vec<u8>>;

    /// Accept outbound messages; return payloads ready to send now.
    fn queue_messages(&mut self, messages: Vec<Vec<u8>>) -> Vec<Vec<u8>>;

    /// Return any payloads still held back.
    fn flush(&mut self) -> Vec<Vec<u8>>;
}

/// Data channel backed by a tokio mpsc queue.
///
/// Inbound bodies are pushed to the queue; outbound messages go out one per
/// payload.
#[derive(Debug)]
pub struct QueueDataChannel {
    inbound: mpsc::Sender<Vec<u8>>,
    pending: Vec<Vec<u8>>,
}

impl QueueDataChannel {
    /// Create a channel and the receiver for inbound bodies.
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Vec<u8>>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self::with_sender(tx), rx)
    }

    /// Create a channel delivering into an existing queue.
    pub fn with_sender(inbound: mpsc::Sender<Vec<u8>>) -> Self {
        Self {
            inbound,
            pending: Vec::new(),
        }
    }
}

impl DataChannel for QueueDataChannel {
    fn on_data(&mut self, body: &[u8]) -> Vec<Vec<u8>> {
        if let Err(err) = self.inbound.try_send(body.to_vec()) {
            tracing::warn!(
                target: LOG_TARGET,
                ?err,
                len = body.len(),
                "inbound queue unavailable, dropping data"
            );
        }
        Vec::new()
    }

    fn queue_messages(&mut self, messages: Vec<Vec<u8>>) -> Vec<Vec<u8>> {
        self.pending.extend(messages.into_iter().filter(|m| !m.is_empty()));
        self.flush()
    }

    fn flush(&mut self) -> Vec<Vec<u8>> {
        std::mem::take(&mut self.pending)
    }
}
