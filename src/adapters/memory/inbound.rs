//! Inbound message double that counts acks and nacks.

use std::sync::atomic::{AtomicUsize, Ordering};

use crate::domain::errors::TransportError;
use crate::domain::ports::InboundMessage;

/// Inbound message handle that counts settlements.
#[derive(Debug, Default)]
pub struct RecordingInboundMessage {
    acks: AtomicUsize,
    nacks: AtomicUsize,
}

impl RecordingInboundMessage {
    /// Unsettled message.
    pub fn new() -> Self {
        Self::default()
    }

    /// Times `ack` was called.
    pub fn acks(&self) -> usize {
        self.acks.load(Ordering::SeqCst)
    }

    /// Times `nack` was called.
    pub fn nacks(&self) -> usize {
        self.nacks.load(Ordering::SeqCst)
    }

    /// Total number of ack and nack calls.
    pub fn settlements(&self) -> usize {
        self.acks() + self.nacks()
    }
}

impl InboundMessage for RecordingInboundMessage {
    fn ack(&self) -> Result<(), TransportError> {
        self.acks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn nack(&self) -> Result<(), TransportError> {
        self.nacks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
