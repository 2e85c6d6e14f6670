//! Client-side send discipline: fold local edits, keep at most one batch in
//! flight, advance on acknowledgment.

use crate::event::AppEvent;
use crate::fold;
use crate::sync::ServerMessage;

/// A transmission attempt that did not complete.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("transmission failed: {0}")]
pub struct TransmissionError(pub String);

/// The outbound half of a client connection.
pub trait Transport {
    /// Transmit one batch. Delivery is confirmed only by a later ack.
    fn send(&mut self, batch: &[AppEvent]) -> Result<(), TransmissionError>;
}

impl<T: Transport + ?Sized> Transport for &mut T {
    fn send(&mut self, batch: &[AppEvent]) -> Result<(), TransmissionError> {
        (**self).send(batch)
    }
}

/// Local events waiting to be sent, and the batch awaiting acknowledgment.
///
/// At most one batch is ever unacknowledged. Edits made while a batch is in
/// flight accumulate (folded) in the queue and go out together after the ack.
/// Nothing here times out: only [`on_ack`](Self::on_ack) or
/// [`on_reconnect`](Self::on_reconnect) resolves an in-flight batch.
///
/// All transitions take `&mut self`; the queue is driven from one task that
/// reacts to local edits, link openings and acks.
#[derive(Debug)]
pub struct OutboundSyncQueue<T> {
    transport: T,
    queue: Vec<AppEvent>,
    in_flight: Vec<AppEvent>,
}

impl<T: Transport> OutboundSyncQueue<T> {
    pub fn new(transport: T) -> Self {
        OutboundSyncQueue {
            transport,
            queue: Vec::new(),
            in_flight: Vec::new(),
        }
    }

    /// Fold `event` into the queue, then try to send.
    pub fn enqueue(&mut self, event: AppEvent) {
        fold::fold_into(&mut self.queue, event);
        self.attempt_send();
    }

    /// Send the whole queue as one batch unless a batch is already in flight
    /// or there is nothing to send.
    ///
    /// A failed transmission still counts as in flight: the batch stays there
    /// until a late ack or a reconnect.
    pub fn attempt_send(&mut self) {
        if !self.in_flight.is_empty() || self.queue.is_empty() {
            return;
        }
        self.in_flight = std::mem::take(&mut self.queue);
        match self.transport.send(&self.in_flight) {
            Ok(()) => log::debug!("boardfold: sent batch of {} event(s)", self.in_flight.len()),
            Err(e) => log::warn!(
                "boardfold: {e}; holding {} event(s) in flight until ack or reconnect",
                self.in_flight.len()
            ),
        }
    }

    /// The in-flight batch was accepted by the server.
    pub fn on_ack(&mut self) {
        self.in_flight.clear();
        self.attempt_send();
    }

    /// A new connection is open. A stale ack can never arrive on it, so the
    /// in-flight batch goes back to the front of the queue, newer edits are
    /// folded over it, and sending resumes. Events may thus be delivered more
    /// than once, never zero times.
    pub fn on_reconnect(&mut self) {
        let newer = std::mem::replace(&mut self.queue, std::mem::take(&mut self.in_flight));
        for event in newer {
            fold::fold_into(&mut self.queue, event);
        }
        self.attempt_send();
    }

    /// Route a server message. Only acks affect the queue.
    pub fn on_message(&mut self, message: &ServerMessage) {
        if let ServerMessage::Ack { .. } = message {
            self.on_ack();
        }
    }

    /// Events not yet sent.
    pub fn queue(&self) -> &[AppEvent] {
        &self.queue
    }

    /// Events sent but not yet acknowledged.
    pub fn in_flight(&self) -> &[AppEvent] {
        &self.in_flight
    }

    /// Nothing queued and nothing awaiting acknowledgment.
    pub fn is_idle(&self) -> bool {
        self.queue.is_empty() && self.in_flight.is_empty()
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }
}
