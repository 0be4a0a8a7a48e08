/*!
Publish/subscribe transport the peers signal through.

A [`Bus`] only moves opaque payloads between topics. Whatever it receives is pushed into
the call agent through the [`BusSink`] it was connected with; delivery is assumed to be
at-least-once and unordered across topics. After a dropped connection comes back the
implementation reports [`BusSink::reconnected`] and the agent subscribes its topics again.
*/

use log::debug;
use tokio::sync::mpsc;

use crate::call::Inbound;
use crate::error::BusError;

mod local;
mod websocket;

pub use local::{ClientId, LocalBroker, LocalBus};
pub use websocket::WsBus;

/// What a bus reports to the call agent.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum BusEvent {
    Message { topic: String, payload: Vec<u8> },
    Disconnected,
    /// Connection is back, server side subscriptions may have been lost.
    Reconnected,
}

/// Operations the call agent performs on an established connection.
///
/// They only enqueue work, so they never block the agent.
pub trait Bus: Send + 'static {
    /// # Errors
    /// Fails once the connection is closed for good.
    fn subscribe(&self, topic: &str) -> Result<(), BusError>;

    /// # Errors
    /// Fails once the connection is closed for good.
    fn unsubscribe(&self, topic: &str) -> Result<(), BusError>;

    /// # Errors
    /// Fails once the connection is closed for good, or if the transport can't carry `payload`.
    fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), BusError>;
}

/// Inbound side of a bus connection, feeding the call agent's queue.
#[derive(Debug, Clone)]
pub struct BusSink {
    sender: mpsc::UnboundedSender<Inbound>,
}

impl BusSink {
    pub(crate) const fn new(sender: mpsc::UnboundedSender<Inbound>) -> Self {
        Self { sender }
    }

    /// Hand a delivered message to the agent. Returns `false` once the agent is gone.
    pub fn deliver(&self, topic: String, payload: Vec<u8>) -> bool {
        self.send(BusEvent::Message { topic, payload })
    }

    pub fn disconnected(&self) -> bool {
        self.send(BusEvent::Disconnected)
    }

    pub fn reconnected(&self) -> bool {
        self.send(BusEvent::Reconnected)
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    fn send(&self, event: BusEvent) -> bool {
        let delivered = self.sender.send(Inbound::Bus(event)).is_ok();
        if !delivered {
            debug!("call agent is gone, dropping bus event");
        }
        delivered
    }
}
