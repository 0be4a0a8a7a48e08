use log::{debug, warn};
use webrtc_pubsub_protocol::{decode, encode, SessionId, SignalMessage, TopicKind, Topics};

use crate::bus::Bus;
use crate::error::BusError;

/// Bus adapter of a single session: maps logical topics onto the session's topic names and
/// signaling messages onto payloads.
pub(crate) struct Signaling<B: Bus> {
    session_id: SessionId,
    topics: Topics,
    bus: B,
}

impl<B: Bus> Signaling<B> {
    pub fn new(session_id: SessionId, bus: B) -> Self {
        let topics = Topics::derive(&session_id);
        Self {
            session_id,
            topics,
            bus,
        }
    }

    pub const fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub fn topic(&self, kind: TopicKind) -> &str {
        self.topics.name(kind)
    }

    pub fn subscribe(&self, kind: TopicKind) -> Result<(), BusError> {
        debug!("subscribing to {}", self.topic(kind));
        self.bus.subscribe(self.topic(kind))
    }

    pub fn unsubscribe(&self, kind: TopicKind) -> Result<(), BusError> {
        debug!("unsubscribing from {}", self.topic(kind));
        self.bus.unsubscribe(self.topic(kind))
    }

    /// Subscribe again after the bus came back from a dropped connection.
    pub fn resubscribe<'a>(
        &self,
        kinds: impl IntoIterator<Item = &'a TopicKind>,
    ) -> Result<(), BusError> {
        kinds
            .into_iter()
            .try_for_each(|kind| self.subscribe(*kind))
    }

    pub fn publish(&self, kind: TopicKind, message: &SignalMessage) -> Result<(), BusError> {
        debug!("publishing {} on {}", message.tag(), self.topic(kind));
        self.bus.publish(self.topic(kind), encode(message))
    }

    /// Turn a delivery into a message, dropping anything that isn't ours or doesn't decode.
    pub fn receive(&self, topic: &str, payload: &[u8]) -> Option<(TopicKind, SignalMessage)> {
        let Some(kind) = self.topics.kind_of(topic) else {
            warn!("ignoring message on foreign topic {}", topic);
            return None;
        };
        match decode(payload) {
            Ok(message) => {
                debug!("received {} on {:?} topic", message.tag(), kind);
                Some((kind, message))
            }
            Err(err) => {
                warn!("dropped undecodable signaling message on {}: {}", topic, err);
                None
            }
        }
    }
}
