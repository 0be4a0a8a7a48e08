use std::collections::BTreeSet;

use webrtc_pubsub_protocol::{IceCandidate, TopicKind};

use crate::engine::SessionEngine;

/// Which side of the offer/answer exchange this peer plays.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum Role {
    Unresolved,
    /// Creates the offer, publishes on `server`, listens on `client`.
    Caller,
    /// Answers the offer, publishes on `client`, listens on `server`.
    Callee,
}

impl Role {
    #[must_use]
    pub const fn publish_topic(self) -> Option<TopicKind> {
        match self {
            Self::Unresolved => None,
            Self::Caller => Some(TopicKind::ToServer),
            Self::Callee => Some(TopicKind::ToClient),
        }
    }

    #[must_use]
    pub const fn listen_topic(self) -> Option<TopicKind> {
        match self.publish_topic() {
            Some(kind) => Some(kind.opposite()),
            None => None,
        }
    }
}

/// Externally observable state of the call.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum CallState {
    Idle,
    AwaitingLocalMedia,
    Negotiating(Role),
    InCall(Role),
}

impl CallState {
    pub(crate) const fn has_session(self) -> bool {
        matches!(self, Self::Negotiating(_) | Self::InCall(_))
    }
}

/// Everything a call owns. Reset to [`CallSession::default`] on teardown,
/// only the session id (kept by the bus adapter) survives.
pub(crate) struct CallSession<E: SessionEngine> {
    pub role: Role,
    pub publish_topic: Option<TopicKind>,
    pub connection: Option<E::Connection>,
    pub media: Option<E::Media>,
    pub subscribed: BTreeSet<TopicKind>,
    /// A `call` announcement arrived while idle.
    pub peer_waiting: bool,
    pub remote_description_set: bool,
    /// Remote candidates that arrived before the remote description was applied.
    pub remote_candidates: Vec<Option<IceCandidate>>,
    pub local_description_sent: bool,
    /// Local candidates gathered before our offer or answer went out.
    pub local_candidates: Vec<Option<IceCandidate>>,
}

impl<E: SessionEngine> Default for CallSession<E> {
    fn default() -> Self {
        Self {
            role: Role::Unresolved,
            publish_topic: None,
            connection: None,
            media: None,
            subscribed: BTreeSet::new(),
            peer_waiting: false,
            remote_description_set: false,
            remote_candidates: Vec::new(),
            local_description_sent: false,
            local_candidates: Vec::new(),
        }
    }
}

/// Point in time copy of the call, for diagnostics and tests.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct SessionSnapshot {
    pub state: CallState,
    pub role: Role,
    pub publish_topic: Option<String>,
    pub subscribed_topics: BTreeSet<String>,
    pub has_connection: bool,
    pub has_media: bool,
    pub peer_waiting: bool,
}
