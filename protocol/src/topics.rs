/*!
Topic names a session is signaled on.

Given session id `S` the three topics are `webrtc/S/call`, shared by both peers to announce
call intent and hang ups, and the directional `webrtc/S/server` and `webrtc/S/client`.
The caller publishes on `server` and listens on `client`, the callee the other way round.
*/

use serde::{Deserialize, Serialize};

use crate::SessionId;

const TOPIC_PREFIX: &str = "webrtc";
const CALL_SUFFIX: &str = "call";
const SERVER_SUFFIX: &str = "server";
const CLIENT_SUFFIX: &str = "client";

/// Logical channel of a session, independent of the session id.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub enum TopicKind {
    /// Broadcast channel for `call` and `hangup`, subscribed by both peers at all times.
    Call,
    /// Caller to callee.
    ToServer,
    /// Callee to caller.
    ToClient,
}

impl TopicKind {
    /// The directional topic paired with this one, `Call` maps to itself.
    #[must_use]
    pub const fn opposite(self) -> Self {
        match self {
            Self::Call => Self::Call,
            Self::ToServer => Self::ToClient,
            Self::ToClient => Self::ToServer,
        }
    }
}

/// Fully qualified topic names of a single session.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct Topics {
    call: String,
    to_server: String,
    to_client: String,
}

impl Topics {
    /// Derive the topic names for `session_id`.
    #[must_use]
    pub fn derive(session_id: &SessionId) -> Self {
        let base = format!("{}/{}", TOPIC_PREFIX, session_id.as_str());
        Self {
            call: format!("{base}/{CALL_SUFFIX}"),
            to_server: format!("{base}/{SERVER_SUFFIX}"),
            to_client: format!("{base}/{CLIENT_SUFFIX}"),
        }
    }

    /// Topic name for the given logical channel.
    #[must_use]
    pub fn name(&self, kind: TopicKind) -> &str {
        match kind {
            TopicKind::Call => &self.call,
            TopicKind::ToServer => &self.to_server,
            TopicKind::ToClient => &self.to_client,
        }
    }

    /// Which logical channel a delivered topic name belongs to, if any of ours.
    #[must_use]
    pub fn kind_of(&self, topic: &str) -> Option<TopicKind> {
        [TopicKind::Call, TopicKind::ToServer, TopicKind::ToClient]
            .into_iter()
            .find(|kind| self.name(*kind) == topic)
    }

    /// Shared call-intent topic.
    #[must_use]
    pub fn call(&self) -> &str {
        &self.call
    }

    /// Caller to callee topic.
    #[must_use]
    pub fn to_server(&self) -> &str {
        &self.to_server
    }

    /// Callee to caller topic.
    #[must_use]
    pub fn to_client(&self) -> &str {
        &self.to_client
    }
}
