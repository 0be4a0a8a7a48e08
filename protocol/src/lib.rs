/*!
Helper crate that declares the types shared between [webrtc-pubsub](../webrtc_pubsub/index.html)
and [webrtc-pubsub-relay](../webrtc_pubsub_relay/index.html):
the topic scheme derived from a [`SessionId`], the signaling messages peers exchange
and the frames spoken between a bus client and the relay.
*/

#![warn(missing_docs)]

use std::convert::Infallible;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub mod bus;
pub mod signal;
pub mod topics;

pub use signal::{decode, encode, DecodeError, IceCandidate, SignalMessage};
pub use topics::{TopicKind, Topics};

/// Unique identifier of a call session, shared out-of-band by both participants.
/// Every topic the participants talk on is derived from it.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize, Hash)]
pub struct SessionId(String);

impl SessionId {
    /// Wrap String into a `SessionId` `struct`
    #[must_use]
    pub const fn new(inner: String) -> Self {
        Self(inner)
    }

    /// Return reference to the underling string
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Acquire the underlying type
    #[must_use]
    #[allow(clippy::missing_const_for_fn)]
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl FromStr for SessionId {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.to_owned()))
    }
}

impl Display for SessionId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}
