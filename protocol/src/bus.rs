/*!
Frames exchanged between a bus client and the relay over a `WebSocket`.

Signaling payloads travel inside `publish`/`deliver` frames untouched, the relay never looks into them.
*/

use serde::{Deserialize, Serialize};

/// `Enum` of everything a bus client and the relay say to each other, one frame per text message.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum BusFrame {
    /// Client wants deliveries for `topic`.
    Subscribe {
        /// Topic name
        topic: String,
    },
    /// Client no longer wants deliveries for `topic`.
    Unsubscribe {
        /// Topic name
        topic: String,
    },
    /// Client publishes `payload` to every subscriber of `topic`.
    Publish {
        /// Topic name
        topic: String,
        /// Opaque message body
        payload: String,
    },
    /// Relay hands a published `payload` to a subscriber.
    Deliver {
        /// Topic name
        topic: String,
        /// Opaque message body
        payload: String,
    },
}
