/*!
Signaling messages exchanged by the two peers of a call and their JSON wire format.

Each bus message carries exactly one of:

```text
{"type":"call"}
{"type":"offer","sdp":"..."}
{"type":"answer","sdp":"..."}
{"type":"candidate","candidate":"...","sdpMid":"0","sdpMLineIndex":0}
{"type":"hangup"}
```

A `candidate` whose `candidate` field is `null` (or absent) marks the end of candidates.
*/

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

const KNOWN_TAGS: [&str; 5] = ["call", "offer", "answer", "candidate", "hangup"];

/// Proposed ICE Candidate of one peer passed to the other one without modifications.
#[derive(Debug, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct IceCandidate {
    /// Candidate line, as produced by the session engine.
    pub candidate: String,
    /// Media stream identification tag the candidate belongs to.
    pub sdp_mid: Option<String>,
    /// Index of the media description the candidate belongs to.
    pub sdp_m_line_index: Option<u16>,
}

impl IceCandidate {
    /// An empty candidate line is treated the same as an explicit end of candidates.
    #[must_use]
    pub fn is_end_of_candidates(&self) -> bool {
        self.candidate.is_empty()
    }
}

/// Messages peers publish to each other over the bus.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum SignalMessage {
    /// Announces that a peer wants to take part in a call.
    Call,
    /// `SDP` Offer created by the caller.
    Offer {
        /// Session description
        sdp: String,
    },
    /// `SDP` Answer created by the callee.
    Answer {
        /// Session description
        sdp: String,
    },
    /// Trickled ICE candidate.
    Candidate(IceCandidate),
    /// No further candidates will follow.
    EndOfCandidates,
    /// Either side ends the call.
    Hangup,
    /// Well formed message with a tag this version does not know about.
    Unknown {
        /// Value of the `type` field
        tag: String,
        /// The payload as it was received
        raw: String,
    },
}

impl SignalMessage {
    /// Value of the `type` field this message is sent with.
    #[must_use]
    pub fn tag(&self) -> &str {
        match self {
            Self::Call => "call",
            Self::Offer { .. } => "offer",
            Self::Answer { .. } => "answer",
            Self::Candidate(_) | Self::EndOfCandidates => "candidate",
            Self::Hangup => "hangup",
            Self::Unknown { tag, .. } => tag,
        }
    }
}

/// Reasons a received payload could not be turned into a [`SignalMessage`].
#[derive(Debug, Error)]
pub enum DecodeError {
    /// Payload is not JSON at all.
    #[error("payload is not valid JSON: {0}")]
    Malformed(#[source] serde_json::Error),
    /// Payload is JSON but not an object.
    #[error("payload is not a JSON object")]
    NotAnObject,
    /// Object has no string `type` field.
    #[error("payload has no `type` tag")]
    MissingTag,
    /// Known tag, but required fields are missing or have the wrong type.
    #[error("invalid `{tag}` message: {source}")]
    InvalidFields {
        /// Value of the `type` field
        tag: String,
        /// Underlying deserialization failure
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum WireMessage {
    Call,
    Offer {
        sdp: String,
    },
    Answer {
        sdp: String,
    },
    Candidate {
        #[serde(default)]
        candidate: Option<String>,
        #[serde(rename = "sdpMid", default)]
        sdp_mid: Option<String>,
        #[serde(rename = "sdpMLineIndex", default)]
        sdp_m_line_index: Option<u16>,
    },
    Hangup,
}

impl From<WireMessage> for SignalMessage {
    fn from(wire: WireMessage) -> Self {
        match wire {
            WireMessage::Call => Self::Call,
            WireMessage::Offer { sdp } => Self::Offer { sdp },
            WireMessage::Answer { sdp } => Self::Answer { sdp },
            WireMessage::Candidate {
                candidate: Some(candidate),
                sdp_mid,
                sdp_m_line_index,
            } => Self::Candidate(IceCandidate {
                candidate,
                sdp_mid,
                sdp_m_line_index,
            }),
            WireMessage::Candidate { candidate: None, .. } => Self::EndOfCandidates,
            WireMessage::Hangup => Self::Hangup,
        }
    }
}

/// Serialize a message into the bus payload.
///
/// [`SignalMessage::Unknown`] is forwarded as the raw payload it was received with.
#[must_use]
pub fn encode(message: &SignalMessage) -> Vec<u8> {
    let wire = match message {
        SignalMessage::Call => WireMessage::Call,
        SignalMessage::Offer { sdp } => WireMessage::Offer { sdp: sdp.clone() },
        SignalMessage::Answer { sdp } => WireMessage::Answer { sdp: sdp.clone() },
        SignalMessage::Candidate(candidate) => WireMessage::Candidate {
            candidate: Some(candidate.candidate.clone()),
            sdp_mid: candidate.sdp_mid.clone(),
            sdp_m_line_index: candidate.sdp_m_line_index,
        },
        SignalMessage::EndOfCandidates => WireMessage::Candidate {
            candidate: None,
            sdp_mid: None,
            sdp_m_line_index: None,
        },
        SignalMessage::Hangup => WireMessage::Hangup,
        SignalMessage::Unknown { raw, .. } => return raw.clone().into_bytes(),
    };
    // only strings and integers, serde_json never fails on these
    serde_json::to_vec(&wire).unwrap_or_default()
}

/// Parse a bus payload.
///
/// # Errors
/// Fails on anything that is not a JSON object with a string `type`, and on known tags
/// whose required fields are missing. Unknown tags are not an error.
pub fn decode(payload: &[u8]) -> Result<SignalMessage, DecodeError> {
    let value: Value = serde_json::from_slice(payload).map_err(DecodeError::Malformed)?;
    let tag = match value.as_object().map(|object| object.get("type")) {
        None => return Err(DecodeError::NotAnObject),
        Some(Some(Value::String(tag))) => tag.clone(),
        Some(_) => return Err(DecodeError::MissingTag),
    };

    if !KNOWN_TAGS.contains(&tag.as_str()) {
        return Ok(SignalMessage::Unknown {
            tag,
            raw: String::from_utf8_lossy(payload).into_owned(),
        });
    }

    serde_json::from_value::<WireMessage>(value)
        .map(SignalMessage::from)
        .map_err(|source| DecodeError::InvalidFields { tag, source })
}
