/*!
Contract of the media-negotiation engine the call is driven against.

The crate never touches SDP, ICE or media itself. Whatever produces descriptions and candidates,
a browser binding, `webrtc-rs` or a scripted fake in tests, implements [`SessionEngine`] and reports
asynchronous happenings on a connection through the [`ConnectionEvents`] it is handed when the
connection is created.
*/

use async_trait::async_trait;
use log::debug;
use tokio::sync::mpsc;
use webrtc_pubsub_protocol::IceCandidate;

use crate::call::Inbound;
use crate::error::{MediaError, NegotiationError};

/// Which half of the offer/answer exchange a description is.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum SdpKind {
    Offer,
    Answer,
}

/// Session description handed to or produced by the engine.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct SessionDescription {
    pub kind: SdpKind,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Answer,
            sdp: sdp.into(),
        }
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum TrackKind {
    Audio,
    Video,
}

/// Media track the remote peer started sending.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct RemoteTrack {
    pub id: String,
    pub kind: TrackKind,
}

/// Something the engine reports about a connection outside of any call into it.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum EngineEvent {
    /// Locally gathered candidate, `None` once gathering is complete.
    IceCandidate(Option<IceCandidate>),
    Track(RemoteTrack),
    NegotiationNeeded,
}

/// Callback registration for a single connection.
///
/// Events are tagged with the connection they were registered for, so anything a closed
/// connection still reports after the call was torn down is discarded.
#[derive(Debug, Clone)]
pub struct ConnectionEvents {
    generation: u64,
    sender: mpsc::UnboundedSender<Inbound>,
}

impl ConnectionEvents {
    pub(crate) const fn new(generation: u64, sender: mpsc::UnboundedSender<Inbound>) -> Self {
        Self { generation, sender }
    }

    /// Equivalent of `onicecandidate`, pass `None` when gathering finished.
    pub fn ice_candidate(&self, candidate: Option<IceCandidate>) {
        self.emit(EngineEvent::IceCandidate(candidate));
    }

    /// Equivalent of `ontrack`.
    pub fn track(&self, track: RemoteTrack) {
        self.emit(EngineEvent::Track(track));
    }

    /// Equivalent of `onnegotiationneeded`.
    pub fn negotiation_needed(&self) {
        self.emit(EngineEvent::NegotiationNeeded);
    }

    fn emit(&self, event: EngineEvent) {
        let inbound = Inbound::Engine {
            generation: self.generation,
            event,
        };
        if self.sender.send(inbound).is_err() {
            debug!("call agent is gone, dropping engine event");
        }
    }
}

/// Offer/answer generation, ICE and media capture.
///
/// Handles are owned by the engine; the call keeps clones of them and gives them back through
/// [`SessionEngine::close`] and [`SessionEngine::release_media`] when the call ends.
/// Operations on a connection that was already closed should fail rather than panic,
/// a hang up may close a connection while an operation on it is still running.
#[async_trait]
pub trait SessionEngine: Send + Sync + 'static {
    /// Peer connection handle.
    type Connection: Clone + Send + Sync + 'static;
    /// Local capture handle.
    type Media: Clone + Send + Sync + 'static;

    async fn acquire_media(&self) -> Result<Self::Media, MediaError>;

    async fn release_media(&self, media: Self::Media);

    /// Create a peer connection sending `media` and reporting on `events`.
    async fn create_connection(
        &self,
        media: Option<Self::Media>,
        events: ConnectionEvents,
    ) -> Result<Self::Connection, NegotiationError>;

    async fn create_offer(&self, connection: &Self::Connection) -> Result<String, NegotiationError>;

    async fn create_answer(&self, connection: &Self::Connection)
        -> Result<String, NegotiationError>;

    async fn set_local_description(
        &self,
        connection: &Self::Connection,
        description: SessionDescription,
    ) -> Result<(), NegotiationError>;

    async fn set_remote_description(
        &self,
        connection: &Self::Connection,
        description: SessionDescription,
    ) -> Result<(), NegotiationError>;

    /// Apply a remote candidate, `None` signals the end of remote candidates.
    async fn add_ice_candidate(
        &self,
        connection: &Self::Connection,
        candidate: Option<IceCandidate>,
    ) -> Result<(), NegotiationError>;

    async fn close(&self, connection: Self::Connection);
}
