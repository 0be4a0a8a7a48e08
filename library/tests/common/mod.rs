#![allow(dead_code)]

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use log::LevelFilter;
use simplelog::{Config, TestLogger};
use tokio::sync::{mpsc, Semaphore};
use tokio::time::{sleep, timeout, Instant};
use webrtc_pubsub::bus::{ClientId, LocalBroker};
use webrtc_pubsub::call::{CallAgent, CallEvent, CallState, Mailbox, SessionSnapshot};
use webrtc_pubsub::engine::{ConnectionEvents, RemoteTrack, SessionDescription, SessionEngine};
use webrtc_pubsub::{IceCandidate, MediaError, NegotiationError, SessionId, SignalMessage};

pub const OFFER_SDP: &str = "X";
pub const ANSWER_SDP: &str = "Y";
const WAIT_LIMIT: Duration = Duration::from_secs(5);

pub fn init_logger() {
    let _ = TestLogger::init(LevelFilter::Debug, Config::default());
}

pub fn host_candidate() -> IceCandidate {
    IceCandidate {
        candidate: "candidate:1 1 udp 2122260223 192.168.1.2 54321 typ host".to_owned(),
        sdp_mid: Some("0".to_owned()),
        sdp_m_line_index: Some(0),
    }
}

#[derive(Debug, Default)]
struct FakeState {
    calls: Vec<String>,
    next_id: u32,
    open_connections: BTreeSet<u32>,
    held_media: BTreeSet<u32>,
    events: HashMap<u32, ConnectionEvents>,
    connections_created: usize,
}

/// Scripted engine: offers are always `X`, answers `Y`, every call into it is recorded.
#[derive(Debug, Clone)]
pub struct FakeEngine {
    state: Arc<Mutex<FakeState>>,
    media_gate: Option<Arc<Semaphore>>,
    deny_media: bool,
    failing: Option<&'static str>,
    local_candidates: Vec<IceCandidate>,
}

impl FakeEngine {
    pub fn new() -> Self {
        Self {
            state: Arc::default(),
            media_gate: None,
            deny_media: false,
            failing: None,
            local_candidates: Vec::new(),
        }
    }

    /// Media acquisition blocks until [`FakeEngine::grant_media`].
    pub fn gated() -> Self {
        Self {
            media_gate: Some(Arc::new(Semaphore::new(0))),
            ..Self::new()
        }
    }

    pub fn denying_media() -> Self {
        Self {
            deny_media: true,
            ..Self::new()
        }
    }

    /// `operation` always fails.
    pub fn failing(operation: &'static str) -> Self {
        Self {
            failing: Some(operation),
            ..Self::new()
        }
    }

    /// Reports `candidates` and the end of gathering as soon as a connection is created.
    pub fn gathering(candidates: Vec<IceCandidate>) -> Self {
        Self {
            local_candidates: candidates,
            ..Self::new()
        }
    }

    pub fn grant_media(&self) {
        if let Some(gate) = &self.media_gate {
            gate.add_permits(1);
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    pub fn open_connections(&self) -> usize {
        self.lock().open_connections.len()
    }

    pub fn held_media(&self) -> usize {
        self.lock().held_media.len()
    }

    pub fn connections_created(&self) -> usize {
        self.lock().connections_created
    }

    /// Report a remote track on the most recent connection.
    pub fn emit_track(&self, track: RemoteTrack) {
        let state = self.lock();
        let latest = state.events.keys().max().and_then(|id| state.events.get(id));
        if let Some(events) = latest {
            events.track(track);
        }
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    fn record(&self, call: String) {
        self.lock().calls.push(call);
    }

    fn check(&self, operation: &'static str) -> Result<(), NegotiationError> {
        match self.failing {
            Some(failing) if failing == operation => {
                Err(NegotiationError::new(operation, "scripted failure"))
            }
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl SessionEngine for FakeEngine {
    type Connection = u32;
    type Media = u32;

    async fn acquire_media(&self) -> Result<u32, MediaError> {
        self.record("acquire_media".to_owned());
        if let Some(gate) = &self.media_gate {
            gate.acquire().await.unwrap().forget();
        }
        if self.deny_media {
            return Err(MediaError::Denied);
        }
        let mut state = self.lock();
        state.next_id += 1;
        let id = state.next_id;
        state.held_media.insert(id);
        Ok(id)
    }

    async fn release_media(&self, media: u32) {
        self.record(format!("release_media {media}"));
        self.lock().held_media.remove(&media);
    }

    async fn create_connection(
        &self,
        media: Option<u32>,
        events: ConnectionEvents,
    ) -> Result<u32, NegotiationError> {
        self.record(format!("create_connection {media:?}"));
        self.check("create_connection")?;
        let id = {
            let mut state = self.lock();
            state.next_id += 1;
            let id = state.next_id;
            state.open_connections.insert(id);
            state.connections_created += 1;
            state.events.insert(id, events.clone());
            id
        };
        if !self.local_candidates.is_empty() {
            for candidate in &self.local_candidates {
                events.ice_candidate(Some(candidate.clone()));
            }
            events.ice_candidate(None);
        }
        Ok(id)
    }

    async fn create_offer(&self, connection: &u32) -> Result<String, NegotiationError> {
        self.record(format!("create_offer {connection}"));
        self.check("create_offer")?;
        Ok(OFFER_SDP.to_owned())
    }

    async fn create_answer(&self, connection: &u32) -> Result<String, NegotiationError> {
        self.record(format!("create_answer {connection}"));
        self.check("create_answer")?;
        Ok(ANSWER_SDP.to_owned())
    }

    async fn set_local_description(
        &self,
        connection: &u32,
        description: SessionDescription,
    ) -> Result<(), NegotiationError> {
        self.record(format!(
            "set_local_description {connection} {:?} {}",
            description.kind, description.sdp
        ));
        self.check("set_local_description")
    }

    async fn set_remote_description(
        &self,
        connection: &u32,
        description: SessionDescription,
    ) -> Result<(), NegotiationError> {
        self.record(format!(
            "set_remote_description {connection} {:?} {}",
            description.kind, description.sdp
        ));
        self.check("set_remote_description")
    }

    async fn add_ice_candidate(
        &self,
        connection: &u32,
        candidate: Option<IceCandidate>,
    ) -> Result<(), NegotiationError> {
        let candidate = candidate.map_or_else(|| "end".to_owned(), |c| c.candidate);
        self.record(format!("add_ice_candidate {connection} {candidate}"));
        self.check("add_ice_candidate")
    }

    async fn close(&self, connection: u32) {
        self.record(format!("close {connection}"));
        let mut state = self.lock();
        state.open_connections.remove(&connection);
        state.events.remove(&connection);
    }
}

/// One participant on a [`LocalBroker`], with everything its agent reported.
pub struct Peer {
    pub agent: CallAgent,
    pub engine: FakeEngine,
    pub bus_id: ClientId,
    events: mpsc::UnboundedReceiver<CallEvent>,
    seen: Vec<CallEvent>,
}

impl Peer {
    pub fn join(broker: &LocalBroker, session_id: &str, engine: FakeEngine) -> Self {
        let mailbox = Mailbox::new();
        let bus = broker.connect(mailbox.bus_sink()).unwrap();
        let bus_id = bus.id();
        let (sender, events) = mpsc::unbounded_channel();
        let agent = CallAgent::start(
            SessionId::from(session_id),
            engine.clone(),
            bus,
            mailbox,
            move |event| {
                let _ = sender.send(event);
            },
        );
        Self {
            agent,
            engine,
            bus_id,
            events,
            seen: Vec::new(),
        }
    }

    pub async fn snapshot(&self) -> SessionSnapshot {
        self.agent.snapshot().await.unwrap()
    }

    /// Events reported so far. Everything queued before this call has been handled.
    pub async fn events(&mut self) -> &[CallEvent] {
        self.agent.snapshot().await.unwrap();
        while let Ok(event) = self.events.try_recv() {
            self.seen.push(event);
        }
        &self.seen
    }

    pub async fn wait_for_state(&self, state: CallState) -> SessionSnapshot {
        self.wait_until(|snapshot| snapshot.state == state).await
    }

    pub async fn wait_until(&self, condition: impl Fn(&SessionSnapshot) -> bool) -> SessionSnapshot {
        let deadline = Instant::now() + WAIT_LIMIT;
        loop {
            let snapshot = self.snapshot().await;
            if condition(&snapshot) {
                return snapshot;
            }
            assert!(Instant::now() < deadline, "gave up waiting, last snapshot: {snapshot:?}");
            sleep(Duration::from_millis(10)).await;
        }
    }
}

/// Wait until `condition` holds, polling.
pub async fn eventually(condition: impl Fn() -> bool) {
    timeout(WAIT_LIMIT, async {
        while !condition() {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition never became true");
}

/// Everything published on `topic` so far, decoded.
pub fn published_on(
    tap: &mut mpsc::UnboundedReceiver<(String, Vec<u8>)>,
    log: &mut Vec<(String, Vec<u8>)>,
    topic: &str,
) -> Vec<SignalMessage> {
    while let Ok(published) = tap.try_recv() {
        log.push(published);
    }
    log.iter()
        .filter(|(published, _)| published == topic)
        .map(|(_, payload)| webrtc_pubsub_protocol::decode(payload).unwrap())
        .collect()
}
