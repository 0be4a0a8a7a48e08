use std::collections::VecDeque;
use std::future::Future;
use std::mem;
use std::sync::Arc;

use log::{debug, error, info, warn};
use tokio::sync::mpsc;
use webrtc_pubsub_protocol::{IceCandidate, SignalMessage, TopicKind};

use crate::bus::{Bus, BusEvent};
use crate::call::signaling::Signaling;
use crate::call::state::{CallSession, CallState, Role, SessionSnapshot};
use crate::call::{CallEvent, Inbound, Intent};
use crate::engine::{ConnectionEvents, EngineEvent, SessionDescription, SessionEngine};
use crate::error::{Error, MediaError, NegotiationError};

pub(crate) type Observer = Box<dyn FnMut(CallEvent) + Send>;

/// Event that may start a transition.
#[derive(Debug)]
enum Trigger {
    Intent(Intent),
    Remote(SignalMessage),
}

impl Trigger {
    const fn is_hangup(&self) -> bool {
        matches!(
            self,
            Self::Intent(Intent::HangUp) | Self::Remote(SignalMessage::Hangup)
        )
    }
}

pub(crate) struct Connected<E: SessionEngine> {
    connection: E::Connection,
    offer: Option<String>,
}

pub(crate) struct Answered<E: SessionEngine> {
    connection: E::Connection,
    created: bool,
    answer: String,
}

/// Result of a suspended engine operation.
pub(crate) enum Outcome<E: SessionEngine> {
    Media(Result<E::Media, MediaError>),
    Connected(Result<Connected<E>, NegotiationError>),
    Answered(Result<Answered<E>, NegotiationError>),
    AnswerApplied(Result<(), NegotiationError>),
    CandidatesApplied(Result<(), NegotiationError>),
}

/// Outcome tagged with the epoch of the call that started the job.
pub(crate) struct Completion<E: SessionEngine> {
    epoch: u64,
    outcome: Outcome<E>,
}

/// The call state machine. Only ever driven from the agent task, one event at a time.
///
/// Engine operations that suspend run as spawned jobs and come back as [`Completion`]s.
/// While one is outstanding further triggers wait in the backlog, except a hang up which
/// tears the call down at once. Every teardown starts a new epoch, so results and engine
/// events belonging to an earlier call are recognized and dropped.
pub(crate) struct CallMachine<E: SessionEngine, B: Bus> {
    engine: Arc<E>,
    signaling: Signaling<B>,
    session: CallSession<E>,
    state: CallState,
    epoch: u64,
    pending: Option<&'static str>,
    backlog: VecDeque<Trigger>,
    /// Hangups we published on the `call` topic whose echo hasn't come back yet.
    unechoed_hangups: u32,
    inbound: mpsc::UnboundedSender<Inbound>,
    completions: mpsc::UnboundedSender<Completion<E>>,
    observer: Observer,
}

impl<E: SessionEngine, B: Bus> CallMachine<E, B> {
    pub fn new(
        engine: Arc<E>,
        signaling: Signaling<B>,
        inbound: mpsc::UnboundedSender<Inbound>,
        completions: mpsc::UnboundedSender<Completion<E>>,
        observer: Observer,
    ) -> Self {
        Self {
            engine,
            signaling,
            session: CallSession::default(),
            state: CallState::Idle,
            epoch: 0,
            pending: None,
            backlog: VecDeque::new(),
            unechoed_hangups: 0,
            inbound,
            completions,
            observer,
        }
    }

    /// Start listening for call announcements.
    pub fn open(&mut self) {
        info!("joining session {}", self.signaling.session_id());
        self.subscribe(TopicKind::Call);
    }

    pub async fn handle(&mut self, inbound: Inbound) {
        match inbound {
            Inbound::Intent(intent) => self.trigger(Trigger::Intent(intent)).await,
            Inbound::Bus(BusEvent::Message { topic, payload }) => {
                let Some((kind, message)) = self.signaling.receive(&topic, &payload) else {
                    return;
                };
                if kind == TopicKind::Call
                    && matches!(message, SignalMessage::Hangup)
                    && self.unechoed_hangups > 0
                {
                    self.unechoed_hangups -= 1;
                    debug!("ignoring the echo of our own hang up");
                    return;
                }
                self.trigger(Trigger::Remote(message)).await;
            }
            Inbound::Bus(BusEvent::Disconnected) => warn!("bus connection lost"),
            Inbound::Bus(BusEvent::Reconnected) => {
                // echoes due while we were away are gone
                self.unechoed_hangups = 0;
                info!("bus reconnected, restoring {} subscriptions", self.session.subscribed.len());
                if let Err(err) = self.signaling.resubscribe(&self.session.subscribed) {
                    self.report(err.into());
                }
            }
            Inbound::Engine { generation, event } => self.on_engine_event(generation, event),
            Inbound::Snapshot(reply) => {
                if reply.send(self.snapshot()).is_err() {
                    debug!("snapshot requester went away");
                }
            }
            Inbound::Shutdown(_) => error!("shutdown must be handled by the agent loop"),
        }
    }

    pub async fn complete(&mut self, completion: Completion<E>) {
        let Completion { epoch, outcome } = completion;
        if epoch != self.epoch {
            self.discard(outcome).await;
            return;
        }
        if let Some(job) = self.pending.take() {
            debug!("{} finished", job);
        }

        match outcome {
            Outcome::Media(result) => self.on_media(result).await,
            Outcome::Connected(result) => self.on_connected(result).await,
            Outcome::Answered(result) => self.on_answered(result).await,
            Outcome::AnswerApplied(result) => self.on_answer_applied(result).await,
            Outcome::CandidatesApplied(Ok(())) => {}
            Outcome::CandidatesApplied(Err(err)) => self.fail_negotiation(err).await,
        }

        while self.pending.is_none() {
            let Some(trigger) = self.backlog.pop_front() else {
                break;
            };
            self.dispatch(trigger).await;
        }
    }

    /// Hang up whatever is in progress before the agent stops.
    pub async fn shutdown(&mut self) {
        self.hang_up().await;
        if let Err(err) = self.signaling.unsubscribe(TopicKind::Call) {
            debug!("failed to unsubscribe on shutdown: {}", err);
        }
        self.session.subscribed.clear();
        info!("left session {}", self.signaling.session_id());
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            state: self.state,
            role: self.session.role,
            publish_topic: self
                .session
                .publish_topic
                .map(|kind| self.signaling.topic(kind).to_owned()),
            subscribed_topics: self
                .session
                .subscribed
                .iter()
                .map(|kind| self.signaling.topic(*kind).to_owned())
                .collect(),
            has_connection: self.session.connection.is_some(),
            has_media: self.session.media.is_some(),
            peer_waiting: self.session.peer_waiting,
        }
    }

    async fn trigger(&mut self, trigger: Trigger) {
        if let Some(job) = self.pending {
            if !trigger.is_hangup() {
                debug!("{} in progress, deferring {:?}", job, trigger);
                self.backlog.push_back(trigger);
                return;
            }
            debug!("hang up preempts {}", job);
        }
        self.dispatch(trigger).await;
    }

    async fn dispatch(&mut self, trigger: Trigger) {
        match trigger {
            Trigger::Intent(Intent::StartCall) => self.resolve(Role::Caller),
            Trigger::Intent(Intent::AnswerCall) => self.resolve(Role::Callee),
            Trigger::Intent(Intent::HangUp) => self.hang_up().await,
            Trigger::Remote(SignalMessage::Call) => self.on_call(),
            Trigger::Remote(SignalMessage::Offer { sdp }) => self.on_offer(sdp),
            Trigger::Remote(SignalMessage::Answer { sdp }) => self.on_answer(sdp),
            Trigger::Remote(SignalMessage::Candidate(candidate)) => {
                self.on_remote_candidate(Some(candidate));
            }
            Trigger::Remote(SignalMessage::EndOfCandidates) => self.on_remote_candidate(None),
            Trigger::Remote(SignalMessage::Hangup) => self.on_remote_hangup().await,
            Trigger::Remote(SignalMessage::Unknown { tag, raw }) => {
                warn!("ignoring signaling message of unknown type {}: {}", tag, raw);
            }
        }
    }

    /// Local intent to call or answer: take the role, listen on the matching topic, get media.
    fn resolve(&mut self, role: Role) {
        if self.state != CallState::Idle {
            warn!("ignoring request to act as {:?}, call is {:?}", role, self.state);
            return;
        }
        let (Some(publish), Some(listen)) = (role.publish_topic(), role.listen_topic()) else {
            return;
        };

        info!("acting as {:?} in session {}", role, self.signaling.session_id());
        self.session.role = role;
        self.session.publish_topic = Some(publish);
        self.session.peer_waiting = false;
        self.subscribe(listen);
        self.set_state(CallState::AwaitingLocalMedia);

        let engine = Arc::clone(&self.engine);
        self.spawn_job("local media acquisition", async move {
            Outcome::Media(engine.acquire_media().await)
        });
    }

    async fn on_media(&mut self, result: Result<E::Media, MediaError>) {
        let media = match result {
            Ok(media) => media,
            Err(err) => {
                self.teardown().await;
                self.report(err.into());
                return;
            }
        };
        self.session.media = Some(media.clone());

        let engine = Arc::clone(&self.engine);
        let events = ConnectionEvents::new(self.epoch, self.inbound.clone());
        let make_offer = self.session.role == Role::Caller;
        self.spawn_job("peer connection setup", async move {
            Outcome::Connected(open_connection(engine, media, events, make_offer).await)
        });
    }

    async fn on_connected(&mut self, result: Result<Connected<E>, NegotiationError>) {
        let Connected { connection, offer } = match result {
            Ok(connected) => connected,
            Err(err) => return self.fail_negotiation(err).await,
        };
        self.session.connection = Some(connection);

        match offer {
            Some(sdp) => self.send_local_description(SignalMessage::Offer { sdp }),
            // answering side announces it is ready for an offer
            None => self.publish_on(TopicKind::Call, &SignalMessage::Call),
        }
        self.set_state(CallState::Negotiating(self.session.role));
    }

    fn on_call(&mut self) {
        if self.session.role != Role::Unresolved {
            debug!("already acting as {:?}, ignoring call announcement", self.session.role);
            return;
        }
        if !self.session.peer_waiting {
            info!("peer is waiting in session {}", self.signaling.session_id());
            self.session.peer_waiting = true;
            self.emit(CallEvent::PeerWaiting);
        }
    }

    fn on_offer(&mut self, sdp: String) {
        if self.state != CallState::Negotiating(Role::Callee) {
            return self.violation(format!("offer received while {:?}", self.state));
        }

        let engine = Arc::clone(&self.engine);
        let existing = self.session.connection.clone();
        let media = self.session.media.clone();
        let events = ConnectionEvents::new(self.epoch, self.inbound.clone());
        self.spawn_job("answer creation", async move {
            Outcome::Answered(answer_offer(engine, existing, media, events, sdp).await)
        });
    }

    async fn on_answered(&mut self, result: Result<Answered<E>, NegotiationError>) {
        let Answered {
            connection,
            created,
            answer,
        } = match result {
            Ok(answered) => answered,
            Err(err) => return self.fail_negotiation(err).await,
        };
        if created {
            self.session.connection = Some(connection);
        }
        self.session.remote_description_set = true;
        self.send_local_description(SignalMessage::Answer { sdp: answer });
        self.set_state(CallState::InCall(Role::Callee));
        self.flush_remote_candidates();
    }

    fn on_answer(&mut self, sdp: String) {
        if self.state != CallState::Negotiating(Role::Caller) {
            return self.violation(format!("answer received while {:?}", self.state));
        }
        if self.session.media.is_none() {
            return self.violation("answer received without local media".to_owned());
        }
        let Some(connection) = self.session.connection.clone() else {
            return self.violation("answer received without a peer connection".to_owned());
        };

        let engine = Arc::clone(&self.engine);
        self.spawn_job("remote answer", async move {
            let description = SessionDescription::answer(sdp);
            Outcome::AnswerApplied(engine.set_remote_description(&connection, description).await)
        });
    }

    async fn on_answer_applied(&mut self, result: Result<(), NegotiationError>) {
        if let Err(err) = result {
            return self.fail_negotiation(err).await;
        }
        self.session.remote_description_set = true;
        self.set_state(CallState::InCall(Role::Caller));
        self.flush_remote_candidates();
    }

    fn on_remote_candidate(&mut self, candidate: Option<IceCandidate>) {
        let candidate = candidate.filter(|candidate| !candidate.is_end_of_candidates());
        let connection = self
            .session
            .connection
            .clone()
            .filter(|_| self.state.has_session());
        let Some(connection) = connection else {
            return self.violation("candidate received without a peer connection".to_owned());
        };
        if !self.session.remote_description_set {
            debug!("remote description not applied yet, queueing candidate");
            self.session.remote_candidates.push(candidate);
            return;
        }
        self.apply_candidates(connection, vec![candidate]);
    }

    fn flush_remote_candidates(&mut self) {
        let candidates = mem::take(&mut self.session.remote_candidates);
        if candidates.is_empty() {
            return;
        }
        if let Some(connection) = self.session.connection.clone() {
            debug!("applying {} queued remote candidates", candidates.len());
            self.apply_candidates(connection, candidates);
        }
    }

    fn apply_candidates(&mut self, connection: E::Connection, candidates: Vec<Option<IceCandidate>>) {
        let engine = Arc::clone(&self.engine);
        self.spawn_job("candidate application", async move {
            let mut result = Ok(());
            for candidate in candidates {
                result = engine.add_ice_candidate(&connection, candidate).await;
                if result.is_err() {
                    break;
                }
            }
            Outcome::CandidatesApplied(result)
        });
    }

    async fn on_remote_hangup(&mut self) {
        if self.state == CallState::Idle {
            if self.session.peer_waiting {
                debug!("waiting peer left");
                self.session.peer_waiting = false;
            }
            return;
        }
        info!("peer hung up");
        self.teardown().await;
    }

    async fn hang_up(&mut self) {
        if self.state == CallState::Idle {
            debug!("nothing to hang up");
            return;
        }
        self.publish_hangup();
        self.teardown().await;
    }

    async fn fail_negotiation(&mut self, err: NegotiationError) {
        if self.state != CallState::Idle {
            self.publish_hangup();
            self.teardown().await;
        }
        self.report(err.into());
    }

    /// Release everything the call holds and go back to listening for announcements only.
    async fn teardown(&mut self) {
        self.epoch = self.epoch.wrapping_add(1);
        if let Some(job) = self.pending.take() {
            debug!("abandoning {}", job);
        }
        if !self.backlog.is_empty() {
            debug!("dropping {} deferred events", self.backlog.len());
            self.backlog.clear();
        }

        let session = mem::take(&mut self.session);
        if let Some(connection) = session.connection {
            self.engine.close(connection).await;
        }
        if let Some(media) = session.media {
            self.engine.release_media(media).await;
        }
        for kind in session.subscribed {
            if kind == TopicKind::Call {
                self.session.subscribed.insert(kind);
            } else if let Err(err) = self.signaling.unsubscribe(kind) {
                warn!("failed to unsubscribe from {}: {}", self.signaling.topic(kind), err);
            }
        }
        self.set_state(CallState::Idle);
    }

    async fn discard(&mut self, outcome: Outcome<E>) {
        debug!("discarding result of an abandoned job");
        match outcome {
            Outcome::Media(Ok(media)) => self.engine.release_media(media).await,
            Outcome::Connected(Ok(connected)) => self.engine.close(connected.connection).await,
            Outcome::Answered(Ok(answered)) if answered.created => {
                self.engine.close(answered.connection).await;
            }
            _ => {}
        }
    }

    fn on_engine_event(&mut self, generation: u64, event: EngineEvent) {
        if generation != self.epoch {
            debug!("dropping event of a closed connection: {:?}", event);
            return;
        }
        match event {
            EngineEvent::IceCandidate(candidate) => {
                if self.session.local_description_sent {
                    self.publish_local_candidate(candidate);
                } else {
                    self.session.local_candidates.push(candidate);
                }
            }
            EngineEvent::Track(track) => {
                info!("remote {:?} track {} arrived", track.kind, track.id);
                self.emit(CallEvent::RemoteTrack(track));
            }
            EngineEvent::NegotiationNeeded => debug!("engine reports negotiation needed"),
        }
    }

    fn send_local_description(&mut self, message: SignalMessage) {
        self.publish_signal(&message);
        self.session.local_description_sent = true;
        for candidate in mem::take(&mut self.session.local_candidates) {
            self.publish_local_candidate(candidate);
        }
    }

    fn publish_local_candidate(&mut self, candidate: Option<IceCandidate>) {
        let message = candidate.map_or(SignalMessage::EndOfCandidates, SignalMessage::Candidate);
        self.publish_signal(&message);
    }

    fn publish_signal(&mut self, message: &SignalMessage) {
        match self.session.publish_topic {
            Some(kind) => self.publish_on(kind, message),
            None => warn!("no publish topic, dropping {}", message.tag()),
        }
    }

    /// Tell the peer the call is over. The bus hands the message back to us as well.
    fn publish_hangup(&mut self) {
        match self.signaling.publish(TopicKind::Call, &SignalMessage::Hangup) {
            Ok(()) => self.unechoed_hangups += 1,
            Err(err) => self.report(err.into()),
        }
    }

    fn publish_on(&mut self, kind: TopicKind, message: &SignalMessage) {
        if let Err(err) = self.signaling.publish(kind, message) {
            self.report(err.into());
        }
    }

    fn subscribe(&mut self, kind: TopicKind) {
        match self.signaling.subscribe(kind) {
            Ok(()) => {
                self.session.subscribed.insert(kind);
            }
            Err(err) => self.report(err.into()),
        }
    }

    fn spawn_job<F>(&mut self, job: &'static str, work: F)
    where
        F: Future<Output = Outcome<E>> + Send + 'static,
    {
        debug!("{} started", job);
        self.pending = Some(job);
        let epoch = self.epoch;
        let completions = self.completions.clone();
        tokio::spawn(async move {
            let outcome = work.await;
            if completions.send(Completion { epoch, outcome }).is_err() {
                debug!("call agent is gone, dropping result of {}", job);
            }
        });
    }

    fn set_state(&mut self, state: CallState) {
        if self.state != state {
            info!("call state {:?} -> {:?}", self.state, state);
            self.state = state;
            self.emit(CallEvent::StateChanged(state));
        }
    }

    fn violation(&self, reason: String) {
        warn!("{}", Error::ProtocolViolation(reason));
    }

    fn report(&mut self, err: Error) {
        error!("{}", err);
        self.emit(CallEvent::Error(err));
    }

    fn emit(&mut self, event: CallEvent) {
        (self.observer)(event);
    }
}

async fn open_connection<E: SessionEngine>(
    engine: Arc<E>,
    media: E::Media,
    events: ConnectionEvents,
    make_offer: bool,
) -> Result<Connected<E>, NegotiationError> {
    let connection = engine.create_connection(Some(media), events).await?;
    if !make_offer {
        return Ok(Connected {
            connection,
            offer: None,
        });
    }
    match create_local_offer(engine.as_ref(), &connection).await {
        Ok(offer) => Ok(Connected {
            connection,
            offer: Some(offer),
        }),
        Err(err) => {
            engine.close(connection).await;
            Err(err)
        }
    }
}

async fn create_local_offer<E: SessionEngine>(
    engine: &E,
    connection: &E::Connection,
) -> Result<String, NegotiationError> {
    let offer = engine.create_offer(connection).await?;
    engine
        .set_local_description(connection, SessionDescription::offer(offer.clone()))
        .await?;
    Ok(offer)
}

async fn answer_offer<E: SessionEngine>(
    engine: Arc<E>,
    existing: Option<E::Connection>,
    media: Option<E::Media>,
    events: ConnectionEvents,
    offer: String,
) -> Result<Answered<E>, NegotiationError> {
    let (connection, created) = match existing {
        Some(connection) => (connection, false),
        None => (engine.create_connection(media, events).await?, true),
    };
    match create_local_answer(engine.as_ref(), &connection, offer).await {
        Ok(answer) => Ok(Answered {
            connection,
            created,
            answer,
        }),
        Err(err) => {
            if created {
                engine.close(connection).await;
            }
            Err(err)
        }
    }
}

async fn create_local_answer<E: SessionEngine>(
    engine: &E,
    connection: &E::Connection,
    offer: String,
) -> Result<String, NegotiationError> {
    engine
        .set_remote_description(connection, SessionDescription::offer(offer))
        .await?;
    let answer = engine.create_answer(connection).await?;
    engine
        .set_local_description(connection, SessionDescription::answer(answer.clone()))
        .await?;
    Ok(answer)
}
