/*!
One-to-one call between two peers sharing a session id.

Each peer runs a [`CallAgent`], a single task owning the call state machine. Local intents,
bus deliveries and engine callbacks are all queued to that task, so transitions never overlap.
Whoever starts the call becomes the caller and sends the offer; the peer that answers
announces itself on the session's `call` topic and waits for it.

# Example

Two peers in one process, talking over an in-process broker.

```ignore
use webrtc_pubsub::bus::LocalBroker;
use webrtc_pubsub::call::{CallAgent, CallEvent, Mailbox};
use webrtc_pubsub::SessionId;

let broker = LocalBroker::new();
let session_id = SessionId::from("abc");

let mailbox = Mailbox::new();
let bus = broker.connect(mailbox.bus_sink())?;
let callee = CallAgent::start(session_id.clone(), engine.clone(), bus, mailbox, |event| {
    println!("callee: {:?}", event);
});
callee.answer_call()?;

let mailbox = Mailbox::new();
let bus = broker.connect(mailbox.bus_sink())?;
let caller = CallAgent::start(session_id, engine, bus, mailbox, |event| {
    if let CallEvent::PeerWaiting = event {
        println!("somebody is waiting for our call");
    }
});
caller.start_call()?;
```
*/

use std::sync::Arc;

use log::debug;
use tokio::sync::{mpsc, oneshot};
use webrtc_pubsub_protocol::SessionId;

use crate::bus::{Bus, BusEvent, BusSink, WsBus};
use crate::call::machine::{CallMachine, Completion};
use crate::call::signaling::Signaling;
use crate::config::ClientConfig;
use crate::engine::{EngineEvent, RemoteTrack, SessionEngine};
use crate::error::{Error, Result};
use crate::utils::get_random_session_id;

mod machine;
mod signaling;
mod state;

pub use state::{CallState, Role, SessionSnapshot};

/// What the agent task consumes, in arrival order.
#[derive(Debug)]
pub(crate) enum Inbound {
    Intent(Intent),
    Bus(BusEvent),
    Engine { generation: u64, event: EngineEvent },
    Snapshot(oneshot::Sender<SessionSnapshot>),
    Shutdown(oneshot::Sender<()>),
}

/// Local user actions.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Intent {
    StartCall,
    AnswerCall,
    HangUp,
}

/// Notifications delivered to the callback passed to [`CallAgent::start`].
#[derive(Debug)]
pub enum CallEvent {
    StateChanged(CallState),
    /// The other peer announced it is waiting for our offer.
    PeerWaiting,
    RemoteTrack(RemoteTrack),
    /// Something went wrong, the call is already back in a consistent state.
    Error(Error),
}

/// Queue of an agent that hasn't been started yet.
///
/// Exists so the bus can be connected with [`Mailbox::bus_sink`] before the agent owns it.
#[derive(Debug)]
pub struct Mailbox {
    sender: mpsc::UnboundedSender<Inbound>,
    receiver: mpsc::UnboundedReceiver<Inbound>,
}

impl Mailbox {
    #[must_use]
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self { sender, receiver }
    }

    #[must_use]
    pub fn bus_sink(&self) -> BusSink {
        BusSink::new(self.sender.clone())
    }
}

impl Default for Mailbox {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle to a running call agent. Cheap to clone, every clone drives the same call.
#[derive(Debug, Clone)]
pub struct CallAgent {
    sender: mpsc::UnboundedSender<Inbound>,
    session_id: SessionId,
}

impl CallAgent {
    /// Spawn the agent task for `session_id` on the current tokio runtime.
    ///
    /// The agent subscribes to the session's `call` topic right away and reports
    /// everything that happens to `on_event`, from the agent task.
    ///
    /// # Panics
    /// Panics when called outside of a tokio runtime.
    pub fn start<E, B, F>(
        session_id: SessionId,
        engine: E,
        bus: B,
        mailbox: Mailbox,
        on_event: F,
    ) -> Self
    where
        E: SessionEngine,
        B: Bus,
        F: FnMut(CallEvent) + Send + 'static,
    {
        let Mailbox { sender, receiver } = mailbox;
        let (completions, completed) = mpsc::unbounded_channel();
        let signaling = Signaling::new(session_id.clone(), bus);
        let machine = CallMachine::new(
            Arc::new(engine),
            signaling,
            sender.clone(),
            completions,
            Box::new(on_event),
        );
        tokio::spawn(run(machine, receiver, completed));

        Self { sender, session_id }
    }

    /// Connect to the relay described by `config` and start an agent on it.
    ///
    /// Without a configured session id a random one is generated, see [`CallAgent::session_id`].
    ///
    /// # Errors
    /// Fails if the relay can't be reached.
    pub async fn connect<E, F>(config: &ClientConfig, engine: E, on_event: F) -> Result<Self>
    where
        E: SessionEngine,
        F: FnMut(CallEvent) + Send + 'static,
    {
        let mailbox = Mailbox::new();
        let bus = WsBus::connect(&config.relay_url, mailbox.bus_sink(), config.reconnect_delay())
            .await?;
        let session_id = config
            .session_id
            .clone()
            .map_or_else(get_random_session_id, SessionId::new);
        Ok(Self::start(session_id, engine, bus, mailbox, on_event))
    }

    #[must_use]
    pub const fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// Call the peer: acquire media, send an offer and wait for the answer.
    ///
    /// # Errors
    /// Fails once the agent has shut down.
    pub fn start_call(&self) -> Result<()> {
        self.intent(Intent::StartCall)
    }

    /// Tell the peer we're ready and wait for its offer.
    ///
    /// # Errors
    /// Fails once the agent has shut down.
    pub fn answer_call(&self) -> Result<()> {
        self.intent(Intent::AnswerCall)
    }

    /// End the current call, if there is one.
    ///
    /// # Errors
    /// Fails once the agent has shut down.
    pub fn hang_up(&self) -> Result<()> {
        self.intent(Intent::HangUp)
    }

    /// # Errors
    /// Fails once the agent has shut down.
    pub fn intent(&self, intent: Intent) -> Result<()> {
        self.send(Inbound::Intent(intent))
    }

    /// Current state of the call, after everything queued before this request was handled.
    ///
    /// # Errors
    /// Fails once the agent has shut down.
    pub async fn snapshot(&self) -> Result<SessionSnapshot> {
        let (reply, snapshot) = oneshot::channel();
        self.send(Inbound::Snapshot(reply))?;
        snapshot.await.map_err(|_dropped| Error::AgentGone)
    }

    /// Hang up if needed, leave the session and stop the agent.
    ///
    /// # Errors
    /// Fails if the agent was already shut down.
    pub async fn shutdown(&self) -> Result<()> {
        let (done, finished) = oneshot::channel();
        self.send(Inbound::Shutdown(done))?;
        finished.await.map_err(|_dropped| Error::AgentGone)
    }

    fn send(&self, inbound: Inbound) -> Result<()> {
        self.sender
            .send(inbound)
            .map_err(|_closed| Error::AgentGone)
    }
}

async fn run<E: SessionEngine, B: Bus>(
    mut machine: CallMachine<E, B>,
    mut inbound: mpsc::UnboundedReceiver<Inbound>,
    mut completed: mpsc::UnboundedReceiver<Completion<E>>,
) {
    machine.open();
    loop {
        tokio::select! {
            biased;
            Some(completion) = completed.recv() => machine.complete(completion).await,
            message = inbound.recv() => match message {
                Some(Inbound::Shutdown(done)) => {
                    machine.shutdown().await;
                    if done.send(()).is_err() {
                        debug!("nobody waits for the shutdown");
                    }
                    return;
                }
                Some(message) => machine.handle(message).await,
                None => {
                    machine.shutdown().await;
                    return;
                }
            },
        }
    }
}
