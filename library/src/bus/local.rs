use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use log::{debug, warn};
use tokio::sync::mpsc;

use crate::bus::{Bus, BusSink};
use crate::error::BusError;

pub type ClientId = usize;

#[derive(Debug, Default)]
struct BrokerState {
    next_client_id: ClientId,
    clients: HashMap<ClientId, BusSink>,
    subscriptions: HashMap<String, HashSet<ClientId>>,
    taps: Vec<mpsc::UnboundedSender<(String, Vec<u8>)>>,
}

/// In-process broker with the same delivery rules as the relay:
/// a publish reaches every subscriber of the topic, the publisher included.
///
/// Cheap to clone, every clone is the same broker.
#[derive(Debug, Clone, Default)]
pub struct LocalBroker {
    state: Arc<Mutex<BrokerState>>,
}

impl LocalBroker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a client connection whose deliveries go to `sink`.
    ///
    /// # Errors
    /// Fails if the broker's state was poisoned by a panicking client.
    pub fn connect(&self, sink: BusSink) -> Result<LocalBus, BusError> {
        let mut state = self.lock()?;
        let id = state.next_client_id;
        state.next_client_id += 1;
        state.clients.insert(id, sink);
        debug!("local bus client {} connected", id);
        Ok(LocalBus {
            id,
            broker: self.clone(),
        })
    }

    /// Receive a copy of everything published on the broker from now on.
    ///
    /// # Errors
    /// Fails if the broker's state was poisoned by a panicking client.
    pub fn tap(&self) -> Result<mpsc::UnboundedReceiver<(String, Vec<u8>)>, BusError> {
        let (sender, receiver) = mpsc::unbounded_channel();
        self.lock()?.taps.push(sender);
        Ok(receiver)
    }

    /// Publish from outside of any client, e.g. to replay a message.
    ///
    /// # Errors
    /// Fails if the broker's state was poisoned by a panicking client.
    pub fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), BusError> {
        let recipients = {
            let mut state = self.lock()?;
            state
                .taps
                .retain(|tap| tap.send((topic.to_owned(), payload.clone())).is_ok());
            let recipients: Vec<BusSink> = state
                .subscriptions
                .get(topic)
                .into_iter()
                .flatten()
                .filter_map(|id| state.clients.get(id).cloned())
                .collect();
            recipients
        };
        for sink in recipients {
            sink.deliver(topic.to_owned(), payload.clone());
        }
        Ok(())
    }

    /// Topics `client` is currently subscribed to.
    ///
    /// # Errors
    /// Fails if the broker's state was poisoned by a panicking client.
    pub fn topics_of(&self, client: ClientId) -> Result<BTreeSet<String>, BusError> {
        Ok(self
            .lock()?
            .subscriptions
            .iter()
            .filter(|(_, subscribers)| subscribers.contains(&client))
            .map(|(topic, _)| topic.clone())
            .collect())
    }

    /// Simulate a connection that dropped and came back: the broker forgets every subscription
    /// of `client`, then tells the client it is disconnected and reconnected.
    ///
    /// # Errors
    /// Fails if the broker's state was poisoned by a panicking client.
    pub fn bounce(&self, client: ClientId) -> Result<(), BusError> {
        let sink = {
            let mut state = self.lock()?;
            forget_subscriptions(&mut state, client);
            state.clients.get(&client).cloned()
        };
        match sink {
            Some(sink) => {
                sink.disconnected();
                sink.reconnected();
                Ok(())
            }
            None => Err(BusError::Closed),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, BrokerState>, BusError> {
        self.state.lock().map_err(|_poisoned| BusError::Closed)
    }
}

fn forget_subscriptions(state: &mut BrokerState, client: ClientId) {
    state.subscriptions.retain(|_, subscribers| {
        subscribers.remove(&client);
        !subscribers.is_empty()
    });
}

/// A client connection to a [`LocalBroker`].
#[derive(Debug)]
pub struct LocalBus {
    id: ClientId,
    broker: LocalBroker,
}

impl LocalBus {
    #[must_use]
    pub const fn id(&self) -> ClientId {
        self.id
    }
}

impl Bus for LocalBus {
    fn subscribe(&self, topic: &str) -> Result<(), BusError> {
        let mut state = self.broker.lock()?;
        if !state.clients.contains_key(&self.id) {
            return Err(BusError::Closed);
        }
        state
            .subscriptions
            .entry(topic.to_owned())
            .or_default()
            .insert(self.id);
        Ok(())
    }

    fn unsubscribe(&self, topic: &str) -> Result<(), BusError> {
        let mut state = self.broker.lock()?;
        if let Some(subscribers) = state.subscriptions.get_mut(topic) {
            subscribers.remove(&self.id);
            if subscribers.is_empty() {
                state.subscriptions.remove(topic);
            }
        }
        Ok(())
    }

    fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), BusError> {
        self.broker.publish(topic, payload)
    }
}

impl Drop for LocalBus {
    fn drop(&mut self) {
        match self.broker.lock() {
            Ok(mut state) => {
                forget_subscriptions(&mut state, self.id);
                state.clients.remove(&self.id);
            }
            Err(err) => warn!("failed to remove local bus client {}: {}", self.id, err),
        }
    }
}
