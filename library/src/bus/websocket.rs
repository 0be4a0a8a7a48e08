use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use webrtc_pubsub_protocol::bus::BusFrame;

use crate::bus::{Bus, BusSink};
use crate::error::{BusError, ConnectError};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Bus client of a `webrtc-pubsub-relay` instance.
///
/// Frames are queued and written by a background task, which also reconnects after
/// `reconnect_delay` whenever the relay connection drops. Frames queued while disconnected
/// are sent once the connection is back.
#[derive(Debug)]
pub struct WsBus {
    frames: mpsc::UnboundedSender<BusFrame>,
}

impl WsBus {
    /// Connect to the relay's `WebSocket` endpoint, e.g. `ws://127.0.0.1:9001/bus`.
    ///
    /// # Errors
    /// This function errs if the first connection attempt fails, later failures are retried.
    pub async fn connect(
        url: &str,
        sink: BusSink,
        reconnect_delay: Duration,
    ) -> Result<Self, ConnectError> {
        let socket = open(url).await?;
        info!("connected to relay at {}", url);

        let (frames, outbound) = mpsc::unbounded_channel();
        tokio::spawn(run(url.to_owned(), socket, outbound, sink, reconnect_delay));
        Ok(Self { frames })
    }

    fn send(&self, frame: BusFrame) -> Result<(), BusError> {
        self.frames.send(frame).map_err(|_closed| BusError::Closed)
    }
}

impl Bus for WsBus {
    fn subscribe(&self, topic: &str) -> Result<(), BusError> {
        self.send(BusFrame::Subscribe {
            topic: topic.to_owned(),
        })
    }

    fn unsubscribe(&self, topic: &str) -> Result<(), BusError> {
        self.send(BusFrame::Unsubscribe {
            topic: topic.to_owned(),
        })
    }

    fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), BusError> {
        let payload = String::from_utf8(payload).map_err(|_not_utf8| BusError::InvalidPayload)?;
        self.send(BusFrame::Publish {
            topic: topic.to_owned(),
            payload,
        })
    }
}

async fn open(url: &str) -> Result<Socket, ConnectError> {
    connect_async(url)
        .await
        .map(|(socket, _response)| socket)
        .map_err(|err| ConnectError {
            url: url.to_owned(),
            reason: err.to_string(),
        })
}

enum Pump {
    /// Connection dropped, try again.
    Lost,
    /// Either side of the client went away.
    Finished,
}

async fn run(
    url: String,
    socket: Socket,
    mut outbound: mpsc::UnboundedReceiver<BusFrame>,
    sink: BusSink,
    reconnect_delay: Duration,
) {
    let mut socket = Some(socket);
    loop {
        let current = match socket.take() {
            Some(socket) => socket,
            None => {
                sleep(reconnect_delay).await;
                if sink.is_closed() {
                    return;
                }
                match open(&url).await {
                    Ok(socket) => {
                        info!("reconnected to relay at {}", url);
                        sink.reconnected();
                        socket
                    }
                    Err(err) => {
                        warn!("{}", err);
                        continue;
                    }
                }
            }
        };

        match pump(current, &mut outbound, &sink).await {
            Pump::Finished => {
                debug!("relay connection to {} finished", url);
                return;
            }
            Pump::Lost => {
                warn!("lost connection to relay at {}", url);
                if !sink.disconnected() {
                    return;
                }
            }
        }
    }
}

async fn pump(
    socket: Socket,
    outbound: &mut mpsc::UnboundedReceiver<BusFrame>,
    sink: &BusSink,
) -> Pump {
    let (mut write, mut read) = socket.split();
    loop {
        tokio::select! {
            frame = outbound.recv() => {
                let Some(frame) = frame else {
                    if let Err(err) = write.close().await {
                        debug!("failed to close relay connection: {}", err);
                    }
                    return Pump::Finished;
                };
                let text = match serde_json::to_string(&frame) {
                    Ok(text) => text,
                    Err(err) => {
                        error!("failed to serialize bus frame: {}", err);
                        continue;
                    }
                };
                if let Err(err) = write.send(Message::Text(text)).await {
                    warn!("failed to send frame to relay: {}", err);
                    return Pump::Lost;
                }
            }
            message = read.next() => match message {
                Some(Ok(Message::Text(text))) => match serde_json::from_str::<BusFrame>(&text) {
                    Ok(BusFrame::Deliver { topic, payload }) => {
                        if !sink.deliver(topic, payload.into_bytes()) {
                            return Pump::Finished;
                        }
                    }
                    Ok(frame) => warn!("unexpected frame from relay: {:?}", frame),
                    Err(err) => warn!("failed to parse frame from relay: {}", err),
                },
                Some(Ok(Message::Close(_))) | None => return Pump::Lost,
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    warn!("relay connection error: {}", err);
                    return Pump::Lost;
                }
            }
        }
    }
}
