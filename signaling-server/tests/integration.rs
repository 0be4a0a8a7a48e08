use std::net::TcpListener;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Instant};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use webrtc_pubsub::call::{CallAgent, CallEvent, CallState, Mailbox, Role};
use webrtc_pubsub::engine::{ConnectionEvents, SessionDescription, SessionEngine};
use webrtc_pubsub::bus::WsBus;
use webrtc_pubsub::{IceCandidate, MediaError, NegotiationError, SessionId};
use webrtc_pubsub_protocol::bus::BusFrame;
use webrtc_pubsub_relay::router::create_router;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

fn start_relay() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").expect("Failed to bind random port");
    let port = listener.local_addr().unwrap().port();

    let server = axum::Server::from_tcp(listener)
        .unwrap()
        .serve(create_router().into_make_service());
    tokio::spawn(server);
    port
}

/// TCP forwarder in front of the relay whose connections can be cut.
struct Proxy {
    port: u16,
    accepted: Arc<AtomicUsize>,
    links: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl Proxy {
    async fn start(target: u16) -> Self {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let accepted = Arc::new(AtomicUsize::new(0));
        let links = Arc::new(Mutex::new(Vec::new()));

        let counter = Arc::clone(&accepted);
        let registry = Arc::clone(&links);
        tokio::spawn(async move {
            while let Ok((mut inbound, _)) = listener.accept().await {
                counter.fetch_add(1, Ordering::SeqCst);
                let link = tokio::spawn(async move {
                    if let Ok(mut outbound) = TcpStream::connect(("127.0.0.1", target)).await {
                        let _ = tokio::io::copy_bidirectional(&mut inbound, &mut outbound).await;
                    }
                });
                registry.lock().unwrap().push(link);
            }
        });
        Self {
            port,
            accepted,
            links,
        }
    }

    fn url(&self) -> String {
        format!("ws://127.0.0.1:{}/bus", self.port)
    }

    fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }

    /// Drop every open connection, both ends see it as a lost peer.
    fn cut(&self) {
        for link in self.links.lock().unwrap().drain(..) {
            link.abort();
        }
    }
}

/// Engine that agrees to everything.
#[derive(Debug, Default)]
struct AgreeableEngine {
    next_id: AtomicU32,
}

#[async_trait]
impl SessionEngine for AgreeableEngine {
    type Connection = u32;
    type Media = u32;

    async fn acquire_media(&self) -> Result<u32, MediaError> {
        Ok(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    async fn release_media(&self, _media: u32) {}

    async fn create_connection(
        &self,
        _media: Option<u32>,
        _events: ConnectionEvents,
    ) -> Result<u32, NegotiationError> {
        Ok(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    async fn create_offer(&self, _connection: &u32) -> Result<String, NegotiationError> {
        Ok("X".to_owned())
    }

    async fn create_answer(&self, _connection: &u32) -> Result<String, NegotiationError> {
        Ok("Y".to_owned())
    }

    async fn set_local_description(
        &self,
        _connection: &u32,
        _description: SessionDescription,
    ) -> Result<(), NegotiationError> {
        Ok(())
    }

    async fn set_remote_description(
        &self,
        _connection: &u32,
        _description: SessionDescription,
    ) -> Result<(), NegotiationError> {
        Ok(())
    }

    async fn add_ice_candidate(
        &self,
        _connection: &u32,
        _candidate: Option<IceCandidate>,
    ) -> Result<(), NegotiationError> {
        Ok(())
    }

    async fn close(&self, _connection: u32) {}
}

async fn join(url: &str, session_id: &str) -> (CallAgent, mpsc::UnboundedReceiver<CallEvent>) {
    let mailbox = Mailbox::new();
    let bus = WsBus::connect(url, mailbox.bus_sink(), Duration::from_millis(100))
        .await
        .unwrap();
    let (sender, events) = mpsc::unbounded_channel();
    let agent = CallAgent::start(
        SessionId::from(session_id),
        AgreeableEngine::default(),
        bus,
        mailbox,
        move |event| {
            let _ = sender.send(event);
        },
    );
    (agent, events)
}

async fn wait_for(agent: &CallAgent, state: CallState) {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let snapshot = agent.snapshot().await.unwrap();
        if snapshot.state == state {
            return;
        }
        assert!(Instant::now() < deadline, "gave up waiting for {state:?}: {snapshot:?}");
        sleep(Duration::from_millis(10)).await;
    }
}

async fn raw_client(port: u16) -> Socket {
    let (socket, _) = connect_async(format!("ws://127.0.0.1:{port}/bus"))
        .await
        .unwrap();
    socket
}

async fn send(socket: &mut Socket, frame: &BusFrame) {
    let text = serde_json::to_string(frame).unwrap();
    socket.send(Message::Text(text)).await.unwrap();
}

async fn next_frame(socket: &mut Socket, limit: Duration) -> Option<BusFrame> {
    match timeout(limit, socket.next()).await {
        Ok(Some(Ok(Message::Text(text)))) => Some(serde_json::from_str(&text).unwrap()),
        _ => None,
    }
}

/// Subscribe and wait until the relay has registered it, by publishing to ourselves.
async fn subscribe(socket: &mut Socket, topic: &str) {
    send(
        socket,
        &BusFrame::Subscribe {
            topic: topic.to_owned(),
        },
    )
    .await;
    send(
        socket,
        &BusFrame::Publish {
            topic: topic.to_owned(),
            payload: "sync".to_owned(),
        },
    )
    .await;
    let echo = next_frame(socket, Duration::from_secs(5)).await;
    assert_eq!(
        echo,
        Some(BusFrame::Deliver {
            topic: topic.to_owned(),
            payload: "sync".to_owned(),
        })
    );
}

#[tokio::test]
async fn relay_reports_health() {
    let port = start_relay();
    let mut stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    tokio::io::AsyncWriteExt::write_all(
        &mut stream,
        b"GET /health HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n",
    )
    .await
    .unwrap();
    let mut response = String::new();
    tokio::io::AsyncReadExt::read_to_string(&mut stream, &mut response)
        .await
        .unwrap();
    assert!(response.starts_with("HTTP/1.1 200"));
    assert!(response.ends_with("OK"));
}

#[tokio::test]
async fn relay_delivers_to_subscribers_only() {
    let port = start_relay();
    let mut alice = raw_client(port).await;
    let mut bob = raw_client(port).await;
    let mut carol = raw_client(port).await;

    subscribe(&mut alice, "webrtc/abc/server").await;
    subscribe(&mut carol, "webrtc/abc/client").await;

    send(
        &mut bob,
        &BusFrame::Publish {
            topic: "webrtc/abc/server".to_owned(),
            payload: r#"{"type":"offer","sdp":"X"}"#.to_owned(),
        },
    )
    .await;

    assert_eq!(
        next_frame(&mut alice, Duration::from_secs(5)).await,
        Some(BusFrame::Deliver {
            topic: "webrtc/abc/server".to_owned(),
            payload: r#"{"type":"offer","sdp":"X"}"#.to_owned(),
        })
    );
    assert_eq!(next_frame(&mut bob, Duration::from_millis(200)).await, None);
    assert_eq!(next_frame(&mut carol, Duration::from_millis(200)).await, None);
}

#[tokio::test]
async fn test_clients_with_axum_server() {
    let port = start_relay();
    let url = format!("ws://127.0.0.1:{port}/bus");

    let (callee, _callee_events) = join(&url, "some-session-id").await;
    callee.answer_call().unwrap();
    wait_for(&callee, CallState::Negotiating(Role::Callee)).await;

    let (caller, _caller_events) = join(&url, "some-session-id").await;
    let deadline = Instant::now() + Duration::from_secs(5);
    while !caller.snapshot().await.unwrap().peer_waiting {
        // the announcement went out before the caller listened, repeat it
        callee.hang_up().unwrap();
        wait_for(&callee, CallState::Idle).await;
        callee.answer_call().unwrap();
        wait_for(&callee, CallState::Negotiating(Role::Callee)).await;
        sleep(Duration::from_millis(50)).await;
        assert!(Instant::now() < deadline, "caller never saw the callee");
    }

    caller.start_call().unwrap();
    wait_for(&caller, CallState::InCall(Role::Caller)).await;
    wait_for(&callee, CallState::InCall(Role::Callee)).await;

    caller.hang_up().unwrap();
    wait_for(&caller, CallState::Idle).await;
    wait_for(&callee, CallState::Idle).await;

    caller.shutdown().await.unwrap();
    callee.shutdown().await.unwrap();
}

#[tokio::test]
async fn agent_resubscribes_after_losing_the_relay() {
    let port = start_relay();
    let proxy = Proxy::start(port).await;
    let mut peer = raw_client(port).await;
    subscribe(&mut peer, "webrtc/flaky/client").await;

    let (callee, _events) = join(&proxy.url(), "flaky").await;
    callee.answer_call().unwrap();
    wait_for(&callee, CallState::Negotiating(Role::Callee)).await;
    assert_eq!(proxy.accepted(), 1);

    proxy.cut();

    let offer = BusFrame::Publish {
        topic: "webrtc/flaky/server".to_owned(),
        payload: r#"{"type":"offer","sdp":"X"}"#.to_owned(),
    };
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        // offers sent before the agent is back are lost, keep trying
        send(&mut peer, &offer).await;
        sleep(Duration::from_millis(50)).await;
        if callee.snapshot().await.unwrap().state == CallState::InCall(Role::Callee) {
            break;
        }
        assert!(Instant::now() < deadline, "callee never got the offer back");
    }

    assert_eq!(proxy.accepted(), 2);
    assert_eq!(
        next_frame(&mut peer, Duration::from_secs(5)).await,
        Some(BusFrame::Deliver {
            topic: "webrtc/flaky/client".to_owned(),
            payload: r#"{"type":"answer","sdp":"Y"}"#.to_owned(),
        })
    );
    let snapshot = callee.snapshot().await.unwrap();
    assert!(snapshot.has_connection);
    assert_eq!(snapshot.publish_topic.as_deref(), Some("webrtc/flaky/client"));

    callee.shutdown().await.unwrap();
}
