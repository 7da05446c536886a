//! WebSocket relay client.
//!
//! Each [`WsRelay`] owns at most one background task, which owns the socket.
//! Callers talk to the task over a command channel. The task is spawned on
//! first use and again after the socket drops, so reconnection is lazy.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use vmr_crypto::Envelope;

use crate::message::{ClientMessage, Filter, RelayMessage};
use crate::traits::{PublishOutcome, RelayConnection, RelayError};

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

const SUBSCRIPTION_BUFFER: usize = 256;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;

type PublishReply = oneshot::Sender<Result<PublishOutcome, RelayError>>;

enum Command {
    Publish {
        event: Envelope,
        reply: PublishReply,
    },
    Subscribe {
        id: String,
        filter: Filter,
        events: mpsc::Sender<Envelope>,
        reply: oneshot::Sender<Result<(), RelayError>>,
    },
    Unsubscribe {
        id: String,
    },
    Shutdown,
}

pub struct WsRelay {
    url: String,
    connect_timeout: Duration,
    commands: Mutex<Option<mpsc::UnboundedSender<Command>>>,
}

impl WsRelay {
    /// Create a relay client. No connection is made until first use.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            commands: Mutex::new(None),
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Whether a connection task is currently running.
    pub fn is_connected(&self) -> bool {
        self.commands
            .lock()
            .as_ref()
            .is_some_and(|tx| !tx.is_closed())
    }

    /// Hand a command to the connection task, spawning it if needed.
    fn dispatch(&self, command: Command) -> Result<(), RelayError> {
        let mut guard = self.commands.lock();
        let command = match guard.as_ref() {
            Some(tx) => match tx.send(command) {
                Ok(()) => return Ok(()),
                Err(mpsc::error::SendError(command)) => command,
            },
            None => command,
        };

        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(command).map_err(|_| RelayError::Closed)?;
        debug!(relay = %self.url, "spawning relay connection task");
        tokio::spawn(run_connection(self.url.clone(), self.connect_timeout, rx));
        *guard = Some(tx);
        Ok(())
    }
}

#[async_trait]
impl RelayConnection for WsRelay {
    fn url(&self) -> &str {
        &self.url
    }

    async fn publish(&self, envelope: &Envelope) -> Result<PublishOutcome, RelayError> {
        let (reply, outcome) = oneshot::channel();
        self.dispatch(Command::Publish {
            event: envelope.clone(),
            reply,
        })?;
        outcome.await.map_err(|_| RelayError::Closed)?
    }

    async fn subscribe(
        &self,
        subscription_id: &str,
        filter: &Filter,
    ) -> Result<mpsc::Receiver<Envelope>, RelayError> {
        let (events, receiver) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let (reply, done) = oneshot::channel();
        self.dispatch(Command::Subscribe {
            id: subscription_id.to_string(),
            filter: filter.clone(),
            events,
            reply,
        })?;
        done.await.map_err(|_| RelayError::Closed)??;
        Ok(receiver)
    }

    fn unsubscribe(&self, subscription_id: &str) {
        // Never connect just to close something.
        if let Some(tx) = self.commands.lock().as_ref() {
            let _ = tx.send(Command::Unsubscribe {
                id: subscription_id.to_string(),
            });
        }
    }

    async fn shutdown(&self) {
        if let Some(tx) = self.commands.lock().take() {
            let _ = tx.send(Command::Shutdown);
        }
    }
}

impl Drop for WsRelay {
    fn drop(&mut self) {
        if let Some(tx) = self.commands.get_mut().take() {
            let _ = tx.send(Command::Shutdown);
        }
    }
}

async fn run_connection(
    url: String,
    connect_timeout: Duration,
    mut commands: mpsc::UnboundedReceiver<Command>,
) {
    let stream = match tokio::time::timeout(connect_timeout, connect_async(url.as_str())).await {
        Ok(Ok((stream, _))) => stream,
        Ok(Err(e)) => {
            warn!(relay = %url, error = %e, "relay connection failed");
            fail_queued(&mut commands, RelayError::Connection(e.to_string()));
            return;
        }
        Err(_) => {
            warn!(relay = %url, "relay connection timed out");
            fail_queued(
                &mut commands,
                RelayError::Connection("connect timed out".to_string()),
            );
            return;
        }
    };
    info!(relay = %url, "connected to relay");

    let (mut write, mut read) = stream.split();
    let mut conn = ConnectionState::default();

    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(Command::Shutdown) | None => {
                    let _ = write.send(Message::Close(None)).await;
                    debug!(relay = %url, "relay connection shut down");
                    break;
                }
                Some(command) => {
                    if let Err(e) = conn.handle_command(&mut write, command).await {
                        warn!(relay = %url, error = %e, "relay write failed");
                        break;
                    }
                }
            },
            frame = read.next() => {
                if !conn.handle_frame(&url, &mut write, frame).await {
                    break;
                }
            }
        }
    }

    fail_queued(&mut commands, RelayError::Closed);
    conn.fail_pending();
    info!(relay = %url, "relay connection closed");
}

#[derive(Default)]
struct ConnectionState {
    pending: HashMap<String, PublishReply>,
    subscriptions: HashMap<String, mpsc::Sender<Envelope>>,
}

impl ConnectionState {
    async fn handle_command(&mut self, write: &mut WsSink, command: Command) -> Result<(), RelayError> {
        match command {
            Command::Publish { event, reply } => {
                // Drop entries whose callers gave up waiting.
                self.pending.retain(|_, tx| !tx.is_closed());
                let event_id = event.id().to_string();
                match send_message(write, &ClientMessage::Event(event)).await {
                    Ok(()) => {
                        self.pending.insert(event_id, reply);
                        Ok(())
                    }
                    Err(e) => {
                        let _ = reply.send(Err(e.clone()));
                        Err(e)
                    }
                }
            }
            Command::Subscribe {
                id,
                filter,
                events,
                reply,
            } => {
                let req = ClientMessage::Req {
                    subscription_id: id.clone(),
                    filter,
                };
                match send_message(write, &req).await {
                    Ok(()) => {
                        self.subscriptions.insert(id, events);
                        let _ = reply.send(Ok(()));
                        Ok(())
                    }
                    Err(e) => {
                        let _ = reply.send(Err(e.clone()));
                        Err(e)
                    }
                }
            }
            Command::Unsubscribe { id } => {
                if self.subscriptions.remove(&id).is_some() {
                    send_message(write, &ClientMessage::Close(id)).await?;
                }
                Ok(())
            }
            Command::Shutdown => Ok(()),
        }
    }

    /// Returns false once the connection is gone.
    async fn handle_frame(
        &mut self,
        url: &str,
        write: &mut WsSink,
        frame: Option<Result<Message, tokio_tungstenite::tungstenite::Error>>,
    ) -> bool {
        match frame {
            Some(Ok(Message::Text(text))) => {
                match RelayMessage::parse(&text) {
                    Ok(message) => self.handle_message(url, write, message).await,
                    Err(e) => debug!(relay = %url, error = %e, "ignoring unparseable relay frame"),
                }
                true
            }
            Some(Ok(Message::Ping(payload))) => write.send(Message::Pong(payload)).await.is_ok(),
            Some(Ok(Message::Close(_))) | None => false,
            Some(Ok(_)) => true,
            Some(Err(e)) => {
                warn!(relay = %url, error = %e, "relay socket error");
                false
            }
        }
    }

    async fn handle_message(&mut self, url: &str, write: &mut WsSink, message: RelayMessage) {
        match message {
            RelayMessage::Ok {
                event_id,
                accepted,
                message,
            } => {
                if let Some(reply) = self.pending.remove(&event_id) {
                    let outcome = if accepted {
                        PublishOutcome::Accepted
                    } else {
                        PublishOutcome::Rejected(message)
                    };
                    let _ = reply.send(Ok(outcome));
                }
            }
            RelayMessage::Event {
                subscription_id,
                event,
            } => {
                let Some(tx) = self.subscriptions.get(&subscription_id) else {
                    debug!(relay = %url, subscription = %subscription_id, "event for unknown subscription");
                    return;
                };
                match tx.try_send(event) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        warn!(relay = %url, subscription = %subscription_id, "subscriber lagging, event dropped");
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => {
                        self.subscriptions.remove(&subscription_id);
                        let _ = send_message(write, &ClientMessage::Close(subscription_id)).await;
                    }
                }
            }
            RelayMessage::Eose(subscription_id) => {
                debug!(relay = %url, subscription = %subscription_id, "end of stored events");
            }
            RelayMessage::Closed {
                subscription_id,
                message,
            } => {
                info!(relay = %url, subscription = %subscription_id, reason = %message, "relay closed subscription");
                self.subscriptions.remove(&subscription_id);
            }
            RelayMessage::Notice(message) => {
                info!(relay = %url, notice = %message, "relay notice");
            }
        }
    }

    fn fail_pending(&mut self) {
        for (_, reply) in self.pending.drain() {
            let _ = reply.send(Err(RelayError::Closed));
        }
        self.subscriptions.clear();
    }
}

async fn send_message(write: &mut WsSink, message: &ClientMessage) -> Result<(), RelayError> {
    let text = message
        .to_json()
        .map_err(|e| RelayError::Protocol(e.to_string()))?;
    write
        .send(Message::Text(text))
        .await
        .map_err(|e| RelayError::Connection(e.to_string()))
}

fn fail_queued(commands: &mut mpsc::UnboundedReceiver<Command>, error: RelayError) {
    commands.close();
    while let Ok(command) = commands.try_recv() {
        match command {
            Command::Publish { reply, .. } => {
                let _ = reply.send(Err(error.clone()));
            }
            Command::Subscribe { reply, .. } => {
                let _ = reply.send(Err(error.clone()));
            }
            Command::Unsubscribe { .. } | Command::Shutdown => {}
        }
    }
}
