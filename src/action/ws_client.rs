//! The long-lived WebSocket client process (spec §4.6 "WebSocket client").
//!
//! One task owns the socket; callers talk to it over an mpsc command queue.
//! Inbound frames are delivered to the head waiting reader if one is parked,
//! else buffered; a reader with no buffered frame parks on a oneshot until
//! one arrives or its caller-side timeout elapses. Pings are answered with
//! pongs transparently; a remote close fails every parked reader and ends
//! the task.

use futures_util::{SinkExt, StreamExt};
use std::collections::VecDeque;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::errors::ActionError;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

enum Command {
    Send(Message, oneshot::Sender<Result<(), ActionError>>),
    Recv(oneshot::Sender<Result<Message, ActionError>>),
    Close,
}

/// A handle to a running WebSocket client task.
pub struct WsClientHandle {
    pub url: String,
    commands: mpsc::UnboundedSender<Command>,
}

impl WsClientHandle {
    /// Connects and spawns the owning task (spec §4.6 Connect). Returns the
    /// raw tungstenite error on failure so the caller can distinguish a
    /// transport timeout (retry with backoff) from a protocol-level failure
    /// (fail the session outright).
    pub async fn connect(
        url: &str,
    ) -> Result<Self, tokio_tungstenite::tungstenite::Error> {
        let (stream, _response) = tokio_tungstenite::connect_async(url).await?;
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run(stream, rx));
        Ok(WsClientHandle {
            url: url.to_string(),
            commands: tx,
        })
    }

    /// Whether a connect failure looks like a transient transport timeout
    /// (spec §4.6: retry indefinitely) versus a protocol-level rejection
    /// (fail the session).
    pub fn is_transport_timeout(err: &tokio_tungstenite::tungstenite::Error) -> bool {
        match err {
            tokio_tungstenite::tungstenite::Error::Io(io_err) => {
                io_err.kind() == std::io::ErrorKind::TimedOut
                    || io_err.kind() == std::io::ErrorKind::ConnectionRefused
            }
            _ => false,
        }
    }

    pub async fn send(&self, message: Message) -> Result<(), ActionError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands
            .send(Command::Send(message, reply_tx))
            .map_err(|_| ActionError::WebSocket("client task gone".into()))?;
        reply_rx
            .await
            .map_err(|_| ActionError::WebSocket("client task gone".into()))?
    }

    /// Blocks up to `timeout` for the next frame (spec §4.6 Recv).
    pub async fn recv(&self, timeout: std::time::Duration) -> Result<Message, ActionError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands
            .send(Command::Recv(reply_tx))
            .map_err(|_| ActionError::WebSocket("client task gone".into()))?;
        match tokio::time::timeout(timeout, reply_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(ActionError::WebSocket("client task gone".into())),
            Err(_) => Err(ActionError::Timeout(timeout.as_millis() as u64)),
        }
    }

    pub fn close(&self) {
        let _ = self.commands.send(Command::Close);
    }
}

async fn run(mut ws: WsStream, mut commands: mpsc::UnboundedReceiver<Command>) {
    let mut buffered: VecDeque<Message> = VecDeque::new();
    let mut waiting: VecDeque<oneshot::Sender<Result<Message, ActionError>>> = VecDeque::new();

    loop {
        tokio::select! {
            cmd = commands.recv() => {
                match cmd {
                    Some(Command::Send(msg, reply)) => {
                        let result = ws.send(msg).await.map_err(|e| ActionError::WebSocket(e.to_string()));
                        let _ = reply.send(result);
                    }
                    Some(Command::Recv(reply)) => {
                        if let Some(frame) = buffered.pop_front() {
                            let _ = reply.send(Ok(frame));
                        } else {
                            waiting.push_back(reply);
                        }
                    }
                    Some(Command::Close) | None => {
                        let _ = ws.close(None).await;
                        break;
                    }
                }
            }
            incoming = ws.next() => {
                match incoming {
                    Some(Ok(Message::Ping(payload))) => {
                        let _ = ws.send(Message::Pong(payload)).await;
                    }
                    Some(Ok(frame)) => {
                        if let Some(waiter) = waiting.pop_front() {
                            let _ = waiter.send(Ok(frame));
                        } else {
                            buffered.push_back(frame);
                        }
                    }
                    Some(Err(e)) => {
                        if let Some(waiter) = waiting.pop_front() {
                            let _ = waiter.send(Err(ActionError::WebSocket(e.to_string())));
                        }
                    }
                    None => {
                        while let Some(waiter) = waiting.pop_front() {
                            let _ = waiter.send(Err(ActionError::WebSocket("ws_closed".into())));
                        }
                        break;
                    }
                }
            }
        }
    }
}
