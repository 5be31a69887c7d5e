//! TCP transport: inbound accept loop + outbound persistent peer
//! connections, framed per `protocol.rs`.
//!
//! Grounded in `doorway::worker::conductor`'s connection-manager shape
//! (a background task owns the socket; callers serialize writes through
//! a channel/mutex) but built directly on `tokio::net::TcpStream`
//! instead of a WebSocket, since the wire protocol here is raw
//! length-prefixed TCP framing.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch, Mutex};
use tracing::{debug, warn};

use crate::error::{RelaySimError, Result};
use crate::message::Message;
use crate::protocol;

/// Per-synchronous-request send deadline for replies on persistent links.
const SEND_DEADLINE: Duration = Duration::from_secs(5);

/// Bind a listener at `addr` and spawn its accept loop. Every fully
/// decoded inbound message (from any peer) is forwarded to `inbound_tx`;
/// malformed frames are dropped without closing the connection. Returns the bound address (useful when `addr`'s port is 0).
pub async fn spawn_listener(
    addr: SocketAddr,
    inbound_tx: mpsc::Sender<Message>,
    shutdown: watch::Receiver<bool>,
) -> Result<SocketAddr> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|source| RelaySimError::Connect {
            addr: addr.to_string(),
            source,
        })?;
    let local_addr = listener.local_addr()?;

    tokio::spawn(accept_loop(listener, inbound_tx, shutdown));

    Ok(local_addr)
}

async fn accept_loop(
    listener: TcpListener,
    inbound_tx: mpsc::Sender<Message>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer_addr)) => {
                        debug!(%peer_addr, "accepted connection");
                        tokio::spawn(handle_connection(stream, inbound_tx.clone(), shutdown.clone()));
                    }
                    Err(e) => warn!("accept error: {e}"),
                }
            }
        }
    }
}

async fn handle_connection(
    mut stream: TcpStream,
    inbound_tx: mpsc::Sender<Message>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            frame = protocol::read_frame(&mut stream) => {
                match frame {
                    Ok(Some(msg)) => {
                        if inbound_tx.send(msg).await.is_err() {
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        debug!("dropping malformed frame: {e}");
                        continue;
                    }
                }
            }
        }
    }
}

/// A persistent, lazily-(re)connected outbound peer. Writes are
/// serialized through a single mutex so the write path stays
/// serialized per connection.
pub struct Peer {
    addr: SocketAddr,
    write_half: Mutex<Option<OwnedWriteHalf>>,
    connected: AtomicBool,
}

impl Peer {
    pub fn new(addr: SocketAddr) -> Arc<Self> {
        Arc::new(Self {
            addr,
            write_half: Mutex::new(None),
            connected: AtomicBool::new(false),
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Open (or reopen) the outbound connection.
    pub async fn connect(&self) -> Result<()> {
        let stream = TcpStream::connect(self.addr)
            .await
            .map_err(|source| RelaySimError::Connect {
                addr: self.addr.to_string(),
                source,
            })?;
        let (_read_half, write_half) = stream.into_split();
        *self.write_half.lock().await = Some(write_half);
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Fire-and-forget send; never awaits a reply. On failure the peer
    /// is marked disconnected so callers can react (re-enqueue, mark the
    /// id unavailable in a `RoundRobin`).
    pub async fn send(&self, msg: &Message) -> Result<()> {
        let mut guard = self.write_half.lock().await;
        let Some(half) = guard.as_mut() else {
            return Err(RelaySimError::NotConnected(self.addr.to_string()));
        };
        let result = match tokio::time::timeout(SEND_DEADLINE, protocol::write_frame(half, msg)).await {
            Ok(inner) => inner,
            Err(_) => Err(RelaySimError::Io(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                format!("send to {} exceeded {:?}", self.addr, SEND_DEADLINE),
            ))),
        };
        if result.is_err() {
            *guard = None;
            self.connected.store(false, Ordering::SeqCst);
        }
        result
    }

    pub async fn disconnect(&self) {
        *self.write_half.lock().await = None;
        self.connected.store(false, Ordering::SeqCst);
    }
}

/// One-shot connect → send → close, used by stage-two workers to reply
/// to a client at the address embedded in `Request.payload`.
pub async fn send_once(addr: SocketAddr, msg: &Message) -> Result<()> {
    let mut stream = TcpStream::connect(addr)
        .await
        .map_err(|source| RelaySimError::Connect {
            addr: addr.to_string(),
            source,
        })?;
    match tokio::time::timeout(SEND_DEADLINE, protocol::write_frame(&mut stream, msg)).await {
        Ok(inner) => inner,
        Err(_) => Err(RelaySimError::Io(std::io::Error::new(
            std::io::ErrorKind::TimedOut,
            format!("send to {addr} exceeded {SEND_DEADLINE:?}"),
        ))),
    }
}
