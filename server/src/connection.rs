//! Per-connection plumbing: a reader thread that pumps inbound frames through
//! [`command::parse`], a writer thread that drains an outbound channel, and the
//! registry of live connections the broadcast path fans out to.

use std::net::TcpStream;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Sender};
use std::sync::Mutex;

use tungstenite::protocol::Role;
use tungstenite::{Message, WebSocket};

use slippi_authproxy_eventbus::CommandBus;
use slippi_authproxy_shared_types::Flag;

use crate::command::{self, Command};

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// A live connection's outbound half: enough to push a frame at it and to recognize it
/// again when it closes.
///
/// The upstream `OnClose` handler this is modeled on removes a handle by comparing
/// connection objects for equality; we use the connection id for the same purpose
/// rather than comparing the socket/channel itself.
#[derive(Clone)]
pub struct ConnectionHandle {
    id: u64,
    tx: Sender<Message>,
}

impl ConnectionHandle {
    /// Pushes `message` at this connection's writer thread. Returns `false` if the
    /// writer has already exited (the connection is dead but not yet culled).
    pub fn send(&self, message: Message) -> bool {
        self.tx.send(message).is_ok()
    }
}

/// The list of connections currently open, plus the `stopListening` flag the accept
/// loop polls before handling each new connection.
#[derive(Clone)]
pub struct ConnectionRegistry {
    handles: std::sync::Arc<Mutex<Vec<ConnectionHandle>>>,
    accepting: Flag,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self { handles: std::sync::Arc::new(Mutex::new(Vec::new())), accepting: Flag::new(true) }
    }

    /// Whether the accept loop should still hand new sockets off to a connection
    /// thread. Sessions already open are unaffected by this flipping to `false`.
    pub fn is_accepting(&self) -> bool {
        self.accepting.get()
    }

    /// Implements `stopListening`: stop accepting *new* connections. Existing ones are
    /// left alone.
    pub fn stop_listening(&self) {
        self.accepting.set(false);
    }

    fn insert(&self, handle: ConnectionHandle) {
        self.handles.lock().expect("connection registry mutex poisoned").push(handle);
    }

    fn remove(&self, id: u64) {
        self.handles.lock().expect("connection registry mutex poisoned").retain(|handle| handle.id != id);
    }

    /// Broadcasts `message` to every live connection, fire-and-forget. A connection
    /// whose writer has already exited is left for its own reader thread to cull via
    /// [`Self::remove`] on `close` — we don't prune here to avoid racing that thread.
    pub fn broadcast(&self, message: Message) {
        let handles = self.handles.lock().expect("connection registry mutex poisoned");

        for handle in handles.iter() {
            if !handle.send(message.clone()) {
                tracing::debug!(connection_id = handle.id, "broadcast send failed, connection likely closing");
            }
        }
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Services one accepted TCP connection for its entire lifetime: completes the
/// WebSocket handshake, spawns a dedicated writer thread, then pumps inbound frames
/// until the peer closes or a transport error ends the session.
///
/// Blocking; intended to run on its own thread, one per connection, mirroring the
/// thread-per-job model `crates/pool` already uses for workers.
pub fn serve(stream: TcpStream, commands: CommandBus, registry: ConnectionRegistry) {
    let peer = stream.peer_addr().ok();

    let writer_stream = match stream.try_clone() {
        Ok(clone) => clone,
        Err(error) => {
            tracing::warn!(?peer, %error, "failed to clone connection socket for writer thread");
            return;
        },
    };

    let mut reader = match tungstenite::accept(stream) {
        Ok(ws) => ws,
        Err(error) => {
            tracing::warn!(?peer, %error, "websocket handshake failed");
            return;
        },
    };

    let writer = WebSocket::from_raw_socket(writer_stream, Role::Server, None);

    let (tx, rx) = mpsc::channel::<Message>();
    let id = NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed);
    registry.insert(ConnectionHandle { id, tx: tx.clone() });

    let writer_handle = std::thread::spawn(move || run_writer(writer, rx));

    tracing::info!(?peer, connection_id = id, "connection opened");
    pump_inbound(&mut reader, &tx, &commands, &registry);

    registry.remove(id);
    drop(tx);
    let _ = writer_handle.join();
    tracing::info!(?peer, connection_id = id, "connection closed");
}

fn run_writer(mut writer: WebSocket<TcpStream>, rx: mpsc::Receiver<Message>) {
    for message in rx {
        if let Err(error) = writer.send(message) {
            tracing::debug!(%error, "writer thread exiting, send failed");
            break;
        }
    }
}

fn pump_inbound(reader: &mut WebSocket<TcpStream>, tx: &Sender<Message>, commands: &CommandBus, registry: &ConnectionRegistry) {
    loop {
        let message = match reader.read() {
            Ok(message) => message,

            Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => break,

            Err(error) => {
                tracing::warn!(%error, "connection read failed");
                break;
            },
        };

        let text = match message {
            Message::Text(text) => text,
            Message::Close(_) => break,
            _ => continue,
        };

        match command::parse(&text) {
            Ok(Command::Ping) => {
                let _ = tx.send(Message::Text("pong".into()));
            },

            Ok(Command::Queue(queue)) => commands.emit(queue),

            Ok(Command::StopListening) => registry.stop_listening(),

            Err(reply) => {
                if let Ok(json) = serde_json::to_string(&reply) {
                    let _ = tx.send(Message::Text(json.into()));
                }
            },
        }
    }
}
