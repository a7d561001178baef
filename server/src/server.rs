//! The control-plane server itself: binds the listen port, runs the accept loop, and
//! wires the connection registry up to both buses (`CommandBus` inbound,
//! `EventBus` outbound).

use std::io;
use std::net::{SocketAddr, TcpListener};

use socket2::{Domain, Socket, Type};

use slippi_authproxy_eventbus::{CommandBus, EventBus, LifecycleEvent};

use crate::connection::{self, ConnectionRegistry};
use crate::outbound::Outbound;

/// Owns the listening socket and the registry of live connections. Construction binds
/// the port immediately; [`ControlPlaneServer::run`] drives the blocking accept loop
/// and does not return until `stopListening` has been received and every already-open
/// connection has drained (or the process is killed).
pub struct ControlPlaneServer {
    listener: TcpListener,
    registry: ConnectionRegistry,
    commands: CommandBus,
}

impl ControlPlaneServer {
    /// Binds `port` on all interfaces with `SO_REUSEADDR` set, so a restart doesn't
    /// have to wait out `TIME_WAIT` on the previous listener.
    ///
    /// Subscribes the returned server to `events` so every lifecycle event the pool
    /// emits is broadcast to every live connection.
    pub fn bind(port: u16, commands: CommandBus, events: &EventBus) -> io::Result<Self> {
        let addr = SocketAddr::from(([0, 0, 0, 0], port));

        let socket = Socket::new(Domain::IPV4, Type::STREAM, None)?;
        socket.set_reuse_address(true)?;
        socket.bind(&addr.into())?;
        socket.listen(128)?;

        let listener: TcpListener = socket.into();
        let registry = ConnectionRegistry::new();

        let broadcast_registry = registry.clone();
        events.subscribe(move |event: &LifecycleEvent| {
            let outbound = Outbound::from(event);

            match serde_json::to_string(&outbound) {
                Ok(json) => broadcast_registry.broadcast(tungstenite::Message::Text(json.into())),
                Err(error) => tracing::error!(%error, "failed to serialize outbound lifecycle event"),
            }
        });

        Ok(Self { listener, registry, commands })
    }

    /// The port actually bound, useful when `0` was requested (tests usually want an
    /// ephemeral port).
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Runs the accept loop on the calling thread. Each accepted connection is handed
    /// to its own thread via [`connection::serve`]; `run` itself never blocks on any
    /// one connection's lifetime.
    ///
    /// Once `stopListening` has flipped the registry's flag, newly accepted sockets
    /// are closed immediately rather than being serviced — already-open sessions are
    /// untouched.
    pub fn run(&self) {
        loop {
            let (stream, peer) = match self.listener.accept() {
                Ok(accepted) => accepted,
                Err(error) => {
                    tracing::warn!(%error, "accept failed");
                    continue;
                },
            };

            if !self.registry.is_accepting() {
                tracing::debug!(?peer, "rejecting connection, stopListening was received");
                drop(stream);
                continue;
            }

            let commands = self.commands.clone();
            let registry = self.registry.clone();

            std::thread::spawn(move || connection::serve(stream, commands, registry));
        }
    }
}
