use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};
use std::ops::{Deref, DerefMut};
use std::time::Duration;

use rusty_enet::error::{HostNewError, NoAvailablePeers};
use rusty_enet::{Event, Host, HostSettings, Packet, PacketKind};
use thiserror::Error;

const HOST_SERVICE_TIMEOUT_MS: u64 = 250;

/// Any error that can occur while creating a local ENet host and binding it to a port.
#[derive(Debug, Error)]
pub enum HostCreateError {
    #[error(transparent)]
    SocketBind(std::io::Error),

    #[error(transparent)]
    HostNew(HostNewError<UdpSocket>),
}

/// Any error that can occur while opening a peer connection to a remote host.
#[derive(Debug, Error)]
pub enum PeerConnectError {
    #[error(transparent)]
    NoAvailablePeers(NoAvailablePeers),

    #[error(transparent)]
    HostRead(std::io::Error),

    #[error("did not receive a connect event from the remote host before the retry budget ran out")]
    Exhausted,
}

/// Any error that can occur during a `EnetClient::receive()` call.
#[derive(Debug, Error)]
pub enum ReceiveError {
    #[error(transparent)]
    HostRead(std::io::Error),

    #[error(transparent)]
    Deserialize(serde_json::Error),

    #[error("remote host disconnected")]
    Disconnect,

    #[error("no response within the deadline")]
    Timeout,

    #[error(transparent)]
    Utf8Read(std::str::Utf8Error),
}

/// The seam between the worker state machine and the reliable-UDP transport it drives.
///
/// `MatchmakingWorker` is generic over this so tests can script an upstream's
/// behavior (ticket responses, connect outcomes) without opening a real socket; the
/// proxy binary always uses `EnetClient`, the only production implementation.
pub trait Transport: Sized {
    /// Binds a local UDP socket on `port` (`0` picks an ephemeral port) and creates an
    /// ENet host over it.
    fn bind(port: u16, peer_limit: usize, channel_limit: usize, retries: usize) -> Result<Self, HostCreateError>;

    /// The ephemeral (or fixed) local UDP port this host is bound to.
    fn local_port(&self) -> u16;

    /// Opens a peer connection to `remote`, then services the host until a `Connect`
    /// event arrives or `max_attempts` service calls (each waiting `interval`) have
    /// elapsed without one.
    fn connect_and_wait(
        &mut self,
        remote: SocketAddr,
        channel_count: usize,
        max_attempts: usize,
        interval: Duration,
    ) -> Result<(), PeerConnectError>;

    /// Sends `message` as a reliable packet on `channel_id`.
    fn send_json<T: serde::Serialize>(&mut self, channel_id: u8, message: &T) -> Result<(), serde_json::Error>;

    /// Repeatedly checks for new data until `timeout_ms` has elapsed, attempting to
    /// deserialize any received payload as JSON into `T`.
    fn receive<T: serde::de::DeserializeOwned>(&mut self, timeout_ms: u64) -> Result<T, ReceiveError>;

    /// Tears the host down, gracefully where possible.
    fn terminate(self);
}

/// A wrapper around a `rusty_enet::Host`. We provide a few additional methods via this
/// wrapper, but also deref to the host itself — so any method from `rusty_enet::Host`
/// can be called on this directly.
pub struct EnetClient {
    host: Host<UdpSocket>,
    local_port: u16,
}

impl EnetClient {
    fn try_bind(addr: SocketAddr, peer_limit: usize, channel_limit: usize) -> Result<Self, HostCreateError> {
        let socket = UdpSocket::bind(addr).map_err(HostCreateError::SocketBind)?;
        let local_port = socket.local_addr().map_err(HostCreateError::SocketBind)?.port();

        let host = Host::new(socket, HostSettings {
            peer_limit,
            channel_limit,
            incoming_bandwidth_limit: None,
            outgoing_bandwidth_limit: None,
            ..Default::default()
        })
        .map_err(HostCreateError::HostNew)?;

        Ok(Self { host, local_port })
    }
}

impl Transport for EnetClient {
    /// Retries up to `retries` times on failure — only a failed host-create counts
    /// against the budget, there is no backoff between attempts.
    fn bind(port: u16, peer_limit: usize, channel_limit: usize, retries: usize) -> Result<Self, HostCreateError> {
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port);

        let mut last_error = None;

        for _ in 0..retries.max(1) {
            match Self::try_bind(addr, peer_limit, channel_limit) {
                Ok(client) => return Ok(client),
                Err(error) => last_error = Some(error),
            }
        }

        Err(last_error.expect("retries.max(1) guarantees at least one attempt"))
    }

    fn local_port(&self) -> u16 {
        self.local_port
    }

    /// Unlike the original implementation this is adapted from, a failed or missing
    /// service call does *not* mark the connection successful — only an actual
    /// `Event::Connect` does (see DESIGN.md).
    fn connect_and_wait(
        &mut self,
        remote: SocketAddr,
        channel_count: usize,
        max_attempts: usize,
        interval: Duration,
    ) -> Result<(), PeerConnectError> {
        self.host.connect(remote, channel_count, 0).map_err(PeerConnectError::NoAvailablePeers)?;

        for _ in 0..max_attempts {
            match self.host.service().map_err(PeerConnectError::HostRead)? {
                Some(Event::Connect { .. }) => return Ok(()),
                Some(_other) => {},
                None => {},
            }

            std::thread::sleep(interval);
        }

        Err(PeerConnectError::Exhausted)
    }

    fn send_json<T: serde::Serialize>(&mut self, channel_id: u8, message: &T) -> Result<(), serde_json::Error> {
        let body = serde_json::to_string(message)?;
        let packet = Packet::new(body.as_bytes(), PacketKind::Reliable);
        self.host.broadcast(channel_id, &packet);
        Ok(())
    }

    /// Checks the socket for new data in `HOST_SERVICE_TIMEOUT_MS` chunks until
    /// `timeout_ms` has elapsed.
    fn receive<T>(&mut self, timeout_ms: u64) -> Result<T, ReceiveError>
    where
        T: serde::de::DeserializeOwned,
    {
        let timeout_ms = timeout_ms.max(HOST_SERVICE_TIMEOUT_MS);
        let max_attempts = timeout_ms / HOST_SERVICE_TIMEOUT_MS;

        for _ in 0..max_attempts {
            if let Some(event) = self.host.service().map_err(ReceiveError::HostRead)? {
                match event {
                    Event::Disconnect { .. } => return Err(ReceiveError::Disconnect),

                    Event::Receive { packet, .. } => {
                        let message = str::from_utf8(packet.data()).map_err(ReceiveError::Utf8Read)?;
                        return serde_json::from_str(message).map_err(ReceiveError::Deserialize);
                    },

                    _ => {},
                }
            }

            std::thread::sleep(Duration::from_millis(HOST_SERVICE_TIMEOUT_MS));
        }

        Err(ReceiveError::Timeout)
    }

    /// Attempts to terminate every open peer gracefully: issues a disconnect, then
    /// drains events for up to 3000ms handling incoming packets and watching for the
    /// matching `Disconnect`. Any peer that doesn't disconnect cleanly within the
    /// budget is force-reset. The host itself is destroyed when this (and, with it,
    /// the wrapped `Host`) is dropped.
    fn terminate(mut self) {
        for peer in self.host.peers_mut() {
            peer.disconnect(0);
        }

        let budget = Duration::from_millis(3000);
        let step = Duration::from_millis(250);
        let mut waited = Duration::ZERO;

        while waited <= budget {
            if let Ok(Some(Event::Disconnect { .. })) = self.host.service() {
                return;
            }

            std::thread::sleep(step);
            waited += step;
        }

        for peer in self.host.peers_mut() {
            peer.reset();
        }
    }
}

impl Deref for EnetClient {
    type Target = Host<UdpSocket>;

    fn deref(&self) -> &Self::Target {
        &self.host
    }
}

impl DerefMut for EnetClient {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.host
    }
}
