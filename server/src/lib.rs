//! The control-plane server: accepts WebSocket connections on a configured TCP port,
//! parses the small JSON command language described in the proxy's wire protocol, and
//! broadcasts lifecycle events back out to every connected subscriber.
//!
//! Connection I/O runs on plain OS threads, one reader and one writer per connection,
//! matching the thread-per-job model `crates/pool` already uses for workers.

mod command;
pub use command::{parse, Command, Reply};

mod connection;
pub use connection::ConnectionRegistry;

mod outbound;
pub use outbound::Outbound;

mod server;
pub use server::ControlPlaneServer;
