//! Drives one bot identity through the upstream reliable-UDP matchmaking protocol for
//! a single authentication job: submit a ticket, poll until the requested opponent is
//! seen, then open a direct peer connection to confirm they're actually reachable.

mod config;
pub use config::WorkerConfig;

mod enet;
pub use enet::{EnetClient, HostCreateError, PeerConnectError, ReceiveError, Transport};

mod protocol;
pub use protocol::{resolve_opponent, CreateTicketRequest, GetTicketResponse, PlayerInfo, ResolvedOpponent};

mod version;
pub use version::VersionLookup;

mod worker;
pub use worker::{JobError, MatchmakingWorker};
