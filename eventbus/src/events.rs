/// Lifecycle events emitted by a matchmaking worker (and, for `NoReadyClient`, the
/// pool itself) as a job progresses toward a terminal outcome.
///
/// For any one job the sequence is always one of:
/// - `Searching -> Authenticated`
/// - `Searching -> Timeout`
/// - `Searching -> SlippiError`
/// - `NoReadyClient` standalone (no worker was ever assigned)
#[derive(Clone, Debug, PartialEq)]
pub enum LifecycleEvent {
    /// A worker was assigned and has begun the matchmaking flow.
    Searching {
        requester_id: u64,
        bot_connect_code: String,
        target_connect_code: String,
    },

    /// The target connect-code was found and a direct peer handshake succeeded.
    Authenticated {
        requester_id: u64,
        target_connect_code: String,
        user_name: String,
        user_ip: String,
    },

    /// The job's wall-clock deadline elapsed before a match was found.
    Timeout {
        requester_id: u64,
        target_connect_code: String,
    },

    /// A transport or protocol failure occurred while talking to the upstream
    /// matchmaking service.
    SlippiError {
        requester_id: u64,
        target_connect_code: String,
    },

    /// No worker was available to service the request; the request was never
    /// dispatched and no `Searching` event follows it.
    NoReadyClient {
        requester_id: u64,
        target_connect_code: String,
    },
}

impl LifecycleEvent {
    /// The requester id carried by every variant.
    pub fn requester_id(&self) -> u64 {
        match self {
            Self::Searching { requester_id, .. }
            | Self::Authenticated { requester_id, .. }
            | Self::Timeout { requester_id, .. }
            | Self::SlippiError { requester_id, .. }
            | Self::NoReadyClient { requester_id, .. } => *requester_id,
        }
    }
}

/// An inbound request to start a new authentication job, routed from the
/// control-plane server to the worker pool.
#[derive(Clone, Debug, PartialEq)]
pub struct QueueCommand {
    pub requester_id: u64,
    pub target_connect_code: String,
    pub timeout_ms: u64,
}
