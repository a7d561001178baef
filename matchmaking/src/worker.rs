//! The matchmaking worker: drives one bot identity through a single authentication
//! job, from ticket creation through confirming the target is reachable.

use std::net::ToSocketAddrs;
use std::time::{Duration, Instant};

use slippi_authproxy_eventbus::LifecycleEvent;
use slippi_authproxy_gg_api::APIClient;
use slippi_authproxy_shared_types::BotIdentity;
use thiserror::Error;

use crate::config::WorkerConfig;
use crate::enet::{EnetClient, HostCreateError, PeerConnectError, ReceiveError, Transport};
use crate::protocol::{
    resolve_opponent, CreateTicketRequest, CreateTicketResponse, GetTicketResponse, ResolvedOpponent, CREATE_TICKET_RESP, GET_TICKET_RESP,
};
use crate::version::VersionLookup;

const BASE_UDP_PORT: u16 = 41000;

const CHANNEL_ID: u8 = 0;

// Initializing binds its host with room for the matchmaking server alone, and opens the
// peer to it with 3 channels, per spec.md's literal "capacity 1 peer, 3 channels".
const CHANNEL_LIMIT: usize = 3;
const PEER_LIMIT: usize = 1;

// ConnectionSuccess rebinds with room for 10 peers (spec.md's literal capacity for the
// opponent-handshake host), keeping the same channel count as the matchmaking-server peer.
const OPPONENT_PEER_LIMIT: usize = 10;

const HOST_CREATE_RETRIES: usize = 15;
const MM_CONNECT_RETRIES: usize = 20;
const MM_CONNECT_INTERVAL: Duration = Duration::from_millis(500);

const CREATE_TICKET_DEADLINE_MS: u64 = 5000;
const TICKET_POLL_DEADLINE_MS: u64 = 2000;

const OPPONENT_CONNECT_RETRIES: usize = 15;
const OPPONENT_CONNECT_INTERVAL: Duration = Duration::from_millis(500);

/// Any error that can terminate a job before the opponent is resolved (and
/// `Authenticated` is emitted) or the search deadline elapses.
#[derive(Debug, Error)]
pub enum JobError {
    #[error(transparent)]
    FetchVersion(#[from] slippi_authproxy_gg_api::FetchVersionError),

    #[error("the version-metadata lookup thread panicked")]
    VersionFetchPanicked,

    #[error(transparent)]
    HostCreate(#[from] HostCreateError),

    #[error(transparent)]
    PeerConnect(#[from] PeerConnectError),

    #[error(transparent)]
    Receive(#[from] ReceiveError),

    #[error(transparent)]
    Serialize(#[from] serde_json::Error),

    #[error("expected a `{expected}` response, got `{actual}`")]
    UnexpectedResponseType { expected: &'static str, actual: String },

    #[error("upstream matchmaking service rejected the ticket: {0}")]
    TicketRejected(String),

    #[error("matchmaking host {host}:{port} did not resolve to a socket address")]
    UnresolvableHost { host: String, port: u16 },

    #[error("the search deadline elapsed before a match was found")]
    DeadlineElapsed,
}

/// Drives a single `BotIdentity` through one authentication job at a time. A worker is
/// stateless between jobs — `run()` owns every resource (HTTP client, ENet host) it
/// needs and tears them all down before returning.
///
/// Generic over the reliable-UDP transport (`T`) and the version-metadata lookup
/// (`V`) so tests can script both; the proxy binary always uses the defaults,
/// `EnetClient` and `APIClient`.
pub struct MatchmakingWorker<T: Transport = EnetClient, V: VersionLookup = APIClient> {
    id: usize,
    identity: BotIdentity,
    config: WorkerConfig,
    version_lookup: V,
    _transport: std::marker::PhantomData<T>,
}

impl<T: Transport, V: VersionLookup> MatchmakingWorker<T, V> {
    pub fn new(id: usize, identity: BotIdentity, config: WorkerConfig, version_lookup: V) -> Self {
        Self { id, identity, config, version_lookup, _transport: std::marker::PhantomData }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn bot_connect_code(&self) -> &str {
        &self.identity.connect_code
    }

    /// Runs one job to completion, emitting exactly one `Searching` event followed by
    /// exactly one of `Authenticated` / `Timeout` / `SlippiError`.
    ///
    /// `timeout_ms` bounds the whole ticket-creation/polling phase; once a match is
    /// found and the opponent handshake begins, the job runs to completion regardless
    /// of how much of the deadline remains — the deadline bounds *searching*, not the
    /// final handshake. `Authenticated` is emitted by `drive()` itself, the moment the
    /// opponent is resolved from the ticket, so it can never race a second terminal
    /// event raised by the handshake that follows.
    pub fn run(&self, target_connect_code: &str, timeout_ms: u64, requester_id: u64, emit: impl Fn(LifecycleEvent)) {
        emit(LifecycleEvent::Searching {
            requester_id,
            bot_connect_code: self.identity.connect_code.clone(),
            target_connect_code: target_connect_code.to_string(),
        });

        tracing::info!(worker = self.id, requester_id, target_connect_code, "starting matchmaking job");

        let deadline = Instant::now() + Duration::from_millis(timeout_ms);

        match self.drive(target_connect_code, requester_id, deadline, &emit) {
            // `Authenticated` was already emitted inside `drive()`.
            Ok(()) => {},

            Err(JobError::DeadlineElapsed) => {
                tracing::warn!(worker = self.id, requester_id, "job timed out before a match was found");
                emit(LifecycleEvent::Timeout { requester_id, target_connect_code: target_connect_code.to_string() });
            },

            Err(error) => {
                tracing::warn!(worker = self.id, requester_id, %error, "matchmaking job failed");
                emit(LifecycleEvent::SlippiError { requester_id, target_connect_code: target_connect_code.to_string() });
            },
        }
    }

    /// `Initializing` + `Matchmaking` + `ConnectionSuccess` in one straight-line pass.
    /// Each upstream call is checked against `deadline` before it's attempted; once a
    /// match is resolved the deadline no longer applies.
    fn drive(
        &self,
        target_connect_code: &str,
        requester_id: u64,
        deadline: Instant,
        emit: &impl Fn(LifecycleEvent),
    ) -> Result<(), JobError> {
        // --- Initializing ---
        if Instant::now() >= deadline {
            return Err(JobError::DeadlineElapsed);
        }

        // The version lookup doesn't depend on the ENet host at all, so it's kicked
        // off on its own thread here and only joined once `latestVersion` is actually
        // needed for the ticket body below — it overlaps with binding and connecting
        // the host instead of blocking in front of them.
        let version_lookup = self.version_lookup.clone();
        let api_base_url = self.config.api_base_url.clone();
        let uid = self.identity.uid.clone();
        let version_handle = std::thread::spawn(move || version_lookup.fetch_latest_version(&api_base_url, &uid));

        let local_port = BASE_UDP_PORT + self.id as u16;
        let mut host = T::bind(local_port, PEER_LIMIT, CHANNEL_LIMIT, HOST_CREATE_RETRIES)?;

        let mm_addr = (self.config.mm_host.as_str(), self.config.mm_port)
            .to_socket_addrs()
            .ok()
            .and_then(|mut addrs| addrs.next())
            .ok_or_else(|| JobError::UnresolvableHost { host: self.config.mm_host.clone(), port: self.config.mm_port })?;

        host.connect_and_wait(mm_addr, CHANNEL_LIMIT, MM_CONNECT_RETRIES, MM_CONNECT_INTERVAL)?;

        let bound_port = host.local_port();

        let latest_version = match version_handle.join() {
            Ok(result) => result?,
            Err(_) => {
                host.terminate();
                return Err(JobError::VersionFetchPanicked);
            },
        };

        let request =
            CreateTicketRequest::new(&self.identity.uid, &self.identity.play_key, target_connect_code, &latest_version, bound_port);
        host.send_json(CHANNEL_ID, &request)?;

        if Instant::now() >= deadline {
            host.terminate();
            return Err(JobError::DeadlineElapsed);
        }

        let create_resp: CreateTicketResponse = host.receive(CREATE_TICKET_DEADLINE_MS)?;
        if create_resp.kind != CREATE_TICKET_RESP {
            host.terminate();
            return Err(JobError::UnexpectedResponseType { expected: CREATE_TICKET_RESP, actual: create_resp.kind });
        }
        if let Some(error) = create_resp.error {
            host.terminate();
            return Err(JobError::TicketRejected(error));
        }

        // --- Matchmaking ---
        let resolved = loop {
            if Instant::now() >= deadline {
                host.terminate();
                return Err(JobError::DeadlineElapsed);
            }

            let ticket: GetTicketResponse = match host.receive(TICKET_POLL_DEADLINE_MS) {
                Ok(ticket) => ticket,

                // No ticket assigned yet; this is expected while waiting in queue, not
                // a failure — keep polling until the overall deadline elapses.
                Err(ReceiveError::Timeout) => continue,

                Err(error) => {
                    host.terminate();
                    return Err(error.into());
                },
            };

            if ticket.kind != GET_TICKET_RESP {
                host.terminate();
                return Err(JobError::UnexpectedResponseType { expected: GET_TICKET_RESP, actual: ticket.kind });
            }

            if let Some(error) = ticket.error {
                host.terminate();
                return Err(JobError::TicketRejected(error));
            }

            let opponent = ticket
                .players
                .iter()
                .find(|player| player.connect_code == target_connect_code)
                .and_then(resolve_opponent);

            if let Some(opponent) = opponent {
                break opponent;
            }
        };

        host.terminate();

        // --- ConnectionSuccess ---
        // The opponent is resolved — the job is authenticated from here regardless of
        // whether the handshake that follows actually succeeds. Emit `Authenticated`
        // now, then attempt the handshake unconditionally and swallow its outcome:
        // per the literal step order this is modeled on, nothing past a resolved
        // ticket produces a second terminal event.
        emit(LifecycleEvent::Authenticated {
            requester_id,
            target_connect_code: target_connect_code.to_string(),
            user_name: resolved.user_name.clone(),
            user_ip: resolved.host.clone(),
        });

        self.attempt_opponent_handshake(&resolved, bound_port);

        Ok(())
    }

    /// Opens a direct peer connection to the opponent to confirm they're reachable,
    /// then tears it down. Reuses the same local port the matchmaking-server peer was
    /// bound to — that host has already been torn down by the time this runs, and the
    /// worker owns the port exclusively for the rest of the job regardless.
    ///
    /// Failures here are logged, not propagated: `Authenticated` has already been
    /// emitted by the time this is called.
    fn attempt_opponent_handshake(&self, resolved: &ResolvedOpponent, local_port: u16) {
        let opponent_addr = match (resolved.host.as_str(), resolved.port).to_socket_addrs().ok().and_then(|mut addrs| addrs.next()) {
            Some(addr) => addr,
            None => {
                tracing::warn!(worker = self.id, host = %resolved.host, port = resolved.port, "opponent address did not resolve");
                return;
            },
        };

        let mut opponent_host = match T::bind(local_port, OPPONENT_PEER_LIMIT, CHANNEL_LIMIT, HOST_CREATE_RETRIES) {
            Ok(host) => host,
            Err(error) => {
                tracing::warn!(worker = self.id, %error, "failed to bind opponent handshake host");
                return;
            },
        };

        if let Err(error) = opponent_host.connect_and_wait(opponent_addr, CHANNEL_LIMIT, OPPONENT_CONNECT_RETRIES, OPPONENT_CONNECT_INTERVAL)
        {
            tracing::warn!(worker = self.id, %error, "opponent handshake failed after authentication was already confirmed");
        }

        opponent_host.terminate();
    }
}

#[cfg(test)]
mod tests {
    use std::cell::{Cell, RefCell};
    use std::collections::VecDeque;
    use std::net::SocketAddr;
    use std::sync::{Arc, Mutex};

    use super::*;

    /// One scripted reply to a `Transport::receive` call.
    enum ScriptedReceive {
        Json(String),
        Timeout,
    }

    /// One scripted `Transport::bind()` outcome. `drive()` binds a host twice per job
    /// that reaches `ConnectionSuccess` (the matchmaking-server peer, then the
    /// opponent peer), so a scenario queues one `MockHost` per bind it expects.
    struct MockHost {
        connect_ok: bool,
        receives: VecDeque<ScriptedReceive>,
    }

    /// A recorded `Transport::bind()` call, so tests can assert the spec-mandated
    /// peer/channel capacities were actually passed through rather than just ignored.
    #[derive(Debug, Clone, Copy, PartialEq)]
    struct BindCall {
        port: u16,
        peer_limit: usize,
        channel_limit: usize,
    }

    thread_local! {
        static PENDING_HOSTS: RefCell<VecDeque<MockHost>> = RefCell::new(VecDeque::new());
        static LAST_BOUND_PORT: Cell<u16> = const { Cell::new(0) };
        static BIND_CALLS: RefCell<Vec<BindCall>> = const { RefCell::new(Vec::new()) };
        static CONNECT_CHANNEL_COUNTS: RefCell<Vec<usize>> = const { RefCell::new(Vec::new()) };
    }

    fn queue_host(host: MockHost) {
        PENDING_HOSTS.with(|cell| cell.borrow_mut().push_back(host));
    }

    fn recorded_bind_calls() -> Vec<BindCall> {
        BIND_CALLS.with(|cell| cell.borrow().clone())
    }

    fn recorded_connect_channel_counts() -> Vec<usize> {
        CONNECT_CHANNEL_COUNTS.with(|cell| cell.borrow().clone())
    }

    struct MockTransport {
        local_port: u16,
        connect_ok: bool,
        receives: RefCell<VecDeque<ScriptedReceive>>,
    }

    impl Transport for MockTransport {
        fn bind(port: u16, peer_limit: usize, channel_limit: usize, _retries: usize) -> Result<Self, HostCreateError> {
            LAST_BOUND_PORT.with(|cell| cell.set(port));
            BIND_CALLS.with(|cell| cell.borrow_mut().push(BindCall { port, peer_limit, channel_limit }));

            let host = PENDING_HOSTS
                .with(|cell| cell.borrow_mut().pop_front())
                .expect("test scenario did not queue enough MockHosts for the binds drive() makes");

            Ok(Self { local_port: port, connect_ok: host.connect_ok, receives: RefCell::new(host.receives) })
        }

        fn local_port(&self) -> u16 {
            self.local_port
        }

        fn connect_and_wait(
            &mut self,
            _remote: SocketAddr,
            channel_count: usize,
            _max_attempts: usize,
            _interval: Duration,
        ) -> Result<(), PeerConnectError> {
            CONNECT_CHANNEL_COUNTS.with(|cell| cell.borrow_mut().push(channel_count));

            if self.connect_ok {
                Ok(())
            } else {
                Err(PeerConnectError::Exhausted)
            }
        }

        fn send_json<M: serde::Serialize>(&mut self, _channel_id: u8, _message: &M) -> Result<(), serde_json::Error> {
            Ok(())
        }

        fn receive<M: serde::de::DeserializeOwned>(&mut self, _timeout_ms: u64) -> Result<M, ReceiveError> {
            match self.receives.borrow_mut().pop_front() {
                Some(ScriptedReceive::Json(json)) => serde_json::from_str(&json).map_err(ReceiveError::Deserialize),
                Some(ScriptedReceive::Timeout) => Err(ReceiveError::Timeout),
                None => Err(ReceiveError::Timeout),
            }
        }

        fn terminate(self) {}
    }

    #[derive(Clone)]
    struct MockVersionLookup(String);

    impl VersionLookup for MockVersionLookup {
        fn fetch_latest_version(&self, _api_base_url: &str, _uid: &str) -> Result<String, slippi_authproxy_gg_api::FetchVersionError> {
            Ok(self.0.clone())
        }
    }

    fn identity() -> BotIdentity {
        BotIdentity { uid: "uid-1".into(), play_key: "key-1".into(), connect_code: "BOT#001".into() }
    }

    fn config() -> WorkerConfig {
        WorkerConfig::new("mm.example.test", 43113, "https://example.test/version", "3.5.1")
    }

    fn worker(id: usize) -> MatchmakingWorker<MockTransport, MockVersionLookup> {
        MatchmakingWorker::new(id, identity(), config(), MockVersionLookup("3.5.1".into()))
    }

    fn collect_events(worker: &MatchmakingWorker<MockTransport, MockVersionLookup>, target: &str, timeout_ms: u64) -> Vec<LifecycleEvent> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = Arc::clone(&seen);
        worker.run(target, timeout_ms, 7, move |event| seen_clone.lock().unwrap().push(event));
        Arc::try_unwrap(seen).unwrap().into_inner().unwrap()
    }

    fn get_ticket_resp(players: &str) -> String {
        format!(r#"{{"type":"get-ticket-resp","latestVersion":"3.5.1","players":{players}}}"#)
    }

    /// S1: a happy-path job — ticket accepted, opponent shows up in the first poll,
    /// opponent handshake succeeds. Exactly `Searching` then `Authenticated`.
    #[test]
    fn s1_happy_path_emits_authenticated() {
        queue_host(MockHost {
            connect_ok: true,
            receives: VecDeque::from([
                ScriptedReceive::Json(r#"{"type":"create-ticket-resp"}"#.to_string()),
                ScriptedReceive::Json(get_ticket_resp(
                    r#"[{"connectCode":"OPP#042","ipAddress":"203.0.113.5:54321","displayName":"Alice"}]"#,
                )),
            ]),
        });
        queue_host(MockHost { connect_ok: true, receives: VecDeque::new() });

        let events = collect_events(&worker(0), "OPP#042", 5000);

        assert_eq!(events.len(), 2);
        assert!(matches!(&events[0], LifecycleEvent::Searching { .. }));
        match &events[1] {
            LifecycleEvent::Authenticated { user_name, user_ip, .. } => {
                assert_eq!(user_name, "Alice");
                assert_eq!(user_ip, "203.0.113.5");
            },
            other => panic!("expected Authenticated, got {other:?}"),
        }
    }

    /// Regression for the literal capacities spec.md mandates: the Initializing bind
    /// is `1` peer / `3` channels, and the ConnectionSuccess rebind is `10` peers / `3`
    /// channels — not whatever values happen to be convenient.
    #[test]
    fn binds_and_connects_with_the_spec_mandated_capacities() {
        queue_host(MockHost {
            connect_ok: true,
            receives: VecDeque::from([
                ScriptedReceive::Json(r#"{"type":"create-ticket-resp"}"#.to_string()),
                ScriptedReceive::Json(get_ticket_resp(
                    r#"[{"connectCode":"OPP#042","ipAddress":"203.0.113.5:54321","displayName":"Alice"}]"#,
                )),
            ]),
        });
        queue_host(MockHost { connect_ok: true, receives: VecDeque::new() });

        let _ = collect_events(&worker(0), "OPP#042", 5000);

        let binds = recorded_bind_calls();
        assert_eq!(binds.len(), 2, "drive() should bind exactly twice: matchmaking-server host, then opponent host");
        assert_eq!(binds[0], BindCall { port: 41000, peer_limit: 1, channel_limit: 3 });
        assert_eq!(binds[1], BindCall { port: 41000, peer_limit: 10, channel_limit: 3 });

        assert_eq!(recorded_connect_channel_counts(), vec![3, 3]);
    }

    /// Regression for the "always connected" bug: if the opponent handshake itself
    /// never gets a `Connect` event, `Authenticated` is still the terminal event — it
    /// was already emitted once the ticket resolved — and no second event follows.
    #[test]
    fn opponent_handshake_failure_does_not_add_a_second_event() {
        queue_host(MockHost {
            connect_ok: true,
            receives: VecDeque::from([
                ScriptedReceive::Json(r#"{"type":"create-ticket-resp"}"#.to_string()),
                ScriptedReceive::Json(get_ticket_resp(
                    r#"[{"connectCode":"OPP#042","ipAddress":"203.0.113.5:54321","displayName":"Alice"}]"#,
                )),
            ]),
        });
        queue_host(MockHost { connect_ok: false, receives: VecDeque::new() });

        let events = collect_events(&worker(0), "OPP#042", 5000);

        assert_eq!(events.len(), 2);
        assert!(matches!(&events[1], LifecycleEvent::Authenticated { .. }));
    }

    /// S2: the ticket poll never turns up the requested opponent before the deadline.
    #[test]
    fn s2_deadline_elapses_while_polling_emits_timeout() {
        let mut receives = VecDeque::new();
        receives.push_back(ScriptedReceive::Json(r#"{"type":"create-ticket-resp"}"#.to_string()));
        for _ in 0..20 {
            receives.push_back(ScriptedReceive::Json(get_ticket_resp("[]")));
        }
        queue_host(MockHost { connect_ok: true, receives });

        let events = collect_events(&worker(1), "OPP#042", 50);

        assert_eq!(events.len(), 2);
        assert!(matches!(&events[0], LifecycleEvent::Searching { .. }));
        assert!(matches!(&events[1], LifecycleEvent::Timeout { .. }));
    }

    /// S3: the upstream matchmaking service rejects the ticket outright.
    #[test]
    fn s3_ticket_rejected_emits_slippi_error() {
        queue_host(MockHost {
            connect_ok: true,
            receives: VecDeque::from([ScriptedReceive::Json(r#"{"type":"create-ticket-resp","error":"banned"}"#.to_string())]),
        });

        let events = collect_events(&worker(2), "OPP#042", 5000);

        assert_eq!(events.len(), 2);
        assert!(matches!(&events[1], LifecycleEvent::SlippiError { .. }));
    }

    /// Regression for the response-type check: a poll slot that carries the wrong
    /// `type` is treated as an error rather than ignored or treated as if it matched.
    #[test]
    fn wrong_response_type_emits_slippi_error() {
        queue_host(MockHost {
            connect_ok: true,
            receives: VecDeque::from([ScriptedReceive::Json(r#"{"type":"some-other-message"}"#.to_string())]),
        });

        let events = collect_events(&worker(3), "OPP#042", 5000);

        assert_eq!(events.len(), 2);
        assert!(matches!(&events[1], LifecycleEvent::SlippiError { .. }));
    }

    /// Regression for the fixed-port requirement: the worker binds `41000 + id`, not
    /// an ephemeral port, so the same job can be re-run (and a crashed worker's port
    /// reclaimed) deterministically.
    #[test]
    fn binds_the_fixed_port_for_its_worker_id() {
        queue_host(MockHost {
            connect_ok: true,
            receives: VecDeque::from([ScriptedReceive::Json(r#"{"type":"create-ticket-resp","error":"banned"}"#.to_string())]),
        });

        let _ = collect_events(&worker(5), "OPP#042", 5000);

        assert_eq!(LAST_BOUND_PORT.with(|cell| cell.get()), 41005);
    }
}
