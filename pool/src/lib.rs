//! A fixed-size pool of matchmaking workers, one per roster entry. Incoming
//! `QueueCommand`s are dispatched to the first idle worker found; if none are idle, a
//! `NoReadyClient` lifecycle event is emitted immediately and the command is dropped.

use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use slippi_authproxy_eventbus::{CommandBus, EventBus, LifecycleEvent, QueueCommand};
use slippi_authproxy_gg_api::APIClient;
use slippi_authproxy_matchmaking::{MatchmakingWorker, WorkerConfig};
use slippi_authproxy_shared_types::{BotIdentity, Flag};

/// One pool slot: a worker plus the bookkeeping needed to know whether it's currently
/// running a job, and the handle of the thread it's running on (if any).
struct Slot {
    worker: Arc<MatchmakingWorker>,
    ready: Flag,
    handle: Mutex<Option<JoinHandle<()>>>,
}

/// Owns every `MatchmakingWorker` in the proxy and decides which one (if any) services
/// a given request.
pub struct WorkerPool {
    slots: Vec<Slot>,
    events: EventBus,
}

impl WorkerPool {
    /// Builds one worker per roster entry, all initially idle.
    pub fn new(roster: Vec<BotIdentity>, config: WorkerConfig, api_client: APIClient, events: EventBus) -> Self {
        let slots = roster
            .into_iter()
            .enumerate()
            .map(|(id, identity)| Slot {
                worker: Arc::new(MatchmakingWorker::new(id, identity, config.clone(), api_client.clone())),
                ready: Flag::new(true),
                handle: Mutex::new(None),
            })
            .collect();

        Self { slots, events }
    }

    pub fn size(&self) -> usize {
        self.slots.len()
    }

    /// Subscribes this pool to `commands`, dispatching every `QueueCommand` it
    /// receives. `self` must be wrapped in an `Arc` so the subscription closure can
    /// hand off work to a background thread.
    pub fn listen(self: &Arc<Self>, commands: &CommandBus) {
        let pool = Arc::clone(self);

        commands.subscribe(move |command: &QueueCommand| {
            pool.dispatch(command.clone());
        });
    }

    /// Finds the first idle worker and, if one exists, spawns a thread to run the job
    /// on it. If every worker is busy, emits `NoReadyClient` instead.
    pub fn dispatch(&self, command: QueueCommand) {
        self.reap_finished();

        let Some(slot) = self.find_ready_slot() else {
            tracing::warn!(requester_id = command.requester_id, "no idle worker available");
            self.events.emit(LifecycleEvent::NoReadyClient {
                requester_id: command.requester_id,
                target_connect_code: command.target_connect_code,
            });
            return;
        };

        slot.ready.set(false);

        let worker = Arc::clone(&slot.worker);
        let events = self.events.clone();
        let QueueCommand { requester_id, target_connect_code, timeout_ms } = command;
        let ready = slot.ready.clone();

        let handle = std::thread::spawn(move || {
            worker.run(&target_connect_code, timeout_ms, requester_id, |event| events.emit(event));
            ready.set(true);
        });

        *slot.handle.lock().expect("pool slot handle mutex poisoned") = Some(handle);
    }

    fn find_ready_slot(&self) -> Option<&Slot> {
        self.slots.iter().find(|slot| slot.ready.get())
    }

    /// Joins any thread whose worker has already flipped back to ready, reclaiming its
    /// `JoinHandle`. This never blocks: a busy worker's thread is simply left alone.
    fn reap_finished(&self) {
        for slot in &self.slots {
            if !slot.ready.get() {
                continue;
            }

            let mut guard = slot.handle.lock().expect("pool slot handle mutex poisoned");
            if let Some(handle) = guard.take() {
                if handle.is_finished() {
                    let _ = handle.join();
                } else {
                    *guard = Some(handle);
                }
            }
        }
    }
}
