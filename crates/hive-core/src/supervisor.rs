use std::{sync::Arc, time::Duration};

use tokio::sync::mpsc;
use tracing::{debug, error, info, instrument, warn};

use hive_model::{Event, EventKind, Signal, WorkerKey, WorkerParams};

use crate::{bus::Bus, error::CoreError, master::MasterHandle};

/// Master-side handle to one worker process.
#[derive(Clone, Debug)]
pub struct WorkerChannel {
    tx: mpsc::UnboundedSender<Signal>,
    pid: Option<u32>,
}

impl WorkerChannel {
    pub fn new(tx: mpsc::UnboundedSender<Signal>, pid: Option<u32>) -> Self {
        Self { tx, pid }
    }

    /// Queue a signal for the worker's writer task.
    pub fn send(&self, signal: Signal) -> Result<(), CoreError> {
        self.tx
            .send(signal)
            .map_err(|e| CoreError::ChannelClosed(e.0.kind().to_string()))
    }

    #[inline]
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }
}

/// Creates worker processes.
///
/// An implementation must report the end of the spawned process with [`MasterHandle::worker_exited`]
/// using the same `key` and `generation`, and forward every parsed worker signal with [`MasterHandle::signal`].
pub trait WorkerSpawner: Send + Sync + 'static {
    fn spawn(
        &self,
        key: &WorkerKey,
        params: &WorkerParams,
        generation: u64,
        master: MasterHandle,
    ) -> Result<WorkerChannel, CoreError>;
}

#[derive(Debug)]
struct WorkerSlot {
    key: WorkerKey,
    params: WorkerParams,
    generation: u64,
    channel: Option<WorkerChannel>,
}

/// Owner of the worker pool: fork, exit detection, respawn.
pub struct Supervisor {
    slots: Vec<WorkerSlot>,
    spawner: Arc<dyn WorkerSpawner>,
    master: MasterHandle,
    respawn_delay: Duration,
    bus: Bus,
}

impl Supervisor {
    /// Build one slot per entry of `params`; nothing is forked yet.
    pub fn new(
        params: Vec<WorkerParams>,
        spawner: Arc<dyn WorkerSpawner>,
        master: MasterHandle,
        respawn_delay: Duration,
        bus: Bus,
    ) -> Result<Self, CoreError> {
        let mut slots = Vec::with_capacity(params.len());
        for params in params {
            slots.push(WorkerSlot {
                key: params.key()?,
                params,
                generation: 0,
                channel: None,
            });
        }
        slots.sort_by_key(|s| s.params.index);
        Ok(Self {
            slots,
            spawner,
            master,
            respawn_delay,
            bus,
        })
    }

    /// Fork every slot.
    pub fn fork_all(&mut self) {
        info!(workers = self.slots.len(), "forking workers");
        for pos in 0..self.slots.len() {
            self.fork(pos);
        }
    }

    /// A worker process ended. Reports from replaced processes are ignored.
    #[instrument(level = "debug", skip(self, key), fields(worker = %key))]
    pub fn on_exit(&mut self, key: &WorkerKey, generation: u64, reason: &str) {
        let Some(pos) = self.position(key) else {
            warn!("exit reported for unknown worker");
            return;
        };
        let slot = &mut self.slots[pos];
        if slot.generation != generation {
            debug!(current = slot.generation, generation, "stale exit report ignored");
            return;
        }
        slot.channel = None;
        let index = slot.params.index;

        info!(index, reason, "worker exited");
        self.bus.publish(
            Event::new(EventKind::WorkerExited)
                .with_worker(index.to_string())
                .with_reason(reason),
        );
        self.schedule_respawn(pos);
    }

    /// Fork a slot again if it is still empty.
    pub fn respawn(&mut self, key: &WorkerKey) {
        match self.position(key) {
            Some(pos) if self.slots[pos].channel.is_none() => self.fork(pos),
            Some(_) => debug!(worker = %key, "respawn skipped, slot already live"),
            None => warn!(worker = %key, "respawn requested for unknown worker"),
        }
    }

    /// Visit live workers in slot order.
    pub fn each_worker(&self, f: &mut dyn FnMut(&WorkerKey, &WorkerChannel)) {
        for slot in &self.slots {
            if let Some(channel) = &slot.channel {
                f(&slot.key, channel);
            }
        }
    }

    pub fn live(&self) -> usize {
        self.slots.iter().filter(|s| s.channel.is_some()).count()
    }

    pub fn total(&self) -> usize {
        self.slots.len()
    }

    /// Drop every channel; the spawner's tasks take the processes down.
    pub fn release_all(&mut self) {
        for slot in &mut self.slots {
            slot.channel = None;
        }
    }

    fn position(&self, key: &WorkerKey) -> Option<usize> {
        self.slots.iter().position(|s| &s.key == key)
    }

    fn fork(&mut self, pos: usize) {
        let slot = &mut self.slots[pos];
        slot.generation += 1;
        let index = slot.params.index;

        match self
            .spawner
            .spawn(&slot.key, &slot.params, slot.generation, self.master.clone())
        {
            Ok(channel) => {
                info!(index, pid = channel.pid(), generation = slot.generation, "worker forked");
                slot.channel = Some(channel);
                self.bus
                    .publish(Event::new(EventKind::WorkerForked).with_worker(index.to_string()));
            }
            Err(e) => {
                error!(index, error = %e, "worker spawn failed");
                self.bus.publish(
                    Event::new(EventKind::WorkerSpawnFailed)
                        .with_worker(index.to_string())
                        .with_reason(e.to_string()),
                );
                self.schedule_respawn(pos);
            }
        }
    }

    fn schedule_respawn(&self, pos: usize) {
        let slot = &self.slots[pos];
        let key = slot.key.clone();
        let delay = self.respawn_delay;
        let master = self.master.clone();

        debug!(index = slot.params.index, delay_ms = delay.as_millis() as u64, "respawn scheduled");
        self.bus.publish(
            Event::new(EventKind::WorkerRespawnScheduled).with_worker(slot.params.index.to_string()),
        );
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            master.respawn(key);
        });
    }
}

#[cfg(test)]
mod tests {
    use std::{
        path::PathBuf,
        sync::{Arc, Mutex},
    };

    use hive_model::{SignalType, WorkerEndpoint};

    use super::*;
    use crate::master::MasterEvent;

    #[derive(Default)]
    struct FakeSpawner {
        spawned: Mutex<Vec<(usize, u64)>>,
        fail_first: Mutex<bool>,
        inboxes: Mutex<Vec<mpsc::UnboundedReceiver<Signal>>>,
    }

    impl WorkerSpawner for FakeSpawner {
        fn spawn(
            &self,
            _key: &WorkerKey,
            params: &WorkerParams,
            generation: u64,
            _master: MasterHandle,
        ) -> Result<WorkerChannel, CoreError> {
            let mut fail = self.fail_first.lock().unwrap();
            if *fail {
                *fail = false;
                return Err(CoreError::Spawn("no such file".into()));
            }
            self.spawned.lock().unwrap().push((params.index, generation));
            let (tx, rx) = mpsc::unbounded_channel();
            self.inboxes.lock().unwrap().push(rx);
            Ok(WorkerChannel::new(tx, Some(1000 + params.index as u32)))
        }
    }

    fn params(n: usize) -> Vec<WorkerParams> {
        (0..n)
            .map(|i| {
                WorkerParams::new(
                    WorkerEndpoint::Socket {
                        path: PathBuf::from(format!("/tmp/t.worker{i}.sock")),
                    },
                    i,
                )
            })
            .collect()
    }

    fn supervisor(
        n: usize,
        spawner: Arc<FakeSpawner>,
    ) -> (Supervisor, mpsc::UnboundedReceiver<MasterEvent>) {
        let (handle, inbox) = MasterHandle::channel();
        let sup = Supervisor::new(params(n), spawner, handle, Duration::from_millis(500), Bus::new()).unwrap();
        (sup, inbox)
    }

    fn keys(sup: &Supervisor) -> Vec<WorkerKey> {
        let mut out = Vec::new();
        sup.each_worker(&mut |key, _| out.push(key.clone()));
        out
    }

    #[tokio::test(start_paused = true)]
    async fn exit_triggers_respawn_with_same_params() {
        let spawner = Arc::new(FakeSpawner::default());
        let (mut sup, mut inbox) = supervisor(2, spawner.clone());
        sup.fork_all();
        assert_eq!(sup.live(), 2);
        let before = keys(&sup);

        sup.on_exit(&before[1], 1, "exit status: 1");
        assert_eq!(sup.live(), 1);

        match inbox.recv().await {
            Some(MasterEvent::Respawn { key }) => {
                assert_eq!(key, before[1]);
                sup.respawn(&key);
            }
            other => panic!("unexpected event: {other:?}"),
        }
        assert_eq!(sup.live(), 2);
        assert_eq!(keys(&sup), before);
        assert_eq!(*spawner.spawned.lock().unwrap(), vec![(0, 1), (1, 1), (1, 2)]);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_exit_is_ignored() {
        let spawner = Arc::new(FakeSpawner::default());
        let (mut sup, _inbox) = supervisor(1, spawner);
        sup.fork_all();
        let key = keys(&sup).remove(0);

        sup.on_exit(&key, 7, "old process");
        assert_eq!(sup.live(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn spawn_failure_is_retried() {
        let spawner = Arc::new(FakeSpawner::default());
        *spawner.fail_first.lock().unwrap() = true;
        let (mut sup, mut inbox) = supervisor(1, spawner);
        sup.fork_all();
        assert_eq!(sup.live(), 0);

        let Some(MasterEvent::Respawn { key }) = inbox.recv().await else {
            panic!("respawn expected");
        };
        sup.respawn(&key);
        assert_eq!(sup.live(), 1);
    }

    #[tokio::test]
    async fn channel_reaches_worker() {
        let spawner = Arc::new(FakeSpawner::default());
        let (mut sup, _inbox) = supervisor(1, spawner.clone());
        sup.fork_all();

        sup.each_worker(&mut |_, ch| ch.send(Signal::new(SignalType::WorkerStatusReq, None)).unwrap());
        let got = spawner.inboxes.lock().unwrap()[0].try_recv().unwrap();
        assert_eq!(got.kind(), SignalType::WorkerStatusReq);

        sup.release_all();
        assert_eq!(sup.live(), 0);
    }
}
