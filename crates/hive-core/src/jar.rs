//! Orchestration state machine for one fleet-wide command invocation.
//!
//! A jar owns an ordered queue of *starters* (one request per target: the master first, then every live worker)
//! and a list of armed *stoppers* (one completion predicate per started target).
//!
//! ```text
//! handle() → next_starter() ─┬─ parallel: arm all stoppers, fire all starters
//!                            └─ serial:   arm one stopper, fire its starter
//! notify(signal) → satisfied stoppers write output → list empty → next_starter()
//! queue empty → destroy(Completed)         budget elapsed → destroy(TimedOut)
//! ```
use std::{collections::VecDeque, fmt, time::{Duration, Instant}};

use tracing::{debug, trace, warn};

use hive_model::{Command, CorrelationId, Signal, SignalType, WorkerKey};

use crate::{sink::ResponseSink, supervisor::WorkerChannel};

/// Action that sends one request to one target.
pub type StartFn = Box<dyn FnOnce() + Send>;

/// Observer fired once when a jar is destroyed.
pub type DestroyFn = Box<dyn FnOnce(&JarReport) + Send>;

/// The jar's view of the master: its own answer logic and the live worker set.
pub trait Fleet {
    /// Starter that makes the master answer `request` for itself.
    fn master_starter(&self, request: Signal) -> StartFn;

    /// Visit every live worker in slot order.
    fn each_worker(&self, f: &mut dyn FnMut(&WorkerKey, &WorkerChannel));
}

/// Scheduling parameters of a jar.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct JarParams {
    pub parallel: bool,
    pub budget: Duration,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JarState {
    Running,
    Destroyed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DestroyReason {
    Completed,
    TimedOut,
}

impl fmt::Display for DestroyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DestroyReason::Completed => f.write_str("completed"),
            DestroyReason::TimedOut => f.write_str("timed out"),
        }
    }
}

/// Summary handed to the destroy observer.
#[derive(Clone, Debug)]
pub struct JarReport {
    pub id: CorrelationId,
    pub command: Command,
    pub reason: DestroyReason,
    /// Targets that were never started or never confirmed.
    pub pending: usize,
    pub elapsed: Duration,
}

/// Recipient of a starter's request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Target {
    Master,
    Worker(WorkerKey),
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Master => f.write_str("master"),
            Target::Worker(key) => write!(f, "worker {key}"),
        }
    }
}

struct Starter {
    target: Target,
    request: SignalType,
    run: StartFn,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    AwaitingAck,
    AwaitingReady,
}

#[derive(Debug)]
enum StopperKind {
    /// Done on the first matching response.
    Single { expect: SignalType },
    /// Done on the acknowledgement followed by the same worker's `ready`.
    TwoPhase { ack: SignalType, phase: Phase },
}

#[derive(Debug)]
struct Stopper {
    target: Target,
    kind: StopperKind,
}

impl Stopper {
    fn arm(request: SignalType, target: Target) -> Option<Self> {
        let kind = match request {
            SignalType::MasterStatusReq => StopperKind::Single {
                expect: SignalType::MasterStatusRes,
            },
            SignalType::MasterRestartReq => StopperKind::Single {
                expect: SignalType::MasterRestartRes,
            },
            SignalType::MasterReloadReq => StopperKind::Single {
                expect: SignalType::MasterReloadRes,
            },
            SignalType::WorkerStatusReq => StopperKind::Single {
                expect: SignalType::WorkerStatusRes,
            },
            SignalType::WorkerRestartReq => StopperKind::TwoPhase {
                ack: SignalType::WorkerRestartRes,
                phase: Phase::AwaitingAck,
            },
            SignalType::WorkerReloadReq => StopperKind::TwoPhase {
                ack: SignalType::WorkerReloadRes,
                phase: Phase::AwaitingAck,
            },
            _ => return None,
        };
        Some(Self { target, kind })
    }

    fn is_from_target(&self, signal: &Signal) -> bool {
        match &self.target {
            Target::Master => true,
            Target::Worker(key) => signal.worker().is_some_and(|w| &w.key == key),
        }
    }

    /// Returns `true` once the target is done for this command.
    fn check(&mut self, signal: &Signal) -> bool {
        let from_target = self.is_from_target(signal);
        match &mut self.kind {
            StopperKind::Single { expect } => from_target && signal.kind() == *expect,
            StopperKind::TwoPhase { ack, phase } => match phase {
                Phase::AwaitingAck => {
                    if from_target && signal.kind() == *ack {
                        *phase = Phase::AwaitingReady;
                    }
                    false
                }
                Phase::AwaitingReady => from_target && signal.kind() == SignalType::WorkerReady,
            },
        }
    }
}

pub struct CommandJar {
    id: CorrelationId,
    command: Command,
    params: JarParams,
    created: Instant,
    starters: VecDeque<Starter>,
    stoppers: Vec<Stopper>,
    sink: ResponseSink,
    on_destroy: Option<DestroyFn>,
    destroyed: bool,
}

impl CommandJar {
    pub fn new(command: Command, params: JarParams, sink: ResponseSink) -> Self {
        Self {
            id: CorrelationId::generate(),
            command,
            params,
            created: Instant::now(),
            starters: VecDeque::new(),
            stoppers: Vec::new(),
            sink,
            on_destroy: None,
            destroyed: false,
        }
    }

    #[inline]
    pub fn id(&self) -> &CorrelationId {
        &self.id
    }

    #[inline]
    pub fn command(&self) -> Command {
        self.command
    }

    #[inline]
    pub fn params(&self) -> JarParams {
        self.params
    }

    /// Register the observer fired by the first effective [`CommandJar::destroy`].
    pub fn on_destroy(&mut self, f: DestroyFn) {
        self.on_destroy = Some(f);
    }

    pub fn state(&self) -> JarState {
        if self.destroyed {
            JarState::Destroyed
        } else {
            JarState::Running
        }
    }

    /// Starters not fired yet.
    pub fn queued_starters(&self) -> usize {
        self.starters.len()
    }

    /// Targets started but not yet confirmed.
    pub fn armed_stoppers(&self) -> usize {
        self.stoppers.len()
    }

    /// Build the fan-out plan (master first, then every live worker) and fire the first starter(s).
    pub fn handle(&mut self, fleet: &dyn Fleet) -> JarState {
        debug!(
            command = %self.command,
            id = %self.id,
            parallel = self.params.parallel,
            budget_ms = self.params.budget.as_millis() as u64,
            "processing command"
        );

        let master_request = self.command.master_request();
        let worker_request = self.command.worker_request();

        self.starters.push_back(Starter {
            target: Target::Master,
            request: master_request,
            run: fleet.master_starter(Signal::new(master_request, Some(self.id.clone()))),
        });

        let id = &self.id;
        let starters = &mut self.starters;
        fleet.each_worker(&mut |key, channel| {
            let signal = Signal::new(worker_request, Some(id.clone()));
            let channel = channel.clone();
            let worker = key.clone();
            starters.push_back(Starter {
                target: Target::Worker(key.clone()),
                request: worker_request,
                run: Box::new(move || {
                    if let Err(e) = channel.send(signal) {
                        warn!(%worker, error = %e, "request not delivered");
                    }
                }),
            });
        });

        self.next_starter();
        self.state()
    }

    /// Feed an incoming signal to the armed stoppers.
    ///
    /// Signals carrying another jar's correlation id are ignored; broadcast signals are considered by every jar.
    pub fn notify(&mut self, signal: &Signal) -> JarState {
        if self.destroyed {
            return JarState::Destroyed;
        }
        let id = signal.correlation_id();
        if !id.is_broadcast() && *id != self.id {
            return JarState::Running;
        }

        let before = self.stoppers.len();
        self.stoppers.retain_mut(|stopper| !stopper.check(signal));
        let satisfied = before - self.stoppers.len();
        for _ in 0..satisfied {
            self.write_section(signal);
        }
        trace!(
            command = %self.command,
            id = %self.id,
            kind = %signal.kind(),
            pending = self.stoppers.len(),
            "signal evaluated"
        );

        if satisfied > 0 && self.stoppers.is_empty() {
            self.next_starter();
        }
        self.state()
    }

    /// Tear the jar down: close the response stream and fire the observer.
    ///
    /// Returns `true` only for the first call; later calls are no-ops.
    pub fn destroy(&mut self, reason: DestroyReason) -> bool {
        if self.destroyed {
            return false;
        }
        self.destroyed = true;

        let pending = self.stoppers.len() + self.starters.len();
        debug!(command = %self.command, id = %self.id, %reason, pending, "destroying command jar");

        if reason == DestroyReason::TimedOut {
            self.sink.write(format!(
                "!! '{}' timed out after {} ms, {} target(s) did not confirm\n",
                self.command,
                self.params.budget.as_millis(),
                pending
            ));
        }
        self.sink.close();
        self.starters.clear();
        self.stoppers.clear();

        if let Some(observer) = self.on_destroy.take() {
            observer(&JarReport {
                id: self.id.clone(),
                command: self.command,
                reason,
                pending,
                elapsed: self.created.elapsed(),
            });
        }
        true
    }

    fn next_starter(&mut self) {
        loop {
            if self.starters.is_empty() {
                debug!(command = %self.command, id = %self.id, "processed all starters");
                self.destroy(DestroyReason::Completed);
                return;
            }

            if self.params.parallel {
                let mut runs = Vec::with_capacity(self.starters.len());
                for Starter { target, request, run } in self.starters.drain(..) {
                    match Stopper::arm(request, target) {
                        Some(stopper) => {
                            self.stoppers.push(stopper);
                            runs.push(run);
                        }
                        None => warn!(%request, "unhandled signal type, starter skipped"),
                    }
                }
                for run in runs {
                    run();
                }
            } else if let Some(Starter { target, request, run }) = self.starters.pop_front() {
                trace!(command = %self.command, id = %self.id, %target, queued = self.starters.len(), "starting target");
                match Stopper::arm(request, target) {
                    Some(stopper) => {
                        self.stoppers.push(stopper);
                        run();
                    }
                    None => warn!(%request, "unhandled signal type, starter skipped"),
                }
            }

            if !self.stoppers.is_empty() {
                return;
            }
        }
    }

    fn write_section(&mut self, signal: &Signal) {
        let label = if signal.kind().is_master_directed() {
            "MASTER".to_string()
        } else {
            match signal.worker() {
                Some(worker) => format!("WORKER[{}]", worker.index),
                None => "WORKER".to_string(),
            }
        };

        let mut text = format!(":: {label} ::");
        for line in signal.payload().map(|p| p.messages.as_slice()).unwrap_or_default() {
            text.push_str("\n\t");
            text.push_str(line);
        }
        text.push('\n');
        self.sink.write(text);
    }
}

impl fmt::Debug for CommandJar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandJar")
            .field("id", &self.id)
            .field("command", &self.command)
            .field("params", &self.params)
            .field("starters", &self.starters.len())
            .field("stoppers", &self.stoppers)
            .field("destroyed", &self.destroyed)
            .finish()
    }
}
