//! # Dispatch Runtime
//!
//! Owns a [`RateUpgradeManager`] on a dedicated worker thread and feeds it one
//! command at a time from a bounded crossbeam channel. Host event sources, the
//! traffic poller and the signal monitor all enqueue through an
//! [`EventSender`]; none of them ever call into the manager directly.
//!
//! The channel is created by [`RuntimeBuilder`] before the manager exists so
//! collaborators can be handed a sender at construction time.
//!
//! Dropping the runtime shuts the worker down and tears every group down.

use std::sync::{Arc, Mutex};
use std::thread;

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};

use crate::error::{BandupError, Result, Teardown};
use crate::group::{GroupSpec, GroupStatus};
use crate::manager::RateUpgradeManager;
use crate::router::{Event, Outcome};

/// Queue depth used by [`RuntimeBuilder::default`].
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

enum Command {
    Event {
        event: Event,
        reply: Option<Sender<Result<Outcome>>>,
    },
    AddGroup {
        spec: GroupSpec,
        reply: Sender<Result<()>>,
    },
    Shutdown {
        reply: Sender<Teardown>,
    },
}

/// Error returned when an event cannot be queued without blocking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendError {
    Full,
    Disconnected,
}

/// Cloneable handle for queueing events to the dispatch thread.
#[derive(Clone)]
pub struct EventSender {
    tx: Sender<Command>,
}

impl EventSender {
    /// Queue an event, blocking while the queue is full.
    pub fn send(&self, event: Event) -> Result<()> {
        self.tx
            .send(Command::Event { event, reply: None })
            .map_err(|_| BandupError::RuntimeGone)
    }

    /// Queue an event without blocking.
    ///
    /// Background sources use this: they may be called while the dispatch
    /// thread is itself waiting on them (e.g. inside `TrafficPoller::stop`).
    pub fn try_send(&self, event: Event) -> std::result::Result<(), SendError> {
        match self.tx.try_send(Command::Event { event, reply: None }) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(SendError::Full),
            Err(TrySendError::Disconnected(_)) => Err(SendError::Disconnected),
        }
    }
}

impl std::fmt::Debug for EventSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventSender").field("queued", &self.tx.len()).finish()
    }
}

/// Creates the dispatch queue ahead of the manager.
pub struct RuntimeBuilder {
    tx: Sender<Command>,
    rx: Receiver<Command>,
}

impl RuntimeBuilder {
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = bounded(capacity.max(1));
        RuntimeBuilder { tx, rx }
    }

    pub fn sender(&self) -> EventSender {
        EventSender { tx: self.tx.clone() }
    }

    /// Move `manager` onto the worker thread and start dispatching.
    pub fn spawn(self, manager: RateUpgradeManager) -> std::io::Result<DispatchRuntime> {
        let status = Arc::new(Mutex::new(manager.snapshot()));
        let status_clone = status.clone();
        let rx = self.rx;

        let handle = thread::Builder::new()
            .name("bandup-dispatch".into())
            .spawn(move || dispatch_worker(manager, rx, status_clone))?;

        Ok(DispatchRuntime {
            tx: self.tx,
            status,
            handle: Some(handle),
        })
    }
}

impl Default for RuntimeBuilder {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}

/// Handle to the dispatch worker.
pub struct DispatchRuntime {
    tx: Sender<Command>,
    status: Arc<Mutex<Vec<GroupStatus>>>,
    handle: Option<thread::JoinHandle<()>>,
}

impl DispatchRuntime {
    /// Shorthand for a default-capacity builder with no collaborator needing
    /// an early sender.
    pub fn spawn(manager: RateUpgradeManager) -> std::io::Result<Self> {
        RuntimeBuilder::default().spawn(manager)
    }

    pub fn sender(&self) -> EventSender {
        EventSender { tx: self.tx.clone() }
    }

    /// Queue an event and wait for its result.
    pub fn dispatch(&self, event: Event) -> Result<Outcome> {
        let (reply, rx) = bounded(1);
        self.tx
            .send(Command::Event {
                event,
                reply: Some(reply),
            })
            .map_err(|_| BandupError::RuntimeGone)?;
        rx.recv().map_err(|_| BandupError::RuntimeGone)?
    }

    /// Queue an event without waiting for it to run.
    pub fn submit(&self, event: Event) -> Result<()> {
        self.sender().send(event)
    }

    pub fn add_group(&self, spec: GroupSpec) -> Result<()> {
        let (reply, rx) = bounded(1);
        self.tx
            .send(Command::AddGroup { spec, reply })
            .map_err(|_| BandupError::RuntimeGone)?;
        rx.recv().map_err(|_| BandupError::RuntimeGone)?
    }

    /// Group states as of the last processed command.
    pub fn status(&self) -> Vec<GroupStatus> {
        self.status.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Shared status handle for the metrics server.
    pub fn status_handle(&self) -> Arc<Mutex<Vec<GroupStatus>>> {
        self.status.clone()
    }

    /// Tear every group down and stop the worker. Idempotent; later calls
    /// return an empty report.
    pub fn shutdown(&mut self) -> Teardown {
        let Some(handle) = self.handle.take() else {
            return Teardown::new();
        };
        let (reply, rx) = bounded(1);
        let td = match self.tx.send(Command::Shutdown { reply }) {
            Ok(()) => rx.recv().unwrap_or_default(),
            Err(_) => Teardown::new(),
        };
        if handle.join().is_err() {
            tracing::error!("dispatch worker panicked");
        }
        td
    }
}

impl Drop for DispatchRuntime {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn dispatch_worker(
    mut manager: RateUpgradeManager,
    rx: Receiver<Command>,
    status: Arc<Mutex<Vec<GroupStatus>>>,
) {
    tracing::debug!("dispatch worker started");
    for cmd in rx.iter() {
        match cmd {
            Command::Event { event, reply } => {
                let kind = event.kind();
                let result = manager.dispatch(event);
                if let Some(reply) = reply {
                    let _ = reply.send(result);
                } else {
                    match &result {
                        Err(e) => tracing::warn!(event = kind, error = %e, "event failed"),
                        Ok(outcome) if !outcome.teardown.is_clean() => tracing::warn!(
                            event = kind,
                            failures = outcome.teardown.failures.len(),
                            "event completed with failures"
                        ),
                        Ok(_) => {}
                    }
                }
            }
            Command::AddGroup { spec, reply } => {
                let _ = reply.send(manager.add_group(spec));
            }
            Command::Shutdown { reply } => {
                let td = manager.shutdown();
                publish(&status, &manager);
                let _ = reply.send(td);
                break;
            }
        }
        publish(&status, &manager);
    }
    tracing::debug!("dispatch worker stopped");
}

fn publish(status: &Mutex<Vec<GroupStatus>>, manager: &RateUpgradeManager) {
    let snapshot = manager.snapshot();
    *status.lock().unwrap_or_else(|e| e.into_inner()) = snapshot;
}
