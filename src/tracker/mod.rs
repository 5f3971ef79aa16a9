//! The sleep tracker controller.
//!
//! [`SleepTracker`] is a handle to a worker task that owns the current
//! session. Commands are queued and applied one at a time, so they complete
//! in the order they were issued. After every mutation the worker republishes
//! derived state through a [`StatePublisher`].

mod clock;

pub use clock::{Clock, SystemClock};

use crate::format::HistoryFormatter;
use crate::publisher::{StatePublisher, TrackerState};
use crate::session::{SessionId, SessionRecord, SessionStore, SleepQuality, StorageError};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::{CancellationToken, DropGuard};

#[derive(Debug, Error)]
pub enum TrackerError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("Session not found: {0}")]
    NotFound(SessionId),

    #[error("Session {0} is still in progress")]
    StillInProgress(SessionId),

    #[error("Tracker was shut down before the operation completed")]
    Cancelled,

    #[error("Tracker command queue is full")]
    QueueFull,
}

/// Commands waiting behind the one being applied.
const COMMAND_QUEUE_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Copy)]
enum Command {
    Refresh,
    Start,
    Stop,
    Clear,
    Rate { id: SessionId, quality: SleepQuality },
}

struct Request {
    command: Command,
    reply: oneshot::Sender<Result<(), TrackerError>>,
}

/// Completion handle for a queued command.
///
/// Dropping it does not cancel the command.
#[must_use = "await `finished` to observe failures"]
pub struct Operation {
    rx: oneshot::Receiver<Result<(), TrackerError>>,
}

impl Operation {
    pub async fn finished(self) -> Result<(), TrackerError> {
        self.rx.await.unwrap_or(Err(TrackerError::Cancelled))
    }
}

/// Handle to a running tracker. Dropping it shuts the worker down.
pub struct SleepTracker {
    tx: mpsc::Sender<Request>,
    publisher: Arc<StatePublisher>,
    cancel: CancellationToken,
    _cancel_guard: DropGuard,
}

impl SleepTracker {
    /// Start the worker on the current tokio runtime and queue the initial
    /// refresh.
    pub fn spawn(
        store: Arc<dyn SessionStore>,
        formatter: Arc<dyn HistoryFormatter>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self::spawn_with_capacity(store, formatter, clock, COMMAND_QUEUE_CAPACITY)
    }

    fn spawn_with_capacity(
        store: Arc<dyn SessionStore>,
        formatter: Arc<dyn HistoryFormatter>,
        clock: Arc<dyn Clock>,
        capacity: usize,
    ) -> Self {
        let (tx, rx) = mpsc::channel(capacity);
        let publisher = Arc::new(StatePublisher::new());
        let cancel = CancellationToken::new();

        let worker = Worker {
            history_rx: store.subscribe(),
            watch_history: true,
            store,
            formatter,
            clock,
            publisher: Arc::clone(&publisher),
            current: None,
        };
        tokio::spawn(worker.run(rx, cancel.clone()));

        let tracker = Self {
            tx,
            publisher,
            _cancel_guard: cancel.clone().drop_guard(),
            cancel,
        };
        // Resolve tonight from the store; the worker logs a failure
        let _ = tracker.refresh();
        tracker
    }

    pub fn with_system_clock(
        store: Arc<dyn SessionStore>,
        formatter: Arc<dyn HistoryFormatter>,
    ) -> Self {
        Self::spawn(store, formatter, Arc::new(SystemClock))
    }

    /// Re-resolve tonight's session and history from the store.
    pub fn refresh(&self) -> Operation {
        self.send(Command::Refresh)
    }

    /// Begin a new session. Does not check for a session already in progress.
    pub fn start(&self) -> Operation {
        self.send(Command::Start)
    }

    /// Close the current session. A no-op when none is in progress.
    pub fn stop(&self) -> Operation {
        self.send(Command::Stop)
    }

    /// Erase the whole history.
    pub fn clear(&self) -> Operation {
        self.send(Command::Clear)
    }

    /// Record how well the user slept during a closed session.
    pub fn rate(&self, id: SessionId, quality: SleepQuality) -> Operation {
        self.send(Command::Rate { id, quality })
    }

    /// Clear the navigation cue fired by `stop`.
    pub fn acknowledge_navigation_event(&self) {
        self.publisher.navigate_to_quality.acknowledge();
    }

    pub fn state(&self) -> TrackerState {
        self.publisher.state()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<TrackerState> {
        self.publisher.subscribe()
    }

    /// Per-field receivers and the navigation event.
    pub fn publisher(&self) -> &StatePublisher {
        &self.publisher
    }

    pub fn navigation_event(&self) -> watch::Receiver<Option<SessionRecord>> {
        self.publisher.navigate_to_quality.subscribe()
    }

    /// Stop the worker. In-flight and queued commands resolve to
    /// [`TrackerError::Cancelled`]; store writes that already landed stay.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Queue a command without waiting. A full queue fails the operation
    /// with [`TrackerError::QueueFull`].
    fn send(&self, command: Command) -> Operation {
        let (reply, rx) = oneshot::channel();
        match self.tx.try_send(Request { command, reply }) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(req)) => {
                tracing::warn!(?command, "Tracker command queue is full");
                let _ = req.reply.send(Err(TrackerError::QueueFull));
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::debug!(?command, "Tracker worker is gone, dropping command");
            }
        }
        Operation { rx }
    }
}

struct Worker {
    store: Arc<dyn SessionStore>,
    formatter: Arc<dyn HistoryFormatter>,
    clock: Arc<dyn Clock>,
    publisher: Arc<StatePublisher>,
    /// Only ever holds an in-progress record.
    current: Option<SessionRecord>,
    history_rx: watch::Receiver<Vec<SessionRecord>>,
    watch_history: bool,
}

impl Worker {
    async fn run(mut self, mut rx: mpsc::Receiver<Request>, cancel: CancellationToken) {
        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                req = rx.recv() => {
                    let Some(Request { command, reply }) = req else { break };
                    tracing::debug!(?command, "Applying tracker command");
                    let result = tokio::select! {
                        biased;
                        () = cancel.cancelled() => break,
                        result = self.apply(command) => result,
                    };
                    // Any store write that landed before the failure is
                    // republished by the history branch; `current` is untouched
                    if let Err(e) = &result {
                        tracing::warn!(?command, "Tracker command failed: {}", e);
                    }
                    let _ = reply.send(result);
                }
                changed = self.history_rx.changed(), if self.watch_history => {
                    if changed.is_err() {
                        tracing::warn!("Session store stopped publishing history");
                        self.watch_history = false;
                    } else {
                        self.publish();
                    }
                }
            }
        }
        tracing::debug!("Tracker worker stopped");
    }

    async fn apply(&mut self, command: Command) -> Result<(), TrackerError> {
        match command {
            Command::Refresh => {
                self.current = self.tonight().await?;
            }
            Command::Start => {
                let night = SessionRecord::new(self.clock.now_millis());
                let id = self.store.insert(&night).await?;
                tracing::info!(%id, "Started sleep session");
                // The store is the source of truth, not the record just written
                self.current = self.tonight().await?;
            }
            Command::Stop => {
                let Some(mut night) = self.current.clone() else {
                    tracing::debug!("No session in progress, ignoring stop");
                    return Ok(());
                };
                // A closed record must end after it starts
                let end = self.clock.now_millis().max(night.start_time_ms.saturating_add(1));
                if end <= night.start_time_ms {
                    return Err(StorageError::InvalidData(format!(
                        "Session {} starts too late to be closed",
                        night.id
                    ))
                    .into());
                }
                night.end_time_ms = end;
                self.store.update(&night).await?;
                tracing::info!(id = %night.id, "Stopped sleep session");
                self.current = None;
                self.publish();
                self.publisher.navigate_to_quality.fire(night);
                return Ok(());
            }
            Command::Clear => {
                self.store.clear_all().await?;
                self.current = None;
            }
            Command::Rate { id, quality } => {
                let mut night = self
                    .store
                    .get(id)
                    .await?
                    .ok_or(TrackerError::NotFound(id))?;
                if !night.is_closed() {
                    return Err(TrackerError::StillInProgress(id));
                }
                night.quality = Some(quality);
                self.store.update(&night).await?;
                tracing::info!(%id, %quality, "Rated sleep session");
            }
        }
        self.publish();
        Ok(())
    }

    /// The most recent record, if it is still in progress. A closed record
    /// means the last session already ended.
    async fn tonight(&self) -> Result<Option<SessionRecord>, StorageError> {
        let night = self.store.most_recent().await?;
        Ok(night.filter(SessionRecord::is_in_progress))
    }

    fn publish(&mut self) {
        let (len, text) = {
            let history = self.history_rx.borrow_and_update();
            (history.len(), self.formatter.format(&history))
        };
        self.publisher
            .publish(TrackerState::derive(self.current.as_ref(), len, text));
    }
}
