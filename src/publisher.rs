//! Reactive cells for the tracker's derived state.
//!
//! [`StateCell`] replays its latest value to every new subscriber.
//! [`EventCell`] holds a one-shot signal that the consumer clears with
//! [`EventCell::acknowledge`] once handled.

use crate::session::SessionRecord;
use serde::Serialize;
use tokio::sync::watch;

/// A value broadcast to any number of subscribers, replaying the latest
/// value on subscribe.
pub struct StateCell<T> {
    tx: watch::Sender<T>,
}

impl<T> StateCell<T> {
    pub fn new(initial: T) -> Self {
        let (tx, _) = watch::channel(initial);
        Self { tx }
    }

    /// Replace the value and notify subscribers, even if it is unchanged.
    pub fn set(&self, value: T) {
        self.tx.send_replace(value);
    }

    pub fn subscribe(&self) -> watch::Receiver<T> {
        self.tx.subscribe()
    }

    pub fn get(&self) -> T
    where
        T: Clone,
    {
        self.tx.borrow().clone()
    }
}

/// A one-shot signal layered on a replaying cell: `None` means unset.
pub struct EventCell<T> {
    cell: StateCell<Option<T>>,
}

impl<T> EventCell<T> {
    pub fn new() -> Self {
        Self {
            cell: StateCell::new(None),
        }
    }

    pub fn fire(&self, value: T) {
        self.cell.set(Some(value));
    }

    /// Reset to unset. Does nothing if the event is already clear.
    pub fn acknowledge(&self) {
        self.cell.tx.send_if_modified(|pending| pending.take().is_some());
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<T>> {
        self.cell.subscribe()
    }

    pub fn pending(&self) -> Option<T>
    where
        T: Clone,
    {
        self.cell.get()
    }
}

impl<T> Default for EventCell<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of every continuously published field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrackerState {
    /// The session in progress, if any.
    pub tonight: Option<SessionRecord>,
    pub start_enabled: bool,
    pub stop_enabled: bool,
    pub clear_enabled: bool,
    pub history_text: String,
}

impl TrackerState {
    /// Derive the published fields from the current session and history text.
    pub fn derive(
        current: Option<&SessionRecord>,
        history_len: usize,
        history_text: String,
    ) -> Self {
        Self {
            tonight: current.cloned(),
            start_enabled: current.is_none(),
            stop_enabled: current.is_some(),
            clear_enabled: history_len > 0,
            history_text,
        }
    }
}

impl Default for TrackerState {
    fn default() -> Self {
        Self::derive(None, 0, String::new())
    }
}

/// One field of the published state, projected from the snapshot channel.
///
/// Every projection reads the same [`TrackerState`] version, so two fields
/// read through one borrow always agree. Wakes on any state change.
pub struct FieldReceiver<T> {
    rx: watch::Receiver<TrackerState>,
    project: fn(&TrackerState) -> T,
}

impl<T> FieldReceiver<T> {
    pub fn get(&self) -> T {
        (self.project)(&self.rx.borrow())
    }

    /// Read the field and mark the current state as seen.
    pub fn get_and_update(&mut self) -> T {
        (self.project)(&self.rx.borrow_and_update())
    }

    pub fn has_changed(&self) -> Result<bool, watch::error::RecvError> {
        self.rx.has_changed()
    }

    /// Wait for the next publish and return the field's value in it.
    pub async fn changed(&mut self) -> Result<T, watch::error::RecvError> {
        self.rx.changed().await?;
        Ok(self.get_and_update())
    }
}

/// Fan-out point for everything the tracker exposes to a presentation layer.
///
/// All continuously published fields travel in one [`TrackerState`]
/// snapshot; per-field receivers are projections of it.
pub struct StatePublisher {
    /// Fired by `stop` with the record that was just closed.
    pub navigate_to_quality: EventCell<SessionRecord>,
    snapshot: StateCell<TrackerState>,
}

impl StatePublisher {
    pub fn new() -> Self {
        Self {
            navigate_to_quality: EventCell::new(),
            snapshot: StateCell::new(TrackerState::default()),
        }
    }

    /// Replace the whole derived state in a single step.
    pub fn publish(&self, state: TrackerState) {
        self.snapshot.set(state);
    }

    pub fn state(&self) -> TrackerState {
        self.snapshot.get()
    }

    /// Receiver over whole-state snapshots.
    pub fn subscribe(&self) -> watch::Receiver<TrackerState> {
        self.snapshot.subscribe()
    }

    pub fn start_enabled(&self) -> FieldReceiver<bool> {
        self.field(|state| state.start_enabled)
    }

    pub fn stop_enabled(&self) -> FieldReceiver<bool> {
        self.field(|state| state.stop_enabled)
    }

    pub fn clear_enabled(&self) -> FieldReceiver<bool> {
        self.field(|state| state.clear_enabled)
    }

    pub fn history_text(&self) -> FieldReceiver<String> {
        self.field(|state| state.history_text.clone())
    }

    fn field<T>(&self, project: fn(&TrackerState) -> T) -> FieldReceiver<T> {
        FieldReceiver {
            rx: self.snapshot.subscribe(),
            project,
        }
    }
}

impl Default for StatePublisher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_state_cell_replays_latest() {
        let cell = StateCell::new(1);
        cell.set(2);
        cell.set(3);

        let rx = cell.subscribe();
        assert_eq!(*rx.borrow(), 3);
    }

    #[test]
    fn test_state_cell_notifies_on_identical_value() {
        let cell = StateCell::new(true);
        let mut rx = cell.subscribe();
        rx.borrow_and_update();

        cell.set(true);
        assert!(rx.has_changed().unwrap());
    }

    #[test]
    fn test_detached_subscriber_does_not_affect_others() {
        let cell = StateCell::new(String::new());
        let first = cell.subscribe();
        let mut second = cell.subscribe();
        drop(first);

        cell.set("night".to_string());
        assert!(second.has_changed().unwrap());
        assert_eq!(*second.borrow_and_update(), "night");
    }

    #[test]
    fn test_event_cell_fires_once_until_acknowledged() {
        let event = EventCell::new();
        let mut rx = event.subscribe();
        assert!(rx.borrow_and_update().is_none());

        event.fire(SessionRecord::new(5));
        assert!(rx.has_changed().unwrap());
        assert!(rx.borrow_and_update().is_some());

        event.acknowledge();
        assert!(rx.has_changed().unwrap());
        assert!(rx.borrow_and_update().is_none());
        assert!(event.pending().is_none());

        // Acknowledging an unset event publishes nothing
        event.acknowledge();
        assert!(!rx.has_changed().unwrap());
    }

    #[test]
    fn test_publish_updates_every_field() {
        let publisher = StatePublisher::new();
        let mut stop_rx = publisher.stop_enabled();
        assert!(!stop_rx.get_and_update());
        let current = SessionRecord::new(10);

        publisher.publish(TrackerState::derive(Some(&current), 1, "one night".to_string()));

        assert!(stop_rx.has_changed().unwrap());
        assert!(stop_rx.get_and_update());
        assert!(!publisher.start_enabled().get());
        assert!(publisher.clear_enabled().get());
        assert_eq!(publisher.history_text().get(), "one night");
        assert_eq!(publisher.state().tonight, Some(current));
    }

    #[tokio::test]
    async fn test_field_receiver_yields_value_on_change() {
        let publisher = StatePublisher::new();
        let mut history_rx = publisher.history_text();

        publisher.publish(TrackerState::derive(None, 2, "two nights".to_string()));

        assert_eq!(history_rx.changed().await.unwrap(), "two nights");
        assert!(!history_rx.has_changed().unwrap());
    }

    #[test]
    fn test_concurrent_reader_never_sees_torn_state() {
        let publisher = Arc::new(StatePublisher::new());
        let night = SessionRecord::new(1);
        let active = TrackerState::derive(Some(&night), 1, "active".to_string());
        let idle = TrackerState::derive(None, 1, "idle".to_string());

        let writer = {
            let publisher = Arc::clone(&publisher);
            std::thread::spawn(move || {
                for i in 0..20_000 {
                    let state = if i % 2 == 0 { &active } else { &idle };
                    publisher.publish(state.clone());
                }
            })
        };

        let mut torn = 0;
        while !writer.is_finished() {
            let state = publisher.state();
            if state.start_enabled == state.stop_enabled
                || state.stop_enabled != state.tonight.is_some()
                || state.history_text != if state.stop_enabled { "active" } else { "idle" }
            {
                torn += 1;
            }
        }
        writer.join().unwrap();
        assert_eq!(torn, 0);
    }

    #[test]
    fn test_default_state() {
        let state = TrackerState::default();
        assert!(state.start_enabled);
        assert!(!state.stop_enabled);
        assert!(!state.clear_enabled);
        assert!(state.history_text.is_empty());
        assert!(state.tonight.is_none());
    }
}
