//! Mutex-protected input event queue.
//!
//! Pointer and keyboard events arrive on the RDP transport task and must be
//! replayed on the session thread that owns the libei connection. This is a
//! plain FIFO with an edge-triggered wakeup (`tokio::sync::Notify` standing
//! in for the source's `g_source_set_ready_time` pattern): pushing onto an
//! empty queue notifies a waiting drainer exactly once, and further pushes
//! before the drainer wakes are coalesced into that single notification.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use tokio::sync::Notify;

/// A single queued input action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputEvent {
    KeySym { sym: u32, state: KeyState },
    PointerMotionAbs { x: OrderedF64, y: OrderedF64 },
    PointerButton { button: u32, state: KeyState },
    PointerAxis { dx: OrderedF64, dy: OrderedF64, flags: u32 },
}

/// Pressed/released, shared by keys and buttons.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyState {
    Released,
    Pressed,
}

/// `f64` isn't `Eq`; axis/motion deltas are compared bit-for-bit in tests
/// and never arithmetically, so this newtype carries the bits directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderedF64(u64);

impl OrderedF64 {
    pub fn new(v: f64) -> Self {
        Self(v.to_bits())
    }

    pub fn get(self) -> f64 {
        f64::from_bits(self.0)
    }
}

struct Inner {
    queue: VecDeque<InputEvent>,
    shut_down: bool,
}

/// Queue shared between the transport task (producer) and the session
/// thread (consumer). Cheap to clone; all clones share the same backing
/// queue and wakeup.
#[derive(Clone)]
pub struct InputEventQueue {
    inner: Arc<Mutex<Inner>>,
    notify: Arc<Notify>,
}

impl Default for InputEventQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl InputEventQueue {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                queue: VecDeque::new(),
                shut_down: false,
            })),
            notify: Arc::new(Notify::new()),
        }
    }

    /// Pushes an event and wakes a waiting drainer. Dropped silently once
    /// the queue has been shut down — the session thread that would consume
    /// it is already gone.
    pub fn push(&self, event: InputEvent) {
        let mut inner = self.inner.lock().expect("input event queue mutex poisoned");
        if inner.shut_down {
            return;
        }
        let was_empty = inner.queue.is_empty();
        inner.queue.push_back(event);
        drop(inner);
        if was_empty {
            self.notify.notify_one();
        }
    }

    /// Drains every event currently queued, in order. Returns immediately
    /// with an empty `Vec` if the queue is empty; callers that want to block
    /// until something arrives should `.notified().await` first.
    pub fn drain(&self) -> Vec<InputEvent> {
        let mut inner = self.inner.lock().expect("input event queue mutex poisoned");
        inner.queue.drain(..).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().expect("input event queue mutex poisoned").queue.is_empty()
    }

    /// Resolves once the queue has had something pushed to it since the
    /// last `drain`/`notified` call, or immediately if it's already
    /// non-empty.
    pub async fn notified(&self) {
        if !self.is_empty() {
            return;
        }
        self.notify.notified().await;
    }

    /// Marks the queue as shut down. Returns every event still queued so the
    /// caller can replay them one last time — in particular, released-key
    /// events must never be silently dropped, or the compositor is left
    /// believing the key is still held down.
    pub fn shutdown_drain(&self) -> Vec<InputEvent> {
        let mut inner = self.inner.lock().expect("input event queue mutex poisoned");
        inner.shut_down = true;
        inner.queue.drain(..).collect()
    }
}

/// Calls [`InputEventQueue::shutdown_drain`] and replays any remaining
/// events through `sink` so a queue going out of scope never silently
/// drops a pending key-released event.
pub fn shutdown_drain_into(queue: &InputEventQueue, sink: &mut dyn FnMut(InputEvent)) {
    for event in queue.shutdown_drain() {
        sink(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_then_drain_preserves_order() {
        let q = InputEventQueue::new();
        q.push(InputEvent::KeySym { sym: 1, state: KeyState::Pressed });
        q.push(InputEvent::KeySym { sym: 1, state: KeyState::Released });

        let drained = q.drain();
        assert_eq!(drained.len(), 2);
        assert_eq!(
            drained[0],
            InputEvent::KeySym { sym: 1, state: KeyState::Pressed }
        );
        assert_eq!(
            drained[1],
            InputEvent::KeySym { sym: 1, state: KeyState::Released }
        );
    }

    #[test]
    fn drain_on_empty_queue_returns_empty_vec() {
        let q = InputEventQueue::new();
        assert!(q.drain().is_empty());
    }

    #[tokio::test]
    async fn notified_resolves_immediately_when_already_nonempty() {
        let q = InputEventQueue::new();
        q.push(InputEvent::PointerButton { button: 1, state: KeyState::Pressed });
        tokio::time::timeout(std::time::Duration::from_millis(50), q.notified())
            .await
            .expect("notified() should resolve without waiting");
    }

    #[tokio::test]
    async fn notified_wakes_on_push_from_another_task() {
        let q = InputEventQueue::new();
        let q2 = q.clone();
        let pusher = tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            q2.push(InputEvent::PointerMotionAbs { x: OrderedF64::new(1.0), y: OrderedF64::new(2.0) });
        });

        tokio::time::timeout(std::time::Duration::from_millis(200), q.notified())
            .await
            .expect("notified() should resolve once the pusher task runs");
        pusher.await.unwrap();
        assert_eq!(q.drain().len(), 1);
    }

    #[test]
    fn shutdown_drain_returns_pending_events_and_future_pushes_are_dropped() {
        let q = InputEventQueue::new();
        q.push(InputEvent::KeySym { sym: 5, state: KeyState::Pressed });

        let drained = q.shutdown_drain();
        assert_eq!(drained.len(), 1);

        // A key-released event arriving after shutdown would otherwise be
        // lost; pushing after shutdown is a no-op, so callers must have
        // already drained before tearing down the consumer.
        q.push(InputEvent::KeySym { sym: 5, state: KeyState::Released });
        assert!(q.is_empty());
    }

    #[test]
    fn shutdown_drain_into_replays_every_remaining_event() {
        let q = InputEventQueue::new();
        q.push(InputEvent::KeySym { sym: 9, state: KeyState::Pressed });
        q.push(InputEvent::KeySym { sym: 9, state: KeyState::Released });

        let mut replayed = Vec::new();
        shutdown_drain_into(&q, &mut |event| replayed.push(event));
        assert_eq!(replayed.len(), 2);
    }
}
