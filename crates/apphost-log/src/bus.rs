//! A typed publish/subscribe event bus keyed by event name.
//!
//! Every emitter (the Log Console, the App Manager, the HTTP Engine) holds
//! one `EventBus<E>` and fans its events out to listeners registered with
//! `on`/`once`. Listeners run synchronously inside `emit`; an SSE or
//! WebSocket handler that needs an async stream registers a closure that
//! forwards into an `mpsc` channel and calls `off` on disconnect.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Above this many listeners on one key, `on`/`once` logs a leak warning —
/// a likely sign that a caller forgot to `off` on disconnect.
const LEAK_WARN_THRESHOLD: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

struct Listener<E> {
    id: ListenerId,
    once: bool,
    callback: Arc<dyn Fn(&E) + Send + Sync>,
}

pub struct EventBus<E> {
    listeners: Mutex<HashMap<String, Vec<Listener<E>>>>,
    next_id: AtomicU64,
}

impl<E> Default for EventBus<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> EventBus<E> {
    pub fn new() -> Self {
        Self {
            listeners: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    fn register(
        &self,
        key: &str,
        once: bool,
        callback: impl Fn(&E) + Send + Sync + 'static,
    ) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut listeners = self.listeners.lock().expect("event bus mutex poisoned");
        let entries = listeners.entry(key.to_owned()).or_default();
        entries.push(Listener {
            id,
            once,
            callback: Arc::new(callback),
        });
        if entries.len() > LEAK_WARN_THRESHOLD {
            tracing::warn!(
                key,
                count = entries.len(),
                "event bus has an unusually large number of listeners on one key; possible leak"
            );
        }
        id
    }

    /// Subscribe `callback` to every `emit(key, ...)` until `off` is called.
    pub fn on(&self, key: &str, callback: impl Fn(&E) + Send + Sync + 'static) -> ListenerId {
        self.register(key, false, callback)
    }

    /// Subscribe `callback` for exactly one emission, then auto-unsubscribe.
    pub fn once(&self, key: &str, callback: impl Fn(&E) + Send + Sync + 'static) -> ListenerId {
        self.register(key, true, callback)
    }

    /// Remove a previously registered listener. No-op if already removed.
    pub fn off(&self, key: &str, id: ListenerId) {
        let mut listeners = self.listeners.lock().expect("event bus mutex poisoned");
        if let Some(entries) = listeners.get_mut(key) {
            entries.retain(|l| l.id != id);
            if entries.is_empty() {
                listeners.remove(key);
            }
        }
    }

    /// Call every listener registered on `key` with `event`, in registration
    /// order. `once` listeners are removed after this call.
    pub fn emit(&self, key: &str, event: &E) {
        // Snapshot (cloning the Arcs, not the closures) so a listener calling
        // `on`/`off` mid-emit doesn't deadlock on a re-entrant lock and can't
        // corrupt the in-progress iteration.
        let (callbacks, once_ids): (Vec<_>, Vec<_>) = {
            let listeners = self.listeners.lock().expect("event bus mutex poisoned");
            match listeners.get(key) {
                Some(entries) => entries
                    .iter()
                    .map(|l| (l.callback.clone(), if l.once { Some(l.id) } else { None }))
                    .unzip(),
                None => (Vec::new(), Vec::new()),
            }
        };
        for callback in &callbacks {
            callback(event);
        }
        let once_ids: Vec<ListenerId> = once_ids.into_iter().flatten().collect();
        if !once_ids.is_empty() {
            let mut listeners = self.listeners.lock().expect("event bus mutex poisoned");
            if let Some(entries) = listeners.get_mut(key) {
                entries.retain(|l| !once_ids.contains(&l.id));
                if entries.is_empty() {
                    listeners.remove(key);
                }
            }
        }
    }

    pub fn listener_count(&self, key: &str) -> usize {
        self.listeners
            .lock()
            .expect("event bus mutex poisoned")
            .get(key)
            .map_or(0, Vec::len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    #[test]
    fn on_receives_every_emit_in_order() {
        let bus: EventBus<i32> = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen2 = seen.clone();
        bus.on("tick", move |n| seen2.lock().unwrap().push(*n));
        bus.emit("tick", &1);
        bus.emit("tick", &2);
        bus.emit("tick", &3);
        assert_eq!(*seen.lock().unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn once_fires_exactly_one_time() {
        let bus: EventBus<i32> = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        let count2 = count.clone();
        bus.once("tick", move |_| {
            count2.fetch_add(1, Ordering::SeqCst);
        });
        bus.emit("tick", &1);
        bus.emit("tick", &2);
        bus.emit("tick", &3);
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(bus.listener_count("tick"), 0);
    }

    #[test]
    fn off_stops_future_emits() {
        let bus: EventBus<i32> = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        let count2 = count.clone();
        let id = bus.on("tick", move |_| {
            count2.fetch_add(1, Ordering::SeqCst);
        });
        bus.emit("tick", &1);
        bus.off("tick", id);
        bus.emit("tick", &2);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn listeners_on_distinct_keys_do_not_interfere() {
        let bus: EventBus<i32> = EventBus::new();
        let a = Arc::new(AtomicUsize::new(0));
        let b = Arc::new(AtomicUsize::new(0));
        let (a2, b2) = (a.clone(), b.clone());
        bus.on("a", move |_| {
            a2.fetch_add(1, Ordering::SeqCst);
        });
        bus.on("b", move |_| {
            b2.fetch_add(1, Ordering::SeqCst);
        });
        bus.emit("a", &1);
        assert_eq!(a.load(Ordering::SeqCst), 1);
        assert_eq!(b.load(Ordering::SeqCst), 0);
    }
}
